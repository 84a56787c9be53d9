use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_TOLERANCE;

/// Link raw colors in a design document to the closest color variables and styles.
#[derive(Parser, Debug)]
#[command(name = "colorlink", version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List colors that are not linked to any variable or style
    Scan {
        /// Path to the scene file
        scene: PathBuf,

        /// Which nodes to scan
        #[arg(short, long, value_enum, default_value_t = Scope::Page)]
        scope: Scope,
    },

    /// Link raw colors to their closest variables or styles
    Link {
        /// Path to the scene file
        scene: PathBuf,

        /// Which nodes to link
        #[arg(short, long, value_enum, default_value_t = Scope::Page)]
        scope: Scope,

        /// Only consider one kind of token (both are searched if omitted)
        #[arg(short, long, value_enum)]
        prefer: Option<TokenPreference>,

        /// Maximum CIEDE2000 distance for a match to be applied
        #[arg(short, long, default_value_t = DEFAULT_TOLERANCE)]
        tolerance: f32,

        /// Overall time budget in milliseconds
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,

        /// Write the updated scene to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the undo log to this file
        #[arg(long)]
        undo_log: Option<PathBuf>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Revert a previous link run from its undo log
    Undo {
        /// Path to the scene file
        scene: PathBuf,

        /// Undo log written by `link --undo-log`
        #[arg(short, long)]
        log: PathBuf,

        /// Write the restored scene to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Selection,
    Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TokenPreference {
    Variables,
    Styles,
}
