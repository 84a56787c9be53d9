use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use colorlink::cli::{Args, Command};
use colorlink::config::LinkConfig;
use colorlink::host::memory::MemoryDocument;
use colorlink::host::HostDocument;
use colorlink::pipeline::link::{link_colors, undo_changes, LinkRequest, LinkingSummary};
use colorlink::pipeline::replace::UndoEntry;
use colorlink::pipeline::scan::{inventory, scan};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("COLORLINK_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Scan { scene, scope } => {
            let doc = MemoryDocument::load(&scene)?;
            let roots = doc.scope_roots(scope).await?;
            let occurrences = scan(&doc, &roots).await?;
            for group in inventory(&occurrences) {
                println!(
                    "{}  {:>4}  {}",
                    group.hex,
                    group.count,
                    group.node_paths.join(", ")
                );
            }
        }
        Command::Link {
            scene,
            scope,
            prefer,
            tolerance,
            timeout_ms,
            output,
            undo_log,
            json,
        } => {
            let doc = MemoryDocument::load(&scene)?;
            let config = LinkConfig {
                budget: Duration::from_millis(timeout_ms),
                ..LinkConfig::default()
            };
            let request = LinkRequest {
                scope,
                preference: prefer,
                tolerance: Some(tolerance),
            };
            let summary = link_colors(&doc, &request, &config).await;

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            if let Some(path) = undo_log {
                write_undo_log(&path, &summary.undo_entries)?;
            }
            if let Some(path) = output {
                doc.save(&path)?;
            }
        }
        Command::Undo { scene, log, output } => {
            let doc = MemoryDocument::load(&scene)?;
            let entries = read_undo_log(&log)?;
            let report = undo_changes(&doc, &entries).await;
            println!(
                "restored {}, skipped {}, failed {}",
                report.restored, report.skipped, report.failed
            );
            if let Some(path) = output {
                doc.save(&path)?;
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &LinkingSummary) {
    println!("{}", summary.message());
    for (i, outcome) in summary.outcomes.iter().enumerate() {
        let occurrence = &outcome.occurrence;
        let color_match = summary.matches.get(i);
        let token = color_match
            .and_then(|m| m.candidate.as_ref())
            .map(|t| t.name())
            .unwrap_or("-");
        let distance = color_match
            .map(|m| m.distance)
            .filter(|d| d.is_finite())
            .map(|d| format!("ΔE {d:.2}"))
            .unwrap_or_default();
        let marker = match (&outcome.failure, outcome.binding_fallback) {
            (None, false) => "linked".to_string(),
            (None, true) => "color only".to_string(),
            (Some(reason), _) => reason.to_string(),
        };
        println!(
            "  {}  {:<9} {}  {} {}  [{}]",
            occurrence.node_path, occurrence.kind, occurrence.color, token, distance, marker
        );
    }
}

fn write_undo_log(path: &Path, entries: &[UndoEntry]) -> Result<()> {
    let json = serde_json::to_string_pretty(entries)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write undo log to {}", path.display()))
}

fn read_undo_log(path: &Path) -> Result<Vec<UndoEntry>> {
    let text = std::fs::read_to_string(path).with_context(|| {
        if !path.exists() {
            format!("file not found: {}", path.display())
        } else {
            format!("failed to read undo log: {}", path.display())
        }
    })?;
    serde_json::from_str(&text).with_context(|| format!("invalid undo log: {}", path.display()))
}
