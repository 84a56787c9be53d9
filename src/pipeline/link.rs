use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cli::{Scope, TokenPreference};
use crate::config::LinkConfig;
use crate::host::HostDocument;
use crate::pipeline::catalog::ResolvedCatalog;
use crate::pipeline::matcher::{match_colors, ColorMatch};
use crate::pipeline::replace::{
    self, apply_into, FailureReason, Replacement, ReplacementOutcome, UndoEntry, UndoReport,
};
use crate::pipeline::scan::{scan, UnlinkedOccurrence};

/// One linking request from the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRequest {
    pub scope: Scope,
    #[serde(default)]
    pub preference: Option<TokenPreference>,
    #[serde(default)]
    pub tolerance: Option<f32>,
}

impl LinkRequest {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            preference: None,
            tolerance: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum LinkStatus {
    Completed,
    /// The searched pools held no usable token sources.
    NoCandidates,
    /// Token sources could not be enumerated; nothing was linked.
    CatalogUnavailable(String),
    /// The scope could not be read.
    Failed(String),
    TimedOut { budget_ms: u64 },
}

/// Read-only result of a linking run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkingSummary {
    pub status: LinkStatus,
    pub total_scanned: usize,
    pub total_replaced: usize,
    pub matches: Vec<ColorMatch>,
    pub outcomes: Vec<ReplacementOutcome>,
    pub undo_entries: Vec<UndoEntry>,
    /// Occurrences for which no candidate existed at all.
    pub unmatched_colors: Vec<UnlinkedOccurrence>,
    /// Token sources left out of the catalog because they did not resolve.
    pub excluded_tokens: usize,
}

impl LinkingSummary {
    fn failed(status: LinkStatus) -> Self {
        Self {
            status,
            total_scanned: 0,
            total_replaced: 0,
            matches: Vec::new(),
            outcomes: Vec::new(),
            undo_entries: Vec::new(),
            unmatched_colors: Vec::new(),
            excluded_tokens: 0,
        }
    }

    /// Whatever was written before the deadline stays undoable. Matches that
    /// never finished, including the one in flight, fail with `TimedOut`.
    fn timed_out(budget: Duration, progress: RunProgress) -> Self {
        let total_replaced = progress.replacement.replaced();
        let mut outcomes = progress.replacement.outcomes;
        let finished = outcomes.len();
        outcomes.extend(
            progress
                .matches
                .iter()
                .skip(finished)
                .map(|m| ReplacementOutcome::failed(&m.occurrence, FailureReason::TimedOut)),
        );
        Self {
            total_scanned: progress.scanned,
            total_replaced,
            unmatched_colors: unmatched(&progress.matches),
            matches: progress.matches,
            outcomes,
            undo_entries: progress.replacement.undo_entries,
            excluded_tokens: progress.excluded_tokens,
            ..Self::failed(LinkStatus::TimedOut {
                budget_ms: budget.as_millis().try_into().unwrap_or(u64::MAX),
            })
        }
    }

    /// Short status line for the user.
    pub fn message(&self) -> String {
        match &self.status {
            LinkStatus::Completed if self.total_scanned == 0 => "No unlinked colors found".into(),
            LinkStatus::Completed => format!(
                "Linked {} of {} colors",
                self.total_replaced, self.total_scanned
            ),
            LinkStatus::NoCandidates => {
                "No color variables or styles available to link to".into()
            }
            LinkStatus::CatalogUnavailable(reason) => {
                format!("Could not read color variables and styles: {reason}")
            }
            LinkStatus::Failed(reason) => format!("Linking failed: {reason}"),
            LinkStatus::TimedOut { budget_ms } => format!(
                "Linking timed out after {budget_ms} ms ({} colors linked before stopping)",
                self.total_replaced
            ),
        }
    }
}

#[derive(Debug, Default)]
struct RunProgress {
    scanned: usize,
    excluded_tokens: usize,
    matches: Vec<ColorMatch>,
    replacement: Replacement,
}

fn unmatched(matches: &[ColorMatch]) -> Vec<UnlinkedOccurrence> {
    matches
        .iter()
        .filter(|m| !m.has_candidate())
        .map(|m| m.occurrence.clone())
        .collect()
}

/// Scan the scope, match against the live catalog, apply accepted matches.
///
/// Always produces a summary. Per-occurrence problems land in `outcomes`;
/// only an unreadable scope or an exhausted budget change the status to a
/// failure.
pub async fn link_colors<H: HostDocument>(
    doc: &H,
    request: &LinkRequest,
    config: &LinkConfig,
) -> LinkingSummary {
    let mut progress = RunProgress::default();
    let outcome =
        tokio::time::timeout(config.budget, run(doc, request, config, &mut progress)).await;
    let summary = match outcome {
        Ok(summary) => summary,
        Err(_) => {
            warn!(budget = ?config.budget, "linking run timed out");
            LinkingSummary::timed_out(config.budget, progress)
        }
    };
    info!(
        scanned = summary.total_scanned,
        replaced = summary.total_replaced,
        unmatched = summary.unmatched_colors.len(),
        "link run finished"
    );
    doc.notify(&summary.message());
    summary
}

async fn run<H: HostDocument>(
    doc: &H,
    request: &LinkRequest,
    config: &LinkConfig,
    progress: &mut RunProgress,
) -> LinkingSummary {
    let tolerance = config.effective_tolerance(request.tolerance);

    let roots = match doc.scope_roots(request.scope).await {
        Ok(roots) => roots,
        Err(err) => return LinkingSummary::failed(LinkStatus::Failed(err.to_string())),
    };
    let occurrences = match scan(doc, &roots).await {
        Ok(occurrences) => occurrences,
        Err(err) => return LinkingSummary::failed(LinkStatus::Failed(err.to_string())),
    };
    progress.scanned = occurrences.len();

    // One catalog snapshot for the whole run.
    let (catalog, catalog_error) = match doc.token_sources().await {
        Ok(sources) => (ResolvedCatalog::resolve(&sources), None),
        Err(err) => {
            warn!(error = %err, "token sources unavailable");
            (ResolvedCatalog::default(), Some(err.to_string()))
        }
    };

    progress.excluded_tokens = catalog.excluded.len();

    let report = match_colors(&occurrences, &catalog, request.preference, tolerance);
    progress.matches = report.matches;
    apply_into(doc, &progress.matches, config, &mut progress.replacement).await;

    let status = match catalog_error {
        Some(reason) => LinkStatus::CatalogUnavailable(reason),
        None if report.no_candidates && !occurrences.is_empty() => LinkStatus::NoCandidates,
        None => LinkStatus::Completed,
    };
    let matches = std::mem::take(&mut progress.matches);
    let replacement = std::mem::take(&mut progress.replacement);

    LinkingSummary {
        status,
        total_scanned: occurrences.len(),
        total_replaced: replacement.replaced(),
        unmatched_colors: unmatched(&matches),
        matches,
        outcomes: replacement.outcomes,
        undo_entries: replacement.undo_entries,
        excluded_tokens: catalog.excluded.len(),
    }
}

/// Replay an undo log. Best-effort; the report is the acknowledgement.
pub async fn undo_changes<H: HostDocument>(doc: &H, entries: &[UndoEntry]) -> UndoReport {
    let report = replace::undo(doc, entries).await;
    info!(
        restored = report.restored,
        skipped = report.skipped,
        failed = report.failed,
        "undo finished"
    );
    doc.notify(&format!("Restored {} of {} changes", report.restored, entries.len()));
    report
}
