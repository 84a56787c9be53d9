use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::color::ColorSample;
use crate::config::LinkConfig;
use crate::error::HostError;
use crate::host::{HostDocument, Paint, PaintSlot, SceneNode, SolidPaint};
use crate::host::{NodeId, PropertyKind};
use crate::pipeline::catalog::TokenSource;
use crate::pipeline::matcher::ColorMatch;
use crate::pipeline::scan::UnlinkedOccurrence;

/// Why an occurrence was left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    NodeNotFound,
    Locked,
    /// A candidate existed but was outside the tolerance.
    NoMatch,
    /// No candidate existed at all.
    NoCandidates,
    MissingProperty,
    /// The property no longer holds the scanned unlinked color.
    Changed,
    /// Assigning the style would replace other paints on the property.
    StyleWouldReplacePaints,
    StyleDidNotApply,
    /// The run budget ran out before this occurrence finished.
    TimedOut,
    WriteFailed(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::NodeNotFound => f.write_str("node not found"),
            FailureReason::Locked => f.write_str("locked"),
            FailureReason::NoMatch => f.write_str("no match"),
            FailureReason::NoCandidates => f.write_str("no candidates available"),
            FailureReason::MissingProperty => f.write_str("property not found"),
            FailureReason::Changed => f.write_str("changed since scan"),
            FailureReason::StyleWouldReplacePaints => {
                f.write_str("style would replace other paints")
            }
            FailureReason::StyleDidNotApply => f.write_str("style did not apply"),
            FailureReason::TimedOut => f.write_str("timed out"),
            FailureReason::WriteFailed(msg) => write!(f, "write failed: {msg}"),
        }
    }
}

impl From<HostError> for FailureReason {
    fn from(err: HostError) -> Self {
        match err {
            HostError::MissingProperty { .. } => FailureReason::MissingProperty,
            other => FailureReason::WriteFailed(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplacementOutcome {
    pub occurrence: UnlinkedOccurrence,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    /// The variable binding did not stick and a plain color was written.
    pub binding_fallback: bool,
}

impl ReplacementOutcome {
    fn succeeded(occurrence: &UnlinkedOccurrence, binding_fallback: bool) -> Self {
        Self {
            occurrence: occurrence.clone(),
            success: true,
            failure: None,
            binding_fallback,
        }
    }

    pub(crate) fn failed(occurrence: &UnlinkedOccurrence, reason: FailureReason) -> Self {
        debug!(node = %occurrence.node_id, %reason, "not replaced");
        Self {
            occurrence: occurrence.clone(),
            success: false,
            failure: Some(reason),
            binding_fallback: false,
        }
    }
}

/// Pre-change snapshot of one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoEntry {
    pub node_id: NodeId,
    pub kind: PropertyKind,
    #[serde(default)]
    pub previous_paints: Option<Vec<Paint>>,
    #[serde(default)]
    pub previous_style_id: Option<String>,
}

/// Outcomes and undo log of an apply pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Replacement {
    pub outcomes: Vec<ReplacementOutcome>,
    pub undo_entries: Vec<UndoEntry>,
}

impl Replacement {
    pub fn replaced(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }
}

/// Apply every accepted match in order. Rejected matches become failed
/// outcomes without touching the document.
pub async fn apply<H: HostDocument>(
    doc: &H,
    matches: &[ColorMatch],
    config: &LinkConfig,
) -> Replacement {
    let mut replacement = Replacement::default();
    apply_into(doc, matches, config, &mut replacement).await;
    replacement
}

/// Like [`apply`], appending to `out` as it goes so a caller that abandons
/// the future still holds every undo entry captured so far.
pub async fn apply_into<H: HostDocument>(
    doc: &H,
    matches: &[ColorMatch],
    config: &LinkConfig,
    out: &mut Replacement,
) {
    for color_match in matches {
        let outcome = apply_one(doc, color_match, config, &mut out.undo_entries).await;
        out.outcomes.push(outcome);
    }
}

async fn apply_one<H: HostDocument>(
    doc: &H,
    color_match: &ColorMatch,
    config: &LinkConfig,
    undo: &mut Vec<UndoEntry>,
) -> ReplacementOutcome {
    let occurrence = &color_match.occurrence;
    let Some(token) = color_match.accepted_token() else {
        let reason = if color_match.has_candidate() {
            FailureReason::NoMatch
        } else {
            FailureReason::NoCandidates
        };
        return ReplacementOutcome::failed(occurrence, reason);
    };

    let node = match doc.node(&occurrence.node_id).await {
        Ok(Some(node)) => node,
        Ok(None) => return ReplacementOutcome::failed(occurrence, FailureReason::NodeNotFound),
        Err(err) => return ReplacementOutcome::failed(occurrence, err.into()),
    };
    match is_locked(doc, &node).await {
        Ok(false) => {}
        Ok(true) => return ReplacementOutcome::failed(occurrence, FailureReason::Locked),
        Err(err) => return ReplacementOutcome::failed(occurrence, err.into()),
    }

    // Snapshot right before writing; the ancestor walk may have yielded.
    let node = match doc.node(&occurrence.node_id).await {
        Ok(Some(node)) => node,
        Ok(None) => return ReplacementOutcome::failed(occurrence, FailureReason::NodeNotFound),
        Err(err) => return ReplacementOutcome::failed(occurrence, err.into()),
    };
    let Some(slot) = node.slot(occurrence.kind) else {
        return ReplacementOutcome::failed(occurrence, FailureReason::MissingProperty);
    };
    if let Err(reason) = check_writable(slot, occurrence, token) {
        return ReplacementOutcome::failed(occurrence, reason);
    }
    undo.push(UndoEntry {
        node_id: node.id.clone(),
        kind: occurrence.kind,
        previous_paints: Some(slot.paints.clone()),
        previous_style_id: slot.style_id.clone(),
    });

    match write_token(doc, occurrence, token, slot.style_id.is_some(), config).await {
        Ok(binding_fallback) => ReplacementOutcome::succeeded(occurrence, binding_fallback),
        Err(reason) => ReplacementOutcome::failed(occurrence, reason),
    }
}

/// The paint at the scanned index must still be the same unbound solid on an
/// unstyled property. Earlier writes in the same run may have changed it.
fn check_writable(
    slot: &PaintSlot,
    occurrence: &UnlinkedOccurrence,
    token: &TokenSource,
) -> Result<(), FailureReason> {
    let unchanged = slot.bound_style().is_none()
        && slot
            .paints
            .get(occurrence.paint_index)
            .and_then(Paint::as_solid)
            .is_some_and(|solid| {
                solid.variable_binding().is_none() && solid.color == occurrence.color
            });
    if !unchanged {
        return Err(FailureReason::Changed);
    }
    if !token.is_variable() && slot.paints.len() > 1 {
        return Err(FailureReason::StyleWouldReplacePaints);
    }
    Ok(())
}

/// Locked directly or through any ancestor.
async fn is_locked<H: HostDocument>(doc: &H, node: &SceneNode) -> Result<bool, HostError> {
    if node.locked {
        return Ok(true);
    }
    let mut seen = HashSet::new();
    let mut parent = node.parent.clone();
    while let Some(id) = parent {
        if !seen.insert(id.clone()) {
            break;
        }
        match doc.node(&id).await? {
            Some(ancestor) if ancestor.locked => return Ok(true),
            Some(ancestor) => parent = ancestor.parent,
            None => break,
        }
    }
    Ok(false)
}

/// Write `token` onto the occurrence's property. Returns whether the plain
/// color fallback was used.
async fn write_token<H: HostDocument>(
    doc: &H,
    occurrence: &UnlinkedOccurrence,
    token: &TokenSource,
    styled: bool,
    config: &LinkConfig,
) -> Result<bool, FailureReason> {
    let id = occurrence.node_id.as_str();
    let kind = occurrence.kind;
    if styled {
        doc.set_style_id(id, kind, None).await?;
    }

    match token {
        TokenSource::Variable {
            id: variable_id,
            color,
            ..
        } => {
            doc.apply_variable_binding(id, kind, occurrence.paint_index, variable_id, *color)
                .await?;
            let bound = confirm(doc, occurrence, config, |slot| {
                slot.paints
                    .get(occurrence.paint_index)
                    .and_then(Paint::as_solid)
                    .and_then(SolidPaint::variable_binding)
                    == Some(variable_id.as_str())
            })
            .await?;
            if bound {
                return Ok(false);
            }

            warn!(
                node = %id,
                variable = %variable_id,
                "binding did not persist, writing plain color"
            );
            let node = doc.node(id).await?.ok_or(FailureReason::NodeNotFound)?;
            let slot = node.slot(kind).ok_or(FailureReason::MissingProperty)?;
            let paints = with_plain_color(slot, occurrence.paint_index, *color)?;
            doc.set_paints(id, kind, paints).await?;
            Ok(true)
        }
        TokenSource::Style { id: style_id, .. } => {
            doc.apply_style_binding(id, kind, style_id).await?;
            let applied = confirm(doc, occurrence, config, |slot| {
                slot.bound_style() == Some(style_id.as_str())
            })
            .await?;
            if applied {
                Ok(false)
            } else {
                Err(FailureReason::StyleDidNotApply)
            }
        }
    }
}

/// Re-read the property until `check` holds or the confirmation window ends.
/// The host may apply bindings after the write call returns.
async fn confirm<H: HostDocument>(
    doc: &H,
    occurrence: &UnlinkedOccurrence,
    config: &LinkConfig,
    check: impl Fn(&PaintSlot) -> bool,
) -> Result<bool, HostError> {
    for _ in 0..config.confirm_attempts() {
        tokio::time::sleep(config.confirm_interval).await;
        let confirmed = doc
            .node(&occurrence.node_id)
            .await?
            .as_ref()
            .and_then(|node| node.slot(occurrence.kind))
            .is_some_and(&check);
        if confirmed {
            return Ok(true);
        }
    }
    Ok(false)
}

fn with_plain_color(
    slot: &PaintSlot,
    index: usize,
    color: ColorSample,
) -> Result<Vec<Paint>, FailureReason> {
    let mut paints = slot.paints.clone();
    let paint = paints
        .get_mut(index)
        .ok_or_else(|| FailureReason::WriteFailed(format!("paint index {index} out of range")))?;
    let mut solid = paint
        .as_solid()
        .cloned()
        .unwrap_or_else(|| SolidPaint::new(color));
    solid.color = color;
    solid.bound_variable = None;
    *paint = Paint::Solid(solid);
    Ok(paints)
}

/// Acknowledgement of an undo pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UndoReport {
    pub restored: usize,
    /// Entries whose node or property no longer exists.
    pub skipped: usize,
    pub failed: usize,
}

/// Restore captured snapshots, newest first, so several entries on the same
/// property unwind to the oldest state. Each entry is independent.
pub async fn undo<H: HostDocument>(doc: &H, entries: &[UndoEntry]) -> UndoReport {
    let mut report = UndoReport::default();
    for entry in entries.iter().rev() {
        match undo_one(doc, entry).await {
            Ok(true) => report.restored += 1,
            Ok(false) => report.skipped += 1,
            Err(err) => {
                warn!(node = %entry.node_id, kind = %entry.kind, error = %err, "undo failed");
                report.failed += 1;
            }
        }
    }
    report
}

async fn undo_one<H: HostDocument>(doc: &H, entry: &UndoEntry) -> Result<bool, HostError> {
    let id = entry.node_id.as_str();
    let Some(node) = doc.node(id).await? else {
        debug!(node = %id, "skipping undo for deleted node");
        return Ok(false);
    };
    if node.slot(entry.kind).is_none() {
        return Ok(false);
    }

    match entry.previous_style_id.as_deref().filter(|s| !s.is_empty()) {
        Some(style_id) => doc.set_style_id(id, entry.kind, Some(style_id)).await?,
        None => {
            doc.set_style_id(id, entry.kind, None).await?;
            if let Some(paints) = &entry.previous_paints {
                doc.set_paints(id, entry.kind, paints.clone()).await?;
            }
        }
    }
    Ok(true)
}
