use palette::Lab;
use serde::Serialize;
use tracing::debug;

use crate::cli::TokenPreference;
use crate::color::delta_e_lab;
use crate::pipeline::catalog::{Candidate, ResolvedCatalog, TokenSource};
use crate::pipeline::scan::UnlinkedOccurrence;

/// Nearest-neighbor lookup over one candidate pool, in CIEDE2000.
pub trait NearestIndex {
    /// Position and distance of the closest candidate. Ties go to the
    /// earliest position.
    fn nearest(&self, lab: Lab) -> Option<(usize, f32)>;
}

/// Brute-force index: one ΔE per candidate.
pub struct LinearScan<'a> {
    candidates: &'a [Candidate],
}

impl<'a> LinearScan<'a> {
    pub fn new(candidates: &'a [Candidate]) -> Self {
        Self { candidates }
    }
}

impl NearestIndex for LinearScan<'_> {
    fn nearest(&self, lab: Lab) -> Option<(usize, f32)> {
        let mut best: Option<(usize, f32)> = None;
        for (i, candidate) in self.candidates.iter().enumerate() {
            let distance = delta_e_lab(lab, candidate.lab);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((i, distance));
            }
        }
        best
    }
}

/// Best candidate for one occurrence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorMatch {
    pub occurrence: UnlinkedOccurrence,
    /// Nearest token found, even when too far to be accepted.
    pub candidate: Option<TokenSource>,
    /// ΔE to `candidate`; infinite when no candidate existed.
    pub distance: f32,
    pub accepted: bool,
}

impl ColorMatch {
    /// The token to apply, present only for accepted matches.
    pub fn accepted_token(&self) -> Option<&TokenSource> {
        self.candidate.as_ref().filter(|_| self.accepted)
    }

    pub fn has_candidate(&self) -> bool {
        self.candidate.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchReport {
    pub matches: Vec<ColorMatch>,
    /// The searched pools were empty.
    pub no_candidates: bool,
}

/// Match every occurrence against the catalog, preserving input order.
///
/// Without a preference both pools are searched and a variable wins ties.
pub fn match_colors(
    occurrences: &[UnlinkedOccurrence],
    catalog: &ResolvedCatalog,
    preference: Option<TokenPreference>,
    tolerance: f32,
) -> MatchReport {
    let variables = (preference != Some(TokenPreference::Styles))
        .then(|| LinearScan::new(&catalog.variables));
    let styles = (preference != Some(TokenPreference::Variables))
        .then(|| LinearScan::new(&catalog.styles));

    let pool_size = variables.as_ref().map_or(0, |_| catalog.variables.len())
        + styles.as_ref().map_or(0, |_| catalog.styles.len());

    let matches = occurrences
        .iter()
        .map(|occurrence| {
            let lab = occurrence.color.to_lab();
            let from_variables = variables
                .as_ref()
                .and_then(|index| index.nearest(lab))
                .map(|(i, d)| (&catalog.variables[i], d));
            let from_styles = styles
                .as_ref()
                .and_then(|index| index.nearest(lab))
                .map(|(i, d)| (&catalog.styles[i], d));

            let best = match (from_variables, from_styles) {
                (Some(v), Some(s)) => Some(if v.1 <= s.1 { v } else { s }),
                (v, s) => v.or(s),
            };

            let color_match = match best {
                Some((candidate, distance)) => ColorMatch {
                    occurrence: occurrence.clone(),
                    candidate: Some(candidate.source.clone()),
                    distance,
                    accepted: distance <= tolerance,
                },
                None => ColorMatch {
                    occurrence: occurrence.clone(),
                    candidate: None,
                    distance: f32::INFINITY,
                    accepted: false,
                },
            };
            debug!(
                node = %occurrence.node_id,
                color = %occurrence.color,
                token = color_match.candidate.as_ref().map(|t| t.name()),
                distance = color_match.distance,
                accepted = color_match.accepted,
                "matched"
            );
            color_match
        })
        .collect();

    MatchReport {
        matches,
        no_candidates: pool_size == 0,
    }
}
