use std::collections::HashSet;

use palette::Lab;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::color::ColorSample;
use crate::error::ResolveError;
use crate::host::{PaintStyle, TokenSources, Variable, VariableValue};

/// Maximum number of alias hops followed when resolving a variable.
pub const MAX_ALIAS_DEPTH: usize = 5;

/// A token source resolved to a concrete color.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenSource {
    Variable {
        id: String,
        name: String,
        collection: String,
        color: ColorSample,
    },
    Style {
        id: String,
        name: String,
        color: ColorSample,
    },
}

impl TokenSource {
    pub fn id(&self) -> &str {
        match self {
            TokenSource::Variable { id, .. } | TokenSource::Style { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TokenSource::Variable { name, .. } | TokenSource::Style { name, .. } => name,
        }
    }

    pub fn color(&self) -> ColorSample {
        match self {
            TokenSource::Variable { color, .. } | TokenSource::Style { color, .. } => *color,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, TokenSource::Variable { .. })
    }
}

/// A resolved token source with its LAB coordinates precomputed.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub source: TokenSource,
    pub lab: Lab,
}

impl Candidate {
    pub fn new(source: TokenSource) -> Self {
        let lab = source.color().to_lab();
        Self { source, lab }
    }
}

/// Immutable snapshot of every usable token source, split by pool.
#[derive(Debug, Clone, Default)]
pub struct ResolvedCatalog {
    pub variables: Vec<Candidate>,
    pub styles: Vec<Candidate>,
    /// Entries left out, with the reason.
    pub excluded: Vec<ResolveError>,
}

impl ResolvedCatalog {
    /// Resolve every variable and style once, in catalog order.
    pub fn resolve(sources: &TokenSources) -> Self {
        let mut catalog = ResolvedCatalog::default();

        for variable in &sources.variables {
            match resolve_variable(sources, variable) {
                Ok(source) => catalog.variables.push(Candidate::new(source)),
                Err(err) => {
                    warn!(variable = %variable.name, error = %err, "excluding variable");
                    catalog.excluded.push(err);
                }
            }
        }

        for style in &sources.styles {
            match resolve_style(style) {
                Ok(source) => catalog.styles.push(Candidate::new(source)),
                Err(err) => {
                    debug!(style = %style.name, error = %err, "excluding style");
                    catalog.excluded.push(err);
                }
            }
        }

        catalog
    }

    pub fn len(&self) -> usize {
        self.variables.len() + self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Follow a variable's default-mode value through its alias chain.
///
/// Bounded by [`MAX_ALIAS_DEPTH`] hops and a visited set, so malformed
/// alias graphs terminate.
pub fn resolve_variable(
    sources: &TokenSources,
    variable: &Variable,
) -> Result<TokenSource, ResolveError> {
    let collection = sources
        .collection(&variable.collection_id)
        .ok_or_else(|| ResolveError::MissingCollection(variable.id.clone()))?;

    let mut visited = HashSet::from([variable.id.as_str()]);
    let mut current = variable;
    let mut mode = collection.default_mode_id.as_str();
    let mut depth = 0;

    loop {
        let value = current
            .values_by_mode
            .get(mode)
            .ok_or_else(|| ResolveError::MissingMode(current.id.clone()))?;

        match value {
            VariableValue::Color(color) => {
                return Ok(TokenSource::Variable {
                    id: variable.id.clone(),
                    name: variable.name.clone(),
                    collection: collection.name.clone(),
                    color: *color,
                });
            }
            VariableValue::Alias(target) => {
                depth += 1;
                if depth > MAX_ALIAS_DEPTH {
                    return Err(ResolveError::AliasDepthExceeded(variable.id.clone()));
                }
                if !visited.insert(target.as_str()) {
                    return Err(ResolveError::AliasCycle(variable.id.clone()));
                }
                current = sources
                    .variable(target)
                    .ok_or_else(|| ResolveError::MissingTarget(target.clone()))?;
                mode = sources
                    .collection(&current.collection_id)
                    .map(|c| c.default_mode_id.as_str())
                    .ok_or_else(|| ResolveError::MissingCollection(current.id.clone()))?;
            }
            _ => return Err(ResolveError::NotAColor(current.id.clone())),
        }
    }
}

/// A style resolves to its first solid paint.
pub fn resolve_style(style: &PaintStyle) -> Result<TokenSource, ResolveError> {
    let solid = style
        .paints
        .iter()
        .find_map(|p| p.as_solid())
        .ok_or_else(|| ResolveError::NoSolidPaint(style.id.clone()))?;
    Ok(TokenSource::Style {
        id: style.id.clone(),
        name: style.name.clone(),
        color: solid.color,
    })
}
