pub mod memory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cli::Scope;
use crate::color::ColorSample;
use crate::error::HostError;

pub type NodeId = String;

/// Which color-bearing property of a node an occurrence lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyKind {
    Fill,
    Stroke,
    TextFill,
}

impl std::fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PropertyKind::Fill => "fill",
            PropertyKind::Stroke => "stroke",
            PropertyKind::TextFill => "text-fill",
        })
    }
}

fn full_opacity() -> f32 {
    1.0
}

fn visible_by_default() -> bool {
    true
}

/// A single solid color paint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolidPaint {
    pub color: ColorSample,
    #[serde(default = "full_opacity")]
    pub opacity: f32,
    #[serde(default = "visible_by_default")]
    pub visible: bool,
    /// Variable bound to this paint's color channel, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_variable: Option<String>,
}

impl SolidPaint {
    pub fn new(color: ColorSample) -> Self {
        Self {
            color,
            opacity: 1.0,
            visible: true,
            bound_variable: None,
        }
    }

    /// The bound variable id, treating an empty id as unbound.
    pub fn variable_binding(&self) -> Option<&str> {
        self.bound_variable.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    pub position: f32,
    pub color: ColorSample,
}

/// One entry of a node's paint list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Paint {
    Solid(SolidPaint),
    Gradient { stops: Vec<GradientStop> },
    Image { image_ref: String },
}

impl Paint {
    pub fn solid(color: ColorSample) -> Self {
        Paint::Solid(SolidPaint::new(color))
    }

    pub fn as_solid(&self) -> Option<&SolidPaint> {
        match self {
            Paint::Solid(solid) => Some(solid),
            _ => None,
        }
    }
}

/// A paint list plus the style that drives it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaintSlot {
    #[serde(default)]
    pub paints: Vec<Paint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_id: Option<String>,
}

impl PaintSlot {
    pub fn new(paints: Vec<Paint>) -> Self {
        Self {
            paints,
            style_id: None,
        }
    }

    /// The bound style id, treating an empty id as unbound.
    pub fn bound_style(&self) -> Option<&str> {
        self.style_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// Snapshot of one scene node.
///
/// Capabilities are explicit optional fields: a node without `strokes` cannot
/// carry a stroke, a node without `children` is a leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    pub id: NodeId,
    pub name: String,
    pub parent: Option<NodeId>,
    pub visible: bool,
    pub locked: bool,
    pub is_text: bool,
    pub fills: Option<PaintSlot>,
    pub strokes: Option<PaintSlot>,
    pub children: Option<Vec<NodeId>>,
}

impl SceneNode {
    /// The slot backing `kind` on this node. Text nodes expose their fills
    /// as [`PropertyKind::TextFill`] only.
    pub fn slot(&self, kind: PropertyKind) -> Option<&PaintSlot> {
        match (kind, self.is_text) {
            (PropertyKind::Fill, false) | (PropertyKind::TextFill, true) => self.fills.as_ref(),
            (PropertyKind::Stroke, _) => self.strokes.as_ref(),
            _ => None,
        }
    }

    /// Color properties this node carries, in scan order.
    pub fn color_properties(&self) -> Vec<PropertyKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.fills.is_some() {
            kinds.push(if self.is_text {
                PropertyKind::TextFill
            } else {
                PropertyKind::Fill
            });
        }
        if self.strokes.is_some() {
            kinds.push(PropertyKind::Stroke);
        }
        kinds
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableCollection {
    pub id: String,
    pub name: String,
    pub default_mode_id: String,
}

/// A variable's value in one mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableValue {
    Color(ColorSample),
    Alias(String),
    Float(f32),
    Text(String),
    Boolean(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,
    pub name: String,
    pub collection_id: String,
    #[serde(default)]
    pub values_by_mode: BTreeMap<String, VariableValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaintStyle {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub paints: Vec<Paint>,
}

/// Raw token sources as enumerated by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenSources {
    #[serde(default)]
    pub collections: Vec<VariableCollection>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub styles: Vec<PaintStyle>,
}

impl TokenSources {
    pub fn collection(&self, id: &str) -> Option<&VariableCollection> {
        self.collections.iter().find(|c| c.id == id)
    }

    pub fn variable(&self, id: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty() && self.styles.is_empty()
    }
}

/// The host document API.
///
/// Every method but [`notify`](HostDocument::notify) may suspend. Values
/// crossing this boundary are snapshots; callers re-resolve a node by id
/// right before using it because the document may change between calls.
#[allow(async_fn_in_trait)]
pub trait HostDocument {
    /// Top-level nodes for a scope: the current selection or the page.
    async fn scope_roots(&self, scope: Scope) -> Result<Vec<NodeId>, HostError>;

    /// Resolve a node by id. `Ok(None)` means it no longer exists.
    async fn node(&self, id: &str) -> Result<Option<SceneNode>, HostError>;

    /// Enumerate local variables, collections and paint styles.
    async fn token_sources(&self) -> Result<TokenSources, HostError>;

    /// Replace a property's paint list.
    async fn set_paints(
        &self,
        id: &str,
        kind: PropertyKind,
        paints: Vec<Paint>,
    ) -> Result<(), HostError>;

    /// Set or clear a property's style id.
    async fn set_style_id(
        &self,
        id: &str,
        kind: PropertyKind,
        style_id: Option<&str>,
    ) -> Result<(), HostError>;

    /// Write a solid paint at `paint_index` carrying `fallback` and a binding
    /// to `variable_id`.
    async fn apply_variable_binding(
        &self,
        id: &str,
        kind: PropertyKind,
        paint_index: usize,
        variable_id: &str,
        fallback: ColorSample,
    ) -> Result<(), HostError>;

    /// Drive a property from a paint style.
    async fn apply_style_binding(
        &self,
        id: &str,
        kind: PropertyKind,
        style_id: &str,
    ) -> Result<(), HostError>;

    /// Show a short status message to the user.
    fn notify(&self, message: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(is_text: bool) -> SceneNode {
        SceneNode {
            id: "1:1".into(),
            name: "Node".into(),
            parent: None,
            visible: true,
            locked: false,
            is_text,
            fills: Some(PaintSlot::default()),
            strokes: Some(PaintSlot::default()),
            children: None,
        }
    }

    #[test]
    fn text_nodes_expose_fills_as_text_fill() {
        let text = node(true);
        assert_eq!(
            text.color_properties(),
            vec![PropertyKind::TextFill, PropertyKind::Stroke]
        );
        assert!(text.slot(PropertyKind::Fill).is_none());
        assert!(text.slot(PropertyKind::TextFill).is_some());
    }

    #[test]
    fn shapes_expose_fill_and_stroke() {
        let shape = node(false);
        assert_eq!(
            shape.color_properties(),
            vec![PropertyKind::Fill, PropertyKind::Stroke]
        );
        assert!(shape.slot(PropertyKind::TextFill).is_none());
    }

    #[test]
    fn empty_ids_count_as_unbound() {
        let mut solid = SolidPaint::new(ColorSample::new(0.0, 0.0, 0.0));
        solid.bound_variable = Some(String::new());
        assert_eq!(solid.variable_binding(), None);

        let slot = PaintSlot {
            paints: vec![],
            style_id: Some(String::new()),
        };
        assert_eq!(slot.bound_style(), None);
    }

    #[test]
    fn paint_json_shape() {
        let json = r#"{"type":"solid","color":{"r":0.2,"g":0.4,"b":0.8}}"#;
        let paint: Paint = serde_json::from_str(json).unwrap();
        let solid = paint.as_solid().unwrap();
        assert_eq!(solid.opacity, 1.0);
        assert!(solid.visible);
        assert_eq!(solid.color.to_hex(), "#3366cc");

        let alias: VariableValue = serde_json::from_str(r#"{"alias":"v1"}"#).unwrap();
        assert_eq!(alias, VariableValue::Alias("v1".into()));
    }

    #[test]
    fn property_kind_display() {
        assert_eq!(PropertyKind::TextFill.to_string(), "text-fill");
        assert_eq!(
            serde_json::to_string(&PropertyKind::TextFill).unwrap(),
            "\"text-fill\""
        );
    }
}
