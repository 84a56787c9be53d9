use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cli::Scope;
use crate::color::ColorSample;
use crate::error::HostError;

use super::{
    HostDocument, NodeId, Paint, PaintSlot, PropertyKind, SceneNode, SolidPaint, TokenSources,
};

fn visible_by_default() -> bool {
    true
}

/// On-disk scene: a node tree plus the document's token sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneFile {
    #[serde(default)]
    pub selection: Vec<NodeId>,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(flatten)]
    pub tokens: TokenSources,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub name: String,
    #[serde(default = "visible_by_default")]
    pub visible: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub text: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fills: Option<PaintSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strokes: Option<PaintSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<NodeRecord>>,
}

/// Host misbehavior to reproduce in tests.
#[derive(Debug, Clone, Default)]
pub struct Quirks {
    /// Accept variable bindings but store the plain color only.
    pub drop_variable_bindings: bool,
    /// Accept style assignments without applying them.
    pub ignore_style_writes: bool,
    /// Fail token source enumeration.
    pub fail_catalog: bool,
    /// Sleep this long at every async call.
    pub latency: Option<Duration>,
    /// A variable binding becomes visible only on the Nth read of its node
    /// after the write. Until then the paint carries the plain color.
    pub binding_delay: Option<u32>,
}

#[derive(Debug)]
struct PendingBinding {
    node: NodeId,
    kind: PropertyKind,
    paint_index: usize,
    variable_id: String,
    reads_left: u32,
}

#[derive(Debug, Default)]
struct SceneState {
    nodes: HashMap<NodeId, SceneNode>,
    roots: Vec<NodeId>,
    selection: Vec<NodeId>,
    tokens: TokenSources,
    pending: Vec<PendingBinding>,
}

impl SceneState {
    /// Count one read of `id` and land the bindings that are now due.
    fn settle_bindings(&mut self, id: &str) {
        let mut ready = Vec::new();
        for mut binding in std::mem::take(&mut self.pending) {
            if binding.node == id {
                binding.reads_left = binding.reads_left.saturating_sub(1);
            }
            if binding.reads_left == 0 {
                ready.push(binding);
            } else {
                self.pending.push(binding);
            }
        }
        for binding in ready {
            let paint = self
                .nodes
                .get_mut(&binding.node)
                .and_then(|node| node_slot_mut(node, binding.kind))
                .and_then(|slot| slot.paints.get_mut(binding.paint_index));
            if let Some(Paint::Solid(solid)) = paint {
                solid.bound_variable = Some(binding.variable_id);
            }
        }
    }

    fn cancel_bindings(&mut self, id: &str, kind: PropertyKind) {
        self.pending.retain(|b| !(b.node == id && b.kind == kind));
    }

    /// Selected nodes in order, minus unknown ids, repeats and nodes whose
    /// ancestor is also selected.
    fn selection_roots(&self) -> Vec<NodeId> {
        let selected: HashSet<&str> = self.selection.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        self.selection
            .iter()
            .filter(|id| self.nodes.contains_key(*id))
            .filter(|id| !self.has_selected_ancestor(id, &selected))
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect()
    }

    fn has_selected_ancestor(&self, id: &str, selected: &HashSet<&str>) -> bool {
        let mut parent = self.nodes.get(id).and_then(|n| n.parent.as_deref());
        while let Some(id) = parent {
            if selected.contains(id) {
                return true;
            }
            parent = self.nodes.get(id).and_then(|n| n.parent.as_deref());
        }
        false
    }
}

/// In-process document backing the CLI and the tests.
#[derive(Debug, Default)]
pub struct MemoryDocument {
    state: Mutex<SceneState>,
    quirks: Quirks,
    notifications: Mutex<Vec<String>>,
}

impl MemoryDocument {
    pub fn from_scene(scene: SceneFile) -> Result<Self> {
        let mut state = SceneState {
            selection: scene.selection,
            tokens: scene.tokens,
            ..SceneState::default()
        };
        for record in scene.nodes {
            state.roots.push(record.id.clone());
            insert_record(&mut state.nodes, record, None)?;
        }
        Ok(Self {
            state: Mutex::new(state),
            ..Self::default()
        })
    }

    /// Load a scene from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| {
            if !path.exists() {
                format!("file not found: {}", path.display())
            } else {
                format!("failed to read scene: {}", path.display())
            }
        })?;
        let scene: SceneFile = serde_json::from_str(&text)
            .with_context(|| format!("invalid scene file: {}", path.display()))?;
        Self::from_scene(scene)
    }

    /// Write the current scene as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_scene()?)?;
        std::fs::write(path, json)
            .with_context(|| format!("failed to write scene to {}", path.display()))?;
        Ok(())
    }

    pub fn with_quirks(mut self, quirks: Quirks) -> Self {
        self.quirks = quirks;
        self
    }

    /// Rebuild the nested scene from the current state.
    pub fn to_scene(&self) -> Result<SceneFile> {
        let state = self.lock_state().map_err(anyhow::Error::new)?;
        let nodes = state
            .roots
            .iter()
            .filter_map(|id| export_record(&state.nodes, id))
            .collect();
        Ok(SceneFile {
            selection: state.selection.clone(),
            nodes,
            tokens: state.tokens.clone(),
        })
    }

    /// Independent copy of this document, without quirks or notifications.
    pub fn fork(&self) -> Result<Self> {
        Self::from_scene(self.to_scene()?)
    }

    /// Synchronous snapshot, for inspection outside the async API.
    pub fn get(&self, id: &str) -> Option<SceneNode> {
        self.lock_state().ok()?.nodes.get(id).cloned()
    }

    /// Delete a node and its subtree.
    pub fn remove(&self, id: &str) {
        let Ok(mut state) = self.lock_state() else {
            return;
        };
        let mut pending = vec![id.to_string()];
        while let Some(next) = pending.pop() {
            if let Some(node) = state.nodes.remove(&next) {
                pending.extend(node.children.unwrap_or_default());
                if let Some(parent_id) = node.parent {
                    if let Some(children) = state
                        .nodes
                        .get_mut(&parent_id)
                        .and_then(|parent| parent.children.as_mut())
                    {
                        children.retain(|c| c != &next);
                    }
                }
            }
        }
        state.roots.retain(|r| r != id);
        state.selection.retain(|s| s != id);
    }

    pub fn set_locked(&self, id: &str, locked: bool) {
        if let Ok(mut state) = self.lock_state() {
            if let Some(node) = state.nodes.get_mut(id) {
                node.locked = locked;
            }
        }
    }

    /// Messages passed to [`HostDocument::notify`], oldest first.
    pub fn notifications(&self) -> Vec<String> {
        self.notifications
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, SceneState>, HostError> {
        self.state
            .lock()
            .map_err(|_| HostError::Read("scene state poisoned".into()))
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.quirks.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn insert_record(
    nodes: &mut HashMap<NodeId, SceneNode>,
    record: NodeRecord,
    parent: Option<NodeId>,
) -> Result<()> {
    if nodes.contains_key(&record.id) {
        bail!("duplicate node id: {}", record.id);
    }
    let children = record.children.map(|kids| {
        let ids = kids.iter().map(|k| k.id.clone()).collect::<Vec<_>>();
        (kids, ids)
    });
    let node = SceneNode {
        id: record.id.clone(),
        name: record.name,
        parent,
        visible: record.visible,
        locked: record.locked,
        is_text: record.text,
        fills: record.fills,
        strokes: record.strokes,
        children: children.as_ref().map(|(_, ids)| ids.clone()),
    };
    nodes.insert(record.id.clone(), node);
    if let Some((kids, _)) = children {
        for kid in kids {
            insert_record(nodes, kid, Some(record.id.clone()))?;
        }
    }
    Ok(())
}

fn export_record(nodes: &HashMap<NodeId, SceneNode>, id: &str) -> Option<NodeRecord> {
    let node = nodes.get(id)?;
    Some(NodeRecord {
        id: node.id.clone(),
        name: node.name.clone(),
        visible: node.visible,
        locked: node.locked,
        text: node.is_text,
        fills: node.fills.clone(),
        strokes: node.strokes.clone(),
        children: node.children.as_ref().map(|kids| {
            kids.iter()
                .filter_map(|kid| export_record(nodes, kid))
                .collect()
        }),
    })
}

fn node_slot_mut(node: &mut SceneNode, kind: PropertyKind) -> Option<&mut PaintSlot> {
    match (kind, node.is_text) {
        (PropertyKind::Fill, false) | (PropertyKind::TextFill, true) => node.fills.as_mut(),
        (PropertyKind::Stroke, _) => node.strokes.as_mut(),
        _ => None,
    }
}

fn slot_mut<'a>(
    state: &'a mut SceneState,
    id: &str,
    kind: PropertyKind,
) -> Result<&'a mut PaintSlot, HostError> {
    let node = state
        .nodes
        .get_mut(id)
        .ok_or_else(|| HostError::Write(format!("node {id} not found")))?;
    node_slot_mut(node, kind).ok_or_else(|| HostError::MissingProperty {
        node: id.to_string(),
        property: kind.to_string(),
    })
}

impl HostDocument for MemoryDocument {
    async fn scope_roots(&self, scope: Scope) -> Result<Vec<NodeId>, HostError> {
        self.simulate_latency().await;
        let state = self.lock_state()?;
        let ids = match scope {
            Scope::Page => state.roots.clone(),
            Scope::Selection => state.selection_roots(),
        };
        Ok(ids)
    }

    async fn node(&self, id: &str) -> Result<Option<SceneNode>, HostError> {
        self.simulate_latency().await;
        let mut state = self.lock_state()?;
        state.settle_bindings(id);
        Ok(state.nodes.get(id).cloned())
    }

    async fn token_sources(&self) -> Result<TokenSources, HostError> {
        self.simulate_latency().await;
        if self.quirks.fail_catalog {
            return Err(HostError::Catalog("variables API unavailable".into()));
        }
        Ok(self.lock_state()?.tokens.clone())
    }

    async fn set_paints(
        &self,
        id: &str,
        kind: PropertyKind,
        paints: Vec<Paint>,
    ) -> Result<(), HostError> {
        self.simulate_latency().await;
        let mut state = self.lock_state()?;
        state.cancel_bindings(id, kind);
        let slot = slot_mut(&mut state, id, kind)?;
        slot.paints = paints;
        slot.style_id = None;
        Ok(())
    }

    async fn set_style_id(
        &self,
        id: &str,
        kind: PropertyKind,
        style_id: Option<&str>,
    ) -> Result<(), HostError> {
        self.simulate_latency().await;
        let mut state = self.lock_state()?;
        let style_paints = match style_id {
            Some(style_id) => Some(
                state
                    .tokens
                    .styles
                    .iter()
                    .find(|s| s.id == style_id)
                    .map(|s| s.paints.clone())
                    .ok_or_else(|| HostError::Write(format!("style {style_id} not found")))?,
            ),
            None => None,
        };
        state.cancel_bindings(id, kind);
        let slot = slot_mut(&mut state, id, kind)?;
        if let Some(paints) = style_paints {
            slot.paints = paints;
        }
        slot.style_id = style_id.map(str::to_string);
        Ok(())
    }

    async fn apply_variable_binding(
        &self,
        id: &str,
        kind: PropertyKind,
        paint_index: usize,
        variable_id: &str,
        fallback: ColorSample,
    ) -> Result<(), HostError> {
        self.simulate_latency().await;
        let mut state = self.lock_state()?;
        if state.tokens.variable(variable_id).is_none() {
            return Err(HostError::Write(format!("variable {variable_id} not found")));
        }
        let drop_binding = self.quirks.drop_variable_bindings;
        let delay = self.quirks.binding_delay.filter(|reads| *reads > 0);
        state
            .pending
            .retain(|b| !(b.node == id && b.kind == kind && b.paint_index == paint_index));
        let slot = slot_mut(&mut state, id, kind)?;
        let existing = slot
            .paints
            .get(paint_index)
            .ok_or_else(|| HostError::Write(format!("paint index {paint_index} out of range")))?;
        let mut solid = existing
            .as_solid()
            .cloned()
            .unwrap_or_else(|| SolidPaint::new(fallback));
        solid.color = fallback;
        solid.bound_variable =
            (!drop_binding && delay.is_none()).then(|| variable_id.to_string());
        slot.paints[paint_index] = Paint::Solid(solid);
        slot.style_id = None;
        if let (false, Some(reads_left)) = (drop_binding, delay) {
            state.pending.push(PendingBinding {
                node: id.to_string(),
                kind,
                paint_index,
                variable_id: variable_id.to_string(),
                reads_left,
            });
        }
        Ok(())
    }

    async fn apply_style_binding(
        &self,
        id: &str,
        kind: PropertyKind,
        style_id: &str,
    ) -> Result<(), HostError> {
        if self.quirks.ignore_style_writes {
            self.simulate_latency().await;
            return Ok(());
        }
        self.set_style_id(id, kind, Some(style_id)).await
    }

    fn notify(&self, message: &str) {
        info!(notification = %message, "notify");
        if let Ok(mut notifications) = self.notifications.lock() {
            notifications.push(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"{
        "selection": ["card"],
        "nodes": [
            {
                "id": "frame",
                "name": "Frame",
                "fills": { "paints": [{ "type": "solid", "color": { "r": 1.0, "g": 1.0, "b": 1.0 } }] },
                "children": [
                    {
                        "id": "card",
                        "name": "Card",
                        "fills": { "paints": [{ "type": "solid", "color": { "r": 0.2, "g": 0.4, "b": 0.8 } }] }
                    },
                    { "id": "label", "name": "Label", "text": true, "fills": { "paints": [] } }
                ]
            }
        ],
        "collections": [{ "id": "c1", "name": "Brand", "default_mode_id": "m1" }],
        "variables": [
            {
                "id": "v1",
                "name": "Brand/Blue",
                "collection_id": "c1",
                "values_by_mode": { "m1": { "color": { "r": 0.2, "g": 0.4, "b": 0.8 } } }
            }
        ],
        "styles": [
            {
                "id": "s1",
                "name": "Surface",
                "paints": [{ "type": "solid", "color": { "r": 0.9, "g": 0.9, "b": 0.9 } }]
            }
        ]
    }"#;

    fn document() -> MemoryDocument {
        MemoryDocument::from_scene(serde_json::from_str(SCENE).unwrap()).unwrap()
    }

    #[test]
    fn parent_links_are_built() {
        let doc = document();
        let card = doc.get("card").unwrap();
        assert_eq!(card.parent.as_deref(), Some("frame"));
        let frame = doc.get("frame").unwrap();
        assert_eq!(
            frame.children.unwrap(),
            vec!["card".to_string(), "label".to_string()]
        );
        assert!(doc.get("label").unwrap().is_text);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut scene: SceneFile = serde_json::from_str(SCENE).unwrap();
        let copy = scene.nodes[0].clone();
        scene.nodes.push(copy);
        let err = MemoryDocument::from_scene(scene).unwrap_err().to_string();
        assert!(err.contains("duplicate node id"), "got: {err}");
    }

    #[test]
    fn scene_round_trips_through_export() {
        let scene: SceneFile = serde_json::from_str(SCENE).unwrap();
        let doc = MemoryDocument::from_scene(scene.clone()).unwrap();
        assert_eq!(doc.to_scene().unwrap(), scene);
    }

    #[test]
    fn remove_detaches_subtree() {
        let doc = document();
        doc.remove("frame");
        assert!(doc.get("card").is_none());
        assert!(doc.to_scene().unwrap().nodes.is_empty());
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = MemoryDocument::load(Path::new("/nonexistent/scene.json"))
            .unwrap_err()
            .to_string();
        assert!(err.contains("file not found"), "got: {err}");
    }

    #[tokio::test]
    async fn selection_scope_returns_selected_nodes() {
        let doc = document();
        assert_eq!(doc.scope_roots(Scope::Selection).await.unwrap(), vec!["card"]);
        assert_eq!(doc.scope_roots(Scope::Page).await.unwrap(), vec!["frame"]);
    }

    #[tokio::test]
    async fn selection_drops_nodes_under_selected_ancestors() {
        let mut scene: SceneFile = serde_json::from_str(SCENE).unwrap();
        scene.selection = vec!["card".into(), "frame".into(), "frame".into(), "gone".into()];
        let doc = MemoryDocument::from_scene(scene).unwrap();
        assert_eq!(doc.scope_roots(Scope::Selection).await.unwrap(), vec!["frame"]);
    }

    #[tokio::test]
    async fn delayed_binding_lands_on_a_later_read() {
        let doc = document().with_quirks(Quirks {
            binding_delay: Some(2),
            ..Quirks::default()
        });
        let blue = ColorSample::new(0.2, 0.4, 0.8);
        doc.apply_variable_binding("card", PropertyKind::Fill, 0, "v1", blue)
            .await
            .unwrap();

        let binding = |node: Option<SceneNode>| {
            node.and_then(|n| n.fills)
                .and_then(|f| f.paints[0].as_solid().cloned())
                .and_then(|s| s.bound_variable)
        };
        assert_eq!(binding(doc.node("card").await.unwrap()), None);
        assert_eq!(
            binding(doc.node("card").await.unwrap()).as_deref(),
            Some("v1")
        );
    }

    #[tokio::test]
    async fn overwriting_paints_cancels_a_delayed_binding() {
        let doc = document().with_quirks(Quirks {
            binding_delay: Some(1),
            ..Quirks::default()
        });
        let blue = ColorSample::new(0.2, 0.4, 0.8);
        doc.apply_variable_binding("card", PropertyKind::Fill, 0, "v1", blue)
            .await
            .unwrap();
        doc.set_paints("card", PropertyKind::Fill, vec![Paint::solid(blue)])
            .await
            .unwrap();

        let fills = doc.node("card").await.unwrap().unwrap().fills.unwrap();
        assert_eq!(fills.paints[0].as_solid().unwrap().variable_binding(), None);
    }

    #[tokio::test]
    async fn variable_binding_is_written() {
        let doc = document();
        let blue = ColorSample::new(0.2, 0.4, 0.8);
        doc.apply_variable_binding("card", PropertyKind::Fill, 0, "v1", blue)
            .await
            .unwrap();
        let card = doc.get("card").unwrap();
        let solid = card.fills.unwrap().paints[0].as_solid().cloned().unwrap();
        assert_eq!(solid.variable_binding(), Some("v1"));
    }

    #[tokio::test]
    async fn dropped_binding_quirk_keeps_color_only() {
        let doc = document().with_quirks(Quirks {
            drop_variable_bindings: true,
            ..Quirks::default()
        });
        let blue = ColorSample::new(0.2, 0.4, 0.8);
        doc.apply_variable_binding("card", PropertyKind::Fill, 0, "v1", blue)
            .await
            .unwrap();
        let solid = doc.get("card").unwrap().fills.unwrap().paints[0]
            .as_solid()
            .cloned()
            .unwrap();
        assert_eq!(solid.variable_binding(), None);
        assert_eq!(solid.color, blue);
    }

    #[tokio::test]
    async fn style_assignment_copies_style_paints() {
        let doc = document();
        doc.apply_style_binding("card", PropertyKind::Fill, "s1")
            .await
            .unwrap();
        let fills = doc.get("card").unwrap().fills.unwrap();
        assert_eq!(fills.bound_style(), Some("s1"));
        assert_eq!(
            fills.paints[0].as_solid().unwrap().color,
            ColorSample::new(0.9, 0.9, 0.9)
        );
    }

    #[tokio::test]
    async fn missing_property_is_an_error() {
        let doc = document();
        let err = doc
            .set_paints("card", PropertyKind::Stroke, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::MissingProperty { .. }));
    }

    #[tokio::test]
    async fn catalog_failure_quirk() {
        let doc = document().with_quirks(Quirks {
            fail_catalog: true,
            ..Quirks::default()
        });
        assert!(doc.token_sources().await.is_err());
    }

    #[test]
    fn notifications_are_recorded() {
        let doc = document();
        doc.notify("Linked 1 color");
        assert_eq!(doc.notifications(), vec!["Linked 1 color".to_string()]);
    }
}
