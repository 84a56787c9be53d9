use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::color::ColorSample;
use crate::error::HostError;
use crate::host::{HostDocument, NodeId, PropertyKind, SceneNode};

/// A raw solid color found on one property of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlinkedOccurrence {
    pub node_id: NodeId,
    pub node_name: String,
    /// Names from the scan root down to this node, joined with " / ".
    pub node_path: String,
    pub kind: PropertyKind,
    /// Position of the paint inside the property's paint list.
    pub paint_index: usize,
    pub color: ColorSample,
}

/// Walk the subtrees under `roots` and collect every unlinked solid color.
///
/// Depth-first pre-order; invisible nodes are skipped together with their
/// subtree. Nodes that vanish mid-walk are skipped. A node reachable from
/// several roots is visited once.
pub async fn scan<H: HostDocument>(
    doc: &H,
    roots: &[NodeId],
) -> Result<Vec<UnlinkedOccurrence>, HostError> {
    let mut occurrences = Vec::new();
    let mut stack: Vec<(NodeId, Option<String>)> =
        roots.iter().rev().map(|id| (id.clone(), None)).collect();
    let mut visited = HashSet::new();

    while let Some((id, prefix)) = stack.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        let Some(node) = doc.node(&id).await? else {
            debug!(node = %id, "node disappeared during scan");
            continue;
        };
        if !node.visible {
            continue;
        }
        let path = match prefix {
            Some(prefix) => format!("{prefix} / {}", node.name),
            None => node.name.clone(),
        };
        occurrences.extend(occurrences_for(&node, &path));
        if let Some(children) = &node.children {
            stack.extend(
                children
                    .iter()
                    .rev()
                    .map(|child| (child.clone(), Some(path.clone()))),
            );
        }
    }

    debug!(count = occurrences.len(), "scan finished");
    Ok(occurrences)
}

/// Unlinked colors on a single node.
///
/// Styled properties are linked as a whole. Within an unstyled property only
/// solid paints without a variable binding count.
pub fn occurrences_for(node: &SceneNode, path: &str) -> Vec<UnlinkedOccurrence> {
    let mut found = Vec::new();
    for kind in node.color_properties() {
        let Some(slot) = node.slot(kind) else {
            continue;
        };
        if slot.bound_style().is_some() {
            continue;
        }
        for (index, paint) in slot.paints.iter().enumerate() {
            let Some(solid) = paint.as_solid() else {
                continue;
            };
            if solid.variable_binding().is_some() {
                continue;
            }
            found.push(UnlinkedOccurrence {
                node_id: node.id.clone(),
                node_name: node.name.clone(),
                node_path: path.to_string(),
                kind,
                paint_index: index,
                color: solid.color,
            });
        }
    }
    found
}

/// Occurrences sharing one hex value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColorGroup {
    pub hex: String,
    pub color: ColorSample,
    pub count: usize,
    pub node_paths: Vec<String>,
}

/// Group occurrences by hex, most frequent first, ties by hex.
pub fn inventory(occurrences: &[UnlinkedOccurrence]) -> Vec<ColorGroup> {
    let mut groups: BTreeMap<String, ColorGroup> = BTreeMap::new();
    for occurrence in occurrences {
        let hex = occurrence.color.to_hex();
        let group = groups.entry(hex.clone()).or_insert_with(|| ColorGroup {
            hex,
            color: occurrence.color,
            count: 0,
            node_paths: Vec::new(),
        });
        group.count += 1;
        if !group.node_paths.contains(&occurrence.node_path) {
            group.node_paths.push(occurrence.node_path.clone());
        }
    }

    let mut groups: Vec<ColorGroup> = groups.into_values().collect();
    groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.hex.cmp(&b.hex)));
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::{MemoryDocument, NodeRecord, SceneFile};
    use crate::host::{GradientStop, Paint, PaintSlot, SolidPaint};

    fn blue() -> ColorSample {
        ColorSample::new(0.2, 0.4, 0.8)
    }

    fn record(id: &str, fills: Vec<Paint>) -> NodeRecord {
        NodeRecord {
            id: id.into(),
            name: id.to_uppercase(),
            visible: true,
            locked: false,
            text: false,
            fills: Some(PaintSlot::new(fills)),
            strokes: None,
            children: None,
        }
    }

    fn bound(color: ColorSample, variable: &str) -> Paint {
        let mut solid = SolidPaint::new(color);
        solid.bound_variable = Some(variable.into());
        Paint::Solid(solid)
    }

    fn doc(nodes: Vec<NodeRecord>) -> MemoryDocument {
        MemoryDocument::from_scene(SceneFile {
            nodes,
            ..SceneFile::default()
        })
        .unwrap()
    }

    #[test]
    fn skips_bound_and_non_solid_paints() {
        let node = SceneNode {
            id: "n".into(),
            name: "N".into(),
            parent: None,
            visible: true,
            locked: false,
            is_text: false,
            fills: Some(PaintSlot::new(vec![
                Paint::Gradient {
                    stops: vec![GradientStop {
                        position: 0.0,
                        color: blue(),
                    }],
                },
                bound(blue(), "v1"),
                Paint::Image {
                    image_ref: "abc".into(),
                },
                Paint::solid(blue()),
            ])),
            strokes: Some(PaintSlot {
                paints: vec![Paint::solid(blue())],
                style_id: Some("s1".into()),
            }),
            children: None,
        };

        let found = occurrences_for(&node, "N");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].paint_index, 3);
        assert_eq!(found[0].kind, PropertyKind::Fill);
    }

    #[test]
    fn empty_binding_counts_as_unlinked() {
        let mut node = SceneNode {
            id: "n".into(),
            name: "N".into(),
            parent: None,
            visible: true,
            locked: false,
            is_text: true,
            fills: Some(PaintSlot::new(vec![bound(blue(), "")])),
            strokes: None,
            children: None,
        };
        let found = occurrences_for(&node, "N");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, PropertyKind::TextFill);

        node.fills.as_mut().unwrap().style_id = Some(String::new());
        assert_eq!(occurrences_for(&node, "N").len(), 1);
    }

    #[tokio::test]
    async fn traversal_is_pre_order_and_skips_hidden_subtrees() {
        let mut root = record("root", vec![Paint::solid(blue())]);
        let mut a = record("a", vec![Paint::solid(blue())]);
        a.children = Some(vec![record("a1", vec![Paint::solid(blue())])]);
        let mut hidden = record("hidden", vec![Paint::solid(blue())]);
        hidden.visible = false;
        hidden.children = Some(vec![record("h1", vec![Paint::solid(blue())])]);
        let b = record("b", vec![Paint::solid(blue())]);
        root.children = Some(vec![a, hidden, b]);
        let doc = doc(vec![root]);

        let found = scan(&doc, &["root".to_string()]).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|o| o.node_id.as_str()).collect();
        assert_eq!(ids, vec!["root", "a", "a1", "b"]);
        assert_eq!(found[2].node_path, "ROOT / A / A1");
    }

    #[tokio::test]
    async fn rescanning_is_idempotent() {
        let mut root = record("root", vec![Paint::solid(blue()), bound(blue(), "v")]);
        root.children = Some(vec![record("leaf", vec![Paint::solid(blue())])]);
        let doc = doc(vec![root]);
        let roots = vec!["root".to_string()];

        let first = scan(&doc, &roots).await.unwrap();
        let second = scan(&doc, &roots).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn overlapping_roots_visit_each_node_once() {
        let mut root = record("root", vec![Paint::solid(blue())]);
        root.children = Some(vec![record("leaf", vec![Paint::solid(blue())])]);
        let doc = doc(vec![root]);
        let roots = vec!["leaf".to_string(), "root".to_string(), "leaf".to_string()];

        let found = scan(&doc, &roots).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|o| o.node_id.as_str()).collect();
        assert_eq!(ids, vec!["leaf", "root"]);
    }

    #[tokio::test]
    async fn missing_roots_are_skipped() {
        let doc = doc(vec![record("root", vec![Paint::solid(blue())])]);
        let found = scan(&doc, &["gone".to_string(), "root".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn inventory_groups_by_hex() {
        let make = |path: &str, color: ColorSample| UnlinkedOccurrence {
            node_id: path.into(),
            node_name: path.into(),
            node_path: path.into(),
            kind: PropertyKind::Fill,
            paint_index: 0,
            color,
        };
        let red = ColorSample::from_rgb8(255, 0, 0);
        let occurrences = vec![
            make("A", red),
            make("B", blue()),
            make("C", blue()),
            make("C", blue()),
        ];

        let groups = inventory(&occurrences);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].hex, "#3366cc");
        assert_eq!(groups[0].count, 3);
        assert_eq!(groups[0].node_paths, vec!["B", "C"]);
        assert_eq!(groups[1].hex, "#ff0000");
    }
}
