// SPDX-License-Identifier: MIT OR Apache-2.0
//! The serialized scene schema.
//!
//! A scene is a whole authored program: models, model groups and graphs.
//! These types are the loader's input and round-trip through RON.

use crate::portal::PortalCategory;
use crate::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};

/// An id authored by the editing tool that produced the scene. Unique per
/// item category within one scene; distinct from runtime keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SceneId(pub u32);

impl std::fmt::Display for SceneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Default for SceneId {
    fn default() -> Self {
        Self(0)
    }
}

/// A whole serialized scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    /// Shared models
    #[serde(default)]
    pub models: Vec<ModelDescription>,
    /// Model groups
    #[serde(default)]
    pub groups: Vec<GroupDescription>,
    /// Top-level graphs
    #[serde(default)]
    pub graphs: Vec<GraphDescription>,
}

/// A shared model declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    /// Scene id
    pub id: SceneId,
    /// Display name
    pub name: String,
    /// Kind tag, consulted against the model registry
    pub kind: String,
    /// Arbitrary property bag
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// A model group declaration: an ordered collection of models and groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupDescription {
    /// Scene id
    pub id: SceneId,
    /// Display name
    pub name: String,
    /// Member ids; may forward-reference groups declared later
    #[serde(default)]
    pub member_ids: Vec<SceneId>,
}

/// A graph declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDescription {
    /// Scene id
    pub id: SceneId,
    /// Display name
    pub name: String,
    /// Arbitrary property bag; `"Start On Load"` and `"Unload On Exit"`
    /// booleans configure the graph's lifecycle
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Opaque per-plugin configuration
    #[serde(default)]
    pub plugin_config: serde_json::Value,
    /// Host ports and child nodes, in authoring order
    #[serde(default)]
    pub entries: Vec<EntryDescription>,
    /// Links between this graph's children (or its own boundary ports)
    #[serde(default)]
    pub links: Vec<LinkDescription>,
    /// Models this graph references
    #[serde(default)]
    pub model_ids: Vec<SceneId>,
    /// Groups this graph references
    #[serde(default)]
    pub group_ids: Vec<SceneId>,
}

/// One entry of a graph: either a port on the graph itself, or a child node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntryDescription {
    /// A port declared on the graph's own boundary
    Port(PortDescription),
    /// A child node
    Node(NodeDescription),
}

/// A port declaration, on a graph boundary or on a child node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDescription {
    /// Category
    pub category: PortalCategory,
    /// Name, unique within the owning node
    pub name: String,
    /// Default value
    #[serde(default)]
    pub value: Value,
    /// Declared value kind
    #[serde(default)]
    pub kind: ValueKind,
}

/// A child node declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    /// Scene id, unique within the scene
    pub id: SceneId,
    /// Display alias
    #[serde(default)]
    pub alias: String,
    /// Kind tag, consulted against the node registry
    pub kind: String,
    /// Target graph id, for the subgraph-call kind
    #[serde(default)]
    pub target: Option<SceneId>,
    /// Ports to attach
    #[serde(default)]
    pub ports: Vec<PortDescription>,
}

/// A link declaration. Endpoints are resolved by node scene id within the
/// declaring graph, falling back to the graph's own boundary ports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDescription {
    /// Scene id
    pub id: SceneId,
    /// Tick delay; zero fires synchronously
    #[serde(default)]
    pub delay: u32,
    /// Start node scene id
    pub start_node: SceneId,
    /// Start portal name
    pub start_port: String,
    /// End node scene id
    pub end_node: SceneId,
    /// End portal name
    pub end_port: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_ron_round_trip() {
        let scene = SceneDescription {
            models: vec![ModelDescription {
                id: SceneId(1),
                name: "tileset".into(),
                kind: "generic".into(),
                properties: serde_json::Map::new(),
            }],
            groups: vec![GroupDescription {
                id: SceneId(2),
                name: "world".into(),
                member_ids: vec![SceneId(1)],
            }],
            graphs: vec![GraphDescription {
                id: SceneId(3),
                name: "main".into(),
                entries: vec![
                    EntryDescription::Port(PortDescription {
                        category: PortalCategory::Input,
                        name: "start".into(),
                        value: Value::Null,
                        kind: ValueKind::Any,
                    }),
                    EntryDescription::Node(NodeDescription {
                        id: SceneId(4),
                        alias: "holder".into(),
                        kind: "model-holder".into(),
                        target: None,
                        ports: vec![],
                    }),
                ],
                links: vec![LinkDescription {
                    id: SceneId(5),
                    delay: 2,
                    start_node: SceneId(3),
                    start_port: "start".into(),
                    end_node: SceneId(4),
                    end_port: "in".into(),
                }],
                model_ids: vec![SceneId(1)],
                ..GraphDescription::default()
            }],
        };

        let text = ron::ser::to_string_pretty(&scene, ron::ser::PrettyConfig::default()).unwrap();
        let back: SceneDescription = ron::from_str(&text).unwrap();
        assert_eq!(back, scene);
    }

    #[test]
    fn test_missing_fields_default() {
        let graph: GraphDescription = ron::from_str(r#"(id: 7, name: "g")"#).unwrap();
        assert!(graph.entries.is_empty());
        assert!(graph.links.is_empty());
        assert!(graph.properties.is_empty());
    }
}
