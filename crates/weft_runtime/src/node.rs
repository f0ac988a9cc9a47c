// SPDX-License-Identifier: MIT OR Apache-2.0
//! Nodes: stateful executable units owning a set of portals.
//!
//! A node is the base of the type family {node, graph, subgraph call,
//! registered custom kinds}. Execution enters a node through an input
//! portal, and the node stays active until it exits through an output.

use crate::engine::EngineKey;
use crate::graph::GraphState;
use crate::link::LinkKey;
use crate::model::ModelKey;
use crate::portal::{Portal, PortalCategory};
use crate::runtime::Runtime;
use crate::scene::SceneId;
use crate::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique runtime identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey(pub Uuid);

impl NodeKey {
    /// Create a new random node key
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension hook for registered node kinds.
///
/// Hooks are invoked with the behavior detached from its arena slot, so
/// they may freely call back into the runtime. A hook must not assume the
/// node still exists; runtime accessors return `Option` for that reason.
pub trait NodeBehavior {
    /// Called after an external or propagated write to a parameter/product.
    fn on_parameter_filled(&mut self, _rt: &mut Runtime, _node: NodeKey, _portal: usize) {}

    /// Called once after the whole scene has been built and linked.
    fn on_initialize(&mut self, _rt: &mut Runtime, _node: NodeKey) {}

    /// Called every tick while the node is in the active set.
    fn on_frame(&mut self, _rt: &mut Runtime, _node: NodeKey, _time: f64, _delta: f64) {}

    /// Clone this behavior for a cloned node.
    fn clone_box(&self) -> Box<dyn NodeBehavior>;
}

/// The private state of a subgraph-call node.
///
/// Each call site owns an independent clone of its target graph, so
/// per-call state never leaks between call sites.
#[derive(Debug)]
pub struct CallState {
    /// Scene id of the target graph
    pub target: Option<SceneId>,
    /// The exclusively owned clone, assigned during scene expansion
    pub instance: Option<NodeKey>,
}

/// What a node is, beyond its portals.
pub enum NodeBody {
    /// A plain executable unit, optionally carrying a registered behavior
    Leaf(Option<Box<dyn NodeBehavior>>),
    /// A container of child nodes and links with its own load lifecycle
    Graph(GraphState),
    /// A call into a privately cloned graph instance
    Call(CallState),
}

impl std::fmt::Debug for NodeBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf(b) => write!(f, "Leaf(behavior: {})", b.is_some()),
            Self::Graph(_) => write!(f, "Graph"),
            Self::Call(c) => write!(f, "Call(target: {:?})", c.target),
        }
    }
}

/// A node instance in the runtime's arena.
#[derive(Debug)]
pub struct Node {
    /// Runtime key
    pub key: NodeKey,
    /// Id authored in the scene, if the node came from one
    pub scene_id: Option<SceneId>,
    /// Display alias
    pub alias: String,
    /// All portals, in attachment order
    pub portals: Vec<Portal>,
    /// Whether the node is in the active set
    pub active: bool,
    /// The graph this node is a child of (a back-pointer, not ownership)
    pub container: Option<NodeKey>,
    /// The engine this node belongs to
    pub engine: EngineKey,
    /// Node kind state
    pub body: NodeBody,
}

impl Node {
    /// Create a new node.
    pub fn new(engine: EngineKey, body: NodeBody) -> Self {
        Self {
            key: NodeKey::new(),
            scene_id: None,
            alias: String::new(),
            portals: Vec::new(),
            active: false,
            container: None,
            engine,
            body,
        }
    }

    /// Append a portal; returns its (stable) index.
    pub fn add_portal(
        &mut self,
        category: PortalCategory,
        name: impl Into<String>,
        value: Value,
        kind: ValueKind,
    ) -> usize {
        self.portals.push(Portal::new(name, category, value, kind));
        self.portals.len() - 1
    }

    /// Find a portal index by name.
    pub fn portal_index(&self, name: &str) -> Option<usize> {
        self.portals.iter().position(|p| p.name == name)
    }

    /// Find a portal index by category and name. Portal names are only
    /// unique within a category, so flow lookups must not match a
    /// same-named portal of another category.
    pub fn portal_index_of(&self, category: PortalCategory, name: &str) -> Option<usize> {
        self.portals
            .iter()
            .position(|p| p.category == category && p.name == name)
    }

    /// Get a portal by name.
    pub fn portal(&self, name: &str) -> Option<&Portal> {
        self.portals.iter().find(|p| p.name == name)
    }

    /// Get a mutable portal by name.
    pub fn portal_mut(&mut self, name: &str) -> Option<&mut Portal> {
        self.portals.iter_mut().find(|p| p.name == name)
    }

    /// Iterate portal indexes of one category.
    pub fn portals_of(&self, category: PortalCategory) -> impl Iterator<Item = usize> + '_ {
        self.portals
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.category == category)
            .map(|(i, _)| i)
    }

    /// A parameter's value by name.
    pub fn get_param(&self, name: &str) -> Option<&Value> {
        self.portals
            .iter()
            .find(|p| p.category == PortalCategory::Parameter && p.name == name)
            .map(|p| &p.value)
    }

    /// Set a product's value by name. Returns false if no such product.
    pub fn set_product(&mut self, name: &str, value: Value) -> bool {
        match self
            .portals
            .iter_mut()
            .find(|p| p.category == PortalCategory::Product && p.name == name)
        {
            Some(p) => {
                p.value = value;
                true
            }
            None => false,
        }
    }

    /// All links attached to any portal of this node.
    pub fn link_keys(&self) -> Vec<LinkKey> {
        let mut keys = Vec::new();
        for portal in &self.portals {
            for link in &portal.links {
                keys.push(*link);
            }
        }
        keys
    }

    /// The graph state, if this node is a graph.
    pub fn as_graph(&self) -> Option<&GraphState> {
        match &self.body {
            NodeBody::Graph(g) => Some(g),
            _ => None,
        }
    }

    /// The mutable graph state, if this node is a graph.
    pub fn as_graph_mut(&mut self) -> Option<&mut GraphState> {
        match &mut self.body {
            NodeBody::Graph(g) => Some(g),
            _ => None,
        }
    }

    /// The call state, if this node is a subgraph call.
    pub fn as_call(&self) -> Option<&CallState> {
        match &self.body {
            NodeBody::Call(c) => Some(c),
            _ => None,
        }
    }

    /// Whether this node is a graph.
    pub fn is_graph(&self) -> bool {
        matches!(self.body, NodeBody::Graph(_))
    }

    /// The first model referenced by a resolved parameter, if any. Useful
    /// for behaviors that hold a single model parameter.
    pub fn first_model_param(&self) -> Option<ModelKey> {
        self.portals
            .iter()
            .filter(|p| p.category == PortalCategory::Parameter)
            .find_map(|p| p.value.as_model())
    }
}
