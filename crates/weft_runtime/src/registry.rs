// SPDX-License-Identifier: MIT OR Apache-2.0
//! Kind registries: closed, explicitly-populated constructor tables.
//!
//! Scene entries carry a string kind tag. The loader consults these
//! registries by exact tag; user kinds must be registered before
//! [`open`] is called. The structural kinds needed for instancing are
//! seeded at construction: `"node"` (a plain unit), `"model-holder"`
//! (copies its sole parameter into its sole product, resolving model and
//! group references), and `"subgraph-call"` (invokes a privately cloned
//! graph).
//!
//! [`open`]: crate::runtime::Runtime::open

use crate::model::ModelBehavior;
use crate::node::{CallState, NodeBehavior, NodeBody, NodeKey};
use crate::portal::PortalCategory;
use crate::runtime::Runtime;
use crate::scene::{ModelDescription, NodeDescription};
use crate::value::ValueKind;
use indexmap::IndexMap;

/// Kind tag of the plain leaf node.
pub const KIND_NODE: &str = "node";
/// Kind tag of the model-holder node.
pub const KIND_MODEL_HOLDER: &str = "model-holder";
/// Kind tag of the subgraph-call node.
pub const KIND_SUBGRAPH_CALL: &str = "subgraph-call";

/// Constructs the body of a node from its scene entry.
pub trait NodeConstructor {
    /// Build the node body. The loader fills id, alias and ports itself.
    fn construct(&self, entry: &NodeDescription) -> NodeBody;
}

impl<F> NodeConstructor for F
where
    F: Fn(&NodeDescription) -> NodeBody,
{
    fn construct(&self, entry: &NodeDescription) -> NodeBody {
        self(entry)
    }
}

/// Registry of node kinds, consulted by exact kind tag.
pub struct NodeRegistry {
    ctors: IndexMap<String, Box<dyn NodeConstructor>>,
}

impl NodeRegistry {
    /// Create a registry seeded with the structural kinds.
    pub fn with_builtin_kinds() -> Self {
        let mut registry = Self {
            ctors: IndexMap::new(),
        };
        registry.register(KIND_NODE, |_: &NodeDescription| NodeBody::Leaf(None));
        registry.register(KIND_MODEL_HOLDER, |_: &NodeDescription| {
            NodeBody::Leaf(Some(Box::new(ModelHolder)))
        });
        registry.register(KIND_SUBGRAPH_CALL, |entry: &NodeDescription| {
            NodeBody::Call(CallState {
                target: entry.target,
                instance: None,
            })
        });
        registry
    }

    /// Register a kind. A later registration for the same tag replaces the
    /// earlier one.
    pub fn register(&mut self, kind: impl Into<String>, ctor: impl NodeConstructor + 'static) {
        self.ctors.insert(kind.into(), Box::new(ctor));
    }

    /// Construct a node body for an entry, or `None` if the kind tag is
    /// not registered.
    pub fn construct(&self, entry: &NodeDescription) -> Option<NodeBody> {
        self.ctors.get(&entry.kind).map(|c| c.construct(entry))
    }

    /// Registered kind tags, in registration order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.ctors.keys().map(String::as_str)
    }
}

/// Constructs the behavior of a model from its scene description.
pub trait ModelConstructor {
    /// Build the model behavior.
    fn construct(&self, desc: &ModelDescription) -> Box<dyn ModelBehavior>;
}

impl<F> ModelConstructor for F
where
    F: Fn(&ModelDescription) -> Box<dyn ModelBehavior>,
{
    fn construct(&self, desc: &ModelDescription) -> Box<dyn ModelBehavior> {
        self(desc)
    }
}

/// Registry of model kinds, consulted by exact kind tag.
///
/// A kind with no registration falls back to the generic no-load model,
/// never to an error.
#[derive(Default)]
pub struct ModelRegistry {
    ctors: IndexMap<String, Box<dyn ModelConstructor>>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind. A later registration for the same tag replaces the
    /// earlier one.
    pub fn register(&mut self, kind: impl Into<String>, ctor: impl ModelConstructor + 'static) {
        self.ctors.insert(kind.into(), Box::new(ctor));
    }

    /// Construct a model behavior, or `None` for the generic fallback.
    pub fn construct(&self, desc: &ModelDescription) -> Option<Box<dyn ModelBehavior>> {
        self.ctors.get(&desc.kind).map(|c| c.construct(desc))
    }
}

/// The model-holder behavior: mirrors its sole parameter into its sole
/// product, resolving model/group scene ids to live references when the
/// declared kind calls for it.
pub(crate) struct ModelHolder;

impl ModelHolder {
    fn refresh(rt: &mut Runtime, node: NodeKey) {
        let Some(n) = rt.node(node) else { return };
        let engine = n.engine;
        let param = n
            .portals
            .iter()
            .find(|p| p.category == PortalCategory::Parameter)
            .map(|p| (p.kind, p.value.clone()));
        let Some((kind, value)) = param else { return };
        let resolved = match kind {
            ValueKind::Model | ValueKind::Group => rt.resolve_ref_value(engine, kind, &value),
            _ => value,
        };
        if let Some(n) = rt.node_mut(node) {
            if let Some(product) = n
                .portals
                .iter_mut()
                .find(|p| p.category == PortalCategory::Product)
            {
                product.value = resolved;
            }
        }
    }
}

impl NodeBehavior for ModelHolder {
    fn on_parameter_filled(&mut self, rt: &mut Runtime, node: NodeKey, _portal: usize) {
        Self::refresh(rt, node);
    }

    fn on_initialize(&mut self, rt: &mut Runtime, node: NodeKey) {
        Self::refresh(rt, node);
    }

    fn clone_box(&self) -> Box<dyn NodeBehavior> {
        Box::new(ModelHolder)
    }
}
