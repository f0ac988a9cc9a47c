// SPDX-License-Identifier: MIT OR Apache-2.0
//! Models and model groups: shared, refcounted external data.
//!
//! Models are loaded or derived data that graphs interact with. They are
//! shared across graphs by reference count and destroyed only when the
//! count reaches zero. A group is an ordered collection of models and
//! other groups.

use crate::engine::EngineKey;
use crate::node::NodeKey;
use crate::runtime::Runtime;
use crate::scene::SceneId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique runtime identifier for a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey(pub Uuid);

impl ModelKey {
    /// Create a new random model key
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ModelKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique runtime identifier for a model group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupKey(pub Uuid);

impl GroupKey {
    /// Create a new random group key
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Extension hook for registered model kinds.
///
/// Hooks are invoked with the behavior detached from its arena slot, so
/// they may freely call back into the runtime.
pub trait ModelBehavior {
    /// Begin loading. The behavior must eventually cause
    /// [`Runtime::complete_model_load`] to be called, either synchronously
    /// from here or later (for instance from `on_frame`).
    fn load(&mut self, rt: &mut Runtime, model: ModelKey);

    /// Called once, after the owning graph's whole load completes.
    fn initialize(&mut self, _rt: &mut Runtime, _model: ModelKey) {}

    /// Called every tick while the owning engine is alive.
    fn on_frame(&mut self, _rt: &mut Runtime, _model: ModelKey, _time: f64, _delta: f64) {}

    /// Called when the model is disposed.
    fn dispose(&mut self) {}
}

/// A shared model.
pub struct Model {
    /// Runtime key
    pub key: ModelKey,
    /// Id authored in the scene
    pub scene_id: Option<SceneId>,
    /// Display name
    pub name: String,
    /// Kind tag
    pub kind: String,
    /// Arbitrary property bag
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Whether loading has completed
    pub loaded: bool,
    /// Whether `initialize` has run
    pub initialized: bool,
    /// Whether `initialize` is owed but the behavior was detached from
    /// its slot when the owning graph's load completed (a synchronous
    /// completion from inside `load` or `on_frame`); it runs as soon as
    /// the slot is restored
    pub pending_initialize: bool,
    /// Whether this model skips loading entirely (the generic fallback)
    pub no_load: bool,
    /// Number of owning graph/group relationships
    pub ref_count: u32,
    /// Graphs awaiting this model's load completion
    pub waiters: Vec<NodeKey>,
    /// Kind-specific behavior; `None` for the generic no-load model
    pub behavior: Option<Box<dyn ModelBehavior>>,
    /// The engine this model belongs to
    pub engine: EngineKey,
}

impl Model {
    /// Create a new unloaded model.
    pub fn new(engine: EngineKey, behavior: Option<Box<dyn ModelBehavior>>) -> Self {
        let no_load = behavior.is_none();
        Self {
            key: ModelKey::new(),
            scene_id: None,
            name: String::new(),
            kind: String::new(),
            properties: serde_json::Map::new(),
            loaded: false,
            initialized: false,
            pending_initialize: false,
            no_load,
            ref_count: 0,
            waiters: Vec::new(),
            behavior,
            engine,
        }
    }

    /// Whether a graph load must wait for this model.
    pub fn needs_loading(&self) -> bool {
        !self.loaded && !self.no_load
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("loaded", &self.loaded)
            .field("ref_count", &self.ref_count)
            .finish_non_exhaustive()
    }
}

/// A member of a model group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupMember {
    /// A model
    Model(ModelKey),
    /// A nested group
    Group(GroupKey),
}

/// An ordered collection of models and groups, itself refcounted.
#[derive(Debug)]
pub struct ModelGroup {
    /// Runtime key
    pub key: GroupKey,
    /// Id authored in the scene
    pub scene_id: Option<SceneId>,
    /// Display name
    pub name: String,
    /// Members, in authoring order
    pub members: Vec<GroupMember>,
    /// Number of owning graph relationships
    pub ref_count: u32,
    /// The engine this group belongs to
    pub engine: EngineKey,
}

impl ModelGroup {
    /// Create a new empty group.
    pub fn new(engine: EngineKey) -> Self {
        Self {
            key: GroupKey::new(),
            scene_id: None,
            name: String::new(),
            members: Vec::new(),
            ref_count: 0,
            engine,
        }
    }
}
