// SPDX-License-Identifier: MIT OR Apache-2.0
//! Engines: one running scene apiece.
//!
//! An engine owns the top-level graphs, models and groups produced by one
//! [`open`] call. Engines are registered in the runtime context and share
//! its scheduler, registries and plugin list.
//!
//! [`open`]: crate::runtime::Runtime::open

use crate::model::{GroupKey, ModelKey};
use crate::node::NodeKey;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique runtime identifier for an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngineKey(pub Uuid);

impl EngineKey {
    /// Create a new random engine key
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EngineKey {
    fn default() -> Self {
        Self::new()
    }
}

/// One loaded scene: its graphs, models and groups.
#[derive(Debug)]
pub struct Engine {
    /// Runtime key
    pub key: EngineKey,
    /// Top-level graph nodes
    pub graphs: Vec<NodeKey>,
    /// Shared models
    pub models: Vec<ModelKey>,
    /// Model groups
    pub groups: Vec<GroupKey>,
    /// Graphs still loading during a [`start`] sequence
    ///
    /// [`start`]: crate::runtime::Runtime::start
    pub pending_start_loads: usize,
}

impl Engine {
    /// Create a new empty engine.
    pub fn new() -> Self {
        Self {
            key: EngineKey::new(),
            graphs: Vec::new(),
            models: Vec::new(),
            groups: Vec::new(),
            pending_start_loads: 0,
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
