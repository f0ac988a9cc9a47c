// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph execution runtime for the Weft scene format.
//!
//! A scene is a serialized visual program: graphs of nodes wired by
//! optionally delayed links, plus the shared models the graphs act on.
//! This crate loads scene descriptions into engines and executes them
//! under a cooperative, externally ticked scheduler.
//!
//! ## Architecture
//!
//! Everything lives in one [`Runtime`] context:
//! - Arena storage for nodes, links, models, groups and engines, with all
//!   cross-references expressed as typed keys
//! - A closed kind registry. User node/model kinds are registered before
//!   [`Runtime::open`]; unknown kinds fail the load
//! - An active-item set advanced one tick at a time by [`Runtime::frame`]
//! - An end-of-tick disposal queue and refcounted model lifetimes

pub mod value;
pub mod portal;
pub mod link;
pub mod node;
pub mod graph;
pub mod model;
pub mod engine;
pub mod scene;
pub mod registry;
pub mod plugin;
pub mod loader;
pub mod runtime;

mod exec;

pub use engine::{Engine, EngineKey};
pub use link::{Link, LinkKey};
pub use loader::LoadError;
pub use model::{GroupKey, Model, ModelBehavior, ModelGroup, ModelKey};
pub use node::{Node, NodeBehavior, NodeBody, NodeKey};
pub use plugin::Plugin;
pub use portal::{Portal, PortalCategory, PortalRef};
pub use registry::{ModelRegistry, NodeRegistry};
pub use runtime::{ActiveItem, Runtime, RuntimeEvent, TickSource};
pub use scene::{SceneDescription, SceneId};
pub use value::{Value, ValueKind};
