// SPDX-License-Identifier: MIT OR Apache-2.0
//! The plugin notification contract.

use crate::node::NodeKey;
use crate::runtime::Runtime;

/// Observer hooks invoked by the scheduler and the graph lifecycle.
///
/// Notifications only: return values are never consumed, and plugins see
/// the runtime immutably. Within one tick, `on_frame` fires before any
/// active item is advanced.
pub trait Plugin {
    /// A tick is being processed.
    fn on_frame(&mut self, _rt: &Runtime, _time: f64, _delta: f64) {}

    /// A graph was entered through an input portal (or started).
    fn on_graph_enter(&mut self, _rt: &Runtime, _graph: NodeKey) {}

    /// A loading graph made progress, as an integer percentage.
    fn on_load_progress(&mut self, _rt: &Runtime, _graph: NodeKey, _percentage: u32) {}

    /// A graph received an exit signal on an output portal.
    fn on_graph_exit(&mut self, _rt: &Runtime, _graph: NodeKey, _portal: &str, _still_active: bool) {}

    /// The runtime is shutting down.
    fn dispose(&mut self) {}
}
