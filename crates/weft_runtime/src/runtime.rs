// SPDX-License-Identifier: MIT OR Apache-2.0
//! The runtime context: arenas, scheduler, lifecycle.
//!
//! One `Runtime` replaces the source format's process-wide singletons: it
//! owns the engine registry, the item arenas, the active-item set, the
//! end-of-tick disposal queue, the kind registries and the plugin list.
//! Everything is single-threaded and cooperative; the only suspension
//! points across ticks are delayed links and in-flight graph loads.

use crate::engine::{Engine, EngineKey};
use crate::link::{Link, LinkKey};
use crate::model::{GroupKey, GroupMember, Model, ModelGroup, ModelKey};
use crate::node::{Node, NodeBody, NodeKey};
use crate::plugin::Plugin;
use crate::registry::{ModelRegistry, NodeRegistry};
use crate::scene::SceneId;
use crate::value::{Value, ValueKind};
use indexmap::IndexMap;
use std::collections::VecDeque;

/// The injected "request next tick" capability.
///
/// The runtime never schedules itself; it asks this source for the next
/// tick and the embedder eventually calls [`Runtime::frame`].
pub trait TickSource {
    /// Ask for one more tick.
    fn request_tick(&mut self);
}

/// A tick source that does nothing. Tests and simple embedders drive
/// `frame` directly.
#[derive(Debug, Default)]
pub struct NullTicker;

impl TickSource for NullTicker {
    fn request_tick(&mut self) {}
}

/// An item requiring per-tick attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveItem {
    /// An active node
    Node(NodeKey),
    /// A delayed link counting down
    Link(LinkKey),
}

/// An item queued for end-of-tick disposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisposeItem {
    Node(NodeKey),
    Model(ModelKey),
    Group(GroupKey),
}

/// A lifecycle notification, drained by the embedder.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// A graph finished loading
    GraphLoaded {
        /// The graph
        graph: NodeKey,
    },
    /// A loading graph made progress
    LoadProgress {
        /// The graph
        graph: NodeKey,
        /// Integer percentage of its pending models now loaded
        percentage: u32,
    },
    /// A graph was entered (or started)
    GraphEntered {
        /// The graph
        graph: NodeKey,
    },
    /// A graph received an exit signal
    GraphExited {
        /// The graph
        graph: NodeKey,
        /// The output portal that signalled the exit
        portal: String,
        /// Whether any child was still active
        still_active: bool,
    },
    /// A model finished loading
    ModelLoaded {
        /// The model
        model: ModelKey,
    },
    /// An engine was disposed
    EngineDisposed {
        /// The engine
        engine: EngineKey,
    },
}

/// The process-wide runtime context.
pub struct Runtime {
    engines: IndexMap<EngineKey, Engine>,
    nodes: IndexMap<NodeKey, Node>,
    links: IndexMap<LinkKey, Link>,
    models: IndexMap<ModelKey, Model>,
    groups: IndexMap<GroupKey, ModelGroup>,
    active: Vec<ActiveItem>,
    disposables: Vec<DisposeItem>,
    /// Node kind registry, consulted by the loader
    pub node_kinds: NodeRegistry,
    /// Model kind registry, consulted by the loader
    pub model_kinds: ModelRegistry,
    plugins: Vec<Box<dyn Plugin>>,
    events: VecDeque<RuntimeEvent>,
    last_time: f64,
    ticker: Box<dyn TickSource>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Create a runtime with a no-op tick source.
    pub fn new() -> Self {
        Self::with_tick_source(Box::new(NullTicker))
    }

    /// Create a runtime driven by the given tick source.
    pub fn with_tick_source(ticker: Box<dyn TickSource>) -> Self {
        Self {
            engines: IndexMap::new(),
            nodes: IndexMap::new(),
            links: IndexMap::new(),
            models: IndexMap::new(),
            groups: IndexMap::new(),
            active: Vec::new(),
            disposables: Vec::new(),
            node_kinds: NodeRegistry::with_builtin_kinds(),
            model_kinds: ModelRegistry::new(),
            plugins: Vec::new(),
            events: VecDeque::new(),
            last_time: 0.0,
            ticker,
        }
    }

    /// Register a plugin. Plugins are notified in registration order.
    pub fn register_plugin(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Pop the oldest pending lifecycle event.
    pub fn poll_event(&mut self) -> Option<RuntimeEvent> {
        self.events.pop_front()
    }

    // ---- arena accessors -------------------------------------------------

    /// A node by key.
    pub fn node(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(&key)
    }

    /// A mutable node by key.
    pub fn node_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(&key)
    }

    /// A link by key.
    pub fn link(&self, key: LinkKey) -> Option<&Link> {
        self.links.get(&key)
    }

    /// A mutable link by key.
    pub(crate) fn link_mut(&mut self, key: LinkKey) -> Option<&mut Link> {
        self.links.get_mut(&key)
    }

    /// A model by key.
    pub fn model(&self, key: ModelKey) -> Option<&Model> {
        self.models.get(&key)
    }

    /// A mutable model by key.
    pub fn model_mut(&mut self, key: ModelKey) -> Option<&mut Model> {
        self.models.get_mut(&key)
    }

    /// A group by key.
    pub fn group(&self, key: GroupKey) -> Option<&ModelGroup> {
        self.groups.get(&key)
    }

    /// A mutable group by key.
    pub fn group_mut(&mut self, key: GroupKey) -> Option<&mut ModelGroup> {
        self.groups.get_mut(&key)
    }

    /// An engine by key.
    pub fn engine(&self, key: EngineKey) -> Option<&Engine> {
        self.engines.get(&key)
    }

    pub(crate) fn engine_mut(&mut self, key: EngineKey) -> Option<&mut Engine> {
        self.engines.get_mut(&key)
    }

    /// Number of live engines.
    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    pub(crate) fn insert_node(&mut self, node: Node) -> NodeKey {
        let key = node.key;
        self.nodes.insert(key, node);
        key
    }

    pub(crate) fn insert_link(&mut self, link: Link) -> LinkKey {
        let key = link.key;
        self.links.insert(key, link);
        key
    }

    pub(crate) fn insert_model(&mut self, model: Model) -> ModelKey {
        let key = model.key;
        self.models.insert(key, model);
        key
    }

    pub(crate) fn insert_group(&mut self, group: ModelGroup) -> GroupKey {
        let key = group.key;
        self.groups.insert(key, group);
        key
    }

    pub(crate) fn insert_engine(&mut self, engine: Engine) -> EngineKey {
        let key = engine.key;
        self.engines.insert(key, engine);
        key
    }

    // ---- active set ------------------------------------------------------

    /// Whether an item is in the active set.
    pub fn is_active(&self, item: ActiveItem) -> bool {
        self.active.contains(&item)
    }

    pub(crate) fn activate(&mut self, item: ActiveItem) {
        if !self.active.contains(&item) {
            self.active.push(item);
        }
    }

    pub(crate) fn deactivate(&mut self, item: ActiveItem) {
        self.active.retain(|i| *i != item);
    }

    pub(crate) fn queue_disposal(&mut self, item: DisposeItem) {
        if !self.disposables.contains(&item) {
            self.disposables.push(item);
        }
    }

    // ---- plugins & events ------------------------------------------------

    /// Notify every plugin. The plugin list is detached for the duration
    /// of the pass, so callbacks see the runtime immutably; any plugin
    /// registered during a pass joins the next one.
    pub(crate) fn notify_plugins<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut dyn Plugin, &Runtime),
    {
        let mut plugins = std::mem::take(&mut self.plugins);
        for plugin in &mut plugins {
            f(plugin.as_mut(), self);
        }
        let mut late = std::mem::replace(&mut self.plugins, plugins);
        self.plugins.append(&mut late);
    }

    pub(crate) fn push_event(&mut self, event: RuntimeEvent) {
        self.events.push_back(event);
    }

    // ---- lookups ---------------------------------------------------------

    /// Find a model by its scene id within one engine. Linear; a missing
    /// id is `None`, never an error. Callers holding a runtime key look
    /// it up directly with [`Runtime::model`] instead.
    pub fn get_model(&self, engine: EngineKey, id: SceneId) -> Option<ModelKey> {
        let engine = self.engines.get(&engine)?;
        engine
            .models
            .iter()
            .copied()
            .find(|m| self.models.get(m).and_then(|m| m.scene_id) == Some(id))
    }

    /// Find a group by its scene id within one engine; runtime keys go
    /// through [`Runtime::group`].
    pub fn get_group(&self, engine: EngineKey, id: SceneId) -> Option<GroupKey> {
        let engine = self.engines.get(&engine)?;
        engine
            .groups
            .iter()
            .copied()
            .find(|g| self.groups.get(g).and_then(|g| g.scene_id) == Some(id))
    }

    /// Resolve a scene-authored model/group id value into a live
    /// reference, according to the declared kind. Values that are already
    /// resolved pass through; dangling ids resolve to a `None` reference.
    pub(crate) fn resolve_ref_value(
        &self,
        engine: EngineKey,
        kind: ValueKind,
        value: &Value,
    ) -> Value {
        match kind {
            ValueKind::Model => match value {
                Value::Model(m) => Value::Model(*m),
                Value::Int(id) => Value::Model(self.get_model(engine, SceneId(*id as u32))),
                _ => Value::Model(None),
            },
            ValueKind::Group => match value {
                Value::Group(g) => Value::Group(*g),
                Value::Int(id) => Value::Group(self.get_group(engine, SceneId(*id as u32))),
                _ => Value::Group(None),
            },
            _ => value.clone(),
        }
    }

    /// Read a portal's current value by node and portal name.
    pub fn portal_value(&self, node: NodeKey, name: &str) -> Option<&Value> {
        self.node(node)?.portal(name).map(|p| &p.value)
    }

    /// Write a portal's value by node and portal name, invoking the
    /// node's `parameter_filled` hook as an external write does.
    pub fn set_portal_value(&mut self, node: NodeKey, name: &str, value: Value) {
        let Some(index) = self.node(node).and_then(|n| n.portal_index(name)) else {
            return;
        };
        if let Some(n) = self.node_mut(node) {
            n.portals[index].value = value;
        }
        self.parameter_filled(node, index);
    }

    // ---- model loading ---------------------------------------------------

    /// Drive one model's load. No-load models complete synchronously.
    pub fn load_model(&mut self, model: ModelKey) {
        let Some(m) = self.model_mut(model) else { return };
        m.loaded = false;
        if m.no_load {
            self.complete_model_load(model);
            return;
        }
        let behavior = m.behavior.take();
        if let Some(mut b) = behavior {
            b.load(self, model);
            if let Some(m) = self.model_mut(model) {
                m.behavior = Some(b);
            }
            self.run_pending_initialize(model);
        }
    }

    /// Run a model's initialize hook if a load completed while the
    /// behavior was detached from its arena slot.
    pub(crate) fn run_pending_initialize(&mut self, model: ModelKey) {
        let behavior = match self.model_mut(model) {
            Some(m) if m.pending_initialize => {
                m.pending_initialize = false;
                m.behavior.take()
            }
            _ => return,
        };
        if let Some(mut b) = behavior {
            b.initialize(self, model);
            if let Some(m) = self.model_mut(model) {
                m.behavior = Some(b);
            }
        }
    }

    /// Mark a model loaded and notify every graph waiting on it. Called
    /// by model behaviors (or the embedder, for externally driven loads).
    pub fn complete_model_load(&mut self, model: ModelKey) {
        let Some(m) = self.model_mut(model) else { return };
        m.loaded = true;
        let waiters = std::mem::take(&mut m.waiters);
        self.push_event(RuntimeEvent::ModelLoaded { model });
        for graph in waiters {
            self.graph_model_loaded(graph, model);
        }
    }

    // ---- engine lifecycle ------------------------------------------------

    /// Begin executing an engine: request the first tick, then enter every
    /// "start on load" graph, loading first where needed.
    pub fn start(&mut self, engine: EngineKey) {
        self.ticker.request_tick();
        let Some(e) = self.engines.get(&engine) else { return };
        let graphs = e.graphs.clone();

        let eligible = |rt: &Runtime, g: NodeKey| {
            rt.node(g)
                .and_then(Node::as_graph)
                .is_some_and(|s| s.start_on_load)
        };
        let to_load: Vec<NodeKey> = graphs
            .iter()
            .copied()
            .filter(|g| {
                eligible(self, *g)
                    && !self
                        .node(*g)
                        .and_then(Node::as_graph)
                        .is_some_and(|s| s.loaded)
            })
            .collect();

        if to_load.is_empty() {
            for g in graphs {
                if eligible(self, g) {
                    self.graph_start(g);
                    self.notify_plugins(|p, rt| p.on_graph_enter(rt, g));
                    self.push_event(RuntimeEvent::GraphEntered { graph: g });
                }
            }
            return;
        }

        if let Some(e) = self.engines.get_mut(&engine) {
            e.pending_start_loads = to_load.len();
        }
        for g in to_load {
            if let Some(state) = self.node_mut(g).and_then(Node::as_graph_mut) {
                state.notify_engine_on_load = true;
            }
            self.graph_load(g);
        }
    }

    /// One awaited graph reported loaded during a `start` sequence.
    pub(crate) fn engine_graph_loaded(&mut self, engine: EngineKey) {
        let Some(e) = self.engines.get_mut(&engine) else { return };
        if e.pending_start_loads == 0 {
            return;
        }
        e.pending_start_loads -= 1;
        if e.pending_start_loads > 0 {
            return;
        }

        let graphs = e.graphs.clone();
        for g in graphs {
            let starts = self
                .node(g)
                .and_then(Node::as_graph)
                .is_some_and(|s| s.start_on_load);
            if starts {
                self.graph_start(g);
                self.notify_plugins(|p, rt| p.on_graph_enter(rt, g));
                self.push_event(RuntimeEvent::GraphEntered { graph: g });
            }
        }
    }

    // ---- the tick --------------------------------------------------------

    /// Process one tick.
    ///
    /// Plugin notifications fire first; then every item captured by this
    /// tick's snapshot of the active set is advanced (items activated
    /// during the tick wait for the next one); then every engine's models
    /// get their per-tick hook; then the disposal queue drains. An engine
    /// left with zero graphs is disposed. If any engine remains, the next
    /// tick is requested from the tick source.
    pub fn frame(&mut self, time: f64) {
        let delta = time - self.last_time;
        self.last_time = time;

        let snapshot = self.active.clone();
        self.notify_plugins(|p, rt| p.on_frame(rt, time, delta));

        for item in snapshot {
            if !self.active.contains(&item) {
                continue;
            }
            match item {
                ActiveItem::Link(lk) => {
                    let Some(link) = self.links.get_mut(&lk) else {
                        self.deactivate(item);
                        continue;
                    };
                    link.elapsed += 1;
                    if link.elapsed >= link.delay {
                        link.elapsed = 0;
                        let (start, end) = (link.start, link.end);
                        self.deactivate(item);
                        self.fire_link(start, end);
                    }
                }
                ActiveItem::Node(nk) => {
                    if !self.nodes.contains_key(&nk) {
                        self.deactivate(item);
                        continue;
                    }
                    self.node_frame(nk, time, delta);
                }
            }
        }

        // Per-tick model hooks, across every registered engine.
        let model_keys: Vec<ModelKey> = self
            .engines
            .values()
            .flat_map(|e| e.models.iter().copied())
            .collect();
        for m in model_keys {
            let behavior = self.model_mut(m).and_then(|model| model.behavior.take());
            if let Some(mut b) = behavior {
                b.on_frame(self, m, time, delta);
                if let Some(model) = self.model_mut(m) {
                    model.behavior = Some(b);
                }
                self.run_pending_initialize(m);
            }
        }

        // Drain disposals queued during this tick.
        let disposables = std::mem::take(&mut self.disposables);
        for item in disposables {
            match item {
                DisposeItem::Node(k) => self.dispose_node(k),
                DisposeItem::Model(k) => self.dispose_model(k),
                DisposeItem::Group(k) => self.dispose_group(k),
            }
        }

        // Engines with no graphs left are done.
        let dead: Vec<EngineKey> = self
            .engines
            .values()
            .filter(|e| e.graphs.is_empty())
            .map(|e| e.key)
            .collect();
        for engine in dead {
            self.dispose_engine(engine);
        }

        if !self.engines.is_empty() {
            self.ticker.request_tick();
        }
    }

    /// Per-tick hook of an active node.
    fn node_frame(&mut self, node: NodeKey, time: f64, delta: f64) {
        let behavior = match self.node_mut(node) {
            Some(n) => match &mut n.body {
                NodeBody::Leaf(slot) => slot.take(),
                _ => None,
            },
            None => None,
        };
        if let Some(mut b) = behavior {
            b.on_frame(self, node, time, delta);
            if let Some(n) = self.node_mut(node) {
                if let NodeBody::Leaf(slot) = &mut n.body {
                    *slot = Some(b);
                }
            }
        }
    }

    // ---- disposal --------------------------------------------------------

    /// Dispose a node: its portals' live links, its children (for a
    /// graph), its instance (for a call), and every active-set membership.
    pub fn dispose_node(&mut self, key: NodeKey) {
        let Some(node) = self.nodes.swap_remove(&key) else { return };
        self.deactivate(ActiveItem::Node(key));

        for portal in &node.portals {
            for lk in &portal.links {
                let Some(link) = self.links.swap_remove(lk) else { continue };
                self.deactivate(ActiveItem::Link(*lk));
                for endpoint in [link.start, link.end] {
                    if endpoint.node == key {
                        continue;
                    }
                    if let Some(other) = self.nodes.get_mut(&endpoint.node) {
                        if let Some(p) = other.portals.get_mut(endpoint.portal) {
                            p.remove_link(*lk);
                        }
                    }
                }
            }
        }

        match node.body {
            NodeBody::Graph(state) => {
                for child in state.children {
                    self.dispose_node(child);
                }
                for m in state.models {
                    if let Some(model) = self.model_mut(m) {
                        model.ref_count -= 1;
                        if model.ref_count == 0 {
                            self.dispose_model(m);
                        }
                    }
                }
                for g in state.groups {
                    if let Some(group) = self.group_mut(g) {
                        group.ref_count -= 1;
                        if group.ref_count == 0 {
                            self.dispose_group(g);
                        }
                    }
                }
            }
            NodeBody::Call(call) => {
                if let Some(instance) = call.instance {
                    self.dispose_node(instance);
                }
            }
            NodeBody::Leaf(_) => {}
        }

        if let Some(engine) = self.engines.get_mut(&node.engine) {
            engine.graphs.retain(|g| *g != key);
        }
    }

    /// Dispose a model. Must only be reached with a zero reference count.
    pub fn dispose_model(&mut self, key: ModelKey) {
        let Some(mut model) = self.models.swap_remove(&key) else { return };
        if let Some(b) = &mut model.behavior {
            b.dispose();
        }
        if let Some(engine) = self.engines.get_mut(&model.engine) {
            engine.models.retain(|m| *m != key);
        }
    }

    /// Dispose a group, releasing one reference on each member.
    pub fn dispose_group(&mut self, key: GroupKey) {
        let Some(group) = self.groups.swap_remove(&key) else { return };
        for member in group.members {
            match member {
                GroupMember::Model(m) => {
                    if let Some(model) = self.model_mut(m) {
                        model.ref_count -= 1;
                        if model.ref_count == 0 {
                            self.dispose_model(m);
                        }
                    }
                }
                GroupMember::Group(g) => {
                    if let Some(nested) = self.group_mut(g) {
                        nested.ref_count -= 1;
                        if nested.ref_count == 0 {
                            self.dispose_group(g);
                        }
                    }
                }
            }
        }
        if let Some(engine) = self.engines.get_mut(&group.engine) {
            engine.groups.retain(|g| *g != key);
        }
    }

    /// Dispose an engine and everything it owns.
    pub fn dispose_engine(&mut self, key: EngineKey) {
        let Some(engine) = self.engines.swap_remove(&key) else { return };
        tracing::info!(engine = ?key, "disposing engine");
        for graph in engine.graphs {
            self.dispose_node(graph);
        }
        for model in engine.models {
            self.dispose_model(model);
        }
        for group in engine.groups {
            self.dispose_group(group);
        }
        self.push_event(RuntimeEvent::EngineDisposed { engine: key });
    }

    /// Shut the runtime down: dispose every engine, then every plugin.
    pub fn shutdown(&mut self) {
        let engines: Vec<EngineKey> = self.engines.keys().copied().collect();
        for engine in engines {
            self.dispose_engine(engine);
        }
        for plugin in &mut self.plugins {
            plugin.dispose();
        }
        self.plugins.clear();
    }
}
