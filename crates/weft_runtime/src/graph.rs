// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph state: child ownership, the load lifecycle, cloning, flattening.
//!
//! A graph is a node that additionally owns child nodes and links, plus
//! referenced models and groups whose shared load/unload lifecycle it
//! manages. Graph execution (the four-case `enter`) lives in `exec`; this
//! module holds the state record and the structural operations: load
//! bookkeeping, deep cloning with identity-map relinking, and flattening.

use crate::link::Link;
use crate::model::{GroupKey, ModelKey};
use crate::node::{Node, NodeBody, NodeKey};
use crate::runtime::Runtime;
use indexmap::IndexMap;
use indexmap::IndexSet;

/// The container state of a graph node.
#[derive(Debug, Default)]
pub struct GraphState {
    /// Child nodes, in authoring order
    pub children: Vec<NodeKey>,
    /// Referenced models (refcounted)
    pub models: Vec<ModelKey>,
    /// Referenced groups (refcounted)
    pub groups: Vec<GroupKey>,
    /// Call nodes currently executing this graph as their instance
    pub active_instances: Vec<NodeKey>,
    /// Arbitrary property bag
    pub properties: serde_json::Map<String, serde_json::Value>,
    /// Opaque per-plugin configuration
    pub plugin_config: serde_json::Value,
    /// Whether loading has completed
    pub loaded: bool,
    /// Whether a load is in flight
    pub loading: bool,
    /// Whether `Engine::start` should enter this graph ("Start On Load")
    pub start_on_load: bool,
    /// Whether a full exit queues this graph for disposal ("Unload On Exit")
    pub unload_on_exit: bool,
    /// Whether the starting engine awaits this graph's load completion
    pub notify_engine_on_load: bool,
    /// Models completed since `load` was called
    pub num_loaded: usize,
    /// Models counted as pending when `load` was called
    pub num_to_load: usize,
    /// Portal names whose entry was deferred while loading
    pub deferred: Vec<String>,
}

impl Runtime {
    /// Load a graph: recompute the to-load count from currently unloaded,
    /// load-eligible models and drive each pending model's load. Completes
    /// synchronously when nothing needs loading.
    pub fn graph_load(&mut self, graph: NodeKey) {
        let Some(state) = self.node_mut(graph).and_then(Node::as_graph_mut) else {
            return;
        };
        state.loading = true;
        state.num_loaded = 0;
        state.num_to_load = 0;
        let models = state.models.clone();

        if models.is_empty() {
            self.graph_load_complete(graph);
            return;
        }

        let pending: Vec<ModelKey> = models
            .iter()
            .copied()
            .filter(|m| self.model(*m).is_some_and(crate::model::Model::needs_loading))
            .collect();

        if let Some(state) = self.node_mut(graph).and_then(Node::as_graph_mut) {
            state.num_to_load = pending.len();
        }

        if pending.is_empty() {
            self.graph_load_complete(graph);
            return;
        }

        for m in &pending {
            if let Some(model) = self.model_mut(*m) {
                if !model.waiters.contains(&graph) {
                    model.waiters.push(graph);
                }
            }
        }
        for m in pending {
            self.load_model(m);
        }
    }

    /// One model owned by `graph` reported load completion: advance the
    /// progress counter, report the integer percentage, and finish the
    /// graph load once the required count is reached.
    pub(crate) fn graph_model_loaded(&mut self, graph: NodeKey, _model: ModelKey) {
        let Some(state) = self.node_mut(graph).and_then(Node::as_graph_mut) else {
            return;
        };
        state.num_loaded += 1;
        let (loaded, to_load) = (state.num_loaded, state.num_to_load);
        let percentage = (loaded * 100 / to_load.max(1)) as u32;

        tracing::debug!(graph = ?graph, loaded, to_load, "graph load progress");
        self.notify_plugins(|p, rt| p.on_load_progress(rt, graph, percentage));
        self.push_event(crate::runtime::RuntimeEvent::LoadProgress { graph, percentage });

        if loaded >= to_load {
            self.graph_load_complete(graph);
        }
    }

    /// All required models completed: initialize each owned model exactly
    /// once, mark the graph loaded, and replay any deferred entries.
    pub(crate) fn graph_load_complete(&mut self, graph: NodeKey) {
        let Some(state) = self.node(graph).and_then(Node::as_graph) else {
            return;
        };
        let models = state.models.clone();
        for m in models {
            let behavior = match self.model_mut(m) {
                Some(model) if !model.initialized => {
                    model.initialized = true;
                    match model.behavior.take() {
                        Some(b) => Some(b),
                        None => {
                            // An empty slot here means either the generic
                            // no-load model (nothing to initialize) or a
                            // behavior currently detached for its own
                            // load/frame hook; the latter still owes an
                            // initialize once the slot is restored.
                            if !model.no_load {
                                model.pending_initialize = true;
                            }
                            None
                        }
                    }
                }
                _ => continue,
            };
            if let Some(mut b) = behavior {
                b.initialize(self, m);
                if let Some(model) = self.model_mut(m) {
                    model.behavior = Some(b);
                }
            }
        }

        let Some(state) = self.node_mut(graph).and_then(Node::as_graph_mut) else {
            return;
        };
        state.loaded = true;
        state.loading = false;
        let notify_engine = std::mem::take(&mut state.notify_engine_on_load);
        let deferred = std::mem::take(&mut state.deferred);

        self.push_event(crate::runtime::RuntimeEvent::GraphLoaded { graph });

        if notify_engine {
            let engine = self.node(graph).map(|n| n.engine);
            if let Some(engine) = engine {
                self.engine_graph_loaded(engine);
            }
        }

        if deferred.is_empty() {
            return;
        }

        // Replay every deferred entry under the live-enter rules.
        self.notify_plugins(|p, rt| p.on_graph_enter(rt, graph));
        self.push_event(crate::runtime::RuntimeEvent::GraphEntered { graph });
        for name in deferred {
            self.replay_entry(graph, &name);
        }
    }

    /// Fire every parameter portal's links, then every input portal's.
    /// Used by `Engine::start` to kick a graph off without a named entry.
    pub fn graph_start(&mut self, graph: NodeKey) {
        let Some(node) = self.node(graph) else { return };
        let params: Vec<usize> = node.portals_of(crate::portal::PortalCategory::Parameter).collect();
        let inputs: Vec<usize> = node.portals_of(crate::portal::PortalCategory::Input).collect();
        for portal in params.into_iter().chain(inputs) {
            self.go(crate::portal::PortalRef { node: graph, portal });
        }
    }

    /// Deep-clone a graph (children, links, flags, model references) into
    /// an independent instance. Link endpoints are rewritten through an
    /// original-key to clone-key identity map, never by list position.
    /// Model and group reference counts gain one per clone.
    ///
    /// Returns `None` if `src` is missing or not a graph.
    pub fn clone_graph(&mut self, src: NodeKey, parent: Option<NodeKey>) -> Option<NodeKey> {
        if self.node(src)?.as_graph().is_none() {
            return None;
        }
        let mut map: IndexMap<NodeKey, NodeKey> = IndexMap::new();
        let root = self.clone_structure(src, parent, &mut map)?;

        // Second pass: clone each link attached anywhere in the copied
        // subtree exactly once, endpoints mapped to the clones.
        let mut seen: IndexSet<crate::link::LinkKey> = IndexSet::new();
        let pairs: Vec<(NodeKey, NodeKey)> = map.iter().map(|(a, b)| (*a, *b)).collect();
        for (src_key, _) in &pairs {
            let link_keys = match self.node(*src_key) {
                Some(n) => n.link_keys(),
                None => continue,
            };
            for lk in link_keys {
                if !seen.insert(lk) {
                    continue;
                }
                let Some(original) = self.link(lk) else { continue };
                let mut cloned = Link::new(original.start, original.end, original.delay);
                cloned.scene_id = original.scene_id;
                cloned.elapsed = original.elapsed;
                if let Some(mapped) = map.get(&cloned.start.node) {
                    cloned.start.node = *mapped;
                }
                if let Some(mapped) = map.get(&cloned.end.node) {
                    cloned.end.node = *mapped;
                }
                let key = cloned.key;
                let (start, end) = (cloned.start, cloned.end);
                self.insert_link(cloned);
                // Attach only to endpoints inside the clone; an endpoint
                // that mapped to nothing still belongs to the original.
                for endpoint in [start, end] {
                    if map.values().any(|v| *v == endpoint.node) {
                        if let Some(node) = self.node_mut(endpoint.node) {
                            if let Some(portal) = node.portals.get_mut(endpoint.portal) {
                                portal.add_link(key);
                            }
                        }
                    }
                }
            }
        }

        Some(root)
    }

    /// Clone one node (and, recursively, graph children and call
    /// instances) without links, recording every original/clone pair.
    fn clone_structure(
        &mut self,
        src: NodeKey,
        parent: Option<NodeKey>,
        map: &mut IndexMap<NodeKey, NodeKey>,
    ) -> Option<NodeKey> {
        let source = self.node(src)?;
        let mut clone = Node::new(source.engine, NodeBody::Leaf(None));
        clone.scene_id = source.scene_id;
        clone.alias = source.alias.clone();
        clone.active = source.active;
        clone.container = parent;
        for portal in &source.portals {
            clone.portals.push(crate::portal::Portal::new(
                portal.name.clone(),
                portal.category,
                portal.value.clone(),
                portal.kind,
            ));
        }

        let new_key = clone.key;
        map.insert(src, new_key);

        match &source.body {
            NodeBody::Leaf(behavior) => {
                clone.body = NodeBody::Leaf(behavior.as_ref().map(|b| b.clone_box()));
                self.insert_node(clone);
            }
            NodeBody::Call(call) => {
                let target = call.target;
                let instance_src = call.instance;
                clone.body = NodeBody::Call(crate::node::CallState {
                    target,
                    instance: None,
                });
                self.insert_node(clone);
                if let Some(inst) = instance_src {
                    let inst_clone = self.clone_structure(inst, None, map);
                    if let Some(node) = self.node_mut(new_key) {
                        if let NodeBody::Call(c) = &mut node.body {
                            c.instance = inst_clone;
                        }
                    }
                }
            }
            NodeBody::Graph(state) => {
                let children = state.children.clone();
                let mut cloned_state = GraphState {
                    properties: state.properties.clone(),
                    plugin_config: state.plugin_config.clone(),
                    models: state.models.clone(),
                    groups: state.groups.clone(),
                    start_on_load: state.start_on_load,
                    unload_on_exit: state.unload_on_exit,
                    ..GraphState::default()
                };
                for m in &cloned_state.models {
                    if let Some(model) = self.model_mut(*m) {
                        model.ref_count += 1;
                    }
                }
                let groups = cloned_state.groups.clone();
                for g in &groups {
                    if let Some(group) = self.group_mut(*g) {
                        group.ref_count += 1;
                    }
                }
                cloned_state.children = Vec::with_capacity(children.len());
                clone.body = NodeBody::Graph(cloned_state);
                self.insert_node(clone);
                for child in children {
                    if let Some(child_clone) = self.clone_structure(child, Some(new_key), map) {
                        if let Some(state) = self.node_mut(new_key).and_then(Node::as_graph_mut) {
                            state.children.push(child_clone);
                        }
                    }
                }
            }
        }

        Some(new_key)
    }

    /// Append this graph and every executable unit reachable from it, in
    /// initialization order: the graph first, then per child either the
    /// flattened child graph, the flattened call instance followed by the
    /// call node itself, or the child directly.
    pub fn flatten(&self, graph: NodeKey, acc: &mut Vec<NodeKey>) {
        acc.push(graph);
        let Some(state) = self.node(graph).and_then(Node::as_graph) else {
            return;
        };
        for child in state.children.clone() {
            let Some(node) = self.node(child) else { continue };
            match &node.body {
                NodeBody::Graph(_) => self.flatten(child, acc),
                NodeBody::Call(call) => {
                    if let Some(instance) = call.instance {
                        self.flatten(instance, acc);
                    }
                    acc.push(child);
                }
                NodeBody::Leaf(_) => acc.push(child),
            }
        }
    }
}
