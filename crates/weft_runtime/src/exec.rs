// SPDX-License-Identifier: MIT OR Apache-2.0
//! The execution protocol: entering, exiting and value propagation.
//!
//! A node entered through an input stays active until it exits through an
//! output. Zero-delay links fire synchronously within the triggering call
//! chain; delayed links count down in the active set. Errors from a
//! misbehaving node are deliberately not caught here.

use crate::node::{Node, NodeBody, NodeKey};
use crate::portal::{PortalCategory, PortalRef};
use crate::runtime::{ActiveItem, DisposeItem, Runtime, RuntimeEvent};
use crate::value::Value;

impl Runtime {
    /// Read the value at a portal endpoint.
    pub(crate) fn portal_value_at(&self, at: PortalRef) -> Option<&Value> {
        self.node(at.node)?.portals.get(at.portal).map(|p| &p.value)
    }

    /// Execute a portal's links.
    ///
    /// Zero-delay links whose end is an input (or an output on a graph)
    /// enter the end node immediately. Delayed links are registered in the
    /// active set with their countdown reset, to fire after their delay.
    pub fn go(&mut self, at: PortalRef) {
        let link_keys = match self.node(at.node).and_then(|n| n.portals.get(at.portal)) {
            Some(portal) => portal.links.clone(),
            None => return,
        };
        for lk in link_keys {
            let Some(link) = self.link(lk) else { continue };
            let (delay, end) = (link.delay, link.end);
            if delay == 0 {
                let Some(end_node) = self.node(end.node) else { continue };
                let Some(end_portal) = end_node.portals.get(end.portal) else {
                    continue;
                };
                let enters = match end_portal.category {
                    PortalCategory::Input => true,
                    PortalCategory::Output => end_node.is_graph(),
                    _ => false,
                };
                if enters {
                    let name = end_portal.name.clone();
                    self.enter(end.node, &name);
                }
            } else {
                if let Some(link) = self.link_mut(lk) {
                    link.elapsed = 0;
                }
                self.activate(ActiveItem::Link(lk));
            }
        }
    }

    /// Enter a node through a named portal.
    pub fn enter(&mut self, node: NodeKey, portal_name: &str) {
        let Some(n) = self.node(node) else { return };
        match &n.body {
            NodeBody::Graph(_) => self.graph_enter(node, portal_name),
            NodeBody::Call(_) => self.call_enter(node, portal_name),
            NodeBody::Leaf(_) => self.base_enter(node, portal_name),
        }
    }

    /// Exit a node through the named output portal. With `keep_active`
    /// false the node leaves the active set.
    pub fn exit(&mut self, node: NodeKey, portal_name: &str, keep_active: bool) {
        let is_call = self.node(node).is_some_and(|n| n.as_call().is_some());
        if is_call {
            self.call_exit(node, portal_name, keep_active);
        } else {
            self.base_exit(node, portal_name, keep_active);
        }
    }

    /// Base `enter`: activate, register in the active set, and pull each
    /// parameter from the first incoming link (first-link-wins).
    pub(crate) fn base_enter(&mut self, node: NodeKey, _portal_name: &str) {
        let Some(n) = self.node_mut(node) else { return };
        n.active = true;
        self.activate(ActiveItem::Node(node));

        let params: Vec<usize> = match self.node(node) {
            Some(n) => n.portals_of(PortalCategory::Parameter).collect(),
            None => return,
        };
        for index in params {
            let link_keys = match self.node(node).and_then(|n| n.portals.get(index)) {
                Some(p) => p.links.clone(),
                None => continue,
            };
            for lk in link_keys {
                let Some(link) = self.link(lk) else { continue };
                if link.end != (PortalRef { node, portal: index }) {
                    continue;
                }
                let start = link.start;
                if let Some(value) = self.portal_value_at(start).cloned() {
                    if let Some(n) = self.node_mut(node) {
                        if let Some(p) = n.portals.get_mut(index) {
                            p.value = value;
                        }
                    }
                }
                // first incoming link wins; later links are ignored
                break;
            }
        }
    }

    /// Base `exit`: deactivate per `keep_active`, push every product along
    /// its resolved outgoing links, then fire the matching-named output.
    pub(crate) fn base_exit(&mut self, node: NodeKey, portal_name: &str, keep_active: bool) {
        {
            let Some(n) = self.node_mut(node) else { return };
            n.active = keep_active;
        }
        if !keep_active {
            self.deactivate(ActiveItem::Node(node));
        }

        let products: Vec<usize> = match self.node(node) {
            Some(n) => n.portals_of(PortalCategory::Product).collect(),
            None => return,
        };
        for index in products {
            let link_keys = match self.node(node).and_then(|n| n.portals.get(index)) {
                Some(p) => p.links.clone(),
                None => continue,
            };
            for lk in link_keys {
                let Some(link) = self.link(lk) else { continue };
                if link.start != (PortalRef { node, portal: index }) {
                    continue;
                }
                let end = link.end;
                let Some(value) = self.portal_value_at(link.start).cloned() else {
                    continue;
                };
                let resolved = self
                    .node_mut(end.node)
                    .and_then(|n| n.portals.get_mut(end.portal))
                    .map(|p| {
                        p.value = value;
                    })
                    .is_some();
                if resolved {
                    self.parameter_filled(end.node, end.portal);
                }
            }
        }

        let out = self
            .node(node)
            .and_then(|n| n.portal_index_of(PortalCategory::Output, portal_name));
        if let Some(portal) = out {
            self.go(PortalRef { node, portal });
        }
    }

    /// A parameter or product was written, externally or by propagation.
    pub fn parameter_filled(&mut self, node: NodeKey, portal: usize) {
        let Some(n) = self.node(node) else { return };
        match &n.body {
            NodeBody::Graph(_) => self.graph_parameter_filled(node, portal),
            NodeBody::Leaf(Some(_)) => {
                let behavior = self.node_mut(node).and_then(|n| match &mut n.body {
                    NodeBody::Leaf(slot) => slot.take(),
                    _ => None,
                });
                if let Some(mut b) = behavior {
                    b.on_parameter_filled(self, node, portal);
                    if let Some(n) = self.node_mut(node) {
                        if let NodeBody::Leaf(slot) = &mut n.body {
                            *slot = Some(b);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Run a node's initialization hook (after the scene is fully built).
    pub(crate) fn node_initialize(&mut self, node: NodeKey) {
        let behavior = self.node_mut(node).and_then(|n| match &mut n.body {
            NodeBody::Leaf(slot) => slot.take(),
            _ => None,
        });
        if let Some(mut b) = behavior {
            b.on_initialize(self, node);
            if let Some(n) = self.node_mut(node) {
                if let NodeBody::Leaf(slot) = &mut n.body {
                    *slot = Some(b);
                }
            }
        }
    }

    /// A delayed link reached its delay: copy into a parameter end (and
    /// fill), or enter an input/output end.
    pub(crate) fn fire_link(&mut self, start: PortalRef, end: PortalRef) {
        let category = match self.node(end.node).and_then(|n| n.portals.get(end.portal)) {
            Some(p) => p.category,
            None => return,
        };
        match category {
            PortalCategory::Parameter => {
                let Some(value) = self.portal_value_at(start).cloned() else {
                    return;
                };
                if let Some(n) = self.node_mut(end.node) {
                    if let Some(p) = n.portals.get_mut(end.portal) {
                        p.value = value;
                    }
                }
                self.parameter_filled(end.node, end.portal);
            }
            PortalCategory::Input | PortalCategory::Output => {
                let name = match self.node(end.node).and_then(|n| n.portals.get(end.portal)) {
                    Some(p) => p.name.clone(),
                    None => return,
                };
                self.enter(end.node, &name);
            }
            PortalCategory::Product => {}
        }
    }

    // ---- graph execution -------------------------------------------------

    /// The four-case graph `enter`: output portals signal an exit; a
    /// loaded graph enters normally and fires its parameters; a loading
    /// graph defers the entry; an unloaded graph defers and loads.
    pub(crate) fn graph_enter(&mut self, graph: NodeKey, portal_name: &str) {
        let Some(n) = self.node(graph) else { return };
        // Flow portals only; an input wins over a same-named output.
        let Some((index, category)) = n
            .portal_index_of(PortalCategory::Input, portal_name)
            .map(|i| (i, PortalCategory::Input))
            .or_else(|| {
                n.portal_index_of(PortalCategory::Output, portal_name)
                    .map(|i| (i, PortalCategory::Output))
            })
        else {
            return;
        };
        let (loaded, loading) = match n.as_graph() {
            Some(state) => (state.loaded, state.loading),
            None => return,
        };

        if category == PortalCategory::Output {
            self.graph_exit_signal(graph, portal_name);
            return;
        }

        if loaded {
            self.base_enter(graph, portal_name);
            let params: Vec<usize> = match self.node(graph) {
                Some(n) => n.portals_of(PortalCategory::Parameter).collect(),
                None => return,
            };
            for portal in params {
                self.go(PortalRef { node: graph, portal });
            }
            if category == PortalCategory::Input {
                self.notify_plugins(|p, rt| p.on_graph_enter(rt, graph));
                self.push_event(RuntimeEvent::GraphEntered { graph });
                self.go(PortalRef {
                    node: graph,
                    portal: index,
                });
            }
            return;
        }

        if loading {
            if let Some(state) = self.node_mut(graph).and_then(Node::as_graph_mut) {
                state.deferred.push(portal_name.to_string());
            }
            return;
        }

        // Not yet loading: defer the entry and kick the load off.
        if let Some(state) = self.node_mut(graph).and_then(Node::as_graph_mut) {
            state.deferred.push(portal_name.to_string());
        }
        self.graph_load(graph);
    }

    /// Replay one deferred entry after a load completes, under the same
    /// parameter and `go` rules as a live enter.
    pub(crate) fn replay_entry(&mut self, graph: NodeKey, portal_name: &str) {
        self.base_enter(graph, portal_name);
        let params: Vec<usize> = match self.node(graph) {
            Some(n) => n.portals_of(PortalCategory::Parameter).collect(),
            None => return,
        };
        for portal in params {
            self.go(PortalRef { node: graph, portal });
        }
        let input = self
            .node(graph)
            .and_then(|n| n.portal_index_of(PortalCategory::Input, portal_name));
        if let Some(portal) = input {
            self.go(PortalRef { node: graph, portal });
        }
    }

    /// An output portal on a graph was reached: mirror products into every
    /// active call instance and exit them; honor unload-on-exit; notify.
    fn graph_exit_signal(&mut self, graph: NodeKey, portal_name: &str) {
        let Some(state) = self.node(graph).and_then(Node::as_graph) else {
            return;
        };
        let children = state.children.clone();
        let instances = state.active_instances.clone();
        let unload_on_exit = state.unload_on_exit;

        let still_active = children
            .iter()
            .any(|c| self.node(*c).is_some_and(|n| n.active));

        // Mirror this graph's products into each instance, then exit it.
        let products: Vec<(String, Value)> = match self.node(graph) {
            Some(n) => n
                .portals
                .iter()
                .filter(|p| p.category == PortalCategory::Product)
                .map(|p| (p.name.clone(), p.value.clone()))
                .collect(),
            None => return,
        };
        for instance in instances {
            if let Some(call) = self.node_mut(instance) {
                for portal in call
                    .portals
                    .iter_mut()
                    .filter(|p| p.category == PortalCategory::Product)
                {
                    if let Some((_, value)) = products.iter().find(|(n, _)| *n == portal.name) {
                        portal.value = value.clone();
                    }
                }
            }
            self.exit(instance, portal_name, still_active);
        }

        if !still_active && unload_on_exit {
            self.queue_disposal(DisposeItem::Node(graph));
            let Some(state) = self.node(graph).and_then(Node::as_graph) else {
                return;
            };
            let models = state.models.clone();
            let groups = state.groups.clone();
            for m in &models {
                if let Some(model) = self.model_mut(*m) {
                    model.ref_count -= 1;
                    if model.ref_count == 0 {
                        self.queue_disposal(DisposeItem::Model(*m));
                    }
                }
            }
            for g in &groups {
                if let Some(group) = self.group_mut(*g) {
                    group.ref_count -= 1;
                    if group.ref_count == 0 {
                        self.queue_disposal(DisposeItem::Group(*g));
                    }
                }
            }
            // The references were released above; the disposal queue now
            // owns them, so the graph's own lists must not release again.
            if let Some(state) = self.node_mut(graph).and_then(Node::as_graph_mut) {
                state.models.clear();
                state.groups.clear();
            }
        }

        let name = portal_name.to_string();
        self.notify_plugins(|p, rt| p.on_graph_exit(rt, graph, &name, still_active));
        self.push_event(RuntimeEvent::GraphExited {
            graph,
            portal: name,
            still_active,
        });

        if !still_active {
            if let Some(n) = self.node_mut(graph) {
                n.active = false;
            }
            self.deactivate(ActiveItem::Node(graph));
        }
    }

    /// Mirror a written parameter/product into the matching-named portal
    /// on every currently active call instance of this graph.
    pub(crate) fn graph_parameter_filled(&mut self, graph: NodeKey, portal: usize) {
        let (name, value) = match self.node(graph).and_then(|n| n.portals.get(portal)) {
            Some(p) => (p.name.clone(), p.value.clone()),
            None => return,
        };
        let instances = match self.node(graph).and_then(Node::as_graph) {
            Some(state) => state.active_instances.clone(),
            None => return,
        };
        for instance in instances {
            if let Some(call) = self.node_mut(instance) {
                if let Some(p) = call.portal_mut(&name) {
                    p.value = value.clone();
                }
            }
        }
    }

    // ---- call execution --------------------------------------------------

    /// Enter a subgraph call: base enter, pull the instance's parameters
    /// from this call site, re-parent the instance, register as an active
    /// instance, and forward the entry into the instance.
    pub(crate) fn call_enter(&mut self, node: NodeKey, portal_name: &str) {
        self.base_enter(node, portal_name);

        let instance = match self.node(node).and_then(Node::as_call) {
            Some(call) => call.instance,
            None => return,
        };
        let Some(instance) = instance else { return };

        // A disposed instance means this call site is dead too.
        if self.node(instance).is_none() {
            self.dispose_node(node);
            return;
        }

        let targets: Vec<(usize, String, PortalCategory)> = match self.node(instance) {
            Some(n) => n
                .portals
                .iter()
                .enumerate()
                .map(|(i, p)| (i, p.name.clone(), p.category))
                .collect(),
            None => return,
        };
        for (index, name, category) in &targets {
            if *category != PortalCategory::Parameter {
                continue;
            }
            let value = self
                .node(node)
                .and_then(|n| n.get_param(name).cloned())
                .unwrap_or(Value::Null);
            if let Some(n) = self.node_mut(instance) {
                if let Some(p) = n.portals.get_mut(*index) {
                    p.value = value;
                }
            }
        }

        // Re-parent so nested calls resolve to the correct lexical parent.
        let parent = self.node(node).and_then(|n| n.container);
        if let Some(n) = self.node_mut(instance) {
            n.container = parent;
        }

        if let Some(state) = self.node_mut(instance).and_then(Node::as_graph_mut) {
            if !state.active_instances.contains(&node) {
                state.active_instances.push(node);
            }
        }

        self.enter(instance, portal_name);
    }

    /// Exit a subgraph call: base exit, then leave the instance's
    /// active-instance list.
    pub(crate) fn call_exit(&mut self, node: NodeKey, portal_name: &str, keep_active: bool) {
        self.base_exit(node, portal_name, keep_active);
        let instance = match self.node(node).and_then(Node::as_call) {
            Some(call) => call.instance,
            None => return,
        };
        if let Some(instance) = instance {
            if let Some(state) = self.node_mut(instance).and_then(Node::as_graph_mut) {
                state.active_instances.retain(|i| *i != node);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineKey;
    use crate::link::{Link, LinkKey};
    use crate::model::ModelBehavior;
    use crate::runtime::Runtime;
    use crate::scene::{
        EntryDescription, GraphDescription, ModelDescription, NodeDescription, PortDescription,
        SceneDescription, SceneId,
    };
    use crate::value::{Value, ValueKind};

    fn leaf(rt: &mut Runtime) -> NodeKey {
        rt.insert_node(Node::new(EngineKey::new(), NodeBody::Leaf(None)))
    }

    fn portal(rt: &mut Runtime, node: NodeKey, category: PortalCategory, name: &str) -> PortalRef {
        let index = rt
            .node_mut(node)
            .unwrap()
            .add_portal(category, name, Value::Null, ValueKind::Any);
        PortalRef { node, portal: index }
    }

    fn wire(rt: &mut Runtime, start: PortalRef, end: PortalRef, delay: u32) -> LinkKey {
        let key = rt.insert_link(Link::new(start, end, delay));
        for endpoint in [start, end] {
            rt.node_mut(endpoint.node).unwrap().portals[endpoint.portal].add_link(key);
        }
        key
    }

    fn port_desc(category: PortalCategory, name: &str) -> PortDescription {
        PortDescription {
            category,
            name: name.into(),
            value: Value::Null,
            kind: ValueKind::Any,
        }
    }

    #[test]
    fn test_exit_with_keep_active_stays_in_active_set() {
        let mut rt = Runtime::new();
        let a = leaf(&mut rt);
        portal(&mut rt, a, PortalCategory::Input, "in");
        portal(&mut rt, a, PortalCategory::Output, "out");

        rt.enter(a, "in");
        assert!(rt.is_active(ActiveItem::Node(a)));

        rt.exit(a, "out", true);
        assert!(rt.is_active(ActiveItem::Node(a)));

        rt.exit(a, "out", false);
        assert!(!rt.is_active(ActiveItem::Node(a)));
    }

    #[test]
    fn test_enter_pulls_parameter_from_first_incoming_link() {
        let mut rt = Runtime::new();
        let a = leaf(&mut rt);
        let b = leaf(&mut rt);
        let c = leaf(&mut rt);
        let a_v = portal(&mut rt, a, PortalCategory::Product, "v");
        let c_v = portal(&mut rt, c, PortalCategory::Product, "v");
        let b_p = portal(&mut rt, b, PortalCategory::Parameter, "p");
        portal(&mut rt, b, PortalCategory::Input, "in");
        rt.node_mut(a).unwrap().set_product("v", Value::Int(7));
        rt.node_mut(c).unwrap().set_product("v", Value::Int(9));
        wire(&mut rt, a_v, b_p, 0);
        wire(&mut rt, c_v, b_p, 0);

        rt.enter(b, "in");
        assert_eq!(rt.portal_value(b, "p"), Some(&Value::Int(7)));
    }

    #[test]
    fn test_exit_pushes_products_and_enters_downstream() {
        let mut rt = Runtime::new();
        let a = leaf(&mut rt);
        let b = leaf(&mut rt);
        portal(&mut rt, a, PortalCategory::Input, "in");
        let a_n = portal(&mut rt, a, PortalCategory::Product, "n");
        let a_out = portal(&mut rt, a, PortalCategory::Output, "done");
        let b_n = portal(&mut rt, b, PortalCategory::Parameter, "n");
        let b_in = portal(&mut rt, b, PortalCategory::Input, "go");
        wire(&mut rt, a_n, b_n, 0);
        wire(&mut rt, a_out, b_in, 0);

        rt.enter(a, "in");
        rt.node_mut(a).unwrap().set_product("n", Value::Int(3));
        rt.exit(a, "done", false);

        assert_eq!(rt.portal_value(b, "n"), Some(&Value::Int(3)));
        assert!(rt.is_active(ActiveItem::Node(b)));
        assert!(!rt.is_active(ActiveItem::Node(a)));
    }

    #[test]
    fn test_delayed_link_fires_after_exact_tick_count() {
        let mut rt = Runtime::new();
        let a = leaf(&mut rt);
        let b = leaf(&mut rt);
        let a_out = portal(&mut rt, a, PortalCategory::Output, "out");
        portal(&mut rt, b, PortalCategory::Input, "in");
        let link = wire(&mut rt, a_out, PortalRef { node: b, portal: 0 }, 2);

        rt.go(a_out);
        assert!(rt.is_active(ActiveItem::Link(link)));
        assert!(!rt.is_active(ActiveItem::Node(b)));

        rt.frame(1.0);
        assert!(!rt.is_active(ActiveItem::Node(b)));

        rt.frame(2.0);
        assert!(rt.is_active(ActiveItem::Node(b)));
        assert!(!rt.is_active(ActiveItem::Link(link)));
    }

    #[test]
    fn test_exit_fires_output_sharing_a_name_with_a_parameter() {
        let mut rt = Runtime::new();
        let a = leaf(&mut rt);
        let b = leaf(&mut rt);
        portal(&mut rt, a, PortalCategory::Input, "in");
        // declared before the output, so a name-only lookup would find it
        portal(&mut rt, a, PortalCategory::Parameter, "done");
        let a_done = portal(&mut rt, a, PortalCategory::Output, "done");
        let b_in = portal(&mut rt, b, PortalCategory::Input, "in");
        wire(&mut rt, a_done, b_in, 0);

        rt.enter(a, "in");
        rt.exit(a, "done", false);
        assert!(rt.is_active(ActiveItem::Node(b)));
    }

    #[test]
    fn test_graph_enter_resolves_output_past_shadowing_parameter() {
        let mut rt = Runtime::new();
        let graph = rt.insert_node(Node::new(
            EngineKey::new(),
            NodeBody::Graph(crate::graph::GraphState::default()),
        ));
        portal(&mut rt, graph, PortalCategory::Parameter, "done");
        portal(&mut rt, graph, PortalCategory::Output, "done");

        rt.enter(graph, "done");

        let mut exited = false;
        while let Some(event) = rt.poll_event() {
            if let RuntimeEvent::GraphExited { portal, .. } = event {
                assert_eq!(portal, "done");
                exited = true;
            }
        }
        assert!(exited);
    }

    #[test]
    fn test_start_fires_through_one_synchronous_chain() {
        let mut rt = Runtime::new();
        let mut properties = serde_json::Map::new();
        properties.insert("Start On Load".into(), serde_json::Value::Bool(true));
        let scene = SceneDescription {
            graphs: vec![GraphDescription {
                id: SceneId(1),
                name: "main".into(),
                properties,
                entries: vec![
                    EntryDescription::Port(port_desc(PortalCategory::Input, "start")),
                    EntryDescription::Port(port_desc(PortalCategory::Output, "done")),
                ],
                links: vec![crate::scene::LinkDescription {
                    id: SceneId(2),
                    delay: 0,
                    start_node: SceneId(1),
                    start_port: "start".into(),
                    end_node: SceneId(1),
                    end_port: "done".into(),
                }],
                ..GraphDescription::default()
            }],
            ..SceneDescription::default()
        };

        let engine = rt.open(&scene).unwrap();
        rt.start(engine);

        // The whole chain ran inside start(); no tick was needed.
        let mut exited = false;
        while let Some(event) = rt.poll_event() {
            if let crate::runtime::RuntimeEvent::GraphExited { portal, .. } = event {
                assert_eq!(portal, "done");
                exited = true;
            }
        }
        assert!(exited);
    }

    #[test]
    fn test_call_sites_have_isolated_instances() {
        let mut rt = Runtime::new();
        let call = |id: u32| {
            EntryDescription::Node(NodeDescription {
                id: SceneId(id),
                alias: format!("call-{id}"),
                kind: "subgraph-call".into(),
                target: Some(SceneId(2)),
                ports: vec![port_desc(PortalCategory::Parameter, "p")],
            })
        };
        let scene = SceneDescription {
            graphs: vec![
                GraphDescription {
                    id: SceneId(1),
                    name: "main".into(),
                    entries: vec![call(10), call(11)],
                    ..GraphDescription::default()
                },
                GraphDescription {
                    id: SceneId(2),
                    name: "sub".into(),
                    entries: vec![EntryDescription::Port(PortDescription {
                        category: PortalCategory::Parameter,
                        name: "p".into(),
                        value: Value::Int(1),
                        kind: ValueKind::Int,
                    })],
                    ..GraphDescription::default()
                },
            ],
            ..SceneDescription::default()
        };

        let engine = rt.open(&scene).unwrap();
        let main = rt.engine(engine).unwrap().graphs[0];
        let children = rt.node(main).unwrap().as_graph().unwrap().children.clone();
        let first = rt.node(children[0]).unwrap().as_call().unwrap().instance.unwrap();
        let second = rt.node(children[1]).unwrap().as_call().unwrap().instance.unwrap();

        rt.set_portal_value(first, "p", Value::Int(42));
        assert_eq!(rt.portal_value(first, "p"), Some(&Value::Int(42)));
        assert_eq!(rt.portal_value(second, "p"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_call_enter_pulls_parameters_and_forwards() {
        let mut rt = Runtime::new();
        let scene = SceneDescription {
            graphs: vec![
                GraphDescription {
                    id: SceneId(1),
                    name: "main".into(),
                    entries: vec![EntryDescription::Node(NodeDescription {
                        id: SceneId(10),
                        alias: "call".into(),
                        kind: "subgraph-call".into(),
                        target: Some(SceneId(2)),
                        ports: vec![
                            port_desc(PortalCategory::Input, "run"),
                            PortDescription {
                                category: PortalCategory::Parameter,
                                name: "p".into(),
                                value: Value::Int(5),
                                kind: ValueKind::Int,
                            },
                        ],
                    })],
                    ..GraphDescription::default()
                },
                GraphDescription {
                    id: SceneId(2),
                    name: "sub".into(),
                    entries: vec![
                        EntryDescription::Port(port_desc(PortalCategory::Input, "run")),
                        EntryDescription::Port(PortDescription {
                            category: PortalCategory::Parameter,
                            name: "p".into(),
                            value: Value::Null,
                            kind: ValueKind::Int,
                        }),
                    ],
                    ..GraphDescription::default()
                },
            ],
            ..SceneDescription::default()
        };

        let engine = rt.open(&scene).unwrap();
        let main = rt.engine(engine).unwrap().graphs[0];
        let call = rt.node(main).unwrap().as_graph().unwrap().children[0];
        let instance = rt.node(call).unwrap().as_call().unwrap().instance.unwrap();

        rt.enter(call, "run");
        assert_eq!(rt.portal_value(instance, "p"), Some(&Value::Int(5)));
        assert!(rt.node(instance).unwrap().as_graph().unwrap().loaded);
        assert!(rt
            .node(instance)
            .unwrap()
            .as_graph()
            .unwrap()
            .active_instances
            .contains(&call));

        rt.exit(call, "run", false);
        assert!(rt
            .node(instance)
            .unwrap()
            .as_graph()
            .unwrap()
            .active_instances
            .is_empty());
    }

    #[test]
    fn test_entry_is_deferred_while_model_never_loads() {
        struct Stall;
        impl ModelBehavior for Stall {
            fn load(&mut self, _rt: &mut Runtime, _model: crate::model::ModelKey) {}
        }

        let mut rt = Runtime::new();
        rt.model_kinds
            .register("slow", |_: &ModelDescription| Box::new(Stall) as Box<dyn ModelBehavior>);

        let mut properties = serde_json::Map::new();
        properties.insert("Start On Load".into(), serde_json::Value::Bool(true));
        let scene = SceneDescription {
            models: vec![ModelDescription {
                id: SceneId(1),
                name: "stalled".into(),
                kind: "slow".into(),
                ..ModelDescription::default()
            }],
            graphs: vec![GraphDescription {
                id: SceneId(2),
                name: "main".into(),
                properties,
                entries: vec![EntryDescription::Port(port_desc(PortalCategory::Input, "start"))],
                model_ids: vec![SceneId(1)],
                ..GraphDescription::default()
            }],
            ..SceneDescription::default()
        };

        let engine = rt.open(&scene).unwrap();
        rt.start(engine);
        let graph = rt.engine(engine).unwrap().graphs[0];
        assert!(rt.node(graph).unwrap().as_graph().unwrap().loading);
        assert!(!rt.node(graph).unwrap().as_graph().unwrap().loaded);

        rt.enter(graph, "start");
        rt.frame(1.0);
        rt.frame(2.0);

        let state = rt.node(graph).unwrap().as_graph().unwrap();
        assert!(!state.loaded);
        assert_eq!(state.deferred, vec!["start".to_string()]);
    }

    #[test]
    fn test_unload_on_exit_queues_graph_for_disposal() {
        let mut rt = Runtime::new();
        let mut properties = serde_json::Map::new();
        properties.insert("Start On Load".into(), serde_json::Value::Bool(true));
        properties.insert("Unload On Exit".into(), serde_json::Value::Bool(true));
        let scene = SceneDescription {
            graphs: vec![GraphDescription {
                id: SceneId(1),
                name: "once".into(),
                properties,
                entries: vec![
                    EntryDescription::Port(port_desc(PortalCategory::Input, "start")),
                    EntryDescription::Port(port_desc(PortalCategory::Output, "done")),
                ],
                links: vec![crate::scene::LinkDescription {
                    id: SceneId(2),
                    delay: 0,
                    start_node: SceneId(1),
                    start_port: "start".into(),
                    end_node: SceneId(1),
                    end_port: "done".into(),
                }],
                ..GraphDescription::default()
            }],
            ..SceneDescription::default()
        };

        let engine = rt.open(&scene).unwrap();
        let graph = rt.engine(engine).unwrap().graphs[0];
        rt.start(engine);
        assert!(rt.node(graph).is_some());

        // Disposal drains at end of tick; the engine follows once it owns
        // no graphs.
        rt.frame(1.0);
        assert!(rt.node(graph).is_none());
        rt.frame(2.0);
        assert_eq!(rt.engine_count(), 0);
    }

    #[test]
    fn test_unload_on_exit_releases_model_references_once() {
        let mut rt = Runtime::new();
        let mut properties = serde_json::Map::new();
        properties.insert("Start On Load".into(), serde_json::Value::Bool(true));
        properties.insert("Unload On Exit".into(), serde_json::Value::Bool(true));
        let scene = SceneDescription {
            models: vec![ModelDescription {
                id: SceneId(1),
                name: "data".into(),
                kind: "generic".into(),
                ..ModelDescription::default()
            }],
            graphs: vec![GraphDescription {
                id: SceneId(2),
                name: "once".into(),
                properties,
                entries: vec![
                    EntryDescription::Port(port_desc(PortalCategory::Input, "start")),
                    EntryDescription::Port(port_desc(PortalCategory::Output, "done")),
                ],
                links: vec![crate::scene::LinkDescription {
                    id: SceneId(3),
                    delay: 0,
                    start_node: SceneId(2),
                    start_port: "start".into(),
                    end_node: SceneId(2),
                    end_port: "done".into(),
                }],
                model_ids: vec![SceneId(1)],
                ..GraphDescription::default()
            }],
            ..SceneDescription::default()
        };

        let engine = rt.open(&scene).unwrap();
        let graph = rt.engine(engine).unwrap().graphs[0];
        let model = rt.engine(engine).unwrap().models[0];
        assert_eq!(rt.model(model).unwrap().ref_count, 1);

        // The exit chain runs inside start(); the count must drop to zero
        // exactly once, with the graph's list cleared so its own disposal
        // cannot release the reference a second time.
        rt.start(engine);
        assert_eq!(rt.model(model).unwrap().ref_count, 0);
        assert!(rt
            .node(graph)
            .and_then(Node::as_graph)
            .is_some_and(|s| s.models.is_empty()));

        rt.frame(1.0);
        assert!(rt.node(graph).is_none());
        assert!(rt.model(model).is_none());
    }
}
