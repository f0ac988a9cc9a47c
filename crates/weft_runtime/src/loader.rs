// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scene loading: from a serialized description to a populated engine.
//!
//! Loading is fallible only for construction-time defects (an
//! unregistered node kind, a broken subgraph call). Dangling model and
//! group ids are data-quality issues: they resolve to null references and
//! the load proceeds. A failed load rolls the whole engine back; no
//! partially built engine is ever returned.

use crate::engine::{Engine, EngineKey};
use crate::link::Link;
use crate::model::{GroupMember, Model, ModelGroup};
use crate::node::{Node, NodeBody, NodeKey};
use crate::portal::{PortalCategory, PortalRef};
use crate::scene::{EntryDescription, GraphDescription, SceneDescription, SceneId};
use crate::value::ValueKind;
use thiserror::Error;

/// Why a scene failed to load.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadError {
    /// A node entry's kind tag has no registered constructor.
    #[error("no registered node kind for {0:?}")]
    UnresolvedKind(String),
    /// A subgraph-call entry declares no target graph.
    #[error("subgraph call {0:?} declares no target graph")]
    MissingCallTarget(String),
    /// A subgraph-call entry targets a graph id the scene does not define.
    #[error("subgraph call {alias:?} targets unknown graph {target}")]
    UnknownCallTarget {
        /// Alias of the call entry
        alias: String,
        /// The undefined target id
        target: SceneId,
    },
    /// Expanding subgraph calls revisited a graph already on the call
    /// chain. Self-referential call graphs are unsupported.
    #[error("recursive subgraph call into graph {0}")]
    RecursiveCall(SceneId),
}

impl crate::runtime::Runtime {
    /// Build an engine from a scene description.
    ///
    /// Construction order: models, groups (two passes, so members may
    /// forward-reference groups), graph shells with their ports and child
    /// nodes, links, model/group attachment, subgraph-call expansion, then
    /// one flatten-and-initialize pass over everything. Models left with a
    /// zero reference count after attachment are pruned.
    ///
    /// On error every item built so far is disposed; the runtime is left
    /// as it was before the call.
    pub fn open(&mut self, scene: &SceneDescription) -> Result<EngineKey, LoadError> {
        let engine = self.insert_engine(Engine::new());
        match self.build_scene(engine, scene) {
            Ok(()) => {
                tracing::info!(
                    graphs = scene.graphs.len(),
                    models = scene.models.len(),
                    "scene opened"
                );
                Ok(engine)
            }
            Err(e) => {
                tracing::error!(error = %e, "scene load failed");
                self.dispose_engine(engine);
                Err(e)
            }
        }
    }

    fn build_scene(
        &mut self,
        engine: EngineKey,
        scene: &SceneDescription,
    ) -> Result<(), LoadError> {
        // Models, via the kind registry with the generic no-load fallback.
        for desc in &scene.models {
            let behavior = self.model_kinds.construct(desc);
            let mut model = Model::new(engine, behavior);
            model.scene_id = Some(desc.id);
            model.name = desc.name.clone();
            model.kind = desc.kind.clone();
            model.properties = desc.properties.clone();
            let key = self.insert_model(model);
            if let Some(e) = self.engine_mut(engine) {
                e.models.push(key);
            }
        }

        // Groups: create all shells first so member lists may reference
        // groups declared later, then resolve members.
        for desc in &scene.groups {
            let mut group = ModelGroup::new(engine);
            group.scene_id = Some(desc.id);
            group.name = desc.name.clone();
            let key = self.insert_group(group);
            if let Some(e) = self.engine_mut(engine) {
                e.groups.push(key);
            }
        }
        for desc in &scene.groups {
            let Some(key) = self.get_group(engine, desc.id) else {
                continue;
            };
            for member_id in &desc.member_ids {
                let member = if let Some(m) = self.get_model(engine, *member_id) {
                    if let Some(model) = self.model_mut(m) {
                        model.ref_count += 1;
                    }
                    GroupMember::Model(m)
                } else if let Some(g) = self.get_group(engine, *member_id) {
                    if let Some(nested) = self.group_mut(g) {
                        nested.ref_count += 1;
                    }
                    GroupMember::Group(g)
                } else {
                    tracing::warn!(group = %desc.id, member = %member_id, "dangling group member");
                    continue;
                };
                if let Some(group) = self.group_mut(key) {
                    group.members.push(member);
                }
            }
        }

        // Graph shells, ports and children. Each shell registers with the
        // engine before its children build, so a failed build rolls back
        // through the engine disposal.
        for desc in &scene.graphs {
            self.build_graph(engine, desc)?;
        }

        // Links, resolved within each declaring graph.
        let graphs: Vec<NodeKey> = match self.engine(engine) {
            Some(e) => e.graphs.clone(),
            None => Vec::new(),
        };
        for (desc, graph) in scene.graphs.iter().zip(graphs.iter().copied()) {
            self.build_links(graph, desc);
        }

        // Attach declared model/group references.
        for (desc, graph) in scene.graphs.iter().zip(graphs.iter().copied()) {
            for id in &desc.model_ids {
                let Some(m) = self.get_model(engine, *id) else {
                    tracing::warn!(graph = %desc.id, model = %id, "dangling model reference");
                    continue;
                };
                if let Some(model) = self.model_mut(m) {
                    model.ref_count += 1;
                }
                if let Some(state) = self.node_mut(graph).and_then(Node::as_graph_mut) {
                    state.models.push(m);
                }
            }
            for id in &desc.group_ids {
                let Some(g) = self.get_group(engine, *id) else {
                    tracing::warn!(graph = %desc.id, group = %id, "dangling group reference");
                    continue;
                };
                if let Some(group) = self.group_mut(g) {
                    group.ref_count += 1;
                }
                if let Some(state) = self.node_mut(graph).and_then(Node::as_graph_mut) {
                    state.groups.push(g);
                }
            }
        }

        // Expand every subgraph call into a private clone of its target.
        for graph in &graphs {
            let mut chain: Vec<SceneId> = Vec::new();
            self.expand_calls(engine, *graph, &mut chain)?;
        }

        // Flatten, resolve model/group parameters, initialize.
        for graph in &graphs {
            let mut sequence: Vec<NodeKey> = Vec::new();
            self.flatten(*graph, &mut sequence);
            for node in sequence {
                self.resolve_ref_params(engine, node);
                self.node_initialize(node);
            }
        }

        // Prune models nothing ended up referencing.
        let unreferenced: Vec<_> = match self.engine(engine) {
            Some(e) => e
                .models
                .iter()
                .copied()
                .filter(|m| self.model(*m).is_some_and(|model| model.ref_count == 0))
                .collect(),
            None => Vec::new(),
        };
        for m in unreferenced {
            tracing::debug!(model = ?m, "pruning unreferenced model");
            self.dispose_model(m);
        }

        Ok(())
    }

    /// Build one graph node: its boundary ports and its children, in
    /// authoring order.
    fn build_graph(
        &mut self,
        engine: EngineKey,
        desc: &GraphDescription,
    ) -> Result<NodeKey, LoadError> {
        let state = crate::graph::GraphState {
            properties: desc.properties.clone(),
            plugin_config: desc.plugin_config.clone(),
            start_on_load: bool_property(&desc.properties, "Start On Load"),
            unload_on_exit: bool_property(&desc.properties, "Unload On Exit"),
            ..crate::graph::GraphState::default()
        };
        let mut graph = Node::new(engine, NodeBody::Graph(state));
        graph.scene_id = Some(desc.id);
        graph.alias = desc.name.clone();
        let graph_key = self.insert_node(graph);
        if let Some(e) = self.engine_mut(engine) {
            e.graphs.push(graph_key);
        }

        for entry in &desc.entries {
            match entry {
                EntryDescription::Port(port) => {
                    if let Some(n) = self.node_mut(graph_key) {
                        n.add_portal(port.category, &port.name, port.value.clone(), port.kind);
                    }
                }
                EntryDescription::Node(entry) => {
                    let body = self
                        .node_kinds
                        .construct(entry)
                        .ok_or_else(|| LoadError::UnresolvedKind(entry.kind.clone()))?;
                    let mut child = Node::new(engine, body);
                    child.scene_id = Some(entry.id);
                    child.alias = entry.alias.clone();
                    child.container = Some(graph_key);
                    for port in &entry.ports {
                        child.add_portal(port.category, &port.name, port.value.clone(), port.kind);
                    }
                    let child_key = self.insert_node(child);
                    if let Some(state) = self.node_mut(graph_key).and_then(Node::as_graph_mut) {
                        state.children.push(child_key);
                    }
                }
            }
        }

        Ok(graph_key)
    }

    /// Build one graph's links. Endpoint node ids resolve against the
    /// graph's children, falling back to the graph itself for links
    /// terminating on a boundary port. An endpoint that resolves nowhere
    /// downgrades the link to a warning.
    fn build_links(&mut self, graph: NodeKey, desc: &GraphDescription) {
        for entry in &desc.links {
            let start = self.resolve_endpoint(graph, entry.start_node, &entry.start_port);
            let end = self.resolve_endpoint(graph, entry.end_node, &entry.end_port);
            let (Some(start), Some(end)) = (start, end) else {
                tracing::warn!(graph = %desc.id, link = %entry.id, "unresolved link endpoint");
                continue;
            };
            let mut link = Link::new(start, end, entry.delay);
            link.scene_id = Some(entry.id);
            let key = self.insert_link(link);
            for endpoint in [start, end] {
                if let Some(node) = self.node_mut(endpoint.node) {
                    if let Some(portal) = node.portals.get_mut(endpoint.portal) {
                        portal.add_link(key);
                    }
                }
            }
        }
    }

    fn resolve_endpoint(&self, graph: NodeKey, node_id: SceneId, port: &str) -> Option<PortalRef> {
        let state = self.node(graph).and_then(Node::as_graph)?;
        let node = state
            .children
            .iter()
            .copied()
            .find(|c| self.node(*c).and_then(|n| n.scene_id) == Some(node_id))
            .unwrap_or(graph);
        let portal = self.node(node)?.portal_index(port)?;
        Some(PortalRef { node, portal })
    }

    /// Clone each subgraph call's target into the call's private instance
    /// slot, recursively expanding calls inside the fresh clone. `chain`
    /// holds the target ids on the current expansion path; revisiting one
    /// is a cycle.
    fn expand_calls(
        &mut self,
        engine: EngineKey,
        graph: NodeKey,
        chain: &mut Vec<SceneId>,
    ) -> Result<(), LoadError> {
        let children = match self.node(graph).and_then(Node::as_graph) {
            Some(state) => state.children.clone(),
            None => return Ok(()),
        };
        for child in children {
            let Some(node) = self.node(child) else { continue };
            if node.is_graph() {
                self.expand_calls(engine, child, chain)?;
                continue;
            }
            let Some(call) = node.as_call() else { continue };
            if call.instance.is_some() {
                // Cloned from an already-expanded target; nothing to do.
                continue;
            }
            let alias = node.alias.clone();
            let Some(target) = call.target else {
                return Err(LoadError::MissingCallTarget(alias));
            };
            if chain.contains(&target) {
                return Err(LoadError::RecursiveCall(target));
            }
            let source = self
                .engine(engine)
                .and_then(|e| {
                    e.graphs
                        .iter()
                        .copied()
                        .find(|g| self.node(*g).and_then(|n| n.scene_id) == Some(target))
                })
                .ok_or(LoadError::UnknownCallTarget { alias, target })?;

            let container = self.node(child).and_then(|n| n.container);
            let Some(instance) = self.clone_graph(source, container) else {
                continue;
            };
            if let Some(n) = self.node_mut(child) {
                if let NodeBody::Call(c) = &mut n.body {
                    c.instance = Some(instance);
                }
            }
            chain.push(target);
            self.expand_calls(engine, instance, chain)?;
            chain.pop();
        }
        Ok(())
    }

    /// Resolve every model/group-kinded parameter's authored scene id to a
    /// live reference. Dangling ids become null references.
    fn resolve_ref_params(&mut self, engine: EngineKey, node: NodeKey) {
        let params: Vec<usize> = match self.node(node) {
            Some(n) => n
                .portals
                .iter()
                .enumerate()
                .filter(|(_, p)| {
                    p.category == PortalCategory::Parameter
                        && matches!(p.kind, ValueKind::Model | ValueKind::Group)
                })
                .map(|(i, _)| i)
                .collect(),
            None => return,
        };
        for index in params {
            let resolved = match self.node(node).and_then(|n| n.portals.get(index)) {
                Some(p) => self.resolve_ref_value(engine, p.kind, &p.value),
                None => continue,
            };
            if let Some(n) = self.node_mut(node) {
                if let Some(p) = n.portals.get_mut(index) {
                    p.value = resolved;
                }
            }
        }
    }
}

fn bool_property(properties: &serde_json::Map<String, serde_json::Value>, name: &str) -> bool {
    properties.get(name).and_then(|v| v.as_bool()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::PortalCategory;
    use crate::runtime::Runtime;
    use crate::scene::{
        GroupDescription, LinkDescription, ModelDescription, NodeDescription, PortDescription,
    };
    use crate::value::Value;

    fn port(category: PortalCategory, name: &str) -> PortDescription {
        PortDescription {
            category,
            name: name.into(),
            value: Value::Null,
            kind: ValueKind::Any,
        }
    }

    fn scene_one_graph(entries: Vec<EntryDescription>, links: Vec<LinkDescription>) -> SceneDescription {
        SceneDescription {
            graphs: vec![GraphDescription {
                id: SceneId(1),
                name: "main".into(),
                entries,
                links,
                ..GraphDescription::default()
            }],
            ..SceneDescription::default()
        }
    }

    #[test]
    fn test_open_builds_graph_with_ports() {
        let mut rt = Runtime::new();
        let scene = scene_one_graph(
            vec![
                EntryDescription::Port(port(PortalCategory::Input, "start")),
                EntryDescription::Node(NodeDescription {
                    id: SceneId(2),
                    alias: "unit".into(),
                    kind: "node".into(),
                    ports: vec![port(PortalCategory::Input, "in")],
                    ..NodeDescription::default()
                }),
            ],
            vec![],
        );

        let engine = rt.open(&scene).unwrap();
        let graphs = rt.engine(engine).unwrap().graphs.clone();
        assert_eq!(graphs.len(), 1);
        let graph = rt.node(graphs[0]).unwrap();
        assert_eq!(graph.portal_index("start"), Some(0));
        let state = graph.as_graph().unwrap();
        assert_eq!(state.children.len(), 1);
    }

    #[test]
    fn test_unknown_kind_fails_and_rolls_back() {
        let mut rt = Runtime::new();
        let scene = scene_one_graph(
            vec![EntryDescription::Node(NodeDescription {
                id: SceneId(2),
                kind: "no-such-kind".into(),
                ..NodeDescription::default()
            })],
            vec![],
        );

        let err = rt.open(&scene).unwrap_err();
        assert_eq!(err, LoadError::UnresolvedKind("no-such-kind".into()));
        assert_eq!(rt.engine_count(), 0);
    }

    #[test]
    fn test_link_endpoints_fall_back_to_graph_boundary() {
        let mut rt = Runtime::new();
        let scene = scene_one_graph(
            vec![
                EntryDescription::Port(port(PortalCategory::Input, "start")),
                EntryDescription::Port(port(PortalCategory::Output, "done")),
            ],
            vec![LinkDescription {
                id: SceneId(9),
                delay: 0,
                start_node: SceneId(1),
                start_port: "start".into(),
                end_node: SceneId(1),
                end_port: "done".into(),
            }],
        );

        let engine = rt.open(&scene).unwrap();
        let graph = rt.engine(engine).unwrap().graphs[0];
        let n = rt.node(graph).unwrap();
        assert_eq!(n.portals[0].links.len(), 1);
        assert_eq!(n.portals[1].links.len(), 1);
    }

    #[test]
    fn test_unresolved_link_endpoint_is_skipped() {
        let mut rt = Runtime::new();
        let scene = scene_one_graph(
            vec![EntryDescription::Port(port(PortalCategory::Input, "start"))],
            vec![LinkDescription {
                id: SceneId(9),
                delay: 0,
                start_node: SceneId(1),
                start_port: "start".into(),
                end_node: SceneId(77),
                end_port: "missing".into(),
            }],
        );

        let engine = rt.open(&scene).unwrap();
        let graph = rt.engine(engine).unwrap().graphs[0];
        assert!(rt.node(graph).unwrap().portals[0].links.is_empty());
    }

    #[test]
    fn test_groups_resolve_forward_references() {
        let mut rt = Runtime::new();
        let scene = SceneDescription {
            models: vec![ModelDescription {
                id: SceneId(1),
                name: "m".into(),
                kind: "generic".into(),
                ..ModelDescription::default()
            }],
            groups: vec![
                GroupDescription {
                    id: SceneId(2),
                    name: "outer".into(),
                    member_ids: vec![SceneId(3)],
                },
                GroupDescription {
                    id: SceneId(3),
                    name: "inner".into(),
                    member_ids: vec![SceneId(1)],
                },
            ],
            graphs: vec![GraphDescription {
                id: SceneId(4),
                name: "main".into(),
                model_ids: vec![SceneId(1)],
                ..GraphDescription::default()
            }],
        };

        let engine = rt.open(&scene).unwrap();
        let outer = rt.get_group(engine, SceneId(2)).unwrap();
        let inner = rt.get_group(engine, SceneId(3)).unwrap();
        assert_eq!(rt.group(outer).unwrap().members, vec![GroupMember::Group(inner)]);
        let model = rt.get_model(engine, SceneId(1)).unwrap();
        // one reference from the inner group, one from the graph
        assert_eq!(rt.model(model).unwrap().ref_count, 2);
    }

    #[test]
    fn test_unreferenced_models_are_pruned() {
        let mut rt = Runtime::new();
        let scene = SceneDescription {
            models: vec![ModelDescription {
                id: SceneId(1),
                name: "orphan".into(),
                kind: "generic".into(),
                ..ModelDescription::default()
            }],
            graphs: vec![GraphDescription {
                id: SceneId(2),
                name: "main".into(),
                ..GraphDescription::default()
            }],
            ..SceneDescription::default()
        };

        let engine = rt.open(&scene).unwrap();
        assert!(rt.get_model(engine, SceneId(1)).is_none());
        assert!(rt.engine(engine).unwrap().models.is_empty());
    }

    #[test]
    fn test_call_expansion_clones_target() {
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
                        ports: vec![port(PortalCategory::Input, "run")],
                    })],
                    ..GraphDescription::default()
                },
                GraphDescription {
                    id: SceneId(2),
                    name: "sub".into(),
                    entries: vec![EntryDescription::Port(port(PortalCategory::Input, "run"))],
                    ..GraphDescription::default()
                },
            ],
            ..SceneDescription::default()
        };

        let engine = rt.open(&scene).unwrap();
        let main = rt.engine(engine).unwrap().graphs[0];
        let sub = rt.engine(engine).unwrap().graphs[1];
        let call = rt.node(main).unwrap().as_graph().unwrap().children[0];
        let instance = rt.node(call).unwrap().as_call().unwrap().instance.unwrap();
        assert_ne!(instance, sub);
        assert_eq!(rt.node(instance).unwrap().portal_index("run"), Some(0));
    }

    #[test]
    fn test_recursive_call_is_rejected() {
        let mut rt = Runtime::new();
        let scene = SceneDescription {
            graphs: vec![GraphDescription {
                id: SceneId(1),
                name: "loop".into(),
                entries: vec![EntryDescription::Node(NodeDescription {
                    id: SceneId(10),
                    alias: "self-call".into(),
                    kind: "subgraph-call".into(),
                    target: Some(SceneId(1)),
                    ports: vec![],
                })],
                ..GraphDescription::default()
            }],
            ..SceneDescription::default()
        };

        let err = rt.open(&scene).unwrap_err();
        assert_eq!(err, LoadError::RecursiveCall(SceneId(1)));
        assert_eq!(rt.engine_count(), 0);
    }

    #[test]
    fn test_missing_call_target_is_rejected() {
        let mut rt = Runtime::new();
        let scene = scene_one_graph(
            vec![EntryDescription::Node(NodeDescription {
                id: SceneId(10),
                alias: "broken".into(),
                kind: "subgraph-call".into(),
                target: None,
                ports: vec![],
            })],
            vec![],
        );

        let err = rt.open(&scene).unwrap_err();
        assert_eq!(err, LoadError::MissingCallTarget("broken".into()));
    }
}
