//! Model structure: an arena of nodes and the links between their ports.
//!
//! A [`Model`] owns every node of a simulation, indexed by [`NodeId`] in
//! creation order. The root ([`ROOT`], named `top`) is a composite node
//! without ports; composite nodes group children and declare links:
//!
//! - **inward**: from an input port of the composite to an input port of one
//!   of its children;
//! - **inner**: from an output port of a child to an input port of a child;
//! - **outward**: from an output port of a child to an output port of the
//!   composite.
//!
//! Links are stored in a [`LinkTable`] keyed by source port. Composite ports
//! are only relays: before a run the driver follows links through them to
//! find the leaf ports that actually receive each value.
//!
//! # Example
//!
//! ```rust
//! use jikoku::nodes::{PeriodicNode, StatisticNode};
//! use jikoku::structure::{Model, ROOT};
//! use jikoku::time::Duration;
//!
//! let mut model = Model::new();
//! let clock = model.add_atomic(ROOT, "clock", PeriodicNode::new(Duration::seconds(5))).unwrap();
//! let ticks = model.add_statistic(ROOT, "ticks").unwrap();
//! model.link_inner(ROOT, clock, "count", ticks, "statistic").unwrap();
//!
//! assert_eq!(model.full_name(clock), Some("top.clock"));
//! assert_eq!(model.find("top.ticks"), Some(ticks));
//! ```

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::collection::{Collection, CollectionNode};
use crate::error::{SimError, SimResult};
use crate::node::{AtomicNode, FunctionNode, NodeKind};
use crate::nodes::{ParameterNode, StatisticNode};
use crate::port::{DataGoal, NodeInterface};
use crate::trace::TraceFlags;
use crate::types::{Endpoint, NodeId};

/// Id of the root composite node.
pub const ROOT: NodeId = 0;

/// Default name of the root node.
pub const ROOT_NAME: &str = "top";

/// Behaviour of a node.
pub(crate) enum NodeBody {
    Composite,
    Atomic(Box<dyn AtomicNode>),
    Function(Box<dyn FunctionNode>),
}

/// One slot of the arena.
pub(crate) struct NodeEntry {
    pub(crate) name: String,
    pub(crate) full_name: String,
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) interface: NodeInterface,
    pub(crate) flags: TraceFlags,
    pub(crate) body: NodeBody,
}

/// Links from source ports to destination ports.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkTable {
    links: BTreeMap<Endpoint, Vec<Endpoint>>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a link. Returns `false` if it already existed.
    pub fn add(&mut self, src: Endpoint, dst: Endpoint) -> bool {
        let dsts = self.links.entry(src).or_default();
        if dsts.contains(&dst) {
            return false;
        }
        dsts.push(dst);
        true
    }

    /// Destinations linked directly from port `port` of node `node`, in
    /// declaration order.
    pub fn destinations(&self, node: NodeId, port: &str) -> &[Endpoint] {
        self.links
            .get(&(node, port.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of links.
    pub fn len(&self) -> usize {
        self.links.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// All links as `(source, destination)` pairs, ordered by source.
    pub fn iter(&self) -> impl Iterator<Item = (&Endpoint, &Endpoint)> + '_ {
        self.links
            .iter()
            .flat_map(|(src, dsts)| dsts.iter().map(move |dst| (src, dst)))
    }
}

/// Leaf ports reached from a source port, plus the composite ports passed
/// through on the way.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Route {
    pub(crate) leaves: Vec<Endpoint>,
    pub(crate) relays: Vec<Endpoint>,
}

/// Arena of nodes and their links.
pub struct Model {
    nodes: Vec<NodeEntry>,
    links: LinkTable,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    /// A model holding only the root node `top`.
    pub fn new() -> Self {
        Self::with_root_name(ROOT_NAME)
    }

    /// A model whose root node has the given name.
    pub fn with_root_name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            nodes: vec![NodeEntry {
                full_name: name.clone(),
                name,
                kind: NodeKind::Composite,
                parent: None,
                children: Vec::new(),
                interface: NodeInterface::new(),
                flags: TraceFlags::none(),
                body: NodeBody::Composite,
            }],
            links: LinkTable::new(),
        }
    }

    fn add_entry(
        &mut self,
        parent: NodeId,
        name: &str,
        kind: NodeKind,
        interface: NodeInterface,
        body: NodeBody,
    ) -> SimResult<NodeId> {
        let parent_entry = self.composite(parent)?;
        if name.is_empty() {
            return Err(SimError::logic("Node name must not be empty"));
        }
        if name.contains('.') || name.contains('#') {
            return Err(SimError::logic(format!(
                "Node name ({}) must not contain '.' or '#'",
                name
            )));
        }
        if parent_entry
            .children
            .iter()
            .any(|&child| self.nodes[child].name == name)
        {
            return Err(SimError::logic(format!(
                "Node name ({}) already used in composite node ({})",
                name, parent_entry.full_name
            )));
        }
        interface.validate()?;
        let full_name = format!("{}.{}", parent_entry.full_name, name);
        let flags = parent_entry.flags;
        let id = self.nodes.len();
        self.nodes.push(NodeEntry {
            name: name.to_string(),
            full_name,
            kind,
            parent: Some(parent),
            children: Vec::new(),
            interface,
            flags,
            body,
        });
        self.nodes[parent].children.push(id);
        Ok(id)
    }

    fn composite(&self, id: NodeId) -> SimResult<&NodeEntry> {
        let entry = self.entry(id)?;
        if entry.kind != NodeKind::Composite {
            return Err(SimError::logic(format!(
                "Node ({}) is not a composite node",
                entry.full_name
            )));
        }
        Ok(entry)
    }

    pub(crate) fn entry(&self, id: NodeId) -> SimResult<&NodeEntry> {
        self.nodes
            .get(id)
            .ok_or_else(|| SimError::logic(format!("Node id ({}) does not exist", id)))
    }

    pub(crate) fn entry_mut(&mut self, id: NodeId) -> SimResult<&mut NodeEntry> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| SimError::logic(format!("Node id ({}) does not exist", id)))
    }

    /// Adds a composite child with the given ports.
    pub fn add_composite(
        &mut self,
        parent: NodeId,
        name: &str,
        interface: NodeInterface,
    ) -> SimResult<NodeId> {
        self.add_entry(parent, name, NodeKind::Composite, interface, NodeBody::Composite)
    }

    pub fn add_atomic<N: AtomicNode + 'static>(
        &mut self,
        parent: NodeId,
        name: &str,
        node: N,
    ) -> SimResult<NodeId> {
        let interface = node.interface();
        self.add_entry(parent, name, NodeKind::Atomic, interface, NodeBody::Atomic(Box::new(node)))
    }

    pub fn add_function<N: FunctionNode + 'static>(
        &mut self,
        parent: NodeId,
        name: &str,
        node: N,
    ) -> SimResult<NodeId> {
        let interface = node.interface();
        if interface.has_message_ports() {
            return Err(SimError::logic(format!(
                "Function node ({}) must not declare message ports",
                name
            )));
        }
        self.add_entry(
            parent,
            name,
            NodeKind::Function,
            interface,
            NodeBody::Function(Box::new(node)),
        )
    }

    pub fn add_collection<C: CollectionNode + 'static>(
        &mut self,
        parent: NodeId,
        name: &str,
        collection: Collection<C>,
    ) -> SimResult<NodeId> {
        collection.prototype().validate()?;
        let interface = collection.interface();
        self.add_entry(
            parent,
            name,
            NodeKind::Collection,
            interface,
            NodeBody::Atomic(Box::new(collection)),
        )
    }

    /// Adds a [`ParameterNode`] holding `value`.
    pub fn add_parameter<T: Serialize>(
        &mut self,
        parent: NodeId,
        name: &str,
        value: T,
    ) -> SimResult<NodeId> {
        self.add_function(parent, name, ParameterNode::with_value(value)?)
    }

    /// Adds an empty [`StatisticNode`].
    pub fn add_statistic(&mut self, parent: NodeId, name: &str) -> SimResult<NodeId> {
        self.add_function(parent, name, StatisticNode::new())
    }

    fn link(&mut self, src: Endpoint, dst: Endpoint) -> SimResult<()> {
        let src_spec = self.nodes[src.0].interface.port(&src.1).cloned();
        let dst_spec = self.nodes[dst.0].interface.port(&dst.1).cloned();
        let (Some(src_spec), Some(dst_spec)) = (src_spec, dst_spec) else {
            let (node, port) = if self.nodes[src.0].interface.port(&src.1).is_none() {
                (&self.nodes[src.0].full_name, &src.1)
            } else {
                (&self.nodes[dst.0].full_name, &dst.1)
            };
            return Err(SimError::logic(format!(
                "Attempt to link port ({}), which is not a port of node ({})",
                port, node
            )));
        };
        if src_spec.mode != dst_spec.mode {
            return Err(SimError::logic(format!(
                "Attempt to link {} port ({}) of node ({}) to {} port ({}) of node ({})",
                src_spec.mode,
                src.1,
                self.nodes[src.0].full_name,
                dst_spec.mode,
                dst.1,
                self.nodes[dst.0].full_name
            )));
        }
        let description = format!(
            "Link from port ({}) of node ({}) to port ({}) of node ({}) already exists",
            src.1, self.nodes[src.0].full_name, dst.1, self.nodes[dst.0].full_name
        );
        if !self.links.add(src, dst) {
            return Err(SimError::logic(description));
        }
        Ok(())
    }

    fn is_child(&self, parent: NodeId, node: NodeId) -> bool {
        self.nodes.get(node).and_then(|entry| entry.parent) == Some(parent)
    }

    fn has_port(&self, node: NodeId, port: &str, goal: DataGoal) -> bool {
        self.nodes
            .get(node)
            .and_then(|entry| entry.interface.port(port))
            .map_or(false, |spec| spec.goal == goal)
    }

    /// Links input port `src_port` of composite `parent` to input port
    /// `dst_port` of its child `dst`.
    pub fn link_inward(
        &mut self,
        parent: NodeId,
        src_port: &str,
        dst: NodeId,
        dst_port: &str,
    ) -> SimResult<()> {
        let full_name = self.composite(parent)?.full_name.clone();
        if !self.has_port(parent, src_port, DataGoal::Input) {
            return Err(SimError::logic(format!(
                "Attempt to create inward link on composite node ({}) that does not originate from one of the composite node's ports",
                full_name
            )));
        }
        if !self.is_child(parent, dst) || !self.has_port(dst, dst_port, DataGoal::Input) {
            return Err(SimError::logic(format!(
                "Attempt to create inward link on composite node ({}) that does not end up at one of the composite node's components",
                full_name
            )));
        }
        self.link((parent, src_port.to_string()), (dst, dst_port.to_string()))
    }

    /// Links output port `src_port` of child `src` to input port `dst_port`
    /// of child `dst`, both children of `parent`.
    pub fn link_inner(
        &mut self,
        parent: NodeId,
        src: NodeId,
        src_port: &str,
        dst: NodeId,
        dst_port: &str,
    ) -> SimResult<()> {
        let full_name = self.composite(parent)?.full_name.clone();
        if !self.is_child(parent, src) || !self.has_port(src, src_port, DataGoal::Output) {
            return Err(SimError::logic(format!(
                "Attempt to create inner link on composite node ({}) that does not originate from one of the composite node's components",
                full_name
            )));
        }
        if !self.is_child(parent, dst) || !self.has_port(dst, dst_port, DataGoal::Input) {
            return Err(SimError::logic(format!(
                "Attempt to create inner link on composite node ({}) that does not end up at one of the composite node's components",
                full_name
            )));
        }
        self.link((src, src_port.to_string()), (dst, dst_port.to_string()))
    }

    /// Links output port `src_port` of child `src` to output port `dst_port`
    /// of composite `parent`.
    pub fn link_outward(
        &mut self,
        parent: NodeId,
        src: NodeId,
        src_port: &str,
        dst_port: &str,
    ) -> SimResult<()> {
        let full_name = self.composite(parent)?.full_name.clone();
        if !self.is_child(parent, src) || !self.has_port(src, src_port, DataGoal::Output) {
            return Err(SimError::logic(format!(
                "Attempt to create outward link on composite node ({}) that does not originate from one of the composite node's components",
                full_name
            )));
        }
        if !self.has_port(parent, dst_port, DataGoal::Output) {
            return Err(SimError::logic(format!(
                "Attempt to create outward link on composite node ({}) that does not end up at one of the composite node's ports",
                full_name
            )));
        }
        self.link((src, src_port.to_string()), (parent, dst_port.to_string()))
    }

    /// Sets the trace flags of `id` and all its descendants.
    pub fn set_trace_flags(&mut self, id: NodeId, flags: TraceFlags) -> SimResult<()> {
        self.entry(id)?;
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            let entry = &mut self.nodes[next];
            entry.flags = flags;
            pending.extend(entry.children.iter().copied());
        }
        Ok(())
    }

    /// Number of nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: a model has at least its root.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id).map(|entry| entry.name.as_str())
    }

    /// Dot-separated name from the root, e.g. `top.queue.server`.
    pub fn full_name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id).map(|entry| entry.full_name.as_str())
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(id).map(|entry| entry.kind)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id).and_then(|entry| entry.parent)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id)
            .map(|entry| entry.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn interface(&self, id: NodeId) -> Option<&NodeInterface> {
        self.nodes.get(id).map(|entry| &entry.interface)
    }

    pub fn trace_flags(&self, id: NodeId) -> Option<TraceFlags> {
        self.nodes.get(id).map(|entry| entry.flags)
    }

    /// Id of the node with the given full name.
    pub fn find(&self, full_name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|entry| entry.full_name == full_name)
    }

    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    /// Ids of leaf nodes in creation order.
    pub fn leaf_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.kind.is_leaf())
            .map(|(id, _)| id)
    }

    /// The atomic or function node `id`, if it is of type `N`.
    ///
    /// Collections are returned as [`Collection<C>`](crate::collection::Collection).
    pub fn node<N: 'static>(&self, id: NodeId) -> Option<&N> {
        match &self.nodes.get(id)?.body {
            NodeBody::Atomic(node) => node.as_ref().as_any().downcast_ref::<N>(),
            NodeBody::Function(node) => node.as_ref().as_any().downcast_ref::<N>(),
            NodeBody::Composite => None,
        }
    }

    pub fn node_mut<N: 'static>(&mut self, id: NodeId) -> Option<&mut N> {
        match &mut self.nodes.get_mut(id)?.body {
            NodeBody::Atomic(node) => node.as_mut().as_any_mut().downcast_mut::<N>(),
            NodeBody::Function(node) => node.as_mut().as_any_mut().downcast_mut::<N>(),
            NodeBody::Composite => None,
        }
    }

    /// Follows links from port `port` of `node` through composite ports down
    /// to leaf input ports.
    ///
    /// Leaves are ordered by node id, then by port declaration index.
    pub(crate) fn resolve(&self, node: NodeId, port: &str) -> Route {
        let mut leaves = BTreeSet::new();
        let mut relays = Vec::new();
        let mut visited = BTreeSet::new();
        let mut pending: Vec<Endpoint> = self.links.destinations(node, port).to_vec();
        while let Some(dst) = pending.pop() {
            if !visited.insert(dst.clone()) {
                continue;
            }
            let entry = &self.nodes[dst.0];
            if entry.kind.is_leaf() {
                let index = entry.interface.index_of(&dst.1).unwrap_or(usize::MAX);
                leaves.insert((dst.0, index, dst.1));
            } else {
                pending.extend(self.links.destinations(dst.0, &dst.1).iter().cloned());
                relays.push(dst);
            }
        }
        relays.sort();
        Route {
            leaves: leaves
                .into_iter()
                .map(|(node, _, port)| (node, port))
                .collect(),
            relays,
        }
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("nodes", &self.nodes.len())
            .field("links", &self.links.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{PeriodicNode, RelayNode};
    use crate::time::Duration;

    fn pipeline() -> (Model, NodeId, NodeId, NodeId) {
        let mut model = Model::new();
        let stage = model
            .add_composite(
                ROOT,
                "stage",
                NodeInterface::new()
                    .with_message_input("in")
                    .with_message_output("out"),
            )
            .unwrap();
        let relay = model.add_atomic(stage, "relay", RelayNode::new()).unwrap();
        model.link_inward(stage, "in", relay, "in").unwrap();
        model.link_outward(stage, relay, "out", "out").unwrap();
        let source = model
            .add_atomic(ROOT, "source", PeriodicNode::new(Duration::seconds(1)))
            .unwrap();
        (model, stage, relay, source)
    }

    #[test]
    fn test_names_and_hierarchy() {
        let (model, stage, relay, source) = pipeline();
        assert_eq!(model.len(), 4);
        assert_eq!(model.full_name(ROOT), Some("top"));
        assert_eq!(model.full_name(relay), Some("top.stage.relay"));
        assert_eq!(model.parent(relay), Some(stage));
        assert_eq!(model.children(ROOT), &[stage, source]);
        assert_eq!(model.kind(stage), Some(NodeKind::Composite));
        assert_eq!(model.find("top.source"), Some(source));
        assert_eq!(model.leaf_ids().collect::<Vec<_>>(), vec![relay, source]);
        assert!(model.node::<RelayNode>(relay).is_some());
        assert!(model.node::<PeriodicNode>(relay).is_none());
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut model = Model::new();
        model.add_atomic(ROOT, "a", RelayNode::new()).unwrap();
        let err = model.add_atomic(ROOT, "a", RelayNode::new()).unwrap_err();
        assert_eq!(err.to_string(), "Node name (a) already used in composite node (top)");
        assert!(model.add_atomic(ROOT, "b.c", RelayNode::new()).is_err());
        assert!(model.add_atomic(ROOT, "", RelayNode::new()).is_err());
        let err = model.add_atomic(1, "d", RelayNode::new()).unwrap_err();
        assert_eq!(err.to_string(), "Node (top.a) is not a composite node");
    }

    #[test]
    fn test_link_errors() {
        let (mut model, stage, relay, source) = pipeline();
        let err = model.link_inward(stage, "out", relay, "in").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Attempt to create inward link on composite node (top.stage) that does not originate from one of the composite node's ports"
        );
        let err = model.link_inward(stage, "in", source, "in").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Attempt to create inward link on composite node (top.stage) that does not end up at one of the composite node's components"
        );
        let err = model.link_inner(ROOT, relay, "out", stage, "in").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Attempt to create inner link on composite node (top) that does not originate from one of the composite node's components"
        );
        let err = model.link_outward(stage, relay, "out", "in").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Attempt to create outward link on composite node (top.stage) that does not end up at one of the composite node's ports"
        );
        let err = model.link_outward(stage, relay, "out", "out").unwrap_err();
        assert!(err.to_string().contains("already exists"));
        let err = model.link_inner(ROOT, source, "count", stage, "in").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Attempt to link flow port (count) of node (top.source) to message port (in) of node (top.stage)"
        );
    }

    #[test]
    fn test_resolve_through_composites() {
        let (mut model, stage, relay, source) = pipeline();
        model.link_inner(ROOT, source, "tick", stage, "in").unwrap();
        let route = model.resolve(source, "tick");
        assert_eq!(route.leaves, vec![(relay, "in".to_string())]);
        assert_eq!(route.relays, vec![(stage, "in".to_string())]);
        assert!(model.resolve(relay, "out").leaves.is_empty());
        assert_eq!(model.links().len(), 3);
    }

    #[test]
    fn test_trace_flags_cascade() {
        let (mut model, stage, relay, source) = pipeline();
        model.set_trace_flags(stage, TraceFlags::all()).unwrap();
        assert_eq!(model.trace_flags(relay), Some(TraceFlags::all()));
        assert_eq!(model.trace_flags(source), Some(TraceFlags::none()));
        let late = model.add_atomic(stage, "late", RelayNode::new()).unwrap();
        assert_eq!(model.trace_flags(late), Some(TraceFlags::all()));
    }
}
