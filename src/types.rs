//! Core type definitions shared across the engine.

/// Index of a node in a [`Model`](crate::structure::Model) arena.
///
/// Ids are handed out in creation order, which is also the order in which
/// simultaneous events are processed.
pub type NodeId = usize;

/// Identifier of a scheduled event in a time queue or time cache.
pub use crate::time::time_queue::EventId;

/// Port name, unique within a node's interface.
pub type PortName = String;

/// Value carried by a port.
///
/// Values are JSON documents so that any `serde` type can travel between
/// nodes without the engine knowing about it.
pub type PortValue = serde_json::Value;

/// A port of a specific node.
pub type Endpoint = (NodeId, PortName);
