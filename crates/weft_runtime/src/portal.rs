// SPDX-License-Identifier: MIT OR Apache-2.0
//! Portals: named, typed attachment points on a node.
//!
//! Each portal acts as a gate for a node: inputs and outputs carry control
//! flow, parameters and products carry data. Portals hold non-owning
//! references to the links attached to them; the links themselves live in
//! the runtime's link arena.

use crate::link::LinkKey;
use crate::node::NodeKey;
use crate::value::{Value, ValueKind};
use serde::{Deserialize, Serialize};

/// The four portal categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortalCategory {
    /// Control-flow entry point
    Input,
    /// Control-flow exit point
    Output,
    /// Incoming data
    Parameter,
    /// Outgoing data
    Product,
}

/// Addresses one portal on one node.
///
/// The portal index is stable: portals are only ever appended, and clones
/// preserve portal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortalRef {
    /// The owning node
    pub node: NodeKey,
    /// Index into the node's portal list
    pub portal: usize,
}

/// A portal on a node.
#[derive(Debug)]
pub struct Portal {
    /// Name, unique within the owning node
    pub name: String,
    /// Category
    pub category: PortalCategory,
    /// Declared value kind
    pub kind: ValueKind,
    /// Current value
    pub value: Value,
    /// Links attached to this portal, in attachment order
    pub links: Vec<LinkKey>,
}

impl Portal {
    /// Create a new portal.
    pub fn new(
        name: impl Into<String>,
        category: PortalCategory,
        value: Value,
        kind: ValueKind,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            kind,
            value,
            links: Vec::new(),
        }
    }

    /// Attach a link. Idempotent: a link is never attached twice.
    pub fn add_link(&mut self, link: LinkKey) {
        if !self.links.contains(&link) {
            self.links.push(link);
        }
    }

    /// Detach a link. Idempotent: detaching an absent link is a no-op.
    pub fn remove_link(&mut self, link: LinkKey) {
        self.links.retain(|l| *l != link);
    }
}
