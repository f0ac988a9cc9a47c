// SPDX-License-Identifier: MIT OR Apache-2.0
//! Links: directed, optionally delayed wires between two portals.

use crate::portal::PortalRef;
use crate::scene::SceneId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique runtime identifier for a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkKey(pub Uuid);

impl LinkKey {
    /// Create a new random link key
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LinkKey {
    fn default() -> Self {
        Self::new()
    }
}

/// A directed edge between two portals.
///
/// A link with zero delay fires synchronously from [`go`]; a link with a
/// nonzero delay is registered in the active-item set instead and fires
/// after exactly `delay` ticks of membership.
///
/// A link is referenced (not owned) by both endpoint portals. Disposing
/// either endpoint node disposes the link.
///
/// [`go`]: crate::runtime::Runtime::go
#[derive(Debug, Clone)]
pub struct Link {
    /// Runtime key
    pub key: LinkKey,
    /// Id authored in the scene, if the link came from one
    pub scene_id: Option<SceneId>,
    /// Start endpoint
    pub start: PortalRef,
    /// End endpoint
    pub end: PortalRef,
    /// Tick delay before firing; zero means synchronous
    pub delay: u32,
    /// Ticks elapsed since the link was registered in the active set
    pub elapsed: u32,
}

impl Link {
    /// Create a link between two endpoints.
    pub fn new(start: PortalRef, end: PortalRef, delay: u32) -> Self {
        Self {
            key: LinkKey::new(),
            scene_id: None,
            start,
            end,
            delay,
            elapsed: 0,
        }
    }
}
