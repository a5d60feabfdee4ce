// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topology of provisioned entities.
//!
//! Entities start *pending* when their compute resource exists and become
//! *wired* once a route places them under a parent that is itself wired.
//! Everything wired hangs off one synthetic root:
//!
//! ```text
//! root
//!  └── server
//!       └── router (monitored NF)
//!            └── client
//! ```
//!
//! Removing a wired entity is refused while any of its children has no other
//! parent, so a leaf is never stranded without a path to the root.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use thiserror::Error;

/// Id of the synthetic root entity.
pub const ROOT_ID: &str = "";

/// Topology errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("entity id already exists: {0}")]
    IdAlreadyExists(String),

    #[error("entity id not found: {0}")]
    IdNotFound(String),

    #[error("invalid topology state for {0}")]
    InvalidState(String),

    #[error("removing {id} would orphan {child}")]
    OrphanChild { id: String, child: String },
}

/// A provisioned compute unit with its network identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entity {
    /// Unique entity id (container name).
    pub id: String,

    /// Address on the fabric.
    pub ip: Ipv4Addr,

    /// MAC address on the fabric.
    pub mac: String,

    /// Host the compute resource runs on.
    pub host: String,
}

impl Entity {
    /// Create a new entity.
    pub fn new(
        id: impl Into<String>,
        ip: Ipv4Addr,
        mac: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            ip,
            mac: mac.into(),
            host: host.into(),
        }
    }

    fn root() -> Self {
        Self::new(ROOT_ID, Ipv4Addr::UNSPECIFIED, "", "")
    }
}

#[derive(Debug)]
struct Node {
    entity: Entity,
    parents: BTreeSet<String>,
    children: BTreeSet<String>,
}

impl Node {
    fn new(entity: Entity) -> Self {
        Self {
            entity,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
        }
    }
}

/// Tree of wired entities plus the set of entities not wired yet.
#[derive(Debug)]
pub struct Topology {
    /// Entities reachable from the root, including the root itself.
    wired: HashMap<String, Node>,

    /// Entities created but not placed in the tree yet.
    pending: HashMap<String, Node>,
}

impl Topology {
    /// Create a topology holding only the root.
    pub fn new() -> Self {
        let mut wired = HashMap::new();
        wired.insert(ROOT_ID.to_string(), Node::new(Entity::root()));
        Self {
            wired,
            pending: HashMap::new(),
        }
    }

    /// Register a freshly provisioned entity as pending.
    pub fn new_entity(&mut self, entity: Entity) -> Result<(), TopologyError> {
        if self.contains(&entity.id) {
            return Err(TopologyError::IdAlreadyExists(entity.id));
        }

        self.pending.insert(entity.id.clone(), Node::new(entity));
        Ok(())
    }

    /// Place a pending entity under a wired parent.
    pub fn wire(&mut self, child: &str, parent: &str) -> Result<(), TopologyError> {
        if !self.pending.contains_key(child) {
            return Err(TopologyError::IdNotFound(child.to_string()));
        }
        if !self.wired.contains_key(parent) {
            return Err(TopologyError::IdNotFound(parent.to_string()));
        }

        if self.wired.contains_key(child) {
            return Err(TopologyError::InvalidState(child.to_string()));
        }
        if self.pending.contains_key(parent) {
            return Err(TopologyError::InvalidState(parent.to_string()));
        }

        let Some(mut node) = self.pending.remove(child) else {
            return Err(TopologyError::IdNotFound(child.to_string()));
        };
        node.parents.insert(parent.to_string());
        if let Some(parent_node) = self.wired.get_mut(parent) {
            parent_node.children.insert(child.to_string());
        }
        self.wired.insert(child.to_string(), node);
        Ok(())
    }

    /// Check whether [`unwire`](Self::unwire) would succeed, without changing anything.
    pub fn check_unwire(&self, id: &str) -> Result<(), TopologyError> {
        if id == ROOT_ID {
            return Err(TopologyError::InvalidState("root".into()));
        }

        if self.pending.contains_key(id) {
            if self.wired.contains_key(id) {
                return Err(TopologyError::InvalidState(id.to_string()));
            }
            return Ok(());
        }

        let node = self
            .wired
            .get(id)
            .ok_or_else(|| TopologyError::IdNotFound(id.to_string()))?;

        for child in &node.children {
            let sole_parent = self
                .wired
                .get(child)
                .map_or(true, |c| c.parents.len() <= 1);
            if sole_parent {
                return Err(TopologyError::OrphanChild {
                    id: id.to_string(),
                    child: child.clone(),
                });
            }
        }

        Ok(())
    }

    /// Remove an entity, pending or wired.
    ///
    /// A wired entity keeps its place if removing it would orphan a child.
    pub fn unwire(&mut self, id: &str) -> Result<Entity, TopologyError> {
        self.check_unwire(id)?;

        if let Some(node) = self.pending.remove(id) {
            return Ok(node.entity);
        }

        let node = self
            .wired
            .remove(id)
            .ok_or_else(|| TopologyError::IdNotFound(id.to_string()))?;

        for parent in &node.parents {
            if let Some(parent_node) = self.wired.get_mut(parent) {
                parent_node.children.remove(id);
            }
        }
        for child in &node.children {
            if let Some(child_node) = self.wired.get_mut(child) {
                child_node.parents.remove(id);
            }
        }

        Ok(node.entity)
    }

    /// Take a wired entity out of the tree and make it pending again.
    pub fn unlink(&mut self, id: &str) -> Result<(), TopologyError> {
        if !self.wired.contains_key(id) {
            return Err(TopologyError::IdNotFound(id.to_string()));
        }

        let entity = self.unwire(id)?;
        self.pending.insert(id.to_string(), Node::new(entity));
        Ok(())
    }

    /// Look up an entity by id.
    pub fn lookup(&self, id: &str) -> Result<&Entity, TopologyError> {
        self.pending
            .get(id)
            .or_else(|| self.wired.get(id))
            .filter(|_| id != ROOT_ID)
            .map(|node| &node.entity)
            .ok_or_else(|| TopologyError::IdNotFound(id.to_string()))
    }

    /// IP address of an entity.
    pub fn lookup_ip(&self, id: &str) -> Result<Ipv4Addr, TopologyError> {
        self.lookup(id).map(|e| e.ip)
    }

    /// MAC address of an entity.
    pub fn lookup_mac(&self, id: &str) -> Result<&str, TopologyError> {
        self.lookup(id).map(|e| e.mac.as_str())
    }

    /// Host of an entity.
    pub fn lookup_host(&self, id: &str) -> Result<&str, TopologyError> {
        self.lookup(id).map(|e| e.host.as_str())
    }

    /// Check if an id is known, pending or wired.
    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id) || self.wired.contains_key(id)
    }

    /// Check if an entity is pending.
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    /// Check if an entity is wired.
    pub fn is_wired(&self, id: &str) -> bool {
        self.wired.contains_key(id)
    }

    /// Check if `child` is wired directly under `parent`.
    pub fn is_linked(&self, child: &str, parent: &str) -> bool {
        self.wired
            .get(child)
            .is_some_and(|node| node.parents.contains(parent))
    }

    /// Parents of a wired entity.
    pub fn parents(&self, id: &str) -> Vec<&str> {
        self.wired
            .get(id)
            .map(|node| node.parents.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Number of pending entities.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of wired entities, root excluded.
    pub fn wired_count(&self) -> usize {
        self.wired.len() - 1
    }

    /// Check if nothing but the root is left.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.wired.len() == 1
    }

    /// Ids in an order in which every entity can be removed: wired entities
    /// depth-first with children before parents, then pending ones.
    pub fn teardown_order(&self) -> Vec<String> {
        let mut order = Vec::with_capacity(self.wired.len() + self.pending.len());
        let mut visited = BTreeSet::new();
        self.post_order(ROOT_ID, &mut visited, &mut order);
        order.retain(|id| id != ROOT_ID);

        let mut pending: Vec<String> = self.pending.keys().cloned().collect();
        pending.sort();
        order.extend(pending);
        order
    }

    fn post_order(&self, id: &str, visited: &mut BTreeSet<String>, out: &mut Vec<String>) {
        if !visited.insert(id.to_string()) {
            return;
        }
        if let Some(node) = self.wired.get(id) {
            for child in &node.children {
                self.post_order(child, visited, out);
            }
        }
        out.push(id.to_string());
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(id: &str, last: u8) -> Entity {
        Entity::new(
            id,
            Ipv4Addr::new(173, 16, 1, last),
            format!("00:16:3e:00:00:{:02x}", last),
            "h1",
        )
    }

    /// root -> a -> b -> c
    fn chain() -> Topology {
        let mut topo = Topology::new();
        topo.new_entity(entity("a", 2)).unwrap();
        topo.new_entity(entity("b", 3)).unwrap();
        topo.new_entity(entity("c", 4)).unwrap();
        topo.wire("a", ROOT_ID).unwrap();
        topo.wire("b", "a").unwrap();
        topo.wire("c", "b").unwrap();
        topo
    }

    #[test]
    fn test_new_topology_is_empty() {
        let topo = Topology::new();
        assert!(topo.is_empty());
        assert_eq!(topo.wired_count(), 0);
        assert!(topo.lookup(ROOT_ID).is_err());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut topo = Topology::new();
        topo.new_entity(entity("a", 2)).unwrap();

        // Duplicate while pending.
        assert_eq!(
            topo.new_entity(entity("a", 9)),
            Err(TopologyError::IdAlreadyExists("a".into()))
        );

        // Duplicate while wired.
        topo.wire("a", ROOT_ID).unwrap();
        assert_eq!(
            topo.new_entity(entity("a", 9)),
            Err(TopologyError::IdAlreadyExists("a".into()))
        );

        // The root id is taken too.
        assert!(topo.new_entity(entity(ROOT_ID, 9)).is_err());
    }

    #[test]
    fn test_wire_moves_pending_to_wired() {
        let mut topo = Topology::new();
        topo.new_entity(entity("a", 2)).unwrap();
        assert!(topo.is_pending("a"));

        topo.wire("a", ROOT_ID).unwrap();
        assert!(topo.is_wired("a"));
        assert!(!topo.is_pending("a"));
        assert!(topo.is_linked("a", ROOT_ID));
        assert_eq!(topo.parents("a"), vec![ROOT_ID]);
    }

    #[test]
    fn test_wire_errors() {
        let mut topo = Topology::new();
        topo.new_entity(entity("a", 2)).unwrap();
        topo.new_entity(entity("b", 3)).unwrap();

        // Unknown child or parent.
        assert_eq!(
            topo.wire("x", ROOT_ID),
            Err(TopologyError::IdNotFound("x".into()))
        );
        assert_eq!(topo.wire("a", "x"), Err(TopologyError::IdNotFound("x".into())));

        // Parent still pending.
        assert_eq!(topo.wire("a", "b"), Err(TopologyError::IdNotFound("b".into())));

        // Child already wired.
        topo.wire("a", ROOT_ID).unwrap();
        assert_eq!(
            topo.wire("a", ROOT_ID),
            Err(TopologyError::IdNotFound("a".into()))
        );
    }

    #[test]
    fn test_orphan_safety() {
        let mut topo = chain();

        assert_eq!(
            topo.unwire("b"),
            Err(TopologyError::OrphanChild {
                id: "b".into(),
                child: "c".into()
            })
        );
        // Rejected delete leaves everything in place.
        assert!(topo.is_linked("c", "b"));
        assert!(topo.is_linked("b", "a"));

        let c = topo.unwire("c").unwrap();
        assert_eq!(c.id, "c");
        topo.unwire("b").unwrap();
        topo.unwire("a").unwrap();
        assert!(topo.is_empty());
    }

    #[test]
    fn test_unwire_removes_child_links() {
        let mut topo = chain();
        topo.unwire("c").unwrap();
        assert!(topo.check_unwire("b").is_ok());
        assert!(topo.lookup("c").is_err());
    }

    #[test]
    fn test_unwire_pending_and_unknown() {
        let mut topo = Topology::new();
        topo.new_entity(entity("p", 2)).unwrap();
        assert_eq!(topo.unwire("p").unwrap().id, "p");
        assert_eq!(topo.unwire("p"), Err(TopologyError::IdNotFound("p".into())));
        assert!(matches!(
            topo.unwire(ROOT_ID),
            Err(TopologyError::InvalidState(_))
        ));
    }

    #[test]
    fn test_unlink_returns_to_pending() {
        let mut topo = chain();
        assert!(matches!(
            topo.unlink("b"),
            Err(TopologyError::OrphanChild { .. })
        ));

        topo.unlink("c").unwrap();
        assert!(topo.is_pending("c"));
        assert!(!topo.is_linked("c", "b"));
        topo.wire("c", "a").unwrap();
        assert!(topo.is_linked("c", "a"));

        assert_eq!(topo.unlink("zz"), Err(TopologyError::IdNotFound("zz".into())));
    }

    #[test]
    fn test_lookup_accessors() {
        let mut topo = chain();
        topo.new_entity(entity("p", 9)).unwrap();

        assert_eq!(topo.lookup_ip("b").unwrap(), Ipv4Addr::new(173, 16, 1, 3));
        assert_eq!(topo.lookup_mac("p").unwrap(), "00:16:3e:00:00:09");
        assert_eq!(topo.lookup_host("c").unwrap(), "h1");
        assert_eq!(
            topo.lookup_ip("zz"),
            Err(TopologyError::IdNotFound("zz".into()))
        );
    }

    #[test]
    fn test_teardown_order_children_first() {
        let mut topo = chain();
        topo.new_entity(entity("d", 5)).unwrap();
        topo.wire("d", "a").unwrap();
        topo.new_entity(entity("p", 9)).unwrap();

        let order = topo.teardown_order();
        assert_eq!(order.len(), 5);
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("c") < pos("b"));
        assert!(pos("b") < pos("a"));
        assert!(pos("d") < pos("a"));
        assert_eq!(order.last().map(String::as_str), Some("p"));

        // Removing in that order always succeeds.
        for id in order {
            topo.unwire(&id).unwrap();
        }
        assert!(topo.is_empty());
    }
}
