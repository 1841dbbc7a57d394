//! Access control for incoming connections.
//!
//! Admission is by peer uid. The daemon owner is always allowed and cannot
//! be removed; other uids must be added explicitly. A denied connection is
//! not dropped silently - the acceptor marks the client for exit with a
//! denial message so the remote end learns why.

use std::collections::HashSet;

use tracing::{debug, warn};

/// Uid allowlist with a protected owner entry.
#[derive(Debug)]
pub struct Acl {
    owner: u32,
    allowed: HashSet<u32>,
}

impl Acl {
    /// Creates an access list admitting only `owner`.
    pub fn new(owner: u32) -> Self {
        let mut allowed = HashSet::new();
        allowed.insert(owner);
        Self { owner, allowed }
    }

    /// The owning uid.
    pub fn owner(&self) -> u32 {
        self.owner
    }

    /// Admits `uid`.
    pub fn allow(&mut self, uid: u32) {
        if self.allowed.insert(uid) {
            debug!(uid, "user allowed");
        }
    }

    /// Revokes `uid`. The owner cannot be revoked.
    pub fn deny(&mut self, uid: u32) {
        if uid == self.owner {
            warn!(uid, "refusing to deny the server owner");
            return;
        }
        if self.allowed.remove(&uid) {
            debug!(uid, "user denied");
        }
    }

    /// True if a connection from `uid` may join.
    pub fn is_allowed(&self, uid: u32) -> bool {
        self.allowed.contains(&uid)
    }
}
