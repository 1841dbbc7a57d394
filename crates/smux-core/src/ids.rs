//! Process-lifetime unique identifiers.
//!
//! Every resource kind gets its own `u64` newtype so ids cannot be mixed
//! up across registries. Ids are allocated monotonically and never reused
//! within a server process, which keeps freed-and-recreated resources
//! distinguishable in logs.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Returns the raw id value.
            pub fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifies a project.
    ProjectId
);
define_id!(
    /// Identifies a session.
    SessionId
);
define_id!(
    /// Identifies a window.
    WindowId
);
define_id!(
    /// Identifies a pane within a window.
    PaneId
);
define_id!(
    /// Identifies a connected client.
    ClientId
);

impl ProjectId {
    /// Parses the `#<id>` reference form used in command targets.
    pub fn parse_ref(s: &str) -> Option<Self> {
        let digits = s.strip_prefix('#')?;
        digits.parse().ok().map(ProjectId)
    }
}

/// Monotonic id source shared by a single store.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    /// Returns the next id, advancing the counter.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Returns the id the next allocation will produce.
    pub fn peek(&self) -> u64 {
        self.next
    }
}
