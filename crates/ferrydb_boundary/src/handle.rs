//! Opaque, type-tagged handles for engine-owned resources.
//!
//! A handle is an unforgeable identity: it carries no data beyond a random
//! 128-bit id, compares by identity, and is meaningful only to the engine
//! that registered it. Each resource kind gets its own type, so passing a
//! document handle where a query handle is expected is a compile error
//! rather than a runtime one.

use std::fmt;
use uuid::Uuid;

fn short(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// An opaque reference to an engine-owned open database.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DatabaseHandle(Uuid);

/// An opaque reference to an engine-owned document instance.
///
/// The same handle type covers immutable snapshots and mutable drafts;
/// which one a handle refers to is decided by the engine call that minted
/// it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DocumentHandle(Uuid);

/// An opaque reference to a compiled query.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct QueryHandle(Uuid);

/// An opaque reference to a replicator instance.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ReplicatorHandle(Uuid);

/// An opaque token identifying one registered change listener.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ListenerToken(Uuid);

macro_rules! impl_handle {
    ($name:ident, $label:literal) => {
        impl $name {
            /// Mints a fresh handle identity.
            ///
            /// Engine implementations mint handles when they register a
            /// resource. A handle that no engine has registered refers to
            /// nothing, so minting outside an engine is harmless.
            #[must_use]
            pub fn mint() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "({})"), short(&self.0))
            }
        }
    };
}

impl_handle!(DatabaseHandle, "DatabaseHandle");
impl_handle!(DocumentHandle, "DocumentHandle");
impl_handle!(QueryHandle, "QueryHandle");
impl_handle!(ReplicatorHandle, "ReplicatorHandle");
impl_handle!(ListenerToken, "ListenerToken");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_compare_by_identity() {
        let a = DatabaseHandle::mint();
        let b = DatabaseHandle::mint();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn handles_are_hashable() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        let h = DocumentHandle::mint();
        set.insert(h.clone());
        assert!(set.contains(&h));
        assert!(!set.contains(&DocumentHandle::mint()));
    }

    #[test]
    fn debug_shows_kind_and_short_id() {
        let h = QueryHandle::mint();
        let repr = format!("{h:?}");
        assert!(repr.starts_with("QueryHandle("));
        assert!(repr.ends_with(')'));
        // kind prefix + 8 hex chars + parens
        assert_eq!(repr.len(), "QueryHandle(".len() + 8 + 1);
    }
}
