//! Strongly typed identifier wrappers.
//!
//! Kernel-internal ids (events, processes, resources, requests, containers)
//! are `u64` counters handed out by the environment in creation order, so two
//! runs that build the same model see the same ids.  Model-level ids
//! (activities, entities) wrap a UUID because they are user-visible and must
//! stay unique across independently built object graphs.

use std::fmt;

use uuid::Uuid;

/// Generate a typed ID wrapper around a primitive integer.
macro_rules! typed_id {
    ($(#[$attr:meta])* $vis:vis struct $name:ident($inner:ty);) => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        $vis struct $name(pub $inner);

        impl $name {
            /// Sentinel meaning "no valid ID".
            pub const INVALID: $name = $name(<$inner>::MAX);

            /// The raw counter value.
            #[inline(always)]
            pub fn get(self) -> $inner {
                self.0
            }
        }

        impl Default for $name {
            /// Returns the `INVALID` sentinel so uninitialized IDs are visibly invalid.
            #[inline(always)]
            fn default() -> Self {
                Self::INVALID
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

/// Generate a typed wrapper around a UUID.
macro_rules! uuid_id {
    ($(#[$attr:meta])* $vis:vis struct $name:ident;) => {
        $(#[$attr])*
        #[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        $vis struct $name(pub Uuid);

        impl $name {
            /// A fresh random (v4) id.
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse the hyphenated textual form.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(s).map(Self)
            }

            #[inline]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

typed_id! {
    /// Identity of a one-shot event.  Assigned in creation order.
    pub struct EventId(u64);
}

typed_id! {
    /// Identity of a cooperative process driven by the event loop.
    pub struct ProcessId(u64);
}

typed_id! {
    /// Identity of a bounded-capacity resource.
    pub struct ResourceId(u64);
}

typed_id! {
    /// Identity of one request made against a resource.
    pub struct RequestId(u64);
}

typed_id! {
    /// Identity of a container (a bag of slots).
    pub struct ContainerId(u64);
}

uuid_id! {
    /// Unique id of an activity in the process tree.
    pub struct ActivityId;
}

uuid_id! {
    /// Unique id of a simulation object (site, vessel, …).
    pub struct EntityId;
}
