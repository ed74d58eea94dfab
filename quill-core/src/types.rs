//! Strongly-typed identifiers for Quill entities.
//!
//! Explicit wrapper types prevent bugs from mixing up raw u64 values.

use std::fmt;

/// Macro to generate strongly-typed u64 wrappers.
///
/// Each wrapper provides:
/// - Type safety (a `QuorumId` cannot be passed where a `Term` is expected)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same representation as a raw u64)
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new value from a raw u64.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Returns the next value in sequence.
            ///
            /// # Panics
            /// Panics on overflow.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                assert!(self.0 < u64::MAX, "id overflow");
                Self(self.0 + 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

define_id!(QuorumId, "quorum", "Identifier for one replicated partition's quorum.");
define_id!(Term, "term", "Election epoch; monotonically increasing per quorum.");
define_id!(
    PeerRank,
    "rank",
    "Peer priority used for election tie-breaking; higher ranks are preferred leaders."
);
