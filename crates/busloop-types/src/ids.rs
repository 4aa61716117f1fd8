//! Type-safe index wrappers for stops and buses.
//!
//! Stops and buses are addressed by their position in the route's
//! fixed-size tables. Wrapping the raw `usize` keeps a bus index from
//! being used to look up a stop by accident.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around a `usize` table index.
macro_rules! define_index {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub usize);

        impl $name {
            /// Return the raw table index.
            pub const fn get(self) -> usize {
                self.0
            }

            /// Human-readable name, e.g. `"stop 3"`.
            pub fn name(self) -> String {
                format!(concat!($label, " {}"), self.0)
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<usize> for $name {
            fn from(index: usize) -> Self {
                Self(index)
            }
        }
    };
}

define_index!(
    /// Index of a stop on the loop, in `0..stop_count`.
    StopIndex, "stop"
);

define_index!(
    /// Index of a bus in the fleet, in `0..bus_count`.
    BusIndex, "bus"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_label() {
        assert_eq!(StopIndex(3).name(), "stop 3");
        assert_eq!(BusIndex(0).name(), "bus 0");
    }

    #[test]
    fn serializes_as_bare_number() {
        let json = serde_json::to_string(&StopIndex(7)).ok();
        assert_eq!(json.as_deref(), Some("7"));
    }
}
