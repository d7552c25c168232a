//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Records that are created by the core itself (parsed action requests,
//! predictions) carry a strongly-typed UUID v7 so they can be referenced
//! from logs and observables without ambiguity. Experiment and instance
//! identifiers are operator-chosen strings and are not wrapped here.

use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
        #[ts(export, export_to = "bindings/")]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a parsed operator action request.
    ActionId
}

define_id! {
    /// Unique identifier for a self-prediction.
    PredictionId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_ordered() {
        let a = ActionId::new();
        let b = ActionId::new();
        assert_ne!(a, b);
        assert!(a <= b);
    }

    #[test]
    fn id_round_trips_through_uuid() {
        let id = PredictionId::new();
        let raw: Uuid = id.into();
        assert_eq!(PredictionId::from(raw), id);
        assert_eq!(id.to_string(), raw.to_string());
    }
}
