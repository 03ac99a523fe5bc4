//! Identifier newtypes

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $inner:ty, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl $name {
            /// Create a new identifier
            pub const fn new(id: $inner) -> Self {
                Self(id)
            }

            /// Get the raw identifier value
            pub const fn get(&self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            fn from(id: $inner) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a schedulable action (task or internal barrier)
    ActionId,
    u64,
    "action#"
);

define_id!(
    /// Identifier of a user-submitted task
    TaskId,
    u64,
    "task#"
);

define_id!(
    /// Identifier of a logical datum tracked by the data registry
    DataId,
    u64,
    "d"
);

define_id!(
    /// Identifier of a worker known to the scheduler
    WorkerId,
    u32,
    "worker#"
);

define_id!(
    /// Identifier of a core element (the abstract method a task invokes)
    CoreId,
    u32,
    "core#"
);

define_id!(
    /// Identifier of an implementation within its core element
    ImplementationId,
    u32,
    "impl#"
);
