//! Identifier newtypes for persisted records.
//!
//! Stores are free to use any id scheme (UUIDs, database keys, ...); the crate only compares and
//! forwards them, so every id is a string underneath.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, From, Into,
            Display,
        )]
        #[serde(transparent)]
        #[display("{_0}")]
        pub struct $name(String);

        impl $name {
            /// Create an id from anything string-like.
            pub fn new(value: impl Into<String>) -> $name {
                $name(value.into())
            }

            /// Borrow the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> $name {
                $name(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl log::kv::ToValue for $name {
            fn to_value(&self) -> log::kv::Value {
                log::kv::Value::from_display(self)
            }
        }
    };
}

string_id! {
    /// Id of a persisted experiment definition.
    ExperimentId
}

string_id! {
    /// Id of an end user that receives variant assignments.
    UserId
}

string_id! {
    /// Id of a persisted [`UserVariant`](crate::UserVariant) record.
    UserVariantId
}
