//! Prefixed, time-ordered row identifiers.
//!
//! Runs are addressed externally by [`crate::RunIdentifier`]; the surrogate
//! run key stays inside the crate. Event and battle-log ids are exposed so
//! callers can fetch details without re-scanning a run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $vis:vis $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        $vis struct $name(String);

        impl $name {
            /// Generate a fresh identifier.
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Wrap an identifier read back from storage.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the identifier text.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }
    };
}

branded_id!(
    /// Surrogate primary key of a run row.
    pub(crate) RunKey,
    "run"
);
branded_id!(
    /// Identifier of one stored exploration event.
    pub EventId,
    "evt"
);
branded_id!(
    /// Identifier of one stored battle log.
    pub BattleLogId,
    "blog"
);
