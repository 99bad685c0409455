//! String identifiers used across the workflow.
//!
//! Sessions, artefact locations and deployment URLs are all strings on the
//! wire but get their own types so one cannot be passed where another is
//! expected.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A blank string where an identifier was expected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind} must not be blank")]
pub struct BlankIdentifier {
    pub kind: &'static str,
}

// Non-blank string wrapper with `new`, `as_str` and `Display`. Deserializing
// goes through `new`, so a blank value never makes it into one.
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// `None` for blank input.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.trim().is_empty() { None } else { Some(Self(v)) }
            }

            /// The wrapped string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = BlankIdentifier;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value).ok_or(BlankIdentifier {
                    kind: stringify!($name),
                })
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id! {
    /// Identifies one workflow instance.
    ///
    /// The session is the unit of rate limiting and progress-event addressing.
    /// Callers may supply their own opaque value; otherwise a random UUID string
    /// is generated by [`SessionId::new_random`].
    SessionId
}

impl SessionId {
    /// Generates a new random session identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

string_id! {
    /// Where a build agent left the produced artefact (a directory path or an
    /// object-store key).
    ArtifactLocation
}

string_id! {
    /// Public URL of a deployed artefact.
    DeploymentUrl
}
