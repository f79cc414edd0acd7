//! NewType wrappers for the identifiers that flow through an action plan.
//!
//! Step ids, plan file references and scientific-parameter references are all
//! plain strings in the plan description; wrapping them keeps an action id
//! from being passed where a file reference is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Identifier of one entry of the action plan (e.g. "action_004").
    ///
    /// Actions and events share the same id space: an event's id is also the
    /// key of the group of actions it closes.
    StepId
);

newtype_string!(
    /// Reference to the per-action plan file (the `<action_xml>` entry).
    PlanFileRef
);

newtype_string!(
    /// Path of the scientific parameters file handed to a concurrent action.
    SciParamsRef
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_id_creation() {
        let id = StepId::new("action_004");
        assert_eq!(id.as_str(), "action_004");
        assert_eq!(id.to_string(), "action_004");
    }

    #[test]
    fn test_step_id_from_string() {
        let id: StepId = "action_004".into();
        assert_eq!(id.as_str(), "action_004");

        let id: StepId = String::from("action_010").into();
        assert_eq!(id.into_inner(), "action_010");
    }

    #[test]
    fn test_step_id_serde() {
        let id = StepId::new("action_004");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"action_004\"");

        let parsed: StepId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_lookup_by_str() {
        use std::collections::HashMap;

        let mut refs = HashMap::new();
        refs.insert(StepId::new("action_002"), PlanFileRef::new("nest.xml"));

        assert_eq!(refs.get("action_002").map(|r| r.as_str()), Some("nest.xml"));
        assert!(refs.get("action_003").is_none());
    }

    #[test]
    fn test_sci_params_ref_creation() {
        let r = SciParamsRef::new("/plans/parameters/sci_params.xml");
        assert_eq!(r.as_str(), "/plans/parameters/sci_params.xml");
    }
}
