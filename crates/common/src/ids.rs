use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
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

define_id!(SourcePageId, "Typed wrapper for source_page UUIDs.");
define_id!(DiscoveredApiId, "Typed wrapper for discovered_api UUIDs.");
define_id!(ProductId, "Typed wrapper for product UUIDs.");
define_id!(ProductVersionId, "Typed wrapper for product_version UUIDs.");
define_id!(OfferId, "Typed wrapper for offer UUIDs.");
define_id!(OfferVersionId, "Typed wrapper for offer_version UUIDs.");
define_id!(ChangeEventId, "Typed wrapper for change_event UUIDs.");
define_id!(ImportRunId, "Typed wrapper for import_run UUIDs.");
define_id!(AiInferenceLogId, "Typed wrapper for ai_inference_log UUIDs.");

/// An OEM's identity is its config-assigned slug, not a generated UUID —
/// OEMs are defined by configuration, not created at runtime.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OemId(pub String);

impl OemId {
    pub fn new(slug: impl Into<String>) -> Self {
        Self(slug.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
