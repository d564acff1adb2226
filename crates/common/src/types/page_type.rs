use serde::{Deserialize, Serialize};

/// The role a page plays on an OEM site.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Homepage,
    VehiclesIndex,
    VehicleDetail,
    Offers,
    News,
    Sitemap,
    Other,
}

impl PageType {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Self::Homepage => "homepage",
            Self::VehiclesIndex => "vehicles_index",
            Self::VehicleDetail => "vehicle_detail",
            Self::Offers => "offers",
            Self::News => "news",
            Self::Sitemap => "sitemap",
            Self::Other => "other",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "homepage" => Self::Homepage,
            "vehicles_index" => Self::VehiclesIndex,
            "vehicle_detail" => Self::VehicleDetail,
            "offers" => Self::Offers,
            "news" => Self::News,
            "sitemap" => Self::Sitemap,
            _ => Self::Other,
        }
    }

    /// Base refresh interval before backoff is applied (§4.8 Cadence).
    pub fn base_interval_secs(&self) -> i64 {
        match self {
            Self::Homepage => 2 * 3600,
            Self::Offers => 4 * 3600,
            Self::VehicleDetail => 12 * 3600,
            Self::VehiclesIndex => 12 * 3600,
            Self::News => 24 * 3600,
            Self::Sitemap => 24 * 3600,
            Self::Other => 24 * 3600,
        }
    }

    /// Dispatch priority order within one OEM (§4.9 Ordering); lower sorts first.
    pub fn dispatch_priority(&self) -> u8 {
        match self {
            Self::Offers => 0,
            Self::Homepage => 1,
            Self::VehiclesIndex => 2,
            Self::VehicleDetail => 3,
            Self::News => 4,
            Self::Sitemap => 5,
            Self::Other => 6,
        }
    }
}
