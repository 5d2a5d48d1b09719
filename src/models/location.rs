//! Location models

use serde::{Deserialize, Serialize};

/// Values the service (or older exports) use in place of a real name
const MISSING_NAMES: &[&str] = &["unknown", "n/a", "null", "none"];

/// Whether a location name is absent or one of the placeholder spellings
pub fn is_missing_name(name: Option<&str>) -> bool {
    match name.map(str::trim) {
        None | Some("") => true,
        Some(name) => MISSING_NAMES.contains(&name.to_lowercase().as_str()),
    }
}

/// Location data as carried on a post, possibly incomplete
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EmbeddedLocation {
    /// Place name
    pub name: Option<String>,
    /// Latitude in degrees
    pub latitude: Option<f64>,
    /// Longitude in degrees
    pub longitude: Option<f64>,
}

impl EmbeddedLocation {
    /// Location with all fields present
    pub fn new(name: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            name: Some(name.to_string()),
            latitude: Some(latitude),
            longitude: Some(longitude),
        }
    }

    /// Location known only by name
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            latitude: None,
            longitude: None,
        }
    }

    /// Non-empty name and both coordinates present
    pub fn is_complete(&self) -> bool {
        !is_missing_name(self.name.as_deref()) && self.latitude.is_some() && self.longitude.is_some()
    }
}

/// Where a location record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    /// Taken directly from the post
    Embedded,
    /// Fetched with a per-post metadata lookup
    RemoteLookup,
    /// No location could be determined
    Unresolved,
}

impl ResolutionSource {
    /// Get source as string
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Embedded => "embedded",
            Self::RemoteLookup => "remote",
            Self::Unresolved => "unresolved",
        }
    }
}

impl std::fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolved location of a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    /// Place name (empty when unresolved)
    pub name: String,
    /// Latitude in degrees
    pub latitude: Option<f64>,
    /// Longitude in degrees
    pub longitude: Option<f64>,
    /// How the record was obtained
    pub source: ResolutionSource,
}

impl LocationRecord {
    /// Record taken from a complete embedded location
    pub fn embedded(name: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.trim().to_string(),
            latitude: Some(latitude),
            longitude: Some(longitude),
            source: ResolutionSource::Embedded,
        }
    }

    /// Record obtained from the remote lookup
    pub fn remote(name: &str, latitude: Option<f64>, longitude: Option<f64>) -> Self {
        Self {
            name: name.trim().to_string(),
            latitude,
            longitude,
            source: ResolutionSource::RemoteLookup,
        }
    }

    /// Sentinel record for a post whose location is unknown
    pub const fn unresolved() -> Self {
        Self {
            name: String::new(),
            latitude: None,
            longitude: None,
            source: ResolutionSource::Unresolved,
        }
    }

    /// Whether a location was found
    pub fn is_resolved(&self) -> bool {
        self.source != ResolutionSource::Unresolved
    }

    /// Both coordinates, if known
    pub const fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }
}
