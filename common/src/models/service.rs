//! Backend service configuration models
//!
//! A `ServiceConfig` is one entry of the declarative service catalog. It is
//! immutable after load; the selector operates on deep copies.

use serde::{Deserialize, Serialize};

/// Dispatch variant of a backend service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    /// Sidecar-executed transformation container
    #[default]
    Turbo,
    /// External HTTP POST backend (compatibility shim)
    Http,
    /// Returns its inputs directly
    #[serde(rename = "no-op")]
    NoOp,
}

/// A collection the service is associated with, optionally restricted to a
/// subset of its variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceCollection {
    pub id: String,
    /// When present, the service supports only these variables of the collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<String>>,
    /// Per-collection granule cap for this service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granule_limit: Option<u32>,
}

/// Subsetting capability flags
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SubsettingCapabilities {
    #[serde(default)]
    pub bbox: bool,
    #[serde(default)]
    pub shape: bool,
    #[serde(default)]
    pub variable: bool,
    #[serde(default)]
    pub multiple_variable: bool,
    #[serde(default)]
    pub dimension: bool,
    #[serde(default)]
    pub temporal: bool,
}

/// Capability flags and supported output formats for a service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServiceCapabilities {
    #[serde(default)]
    pub subsetting: SubsettingCapabilities,
    #[serde(default)]
    pub concatenation: bool,
    #[serde(default)]
    pub concatenate_by_default: bool,
    #[serde(default)]
    pub reprojection: bool,
    /// Media types in catalog order; first-wins when resolving a format
    #[serde(default)]
    pub output_formats: Vec<String>,
}

/// One position in the service's workflow chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceStep {
    /// Image reference executed for this step
    pub image: String,
    /// Sequential steps hand a scroll cursor from one work item to the next
    #[serde(default)]
    pub is_sequential: bool,
}

/// One entry of the service catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,

    #[serde(rename = "type", default)]
    pub service_type: ServiceType,

    /// UMM-S association; required for non-no-op services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub umm_s: Option<String>,

    #[serde(default)]
    pub collections: Vec<ServiceCollection>,

    #[serde(default)]
    pub capabilities: ServiceCapabilities,

    /// Service-wide granule cap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granule_limit: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_sync_granules: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<u32>,

    #[serde(default)]
    pub steps: Vec<ServiceStep>,
}

/// Name of the synthetic no-op service returned when no real service matches
pub const NO_OP_SERVICE_NAME: &str = "noOpService";

impl ServiceConfig {
    /// Synthetic no-op config returned when no real service can be chosen
    #[must_use]
    pub fn no_op() -> Self {
        Self {
            name: NO_OP_SERVICE_NAME.to_string(),
            service_type: ServiceType::NoOp,
            umm_s: None,
            collections: Vec::new(),
            capabilities: ServiceCapabilities::default(),
            granule_limit: None,
            batch_size: None,
            maximum_sync_granules: None,
            concurrency: None,
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_no_op(&self) -> bool {
        self.service_type == ServiceType::NoOp
    }

    /// Look up the collection association for a collection id
    #[must_use]
    pub fn collection(&self, id: &str) -> Option<&ServiceCollection> {
        self.collections.iter().find(|c| c.id == id)
    }

    /// Whether this config covers the collection, honoring any per-collection
    /// variable restriction against the requested variables.
    #[must_use]
    pub fn supports_collection(&self, id: &str, requested_variables: &[String]) -> bool {
        match self.collection(id) {
            Some(assoc) => match &assoc.variables {
                Some(allowed) => requested_variables.iter().all(|v| allowed.contains(v)),
                None => true,
            },
            None => false,
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceType::Turbo => write!(f, "turbo"),
            ServiceType::Http => write!(f, "http"),
            ServiceType::NoOp => write!(f, "no-op"),
        }
    }
}
