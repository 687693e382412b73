//! The data operation: the request payload handed from the frontend to the
//! dispatch core and echoed through work items to backend services.
//!
//! Only the fields consumed by the core are modeled. The operation is
//! cloneable with deep value semantics; the selector binds a resolved output
//! format onto its own copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version stamped on serialized operations
pub const OPERATION_SCHEMA_VERSION: &str = "0.18.0";

fn default_version() -> String {
    OPERATION_SCHEMA_VERSION.to_string()
}

/// One granule of a source collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Granule {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A source collection with the variables and granules requested from it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataSource {
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub granules: Vec<Granule>,
}

/// Shapefile reference: inline GeoJSON text or a normalized file reference
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ShapeRef {
    Inline(String),
    File {
        href: String,
        #[serde(rename = "type")]
        mime_type: String,
    },
}

impl ShapeRef {
    /// Non-empty inline GeoJSON or any file reference counts as a shape subset
    #[must_use]
    pub fn is_present(&self) -> bool {
        match self {
            ShapeRef::Inline(s) => !s.is_empty(),
            ShapeRef::File { .. } => true,
        }
    }
}

/// Named dimension subset range
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DimensionSubset {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Temporal subset range
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemporalRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// Request payload consumed by the dispatch core
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataOperation {
    #[serde(default = "default_version")]
    pub version: String,

    pub request_id: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub client: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_location: Option<String>,

    #[serde(default)]
    pub sources: Vec<DataSource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,

    /// `[west, south, east, north]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_rectangle: Option<Vec<f64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geojson: Option<ShapeRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,

    #[serde(default)]
    pub dimensions: Vec<DimensionSubset>,

    #[serde(default)]
    pub should_concatenate: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporal: Option<TemporalRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,

    /// Granule count reported by the CMR query for this request
    #[serde(default)]
    pub cmr_hits: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_synchronous: Option<bool>,

    #[serde(default)]
    pub require_synchronous: bool,
}

impl DataOperation {
    #[must_use]
    pub fn new(request_id: String, user: String, client: String) -> Self {
        Self {
            version: default_version(),
            request_id,
            user,
            client,
            staging_location: None,
            sources: Vec::new(),
            output_format: None,
            bounding_rectangle: None,
            geojson: None,
            crs: None,
            dimensions: Vec::new(),
            should_concatenate: false,
            temporal: None,
            max_results: None,
            cmr_hits: 0,
            is_synchronous: None,
            require_synchronous: false,
        }
    }

    /// Any source with a non-empty variable list requires variable subsetting
    #[must_use]
    pub fn should_variable_subset(&self) -> bool {
        self.sources.iter().any(|s| !s.variables.is_empty())
    }

    #[must_use]
    pub fn should_spatial_subset(&self) -> bool {
        self.bounding_rectangle.is_some()
    }

    #[must_use]
    pub fn should_shapefile_subset(&self) -> bool {
        self.geojson.as_ref().is_some_and(ShapeRef::is_present)
    }

    #[must_use]
    pub fn should_reproject(&self) -> bool {
        self.crs.is_some()
    }

    #[must_use]
    pub fn should_dimension_subset(&self) -> bool {
        !self.dimensions.is_empty()
    }

    /// Collection ids of every source, in request order
    #[must_use]
    pub fn collection_ids(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.collection.clone()).collect()
    }

    /// Drop variables from every source. The work-item server does not need
    /// them echoed back, and they can be large.
    pub fn strip_variables(&mut self) {
        for source in &mut self.sources {
            source.variables.clear();
        }
    }
}
