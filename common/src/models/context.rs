//! Per-request context passed alongside the data operation

use serde::{Deserialize, Serialize};

/// Request context: immutable after construction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub id: String,
    /// Requested media types in priority order (quality-sorted)
    #[serde(default)]
    pub requested_mime_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn new(id: String) -> Self {
        Self {
            id,
            requested_mime_types: Vec::new(),
            frontend: None,
        }
    }

    /// Build a context from an HTTP `Accept` header, sorting media types by
    /// quality value. Ties keep their header order.
    #[must_use]
    pub fn from_accept_header(id: String, accept: &str) -> Self {
        let mut entries: Vec<(String, f64)> = accept
            .split(',')
            .filter_map(|entry| {
                let mut parts = entry.trim().split(';');
                let mime = parts.next()?.trim();
                if mime.is_empty() {
                    return None;
                }
                let quality = parts
                    .filter_map(|p| p.trim().strip_prefix("q="))
                    .find_map(|q| q.parse::<f64>().ok())
                    .unwrap_or(1.0);
                Some((mime.to_string(), quality))
            })
            .collect();
        // stable sort preserves header order among equal qualities
        entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        Self {
            id,
            requested_mime_types: entries.into_iter().map(|(mime, _)| mime).collect(),
            frontend: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_header_sorted_by_quality() {
        let context = RequestContext::from_accept_header(
            "req-1".to_string(),
            "image/tiff;q=0.8, application/x-netcdf4, image/png;q=0.9",
        );
        assert_eq!(
            context.requested_mime_types,
            vec!["application/x-netcdf4", "image/png", "image/tiff"]
        );
    }

    #[test]
    fn test_accept_header_stable_tie_break() {
        let context = RequestContext::from_accept_header(
            "req-2".to_string(),
            "image/png;q=0.5, image/tiff;q=0.5, */*;q=0.1",
        );
        assert_eq!(
            context.requested_mime_types,
            vec!["image/png", "image/tiff", "*/*"]
        );
    }
}
