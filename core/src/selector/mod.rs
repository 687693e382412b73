//! Service selection (C2)
//!
//! Evaluates a data operation against the catalog through an ordered chain of
//! filter functions. The strict chain requires every requested capability; if
//! it resolves to nothing and the request is eligible, a required-only chain
//! reruns with the optional subset capabilities (spatial, shapefile,
//! dimension) dropped, returning an advisory message. Otherwise a synthetic
//! no-op config explains which operation combination was unsupported.

pub mod filters;
pub mod format;

use harmony_common::models::{DataOperation, RequestContext, ServiceConfig};
use harmony_common::{Error, Result};

use filters::{FilterFn, FilterOutcome, ALL_FILTERS, REQUIRED_FILTERS};

/// Advisory returned when optional subset capabilities were dropped
pub const SPATIAL_BOUNDS_MESSAGE: &str =
    "Data in output files may extend outside the spatial bounds you requested.";

/// The chosen service plus the operation copy it should run
#[derive(Debug, Clone)]
pub struct ServiceChoice {
    pub config: ServiceConfig,
    /// Deep copy of the request operation with the resolved output format bound
    pub operation: DataOperation,
    pub message: Option<String>,
}

struct ChainOutcome<'a> {
    candidates: Vec<&'a ServiceConfig>,
    operation: DataOperation,
}

/// Run one filter chain over the catalog. On rejection, returns the
/// operation labels accumulated up to and including the rejecting filter.
fn run_chain<'a>(
    operation: &DataOperation,
    context: &RequestContext,
    configs: &'a [ServiceConfig],
    chain: &[FilterFn],
) -> std::result::Result<ChainOutcome<'a>, Vec<String>> {
    let mut operation = operation.clone();
    let mut requested_operations = Vec::new();
    let mut candidates: Vec<&ServiceConfig> = configs.iter().collect();

    for filter in chain {
        match filter(&mut operation, context, candidates, &mut requested_operations) {
            FilterOutcome::Narrowed(narrowed) => candidates = narrowed,
            FilterOutcome::Rejected => return Err(requested_operations),
        }
    }

    if candidates.is_empty() {
        Err(requested_operations)
    } else {
        Ok(ChainOutcome {
            candidates,
            operation,
        })
    }
}

fn should_reformat(operation: &DataOperation, context: &RequestContext) -> bool {
    operation.output_format.is_some()
        || context.requested_mime_types.iter().any(|m| m != "*/*")
}

/// Whether the request must match service capabilities exactly, with no
/// best-effort fallback. Requests with no optional transform at all never
/// fall back; neither do requests that pair an optional subset with variable
/// subsetting or reformatting, unless reprojection is also requested.
fn requires_strict_capabilities_matching(
    operation: &DataOperation,
    context: &RequestContext,
) -> bool {
    let optional_requested = operation.should_spatial_subset()
        || operation.should_shapefile_subset()
        || operation.should_dimension_subset();
    if !optional_requested {
        return true;
    }
    let spatial_requested =
        operation.should_spatial_subset() || operation.should_shapefile_subset();
    spatial_requested
        && (operation.should_variable_subset() || should_reformat(operation, context))
        && !operation.should_reproject()
}

/// Human-readable list: "a", "a and b", "a, b, and c"
fn list_to_text(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => only.clone(),
        [first, second] => format!("{first} and {second}"),
        [init @ .., last] => format!("{}, and {last}", init.join(", ")),
    }
}

fn unsupported_message(operation: &DataOperation, requested_operations: &[String]) -> String {
    let collections = operation.collection_ids().join(", ");
    if requested_operations.is_empty() {
        format!("no operations can be performed on {collections}")
    } else {
        format!(
            "the requested combination of operations: {} on {collections} is unsupported",
            list_to_text(requested_operations)
        )
    }
}

/// Choose the service config for a data operation.
///
/// Pure over its inputs and safe for parallel invocation. The only error is
/// `NotFound`, raised when concatenation is requested and no service
/// associated with the request's collections can concatenate.
pub fn choose_service_config(
    operation: &DataOperation,
    context: &RequestContext,
    configs: &[ServiceConfig],
) -> Result<ServiceChoice> {
    match run_chain(operation, context, configs, ALL_FILTERS) {
        Ok(outcome) => Ok(ServiceChoice {
            config: outcome.candidates[0].clone(),
            operation: outcome.operation,
            message: None,
        }),
        Err(requested_operations) => {
            if operation.should_concatenate && !concatenation_available(operation, configs) {
                return Err(Error::NotFound("no matching service".to_string()));
            }

            if !requires_strict_capabilities_matching(operation, context) {
                if let Ok(outcome) = run_chain(operation, context, configs, REQUIRED_FILTERS) {
                    return Ok(ServiceChoice {
                        config: outcome.candidates[0].clone(),
                        operation: outcome.operation,
                        message: Some(SPATIAL_BOUNDS_MESSAGE.to_string()),
                    });
                }
            }

            Ok(ServiceChoice {
                config: ServiceConfig::no_op(),
                operation: operation.clone(),
                message: Some(unsupported_message(operation, &requested_operations)),
            })
        }
    }
}

/// Whether any collection-matching config can concatenate
fn concatenation_available(operation: &DataOperation, configs: &[ServiceConfig]) -> bool {
    configs.iter().any(|config| {
        config.capabilities.concatenation
            && operation
                .sources
                .iter()
                .all(|source| config.supports_collection(&source.collection, &source.variables))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use harmony_common::models::{
        DataSource, ServiceCapabilities, ServiceCollection, ServiceType, SubsettingCapabilities,
    };

    fn service(name: &str, collections: &[&str], capabilities: ServiceCapabilities) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            service_type: ServiceType::Turbo,
            umm_s: Some(format!("S-{name}")),
            collections: collections
                .iter()
                .map(|id| ServiceCollection {
                    id: (*id).to_string(),
                    variables: None,
                    granule_limit: None,
                })
                .collect(),
            capabilities,
            granule_limit: None,
            batch_size: None,
            maximum_sync_granules: None,
            concurrency: None,
            steps: Vec::new(),
        }
    }

    fn operation_for(collection: &str) -> DataOperation {
        let mut op = DataOperation::new(
            "req-1".to_string(),
            "jdoe".to_string(),
            "harmony-test".to_string(),
        );
        op.sources.push(DataSource {
            collection: collection.to_string(),
            short_name: None,
            version_id: None,
            variables: Vec::new(),
            granules: Vec::new(),
        });
        op
    }

    fn context() -> RequestContext {
        RequestContext::new("req-1".to_string())
    }

    #[test]
    fn test_strict_match_returns_no_op_for_unsupported_combination() {
        // svc-A {tiff, bbox} and svc-B {tiff, png, shape}; request png + bbox
        let svc_a = service(
            "svc-A",
            &["C1"],
            ServiceCapabilities {
                subsetting: SubsettingCapabilities {
                    bbox: true,
                    ..Default::default()
                },
                output_formats: vec!["image/tiff".to_string()],
                ..Default::default()
            },
        );
        let svc_b = service(
            "svc-B",
            &["C1"],
            ServiceCapabilities {
                subsetting: SubsettingCapabilities {
                    shape: true,
                    ..Default::default()
                },
                output_formats: vec!["image/tiff".to_string(), "image/png".to_string()],
                ..Default::default()
            },
        );

        let mut op = operation_for("C1");
        op.output_format = Some("image/png".to_string());
        op.bounding_rectangle = Some(vec![0.0, 0.0, 10.0, 10.0]);

        let choice = choose_service_config(&op, &context(), &[svc_a, svc_b]).unwrap();
        assert!(choice.config.is_no_op());
        assert_eq!(
            choice.message.as_deref(),
            Some(
                "the requested combination of operations: spatial subsetting and reformatting \
                 to image/png on C1 is unsupported"
            )
        );
    }

    #[test]
    fn test_fallback_drops_spatial_subsetting_with_advisory() {
        // svc-R {reprojection, netcdf} only; request crs + netcdf + bbox
        let svc_r = service(
            "svc-R",
            &["C1"],
            ServiceCapabilities {
                reprojection: true,
                output_formats: vec!["application/x-netcdf4".to_string()],
                ..Default::default()
            },
        );

        let mut op = operation_for("C1");
        op.crs = Some("EPSG:4326".to_string());
        op.output_format = Some("application/x-netcdf4".to_string());
        op.bounding_rectangle = Some(vec![0.0, 0.0, 10.0, 10.0]);

        let choice = choose_service_config(&op, &context(), &[svc_r]).unwrap();
        assert_eq!(choice.config.name, "svc-R");
        assert_eq!(choice.message.as_deref(), Some(SPATIAL_BOUNDS_MESSAGE));
        assert_eq!(
            choice.operation.output_format.as_deref(),
            Some("application/x-netcdf4")
        );
    }

    #[test]
    fn test_variable_narrowing() {
        let mut svc_v = service(
            "svc-V",
            &[],
            ServiceCapabilities {
                subsetting: SubsettingCapabilities {
                    variable: true,
                    ..Default::default()
                },
                output_formats: vec!["image/tiff".to_string()],
                ..Default::default()
            },
        );
        svc_v.collections = vec![ServiceCollection {
            id: "C1".to_string(),
            variables: Some(vec!["V1".to_string(), "V2".to_string()]),
            granule_limit: None,
        }];
        let configs = vec![svc_v];

        let mut op = operation_for("C1");
        op.sources[0].variables = vec!["V1".to_string()];
        op.output_format = Some("image/tiff".to_string());
        let choice = choose_service_config(&op, &context(), &configs).unwrap();
        assert_eq!(choice.config.name, "svc-V");

        let mut op = operation_for("C1");
        op.sources[0].variables = vec!["V3".to_string()];
        let choice = choose_service_config(&op, &context(), &configs).unwrap();
        assert!(choice.config.is_no_op());
        assert_eq!(
            choice.message.as_deref(),
            Some("no operations can be performed on C1")
        );
    }

    #[test]
    fn test_first_wins_tie_break() {
        let capabilities = ServiceCapabilities {
            subsetting: SubsettingCapabilities {
                bbox: true,
                ..Default::default()
            },
            output_formats: vec!["image/tiff".to_string()],
            ..Default::default()
        };
        let first = service("svc-first", &["C1"], capabilities.clone());
        let second = service("svc-second", &["C1"], capabilities);

        let mut op = operation_for("C1");
        op.bounding_rectangle = Some(vec![0.0, 0.0, 1.0, 1.0]);
        let choice = choose_service_config(&op, &context(), &[first, second]).unwrap();
        assert_eq!(choice.config.name, "svc-first");
    }

    #[test]
    fn test_selector_is_idempotent() {
        let svc = service(
            "svc-A",
            &["C1"],
            ServiceCapabilities {
                subsetting: SubsettingCapabilities {
                    bbox: true,
                    ..Default::default()
                },
                output_formats: vec!["image/tiff".to_string()],
                ..Default::default()
            },
        );
        let configs = vec![svc];
        let mut op = operation_for("C1");
        op.bounding_rectangle = Some(vec![0.0, 0.0, 1.0, 1.0]);

        let first = choose_service_config(&op, &context(), &configs).unwrap();
        let second = choose_service_config(&op, &context(), &configs).unwrap();
        assert_eq!(first.config, second.config);
        assert_eq!(first.message, second.message);
        assert_eq!(first.operation, second.operation);
    }

    #[test]
    fn test_strict_capability_invariant_for_variable_and_reformat() {
        // a service that reformats but cannot variable subset must not be chosen
        let svc = service(
            "svc-format-only",
            &["C1"],
            ServiceCapabilities {
                output_formats: vec!["image/png".to_string()],
                ..Default::default()
            },
        );
        let mut op = operation_for("C1");
        op.sources[0].variables = vec!["V1".to_string()];
        op.output_format = Some("image/png".to_string());

        let choice = choose_service_config(&op, &context(), &[svc]).unwrap();
        assert!(choice.config.is_no_op());
    }

    #[test]
    fn test_accept_header_wildcard_resolution() {
        let svc = service(
            "svc-img",
            &["C1"],
            ServiceCapabilities {
                output_formats: vec!["image/tiff".to_string(), "image/png".to_string()],
                ..Default::default()
            },
        );
        let op = operation_for("C1");
        let mut ctx = context();
        ctx.requested_mime_types = vec!["image/*".to_string()];

        let choice = choose_service_config(&op, &ctx, &[svc]).unwrap();
        assert_eq!(choice.config.name, "svc-img");
        assert_eq!(choice.operation.output_format.as_deref(), Some("image/tiff"));
    }

    #[test]
    fn test_pure_wildcard_accept_does_not_require_reformatting() {
        let svc = service("svc-plain", &["C1"], ServiceCapabilities::default());
        let op = operation_for("C1");
        let mut ctx = context();
        ctx.requested_mime_types = vec!["*/*".to_string()];

        let choice = choose_service_config(&op, &ctx, &[svc]).unwrap();
        assert_eq!(choice.config.name, "svc-plain");
        assert!(choice.operation.output_format.is_none());
    }

    #[test]
    fn test_concatenation_without_candidate_is_not_found() {
        let svc = service("svc-plain", &["C1"], ServiceCapabilities::default());
        let mut op = operation_for("C1");
        op.should_concatenate = true;

        let err = choose_service_config(&op, &context(), &[svc]).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_bbox_only_request_falls_back_with_advisory() {
        let svc = service("svc-plain", &["C1"], ServiceCapabilities::default());
        let mut op = operation_for("C1");
        op.bounding_rectangle = Some(vec![0.0, 0.0, 1.0, 1.0]);

        let choice = choose_service_config(&op, &context(), &[svc]).unwrap();
        assert_eq!(choice.config.name, "svc-plain");
        assert_eq!(choice.message.as_deref(), Some(SPATIAL_BOUNDS_MESSAGE));
    }

    #[test]
    fn test_returned_config_covers_sources_or_is_no_op() {
        let svc = service("svc-other", &["C2"], ServiceCapabilities::default());
        let op = operation_for("C1");
        let choice = choose_service_config(&op, &context(), &[svc]).unwrap();
        assert!(choice.config.is_no_op());
        assert_eq!(
            choice.message.as_deref(),
            Some("no operations can be performed on C1")
        );
    }
}
