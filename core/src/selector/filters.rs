//! The selector's filter functions (C2)
//!
//! Each filter narrows the candidate list when the operation requests the
//! capability it guards, recording a human-readable label for the request on
//! the way through. A filter that empties the list rejects the chain; the
//! driver decides whether to fall back or synthesize a no-op result.

use harmony_common::models::{DataOperation, RequestContext, ServiceConfig};

use super::format::resolve_format;

/// Outcome of one filter step: a narrowed candidate list, or rejection
pub enum FilterOutcome<'a> {
    Narrowed(Vec<&'a ServiceConfig>),
    Rejected,
}

/// A filter step in a selection chain
pub type FilterFn = for<'a> fn(
    &mut DataOperation,
    &RequestContext,
    Vec<&'a ServiceConfig>,
    &mut Vec<String>,
) -> FilterOutcome<'a>;

/// The canonical strict chain. The output-format filter runs last so earlier
/// filters cannot eliminate a service that would have offered an otherwise
/// supported format.
pub const ALL_FILTERS: &[FilterFn] = &[
    filter_collection_matches,
    filter_concatenation_matches,
    filter_variable_subsetting_matches,
    filter_spatial_subsetting_matches,
    filter_shapefile_subsetting_matches,
    filter_reprojection_matches,
    filter_dimension_subsetting_matches,
    filter_output_format_matches,
];

/// Best-effort chain: shapefile, spatial, and dimension subsetting are
/// optional capabilities that can be silently dropped.
pub const REQUIRED_FILTERS: &[FilterFn] = &[
    filter_collection_matches,
    filter_concatenation_matches,
    filter_variable_subsetting_matches,
    filter_reprojection_matches,
    filter_output_format_matches,
];

fn narrowed_or_rejected(candidates: Vec<&ServiceConfig>) -> FilterOutcome<'_> {
    if candidates.is_empty() {
        FilterOutcome::Rejected
    } else {
        FilterOutcome::Narrowed(candidates)
    }
}

/// Retain configs whose collection associations cover every source, honoring
/// per-collection variable restrictions.
pub fn filter_collection_matches<'a>(
    operation: &mut DataOperation,
    _context: &RequestContext,
    candidates: Vec<&'a ServiceConfig>,
    _requested_operations: &mut Vec<String>,
) -> FilterOutcome<'a> {
    let sources = operation.sources.clone();
    narrowed_or_rejected(
        candidates
            .into_iter()
            .filter(|config| {
                sources
                    .iter()
                    .all(|source| config.supports_collection(&source.collection, &source.variables))
            })
            .collect(),
    )
}

pub fn filter_concatenation_matches<'a>(
    operation: &mut DataOperation,
    _context: &RequestContext,
    candidates: Vec<&'a ServiceConfig>,
    requested_operations: &mut Vec<String>,
) -> FilterOutcome<'a> {
    if !operation.should_concatenate {
        return FilterOutcome::Narrowed(candidates);
    }
    requested_operations.push("concatenation".to_string());
    narrowed_or_rejected(
        candidates
            .into_iter()
            .filter(|config| config.capabilities.concatenation)
            .collect(),
    )
}

pub fn filter_variable_subsetting_matches<'a>(
    operation: &mut DataOperation,
    _context: &RequestContext,
    candidates: Vec<&'a ServiceConfig>,
    requested_operations: &mut Vec<String>,
) -> FilterOutcome<'a> {
    if !operation.should_variable_subset() {
        return FilterOutcome::Narrowed(candidates);
    }
    requested_operations.push("variable subsetting".to_string());
    narrowed_or_rejected(
        candidates
            .into_iter()
            .filter(|config| config.capabilities.subsetting.variable)
            .collect(),
    )
}

pub fn filter_spatial_subsetting_matches<'a>(
    operation: &mut DataOperation,
    _context: &RequestContext,
    candidates: Vec<&'a ServiceConfig>,
    requested_operations: &mut Vec<String>,
) -> FilterOutcome<'a> {
    if !operation.should_spatial_subset() {
        return FilterOutcome::Narrowed(candidates);
    }
    requested_operations.push("spatial subsetting".to_string());
    narrowed_or_rejected(
        candidates
            .into_iter()
            .filter(|config| config.capabilities.subsetting.bbox)
            .collect(),
    )
}

pub fn filter_shapefile_subsetting_matches<'a>(
    operation: &mut DataOperation,
    _context: &RequestContext,
    candidates: Vec<&'a ServiceConfig>,
    requested_operations: &mut Vec<String>,
) -> FilterOutcome<'a> {
    if !operation.should_shapefile_subset() {
        return FilterOutcome::Narrowed(candidates);
    }
    requested_operations.push("shapefile subsetting".to_string());
    narrowed_or_rejected(
        candidates
            .into_iter()
            .filter(|config| config.capabilities.subsetting.shape)
            .collect(),
    )
}

pub fn filter_reprojection_matches<'a>(
    operation: &mut DataOperation,
    _context: &RequestContext,
    candidates: Vec<&'a ServiceConfig>,
    requested_operations: &mut Vec<String>,
) -> FilterOutcome<'a> {
    if !operation.should_reproject() {
        return FilterOutcome::Narrowed(candidates);
    }
    requested_operations.push("reprojection".to_string());
    narrowed_or_rejected(
        candidates
            .into_iter()
            .filter(|config| config.capabilities.reprojection)
            .collect(),
    )
}

pub fn filter_dimension_subsetting_matches<'a>(
    operation: &mut DataOperation,
    _context: &RequestContext,
    candidates: Vec<&'a ServiceConfig>,
    requested_operations: &mut Vec<String>,
) -> FilterOutcome<'a> {
    if !operation.should_dimension_subset() {
        return FilterOutcome::Narrowed(candidates);
    }
    requested_operations.push("dimension subsetting".to_string());
    narrowed_or_rejected(
        candidates
            .into_iter()
            .filter(|config| config.capabilities.subsetting.dimension)
            .collect(),
    )
}

/// Media types the operation requests, most preferred first: an explicit
/// output format wins over the context's quality-sorted accept list.
fn requested_formats(operation: &DataOperation, context: &RequestContext) -> Vec<String> {
    let mut formats = Vec::new();
    if let Some(format) = &operation.output_format {
        formats.push(format.clone());
    }
    for mime in &context.requested_mime_types {
        if !formats.contains(mime) {
            formats.push(mime.clone());
        }
    }
    formats
}

/// Resolve the output format and retain only services offering it. For each
/// requested media type in priority order, candidates are walked first-wins
/// and the first offered format matching under the wildcard rule is bound
/// onto the operation.
pub fn filter_output_format_matches<'a>(
    operation: &mut DataOperation,
    context: &RequestContext,
    candidates: Vec<&'a ServiceConfig>,
    requested_operations: &mut Vec<String>,
) -> FilterOutcome<'a> {
    let formats = requested_formats(operation, context);
    let required = operation.output_format.is_some() || formats.iter().any(|f| f != "*/*");
    if !required {
        return FilterOutcome::Narrowed(candidates);
    }

    let mut resolution: Option<(String, String)> = None;
    'search: for requested in &formats {
        for candidate in &candidates {
            if let Some(resolved) =
                resolve_format(&candidate.capabilities.output_formats, requested)
            {
                resolution = Some((requested.clone(), resolved.to_string()));
                break 'search;
            }
        }
    }

    match resolution {
        Some((requested, resolved)) => {
            requested_operations.push(format!("reformatting to {requested}"));
            operation.output_format = Some(resolved.clone());
            FilterOutcome::Narrowed(
                candidates
                    .into_iter()
                    .filter(|config| config.capabilities.output_formats.contains(&resolved))
                    .collect(),
            )
        }
        None => {
            if let Some(preferred) = formats.first() {
                requested_operations.push(format!("reformatting to {preferred}"));
            }
            FilterOutcome::Rejected
        }
    }
}
