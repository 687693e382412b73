//! Media-type matching for output format resolution
//!
//! Wildcards appear on the requested side: `*/*` matches anything, `type/*`
//! matches any subtype, and anything else matches on equality.

/// Whether a requested media type matches an offered output format
#[must_use]
pub fn mime_matches(requested: &str, offered: &str) -> bool {
    if requested == "*/*" {
        return true;
    }
    if let Some(major) = requested.strip_suffix("/*") {
        return offered
            .split('/')
            .next()
            .is_some_and(|offered_major| offered_major == major);
    }
    requested == offered
}

/// First offered format matching the requested media type, in catalog order
#[must_use]
pub fn resolve_format<'a>(output_formats: &'a [String], requested: &str) -> Option<&'a str> {
    output_formats
        .iter()
        .map(String::as_str)
        .find(|offered| mime_matches(requested, offered))
}
