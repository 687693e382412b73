//! Service catalog loading (C1)
//!
//! The catalog is a YAML document keyed by CMR environment URL; each value is
//! a list of service configurations. A custom `!Env NAME` scalar tag resolves
//! to the named environment variable (empty when unset), with integer-looking
//! values coerced to integers. Entries disabled with `enabled: false` (boolean
//! or string) are dropped before deserialization.

use std::path::Path;
use std::sync::OnceLock;

use serde_yaml::value::{Tag, TaggedValue};
use serde_yaml::{Mapping, Value};
use tracing::warn;

use harmony_common::models::ServiceConfig;
use harmony_common::{Error, Result};

static PROCESS_CATALOG: OnceLock<Vec<ServiceConfig>> = OnceLock::new();

/// Load and validate the catalog entries for one CMR environment
pub fn load_catalog_from_str(
    yaml: &str,
    cmr_environment: &str,
    granule_cap: u32,
) -> Result<Vec<ServiceConfig>> {
    let document: Value = serde_yaml::from_str(yaml)
        .map_err(|e| Error::Config(format!("Failed to parse service catalog: {e}")))?;
    let document = resolve_env_tags(document);

    if !document.is_mapping() {
        return Err(Error::Config("Service catalog must be a mapping".to_string()));
    }

    let entries = document
        .get(cmr_environment)
        .and_then(Value::as_sequence)
        .ok_or_else(|| {
            Error::Config(format!(
                "Service catalog has no entry for CMR environment '{cmr_environment}'"
            ))
        })?;

    let mut configs = Vec::new();
    for entry in entries {
        if !is_enabled(entry) {
            continue;
        }
        let config: ServiceConfig = serde_yaml::from_value(entry.clone())
            .map_err(|e| Error::Config(format!("Invalid service catalog entry: {e}")))?;
        configs.push(config);
    }

    validate_catalog(&configs, granule_cap)?;
    Ok(configs)
}

/// Load the catalog from a file path
pub fn load_catalog_from_path(
    path: &Path,
    cmr_environment: &str,
    granule_cap: u32,
) -> Result<Vec<ServiceConfig>> {
    let yaml = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read service catalog {}: {e}",
            path.display()
        ))
    })?;
    load_catalog_from_str(&yaml, cmr_environment, granule_cap)
}

/// Process-wide convenience loader. The first successful call fixes the
/// catalog for the process; the selector itself only ever takes a slice, so
/// consumers needing isolation construct their own.
pub fn load_process_catalog(
    path: &Path,
    cmr_environment: &str,
    granule_cap: u32,
) -> Result<&'static [ServiceConfig]> {
    if let Some(configs) = PROCESS_CATALOG.get() {
        return Ok(configs);
    }
    let loaded = load_catalog_from_path(path, cmr_environment, granule_cap)?;
    Ok(PROCESS_CATALOG.get_or_init(|| loaded))
}

/// Validate catalog invariants. Fatal except for batch sizes above the
/// system granule cap, which only warn.
pub fn validate_catalog(configs: &[ServiceConfig], granule_cap: u32) -> Result<()> {
    for config in configs {
        if let Some(batch_size) = config.batch_size {
            if batch_size == 0 {
                return Err(Error::Config(format!(
                    "Service {} batch_size must be a positive integer",
                    config.name
                )));
            }
            if batch_size > granule_cap {
                warn!(
                    service = %config.name,
                    batch_size,
                    granule_cap,
                    "Service batch_size exceeds the system granule cap"
                );
            }
        }

        if !config.is_no_op() {
            match &config.umm_s {
                Some(umm_s) if !umm_s.is_empty() => {}
                _ => {
                    return Err(Error::Config(format!(
                        "There must be one and only one umm_s record configured as a string for harmony service: {}",
                        config.name
                    )));
                }
            }
        }

        for collection in &config.collections {
            if collection.granule_limit == Some(0) {
                return Err(Error::Config(format!(
                    "Collection {} granule_limit must be a positive integer for service {}",
                    collection.id, config.name
                )));
            }
        }
    }
    Ok(())
}

/// Entries are enabled unless `enabled` is `false` or the string "false"
fn is_enabled(entry: &Value) -> bool {
    match entry.get("enabled") {
        Some(Value::Bool(enabled)) => *enabled,
        Some(Value::String(enabled)) => enabled != "false",
        _ => true,
    }
}

/// Resolve `!Env NAME` tags anywhere in the document. Integer-looking env
/// values become YAML integers so numeric fields deserialize.
fn resolve_env_tags(value: Value) -> Value {
    match value {
        Value::Tagged(tagged) if tagged.tag == Tag::new("Env") => {
            let name = tagged.value.as_str().unwrap_or("").trim().to_string();
            let raw = std::env::var(&name).unwrap_or_default();
            match raw.parse::<i64>() {
                Ok(int) => Value::Number(int.into()),
                Err(_) => Value::String(raw),
            }
        }
        Value::Tagged(tagged) => {
            let TaggedValue { tag, value } = *tagged;
            Value::Tagged(Box::new(TaggedValue {
                tag,
                value: resolve_env_tags(value),
            }))
        }
        Value::Mapping(mapping) => {
            let mut resolved = Mapping::new();
            for (key, value) in mapping {
                resolved.insert(key, resolve_env_tags(value));
            }
            Value::Mapping(resolved)
        }
        Value::Sequence(sequence) => {
            Value::Sequence(sequence.into_iter().map(resolve_env_tags).collect())
        }
        other => other,
    }
}
