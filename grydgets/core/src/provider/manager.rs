//! Provider registry
//!
//! Built once per configuration load from a `name -> ProviderSpec` map.
//! The tree builder resolves widget `providers = [...]` references through
//! it; unknown names fail the build with the list of what exists.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::{DataProvider, SharedProvider, PROVIDER_STOP_TIMEOUT};
use crate::error::BuildError;
use crate::fetch::{FileSource, FileSpec, RestSource, RestSpec, SharedSource};

/// Provider types that can be constructed
pub const PROVIDER_TYPES: &[&str] = &["rest", "file"];

const DEFAULT_UPDATE_INTERVAL: f64 = 60.0;

/// Declarative description of one provider
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSpec {
    /// Provider type, one of [`PROVIDER_TYPES`]
    #[serde(rename = "type")]
    pub kind: String,

    /// Seconds between fetches
    #[serde(default = "default_update_interval")]
    pub update_interval: f64,

    /// Upper bound in seconds of the random delay added to each interval
    #[serde(default)]
    pub jitter: f64,

    /// Type-specific fields (url, method, path, json_path, ...)
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

fn default_update_interval() -> f64 {
    DEFAULT_UPDATE_INTERVAL
}

fn seconds(provider: &str, field: &str, value: f64, allow_zero: bool) -> Result<Duration, BuildError> {
    let ok = value.is_finite() && (value > 0.0 || (allow_zero && value == 0.0));
    if !ok {
        return Err(BuildError::invalid(provider, format!("{field} must be a positive number of seconds, got {value}")));
    }
    Ok(Duration::from_secs_f64(value))
}

/// Owns every provider of one configuration
#[derive(Debug, Default)]
pub struct ProviderManager {
    providers: BTreeMap<String, SharedProvider>,
}

impl ProviderManager {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct every provider; nothing is started
    pub fn from_specs(specs: &BTreeMap<String, ProviderSpec>) -> Result<Self, BuildError> {
        let mut manager = Self::new();
        for (name, spec) in specs {
            manager.insert(Self::build_provider(name, spec)?);
            info!(provider = %name, kind = %spec.kind, "Created provider");
        }
        Ok(manager)
    }

    /// Construct one provider from its spec
    pub fn build_provider(name: &str, spec: &ProviderSpec) -> Result<DataProvider, BuildError> {
        let params = Value::Object(spec.params.clone());
        let source: SharedSource = match spec.kind.as_str() {
            "rest" => {
                let rest: RestSpec = serde_json::from_value(params).map_err(|e| BuildError::invalid(name, e))?;
                Arc::new(RestSource::new(rest).map_err(|e| BuildError::invalid(name, e))?)
            }
            "file" => {
                let file: FileSpec = serde_json::from_value(params).map_err(|e| BuildError::invalid(name, e))?;
                Arc::new(FileSource::new(file).map_err(|e| BuildError::invalid(name, e))?)
            }
            other => {
                return Err(BuildError::UnknownProviderType {
                    provider: name.to_string(),
                    kind: other.to_string(),
                    available: PROVIDER_TYPES.join(", "),
                })
            }
        };
        Ok(DataProvider::new(
            name,
            source,
            seconds(name, "update_interval", spec.update_interval, false)?,
            seconds(name, "jitter", spec.jitter, true)?,
        ))
    }

    /// Register an already-built provider, replacing any with the same name
    pub fn insert(&mut self, provider: DataProvider) -> SharedProvider {
        let shared = Arc::new(provider);
        if let Some(old) = self.providers.insert(shared.name().to_string(), Arc::clone(&shared)) {
            warn!(provider = %old.name(), "Replacing provider with duplicate name");
            old.stop(PROVIDER_STOP_TIMEOUT);
        }
        shared
    }

    /// Start every provider's polling thread
    pub fn start_all(&self) -> Result<(), BuildError> {
        info!(count = self.providers.len(), "Starting providers");
        for provider in self.providers.values() {
            provider.start()?;
        }
        Ok(())
    }

    /// Stop every provider, waiting up to the stop timeout for each
    pub fn stop_all(&self) {
        info!(count = self.providers.len(), "Stopping providers");
        for provider in self.providers.values() {
            if !provider.stop(PROVIDER_STOP_TIMEOUT) {
                warn!(provider = %provider.name(), "Provider thread still busy after stop timeout");
            }
        }
    }

    /// Look up a provider
    pub fn get(&self, name: &str) -> Option<SharedProvider> {
        self.providers.get(name).cloned()
    }

    /// Whether a provider exists
    pub fn has(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Sorted provider names
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    /// Number of providers
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether there are no providers
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolve a reference made by `widget`
    pub fn resolve(&self, widget: &str, name: &str) -> Result<SharedProvider, BuildError> {
        self.get(name).ok_or_else(|| BuildError::UnknownProviderReference {
            widget: widget.to_string(),
            provider: name.to_string(),
            available: self.available(),
        })
    }

    /// Check that every name in `required` exists
    pub fn validate_references<S: AsRef<str>>(&self, widget: &str, required: &[S]) -> Result<(), BuildError> {
        required
            .iter()
            .try_for_each(|name| self.resolve(widget, name.as_ref()).map(|_| ()))
    }

    fn available(&self) -> String {
        if self.providers.is_empty() {
            "none".to_string()
        } else {
            self.names().join(", ")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn spec(value: Value) -> ProviderSpec {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_from_specs_builds_rest_and_file() {
        let mut specs = BTreeMap::new();
        specs.insert(
            "weather".to_string(),
            spec(json!({"type": "rest", "url": "http://example.invalid", "json_path": "a", "jitter": 5})),
        );
        specs.insert("mode".to_string(), spec(json!({"type": "file", "path": "/tmp/mode.json"})));

        let manager = ProviderManager::from_specs(&specs).unwrap();

        assert_eq!(manager.names(), vec!["mode", "weather"]);
        let weather = manager.get("weather").unwrap();
        assert_eq!(weather.cadence().interval, Duration::from_secs(60));
        assert_eq!(weather.cadence().jitter, Duration::from_secs(5));
        assert_eq!(weather.describe(), "http://example.invalid");
    }

    #[test]
    fn test_unknown_type_lists_available() {
        let err = ProviderManager::build_provider("x", &spec(json!({"type": "mqtt"}))).unwrap_err();
        match err {
            BuildError::UnknownProviderType { provider, kind, available } => {
                assert_eq!(provider, "x");
                assert_eq!(kind, "mqtt");
                assert_eq!(available, "rest, file");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_invalid_params() {
        let missing_url = ProviderManager::build_provider("x", &spec(json!({"type": "rest"})));
        assert!(matches!(missing_url, Err(BuildError::InvalidParams { .. })));

        let bad_interval = ProviderManager::build_provider(
            "x",
            &spec(json!({"type": "rest", "url": "http://a", "update_interval": 0})),
        );
        assert!(matches!(bad_interval, Err(BuildError::InvalidParams { .. })));

        let bad_path = ProviderManager::build_provider(
            "x",
            &spec(json!({"type": "rest", "url": "http://a", "json_path": "a["})),
        );
        assert!(matches!(bad_path, Err(BuildError::InvalidParams { .. })));
    }

    #[test]
    fn test_missing_type_fails_to_parse() {
        assert!(serde_json::from_value::<ProviderSpec>(json!({"url": "http://a"})).is_err());
    }

    #[test]
    fn test_resolve_unknown_reference() {
        let manager = ProviderManager::new();
        let err = manager.validate_references("clock", &["weather"]).unwrap_err();

        assert_eq!(
            err.to_string(),
            "widget 'clock' references unknown provider 'weather' (available: none)"
        );
        assert!(!manager.has("weather"));
        assert!(manager.is_empty());
    }
}
