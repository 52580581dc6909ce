//! Server configuration.
//!
//! Configuration is resolved once at process startup and then shared read-only with the
//! transcoding service. Nothing in this crate reads environment variables while handling
//! a resource; [`ConfigOverrides::from_env`] is called by the binary before anything else
//! starts.
//!
//! Resolution order, later sources winning:
//! - built-in defaults
//! - an optional YAML file (strict: unknown keys are rejected)
//! - environment overrides

use crate::{CoreError, CoreResult};
use fhir::{AssemblyOptions, ChoicePolicy, ServerEndpoints};
use serde::Deserialize;
use std::path::Path;
use url::Url;

pub const DEFAULT_FHIR_BASE_URL: &str = "http://localhost/apis/default/fhir/";
pub const DEFAULT_OAUTH_ADDRESS: &str = "http://localhost/oauth2/default";

pub const FHIR_BASE_URL_ENV: &str = "MEDREQ_FHIR_BASE_URL";
pub const OAUTH_ADDRESS_ENV: &str = "MEDREQ_OAUTH_ADDRESS";
pub const CHOICE_POLICY_ENV: &str = "MEDREQ_CHOICE_POLICY";

/// Server configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    fhir_base_url: Url,
    oauth_address: Url,
    choice_policy: ChoicePolicy,
}

impl ServerConfig {
    /// Create a new `ServerConfig`.
    ///
    /// The FHIR base URL is normalised to end with `/` so resource paths can be appended.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if either URL has no host.
    pub fn new(
        mut fhir_base_url: Url,
        oauth_address: Url,
        choice_policy: ChoicePolicy,
    ) -> CoreResult<Self> {
        if fhir_base_url.host_str().is_none() || fhir_base_url.cannot_be_a_base() {
            return Err(CoreError::InvalidConfig(format!(
                "fhir_base_url must be an absolute http(s) URL with a host, got {fhir_base_url}"
            )));
        }
        if oauth_address.host_str().is_none() {
            return Err(CoreError::InvalidConfig(format!(
                "oauth_address must have a host, got {oauth_address}"
            )));
        }

        if !fhir_base_url.path().ends_with('/') {
            let path = format!("{}/", fhir_base_url.path());
            fhir_base_url.set_path(&path);
        }

        Ok(Self {
            fhir_base_url,
            oauth_address,
            choice_policy,
        })
    }

    /// Resolve configuration from defaults, an optional YAML file and overrides.
    ///
    /// # Arguments
    ///
    /// * `file` - optional path to a YAML configuration file
    /// * `overrides` - values taken from the environment at startup
    ///
    /// # Errors
    ///
    /// * [`CoreError::ConfigRead`] - the file could not be read
    /// * [`CoreError::InvalidConfig`] - the file does not match the schema, or a value is
    ///   not a valid URL or choice policy
    pub fn resolve(file: Option<&Path>, overrides: ConfigOverrides) -> CoreResult<Self> {
        let from_file = match file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(CoreError::ConfigRead)?;
                parse_config_yaml(&text)?
            }
            None => ConfigOverrides::default(),
        };
        let merged = from_file.overlay(overrides);

        let fhir_base_url = parse_url(
            "fhir_base_url",
            merged.fhir_base_url.as_deref().unwrap_or(DEFAULT_FHIR_BASE_URL),
        )?;
        let oauth_address = parse_url(
            "oauth_address",
            merged.oauth_address.as_deref().unwrap_or(DEFAULT_OAUTH_ADDRESS),
        )?;
        let choice_policy = match merged.choice_policy.as_deref() {
            Some(value) => value
                .parse::<ChoicePolicy>()
                .map_err(|err| CoreError::InvalidConfig(err.to_string()))?,
            None => ChoicePolicy::default(),
        };

        Self::new(fhir_base_url, oauth_address, choice_policy)
    }

    pub fn fhir_base_url(&self) -> &Url {
        &self.fhir_base_url
    }

    pub fn oauth_address(&self) -> &Url {
        &self.oauth_address
    }

    pub fn choice_policy(&self) -> ChoicePolicy {
        self.choice_policy
    }

    pub fn assembly_options(&self) -> AssemblyOptions {
        AssemblyOptions::with_policy(self.choice_policy)
    }
}

impl ServerEndpoints for ServerConfig {
    fn fhir_base_url(&self) -> &Url {
        &self.fhir_base_url
    }

    /// Resources are local when their host matches the OAuth server's host.
    fn local_host(&self) -> Option<&str> {
        self.oauth_address.host_str()
    }
}

/// Optional configuration values from a single source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigOverrides {
    #[serde(default)]
    pub fhir_base_url: Option<String>,
    #[serde(default)]
    pub oauth_address: Option<String>,
    #[serde(default)]
    pub choice_policy: Option<String>,
}

impl ConfigOverrides {
    /// Read overrides from the process environment. Empty values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`, keyed by environment variable name.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            fhir_base_url: read(FHIR_BASE_URL_ENV),
            oauth_address: read(OAUTH_ADDRESS_ENV),
            choice_policy: read(CHOICE_POLICY_ENV),
        }
    }

    /// Values from `other` replace those in `self` where present.
    fn overlay(self, other: ConfigOverrides) -> Self {
        Self {
            fhir_base_url: other.fhir_base_url.or(self.fhir_base_url),
            oauth_address: other.oauth_address.or(self.oauth_address),
            choice_policy: other.choice_policy.or(self.choice_policy),
        }
    }
}

/// Parse YAML configuration text.
///
/// This uses `serde_path_to_error` to surface the path of the failing key when the YAML
/// does not match the schema.
///
/// # Errors
///
/// Returns [`CoreError::InvalidConfig`] if the YAML is malformed, a value has the wrong
/// type, or an unknown key is present.
pub fn parse_config_yaml(text: &str) -> CoreResult<ConfigOverrides> {
    if text.trim().is_empty() {
        return Ok(ConfigOverrides::default());
    }
    let deserializer = serde_yaml::Deserializer::from_str(text);
    match serde_path_to_error::deserialize::<_, ConfigOverrides>(deserializer) {
        Ok(parsed) => Ok(parsed),
        Err(err) => {
            let path = err.path().to_string();
            let source = err.into_inner();
            let path = if path.is_empty() || path == "." {
                "<root>"
            } else {
                path.as_str()
            };
            Err(CoreError::InvalidConfig(format!(
                "configuration schema mismatch at {path}: {source}"
            )))
        }
    }
}

fn parse_url(field: &str, value: &str) -> CoreResult<Url> {
    Url::parse(value.trim())
        .map_err(|err| CoreError::InvalidConfig(format!("{field} '{value}' is not a valid URL: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_without_sources() {
        let config =
            ServerConfig::resolve(None, ConfigOverrides::default()).expect("default config");
        assert_eq!(config.fhir_base_url().as_str(), DEFAULT_FHIR_BASE_URL);
        assert_eq!(config.local_host(), Some("localhost"));
        assert_eq!(config.choice_policy(), ChoicePolicy::FirstMatch);
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let config = ServerConfig::new(
            Url::parse("https://ehr.example.org/fhir").expect("url"),
            Url::parse("https://auth.example.org/oauth2").expect("url"),
            ChoicePolicy::Reject,
        )
        .expect("config");
        assert_eq!(config.fhir_base_url().as_str(), "https://ehr.example.org/fhir/");
        assert_eq!(config.local_host(), Some("auth.example.org"));
        assert_eq!(config.assembly_options().choice_policy, ChoicePolicy::Reject);
    }

    #[test]
    fn rejects_urls_without_host() {
        let err = ServerConfig::new(
            Url::parse("urn:example:fhir").expect("url"),
            Url::parse("https://auth.example.org").expect("url"),
            ChoicePolicy::default(),
        )
        .expect_err("no host");
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn environment_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "fhir_base_url: https://file.example.org/fhir/\nchoice_policy: reject"
        )
        .expect("write config");

        let overrides = ConfigOverrides::from_lookup(|key| match key {
            FHIR_BASE_URL_ENV => Some("https://env.example.org/fhir/".to_string()),
            OAUTH_ADDRESS_ENV => Some("   ".to_string()),
            _ => None,
        });
        let config = ServerConfig::resolve(Some(file.path()), overrides).expect("config");

        assert_eq!(config.fhir_base_url().host_str(), Some("env.example.org"));
        assert_eq!(config.oauth_address().as_str(), DEFAULT_OAUTH_ADDRESS);
        assert_eq!(config.choice_policy(), ChoicePolicy::Reject);
    }

    #[test]
    fn unknown_keys_are_rejected_with_a_path() {
        let err = parse_config_yaml("fhir_base_url: https://x.example.org/\nbase: nope\n")
            .expect_err("unknown key");
        match err {
            CoreError::InvalidConfig(message) => {
                assert!(message.contains("base"), "message was: {message}");
            }
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn bad_choice_policy_is_a_config_error() {
        let overrides = ConfigOverrides {
            choice_policy: Some("sometimes".into()),
            ..ConfigOverrides::default()
        };
        let err = ServerConfig::resolve(None, overrides).expect_err("bad policy");
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let missing = dir.path().join("medreq.yaml");
        let err = ServerConfig::resolve(Some(&missing), ConfigOverrides::default())
            .expect_err("missing file");
        assert!(matches!(err, CoreError::ConfigRead(_)));
    }
}
