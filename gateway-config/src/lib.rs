//! Configuration for the tool gateway.
//!
//! Everything is read from `GATEWAY_*` environment variables. Loading goes
//! through a lookup function so callers (and tests) can supply values without
//! touching the process environment.

#![warn(missing_docs, clippy::pedantic)]

use std::fs;
use std::path::{Path, PathBuf};

use gateway_policy::{EnvelopeAuthenticator, EnvelopeMode, SigningSecret};
use gateway_primitives::ToolManifest;
use thiserror::Error;
use tracing::debug;

/// Comma-separated HMAC secrets accepted for envelopes.
pub const SIGNING_SECRETS: &str = "GATEWAY_SIGNING_SECRETS";
/// Whether every call must carry a verified envelope.
pub const REQUIRE_ENVELOPE: &str = "GATEWAY_REQUIRE_ENVELOPE";
/// Default initiator id.
pub const DEFAULT_INITIATOR: &str = "GATEWAY_DEFAULT_INITIATOR";
/// Comma-separated default roles.
pub const DEFAULT_ROLES: &str = "GATEWAY_DEFAULT_ROLES";
/// Default token reference.
pub const DEFAULT_TOKEN_REF: &str = "GATEWAY_DEFAULT_TOKEN_REF";
/// Default app id.
pub const APP_ID: &str = "GATEWAY_APP_ID";
/// Default environment name.
pub const ENVIRONMENT: &str = "GATEWAY_ENVIRONMENT";
/// Default cost center.
pub const COST_CENTER: &str = "GATEWAY_COST_CENTER";
/// Path of the tool manifest.
pub const MANIFEST_PATH: &str = "GATEWAY_MANIFEST_PATH";
/// Base of workflow status URLs.
pub const STATUS_BASE_URL: &str = "GATEWAY_STATUS_BASE_URL";
/// Activity type the progress projector tracks.
pub const CAPABILITY_ACTIVITY: &str = "GATEWAY_CAPABILITY_ACTIVITY";
/// Whether the usage ledger is enabled.
pub const USAGE_LEDGER: &str = "GATEWAY_USAGE_LEDGER";
/// Tracing filter directive.
pub const LOG_FILTER: &str = "GATEWAY_LOG";

/// Result alias for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is unset or blank.
    #[error("required variable `{name}` is not set")]
    Missing {
        /// Variable name.
        name: &'static str,
    },
    /// A boolean variable held something other than a boolean.
    #[error("variable `{name}` must be a boolean, got `{value}`")]
    InvalidBool {
        /// Variable name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
    /// A secret in the list was empty.
    #[error("variable `{name}` contains an empty secret")]
    EmptySecret {
        /// Variable name.
        name: &'static str,
    },
    /// Envelopes are required but no secret can verify them.
    #[error("envelopes are required but no signing secret is configured")]
    RequireWithoutSecret,
    /// The manifest file could not be read.
    #[error("failed to read manifest {path}: {source}")]
    ReadManifest {
        /// Manifest path.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The manifest file is not a valid manifest.
    #[error("invalid manifest {path}: {source}")]
    InvalidManifest {
        /// Manifest path.
        path: String,
        /// Underlying error.
        #[source]
        source: gateway_primitives::Error,
    },
}

/// Fully resolved gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    secrets: Vec<SigningSecret>,
    require_envelope: bool,
    default_initiator: String,
    default_roles: Vec<String>,
    default_token_ref: String,
    app_id: String,
    environment: String,
    cost_center: Option<String>,
    manifest_path: PathBuf,
    status_base_url: String,
    capability_activity: String,
    usage_ledger: bool,
    log_filter: String,
}

impl GatewayConfig {
    /// Loads configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`GatewayConfig::from_lookup`].
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through the supplied variable lookup.
    ///
    /// Blank values are treated as unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the manifest path is missing, a boolean or
    /// secret is malformed, or envelopes are required without any secret.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };
        let or = |name: &str, default: &str| get(name).unwrap_or_else(|| default.to_owned());

        let secrets = match get(SIGNING_SECRETS) {
            Some(raw) => raw
                .split(',')
                .map(|secret| {
                    SigningSecret::new(secret.trim())
                        .map_err(|_| ConfigError::EmptySecret { name: SIGNING_SECRETS })
                })
                .collect::<ConfigResult<Vec<_>>>()?,
            None => Vec::new(),
        };
        let require_envelope = parse_bool(REQUIRE_ENVELOPE, get(REQUIRE_ENVELOPE), false)?;
        if require_envelope && secrets.is_empty() {
            return Err(ConfigError::RequireWithoutSecret);
        }

        let manifest_path = get(MANIFEST_PATH)
            .map(PathBuf::from)
            .ok_or(ConfigError::Missing { name: MANIFEST_PATH })?;

        let config = Self {
            secrets,
            require_envelope,
            default_initiator: or(DEFAULT_INITIATOR, "gateway"),
            default_roles: split_list(get(DEFAULT_ROLES).as_deref()),
            default_token_ref: or(DEFAULT_TOKEN_REF, "none"),
            app_id: or(APP_ID, "tool-gateway"),
            environment: or(ENVIRONMENT, "development"),
            cost_center: get(COST_CENTER),
            manifest_path,
            status_base_url: or(STATUS_BASE_URL, "/workflows"),
            capability_activity: or(CAPABILITY_ACTIVITY, "executeCapability"),
            usage_ledger: parse_bool(USAGE_LEDGER, get(USAGE_LEDGER), true)?,
            log_filter: or(LOG_FILTER, "info"),
        };
        debug!(
            require_envelope = config.require_envelope,
            secrets = config.secrets.len(),
            manifest = %config.manifest_path.display(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Builds the envelope authenticator for the configured mode and secrets.
    #[must_use]
    pub fn authenticator(&self) -> EnvelopeAuthenticator {
        EnvelopeAuthenticator::new(
            EnvelopeMode::from_required(self.require_envelope),
            self.secrets.clone(),
        )
    }

    /// Reads and parses the tool manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadManifest`] or [`ConfigError::InvalidManifest`].
    pub fn load_manifest(&self) -> ConfigResult<ToolManifest> {
        read_manifest(&self.manifest_path)
    }

    /// Whether envelopes are mandatory.
    #[must_use]
    pub const fn require_envelope(&self) -> bool {
        self.require_envelope
    }

    /// Default initiator id.
    #[must_use]
    pub fn default_initiator(&self) -> &str {
        &self.default_initiator
    }

    /// Default roles.
    #[must_use]
    pub fn default_roles(&self) -> &[String] {
        &self.default_roles
    }

    /// Default token reference.
    #[must_use]
    pub fn default_token_ref(&self) -> &str {
        &self.default_token_ref
    }

    /// Default app id.
    #[must_use]
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Default environment.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Default cost center.
    #[must_use]
    pub fn cost_center(&self) -> Option<&str> {
        self.cost_center.as_deref()
    }

    /// Manifest location.
    #[must_use]
    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    /// Base of workflow status URLs.
    #[must_use]
    pub fn status_base_url(&self) -> &str {
        &self.status_base_url
    }

    /// Activity type tracked by the progress projector.
    #[must_use]
    pub fn capability_activity(&self) -> &str {
        &self.capability_activity
    }

    /// Whether the usage ledger is enabled.
    #[must_use]
    pub const fn usage_ledger(&self) -> bool {
        self.usage_ledger
    }

    /// Tracing filter directive.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }
}

/// Reads and parses a manifest file.
///
/// # Errors
///
/// Returns [`ConfigError::ReadManifest`] or [`ConfigError::InvalidManifest`].
pub fn read_manifest(path: &Path) -> ConfigResult<ToolManifest> {
    let document = fs::read_to_string(path).map_err(|source| ConfigError::ReadManifest {
        path: path.display().to_string(),
        source,
    })?;
    ToolManifest::from_json_str(&document).map_err(|source| ConfigError::InvalidManifest {
        path: path.display().to_string(),
        source,
    })
}

fn parse_bool(name: &'static str, value: Option<String>, default: bool) -> ConfigResult<bool> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidBool { name, value }),
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_owned)
            .collect()
    })
    .unwrap_or_default()
}
