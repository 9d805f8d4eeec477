//! Deploy configuration.
//!
//! Loaded from JSON (`quayside.json` by default). Loose input shapes, like a
//! custom domain given either as a bare name or as an object, are resolved
//! here so the pipeline only sees typed values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifact::DEFAULT_UPLOAD_CONCURRENCY;
use crate::bundler::DEFAULT_BUNDLE_SIZE_LIMIT;
use crate::cache_policy::{CacheControlPolicy, CacheControlRule, DEFAULT_CACHE_CONTROL};
use crate::domain::{QuaysideError, Result};
use crate::retry::RetryPolicy;

/// Default config file name.
pub const DEFAULT_CONFIG_FILE: &str = "quayside.json";

/// A custom domain, as a bare name or with DNS and certificate details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CustomDomain {
    Plain(String),
    Structured {
        domain_name: String,
        #[serde(default)]
        alternate_names: Vec<String>,
        #[serde(default)]
        hosted_zone: Option<String>,
        #[serde(default)]
        certificate_arn: Option<String>,
    },
}

impl CustomDomain {
    pub fn domain_name(&self) -> &str {
        match self {
            CustomDomain::Plain(name) => name,
            CustomDomain::Structured { domain_name, .. } => domain_name,
        }
    }

    pub fn alternate_names(&self) -> &[String] {
        match self {
            CustomDomain::Plain(_) => &[],
            CustomDomain::Structured {
                alternate_names, ..
            } => alternate_names,
        }
    }
}

/// Upload tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,
    pub timeout_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            max_retries: retry.max_retries,
            backoff_base_ms: retry.backoff_base_ms,
            max_backoff_ms: retry.max_backoff_ms,
            timeout_ms: retry.timeout_ms,
        }
    }
}

impl UploadConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base_ms: self.backoff_base_ms,
            max_backoff_ms: self.max_backoff_ms,
            timeout_ms: self.timeout_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub site: String,
    pub build_dir: PathBuf,
    pub build_command: Option<String>,
    pub bundle_size_limit: u64,
    pub destination_prefix: String,
    pub dev_mode: bool,
    pub environment: BTreeMap<String, String>,
    pub cache_control: Vec<CacheControlRule>,
    pub default_cache_control: String,
    pub custom_domain: Option<CustomDomain>,
    pub distribution_domain: Option<String>,
    pub upload: UploadConfig,
    pub cleanup_stale: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            site: String::new(),
            build_dir: PathBuf::from("dist"),
            build_command: None,
            bundle_size_limit: DEFAULT_BUNDLE_SIZE_LIMIT,
            destination_prefix: String::new(),
            dev_mode: false,
            environment: BTreeMap::new(),
            cache_control: Vec::new(),
            default_cache_control: DEFAULT_CACHE_CONTROL.to_string(),
            custom_domain: None,
            distribution_domain: None,
            upload: UploadConfig::default(),
            cleanup_stale: false,
        }
    }
}

impl DeployConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file without validating it, so callers can apply
    /// overrides first.
    ///
    /// A relative `build_dir` is resolved against the file's directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path).map_err(|e| {
            QuaysideError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: DeployConfig = serde_json::from_slice(&raw).map_err(|e| {
            QuaysideError::InvalidConfig(format!("cannot parse {}: {}", path.display(), e))
        })?;
        if config.build_dir.is_relative() {
            if let Some(base) = path.parent() {
                config.build_dir = base.join(&config.build_dir);
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.site.trim().is_empty() {
            return Err(QuaysideError::InvalidConfig("site must not be empty".into()));
        }
        if self.site.contains('/') || self.site == "." || self.site == ".." {
            return Err(QuaysideError::InvalidConfig(format!(
                "site '{}' must be a single path segment",
                self.site
            )));
        }
        if self.bundle_size_limit == 0 {
            return Err(QuaysideError::InvalidConfig(
                "bundle_size_limit must be positive".into(),
            ));
        }
        if self.upload.concurrency == 0 {
            return Err(QuaysideError::InvalidConfig(
                "upload.concurrency must be positive".into(),
            ));
        }
        if self
            .destination_prefix
            .split('/')
            .any(|segment| segment == "..")
        {
            return Err(QuaysideError::InvalidConfig(format!(
                "destination_prefix '{}' must not contain '..'",
                self.destination_prefix
            )));
        }
        Ok(())
    }

    /// Prefix the site's namespaces live under. Defaults to the site name so
    /// sites sharing a destination store never share namespaces.
    pub fn publish_prefix(&self) -> &str {
        if self.destination_prefix.trim_matches('/').is_empty() {
            &self.site
        } else {
            &self.destination_prefix
        }
    }

    /// Where the site is served once published.
    pub fn public_url(&self) -> Option<String> {
        self.custom_domain
            .as_ref()
            .map(|d| d.domain_name().to_string())
            .or_else(|| self.distribution_domain.clone())
            .map(|host| format!("https://{}", host))
    }

    pub fn cache_policy(&self) -> Result<CacheControlPolicy> {
        CacheControlPolicy::new(&self.cache_control, self.default_cache_control.clone())
    }
}
