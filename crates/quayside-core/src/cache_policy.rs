//! Per-object HTTP metadata for staged files.
//!
//! Cache-control rules are passed through from configuration; the first rule
//! whose globs select a path wins, otherwise the default header applies.

use globset::{GlobSet, GlobSetBuilder};
use quayside_state::ObjectMetadata;
use serde::{Deserialize, Serialize};

use crate::domain::{QuaysideError, Result};
use crate::substitution::compile_glob;

/// Default `Cache-Control` for objects no rule selects.
pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=0, must-revalidate";

/// One configured rule.
///
/// A path is selected when it matches one of `include` (or `include` is
/// empty) and none of `exclude`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheControlRule {
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    pub cache_control: String,
}

#[derive(Debug, Clone)]
struct CompiledRule {
    exclude: GlobSet,
    include: Option<GlobSet>,
    cache_control: String,
}

fn compile_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile_glob(pattern)?.glob().clone());
    }
    builder.build().map_err(|e| QuaysideError::InvalidGlob {
        pattern: patterns.join(","),
        reason: e.to_string(),
    })
}

/// Compiled cache-control rules plus the default header.
#[derive(Debug, Clone)]
pub struct CacheControlPolicy {
    rules: Vec<CompiledRule>,
    default: String,
}

impl Default for CacheControlPolicy {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default: DEFAULT_CACHE_CONTROL.to_string(),
        }
    }
}

impl CacheControlPolicy {
    pub fn new(rules: &[CacheControlRule], default: impl Into<String>) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let include = if rule.include.is_empty() {
                    None
                } else {
                    Some(compile_globset(&rule.include)?)
                };
                Ok(CompiledRule {
                    exclude: compile_globset(&rule.exclude)?,
                    include,
                    cache_control: rule.cache_control.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rules,
            default: default.into(),
        })
    }

    /// `Cache-Control` for a relative path.
    pub fn cache_control_for(&self, path: &str) -> &str {
        self.rules
            .iter()
            .find(|rule| {
                rule.include.as_ref().map_or(true, |set| set.is_match(path))
                    && !rule.exclude.is_match(path)
            })
            .map_or(self.default.as_str(), |rule| rule.cache_control.as_str())
    }

    /// Full object metadata for a relative path.
    pub fn metadata_for(&self, path: &str) -> ObjectMetadata {
        ObjectMetadata {
            content_type: Some(content_type_for(path).to_string()),
            cache_control: Some(self.cache_control_for(path).to_string()),
        }
    }
}

/// Guess a `Content-Type` from the file extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "application/javascript; charset=utf-8",
        Some("json") | Some("map") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}
