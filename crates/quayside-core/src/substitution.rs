//! Placeholder Substitution Engine.
//!
//! `compile` turns declared environment variables into plain rule data. The
//! rules are only applied by the orchestrator, against the staged namespace.
//! Literal `{{ NAME }}` text the build emits for other reasons is rewritten
//! too; that limitation is accepted.

use std::collections::BTreeMap;

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{QuaysideError, Result};

/// Script assets anywhere in the tree.
pub const SCRIPT_PATTERN: &str = "**/*.js";
/// The site's entry document.
pub const ENTRY_DOCUMENT_PATTERN: &str = "index.html";

/// Replace `token` with `replacement` in files whose relative path matches
/// `file_pattern`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubstitutionRule {
    pub file_pattern: String,
    pub token: String,
    pub replacement: String,
}

impl SubstitutionRule {
    pub fn new(
        file_pattern: impl Into<String>,
        token: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        Self {
            file_pattern: file_pattern.into(),
            token: token.into(),
            replacement: replacement.into(),
        }
    }
}

/// The literal token for an environment variable.
pub fn token_for(name: &str) -> String {
    format!("{{{{ {} }}}}", name)
}

fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Compile rules for every declared variable, in name order.
///
/// Each variable yields two rules: one for script assets and one for the
/// entry document.
pub fn compile(env: &BTreeMap<String, String>) -> Result<Vec<SubstitutionRule>> {
    let mut rules = Vec::with_capacity(env.len() * 2);
    for (name, value) in env {
        if !is_valid_env_name(name) {
            return Err(QuaysideError::InvalidEnvName(name.clone()));
        }
        let token = token_for(name);
        rules.push(SubstitutionRule::new(SCRIPT_PATTERN, &token, value));
        rules.push(SubstitutionRule::new(ENTRY_DOCUMENT_PATTERN, token, value));
    }
    Ok(rules)
}

/// SHA-256 over the serialized rule list.
///
/// Two rule lists with the same digest rewrite staged content identically.
pub fn rules_digest(rules: &[SubstitutionRule]) -> Result<String> {
    let json = serde_json::to_vec(rules)?;
    Ok(hex::encode(Sha256::digest(&json)))
}

pub(crate) fn compile_glob(pattern: &str) -> Result<GlobMatcher> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| QuaysideError::InvalidGlob {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}

/// Rules with their patterns compiled, ready to apply.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<(GlobMatcher, SubstitutionRule)>,
}

impl RuleSet {
    /// Compile every pattern up front so a bad glob fails before any
    /// content is touched.
    pub fn new(rules: &[SubstitutionRule]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| Ok((compile_glob(&rule.file_pattern)?, rule.clone())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Digest of the rules this set was built from, see [`rules_digest`].
    pub fn digest(&self) -> Result<String> {
        let rules: Vec<SubstitutionRule> = self.rules.iter().map(|(_, r)| r.clone()).collect();
        rules_digest(&rules)
    }

    /// Whether any rule targets `path`.
    pub fn matches(&self, path: &str) -> bool {
        self.rules.iter().any(|(m, _)| m.is_match(path))
    }

    /// Apply every matching rule to `content`, in rule order.
    ///
    /// Returns `None` when no rule matched the path, the content is not
    /// UTF-8, or no token occurred. Otherwise returns the rewritten bytes.
    pub fn apply(&self, path: &str, content: &[u8]) -> Option<Vec<u8>> {
        let mut matching = self
            .rules
            .iter()
            .filter(|(m, _)| m.is_match(path))
            .map(|(_, rule)| rule)
            .peekable();
        matching.peek()?;

        let mut text = std::str::from_utf8(content).ok()?.to_string();
        let mut changed = false;
        for rule in matching {
            if text.contains(&rule.token) {
                text = text.replace(&rule.token, &rule.replacement);
                changed = true;
            }
        }
        changed.then(|| text.into_bytes())
    }
}
