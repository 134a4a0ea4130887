//! Rules Router
//!
//! Regex rules loaded from a TOML file:
//!
//! ```toml
//! [[rule]]
//! name = "web"
//! pattern = "^servers\\.web"
//! destinations = ["10.0.0.1:2004:a"]
//! continue = true
//!
//! [[rule]]
//! name = "everything-else"
//! default = true
//! destinations = ["10.0.0.2:2004:b"]
//! ```

use crate::domain::ports::Router;
use crate::domain::value_objects::DestinationKey;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("can't read rules file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid rules file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("rule '{name}' has an invalid pattern: {source}")]
    Pattern { name: String, source: regex::Error },
    #[error("rule '{0}' needs either a pattern or default = true")]
    MissingPattern(String),
    #[error("rule '{0}' has no destinations")]
    NoDestinations(String),
    #[error("rule '{rule}' routes to {destination}, which is not a configured destination")]
    UnknownDestination {
        rule: String,
        destination: DestinationKey,
    },
    #[error("no default rule defined")]
    MissingDefault,
    #[error("only one default rule is allowed")]
    MultipleDefaults,
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(rename = "rule", default)]
    rules: Vec<RuleEntry>,
}

#[derive(Debug, Deserialize)]
struct RuleEntry {
    name: Option<String>,
    pattern: Option<String>,
    #[serde(default)]
    destinations: Vec<DestinationKey>,
    #[serde(rename = "continue", default)]
    continue_matching: bool,
    #[serde(default)]
    default: bool,
}

#[derive(Debug)]
struct Rule {
    pattern: Regex,
    destinations: Vec<DestinationKey>,
    continue_matching: bool,
}

/// Router that sends each metric to the destinations of the rules it matches.
#[derive(Debug)]
pub struct RulesRouter {
    rules: Vec<Rule>,
    default_destinations: Vec<DestinationKey>,
    destination_count: usize,
}

impl RulesRouter {
    pub fn from_file(
        path: impl AsRef<Path>,
        configured: &[DestinationKey],
    ) -> Result<Self, RulesError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RulesError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text, configured)
    }

    /// Parse and validate rules against the configured destination list.
    pub fn from_toml(text: &str, configured: &[DestinationKey]) -> Result<Self, RulesError> {
        let file: RulesFile = toml::from_str(text)?;

        let mut rules = Vec::new();
        let mut default_destinations = None;

        for (index, entry) in file.rules.into_iter().enumerate() {
            let name = entry.name.unwrap_or_else(|| format!("#{}", index + 1));

            if entry.destinations.is_empty() {
                return Err(RulesError::NoDestinations(name));
            }
            if let Some(destination) = entry
                .destinations
                .iter()
                .find(|d| !configured.contains(d))
            {
                return Err(RulesError::UnknownDestination {
                    rule: name,
                    destination: destination.clone(),
                });
            }

            if entry.default {
                if default_destinations.is_some() {
                    return Err(RulesError::MultipleDefaults);
                }
                default_destinations = Some(entry.destinations);
                continue;
            }

            let pattern = entry
                .pattern
                .ok_or_else(|| RulesError::MissingPattern(name.clone()))?;
            let pattern =
                Regex::new(&pattern).map_err(|source| RulesError::Pattern { name, source })?;

            rules.push(Rule {
                pattern,
                destinations: entry.destinations,
                continue_matching: entry.continue_matching,
            });
        }

        Ok(Self {
            rules,
            default_destinations: default_destinations.ok_or(RulesError::MissingDefault)?,
            destination_count: configured.len(),
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

fn extend_unique(out: &mut Vec<DestinationKey>, keys: &[DestinationKey]) {
    for key in keys {
        if !out.contains(key) {
            out.push(key.clone());
        }
    }
}

impl Router for RulesRouter {
    fn resolve(&self, metric: &str) -> Vec<DestinationKey> {
        let mut out = Vec::new();
        for rule in &self.rules {
            if rule.pattern.is_match(metric) {
                extend_unique(&mut out, &rule.destinations);
                if !rule.continue_matching {
                    return out;
                }
            }
        }
        extend_unique(&mut out, &self.default_destinations);
        out
    }

    fn replication_factor(&self) -> usize {
        1
    }

    fn destination_count(&self) -> usize {
        self.destination_count
    }
}
