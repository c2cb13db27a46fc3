//! Harvest targets and the target registry

use serde::{Deserialize, Serialize};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use crate::config::ConfigError;

/// One Spanner database to harvest metadata from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Cloud project that owns the instance
    pub project_id: String,

    /// Spanner instance ID
    pub instance_id: String,

    /// Spanner database ID
    pub database_id: String,
}

impl Target {
    /// Create a new target
    pub fn new(
        project_id: impl Into<String>,
        instance_id: impl Into<String>,
        database_id: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            instance_id: instance_id.into(),
            database_id: database_id.into(),
        }
    }

    /// Fully qualified Spanner resource name
    pub fn database_path(&self) -> String {
        format!(
            "projects/{}/instances/{}/databases/{}",
            self.project_id, self.instance_id, self.database_id
        )
    }

    /// Check identifiers against Cloud naming rules
    ///
    /// Returns a description of every problem found, empty if the target is valid.
    pub fn problems(&self) -> Vec<String> {
        let rules = match identifier_rules() {
            Ok(rules) => rules,
            Err(e) => return vec![format!("identifier rules failed to compile: {}", e)],
        };

        let mut problems = Vec::new();
        if !rules.project.is_match(&self.project_id) {
            problems.push(format!("invalid project_id '{}'", self.project_id));
        }
        if !rules.instance.is_match(&self.instance_id) {
            problems.push(format!("invalid instance_id '{}'", self.instance_id));
        }
        if !rules.database.is_match(&self.database_id) {
            problems.push(format!("invalid database_id '{}'", self.database_id));
        }

        problems
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project_id, self.instance_id, self.database_id)
    }
}

// Domain-scoped projects look like `example.com:my-project`.
const PROJECT_ID_PATTERN: &str = r"^([a-z][a-z0-9.\-]*:)?[a-z][a-z0-9\-]{4,28}[a-z0-9]$";
const INSTANCE_ID_PATTERN: &str = r"^[a-z][a-z0-9\-]{0,62}[a-z0-9]$";
const DATABASE_ID_PATTERN: &str = r"^[a-z][a-z0-9_\-]{0,28}[a-z0-9]$";

/// Compiled identifier patterns, shared by every validation
#[derive(Debug)]
struct IdentifierRules {
    project: Regex,
    instance: Regex,
    database: Regex,
}

fn identifier_rules() -> Result<&'static IdentifierRules, &'static regex::Error> {
    static RULES: OnceLock<Result<IdentifierRules, regex::Error>> = OnceLock::new();

    RULES
        .get_or_init(|| {
            Ok(IdentifierRules {
                project: Regex::new(PROJECT_ID_PATTERN)?,
                instance: Regex::new(INSTANCE_ID_PATTERN)?,
                database: Regex::new(DATABASE_ID_PATTERN)?,
            })
        })
        .as_ref()
}

/// Validated, ordered list of harvest targets
///
/// Construction fails fast on any malformed or duplicated entry so that no
/// extraction starts against a partially valid registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRegistry {
    targets: Vec<Target>,
}

impl TargetRegistry {
    /// Validate and wrap a list of targets, preserving order
    pub fn new(targets: Vec<Target>) -> Result<Self, ConfigError> {
        let mut invalid = Vec::new();
        for (index, target) in targets.iter().enumerate() {
            let problems = target.problems();
            if !problems.is_empty() {
                invalid.push(format!("targets[{}] ({}): {}", index, target, problems.join(", ")));
            }
        }

        if !invalid.is_empty() {
            return Err(ConfigError::InvalidTarget(invalid.join("; ")));
        }

        let mut seen = HashSet::new();
        for target in &targets {
            if !seen.insert(target) {
                return Err(ConfigError::DuplicateTarget(target.to_string()));
            }
        }

        Ok(Self { targets })
    }

    /// Targets in registry order
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Target> {
        self.targets.iter()
    }

    /// Distinct projects referenced by the registry, in first-seen order
    pub fn projects(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.targets
            .iter()
            .map(|t| t.project_id.as_str())
            .filter(|p| seen.insert(*p))
            .collect()
    }
}

impl<'a> IntoIterator for &'a TargetRegistry {
    type Item = &'a Target;
    type IntoIter = std::slice::Iter<'a, Target>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.iter()
    }
}
