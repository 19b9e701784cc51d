//! Spec file discovery and grouping.
//!
//! Discovery turns glob patterns into sorted, deduplicated lists of spec
//! paths relative to the workspace root, then groups them by domain:
//!
//! ```text
//!   pre_setup_pattern ──► discover_files ──► pre-setup files ─────────────┐
//!                                                                          │ excluded
//!   domain patterns ────► discover_files ──► per-domain groups ◄───────────┤
//!        or                                                                │
//!   spec_pattern ───────► discover_files ──► Classifier ──► domain groups ◄┘
//!                                                          + Unclassified
//! ```
//!
//! Nothing in this module is fatal once the patterns compile: unreadable
//! entries, vanished files and patterns with zero matches are logged and
//! skipped.

pub mod classify;

pub use classify::{Classifier, DomainTag};

use classify::MATCH_OPTIONS;

use std::collections::HashSet;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;

/// Errors raised while preparing discovery.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// A configured domain pattern is not a valid glob.
    #[error("Invalid domain pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    /// Two domains share a key, so their tasks would be indistinguishable.
    #[error("Duplicate domain key '{key}'")]
    DuplicateDomain { key: String },
}

/// Path of one spec file, relative to the workspace root, `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SpecFile(String);

impl SpecFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpecFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SpecFile {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Finds every file matching `pattern` under `root`.
///
/// The pattern is resolved against `root`; results are relative to it,
/// use `/` separators, and come back sorted without duplicates.
/// Directories are skipped, and dot-files only match when the pattern spells
/// out the leading dot. An invalid pattern yields an empty list.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use fanout::discovery::discover_files;
///
/// let files = discover_files(Path::new("/work"), "cypress/e2e/**/*.ui.spec.js");
/// for file in &files {
///     println!("{}", file);
/// }
/// ```
pub fn discover_files(root: &Path, pattern: &str) -> Vec<SpecFile> {
    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let full_pattern = if Path::new(pattern).is_absolute() {
        pattern.to_string()
    } else {
        format!("{}/{}", escaped_root.trim_end_matches('/'), pattern)
    };

    let entries = match glob::glob_with(&full_pattern, MATCH_OPTIONS) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Skipping invalid pattern '{}': {}", pattern, e);
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) => {
                if path.is_dir() {
                    continue;
                }
                files.push(SpecFile::new(relative_path(root, &path)));
            }
            Err(e) => warn!("Skipping unreadable entry: {}", e),
        }
    }

    files.sort();
    files.dedup();
    debug!("Pattern '{}' matched {} file(s)", pattern, files.len());
    files
}

fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::RootDir => Some(String::new()),
            _ => None,
        })
        .collect();
    parts.join("/")
}

/// How the file set was assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Each domain pattern discovered and chunked on its own.
    Domains,
    /// A single override pattern; domains only group the results.
    Override,
}

/// Files belonging to one domain.
#[derive(Debug, Clone, Serialize)]
pub struct DomainGroup {
    pub tag: DomainTag,
    pub name: String,
    pub files: Vec<SpecFile>,
}

/// Everything discovery found, ready to be partitioned.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryPlan {
    pub mode: DiscoveryMode,
    /// Specs that must pass before the parallel phase.
    pub pre_setup: Vec<SpecFile>,
    /// Groups in domain order; `Unclassified` last when present.
    pub groups: Vec<DomainGroup>,
}

impl DiscoveryPlan {
    /// Number of files in the parallel phase (pre-setup excluded).
    pub fn total_files(&self) -> usize {
        self.groups.iter().map(|g| g.files.len()).sum()
    }

    /// Returns `true` if there is nothing to run in either phase.
    pub fn is_empty(&self) -> bool {
        self.pre_setup.is_empty() && self.total_files() == 0
    }
}

/// Resolves the configured patterns into a [`DiscoveryPlan`].
pub struct Discoverer {
    root: PathBuf,
    config: DiscoveryConfig,
    classifier: Classifier,
}

impl Discoverer {
    /// # Errors
    ///
    /// Fails if a domain pattern does not compile or two domains share a key.
    pub fn new(root: impl Into<PathBuf>, config: DiscoveryConfig) -> Result<Self, DiscoveryError> {
        let classifier = Classifier::new(&config.domains)?;
        Ok(Self {
            root: root.into(),
            config,
            classifier,
        })
    }

    pub fn plan(&self) -> DiscoveryPlan {
        let pre_setup = match &self.config.pre_setup_pattern {
            Some(pattern) if !pattern.trim().is_empty() => discover_files(&self.root, pattern),
            _ => Vec::new(),
        };
        if !pre_setup.is_empty() {
            info!("Found {} pre-setup spec(s)", pre_setup.len());
        }

        let mut claimed: HashSet<SpecFile> = pre_setup.iter().cloned().collect();

        let (mode, groups) = match &self.config.spec_pattern {
            Some(pattern) => {
                info!("Using spec pattern override: {}", pattern);
                (
                    DiscoveryMode::Override,
                    self.override_groups(pattern, &claimed),
                )
            }
            None => (DiscoveryMode::Domains, self.domain_groups(&mut claimed)),
        };

        DiscoveryPlan {
            mode,
            pre_setup,
            groups,
        }
    }

    fn domain_groups(&self, claimed: &mut HashSet<SpecFile>) -> Vec<DomainGroup> {
        self.classifier
            .domains()
            .map(|domain| {
                let files: Vec<SpecFile> = discover_files(&self.root, &domain.pattern)
                    .into_iter()
                    .filter(|file| claimed.insert(file.clone()))
                    .collect();

                if files.is_empty() {
                    warn!("No spec files found for {} ({})", domain.name, domain.pattern);
                }

                DomainGroup {
                    tag: DomainTag::Domain(domain.key.clone()),
                    name: domain.name.clone(),
                    files,
                }
            })
            .collect()
    }

    fn override_groups(&self, pattern: &str, claimed: &HashSet<SpecFile>) -> Vec<DomainGroup> {
        let files: Vec<SpecFile> = discover_files(&self.root, pattern)
            .into_iter()
            .filter(|file| !claimed.contains(file))
            .collect();

        if files.is_empty() {
            warn!("No spec files found for pattern {}", pattern);
        }

        let mut groups: Vec<DomainGroup> = self
            .classifier
            .domains()
            .map(|domain| DomainGroup {
                tag: DomainTag::Domain(domain.key.clone()),
                name: domain.name.clone(),
                files: Vec::new(),
            })
            .collect();
        let mut unclassified = Vec::new();

        for file in files {
            match self.classifier.classify(file.as_str()) {
                DomainTag::Domain(key) => {
                    if let Some(group) = groups
                        .iter_mut()
                        .find(|g| matches!(&g.tag, DomainTag::Domain(k) if *k == key))
                    {
                        group.files.push(file);
                    }
                }
                DomainTag::Unclassified => unclassified.push(file),
            }
        }

        if !unclassified.is_empty() {
            groups.push(DomainGroup {
                tag: DomainTag::Unclassified,
                name: self.classifier.name_of(&DomainTag::Unclassified),
                files: unclassified,
            });
        }

        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;
    use tempfile::TempDir;

    fn touch(root: &Path, path: &str) {
        let full = root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, "describe('x', () => {});").unwrap();
    }

    fn workspace(files: &[&str]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for file in files {
            touch(dir.path(), file);
        }
        dir
    }

    fn paths(files: &[SpecFile]) -> Vec<&str> {
        files.iter().map(|f| f.as_str()).collect()
    }

    #[test]
    fn test_discover_files_sorted_and_relative() {
        let dir = workspace(&[
            "cypress/e2e/b.ui.spec.js",
            "cypress/e2e/nested/deep/a.ui.spec.js",
            "cypress/e2e/a.ui.spec.js",
            "cypress/e2e/readme.md",
        ]);
        let files = discover_files(dir.path(), "cypress/e2e/**/*.ui.spec.js");
        assert_eq!(
            paths(&files),
            vec![
                "cypress/e2e/a.ui.spec.js",
                "cypress/e2e/b.ui.spec.js",
                "cypress/e2e/nested/deep/a.ui.spec.js",
            ]
        );
    }

    #[test]
    fn test_discover_files_skips_directories() {
        let dir = workspace(&["cypress/e2e/real.ui.spec.js"]);
        std::fs::create_dir_all(dir.path().join("cypress/e2e/fake.ui.spec.js")).unwrap();
        let files = discover_files(dir.path(), "cypress/e2e/**/*.ui.spec.js");
        assert_eq!(paths(&files), vec!["cypress/e2e/real.ui.spec.js"]);
    }

    #[test]
    fn test_discover_files_no_matches() {
        let dir = workspace(&[]);
        assert!(discover_files(dir.path(), "cypress/**/*.spec.js").is_empty());
    }

    #[test]
    fn test_discover_files_skips_dot_files() {
        let dir = workspace(&[
            "cypress/e2e/a.ui.spec.js",
            "cypress/e2e/.draft.ui.spec.js",
            "cypress/e2e/.cache/b.ui.spec.js",
        ]);
        let files = discover_files(dir.path(), "cypress/e2e/**/*.ui.spec.js");
        assert_eq!(paths(&files), vec!["cypress/e2e/a.ui.spec.js"]);

        let explicit = discover_files(dir.path(), "cypress/e2e/.cache/*.ui.spec.js");
        assert_eq!(paths(&explicit), vec!["cypress/e2e/.cache/b.ui.spec.js"]);
    }

    #[test]
    fn test_duplicate_domain_keys_rejected() {
        let dir = workspace(&[]);
        let config = DiscoveryConfig {
            domains: vec![
                DomainConfig::new("ui", "UI", "cypress/integration/ui/**/*.spec.js"),
                DomainConfig::new("ui", "E2E", "cypress/e2e/**/*.spec.js"),
            ],
            ..Default::default()
        };
        assert!(matches!(
            Discoverer::new(dir.path(), config),
            Err(DiscoveryError::DuplicateDomain { .. })
        ));
    }

    #[test]
    fn test_discover_files_invalid_pattern() {
        let dir = workspace(&["cypress/a.spec.js"]);
        assert!(discover_files(dir.path(), "cypress/[.spec.js").is_empty());
    }

    #[test]
    fn test_plan_domain_mode() {
        let dir = workspace(&[
            "cypress/integration/api/booking.api.spec.js",
            "cypress/integration/ui/cart.ui.spec.js",
            "cypress/integration/ui/login.ui.spec.js",
            "cypress/e2e/checkout.ui.spec.js",
            "cypress/pre-setup/seed.spec.js",
        ]);
        let discoverer = Discoverer::new(dir.path(), DiscoveryConfig::default()).unwrap();
        let plan = discoverer.plan();

        assert_eq!(plan.mode, DiscoveryMode::Domains);
        assert_eq!(paths(&plan.pre_setup), vec!["cypress/pre-setup/seed.spec.js"]);
        assert_eq!(plan.groups.len(), 3);
        assert_eq!(plan.groups[0].name, "Integration API Tests");
        assert_eq!(plan.groups[1].files.len(), 2);
        assert_eq!(plan.total_files(), 4);
        assert!(!plan.is_empty());
    }

    #[test]
    fn test_plan_domain_mode_first_domain_claims_overlap() {
        let dir = workspace(&["cypress/e2e/shared.ui.spec.js", "cypress/e2e/only.spec.js"]);
        let config = DiscoveryConfig {
            domains: vec![
                DomainConfig::new("ui", "UI", "cypress/e2e/**/*.ui.spec.js"),
                DomainConfig::new("all", "All", "cypress/e2e/**/*.spec.js"),
            ],
            ..Default::default()
        };
        let plan = Discoverer::new(dir.path(), config).unwrap().plan();

        assert_eq!(paths(&plan.groups[0].files), vec!["cypress/e2e/shared.ui.spec.js"]);
        assert_eq!(paths(&plan.groups[1].files), vec!["cypress/e2e/only.spec.js"]);
    }

    #[test]
    fn test_plan_excludes_pre_setup_from_domains() {
        let dir = workspace(&[
            "cypress/e2e/setup/seed.ui.spec.js",
            "cypress/e2e/flow.ui.spec.js",
        ]);
        let config = DiscoveryConfig {
            pre_setup_pattern: Some("cypress/e2e/setup/*.spec.js".to_string()),
            ..Default::default()
        };
        let plan = Discoverer::new(dir.path(), config).unwrap().plan();

        assert_eq!(paths(&plan.pre_setup), vec!["cypress/e2e/setup/seed.ui.spec.js"]);
        let e2e = &plan.groups[2];
        assert_eq!(paths(&e2e.files), vec!["cypress/e2e/flow.ui.spec.js"]);
    }

    #[test]
    fn test_plan_override_mode_classifies() {
        let dir = workspace(&[
            "cypress/integration/api/a.api.spec.js",
            "cypress/e2e/b.ui.spec.js",
            "cypress/misc/c.spec.js",
            "cypress/pre-setup/seed.spec.js",
        ]);
        let config = DiscoveryConfig {
            spec_pattern: Some("cypress/**/*.spec.js".to_string()),
            ..Default::default()
        };
        let plan = Discoverer::new(dir.path(), config).unwrap().plan();

        assert_eq!(plan.mode, DiscoveryMode::Override);
        assert_eq!(plan.pre_setup.len(), 1);
        assert_eq!(plan.total_files(), 3);

        let unclassified = plan.groups.last().unwrap();
        assert_eq!(unclassified.tag, DomainTag::Unclassified);
        assert_eq!(paths(&unclassified.files), vec!["cypress/misc/c.spec.js"]);
        assert_eq!(paths(&plan.groups[0].files), vec!["cypress/integration/api/a.api.spec.js"]);
        assert!(plan.groups[1].files.is_empty());
    }

    #[test]
    fn test_plan_override_without_unclassified() {
        let dir = workspace(&["cypress/e2e/b.ui.spec.js"]);
        let config = DiscoveryConfig {
            spec_pattern: Some("cypress/e2e/*.ui.spec.js".to_string()),
            pre_setup_pattern: None,
            ..Default::default()
        };
        let plan = Discoverer::new(dir.path(), config).unwrap().plan();
        assert_eq!(plan.groups.len(), 3);
        assert!(plan.groups.iter().all(|g| g.tag != DomainTag::Unclassified));
    }

    #[test]
    fn test_plan_empty_workspace() {
        let dir = workspace(&[]);
        let plan = Discoverer::new(dir.path(), DiscoveryConfig::default())
            .unwrap()
            .plan();
        assert!(plan.is_empty());
        assert_eq!(plan.total_files(), 0);
    }

    #[test]
    fn test_relative_path_uses_forward_slashes() {
        let root = Path::new("/work");
        assert_eq!(
            relative_path(root, Path::new("/work/cypress/e2e/a.spec.js")),
            "cypress/e2e/a.spec.js"
        );
    }
}
