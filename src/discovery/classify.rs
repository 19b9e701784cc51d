//! Domain classification of spec paths.

use std::collections::HashSet;
use std::fmt;

use glob::{MatchOptions, Pattern};
use serde::{Serialize, Serializer};

use super::DiscoveryError;
use crate::config::DomainConfig;

/// Options shared by every domain pattern.
///
/// `*` must not cross a path separator, so `cypress/e2e/*.spec.js` does not
/// match `cypress/e2e/nested/a.spec.js`. `**/` still spans any number of
/// directories, including none. Dot-files and dot-directories only match a
/// pattern that spells out the leading dot.
pub(crate) const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// The reporting domain a spec file belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DomainTag {
    /// A configured domain, identified by its key.
    Domain(String),
    /// Matched no configured domain pattern.
    Unclassified,
}

impl DomainTag {
    pub fn key(&self) -> &str {
        match self {
            DomainTag::Domain(key) => key,
            DomainTag::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for DomainTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl Serialize for DomainTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.key())
    }
}

/// Maps spec paths to domains by pattern.
///
/// Classification is a pure function of the path string: the file system is
/// never consulted. Domains are tried in configuration order and the first
/// match wins.
///
/// # Example
///
/// ```
/// use fanout::config::DomainConfig;
/// use fanout::discovery::{Classifier, DomainTag};
///
/// let classifier = Classifier::new(&[
///     DomainConfig::new("api", "API Tests", "cypress/integration/api/**/*.api.spec.js"),
/// ])?;
///
/// assert_eq!(
///     classifier.classify("cypress/integration/api/booking/get.api.spec.js"),
///     DomainTag::Domain("api".to_string())
/// );
/// assert_eq!(classifier.classify("cypress/other/x.spec.js"), DomainTag::Unclassified);
/// # Ok::<(), fanout::discovery::DiscoveryError>(())
/// ```
#[derive(Debug, Clone)]
pub struct Classifier {
    domains: Vec<(DomainConfig, Pattern)>,
}

impl Classifier {
    /// Compiles the domain patterns.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::InvalidPattern`] for the first domain whose
    /// pattern is not a valid glob, and [`DiscoveryError::DuplicateDomain`]
    /// when two domains share a key.
    pub fn new(domains: &[DomainConfig]) -> Result<Self, DiscoveryError> {
        let mut keys = HashSet::new();
        if let Some(domain) = domains.iter().find(|d| !keys.insert(d.key.as_str())) {
            return Err(DiscoveryError::DuplicateDomain {
                key: domain.key.clone(),
            });
        }

        let domains = domains
            .iter()
            .map(|domain| {
                Pattern::new(&domain.pattern)
                    .map(|pattern| (domain.clone(), pattern))
                    .map_err(|source| DiscoveryError::InvalidPattern {
                        pattern: domain.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { domains })
    }

    pub fn classify(&self, path: &str) -> DomainTag {
        self.domains
            .iter()
            .find(|(_, pattern)| pattern.matches_with(path, MATCH_OPTIONS))
            .map(|(domain, _)| DomainTag::Domain(domain.key.clone()))
            .unwrap_or(DomainTag::Unclassified)
    }

    /// Display name for a tag.
    pub fn name_of(&self, tag: &DomainTag) -> String {
        match tag {
            DomainTag::Domain(key) => self
                .domains
                .iter()
                .find(|(domain, _)| &domain.key == key)
                .map(|(domain, _)| domain.name.clone())
                .unwrap_or_else(|| key.clone()),
            DomainTag::Unclassified => "Unclassified".to_string(),
        }
    }

    pub fn domains(&self) -> impl Iterator<Item = &DomainConfig> {
        self.domains.iter().map(|(domain, _)| domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_classifier() -> Classifier {
        Classifier::new(&crate::config::DiscoveryConfig::default().domains).unwrap()
    }

    fn domain(key: &str) -> DomainTag {
        DomainTag::Domain(key.to_string())
    }

    #[test]
    fn test_classify_default_domains() {
        let classifier = default_classifier();
        assert_eq!(
            classifier.classify("cypress/integration/api/auth/token.api.spec.js"),
            domain("integrationApi")
        );
        assert_eq!(
            classifier.classify("cypress/integration/ui/cart.ui.spec.js"),
            domain("integrationUi")
        );
        assert_eq!(
            classifier.classify("cypress/e2e/checkout/flow/purchase.ui.spec.js"),
            domain("e2eUi")
        );
    }

    #[test]
    fn test_classify_requires_suffix() {
        let classifier = default_classifier();
        assert_eq!(
            classifier.classify("cypress/integration/api/auth/token.ui.spec.js"),
            DomainTag::Unclassified
        );
        assert_eq!(
            classifier.classify("cypress/e2e/helpers.js"),
            DomainTag::Unclassified
        );
    }

    #[test]
    fn test_single_star_does_not_cross_directories() {
        let classifier =
            Classifier::new(&[DomainConfig::new("flat", "Flat", "specs/*.spec.js")]).unwrap();
        assert_eq!(classifier.classify("specs/a.spec.js"), domain("flat"));
        assert_eq!(
            classifier.classify("specs/nested/a.spec.js"),
            DomainTag::Unclassified
        );
    }

    #[test]
    fn test_first_matching_domain_wins() {
        let classifier = Classifier::new(&[
            DomainConfig::new("narrow", "Narrow", "cypress/e2e/smoke/*.spec.js"),
            DomainConfig::new("wide", "Wide", "cypress/**/*.spec.js"),
        ])
        .unwrap();
        assert_eq!(
            classifier.classify("cypress/e2e/smoke/a.spec.js"),
            domain("narrow")
        );
        assert_eq!(classifier.classify("cypress/e2e/b.spec.js"), domain("wide"));
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        let err = Classifier::new(&[DomainConfig::new("bad", "Bad", "cypress/[.spec.js")])
            .unwrap_err();
        assert!(err.to_string().contains("cypress/[.spec.js"));
    }

    #[test]
    fn test_duplicate_domain_key_is_error() {
        let err = Classifier::new(&[
            DomainConfig::new("ui", "UI", "cypress/integration/ui/**/*.spec.js"),
            DomainConfig::new("api", "API", "cypress/integration/api/**/*.spec.js"),
            DomainConfig::new("ui", "More UI", "cypress/e2e/**/*.spec.js"),
        ])
        .unwrap_err();
        assert!(matches!(err, DiscoveryError::DuplicateDomain { ref key } if key == "ui"));
    }

    #[test]
    fn test_dot_files_need_literal_dot() {
        let classifier = Classifier::new(&[
            DomainConfig::new("all", "All", "cypress/**/*.spec.js"),
            DomainConfig::new("hidden", "Hidden", "cypress/.drafts/*.spec.js"),
        ])
        .unwrap();
        assert_eq!(
            classifier.classify("cypress/e2e/.scratch.spec.js"),
            DomainTag::Unclassified
        );
        assert_eq!(
            classifier.classify("cypress/.drafts/a.spec.js"),
            domain("hidden")
        );
    }

    #[test]
    fn test_names() {
        let classifier = default_classifier();
        assert_eq!(
            classifier.name_of(&domain("integrationUi")),
            "Integration UI Tests"
        );
        assert_eq!(classifier.name_of(&DomainTag::Unclassified), "Unclassified");
        assert_eq!(classifier.name_of(&domain("ghost")), "ghost");
    }

    #[test]
    fn test_tag_serializes_as_key() {
        let json = serde_json::to_string(&vec![domain("e2eUi"), DomainTag::Unclassified]).unwrap();
        assert_eq!(json, r#"["e2eUi","unclassified"]"#);
    }
}
