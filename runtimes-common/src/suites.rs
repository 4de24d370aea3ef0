//! Suite registry and raw test-group resolution.
//!
//! A build event names the chunk that produced it (`mochitest-bc-3`); the
//! resolver maps that identifier to the canonical suite configured for the
//! event's platform (`mochitest-browser-chrome`).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised while building a registry or resolver.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A platform lists a suite that has no definition.
    #[error("platform '{platform}' references unknown suite '{suite}'")]
    UnknownSuite { platform: String, suite: String },

    /// A suite has no aliases and could never match.
    #[error("suite '{0}' has no aliases")]
    NoAliases(String),

    /// An alias produced an invalid pattern.
    #[error("invalid alias '{alias}' for suite '{suite}': {source}")]
    InvalidAlias {
        suite: String,
        alias: String,
        #[source]
        source: regex::Error,
    },
}

/// A canonical suite and the raw identifiers that belong to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteDefinition {
    pub name: String,
    /// Accepted raw test-group identifiers, without chunk suffix.
    pub names: Vec<String>,
}

impl SuiteDefinition {
    pub fn new(name: impl Into<String>, names: &[&str]) -> Self {
        Self {
            name: name.into(),
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

/// Static suite definitions plus the suites enabled on each platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteRegistry {
    suites: BTreeMap<String, SuiteDefinition>,
    /// Platform key to enabled suites, in resolution order.
    platforms: BTreeMap<String, Vec<String>>,
}

impl SuiteRegistry {
    /// Build a validated registry.
    pub fn new(
        suites: impl IntoIterator<Item = SuiteDefinition>,
        platforms: BTreeMap<String, Vec<String>>,
    ) -> Result<Self, RegistryError> {
        let suites: BTreeMap<String, SuiteDefinition> =
            suites.into_iter().map(|s| (s.name.clone(), s)).collect();

        if let Some(empty) = suites.values().find(|s| s.names.is_empty()) {
            return Err(RegistryError::NoAliases(empty.name.clone()));
        }

        for (platform, enabled) in &platforms {
            if let Some(missing) = enabled.iter().find(|s| !suites.contains_key(*s)) {
                return Err(RegistryError::UnknownSuite {
                    platform: platform.clone(),
                    suite: missing.clone(),
                });
            }
        }

        Ok(Self { suites, platforms })
    }

    /// Build a registry from the `[suites]` and `[platforms]` config tables.
    pub fn from_tables(
        suites: BTreeMap<String, Vec<String>>,
        platforms: BTreeMap<String, Vec<String>>,
    ) -> Result<Self, RegistryError> {
        let defs = suites
            .into_iter()
            .map(|(name, names)| SuiteDefinition { name, names });
        Self::new(defs, platforms)
    }

    /// The mochitest suites and platforms the accumulator ships with.
    pub fn builtin() -> Self {
        let suites = [
            SuiteDefinition::new(
                "mochitest-browser-chrome",
                &["mochitest-browser-chrome", "mochitest-bc"],
            ),
            SuiteDefinition::new(
                "mochitest-browser-chrome-e10s",
                &[
                    "mochitest-browser-chrome-e10s",
                    "mochitest-e10s-browser-chrome",
                    "mochitest-bc-e10s",
                ],
            ),
            SuiteDefinition::new("mochitest-devtools-chrome", &["mochitest-devtools-chrome"]),
            SuiteDefinition::new(
                "mochitest-e10s-devtools-chrome",
                &["mochitest-e10s-devtools-chrome"],
            ),
            SuiteDefinition::new("mochitest-gl", &["mochitest-gl"]),
            SuiteDefinition::new("mochitest-plain-e10s", &["mochitest-e10s"]),
            SuiteDefinition::new("mochitest-plain", &["mochitest", "mochitest-debug"]),
        ];

        const BC: &str = "mochitest-browser-chrome";
        const BC_E10S: &str = "mochitest-browser-chrome-e10s";
        const DT: &str = "mochitest-devtools-chrome";
        const DT_E10S: &str = "mochitest-e10s-devtools-chrome";
        const GL: &str = "mochitest-gl";
        const PLAIN_E10S: &str = "mochitest-plain-e10s";
        const PLAIN: &str = "mochitest-plain";

        let platforms: [(&str, &[&str]); 20] = [
            ("linux-opt", &[BC, BC_E10S, DT, GL, PLAIN_E10S, PLAIN]),
            ("linux-debug", &[BC, DT, GL, PLAIN_E10S, PLAIN]),
            ("linux64-opt", &[BC, BC_E10S, DT, DT_E10S, GL, PLAIN_E10S, PLAIN]),
            ("linux64_gecko-debug", &[BC, BC_E10S, PLAIN_E10S, PLAIN]),
            ("linux64-debug", &[BC, DT, GL, PLAIN_E10S, PLAIN]),
            ("macosx64-opt", &[BC, BC_E10S, DT, GL, PLAIN]),
            ("macosx64-debug", &[BC, DT, GL, PLAIN]),
            ("macosx64_gecko-opt", &[BC, PLAIN]),
            ("win32-opt", &[BC, BC_E10S, DT, GL, PLAIN]),
            ("win32-debug", &[BC, DT, GL, PLAIN]),
            ("win64-opt", &[BC, BC_E10S, DT, GL, PLAIN]),
            ("win64-debug", &[BC, DT, GL, PLAIN]),
            ("android-api-9-opt", &[PLAIN, GL]),
            ("android-api-11-opt", &[PLAIN, GL]),
            ("android-api-11-debug", &[PLAIN]),
            ("linux32_gecko-opt", &[PLAIN]),
            ("linux64_gecko-opt", &[PLAIN]),
            ("emulator-opt", &[PLAIN]),
            ("emulator-debug", &[PLAIN]),
            ("mulet-opt", &[PLAIN]),
        ];

        Self {
            suites: suites.into_iter().map(|s| (s.name.clone(), s)).collect(),
            platforms: platforms
                .into_iter()
                .map(|(p, s)| (p.to_string(), s.iter().map(|n| n.to_string()).collect()))
                .collect(),
        }
    }

    /// Whether events for this platform key are accepted at all.
    pub fn is_configured(&self, platform: &str) -> bool {
        self.platforms.contains_key(platform)
    }

    /// Suites enabled on a platform, in resolution order.
    pub fn suites_for(&self, platform: &str) -> &[String] {
        self.platforms
            .get(platform)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All (platform, suites) pairs.
    pub fn platforms(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.platforms
            .iter()
            .map(|(platform, suites)| (platform.as_str(), suites.as_slice()))
    }

    pub fn suite_count(&self) -> usize {
        self.suites.len()
    }

    pub fn platform_count(&self) -> usize {
        self.platforms.len()
    }
}

impl Default for SuiteRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Maps raw test-group identifiers to canonical suite names.
///
/// Each alias matches literally, optionally followed by a numeric chunk
/// suffix (`-3`). Patterns are compiled once up front.
#[derive(Debug, Clone)]
pub struct SuiteResolver {
    platforms: BTreeMap<String, Vec<String>>,
    patterns: BTreeMap<String, Vec<Regex>>,
}

impl SuiteResolver {
    pub fn new(registry: &SuiteRegistry) -> Result<Self, RegistryError> {
        let mut patterns = BTreeMap::new();
        for suite in registry.suites.values() {
            let compiled = suite
                .names
                .iter()
                .map(|alias| {
                    Regex::new(&format!("^{}(-[0-9]+)?$", regex::escape(alias))).map_err(
                        |source| RegistryError::InvalidAlias {
                            suite: suite.name.clone(),
                            alias: alias.clone(),
                            source,
                        },
                    )
                })
                .collect::<Result<Vec<_>, _>>()?;
            patterns.insert(suite.name.clone(), compiled);
        }

        Ok(Self {
            platforms: registry.platforms.clone(),
            patterns,
        })
    }

    /// Resolve a raw identifier on a platform; the first enabled suite wins.
    pub fn resolve(&self, raw: &str, platform: &str) -> Option<&str> {
        self.platforms.get(platform)?.iter().find_map(|suite| {
            self.patterns
                .get(suite)
                .filter(|aliases| aliases.iter().any(|re| re.is_match(raw)))
                .map(|_| suite.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn resolver() -> SuiteResolver {
        SuiteResolver::new(&SuiteRegistry::builtin()).unwrap()
    }

    #[test]
    fn test_builtin_registry_validates() {
        let builtin = SuiteRegistry::builtin();
        let rebuilt = SuiteRegistry::new(
            builtin.suites.values().cloned(),
            builtin.platforms.clone(),
        )
        .unwrap();
        assert_eq!(rebuilt, builtin);
        assert_eq!(builtin.suite_count(), 7);
        assert_eq!(builtin.platform_count(), 20);
    }

    #[test]
    fn test_resolve_bare_alias() {
        assert_eq!(
            resolver().resolve("mochitest-bc", "linux64-opt"),
            Some("mochitest-browser-chrome")
        );
    }

    #[test]
    fn test_resolve_chunk_suffix_matches_bare_alias() {
        let r = resolver();
        assert_eq!(
            r.resolve("mochitest-bc-3", "linux64-opt"),
            r.resolve("mochitest-bc", "linux64-opt")
        );
        assert_eq!(
            r.resolve("mochitest-12", "win32-debug"),
            Some("mochitest-plain")
        );
    }

    #[test]
    fn test_resolve_e10s_variant() {
        assert_eq!(
            resolver().resolve("mochitest-bc-e10s", "linux64-opt"),
            Some("mochitest-browser-chrome-e10s")
        );
        assert_eq!(
            resolver().resolve("mochitest-e10s-2", "linux-opt"),
            Some("mochitest-plain-e10s")
        );
    }

    #[test]
    fn test_resolve_suite_not_enabled_on_platform() {
        // e10s browser-chrome is not enabled on debug builds.
        assert_eq!(resolver().resolve("mochitest-bc-e10s", "linux64-debug"), None);
    }

    #[test]
    fn test_resolve_unknown_platform() {
        assert_eq!(resolver().resolve("mochitest-bc", "beos-opt"), None);
    }

    #[test]
    fn test_resolve_rejects_non_numeric_suffix_and_prefix_matches() {
        let r = resolver();
        assert_eq!(r.resolve("mochitest-bc-x", "linux64-opt"), None);
        assert_eq!(r.resolve("xmochitest-bc", "linux64-opt"), None);
        assert_eq!(r.resolve("mochitest-gl-", "linux64-opt"), None);
    }

    #[test]
    fn test_alias_is_matched_literally() {
        let registry = SuiteRegistry::new(
            [SuiteDefinition::new("dotted", &["a.b"])],
            BTreeMap::from([("p".to_string(), vec!["dotted".to_string()])]),
        )
        .unwrap();
        let r = SuiteResolver::new(&registry).unwrap();
        assert_eq!(r.resolve("a.b-2", "p"), Some("dotted"));
        assert_eq!(r.resolve("axb", "p"), None);
    }

    #[test]
    fn test_first_enabled_suite_wins() {
        let registry = SuiteRegistry::new(
            [
                SuiteDefinition::new("first", &["shared"]),
                SuiteDefinition::new("second", &["shared"]),
            ],
            BTreeMap::from([(
                "p".to_string(),
                vec!["second".to_string(), "first".to_string()],
            )]),
        )
        .unwrap();
        let r = SuiteResolver::new(&registry).unwrap();
        assert_eq!(r.resolve("shared", "p"), Some("second"));
    }

    #[test]
    fn test_unknown_suite_rejected() {
        let err = SuiteRegistry::new(
            [SuiteDefinition::new("a", &["a"])],
            BTreeMap::from([("p".to_string(), vec!["b".to_string()])]),
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownSuite { ref suite, .. } if suite == "b"));
    }

    #[test]
    fn test_suite_without_aliases_rejected() {
        let err = SuiteRegistry::from_tables(
            BTreeMap::from([("a".to_string(), Vec::new())]),
            BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RegistryError::NoAliases(_)));
    }

    #[test]
    fn test_suites_for_unknown_platform_is_empty() {
        assert!(SuiteRegistry::builtin().suites_for("nope").is_empty());
    }

    proptest! {
        #[test]
        fn prop_resolve_is_deterministic(raw in "[a-z0-9-]{0,32}", idx in 0usize..20) {
            let registry = SuiteRegistry::builtin();
            let (platform, _) = registry.platforms().nth(idx).unwrap();
            let r = SuiteResolver::new(&registry).unwrap();
            prop_assert_eq!(r.resolve(&raw, platform), r.resolve(&raw, platform));
        }

        #[test]
        fn prop_chunk_suffix_never_changes_resolution(chunk in 1u32..100) {
            let r = resolver();
            let chunked = format!("mochitest-devtools-chrome-{chunk}");
            prop_assert_eq!(
                r.resolve(&chunked, "win64-opt"),
                r.resolve("mochitest-devtools-chrome", "win64-opt")
            );
        }
    }
}
