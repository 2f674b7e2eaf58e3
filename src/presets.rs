use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// ── Types ──

/// Comparison algorithm understood by the comparison service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompareMethod {
    /// Constant base weight only
    Base,
    /// Worst case by setting all variables to 100
    GuessWorst,
    ExactWorst,
    Asymptotic,
}

impl CompareMethod {
    pub const ALL: [CompareMethod; 4] = [
        CompareMethod::Base,
        CompareMethod::GuessWorst,
        CompareMethod::ExactWorst,
        CompareMethod::Asymptotic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareMethod::Base => "base",
            CompareMethod::GuessWorst => "guess-worst",
            CompareMethod::ExactWorst => "exact-worst",
            CompareMethod::Asymptotic => "asymptotic",
        }
    }
}

impl fmt::Display for CompareMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompareMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("Unknown method: {}", s))
    }
}

/// Unit the comparison is reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Unit {
    Weight,
    Time,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Weight => "weight",
            Unit::Time => "time",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weight" => Ok(Unit::Weight),
            "time" => Ok(Unit::Time),
            _ => Err(format!("Unknown unit: {}", s)),
        }
    }
}

/// Default comparison parameters for one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterPreset {
    pub repo: String,
    pub threshold: u32,
    /// Comma-separated globs matching the repo's weight files
    pub path_pattern: String,
    pub method: CompareMethod,
    pub ignore_errors: bool,
    pub unit: Unit,
}

impl ParameterPreset {
    /// The preset as `(query name, value)` pairs, in the order the
    /// comparison page expects them.
    pub fn query_pairs(&self) -> [(&'static str, String); 6] {
        [
            ("repo", self.repo.clone()),
            ("threshold", self.threshold.to_string()),
            ("path_pattern", self.path_pattern.clone()),
            ("method", self.method.to_string()),
            ("ignore_errors", self.ignore_errors.to_string()),
            ("unit", self.unit.to_string()),
        ]
    }
}

/// A preset table entry as it appears in `[presets.<repo>]` config sections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresetEntry {
    pub path_pattern: String,
    #[serde(default = "default_threshold")]
    pub threshold: u32,
    #[serde(default = "default_method")]
    pub method: CompareMethod,
    #[serde(default = "default_true")]
    pub ignore_errors: bool,
    #[serde(default = "default_unit")]
    pub unit: Unit,
}

fn default_threshold() -> u32 {
    10
}

fn default_method() -> CompareMethod {
    CompareMethod::Asymptotic
}

fn default_true() -> bool {
    true
}

fn default_unit() -> Unit {
    Unit::Time
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PresetError {
    #[error("Unknown repository: {0}")]
    UnknownRepository(String),
    #[error("No repository selected")]
    NoRepository,
    #[error("Invalid path pattern '{pattern}' for {repo}: {reason}")]
    InvalidPattern {
        repo: String,
        pattern: String,
        reason: String,
    },
}

impl PresetError {
    /// Both "nothing selected" and "not in the table" are the same failure
    /// to the user: there is no preset to compare with.
    pub fn is_unknown_repository(&self) -> bool {
        matches!(self, PresetError::UnknownRepository(_) | PresetError::NoRepository)
    }
}

// ── Table ──

const POLKADOT_SDK_PATTERNS: &[&str] = &[
    "substrate/frame/**/src/weights.rs",
    "polkadot/runtime/*/src/weights/**/*.rs",
    "polkadot/bridges/modules/*/src/weights.rs",
    "cumulus/**/weights/*.rs",
    "cumulus/**/weights/xcm/*.rs",
    "cumulus/**/src/weights.rs",
];

/// Repository → preset mapping. Resolution is pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetTable {
    entries: BTreeMap<String, PresetEntry>,
}

impl Default for PresetTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetTable {
    /// The canonical table shipped with the tool.
    pub fn builtin() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "polkadot-sdk".to_string(),
            PresetEntry {
                path_pattern: POLKADOT_SDK_PATTERNS.join(","),
                threshold: default_threshold(),
                method: CompareMethod::Asymptotic,
                ignore_errors: true,
                unit: Unit::Time,
            },
        );
        Self { entries }
    }

    /// Builtin table with config entries layered on top. Entries whose globs
    /// don't parse are skipped with a warning.
    pub fn with_overrides<'a, I>(overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a PresetEntry)>,
    {
        let mut table = Self::builtin();
        for (repo, entry) in overrides {
            if let Err(e) = table.insert(repo, entry.clone()) {
                log::warn!("Skipping preset: {}", e);
            }
        }
        table
    }

    pub fn insert(&mut self, repo: &str, entry: PresetEntry) -> Result<(), PresetError> {
        validate_patterns(repo, &entry.path_pattern)?;
        self.entries.insert(repo.to_string(), entry);
        Ok(())
    }

    /// Resolve the preset for `repo`. `None` means nothing is selected yet.
    pub fn resolve(&self, repo: Option<&str>) -> Result<ParameterPreset, PresetError> {
        let repo = repo.ok_or(PresetError::NoRepository)?;
        let entry = self
            .entries
            .get(repo)
            .ok_or_else(|| PresetError::UnknownRepository(repo.to_string()))?;

        Ok(ParameterPreset {
            repo: repo.to_string(),
            threshold: entry.threshold,
            path_pattern: entry.path_pattern.clone(),
            method: entry.method,
            ignore_errors: entry.ignore_errors,
            unit: entry.unit,
        })
    }

    pub fn repos(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

fn validate_patterns(repo: &str, path_pattern: &str) -> Result<(), PresetError> {
    let mut seen = 0usize;
    for pattern in path_pattern.split(',').map(str::trim) {
        if pattern.is_empty() {
            continue;
        }
        Pattern::new(pattern).map_err(|e| PresetError::InvalidPattern {
            repo: repo.to_string(),
            pattern: pattern.to_string(),
            reason: e.msg.to_string(),
        })?;
        seen += 1;
    }
    if seen == 0 {
        return Err(PresetError::InvalidPattern {
            repo: repo.to_string(),
            pattern: path_pattern.to_string(),
            reason: "no patterns".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn entry(path_pattern: &str) -> PresetEntry {
        PresetEntry {
            path_pattern: path_pattern.to_string(),
            threshold: 5,
            method: CompareMethod::GuessWorst,
            ignore_errors: true,
            unit: Unit::Weight,
        }
    }

    #[test]
    fn builtin_resolves_polkadot_sdk() {
        let preset = PresetTable::builtin().resolve(Some("polkadot-sdk")).unwrap();
        assert_eq!(preset.repo, "polkadot-sdk");
        assert_eq!(preset.threshold, 10);
        assert_eq!(preset.method, CompareMethod::Asymptotic);
        assert_eq!(preset.unit, Unit::Time);
        assert!(preset.ignore_errors);
        assert_eq!(preset.path_pattern.split(',').count(), 6);
        assert!(preset.path_pattern.starts_with("substrate/frame/**/src/weights.rs,"));
    }

    #[rstest]
    #[case(Some("substrate"))]
    #[case(Some("polkadot"))]
    #[case(Some(""))]
    #[case(None)]
    fn unknown_repos_fail(#[case] repo: Option<&str>) {
        let err = PresetTable::builtin().resolve(repo).unwrap_err();
        assert!(err.is_unknown_repository());
    }

    #[test]
    fn resolved_repo_matches_key_for_every_entry() {
        let mut table = PresetTable::builtin();
        table.insert("substrate", entry("frame/*/src/weights.rs")).unwrap();
        table.insert("cumulus", entry("parachains/runtimes/**/src/weights/*.rs")).unwrap();
        let repos: Vec<String> = table.repos().map(String::from).collect();
        assert_eq!(repos.len(), 3);
        for repo in repos {
            assert_eq!(table.resolve(Some(&repo)).unwrap().repo, repo);
        }
    }

    #[test]
    fn override_replaces_builtin_entry() {
        let overrides = BTreeMap::from([("polkadot-sdk".to_string(), entry("a/*.rs"))]);
        let table = PresetTable::with_overrides(&overrides);
        let preset = table.resolve(Some("polkadot-sdk")).unwrap();
        assert_eq!(preset.path_pattern, "a/*.rs");
        assert_eq!(preset.method, CompareMethod::GuessWorst);
    }

    #[test]
    fn invalid_glob_is_rejected() {
        let mut table = PresetTable::builtin();
        let err = table.insert("broken", entry("src/[weights.rs")).unwrap_err();
        assert!(matches!(err, PresetError::InvalidPattern { .. }));
        assert!(table.resolve(Some("broken")).is_err());
    }

    #[test]
    fn empty_pattern_is_rejected() {
        let mut table = PresetTable::builtin();
        assert!(table.insert("empty", entry(" , ")).is_err());
    }

    #[test]
    fn invalid_override_is_skipped_not_fatal() {
        let overrides = BTreeMap::from([
            ("good".to_string(), entry("x/*.rs")),
            ("bad".to_string(), entry("x/[*.rs")),
        ]);
        let table = PresetTable::with_overrides(&overrides);
        assert!(table.resolve(Some("good")).is_ok());
        assert!(table.resolve(Some("bad")).is_err());
    }

    #[test]
    fn method_strings_parse_back() {
        for method in CompareMethod::ALL {
            assert_eq!(method.as_str().parse::<CompareMethod>(), Ok(method));
        }
        assert!("fastest".parse::<CompareMethod>().is_err());
    }

    #[test]
    fn query_pairs_are_strings_in_page_order() {
        let preset = PresetTable::builtin().resolve(Some("polkadot-sdk")).unwrap();
        let names: Vec<&str> = preset.query_pairs().iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            ["repo", "threshold", "path_pattern", "method", "ignore_errors", "unit"]
        );
        assert_eq!(preset.query_pairs()[4].1, "true");
    }

    #[test]
    fn preset_entry_defaults_from_toml() {
        let entry: PresetEntry = toml::from_str(r#"path_pattern = "runtime/**/*.rs""#).unwrap();
        assert_eq!(entry.threshold, 10);
        assert_eq!(entry.method, CompareMethod::Asymptotic);
        assert!(entry.ignore_errors);
        assert_eq!(entry.unit, Unit::Time);
    }
}
