//! Pattern catalog loading and validation.
//!
//! A catalog is a JSON document with a `targets` map (target key to
//! definition) and an optional `detectionConfig` block. Loading compiles
//! every regex and glob up front, so a malformed catalog fails here as a
//! configuration error instead of surfacing halfway through a detection
//! run.

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

use crate::{
    detection::signals::{
        DEFAULT_SCRIPT_GLOBS, Ecosystem, PathPattern, Probe, SignalEvaluator,
    },
    error::{DetectorError, Result},
    fs::FileSelector,
};

/// Engine-wide tuning read from the catalog's `detectionConfig` block.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)] // Use default for missing fields
pub struct DetectionConfig {
    /// Confidence a target needs to become a candidate.
    pub minimum_confidence: f64,
    /// Matched signals required before boost factors apply.
    pub minimum_signals_for_boost: usize,
    /// Maximum number of candidates reported.
    pub max_candidates: usize,
    /// Confidence at or above which a result is flagged high-confidence.
    pub high_confidence: f64,
    /// Files read per content-scanning signal unless it sets `maxFiles`.
    pub sample_size: usize,
    /// Maximum directory depth for glob expansion.
    pub max_glob_depth: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            minimum_confidence: 0.5,
            minimum_signals_for_boost: 2,
            max_candidates: 3,
            high_confidence: 0.8,
            sample_size: 20,
            max_glob_depth: 5,
        }
    }
}

impl DetectionConfig {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("minimum_confidence", self.minimum_confidence),
            ("high_confidence", self.high_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DetectorError::invalid_catalog(format!(
                    "detectionConfig.{field} must be within [0, 1], got {value}"
                )));
            }
        }

        if self.sample_size == 0 || self.max_glob_depth == 0 {
            return Err(DetectorError::invalid_catalog(
                "detectionConfig.sample_size and max_glob_depth must be > 0",
            ));
        }

        Ok(())
    }
}

/// One weighted piece of evidence declared by a target.
#[derive(Debug, Clone)]
pub struct SignalSpec {
    pub name: String,
    pub weight: f64,
    pub probe: Probe,
}

/// What has to be true for a boost factor to apply.
#[derive(Debug, Clone)]
pub enum BoostIndicator {
    /// A declared signal of the target matched.
    Signal(String),
    /// An auxiliary check evaluated only for boosting.
    Probe(Probe),
}

/// A named confidence multiplier.
#[derive(Debug, Clone)]
pub struct BoostFactor {
    pub name: String,
    pub multiplier: f64,
    pub indicator: BoostIndicator,
}

/// A detectable framework or tool.
#[derive(Debug, Clone)]
pub struct TargetDefinition {
    /// Catalog key, e.g. `terraform`.
    pub key: String,
    /// Display name. Defaults to the key.
    pub name: String,
    pub description: String,
    pub signals: Vec<SignalSpec>,
    pub boosts: Vec<BoostFactor>,
}

/// An immutable, ordered set of target definitions.
#[derive(Debug, Clone)]
pub struct Catalog {
    targets: Vec<TargetDefinition>,
    config: DetectionConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCatalog {
    targets: Map<String, Value>,
    #[serde(default)]
    detection_config: DetectionConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTarget {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    detection_signals: Map<String, Value>,
    #[serde(default)]
    boost_factors: Map<String, Value>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawCheck {
    kind: Option<String>,
    files: Vec<String>,
    paths: Vec<String>,
    patterns: Vec<String>,
    file_globs: Vec<String>,
    dependencies: Vec<String>,
    min_matches: Option<usize>,
    max_files: Option<usize>,
}

#[derive(Deserialize)]
struct RawSignal {
    weight: f64,
    #[serde(flatten)]
    check: RawCheck,
}

#[derive(Deserialize)]
struct RawBoost {
    multiplier: f64,
    #[serde(flatten)]
    check: RawCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalKind {
    PathExists,
    DirExists,
    ContentPattern,
    CliScript,
    Manifest(Ecosystem),
}

impl SignalKind {
    fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "configFiles" | "files" | "markerFiles" => SignalKind::PathExists,
            "directories" => SignalKind::DirExists,
            "importPatterns" | "contentPatterns" | "syntaxPatterns" => {
                SignalKind::ContentPattern
            }
            "cliScripts" => SignalKind::CliScript,
            "packageJson" => SignalKind::Manifest(Ecosystem::Npm),
            "gemfile" => SignalKind::Manifest(Ecosystem::RubyGems),
            "mixExs" => SignalKind::Manifest(Ecosystem::Hex),
            "csproj" => SignalKind::Manifest(Ecosystem::NuGet),
            _ => return None,
        };
        Some(kind)
    }

    /// Guess the kind of a boost indicator from the fields it sets.
    fn infer(check: &RawCheck) -> Option<Self> {
        if !check.dependencies.is_empty() {
            None
        } else if !check.patterns.is_empty() {
            Some(SignalKind::ContentPattern)
        } else if !check.paths.is_empty() {
            Some(SignalKind::DirExists)
        } else if !check.files.is_empty() {
            Some(SignalKind::PathExists)
        } else {
            None
        }
    }
}

fn compile_patterns(context: &str, patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                DetectorError::invalid_catalog(format!(
                    "{context}: invalid pattern '{p}': {e}"
                ))
            })
        })
        .collect()
}

fn compile_selectors(globs: &[String]) -> Result<Vec<FileSelector>> {
    globs.iter().map(|g| FileSelector::new(g)).collect()
}

fn require(context: &str, field: &str, values: &[String]) -> Result<()> {
    if values.is_empty() {
        return Err(DetectorError::invalid_catalog(format!(
            "{context}: '{field}' must list at least one entry"
        )));
    }
    Ok(())
}

fn build_probe(
    context: &str,
    kind: SignalKind,
    check: RawCheck,
) -> Result<Probe> {
    let evaluator = match kind {
        SignalKind::PathExists => {
            require(context, "files", &check.files)?;
            SignalEvaluator::PathExists {
                files: check
                    .files
                    .iter()
                    .map(|f| PathPattern::parse(f))
                    .collect::<Result<_>>()?,
            }
        }
        SignalKind::DirExists => {
            require(context, "paths", &check.paths)?;
            SignalEvaluator::DirExists { paths: check.paths }
        }
        SignalKind::ContentPattern => {
            require(context, "patterns", &check.patterns)?;
            require(context, "fileGlobs", &check.file_globs)?;
            SignalEvaluator::ContentPattern {
                selectors: compile_selectors(&check.file_globs)?,
                patterns: compile_patterns(context, &check.patterns)?,
            }
        }
        SignalKind::CliScript => {
            require(context, "patterns", &check.patterns)?;
            let globs = if check.file_globs.is_empty() {
                DEFAULT_SCRIPT_GLOBS.iter().map(|g| g.to_string()).collect()
            } else {
                check.file_globs
            };
            SignalEvaluator::CliScript {
                selectors: compile_selectors(&globs)?,
                patterns: compile_patterns(context, &check.patterns)?,
            }
        }
        SignalKind::Manifest(ecosystem) => {
            require(context, "dependencies", &check.dependencies)?;
            SignalEvaluator::ManifestDependency {
                ecosystem,
                dependencies: check.dependencies,
            }
        }
    };

    let min_matches = check.min_matches.unwrap_or(1);
    if min_matches == 0 {
        return Err(DetectorError::invalid_catalog(format!(
            "{context}: minMatches must be at least 1"
        )));
    }

    Ok(Probe {
        evaluator,
        min_matches,
        max_files: check.max_files,
    })
}

fn parse_signal(key: &str, name: &str, value: Value) -> Result<SignalSpec> {
    let context = format!("target '{key}' signal '{name}'");
    let raw: RawSignal = serde_json::from_value(value)?;

    if !raw.weight.is_finite() || raw.weight < 0.0 {
        return Err(DetectorError::invalid_catalog(format!(
            "{context}: weight must be a non-negative number"
        )));
    }

    let kind_name = raw.check.kind.clone().unwrap_or_else(|| name.to_string());
    let kind = SignalKind::from_name(&kind_name).ok_or_else(|| {
        DetectorError::invalid_catalog(format!(
            "{context}: unknown signal kind '{kind_name}'"
        ))
    })?;

    Ok(SignalSpec {
        name: name.to_string(),
        weight: raw.weight,
        probe: build_probe(&context, kind, raw.check)?,
    })
}

fn parse_boost(
    key: &str,
    name: &str,
    value: Value,
    signals: &[SignalSpec],
) -> Result<BoostFactor> {
    let context = format!("target '{key}' boost '{name}'");

    let (multiplier, indicator) = match value {
        Value::Number(n) => {
            if !signals.iter().any(|s| s.name == name) {
                return Err(DetectorError::invalid_catalog(format!(
                    "{context}: numeric boosts must share a name with a \
                     declared signal"
                )));
            }
            let multiplier = n.as_f64().unwrap_or(f64::NAN);
            (multiplier, BoostIndicator::Signal(name.to_string()))
        }
        value => {
            let raw: RawBoost = serde_json::from_value(value)?;
            let kind = match raw.check.kind.as_deref() {
                Some(kind_name) => SignalKind::from_name(kind_name),
                None => SignalKind::infer(&raw.check),
            }
            .ok_or_else(|| {
                DetectorError::invalid_catalog(format!(
                    "{context}: cannot determine indicator kind"
                ))
            })?;
            let probe = build_probe(&context, kind, raw.check)?;
            (raw.multiplier, BoostIndicator::Probe(probe))
        }
    };

    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(DetectorError::invalid_catalog(format!(
            "{context}: multiplier must be a number >= 1"
        )));
    }

    Ok(BoostFactor {
        name: name.to_string(),
        multiplier,
        indicator,
    })
}

fn parse_target(key: &str, value: Value) -> Result<TargetDefinition> {
    let raw: RawTarget = serde_json::from_value(value)?;

    let signals = raw
        .detection_signals
        .into_iter()
        .map(|(name, value)| parse_signal(key, &name, value))
        .collect::<Result<Vec<_>>>()?;

    let boosts = raw
        .boost_factors
        .into_iter()
        .map(|(name, value)| parse_boost(key, &name, value, &signals))
        .collect::<Result<Vec<_>>>()?;

    Ok(TargetDefinition {
        key: key.to_string(),
        name: raw.name.unwrap_or_else(|| key.to_string()),
        description: raw.description,
        signals,
        boosts,
    })
}

impl Catalog {
    /// Build a catalog directly from parts.
    pub fn new(
        targets: Vec<TargetDefinition>,
        config: DetectionConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self { targets, config })
    }

    /// Load and validate a catalog file. A missing file, unreadable file
    /// or invalid JSON is fatal.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DetectorError::CatalogNotFound(path.to_path_buf()));
            }
            Err(source) => {
                return Err(DetectorError::CatalogRead {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let catalog = Self::from_json(&content)?;
        log::debug!(
            "loaded {} targets from {}",
            catalog.targets.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Parse and validate a catalog document.
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: RawCatalog = serde_json::from_str(content)?;

        let targets = raw
            .targets
            .into_iter()
            .map(|(key, value)| parse_target(&key, value))
            .collect::<Result<Vec<_>>>()?;

        Self::new(targets, raw.detection_config)
    }

    /// Targets in catalog order.
    pub fn targets(&self) -> &[TargetDefinition] {
        &self.targets
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Target keys in catalog order.
    pub fn keys(&self) -> Vec<String> {
        self.targets.iter().map(|t| t.key.clone()).collect()
    }

    pub fn get(&self, key: &str) -> Option<&TargetDefinition> {
        self.targets.iter().find(|t| t.key == key)
    }

    /// Like [`Catalog::get`], but an unknown key is an invalid-target
    /// error naming every valid key.
    pub fn require(&self, key: &str) -> Result<&TargetDefinition> {
        self.get(key)
            .ok_or_else(|| DetectorError::invalid_target(key, self.keys()))
    }
}
