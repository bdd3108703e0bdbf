//! Signal evaluators.
//!
//! Each [`SignalEvaluator`] variant answers one cheap question about a
//! project tree (does a path exist, does a manifest declare a dependency,
//! does a pattern appear in a sample of files) and reports how many
//! sub-matches it found. A [`Probe`] wraps an evaluator with the
//! `minMatches` threshold that turns that count into present/absent.

use log::*;
use regex::Regex;
use serde_json::Value;
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use crate::fs::{FileSelector, FileSystem};

static GEMFILE_DEP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*gem\s+['"]([^'"]+)['"]"#).unwrap()
});

static MIX_DEP_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\s*:([A-Za-z0-9_]+)\s*,").unwrap());

static CSPROJ_DEP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<PackageReference\s+Include\s*=\s*"([^"]+)""#).unwrap()
});

const NPM_DEPENDENCY_SECTIONS: &[&str] = &[
    "dependencies",
    "devDependencies",
    "peerDependencies",
    "optionalDependencies",
];

/// Shell script globs scanned by CLI-script signals unless the catalog
/// supplies its own.
pub const DEFAULT_SCRIPT_GLOBS: &[&str] = &["**/*.sh", "**/*.bash", "**/*.zsh"];

/// Sampling bounds shared by every evaluator in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sampling {
    /// Maximum number of files read per content-scanning signal.
    pub sample_size: usize,
    /// Maximum directory depth for glob expansion.
    pub max_depth: usize,
}

/// Package ecosystems whose manifests can be scanned for dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ecosystem {
    /// `package.json`
    Npm,
    /// `Gemfile`
    RubyGems,
    /// `mix.exs`
    Hex,
    /// `*.csproj`
    NuGet,
}

impl Ecosystem {
    /// Manifest file name or glob, relative to the project root.
    pub fn manifest(&self) -> &'static str {
        match self {
            Ecosystem::Npm => "package.json",
            Ecosystem::RubyGems => "Gemfile",
            Ecosystem::Hex => "mix.exs",
            Ecosystem::NuGet => "**/*.csproj",
        }
    }

    fn case_insensitive(&self) -> bool {
        matches!(self, Ecosystem::NuGet)
    }

    /// Extract the dependency names a manifest declares.
    pub fn declared_dependencies(&self, content: &str) -> Vec<String> {
        let regex = match self {
            Ecosystem::Npm => return npm_dependencies(content),
            Ecosystem::RubyGems => &*GEMFILE_DEP_REGEX,
            Ecosystem::Hex => &*MIX_DEP_REGEX,
            Ecosystem::NuGet => &*CSPROJ_DEP_REGEX,
        };

        regex
            .captures_iter(content)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

fn npm_dependencies(content: &str) -> Vec<String> {
    let json: Value = match serde_json::from_str(content) {
        Ok(json) => json,
        Err(e) => {
            warn!("ignoring unparseable package.json: {e}");
            return vec![];
        }
    };

    NPM_DEPENDENCY_SECTIONS
        .iter()
        .filter_map(|section| json.get(section).and_then(Value::as_object))
        .flat_map(|deps| deps.keys().cloned())
        .collect()
}

fn npm_scripts(content: &str) -> Option<String> {
    let json: Value = serde_json::from_str(content).ok()?;
    let scripts = json.get("scripts")?.as_object()?;

    Some(
        scripts
            .values()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// Matches a catalog dependency entry against a declared name. Entries
/// ending in `*` match by prefix.
fn dependency_matches(wanted: &str, declared: &str, ignore_case: bool) -> bool {
    let (wanted, declared) = if ignore_case {
        (wanted.to_lowercase(), declared.to_lowercase())
    } else {
        (wanted.to_string(), declared.to_string())
    };

    match wanted.strip_suffix('*') {
        Some(prefix) => declared.starts_with(prefix),
        None => wanted == declared,
    }
}

/// A path that is either checked with a single stat or expanded as a glob.
#[derive(Debug, Clone)]
pub enum PathPattern {
    Literal(String),
    Glob(FileSelector),
}

impl PathPattern {
    pub fn parse(raw: &str) -> crate::Result<Self> {
        if FileSelector::is_glob(raw) {
            Ok(PathPattern::Glob(FileSelector::new(raw)?))
        } else {
            Ok(PathPattern::Literal(raw.to_string()))
        }
    }
}

/// The closed set of evidence checks the engine knows how to run.
#[derive(Debug, Clone)]
pub enum SignalEvaluator {
    /// Any of the listed files or globs exists.
    PathExists { files: Vec<PathPattern> },
    /// Any of the listed paths exists and is a directory.
    DirExists { paths: Vec<String> },
    /// Any pattern appears in a sample of the selected files.
    ContentPattern {
        selectors: Vec<FileSelector>,
        patterns: Vec<Regex>,
    },
    /// Any pattern appears in shell scripts or `package.json` scripts.
    CliScript {
        selectors: Vec<FileSelector>,
        patterns: Vec<Regex>,
    },
    /// The ecosystem manifest declares the listed dependencies.
    ManifestDependency {
        ecosystem: Ecosystem,
        dependencies: Vec<String>,
    },
}

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalOutcome {
    pub matched: bool,
    pub match_count: usize,
}

/// An evaluator plus the thresholds that apply to it.
#[derive(Debug, Clone)]
pub struct Probe {
    pub evaluator: SignalEvaluator,
    /// Sub-matches required before the signal counts as present.
    pub min_matches: usize,
    /// Per-signal override of [`Sampling::sample_size`].
    pub max_files: Option<usize>,
}

impl Probe {
    pub fn new(evaluator: SignalEvaluator) -> Self {
        Self {
            evaluator,
            min_matches: 1,
            max_files: None,
        }
    }

    /// Paths this probe stats or reads, with globs expanded under the same
    /// depth and sample bounds [`Probe::evaluate`] uses. Literal paths are
    /// listed whether or not they exist.
    pub async fn watched_files(
        &self,
        fs: &dyn FileSystem,
        root: &Path,
        sampling: Sampling,
    ) -> Vec<PathBuf> {
        let sample_size = self.max_files.unwrap_or(sampling.sample_size);

        match &self.evaluator {
            SignalEvaluator::PathExists { files } => {
                let mut watched = vec![];
                for file in files {
                    match file {
                        PathPattern::Literal(path) => {
                            watched.push(root.join(path))
                        }
                        PathPattern::Glob(selector) => watched.extend(
                            fs.glob(
                                root,
                                selector,
                                sampling.max_depth,
                                sample_size,
                            )
                            .await,
                        ),
                    }
                }
                watched
            }
            SignalEvaluator::DirExists { paths } => {
                paths.iter().map(|p| root.join(p)).collect()
            }
            SignalEvaluator::ContentPattern { selectors, .. } => {
                select_files(
                    fs,
                    root,
                    selectors,
                    sampling.max_depth,
                    sample_size,
                )
                .await
            }
            SignalEvaluator::CliScript { selectors, .. } => {
                let mut watched = vec![root.join(Ecosystem::Npm.manifest())];
                watched.extend(
                    select_files(
                        fs,
                        root,
                        selectors,
                        sampling.max_depth,
                        sample_size,
                    )
                    .await,
                );
                watched
            }
            SignalEvaluator::ManifestDependency { ecosystem, .. } => {
                manifest_paths(fs, root, *ecosystem, sampling, sample_size)
                    .await
            }
        }
    }

    /// Run the probe against `root`. Filesystem failures count as "not
    /// found" and never escape.
    pub async fn evaluate(
        &self,
        fs: &dyn FileSystem,
        root: &Path,
        sampling: Sampling,
    ) -> SignalOutcome {
        let wanted = self.min_matches.max(1);
        let sample_size = self.max_files.unwrap_or(sampling.sample_size);

        let match_count = match &self.evaluator {
            SignalEvaluator::PathExists { files } => {
                count_paths(fs, root, files, wanted, sampling.max_depth).await
            }
            SignalEvaluator::DirExists { paths } => {
                count_dirs(fs, root, paths).await
            }
            SignalEvaluator::ContentPattern {
                selectors,
                patterns,
            } => {
                let files = select_files(
                    fs,
                    root,
                    selectors,
                    sampling.max_depth,
                    sample_size,
                )
                .await;
                count_patterns(fs, &files, None, patterns, wanted).await
            }
            SignalEvaluator::CliScript {
                selectors,
                patterns,
            } => {
                let scripts = fs
                    .read_to_string(&root.join(Ecosystem::Npm.manifest()))
                    .await
                    .and_then(|content| npm_scripts(&content));
                let files = select_files(
                    fs,
                    root,
                    selectors,
                    sampling.max_depth,
                    sample_size,
                )
                .await;
                count_patterns(fs, &files, scripts, patterns, wanted).await
            }
            SignalEvaluator::ManifestDependency {
                ecosystem,
                dependencies,
            } => {
                count_dependencies(
                    fs,
                    root,
                    *ecosystem,
                    dependencies,
                    sampling,
                    sample_size,
                )
                .await
            }
        };

        SignalOutcome {
            matched: match_count >= wanted,
            match_count,
        }
    }
}

async fn count_paths(
    fs: &dyn FileSystem,
    root: &Path,
    files: &[PathPattern],
    wanted: usize,
    max_depth: usize,
) -> usize {
    let mut found = HashSet::new();

    // Cheap stats before any directory walk.
    for file in files {
        if let PathPattern::Literal(path) = file {
            let path = root.join(path);
            if fs.metadata(&path).await.is_some() {
                found.insert(path);
            }
        }
    }

    // A file matched by a literal and a glob counts once.
    for file in files {
        if found.len() >= wanted {
            break;
        }
        if let PathPattern::Glob(selector) = file {
            found.extend(fs.glob(root, selector, max_depth, wanted).await);
        }
    }

    found.len()
}

async fn count_dirs(
    fs: &dyn FileSystem,
    root: &Path,
    paths: &[String],
) -> usize {
    let mut count = 0;

    for path in paths {
        if fs
            .metadata(&root.join(path))
            .await
            .is_some_and(|stat| stat.is_dir)
        {
            count += 1;
        }
    }

    count
}

/// Expand selectors in order, de-duplicating, until `limit` files are
/// collected.
async fn select_files(
    fs: &dyn FileSystem,
    root: &Path,
    selectors: &[FileSelector],
    max_depth: usize,
    limit: usize,
) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut files = vec![];

    for selector in selectors {
        if files.len() >= limit {
            break;
        }

        let found = fs.glob(root, selector, max_depth, limit).await;
        for path in found {
            if files.len() >= limit {
                break;
            }
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }
    }

    files
}

/// Count distinct patterns found across `extra` text and `files`,
/// stopping as soon as `wanted` patterns have been seen.
async fn count_patterns(
    fs: &dyn FileSystem,
    files: &[PathBuf],
    extra: Option<String>,
    patterns: &[Regex],
    wanted: usize,
) -> usize {
    let mut found = vec![false; patterns.len()];
    let mut count = 0;

    if let Some(text) = extra {
        count = scan(&text, patterns, &mut found);
    }

    for file in files {
        if count >= wanted {
            break;
        }
        if let Some(content) = fs.read_to_string(file).await {
            count = scan(&content, patterns, &mut found);
        }
    }

    count
}

/// Mark every pattern that matches `content`, returning the running total.
fn scan(content: &str, patterns: &[Regex], found: &mut [bool]) -> usize {
    for (idx, pattern) in patterns.iter().enumerate() {
        if !found[idx] && pattern.is_match(content) {
            found[idx] = true;
        }
    }

    found.iter().filter(|f| **f).count()
}

async fn manifest_paths(
    fs: &dyn FileSystem,
    root: &Path,
    ecosystem: Ecosystem,
    sampling: Sampling,
    sample_size: usize,
) -> Vec<PathBuf> {
    let manifest = ecosystem.manifest();

    if !FileSelector::is_glob(manifest) {
        return vec![root.join(manifest)];
    }

    match FileSelector::new(manifest) {
        Ok(selector) => {
            fs.glob(root, &selector, sampling.max_depth, sample_size)
                .await
        }
        Err(_) => vec![],
    }
}

async fn count_dependencies(
    fs: &dyn FileSystem,
    root: &Path,
    ecosystem: Ecosystem,
    dependencies: &[String],
    sampling: Sampling,
    sample_size: usize,
) -> usize {
    let manifests =
        manifest_paths(fs, root, ecosystem, sampling, sample_size).await;

    let mut declared = vec![];
    for path in manifests {
        if let Some(content) = fs.read_to_string(&path).await {
            declared.extend(ecosystem.declared_dependencies(&content));
        }
    }

    let ignore_case = ecosystem.case_insensitive();

    dependencies
        .iter()
        .filter(|wanted| {
            declared
                .iter()
                .any(|name| dependency_matches(wanted, name, ignore_case))
        })
        .count()
}
