//! CLI argument parsing and the detect/override entry point.
use clap::Parser;
use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    Catalog, DetectOptions, DetectionCache, DetectionReport, Detector,
    LocalFileSystem, Result,
};

/// Environment variable consulted when `--catalog` is not given.
pub const CATALOG_ENV_VAR: &str = "STACKPROBE_CATALOG";

/// Catalog file looked up in the project root as a last resort.
pub const DEFAULT_CATALOG_FILE: &str = "detection-patterns.json";

/// Detect the frameworks and tools a project uses from a catalog of
/// weighted signals.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Project directory to analyze.
    #[arg(default_value = ".")]
    pub project_root: PathBuf,

    #[arg(long)]
    /// Pattern catalog JSON file. Falls back to STACKPROBE_CATALOG, then
    /// detection-patterns.json in the project root.
    pub catalog: Option<PathBuf>,

    #[arg(long, value_delimiter = ',')]
    /// Only analyze these catalog keys (comma separated).
    pub targets: Option<Vec<String>>,

    #[arg(long)]
    /// Override the catalog's minimum confidence (0.0 - 1.0).
    pub min_confidence: Option<f64>,

    #[arg(long, default_value_t = false)]
    /// Bypass the detection cache.
    pub no_cache: bool,

    #[arg(
        long,
        value_name = "TARGET",
        conflicts_with_all = ["targets", "min_confidence"]
    )]
    /// Skip detection and report TARGET with full confidence.
    pub r#override: Option<String>,

    #[arg(long, default_value_t = false)]
    /// Pretty-print the JSON report.
    pub pretty: bool,

    #[arg(long, default_value_t = false)]
    /// Enable debug logging.
    pub debug: bool,
}

impl Args {
    /// Resolve the catalog path from the flag, the environment, or the
    /// project root, in that order.
    pub fn catalog_path(&self) -> PathBuf {
        if let Some(path) = &self.catalog {
            return path.clone();
        }

        if let Ok(path) = env::var(CATALOG_ENV_VAR)
            && !path.is_empty()
        {
            return PathBuf::from(path);
        }

        self.project_root.join(DEFAULT_CATALOG_FILE)
    }

    pub fn detect_options(&self) -> DetectOptions {
        DetectOptions {
            targets: self.targets.clone(),
            minimum_confidence: self.min_confidence,
            use_cache: !self.no_cache,
        }
    }
}

/// Load the catalog and run detection (or the manual override).
pub async fn execute(args: &Args) -> Result<DetectionReport> {
    let catalog = Catalog::load(&args.catalog_path()).await?;

    let detector = Detector::new(
        Arc::new(catalog),
        Arc::new(LocalFileSystem::new()),
        Arc::new(DetectionCache::new()),
    );

    if let Some(target) = &args.r#override {
        return detector.manual_override(target);
    }

    detector
        .detect(&project_root(&args.project_root), &args.detect_options())
        .await
}

fn project_root(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DetectorError;
    use std::fs;
    use tempfile::TempDir;

    const CATALOG: &str = r#"{"targets": {
      "docker": { "detectionSignals": {
        "configFiles": { "weight": 1.0, "files": ["Dockerfile"] }
      }}
    }}"#;

    #[test]
    fn parses_detection_flags() {
        let args = Args::parse_from([
            "stackprobe",
            "some/project",
            "--targets",
            "docker,terraform",
            "--min-confidence",
            "0.3",
            "--no-cache",
        ]);

        assert_eq!(args.project_root, PathBuf::from("some/project"));
        let options = args.detect_options();
        assert_eq!(
            options.targets,
            Some(vec!["docker".to_string(), "terraform".to_string()])
        );
        assert_eq!(options.minimum_confidence, Some(0.3));
        assert!(!options.use_cache);
    }

    #[test]
    fn defaults_to_current_directory_with_cache() {
        let args = Args::parse_from(["stackprobe"]);
        assert_eq!(args.project_root, PathBuf::from("."));
        assert!(args.detect_options().use_cache);
        assert!(args.r#override.is_none());
    }

    #[test]
    fn override_conflicts_with_detection_flags() {
        let result = Args::try_parse_from([
            "stackprobe",
            "--override",
            "docker",
            "--targets",
            "docker",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn explicit_catalog_wins() {
        let args = Args::parse_from([
            "stackprobe",
            "proj",
            "--catalog",
            "/etc/catalog.json",
        ]);
        assert_eq!(args.catalog_path(), PathBuf::from("/etc/catalog.json"));
    }

    #[tokio::test]
    async fn execute_detects_and_overrides() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("Dockerfile"), "FROM alpine").unwrap();
        let catalog = temp.path().join("catalog.json");
        fs::write(&catalog, CATALOG).unwrap();

        let root = temp.path().to_str().unwrap();
        let catalog = catalog.to_str().unwrap();

        let args = Args::parse_from(["stackprobe", root, "--catalog", catalog]);
        let report = execute(&args).await.unwrap();
        assert!(report.detected);
        assert_eq!(report.tools[0].target, "docker");

        let args = Args::parse_from([
            "stackprobe",
            root,
            "--catalog",
            catalog,
            "--override",
            "docker",
        ]);
        assert!(execute(&args).await.unwrap().manual_override);

        let args = Args::parse_from([
            "stackprobe",
            root,
            "--catalog",
            catalog,
            "--override",
            "podman",
        ]);
        assert!(matches!(
            execute(&args).await,
            Err(DetectorError::InvalidTarget { .. })
        ));
    }

    #[tokio::test]
    async fn execute_fails_without_catalog() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.json");
        let args = Args::parse_from([
            "stackprobe",
            temp.path().to_str().unwrap(),
            "--catalog",
            missing.to_str().unwrap(),
        ]);

        assert!(matches!(
            execute(&args).await,
            Err(DetectorError::CatalogNotFound(_))
        ));
    }
}
