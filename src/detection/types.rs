use serde::Serialize;
use std::collections::BTreeMap;

/// Name of the synthetic signal recorded by a manual override.
pub const MANUAL_OVERRIDE_SIGNAL: &str = "manualOverride";

/// Per-target outcome of one detection run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    /// Catalog key of the target
    pub target: String,
    /// Display name of the target
    pub name: String,
    /// Confidence score (0.0 - 1.0), after boosting
    pub confidence: f64,
    /// Confidence relative to the best score in the batch. Absent when
    /// nothing in the batch scored above zero.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_confidence: Option<f64>,
    /// Whether each declared signal matched
    pub signals: BTreeMap<String, bool>,
    /// Number of entries in `signals` that matched
    pub signal_count: usize,
    pub high_confidence: bool,
    /// Multiplier applied by boost factors, exactly 1.0 when none applied
    pub boost_multiplier: f64,
    pub manual_override: bool,
}

/// Counters describing a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionSummary {
    pub total_analyzed: usize,
    pub detected_count: usize,
    pub minimum_confidence: f64,
}

/// Timing metadata. Excluded from report comparisons.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Performance {
    pub detection_time_ms: u64,
    pub cache_hit: bool,
}

/// Everything a caller gets back from a detection call.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    /// True when at least one candidate cleared the threshold
    pub detected: bool,
    /// Ranked candidates, at most `max_candidates`
    pub tools: Vec<DetectionResult>,
    /// Every analyzed target, sorted by confidence
    pub all_results: Vec<DetectionResult>,
    pub detection_summary: DetectionSummary,
    pub manual_override: bool,
    /// Other candidates considered. Always empty for a manual override.
    pub alternates: Vec<String>,
    pub performance: Performance,
}

impl PartialEq for DetectionReport {
    fn eq(&self, other: &Self) -> bool {
        self.detected == other.detected
            && self.tools == other.tools
            && self.all_results == other.all_results
            && self.detection_summary == other.detection_summary
            && self.manual_override == other.manual_override
            && self.alternates == other.alternates
    }
}

/// Per-call options for [`crate::Detector::detect`].
#[derive(Debug, Clone, PartialEq)]
pub struct DetectOptions {
    /// Restrict detection to these catalog keys.
    pub targets: Option<Vec<String>>,
    /// Override the catalog's `minimum_confidence`.
    pub minimum_confidence: Option<f64>,
    /// Consult and populate the detection cache.
    pub use_cache: bool,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            targets: None,
            minimum_confidence: None,
            use_cache: true,
        }
    }
}
