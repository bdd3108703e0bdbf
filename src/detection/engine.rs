use futures_util::future::join_all;
use log::*;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
    sync::Arc,
    time::Instant,
};

use crate::{
    catalog::{BoostIndicator, Catalog, TargetDefinition},
    detection::{
        cache::{DetectionCache, cache_key},
        scoring,
        signals::{Sampling, SignalOutcome},
        types::{
            DetectOptions, DetectionReport, DetectionResult,
            DetectionSummary, MANUAL_OVERRIDE_SIGNAL, Performance,
        },
    },
    error::{DetectorError, Result},
    fs::FileSystem,
};

/// Runs catalog targets against a project tree.
///
/// The catalog, filesystem and cache are all supplied by the caller, so
/// several detectors can share one cache or keep their own.
pub struct Detector {
    catalog: Arc<Catalog>,
    fs: Arc<dyn FileSystem>,
    cache: Arc<DetectionCache>,
}

impl Detector {
    pub fn new(
        catalog: Arc<Catalog>,
        fs: Arc<dyn FileSystem>,
        cache: Arc<DetectionCache>,
    ) -> Self {
        Self { catalog, fs, cache }
    }

    /// Detect which catalog targets are present under `root`.
    pub async fn detect(
        &self,
        root: &Path,
        options: &DetectOptions,
    ) -> Result<DetectionReport> {
        let started = Instant::now();
        let config = self.catalog.config();
        let threshold = self.threshold(options)?;
        let targets = self.select_targets(options.targets.as_deref())?;

        debug!(
            "detecting {} targets under {}",
            targets.len(),
            root.display()
        );

        let (all_results, cache_hit) = if options.use_cache {
            let key = cache_key(
                self.fs.as_ref(),
                root,
                &targets,
                self.sampling(),
            )
            .await;
            match self.cache.get(&key).await {
                Some(results) => {
                    debug!("cache hit for {}", root.display());
                    (results, true)
                }
                None => {
                    let results = self.analyze(root, &targets).await;
                    self.cache.insert(key, results.clone()).await;
                    (results, false)
                }
            }
        } else {
            (self.analyze(root, &targets).await, false)
        };

        let tools = scoring::select_candidates(
            &all_results,
            threshold,
            config.max_candidates,
        );

        info!(
            "{} of {} targets detected under {}",
            tools.len(),
            all_results.len(),
            root.display()
        );

        let alternates =
            tools.iter().skip(1).map(|r| r.target.clone()).collect();

        Ok(DetectionReport {
            detected: !tools.is_empty(),
            alternates,
            detection_summary: DetectionSummary {
                total_analyzed: all_results.len(),
                detected_count: tools.len(),
                minimum_confidence: threshold,
            },
            manual_override: false,
            performance: Performance {
                detection_time_ms: started.elapsed().as_millis() as u64,
                cache_hit,
            },
            tools,
            all_results,
        })
    }

    /// Report `target` as detected with certainty, without looking at the
    /// filesystem or the cache.
    pub fn manual_override(&self, target: &str) -> Result<DetectionReport> {
        let definition = self.catalog.require(target)?;

        info!("manual override: {}", definition.key);

        let result = DetectionResult {
            target: definition.key.clone(),
            name: definition.name.clone(),
            confidence: 1.0,
            normalized_confidence: Some(1.0),
            signals: BTreeMap::from([(
                MANUAL_OVERRIDE_SIGNAL.to_string(),
                true,
            )]),
            signal_count: 1,
            high_confidence: true,
            boost_multiplier: 1.0,
            manual_override: true,
        };

        Ok(DetectionReport {
            detected: true,
            tools: vec![result.clone()],
            all_results: vec![result],
            detection_summary: DetectionSummary {
                total_analyzed: 1,
                detected_count: 1,
                minimum_confidence: self.catalog.config().minimum_confidence,
            },
            manual_override: true,
            alternates: vec![],
            performance: Performance::default(),
        })
    }

    fn sampling(&self) -> Sampling {
        let config = self.catalog.config();
        Sampling {
            sample_size: config.sample_size,
            max_depth: config.max_glob_depth,
        }
    }

    fn threshold(&self, options: &DetectOptions) -> Result<f64> {
        match options.minimum_confidence {
            Some(value) if !(0.0..=1.0).contains(&value) => {
                Err(DetectorError::invalid_args(format!(
                    "minimum confidence must be within [0, 1], got {value}"
                )))
            }
            Some(value) => Ok(value),
            None => Ok(self.catalog.config().minimum_confidence),
        }
    }

    /// Requested targets in catalog order. Unknown keys are rejected.
    fn select_targets(
        &self,
        keys: Option<&[String]>,
    ) -> Result<Vec<&TargetDefinition>> {
        let Some(keys) = keys else {
            return Ok(self.catalog.targets().iter().collect());
        };

        for key in keys {
            self.catalog.require(key)?;
        }

        let wanted: HashSet<&str> = keys.iter().map(String::as_str).collect();

        Ok(self
            .catalog
            .targets()
            .iter()
            .filter(|t| wanted.contains(t.key.as_str()))
            .collect())
    }

    /// Evaluate, score, boost, normalize and rank `targets`.
    async fn analyze(
        &self,
        root: &Path,
        targets: &[&TargetDefinition],
    ) -> Vec<DetectionResult> {
        let config = self.catalog.config();
        let sampling = self.sampling();
        let fs = self.fs.as_ref();

        // Every target x signal pair runs in one concurrent batch.
        let outcomes = join_all(targets.iter().flat_map(|target| {
            target.signals.iter().map(move |signal| {
                signal.probe.evaluate(fs, root, sampling)
            })
        }))
        .await;

        let mut outcomes = outcomes.into_iter();
        let per_target: Vec<Vec<SignalOutcome>> = targets
            .iter()
            .map(|t| outcomes.by_ref().take(t.signals.len()).collect())
            .collect();

        let counts: Vec<usize> = per_target
            .iter()
            .map(|o| o.iter().filter(|o| o.matched).count())
            .collect();

        // Auxiliary boost indicators, only for targets that can be boosted.
        let pending: Vec<(usize, usize)> = targets
            .iter()
            .enumerate()
            .filter(|(idx, _)| counts[*idx] >= config.minimum_signals_for_boost)
            .flat_map(|(idx, target)| {
                target.boosts.iter().enumerate().filter_map(
                    move |(b_idx, boost)| match boost.indicator {
                        BoostIndicator::Probe(_) => Some((idx, b_idx)),
                        BoostIndicator::Signal(_) => None,
                    },
                )
            })
            .collect();

        let indicator_results = join_all(pending.iter().map(|(idx, b_idx)| {
            let boost = &targets[*idx].boosts[*b_idx];
            async move {
                match &boost.indicator {
                    BoostIndicator::Probe(probe) => {
                        probe.evaluate(fs, root, sampling).await.matched
                    }
                    BoostIndicator::Signal(_) => false,
                }
            }
        }))
        .await;

        let indicators: HashMap<(usize, usize), bool> =
            pending.into_iter().zip(indicator_results).collect();

        let mut results: Vec<DetectionResult> = targets
            .iter()
            .enumerate()
            .map(|(idx, target)| {
                self.score(target, &per_target[idx], |b_idx| {
                    indicators.get(&(idx, b_idx)).copied().unwrap_or(false)
                })
            })
            .collect();

        scoring::normalize(&mut results);
        scoring::rank(&mut results);

        results
    }

    fn score(
        &self,
        target: &TargetDefinition,
        outcomes: &[SignalOutcome],
        aux_indicator: impl Fn(usize) -> bool,
    ) -> DetectionResult {
        let config = self.catalog.config();

        let mut signals = BTreeMap::new();
        let mut weighted = Vec::with_capacity(outcomes.len());

        for (signal, outcome) in target.signals.iter().zip(outcomes) {
            debug!(
                "{}.{}: matched={} count={}",
                target.key, signal.name, outcome.matched, outcome.match_count
            );
            signals.insert(signal.name.clone(), outcome.matched);
            weighted.push((signal.weight, outcome.matched));
        }

        let signal_count = signals.values().filter(|m| **m).count();
        let base = scoring::calculate_confidence(&weighted);

        let boosts: Vec<(f64, bool)> = target
            .boosts
            .iter()
            .enumerate()
            .map(|(b_idx, boost)| {
                let present = match &boost.indicator {
                    BoostIndicator::Signal(name) => {
                        signals.get(name).copied().unwrap_or(false)
                    }
                    BoostIndicator::Probe(_) => aux_indicator(b_idx),
                };
                (boost.multiplier, present)
            })
            .collect();

        let multiplier = scoring::boost_multiplier(
            signal_count,
            config.minimum_signals_for_boost,
            &boosts,
        );
        let confidence = scoring::apply_boost(base, multiplier);

        if multiplier > 1.0 {
            debug!(
                "{}: boosted {base:.3} -> {confidence:.3} (x{multiplier:.2})",
                target.key
            );
        }

        DetectionResult {
            target: target.key.clone(),
            name: target.name.clone(),
            confidence,
            normalized_confidence: None,
            signals,
            signal_count,
            high_confidence: confidence >= config.high_confidence,
            boost_multiplier: multiplier,
            manual_override: false,
        }
    }
}
