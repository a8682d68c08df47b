//! Per-stage wall-clock timing and operator-facing summaries. Every
//! recording that enters the pipeline leaves a timing trail in its
//! ProcessingRecord; summaries flag the stage eating a disproportionate
//! share of pipeline time.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Instant;

use serde::Serialize;

use crate::store::ProcessingRecord;
use crate::thresholds::BOTTLENECK_SHARE;

/// Stage name → elapsed seconds for one recording. Skipped stages simply
/// never record, which keeps them out of averages later.
#[derive(Debug, Default, Clone)]
pub struct StageTimings {
    map: HashMap<String, f64>,
}

impl StageTimings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: &str, secs: f64) {
        self.map.insert(stage.to_string(), secs);
    }

    pub fn get(&self, stage: &str) -> Option<f64> {
        self.map.get(stage).copied()
    }

    pub fn into_map(self) -> HashMap<String, f64> {
        self.map
    }
}

/// Scoped measurement for a synchronous stage.
pub struct StageTimer {
    start: Instant,
}

impl StageTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn stop(self, timings: &mut StageTimings, stage: &str) {
        timings.record(stage, self.start.elapsed().as_secs_f64());
    }
}

/// Run a synchronous stage under the clock.
pub fn timed_sync<T>(timings: &mut StageTimings, stage: &str, f: impl FnOnce() -> T) -> T {
    let timer = StageTimer::start();
    let out = f();
    timer.stop(timings, stage);
    out
}

/// Run an async stage (extraction, persistence) under the clock.
pub async fn timed<F: Future>(timings: &mut StageTimings, stage: &str, fut: F) -> F::Output {
    let timer = StageTimer::start();
    let out = fut.await;
    timer.stop(timings, stage);
    out
}

#[derive(Debug, Serialize)]
pub struct PerfSummary {
    pub recordings: usize,
    /// Mean seconds per stage, zero-duration entries excluded.
    pub avg_by_stage: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bottleneck_stage: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

/// Aggregate processing records into per-stage averages and bottleneck
/// flags. Zero-duration entries (skipped stages) are excluded so a batch of
/// low-quality skips doesn't drag extraction's average toward zero.
pub fn summarize(records: &[ProcessingRecord]) -> PerfSummary {
    let mut by_stage: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for rec in records {
        for (stage, secs) in &rec.stage_timings {
            if *secs > 0.0 {
                by_stage.entry(stage.clone()).or_default().push(*secs);
            }
        }
    }

    let avg_by_stage: BTreeMap<String, f64> = by_stage
        .iter()
        .map(|(stage, samples)| {
            let avg = samples.iter().sum::<f64>() / samples.len() as f64;
            (stage.clone(), avg)
        })
        .collect();

    let total_avg: f64 = avg_by_stage.values().sum();
    let mut bottleneck_stage = None;
    let mut issues = Vec::new();
    if total_avg > 0.0 {
        let mut worst_share = 0.0;
        for (stage, avg) in &avg_by_stage {
            let share = avg / total_avg;
            if share > BOTTLENECK_SHARE {
                issues.push(format!(
                    "{stage} consumes {:.0}% of average pipeline time",
                    share * 100.0
                ));
                if share > worst_share {
                    worst_share = share;
                    bottleneck_stage = Some(stage.clone());
                }
            }
        }
    }

    PerfSummary { recordings: records.len(), avg_by_stage, bottleneck_stage, issues }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(timings: &[(&str, f64)]) -> ProcessingRecord {
        let mut rec = ProcessingRecord::new("r", "persisted");
        for (stage, secs) in timings {
            rec.stage_timings.insert((*stage).to_string(), *secs);
        }
        rec
    }

    #[test]
    fn timings_record_and_read() {
        let mut t = StageTimings::new();
        let out = timed_sync(&mut t, "speaker_resolution", || 7);
        assert_eq!(out, 7);
        assert!(t.get("speaker_resolution").unwrap() >= 0.0);
    }

    #[test]
    fn empty_records_produce_empty_summary() {
        let s = summarize(&[]);
        assert_eq!(s.recordings, 0);
        assert!(s.avg_by_stage.is_empty());
        assert!(s.bottleneck_stage.is_none());
    }

    #[test]
    fn dominant_stage_is_flagged() {
        let records = vec![
            record(&[("speaker_resolution", 0.1), ("extraction", 5.0), ("persistence", 0.2)]),
            record(&[("speaker_resolution", 0.1), ("extraction", 4.0), ("persistence", 0.3)]),
        ];
        let s = summarize(&records);
        assert_eq!(s.bottleneck_stage.as_deref(), Some("extraction"));
        assert!(!s.issues.is_empty());
    }

    #[test]
    fn zero_durations_do_not_distort_averages() {
        // Two skipped recordings (extraction = 0) must not halve the average.
        let records = vec![
            record(&[("quality_filter", 0.1), ("extraction", 4.0)]),
            record(&[("quality_filter", 0.1), ("extraction", 0.0)]),
            record(&[("quality_filter", 0.1), ("extraction", 0.0)]),
        ];
        let s = summarize(&records);
        assert!((s.avg_by_stage["extraction"] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn balanced_stages_have_no_bottleneck() {
        let records = vec![record(&[("a", 1.0), ("b", 1.0), ("c", 1.0), ("d", 1.0)])];
        let s = summarize(&records);
        assert!(s.bottleneck_stage.is_none());
        assert!(s.issues.is_empty());
    }
}
