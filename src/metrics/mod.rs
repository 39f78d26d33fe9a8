//! Codebase health metrics: raw snapshots, progress against a baseline, and providers.
//!
//! A [`MetricsProvider`] produces a [`MetricsSnapshot`] of raw counts. [`ProgressMetrics`]
//! combines a baseline snapshot, a fresh snapshot and the phase's targets into per-dimension
//! `{current, target, reduction, percentage}` tuples. Snapshots are immutable once captured;
//! re-evaluation always means collecting a new one.

pub mod command;
pub mod store;

pub use command::{CommandMetricsProvider, MetricCommand, MetricsCommands};
pub use store::MetricsStore;

use crate::phase::{Comparison, Metric, SuccessCriterion};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw point-in-time counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub error_count: u64,
    pub warning_count: u64,
    pub build_time_secs: f64,
    #[serde(default)]
    pub custom: BTreeMap<String, f64>,
}

impl MetricsSnapshot {
    pub fn new(error_count: u64, warning_count: u64, build_time_secs: f64) -> Self {
        Self {
            captured_at: Utc::now(),
            error_count,
            warning_count,
            build_time_secs,
            custom: BTreeMap::new(),
        }
    }

    pub fn with_custom(mut self, name: &str, value: f64) -> Self {
        self.custom.insert(name.to_string(), value);
        self
    }

    /// Value of one dimension, `None` for an unknown custom counter.
    pub fn value(&self, metric: &Metric) -> Option<f64> {
        match metric {
            Metric::Errors => Some(self.error_count as f64),
            Metric::Warnings => Some(self.warning_count as f64),
            Metric::BuildTime => Some(self.build_time_secs),
            Metric::Custom(name) => self.custom.get(name).copied(),
        }
    }

    fn dimensions(&self) -> Vec<Metric> {
        let mut dims = vec![Metric::Errors, Metric::Warnings, Metric::BuildTime];
        dims.extend(self.custom.keys().map(|k| Metric::Custom(k.clone())));
        dims
    }
}

/// Progress of one dimension relative to the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricProgress {
    pub current: f64,
    pub baseline: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
    /// `baseline - current`; negative when the dimension got worse.
    pub reduction: f64,
    /// Completion toward `target` in [0, 100]; 100 when no target is set.
    pub percentage: f64,
}

/// A baseline-relative view of one fresh snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMetrics {
    pub snapshot: MetricsSnapshot,
    pub baseline: MetricsSnapshot,
    /// Keyed by metric display name (`errorCount`, `custom:anyTypes`, ...).
    pub dimensions: BTreeMap<String, MetricProgress>,
}

impl ProgressMetrics {
    /// Build the per-dimension view. The first criterion on a metric sets its target.
    pub fn compute(
        baseline: &MetricsSnapshot,
        current: MetricsSnapshot,
        criteria: &[SuccessCriterion],
    ) -> Self {
        let mut dimensions = BTreeMap::new();
        for metric in current.dimensions() {
            let Some(value) = current.value(&metric) else {
                continue;
            };
            let base = baseline.value(&metric).unwrap_or(value);
            let criterion = criteria.iter().find(|c| c.metric == metric);
            let percentage = criterion
                .map(|c| completion_percentage(base, value, c))
                .unwrap_or(100.0);
            dimensions.insert(
                metric.to_string(),
                MetricProgress {
                    current: value,
                    baseline: base,
                    target: criterion.map(|c| c.threshold),
                    reduction: base - value,
                    percentage,
                },
            );
        }
        Self {
            snapshot: current,
            baseline: baseline.clone(),
            dimensions,
        }
    }

    /// Progress relative to itself, used when no baseline exists yet.
    pub fn unbaselined(current: MetricsSnapshot, criteria: &[SuccessCriterion]) -> Self {
        let baseline = current.clone();
        Self::compute(&baseline, current, criteria)
    }

    pub fn get(&self, metric: &Metric) -> Option<&MetricProgress> {
        self.dimensions.get(&metric.to_string())
    }
}

/// `min(100, achieved / required * 100)` toward a criterion's threshold.
///
/// A met criterion is always 100. For decreasing targets (`==`, `<`, `<=`) the required change
/// is `baseline - threshold`; for increasing targets (`>`, `>=`) it is `threshold - baseline`.
pub fn completion_percentage(baseline: f64, current: f64, criterion: &SuccessCriterion) -> f64 {
    if criterion.is_met(current) {
        return 100.0;
    }
    let (achieved, required) = match criterion.comparison {
        Comparison::Eq | Comparison::Le | Comparison::Lt => {
            (baseline - current, baseline - criterion.threshold)
        }
        Comparison::Ge | Comparison::Gt => (current - baseline, criterion.threshold - baseline),
    };
    if required <= 0.0 {
        return 0.0;
    }
    (achieved / required * 100.0).clamp(0.0, 100.0)
}

/// Source of metrics snapshots. Collecting must not modify the working tree.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn collect(&self) -> Result<MetricsSnapshot>;
}
