//! Performance snapshots and threshold issues.

use super::CorrelationId;
use serde::{Deserialize, Serialize};

/// Heap usage reported by the host's memory probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryUsage {
    /// Bytes currently in use.
    pub used_bytes: u64,
    /// Bytes currently reserved.
    pub total_bytes: u64,
    /// Upper bound the host may reserve.
    pub limit_bytes: u64,
}

impl MemoryUsage {
    /// Fraction of the limit in use, in `0.0..=1.0` for sane probes.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn usage_ratio(&self) -> f64 {
        if self.limit_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.limit_bytes as f64
    }
}

/// Paint milestones since host start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PaintTimings {
    /// First pixels on screen (ms).
    pub first_paint_ms: Option<f64>,
    /// First content on screen (ms).
    pub first_contentful_paint_ms: Option<f64>,
}

/// Aggregate of one frame-timing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    /// Record id.
    pub id: CorrelationId,
    /// Window close time (Unix epoch milliseconds).
    pub timestamp: u64,
    /// Frames per second over the window.
    pub fps: f64,
    /// Frames observed in the window.
    pub frame_count: u32,
    /// Mean frame duration (ms).
    pub avg_frame_ms: f64,
    /// Longest frame duration (ms).
    pub max_frame_ms: f64,
    /// Frames longer than the long-frame threshold.
    pub long_frames: u32,
    /// Memory reading taken at window close.
    pub memory: Option<MemoryUsage>,
    /// Paint milestones known at window close.
    pub paint: PaintTimings,
}

/// Which threshold a snapshot crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Frame rate below the configured floor.
    LowFps,
    /// Memory usage ratio above the configured ceiling.
    HighMemory,
}

/// A snapshot that crossed a configured threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceIssue {
    /// Crossed threshold.
    pub kind: IssueKind,
    /// Human-readable description.
    pub message: String,
    /// Observed value.
    pub value: f64,
    /// Configured threshold.
    pub threshold: f64,
    /// The snapshot that triggered the issue.
    pub snapshot_id: CorrelationId,
}
