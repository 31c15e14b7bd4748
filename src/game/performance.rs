//! Tick timing for one room
//!
//! Tracks how long each tick took and how often ticks actually ran, both as a
//! rolling sample window and as fixed reporting windows that reset when they
//! close. Created with the room and never reset afterward.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Length of one reporting window
pub const REPORT_WINDOW: Duration = Duration::from_secs(5);

const MAX_SAMPLES: usize = 150;

/// Health derived from average tick cost relative to the tick budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceStatus {
    /// Under 50% of budget
    Good,
    /// Under 90% of budget
    Warning,
    Critical,
}

/// Closed reporting window
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowReport {
    pub ticks: u64,
    /// Observed ticks per second over the window
    pub tick_rate: f32,
    pub max_tick_ms: f32,
}

/// Serializable view for the admin surface
#[derive(Debug, Clone, Serialize)]
pub struct TickMetricsSnapshot {
    pub total_ticks: u64,
    pub observed_tick_rate: f32,
    pub avg_tick_ms: f32,
    pub p95_tick_ms: f32,
    pub max_tick_ms: f32,
    pub budget_usage_percent: f32,
    pub status: PerformanceStatus,
    pub last_window: Option<WindowReport>,
}

pub struct TickMetrics {
    target_tick_duration: Duration,
    durations: VecDeque<Duration>,
    starts: VecDeque<Instant>,
    total_ticks: u64,
    max_tick_duration: Duration,
    window_start: Option<Instant>,
    window_ticks: u64,
    window_max: Duration,
    last_window: Option<WindowReport>,
}

impl TickMetrics {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            target_tick_duration: Duration::from_secs_f32(1.0 / tick_rate.max(1) as f32),
            durations: VecDeque::with_capacity(MAX_SAMPLES),
            starts: VecDeque::with_capacity(MAX_SAMPLES),
            total_ticks: 0,
            max_tick_duration: Duration::ZERO,
            window_start: None,
            window_ticks: 0,
            window_max: Duration::ZERO,
            last_window: None,
        }
    }

    /// Record one tick that began at `started` and took `duration`.
    /// Returns the report of a window that closed with this tick.
    pub fn record(&mut self, started: Instant, duration: Duration) -> Option<WindowReport> {
        self.total_ticks += 1;
        self.max_tick_duration = self.max_tick_duration.max(duration);

        self.durations.push_back(duration);
        self.starts.push_back(started);
        while self.durations.len() > MAX_SAMPLES {
            self.durations.pop_front();
            self.starts.pop_front();
        }

        let window_start = *self.window_start.get_or_insert(started);
        self.window_ticks += 1;
        self.window_max = self.window_max.max(duration);

        let elapsed = started.saturating_duration_since(window_start);
        if elapsed < REPORT_WINDOW {
            return None;
        }

        let report = WindowReport {
            ticks: self.window_ticks,
            tick_rate: self.window_ticks as f32 / elapsed.as_secs_f32(),
            max_tick_ms: self.window_max.as_secs_f32() * 1000.0,
        };
        self.last_window = Some(report);
        self.window_start = Some(started);
        self.window_ticks = 0;
        self.window_max = Duration::ZERO;
        Some(report)
    }

    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    /// Longest single tick since creation
    pub fn max_tick_duration(&self) -> Duration {
        self.max_tick_duration
    }

    /// Ticks per second across the sample window
    pub fn observed_tick_rate(&self) -> f32 {
        match (self.starts.front(), self.starts.back()) {
            (Some(first), Some(last)) if self.starts.len() > 1 => {
                let span = last.saturating_duration_since(*first).as_secs_f32();
                if span > 0.0 {
                    (self.starts.len() - 1) as f32 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    pub fn average_tick_duration(&self) -> Duration {
        if self.durations.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.durations.iter().sum();
        sum / self.durations.len() as u32
    }

    pub fn p95_tick_duration(&self) -> Duration {
        if self.durations.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted: Vec<_> = self.durations.iter().copied().collect();
        sorted.sort();
        let idx = (sorted.len() as f32 * 0.95) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    pub fn budget_usage_percent(&self) -> f32 {
        self.average_tick_duration().as_secs_f32() / self.target_tick_duration.as_secs_f32() * 100.0
    }

    pub fn status(&self) -> PerformanceStatus {
        let usage = self.budget_usage_percent();
        if usage < 50.0 {
            PerformanceStatus::Good
        } else if usage < 90.0 {
            PerformanceStatus::Warning
        } else {
            PerformanceStatus::Critical
        }
    }

    pub fn last_window(&self) -> Option<WindowReport> {
        self.last_window
    }

    pub fn snapshot(&self) -> TickMetricsSnapshot {
        TickMetricsSnapshot {
            total_ticks: self.total_ticks,
            observed_tick_rate: self.observed_tick_rate(),
            avg_tick_ms: self.average_tick_duration().as_secs_f32() * 1000.0,
            p95_tick_ms: self.p95_tick_duration().as_secs_f32() * 1000.0,
            max_tick_ms: self.max_tick_duration.as_secs_f32() * 1000.0,
            budget_usage_percent: self.budget_usage_percent(),
            status: self.status(),
            last_window: self.last_window,
        }
    }
}
