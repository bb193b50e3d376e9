//! Frame pacing.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Interval, MissedTickBehavior};

use tile_bridge_common::FrameConfig;

/// Decides when the next frame runs.
#[async_trait]
pub trait FrameScheduler: Send {
    /// Resolve when the next frame is due.
    async fn next_frame(&mut self);
}

/// Fixed-rate frames from a tokio interval.
///
/// Late ticks are skipped rather than bunched, so a slow frame delays the
/// schedule instead of causing a burst of catch-up frames.
#[derive(Debug)]
pub struct IntervalScheduler {
    interval: Interval,
}

impl IntervalScheduler {
    /// Tick every `period`. Must be called inside a tokio runtime.
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }

    /// Tick at the configured frame rate.
    pub fn from_config(config: &FrameConfig) -> Self {
        Self::new(config.frame_interval())
    }

    /// Time between frames.
    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

#[async_trait]
impl FrameScheduler for IntervalScheduler {
    async fn next_frame(&mut self) {
        self.interval.tick().await;
    }
}
