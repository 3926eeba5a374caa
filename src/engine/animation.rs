//! Animation timing.
//!
//! Both engines gate their flips on an [`AnimationDriver`]: the layered engine waits for a
//! single [`run_once`](AnimationDriver::run_once) to elapse, the scene-graph engine steps a
//! [`Tween`] from a [`tick_loop`](AnimationDriver::tick_loop) until it reports completion.
//! Every wait takes the owning engine's cancellation token so nothing fires after disposal.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Frame interval of the default driver's tick loop (~60 Hz).
pub const FRAME_INTERVAL: Duration = Duration::from_millis(16);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Easing {
    Linear,
    EaseIn,
    EaseOut,
    #[default]
    EaseInOut,
    EaseInCubic,
    EaseOutCubic,
    EaseInOutCubic,
}

impl Easing {
    pub fn apply(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::EaseIn => t * t,
            Self::EaseOut => 1.0 - (1.0 - t) * (1.0 - t),
            Self::EaseInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - ((-2.0 * t + 2.0).powi(2) / 2.0)
                }
            }
            Self::EaseInCubic => t * t * t,
            Self::EaseOutCubic => 1.0 - (1.0 - t).powi(3),
            Self::EaseInOutCubic => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - ((-2.0 * t + 2.0).powi(3) / 2.0)
                }
            }
        }
    }
}

/// Interpolates a scalar between two values over a fixed duration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tween {
    pub from: f32,
    pub to: f32,
    pub duration: Duration,
    pub easing: Easing,
}

impl Tween {
    pub fn new(from: f32, to: f32, duration: Duration, easing: Easing) -> Self {
        Self { from, to, duration, easing }
    }

    pub fn is_finished(&self, elapsed: Duration) -> bool {
        elapsed >= self.duration
    }

    pub fn value_at(&self, elapsed: Duration) -> f32 {
        if self.is_finished(elapsed) {
            return self.to;
        }
        let t = elapsed.as_secs_f32() / self.duration.as_secs_f32();
        self.from + (self.to - self.from) * self.easing.apply(t)
    }
}

/// Timing information handed to a tick-loop frame callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTick {
    /// Time since the loop started
    pub elapsed: Duration,
    /// Time since the previous frame
    pub delta: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

pub type FrameFn = Box<dyn FnMut(FrameTick) -> TickControl + Send>;

/// Cancel handle for a running tick loop. Dropping it stops the loop as well.
#[derive(Debug)]
pub struct TickHandle {
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl TickHandle {
    pub fn new(cancel: CancellationToken, join: Option<JoinHandle<()>>) -> Self {
        Self { cancel, join }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.cancel.is_cancelled() || self.join.as_ref().map_or(true, |j| j.is_finished())
    }
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Source of animation time for the engines.
#[async_trait]
pub trait AnimationDriver: Send + Sync {
    /// Waits `duration`. Returns `true` when it elapsed, `false` when `cancel` fired first.
    async fn run_once(&self, duration: Duration, cancel: &CancellationToken) -> bool;

    /// Calls `frame` once per frame until it returns [`TickControl::Stop`] or `cancel` fires.
    fn tick_loop(&self, frame: FrameFn, cancel: CancellationToken) -> TickHandle;
}

/// Default driver backed by tokio timers.
#[derive(Debug, Clone)]
pub struct TokioDriver {
    frame_interval: Duration,
}

impl TokioDriver {
    pub fn new() -> Self {
        Self {
            frame_interval: FRAME_INTERVAL,
        }
    }

    pub fn with_frame_interval(frame_interval: Duration) -> Self {
        Self { frame_interval }
    }
}

impl Default for TokioDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnimationDriver for TokioDriver {
    async fn run_once(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => !cancel.is_cancelled(),
        }
    }

    fn tick_loop(&self, mut frame: FrameFn, cancel: CancellationToken) -> TickHandle {
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let token = cancel.clone();
        let join = tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            let mut last = start;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    now = ticker.tick() => {
                        let tick = FrameTick {
                            elapsed: now.saturating_duration_since(start),
                            delta: now.saturating_duration_since(last),
                        };
                        last = now;
                        if frame(tick) == TickControl::Stop {
                            break;
                        }
                    }
                }
            }
        });

        TickHandle::new(cancel, Some(join))
    }
}
