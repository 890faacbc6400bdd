//! Real-time sample scheduler.
//!
//! Playback pacing works by owing samples: each iteration measures
//! elapsed wall time on the monotonic clock, converts it into samples
//! at 44100 Hz scaled by the speed multiplier, and accumulates the
//! result fractionally. The session then drains the debt by stepping
//! the interpreter until it has consumed at least that many samples,
//! carrying any remainder into the next iteration. The debt is capped
//! at one 60 Hz frame so a stall (debugger, swapped-out process, UI
//! hiccup) produces at most one frame of catch-up instead of a burst
//! of writes the hardware cannot absorb.

use std::time::{Duration, Instant};

use crate::vgm::header::VGM_SAMPLE_RATE;

/// Maximum sample debt carried across iterations: one 60 Hz frame.
const CATCH_UP_CAP: f64 = 735.0;

/// Delays below this fall back to a pure spin regardless of strategy;
/// no OS sleep primitive is trustworthy at this scale.
const SPIN_FLOOR_US: u64 = 100;

/// How a requested delay is turned into blocking.
///
/// All three strategies share one contract: block at least the
/// requested duration, within a small bounded error, after dividing it
/// by the speed multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitStrategy {
    /// Busy loop on the monotonic clock. Sub-millisecond accuracy at
    /// the cost of one core.
    Spin,
    /// Coarse sleep for the bulk of the delay, spin for the remainder.
    #[default]
    Hybrid,
    /// Plain OS sleep driven by the periodic system timer. The
    /// cheapest option; error is bounded by the timer period.
    Timer,
}

impl WaitStrategy {
    /// Block for at least `us` microseconds.
    pub fn block_us(self, us: u64) {
        if us == 0 {
            return;
        }
        match self {
            WaitStrategy::Spin => spin_for(Duration::from_micros(us)),
            WaitStrategy::Hybrid => {
                // SpinSleeper sleeps natively up to its accuracy bound
                // and spins the rest.
                spin_sleep::sleep(Duration::from_micros(us));
            }
            WaitStrategy::Timer => {
                if us < SPIN_FLOOR_US {
                    spin_for(Duration::from_micros(us));
                } else {
                    std::thread::sleep(Duration::from_micros(us));
                }
            }
        }
    }
}

fn spin_for(d: Duration) {
    let deadline = Instant::now() + d;
    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}

/// Wall-clock to sample-debt converter.
pub struct Scheduler {
    strategy: WaitStrategy,
    last: Instant,
    owed: f64,
}

impl Scheduler {
    pub fn new(strategy: WaitStrategy) -> Self {
        Self {
            strategy,
            last: Instant::now(),
            owed: 0.0,
        }
    }

    pub fn strategy(&self) -> WaitStrategy {
        self.strategy
    }

    /// Re-anchor the wall-clock reference and drop any accumulated
    /// debt. Called on start and when resuming from pause, so the
    /// paused interval never turns into a catch-up burst.
    pub fn rearm(&mut self) {
        self.last = Instant::now();
        self.owed = self.owed.min(0.0);
    }

    /// Accumulate elapsed wall time into sample debt and return the
    /// whole samples currently owed.
    pub fn advance(&mut self, speed: f64) -> u32 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        self.owed += elapsed * VGM_SAMPLE_RATE as f64 * speed;
        if self.owed > CATCH_UP_CAP {
            self.owed = CATCH_UP_CAP;
        }
        if self.owed <= 0.0 { 0 } else { self.owed as u32 }
    }

    /// Settle `samples` of consumed stream time against the debt. The
    /// balance may go negative when the interpreter overshot; the
    /// overshoot is credited to the next iteration.
    pub fn settle(&mut self, samples: u32) {
        self.owed -= samples as f64;
    }

    /// Block for one scheduling quantum, scaled by the speed
    /// multiplier.
    pub fn idle(&self, speed: f64) {
        self.strategy.block_us((1_000.0 / speed) as u64);
    }

    /// Block for `us` microseconds, scaled by the speed multiplier.
    pub fn delay_us(&self, us: u64, speed: f64) {
        self.strategy.block_us((us as f64 / speed) as u64);
    }
}
