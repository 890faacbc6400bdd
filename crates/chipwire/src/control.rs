//! Shared playback control flags.
//!
//! One [`SessionControl`] value is shared between the playback unit and
//! the input-handling unit. Input handling only ever posts intents
//! here; it never touches the hardware link, transcoder state or file
//! cursors, which belong exclusively to the playback unit.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Lowest accepted speed multiplier.
const MIN_SPEED: f64 = 0.1;

/// Highest accepted speed multiplier.
const MAX_SPEED: f64 = 8.0;

/// Atomic play/pause/quit/next/prev/speed flag set.
#[derive(Debug)]
pub struct SessionControl {
    paused: AtomicBool,
    quit: AtomicBool,
    next: AtomicBool,
    prev: AtomicBool,
    stop_current: AtomicBool,
    speed_bits: AtomicU64,
    loop_count: AtomicU32,
}

impl SessionControl {
    pub fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            next: AtomicBool::new(false),
            prev: AtomicBool::new(false),
            stop_current: AtomicBool::new(false),
            speed_bits: AtomicU64::new(1.0_f64.to_bits()),
            loop_count: AtomicU32::new(2),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn toggle_paused(&self) {
        self.paused.fetch_xor(true, Ordering::AcqRel);
    }

    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::Release);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }

    pub fn request_next(&self) {
        self.next.store(true, Ordering::Release);
    }

    pub fn request_prev(&self) {
        self.prev.store(true, Ordering::Release);
    }

    pub fn request_stop_current(&self) {
        self.stop_current.store(true, Ordering::Release);
    }

    /// True when any intent requires the current track to stop. The
    /// playback unit checks this once per scheduler iteration.
    pub fn cancelled(&self) -> bool {
        self.quit.load(Ordering::Acquire)
            || self.next.load(Ordering::Acquire)
            || self.prev.load(Ordering::Acquire)
            || self.stop_current.load(Ordering::Acquire)
    }

    /// Clear the per-track intents after a track has ended. Quit stays
    /// latched.
    pub fn clear_track_flags(&self) {
        self.next.store(false, Ordering::Release);
        self.prev.store(false, Ordering::Release);
        self.stop_current.store(false, Ordering::Release);
    }

    pub fn next_requested(&self) -> bool {
        self.next.load(Ordering::Acquire)
    }

    pub fn prev_requested(&self) -> bool {
        self.prev.load(Ordering::Acquire)
    }

    /// Current speed multiplier, clamped to a sane range.
    pub fn speed(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::Acquire)).clamp(MIN_SPEED, MAX_SPEED)
    }

    pub fn set_speed(&self, speed: f64) {
        self.speed_bits.store(
            speed.clamp(MIN_SPEED, MAX_SPEED).to_bits(),
            Ordering::Release,
        );
    }

    /// Requested play count for the whole stream; zero means loop
    /// forever.
    pub fn loop_count(&self) -> u32 {
        self.loop_count.load(Ordering::Acquire)
    }

    pub fn set_loop_count(&self, count: u32) {
        self.loop_count.store(count, Ordering::Release);
    }
}

impl Default for SessionControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flags() {
        let c = SessionControl::new();
        assert!(!c.cancelled());
        c.request_next();
        assert!(c.cancelled());
        c.clear_track_flags();
        assert!(!c.cancelled());
        c.request_quit();
        c.clear_track_flags();
        assert!(c.cancelled());
    }

    #[test]
    fn test_speed_clamped() {
        let c = SessionControl::new();
        c.set_speed(100.0);
        assert_eq!(c.speed(), MAX_SPEED);
        c.set_speed(0.0);
        assert_eq!(c.speed(), MIN_SPEED);
    }
}
