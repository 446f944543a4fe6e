//! Keepalive and IDLE scheduling state.
//!
//! The scheduler only runs while the queue is empty and the session is
//! authenticated. With IDLE it keeps one IDLE command open and breaks it
//! with `DONE` when the idle window expires or a user command arrives; the
//! `DONE` is never written before the server's continuation for IDLE.
//! Without IDLE (or when forced) it sends a NOOP every interval.

use std::time::Duration;

use tokio::time::Instant;

/// Default delay between keepalive checks.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Default longest time a single IDLE is kept open.
pub const MAX_IDLE_WAIT: Duration = Duration::from_secs(300);

/// Keepalive settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// Delay between keepalive checks or NOOPs.
    pub interval: Duration,
    /// Longest time a single IDLE is kept open before it is renewed.
    pub idle_interval: Duration,
    /// Send NOOP even when the server supports IDLE.
    pub force_noop: bool,
}

impl Default for Keepalive {
    fn default() -> Self {
        Self {
            interval: KEEPALIVE_INTERVAL,
            idle_interval: MAX_IDLE_WAIT,
            force_noop: false,
        }
    }
}

/// Progress of the current IDLE command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdlePhase {
    /// No IDLE is outstanding.
    #[default]
    NotStarted,
    /// IDLE was queued or sent; its continuation has not arrived.
    Requested,
    /// The server accepted IDLE at this instant.
    Since(Instant),
}

/// What a timer tick asks the correlator to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveAction {
    /// Nothing to do.
    None,
    /// Queue a NOOP ahead of everything else.
    Noop,
    /// Queue an IDLE ahead of everything else.
    Idle,
    /// Write `DONE` to end an IDLE that has run long enough.
    Done,
}

/// Scheduler state.
#[derive(Debug, Clone, Default)]
pub struct IdleState {
    /// Whether the scheduler is active.
    pub enabled: bool,
    /// Progress of the outstanding IDLE.
    pub phase: IdlePhase,
    /// When the next tick fires.
    pub deadline: Option<Instant>,
}

impl IdleState {
    /// Activates the scheduler. Returns true when the first tick should run
    /// right away.
    pub fn start(&mut self, settings: &Keepalive, immediate: bool, now: Instant) -> bool {
        self.enabled = true;
        if immediate {
            true
        } else {
            self.deadline = Some(now + settings.interval);
            false
        }
    }

    /// Deactivates the scheduler and forgets any IDLE progress.
    pub fn reset(&mut self) {
        self.enabled = false;
        self.phase = IdlePhase::NotStarted;
        self.deadline = None;
    }

    /// Runs one tick.
    pub fn tick(
        &mut self,
        settings: &Keepalive,
        idle_supported: bool,
        now: Instant,
    ) -> KeepaliveAction {
        self.deadline = None;
        if !self.enabled {
            return KeepaliveAction::None;
        }
        if !idle_supported || settings.force_noop {
            return KeepaliveAction::Noop;
        }

        let action = match self.phase {
            IdlePhase::NotStarted => {
                self.phase = IdlePhase::Requested;
                KeepaliveAction::Idle
            }
            IdlePhase::Since(started) if now.duration_since(started) >= settings.idle_interval => {
                self.enabled = false;
                return KeepaliveAction::Done;
            }
            _ => KeepaliveAction::None,
        };
        self.deadline = Some(now + settings.interval);
        action
    }

    /// A user command was queued while IDLE is outstanding. Returns true when
    /// `DONE` may be written now.
    pub fn interrupt(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.enabled = false;
        self.deadline = None;
        matches!(self.phase, IdlePhase::Since(_))
    }

    /// The server sent the IDLE continuation. Returns true when `DONE` must
    /// be written now because a command is waiting.
    pub fn accepted(&mut self, queue_waiting: bool, now: Instant) -> bool {
        if queue_waiting && self.phase == IdlePhase::Requested && !self.enabled {
            return true;
        }
        self.phase = IdlePhase::Since(now);
        false
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Keepalive::default();
        assert_eq!(settings.interval, Duration::from_secs(10));
        assert_eq!(settings.idle_interval, Duration::from_secs(300));
        assert!(!settings.force_noop);
    }

    #[test]
    fn test_first_tick_requests_idle() {
        let settings = Keepalive::default();
        let now = Instant::now();
        let mut state = IdleState::default();
        assert!(state.start(&settings, true, now));
        assert_eq!(state.tick(&settings, true, now), KeepaliveAction::Idle);
        assert_eq!(state.phase, IdlePhase::Requested);
        assert_eq!(state.deadline, Some(now + settings.interval));
        assert_eq!(state.tick(&settings, true, now), KeepaliveAction::None);
    }

    #[test]
    fn test_noop_without_idle() {
        let settings = Keepalive::default();
        let now = Instant::now();
        let mut state = IdleState::default();
        assert!(!state.start(&settings, false, now));
        assert_eq!(state.deadline, Some(now + settings.interval));
        assert_eq!(state.tick(&settings, false, now), KeepaliveAction::Noop);
        assert_eq!(state.deadline, None);

        let forced = Keepalive {
            force_noop: true,
            ..Keepalive::default()
        };
        state.start(&forced, true, now);
        assert_eq!(state.tick(&forced, true, now), KeepaliveAction::Noop);
    }

    #[test]
    fn test_idle_window_expires() {
        let settings = Keepalive::default();
        let now = Instant::now();
        let mut state = IdleState::default();
        state.start(&settings, true, now);
        state.tick(&settings, true, now);
        assert!(!state.accepted(false, now));
        let later = now + settings.idle_interval;
        assert_eq!(state.tick(&settings, true, later), KeepaliveAction::Done);
        assert!(!state.enabled);
        assert_eq!(state.deadline, None);
    }

    #[test]
    fn test_interrupt_before_continuation_defers_done() {
        let settings = Keepalive::default();
        let now = Instant::now();
        let mut state = IdleState::default();
        state.start(&settings, true, now);
        state.tick(&settings, true, now);
        assert!(!state.interrupt());
        assert!(state.accepted(true, now));
    }

    #[test]
    fn test_interrupt_after_continuation_sends_done() {
        let settings = Keepalive::default();
        let now = Instant::now();
        let mut state = IdleState::default();
        state.start(&settings, true, now);
        state.tick(&settings, true, now);
        state.accepted(false, now);
        assert!(state.interrupt());
        assert!(!state.interrupt());
    }

    #[test]
    fn test_reset() {
        let mut state = IdleState {
            enabled: true,
            phase: IdlePhase::Requested,
            deadline: Some(Instant::now()),
        };
        state.reset();
        assert!(!state.enabled);
        assert_eq!(state.phase, IdlePhase::NotStarted);
        assert_eq!(state.deadline, None);
    }
}
