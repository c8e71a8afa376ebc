//! Circuit breaker guarding the remote service
//!
//! Counts consecutive failures. Once the threshold is reached the circuit
//! opens and calls are refused until the cooldown has passed; the next access
//! after that moves it to half-open, where the outcome of the trial call
//! decides between closing again and reopening.
//!
//! ```text
//! Closed   --failures reach threshold--> Open
//! Open     --cooldown elapsed (lazy)---> HalfOpen
//! HalfOpen --success-------------------> Closed
//! HalfOpen --failure-------------------> Open (cooldown restarts)
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::clock::SharedClock;

/// Breaker position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation
    Closed,
    /// Refusing calls until the cooldown expires
    Open,
    /// Cooldown expired; the next outcome decides
    HalfOpen,
}

/// Copy of the breaker's state at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
}

/// Breaker tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time the circuit stays open before a trial call is allowed
    pub cooldown: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(300), // 5 minutes
        }
    }
}

#[derive(Debug)]
struct BreakerCore {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// Id of the half-open trial call currently in flight
    trial_in_flight: Option<u64>,
    next_trial: u64,
}

impl BreakerCore {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: None,
            next_trial: 0,
        }
    }

    /// Back to closed; trial ids keep counting so stale admissions stay stale
    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_in_flight = None;
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = None;
    }

    fn start_trial(&mut self) -> u64 {
        let id = self.next_trial;
        self.next_trial = self.next_trial.wrapping_add(1);
        self.trial_in_flight = Some(id);
        id
    }

    fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            opened_at: self.opened_at,
        }
    }
}

/// Permission to make one remote call, from [`CircuitBreaker::admit`]
///
/// While half-open only one admission is the trial call. Dropping it without
/// recording an outcome (a cache hit, a rate-limited exit) frees the slot for
/// the next caller.
#[derive(Debug)]
#[must_use]
pub struct Admission<'a> {
    breaker: &'a CircuitBreaker,
    trial: Option<u64>,
}

impl Admission<'_> {
    /// Whether this is the half-open trial call
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }
}

impl Drop for Admission<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.trial {
            self.breaker.end_trial(id);
        }
    }
}

/// Consecutive-failure circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    settings: BreakerSettings,
    core: Mutex<BreakerCore>,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings, clock: SharedClock) -> Self {
        Self {
            settings,
            core: Mutex::new(BreakerCore::new()),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Asks to make a remote call; `None` means refuse
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open here.
    /// Half-open admits a single trial call at a time.
    pub fn admit(&self) -> Option<Admission<'_>> {
        let mut core = self.lock();
        let trial = match core.state {
            CircuitState::Closed => None,
            CircuitState::HalfOpen => {
                if core.trial_in_flight.is_some() {
                    debug!("Circuit breaker: trial call in flight, refusing");
                    return None;
                }
                Some(core.start_trial())
            }
            CircuitState::Open => {
                let now = self.clock.now();
                let cooled = core
                    .opened_at
                    .map(|opened| now.saturating_duration_since(opened) >= self.settings.cooldown)
                    .unwrap_or(true);
                if !cooled {
                    return None;
                }
                core.state = CircuitState::HalfOpen;
                info!(
                    consecutive_failures = core.consecutive_failures,
                    "Circuit breaker: Open -> HalfOpen (cooldown elapsed)"
                );
                Some(core.start_trial())
            }
        };
        Some(Admission {
            breaker: self,
            trial,
        })
    }

    fn end_trial(&self, id: u64) {
        let mut core = self.lock();
        if core.trial_in_flight == Some(id) {
            core.trial_in_flight = None;
        }
    }

    /// Records a successful remote call
    pub fn record_success(&self) {
        let mut core = self.lock();
        match core.state {
            CircuitState::HalfOpen => {
                core.close();
                info!("Circuit breaker: HalfOpen -> Closed (trial call succeeded)");
            }
            CircuitState::Closed => {
                core.consecutive_failures = 0;
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened; the cooldown stands.
                debug!("Circuit breaker: success recorded while open, ignoring");
            }
        }
    }

    /// Records a failed remote call
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut core = self.lock();
        core.consecutive_failures = core.consecutive_failures.saturating_add(1);

        match core.state {
            CircuitState::Closed => {
                if core.consecutive_failures >= self.settings.failure_threshold {
                    core.open(now);
                    warn!(
                        consecutive_failures = core.consecutive_failures,
                        threshold = self.settings.failure_threshold,
                        cooldown_secs = self.settings.cooldown.as_secs(),
                        "Circuit breaker: Closed -> Open (failure threshold reached)"
                    );
                } else {
                    debug!(
                        consecutive_failures = core.consecutive_failures,
                        threshold = self.settings.failure_threshold,
                        "Circuit breaker: failure recorded"
                    );
                }
            }
            CircuitState::HalfOpen => {
                core.open(now);
                warn!(
                    consecutive_failures = core.consecutive_failures,
                    "Circuit breaker: HalfOpen -> Open (trial call failed)"
                );
            }
            CircuitState::Open => {}
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        self.lock().snapshot()
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Forces the breaker back to closed
    pub fn reset(&self) {
        self.lock().close();
        info!("Circuit breaker reset to Closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn create_test_breaker(threshold: u32, cooldown: Duration) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new(
            BreakerSettings {
                failure_threshold: threshold,
                cooldown,
            },
            Arc::new(clock.clone()),
        );
        (breaker, clock)
    }

    #[test]
    fn test_default_settings() {
        let settings = BreakerSettings::default();
        assert_eq!(settings.failure_threshold, 5);
        assert_eq!(settings.cooldown, Duration::from_secs(300));
    }

    #[test]
    fn test_starts_closed() {
        let (breaker, _clock) = create_test_breaker(5, Duration::from_secs(300));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert!(breaker.admit().is_some());
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let (breaker, _clock) = create_test_breaker(5, Duration::from_secs(300));

        for _ in 0..4 {
            breaker.record_failure();
            assert!(breaker.admit().is_some(), "should stay closed below threshold");
        }
        breaker.record_failure();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        assert_eq!(snapshot.consecutive_failures, 5);
        assert!(snapshot.opened_at.is_some());
        assert!(!breaker.admit().is_some());
    }

    #[test]
    fn test_success_resets_failure_count() {
        let (breaker, _clock) = create_test_breaker(3, Duration::from_secs(300));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 2);
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let (breaker, clock) = create_test_breaker(2, Duration::from_secs(300));
        breaker.record_failure();
        breaker.record_failure();

        clock.advance(Duration::from_secs(299));
        assert!(!breaker.admit().is_some());
        assert_eq!(breaker.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(1));
        assert!(breaker.admit().is_some());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_successful_trial_closes() {
        let (breaker, clock) = create_test_breaker(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        clock.advance(Duration::from_secs(60));
        assert!(breaker.admit().is_some());

        breaker.record_success();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.consecutive_failures, 0);
        assert!(snapshot.opened_at.is_none());
    }

    #[test]
    fn test_failed_trial_reopens_and_restarts_cooldown() {
        let (breaker, clock) = create_test_breaker(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        let first_opened = breaker.snapshot().opened_at.expect("opened");

        clock.advance(Duration::from_secs(61));
        assert!(breaker.admit().is_some());
        breaker.record_failure();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Open);
        let reopened = snapshot.opened_at.expect("reopened");
        assert_eq!(reopened - first_opened, Duration::from_secs(61));

        clock.advance(Duration::from_secs(59));
        assert!(!breaker.admit().is_some(), "cooldown restarts from the failed trial");
        clock.advance(Duration::from_secs(1));
        assert!(breaker.admit().is_some());
    }

    #[test]
    fn test_success_while_open_keeps_cooldown() {
        let (breaker, _clock) = create_test_breaker(1, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.admit().is_some());
    }

    #[test]
    fn test_half_open_admits_one_trial_at_a_time() {
        let (breaker, clock) = create_test_breaker(1, Duration::from_secs(60));
        breaker.record_failure();
        clock.advance(Duration::from_secs(60));

        let trial = breaker.admit().expect("trial admitted");
        assert!(trial.is_trial());
        assert!(breaker.admit().is_none(), "second caller waits for the trial");

        drop(trial);
        let retry = breaker.admit().expect("slot freed without an outcome");
        assert!(retry.is_trial());
    }

    #[test]
    fn test_stale_admission_does_not_free_new_trial() {
        let (breaker, clock) = create_test_breaker(1, Duration::from_secs(60));
        breaker.record_failure();
        clock.advance(Duration::from_secs(60));

        let first = breaker.admit().expect("first trial");
        breaker.record_failure();
        clock.advance(Duration::from_secs(60));
        let second = breaker.admit().expect("second trial");

        drop(first);
        assert!(breaker.admit().is_none(), "second trial still holds the slot");
        breaker.record_success();
        drop(second);

        assert_eq!(breaker.state(), CircuitState::Closed);
        let closed = breaker.admit().expect("closed admits");
        assert!(!closed.is_trial());
    }

    #[test]
    fn test_reset_closes() {
        let (breaker, _clock) = create_test_breaker(1, Duration::from_secs(60));
        breaker.record_failure();
        breaker.reset();

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.admit().is_some());
    }
}
