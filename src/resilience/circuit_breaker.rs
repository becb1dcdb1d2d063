use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Circuit position, derived from the breaker's internal clock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// Cooldown before the first HALF_OPEN probe; doubles per consecutive
    /// trip, capped at `max_reset_interval`.
    pub reset_interval: Duration,
    pub max_reset_interval: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_interval: Duration::from_secs(30),
            max_reset_interval: Duration::from_secs(300),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the initial reset interval
    pub fn with_reset_interval(mut self, interval: Duration) -> Self {
        self.reset_interval = interval;
        self
    }

    /// Cap the backed-off reset interval
    pub fn with_max_reset_interval(mut self, interval: Duration) -> Self {
        self.max_reset_interval = interval;
        self
    }
}

#[derive(Debug)]
struct State {
    consecutive_failures: u32,
    /// Consecutive trips without an intervening success; drives backoff.
    trips: u32,
    opened_at: Option<Instant>,
    next_probe_at: Option<Instant>,
    trial_in_flight: bool,
}

impl State {
    fn position(&self, now: Instant) -> CircuitState {
        match self.next_probe_at {
            Some(probe_at) if now < probe_at => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
            None => CircuitState::Closed,
        }
    }
}

/// Decision returned by [`CircuitBreaker::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Circuit closed, call proceeds normally.
    Normal,
    /// Circuit half-open; this call is the single recovery trial.
    Trial,
}

/// Why a call was rejected without touching the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Circuit open; retry after the remaining cooldown.
    Open { retry_in: Duration },
    /// Circuit half-open but another request already holds the trial.
    TrialInFlight,
}

/// Point-in-time view of one breaker, exposed through `status()`.
#[derive(Debug, Clone)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub failure_threshold: u32,
    /// Remaining time until the next HALF_OPEN probe, if currently open.
    pub next_probe_in: Option<Duration>,
}

/// Per-backend failure-isolation state machine.
///
/// - CLOSED: calls pass; consecutive failures are counted, any success
///   resets the count.
/// - OPEN: calls are rejected until `next_probe_at`; the interval doubles
///   with each consecutive trip, capped.
/// - HALF_OPEN: exactly one trial call is allowed at a time; success closes
///   the circuit, failure re-opens it with a longer cooldown.
///
/// All transitions happen here; no external code mutates the state.
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            state: Mutex::new(State {
                consecutive_failures: 0,
                trips: 0,
                opened_at: None,
                next_probe_at: None,
                trial_in_flight: false,
            }),
        }
    }

    fn backoff(&self, trips: u32) -> Duration {
        let factor = 1u32.checked_shl(trips.saturating_sub(1)).unwrap_or(u32::MAX);
        self.cfg
            .reset_interval
            .saturating_mul(factor)
            .min(self.cfg.max_reset_interval)
    }

    /// Current position without acquiring a call permit.
    pub fn current_state(&self) -> CircuitState {
        let st = self.state.lock().unwrap();
        st.position(Instant::now())
    }

    /// Ask to place a call through this circuit.
    ///
    /// In HALF_OPEN, the first caller gets the [`Permit::Trial`] and later
    /// callers are rejected until the trial outcome is reported via
    /// [`on_success`](Self::on_success) / [`on_failure`](Self::on_failure).
    pub fn acquire(&self) -> Result<Permit, Rejection> {
        let now = Instant::now();
        let mut st = self.state.lock().unwrap();
        match st.position(now) {
            CircuitState::Closed => Ok(Permit::Normal),
            CircuitState::Open => {
                let retry_in = st
                    .next_probe_at
                    .map(|at| at.saturating_duration_since(now))
                    .unwrap_or_default();
                Err(Rejection::Open { retry_in })
            }
            CircuitState::HalfOpen => {
                if st.trial_in_flight {
                    Err(Rejection::TrialInFlight)
                } else {
                    st.trial_in_flight = true;
                    Ok(Permit::Trial)
                }
            }
        }
    }

    pub fn on_success(&self) {
        let mut st = self.state.lock().unwrap();
        st.consecutive_failures = 0;
        st.trips = 0;
        st.opened_at = None;
        st.next_probe_at = None;
        st.trial_in_flight = false;
    }

    pub fn on_failure(&self) {
        let now = Instant::now();
        let mut st = self.state.lock().unwrap();
        st.trial_in_flight = false;

        if st.next_probe_at.is_some() {
            // HALF_OPEN trial failed: re-open with a longer cooldown.
            st.trips = st.trips.saturating_add(1);
            st.opened_at = Some(now);
            let backoff = self.backoff(st.trips);
            st.next_probe_at = Some(now + backoff);
            return;
        }

        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        if st.consecutive_failures >= self.cfg.failure_threshold {
            st.trips = st.trips.saturating_add(1);
            st.opened_at = Some(now);
            let backoff = self.backoff(st.trips);
            st.next_probe_at = Some(now + backoff);
        }
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let now = Instant::now();
        let st = self.state.lock().unwrap();
        let state = st.position(now);
        CircuitSnapshot {
            state,
            consecutive_failures: st.consecutive_failures,
            failure_threshold: self.cfg.failure_threshold,
            next_probe_in: match state {
                CircuitState::Open => st.next_probe_at.map(|at| at.saturating_duration_since(now)),
                _ => None,
            },
        }
    }
}

/// Lazily-populated set of breakers, one per backend name.
pub struct CircuitBreakerSet {
    cfg: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerSet {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Breaker for a backend, created on first observation.
    pub fn breaker(&self, backend: &str) -> Arc<CircuitBreaker> {
        if let Some(b) = self.breakers.read().unwrap().get(backend) {
            return Arc::clone(b);
        }
        let mut map = self.breakers.write().unwrap();
        Arc::clone(
            map.entry(backend.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(self.cfg.clone()))),
        )
    }

    /// State for a backend that may not have a breaker yet (treated CLOSED).
    pub fn state_of(&self, backend: &str) -> CircuitState {
        self.breakers
            .read()
            .unwrap()
            .get(backend)
            .map(|b| b.current_state())
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot_of(&self, backend: &str) -> Option<CircuitSnapshot> {
        self.breakers
            .read()
            .unwrap()
            .get(backend)
            .map(|b| b.snapshot())
    }
}
