use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Feature gate
// ---------------------------------------------------------------------------

/// Decides whether updates may run at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateGate {
    /// Open while the named environment variable is truthy.
    Env(String),
    /// Fixed answer, used by tests and embedders.
    Fixed(bool),
}

impl UpdateGate {
    pub fn is_open(&self) -> bool {
        match self {
            UpdateGate::Env(var) => std::env::var(var).map(|v| is_truthy(&v)).unwrap_or(false),
            UpdateGate::Fixed(open) => *open,
        }
    }

    /// Human-readable description for error messages.
    pub fn describe(&self) -> String {
        match self {
            UpdateGate::Env(var) => var.clone(),
            UpdateGate::Fixed(_) => "the update gate".to_string(),
        }
    }
}

/// `1`, `true`, `yes` and `on` (any case) count as enabled.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ---------------------------------------------------------------------------
// Single-flight
// ---------------------------------------------------------------------------

/// Admits at most one update attempt at a time.
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

impl SingleFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim the slot, or `None` if another attempt holds it.
    ///
    /// The returned guard releases the slot when dropped, including on panic
    /// unwind of the task that owns it.
    pub fn try_acquire(self: &Arc<Self>) -> Option<FlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                flight: Arc::clone(self),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct FlightGuard {
    flight: Arc<SingleFlight>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flight.busy.store(false, Ordering::Release);
    }
}
