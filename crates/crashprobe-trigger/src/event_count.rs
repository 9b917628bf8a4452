//! Deterministic kill points: fire on the N-th occurrence of an event.
//!
//! Wall-clock timing cannot reliably hit a decision made deep inside target
//! initialization; counting the target's own events can. The counting
//! backend sits behind [`CountingProbe`]. [`LogEventProbe`] counts output
//! lines on the controller's event bus; a tracing or debugger based backend
//! only has to honour the same contract:
//! - `on_fire` runs at most once per arm, on exactly the threshold-th match;
//! - nothing beyond the threshold is counted;
//! - disarming (explicitly or by drop) detaches the probe.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crashprobe_process::EventBus;

/// Callback invoked with the occurrence count when the probe fires.
pub type FireCallback = Box<dyn FnOnce(u64) + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("probe threshold must be at least 1")]
    ZeroThreshold,

    #[error("probe event name is empty")]
    EmptyEvent,

    #[error("probe attach failed: {0}")]
    Attach(String),
}

/// Counting state of one armed probe.
#[derive(Debug, Clone)]
pub struct EventCounter {
    event_name: String,
    threshold: u64,
    observed: u64,
    fired: bool,
}

impl EventCounter {
    pub fn new(event_name: impl Into<String>, threshold: u64) -> Result<Self, ProbeError> {
        let event_name = event_name.into();
        if event_name.is_empty() {
            return Err(ProbeError::EmptyEvent);
        }
        if threshold == 0 {
            return Err(ProbeError::ZeroThreshold);
        }
        Ok(Self {
            event_name,
            threshold,
            observed: 0,
            fired: false,
        })
    }

    /// Feed one output line. Returns the count exactly once: on the
    /// threshold-th matching line. Lines after that are ignored.
    pub fn observe(&mut self, line: &str) -> Option<u64> {
        if self.fired || !line.contains(&self.event_name) {
            return None;
        }
        self.observed += 1;
        if self.observed == self.threshold {
            self.fired = true;
            Some(self.observed)
        } else {
            None
        }
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

/// An armed counting probe. Dropping it disarms.
pub struct ArmedProbe {
    observed: Arc<AtomicU64>,
    detach: Option<Box<dyn FnOnce() + Send>>,
}

impl ArmedProbe {
    /// Wrap a backend's shared occurrence counter and its detach action.
    pub fn new(observed: Arc<AtomicU64>, detach: impl FnOnce() + Send + 'static) -> Self {
        Self {
            observed,
            detach: Some(Box::new(detach)),
        }
    }

    /// Occurrences seen since arming.
    pub fn observed(&self) -> u64 {
        self.observed.load(Ordering::SeqCst)
    }

    /// Detach now and report how many occurrences were seen.
    pub fn disarm(mut self) -> u64 {
        if let Some(detach) = self.detach.take() {
            detach();
        }
        self.observed()
    }
}

impl Drop for ArmedProbe {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for ArmedProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmedProbe")
            .field("observed", &self.observed())
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Instrumentation that can count occurrences of a named event in the target.
pub trait CountingProbe {
    /// Install a fresh probe. Each call is independent of every earlier arm.
    fn arm(
        &self,
        event_name: &str,
        threshold: u64,
        on_fire: FireCallback,
    ) -> Result<ArmedProbe, ProbeError>;
}

/// Counts target output lines containing the event name.
///
/// Subscribes to the bus at arm time, so arming before a spawn counts the
/// new process from its first line.
#[derive(Debug, Clone)]
pub struct LogEventProbe {
    bus: EventBus,
}

impl LogEventProbe {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

impl CountingProbe for LogEventProbe {
    fn arm(
        &self,
        event_name: &str,
        threshold: u64,
        on_fire: FireCallback,
    ) -> Result<ArmedProbe, ProbeError> {
        let mut counter = EventCounter::new(event_name, threshold)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|err| ProbeError::Attach(err.to_string()))?;
        let mut subscription = self.bus.subscribe();
        let observed = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&observed);

        let task = runtime.spawn(async move {
            let mut on_fire = Some(on_fire);
            while let Some(event) = subscription.recv().await {
                let fired = counter.observe(&event.line);
                seen.store(counter.observed(), Ordering::SeqCst);
                if let Some(count) = fired {
                    tracing::info!(
                        pid = event.pid,
                        event = counter.event_name(),
                        count,
                        "probe threshold reached"
                    );
                    if let Some(callback) = on_fire.take() {
                        callback(count);
                    }
                    break;
                }
            }
        });

        tracing::debug!(event = event_name, threshold, "probe armed");
        Ok(ArmedProbe::new(observed, move || task.abort()))
    }
}
