// src/scheduler.rs

//! Pass scheduling
//!
//! The daemon runs one full pass over every mirror and region, then sleeps
//! until `pass end + frequency` and starts over. A pass that runs longer
//! than the interval still leaves a full interval of rest:
//!
//! ```text
//! Idle -> RunningPass -> Sleeping -> RunningPass -> ... -> Stopped
//! ```
//!
//! Errors never escape a pass. They are logged at the mirror or region
//! scope and the remaining mirrors still run. Shutdown is checked between
//! items and interrupts the sleep.

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::streams::{source_for_url, CatalogReader, Keyring};
use crate::sync::{self, MirrorReport};
use crate::target::TargetCloud;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Cooperative shutdown signal shared between the signal handler and the
/// engine
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake any sleeper
    pub fn trigger(&self) {
        let (flag, condvar) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
        condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// `Err(Interrupted)` once shutdown was requested
    pub fn check(&self) -> Result<()> {
        if self.is_triggered() {
            Err(Error::Interrupted)
        } else {
            Ok(())
        }
    }

    /// Block for up to `timeout`; returns true if shutdown was requested
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = condvar
            .wait_timeout_while(guard, timeout, |triggered| !*triggered)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

/// Time source of the scheduler
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    /// Sleep until `deadline`; returns true if woken by shutdown
    fn sleep_until(&self, deadline: DateTime<Utc>, shutdown: &Shutdown) -> bool;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep_until(&self, deadline: DateTime<Utc>, shutdown: &Shutdown) -> bool {
        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return shutdown.is_triggered();
        }
        shutdown.wait_timeout(remaining)
    }
}

/// Lifecycle state of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    RunningPass,
    Sleeping { until: DateTime<Utc> },
    Stopped,
}

/// Outcome of one pass over all mirrors
#[derive(Debug, Clone)]
pub struct PassReport {
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub mirrors: Vec<MirrorReport>,
    /// Mirrors whose pass failed, with the error
    pub failed_mirrors: Vec<(String, String)>,
    pub interrupted: bool,
}

/// Drives sync passes at the configured frequency
pub struct Scheduler<'a, C: Clock = SystemClock> {
    settings: Settings,
    cloud: &'a dyn TargetCloud,
    keyring: Option<Arc<Keyring>>,
    clock: C,
    shutdown: Shutdown,
    state: SchedulerState,
    passes: u64,
}

impl<'a> Scheduler<'a, SystemClock> {
    pub fn new(settings: Settings, cloud: &'a dyn TargetCloud, keyring: Option<Arc<Keyring>>) -> Self {
        Self::with_clock(settings, cloud, keyring, SystemClock)
    }
}

impl<'a, C: Clock> Scheduler<'a, C> {
    pub fn with_clock(
        settings: Settings,
        cloud: &'a dyn TargetCloud,
        keyring: Option<Arc<Keyring>>,
        clock: C,
    ) -> Self {
        Self {
            settings,
            cloud,
            keyring,
            clock,
            shutdown: Shutdown::new(),
            state: SchedulerState::Idle,
            passes: 0,
        }
    }

    /// Use an externally owned shutdown signal
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Number of passes started so far
    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Run one pass over every mirror
    pub fn run_pass(&mut self) -> PassReport {
        self.state = SchedulerState::RunningPass;
        self.passes += 1;
        let started = self.clock.now();
        info!("Starting synchronization pass {}", self.passes);

        let mut report = PassReport {
            started,
            finished: started,
            mirrors: Vec::new(),
            failed_mirrors: Vec::new(),
            interrupted: false,
        };

        for mirror in &self.settings.mirrors {
            if self.shutdown.is_triggered() {
                report.interrupted = true;
                break;
            }
            let source = match source_for_url(&mirror.url) {
                Ok(source) => source,
                Err(e) => {
                    error!("Mirror {}: {}", mirror.url, e);
                    report.failed_mirrors.push((mirror.url.clone(), e.to_string()));
                    continue;
                }
            };
            let reader = CatalogReader::new(source, self.keyring.clone());

            match sync::sync_mirror(&self.settings, mirror, &reader, self.cloud, &self.shutdown) {
                Ok(mirror_report) => {
                    report.interrupted |= mirror_report.interrupted;
                    report.mirrors.push(mirror_report);
                }
                Err(Error::Interrupted) => {
                    report.interrupted = true;
                    break;
                }
                Err(e) => {
                    error!("Mirror {} failed: {}", mirror.url, e);
                    report.failed_mirrors.push((mirror.url.clone(), e.to_string()));
                }
            }
            if report.interrupted {
                break;
            }
        }

        if report.interrupted {
            warn!("Synchronization pass {} interrupted by shutdown", self.passes);
        } else {
            info!(
                "Finished synchronization pass {} ({} mirror(s) ok, {} failed)",
                self.passes,
                report.mirrors.len(),
                report.failed_mirrors.len()
            );
        }
        report.finished = self.clock.now();
        self.state = SchedulerState::Idle;
        report
    }

    /// Start time of the pass after one that finished at `finished`
    pub fn next_run(&self, finished: DateTime<Utc>) -> DateTime<Utc> {
        let interval = chrono::Duration::from_std(self.settings.interval())
            .unwrap_or_else(|_| chrono::Duration::weeks(52));
        finished.checked_add_signed(interval).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Run passes until shutdown
    pub fn run(&mut self) -> Result<()> {
        info!("Starting simplestreams synchronizer");
        while !self.shutdown.is_triggered() {
            let report = self.run_pass();
            if report.interrupted || self.shutdown.is_triggered() {
                break;
            }

            let next = self.next_run(report.finished);
            info!("Next synchronization: {}", next.to_rfc3339());
            self.state = SchedulerState::Sleeping { until: next };
            if self.clock.sleep_until(next, &self.shutdown) {
                break;
            }
        }
        self.state = SchedulerState::Stopped;
        info!("Synchronizer stopped");
        Ok(())
    }
}
