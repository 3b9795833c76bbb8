//! Fixed-interval tick loop.
//!
//! A single task owns all agent state. Each iteration services at most one
//! control request, then polls the reading source if the interval elapsed.
//! Sampling, dispatch and drain run to completion before the loop continues,
//! so at most one delivery attempt is ever in flight.

use rackwatch_common::Reading;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::clock::{UptimeClock, interval_elapsed, until_next};
use crate::control::ControlRequest;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::source::ReadingSource;
use crate::transport::Transport;

/// State owned by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SchedulerState {
    /// Latest valid reading; 0.0/0.0 until the first one.
    pub reading: Reading,
    /// Clock value of the last poll.
    pub last_poll: u32,
}

/// What a single poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The sample was missing or invalid; nothing changed.
    Skipped,
    /// A valid sample was retained and submitted.
    Dispatched(DispatchOutcome),
}

/// The cooperative loop driving sampling, dispatch and control requests.
pub struct Scheduler<S, T> {
    source: S,
    dispatcher: Dispatcher<T>,
    state: SchedulerState,
    interval_ms: u32,
    control: mpsc::Receiver<ControlRequest>,
}

impl<S: ReadingSource, T: Transport> Scheduler<S, T> {
    /// Create a scheduler.
    pub fn new(
        source: S,
        dispatcher: Dispatcher<T>,
        interval_ms: u32,
        control: mpsc::Receiver<ControlRequest>,
    ) -> Self {
        Self {
            source,
            dispatcher,
            state: SchedulerState::default(),
            interval_ms,
            control,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }

    /// Run until the shutdown signal is received.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let clock = UptimeClock::start();

        // Due immediately: the first sample is taken without waiting an interval.
        self.state.last_poll = clock.now_millis().wrapping_sub(self.interval_ms);

        info!(interval_ms = self.interval_ms, "Scheduler started");

        loop {
            let wait = until_next(clock.now_millis(), self.state.last_poll, self.interval_ms);

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                Some(request) = self.control.recv() => {
                    self.service(request).await;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            self.poll_if_due(clock.now_millis()).await;
        }

        info!("Scheduler stopped");
    }

    /// Service one pending control request without waiting for one.
    ///
    /// Returns `false` if none was queued.
    pub async fn service_pending(&mut self) -> bool {
        match self.control.try_recv() {
            Ok(request) => {
                self.service(request).await;
                true
            }
            Err(_) => false,
        }
    }

    async fn service(&mut self, request: ControlRequest) {
        request
            .respond(&self.state.reading, self.dispatcher.queue())
            .await;
    }

    /// Poll once if the interval elapsed at clock value `now`.
    pub async fn poll_if_due(&mut self, now: u32) -> Option<TickOutcome> {
        if !interval_elapsed(now, self.state.last_poll, self.interval_ms) {
            return None;
        }

        self.state.last_poll = now;
        Some(self.tick().await)
    }

    /// Sample the source and, if the sample is valid, retain and submit it.
    pub async fn tick(&mut self) -> TickOutcome {
        let reading = match self.source.sample().await {
            Ok(reading) if reading.is_valid() => reading,
            Ok(reading) => {
                warn!(
                    temperature = reading.temperature,
                    humidity = reading.humidity,
                    "Invalid sample from sensor, skipping"
                );
                return TickOutcome::Skipped;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read from sensor");
                return TickOutcome::Skipped;
            }
        };

        self.state.reading = reading;
        info!("{}", reading);

        TickOutcome::Dispatched(self.dispatcher.submit(&reading).await)
    }
}
