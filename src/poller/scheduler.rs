//! Poll loop: fetch, detect changes, aggregate and push.
//!
//! The loop blocks until the downstream hub has acknowledged `/init`, then
//! wakes once per tick. Work happens only on ticks whose minute lands on the
//! configured phase (minute 2 of every 5 by default), which trails the
//! providers' 5-minute publication by enough for the newest bucket to exist.
//! Every failure inside a tick is logged and the loop moves on.

use super::Clock;
use crate::analysis::{aggregate_at, ChangeDetector};
use crate::config::SchedulerConfig;
use crate::delivery::{DeliveryClient, InitSignal};
use crate::models::{Measurement, SensorDefinition};
use crate::source::DataSource;
use crate::store::ValueStore;
use chrono::{DateTime, Timelike, Utc};
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    WaitingForInit,
    Running,
    Stopped,
}

/// Result of one tick, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    OffPhase,
    Polled {
        pushed: usize,
        unchanged: usize,
        failed: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorOutcome {
    Pushed,
    Unchanged,
    Failed,
}

pub struct Scheduler<S, C> {
    source: Arc<S>,
    store: Arc<ValueStore>,
    changes: ChangeDetector,
    delivery: Arc<DeliveryClient>,
    init: InitSignal,
    stop: Arc<AtomicBool>,
    clock: C,
    interval: Duration,
    phase_modulus: u32,
    phase_offset: u32,
    state: SchedulerState,
}

impl<S: DataSource, C: Clock> Scheduler<S, C> {
    pub fn new(
        source: Arc<S>,
        store: Arc<ValueStore>,
        delivery: Arc<DeliveryClient>,
        init: InitSignal,
        stop: Arc<AtomicBool>,
        clock: C,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            source,
            store,
            changes: ChangeDetector::new(),
            delivery,
            init,
            stop,
            clock,
            interval: Duration::from_secs(config.tick_seconds),
            phase_modulus: config.phase_modulus,
            phase_offset: config.phase_offset,
            state: SchedulerState::WaitingForInit,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Run until the stop flag is observed.
    pub async fn run(&mut self) {
        if !self.init.is_fired() {
            debug!("Scheduler waiting for init");
        }
        self.init.wait().await;
        self.state = SchedulerState::Running;
        info!(
            "Polling {} sensor(s) via {} every {:?}",
            self.store.len(),
            self.source.name(),
            self.interval
        );

        loop {
            if self.stop.load(Ordering::SeqCst) {
                break;
            }

            match self.tick(self.clock.now()).await {
                TickOutcome::OffPhase => {}
                TickOutcome::Polled {
                    pushed,
                    unchanged,
                    failed,
                } => debug!(
                    "Tick done: {} pushed, {} unchanged, {} failed",
                    pushed, unchanged, failed
                ),
            }

            self.clock.sleep(self.interval).await;
        }

        self.state = SchedulerState::Stopped;
        info!("Scheduler stopped");
    }

    /// `true` when `now` falls on the configured minute of the cycle.
    pub fn in_phase(&self, now: DateTime<Utc>) -> bool {
        now.minute() % self.phase_modulus == self.phase_offset
    }

    /// One pass over every registered sensor, if `now` is in phase.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickOutcome {
        if !self.in_phase(now) {
            return TickOutcome::OffPhase;
        }

        let outcomes = join_all(self.store.sensors().map(|s| self.poll_sensor(s, now))).await;

        let count = |wanted: SensorOutcome| outcomes.iter().filter(|o| **o == wanted).count();
        TickOutcome::Polled {
            pushed: count(SensorOutcome::Pushed),
            unchanged: count(SensorOutcome::Unchanged),
            failed: count(SensorOutcome::Failed),
        }
    }

    async fn poll_sensor(&self, sensor: &SensorDefinition, now: DateTime<Utc>) -> SensorOutcome {
        let series = match self.source.fetch(sensor).await {
            Ok(series) => series,
            Err(e) => {
                warn!("Skipping {} this cycle: {}", sensor.name, e);
                return SensorOutcome::Failed;
            }
        };

        if !self.changes.observe(&sensor.name, &series).await {
            debug!("{}: provider data unchanged", sensor.name);
            return SensorOutcome::Unchanged;
        }

        let measurement = Measurement {
            sensor_id: sensor.name.clone(),
            value: aggregate_at(&series, &sensor.processing, now),
            timestamp: now,
        };
        self.delivery.push(&measurement).await;
        SensorOutcome::Pushed
    }

    #[cfg(test)]
    fn clock(&self) -> &C {
        &self.clock
    }
}
