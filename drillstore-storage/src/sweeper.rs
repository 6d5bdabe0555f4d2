//! Background expiry sweep for growing objects.
//!
//! Every `sweep_interval`, for each configured or tracked object type, objects whose last
//! append is older than `now - timeout(type)` stop growing and their containers
//! are deactivated when no sibling is still growing. The sweep keeps no state
//! between runs, so running it twice is harmless.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use drillstore_core::{
    config::GrowingConfig,
    error::{Error, Result},
    metrics::Timer,
    EtpUri, Timestamp,
};

use crate::growing::GrowingObjectManager;

/// What one sweep pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Containers of objects that stopped growing
    pub containers: BTreeSet<EtpUri>,
    pub containers_deactivated: usize,
}

pub struct GrowingObjectSweeper {
    manager: Arc<GrowingObjectManager>,
    config: GrowingConfig,
}

impl GrowingObjectSweeper {
    pub fn new(manager: Arc<GrowingObjectManager>, config: GrowingConfig) -> Self {
        Self { manager, config }
    }

    /// Run one pass against the current time
    pub fn sweep_once(&self) -> Result<SweepReport> {
        self.sweep_at(Utc::now())
    }

    /// Run one pass as if the time were `now`
    pub fn sweep_at(&self, now: Timestamp) -> Result<SweepReport> {
        let timer = Timer::new("growing_sweep");
        let mut report = SweepReport::default();

        let mut object_types: BTreeSet<String> = self.config.object_types().into_iter().collect();
        object_types.extend(self.manager.tracked_object_types()?);

        for object_type in object_types {
            let timeout = chrono::Duration::from_std(self.config.timeout_for(&object_type)).map_err(|e| {
                Error::Configuration {
                    message: format!("growing timeout for {}: {}", object_type, e),
                }
            })?;
            let cutoff = now - timeout;
            let containers = self.manager.expire_growing_objects(&object_type, cutoff)?;
            report.containers.extend(containers);
        }

        report.containers_deactivated = self.manager.expire_wellbore_objects(&report.containers)?;
        self.manager.metrics().record_sweep();
        debug!(
            containers = report.containers.len(),
            deactivated = report.containers_deactivated,
            elapsed_ms = timer.elapsed().as_millis() as u64,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Spawn the periodic sweep on the current tokio runtime
    pub fn start(self: Arc<Self>) -> SweeperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = self.config.sweep_interval();
        info!(interval_secs = period.as_secs(), "Starting growing-object sweeper");

        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once() {
                            error!("Sweep error: {:?}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Shutting down growing-object sweeper");
                        break;
                    }
                }
            }
        });

        SweeperHandle {
            shutdown,
            task: Some(task),
        }
    }
}

/// Running sweeper; dropping it stops the task
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the task and wait for the current pass to finish
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Sweeper task failed: {:?}", e);
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
