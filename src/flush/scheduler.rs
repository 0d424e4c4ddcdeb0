//! Background flush loop.
//!
//! The loop repeatedly asks the engine for one flush step. A step either
//! rotates the current unit (and wants to run again immediately) or finds
//! nothing to do (and asks to sleep for a second). Rotation therefore
//! happens within about one second of an hour boundary.
//!
//! The loop holds only a weak reference to the engine, so dropping the
//! last engine handle also ends the task.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::engine::Engine;
use crate::error::{Result, StatsError};
use log::{debug, error, info};

/// Pause between idle flush steps.
pub const IDLE_INTERVAL: Duration = Duration::from_secs(1);

/// Outcome of one flush step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushStep {
    /// Whether the loop should keep running
    pub cont: bool,
    /// How long to wait before the next step
    pub sleep: Duration,
}

impl FlushStep {
    /// A unit was rotated; run again right away.
    pub const fn busy() -> Self {
        Self {
            cont: true,
            sleep: Duration::ZERO,
        }
    }

    /// Nothing to rotate.
    pub const fn idle() -> Self {
        Self {
            cont: true,
            sleep: IDLE_INTERVAL,
        }
    }

    /// The engine is shutting down.
    pub const fn stop() -> Self {
        Self {
            cont: false,
            sleep: Duration::ZERO,
        }
    }
}

/// Handle to a running flush loop.
pub struct FlushScheduler {
    /// Wakes the loop out of its sleep when stopping
    stop: Arc<Notify>,
    /// The spawned loop
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FlushScheduler {
    /// Spawns the flush loop for `engine` on the current Tokio runtime.
    ///
    /// # Errors
    /// Returns [`StatsError::Runtime`] when called outside a runtime.
    pub fn spawn(engine: &Arc<Engine>) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| StatsError::Runtime(e.to_string()))?;

        let stop = Arc::new(Notify::new());
        let task = handle.spawn(run(Arc::downgrade(engine), Arc::clone(&stop)));

        info!("Started statistics flush loop");

        Ok(Self {
            stop,
            task: Mutex::new(Some(task)),
        })
    }

    /// Signals the loop to exit and waits for it.
    pub async fn stop(&self) {
        self.stop.notify_one();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Statistics flush loop failed: {}", e);
            }
        }
    }
}

async fn run(engine: Weak<Engine>, stop: Arc<Notify>) {
    loop {
        let step = match engine.upgrade() {
            Some(engine) => engine.flush_step(),
            None => FlushStep::stop(),
        };

        if !step.cont {
            break;
        }

        if step.sleep.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(step.sleep) => {}
            _ = stop.notified() => break,
        }
    }

    debug!("Statistics flush loop finished");
}
