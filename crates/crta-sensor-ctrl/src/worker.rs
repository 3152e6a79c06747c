//! Per-instance sensor-control worker.
//!
//! Batches arrive in the notification path, which must not touch hardware.
//! [`SensorControlQueue::submit`] only enqueues; a dedicated OS thread
//! ([`QueueRunner`]) takes the batches in FIFO order and runs them through
//! the [dispatcher][crate::dispatcher], where sensor I/O may block.
//!
//! The queue is bounded.  When it already holds `capacity` batches a new
//! submission is rejected with [`CrtaError::QueueFull`] instead of
//! overwriting a pending one.
//!
//! ```text
//!  Open ──start──▶ Started ──stop──▶ Stopped
//!   ▲                                   │
//!   └──────────────start────────────────┘
//! ```
//!
//! Batches are only executed in `Started`; anything taken off the queue in
//! another state completes with [`CrtaError::NotStarted`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;

use crta_hal::{BufferInfo, SensorInterface};
use crta_types::CrtaError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatcher::{self, BatchOutcome};

/// Lifecycle of an instance's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Open,
    Started,
    Stopped,
}

impl WorkerState {
    fn to_raw(self) -> u8 {
        match self {
            WorkerState::Open => 0,
            WorkerState::Started => 1,
            WorkerState::Stopped => 2,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => WorkerState::Started,
            2 => WorkerState::Stopped,
            _ => WorkerState::Open,
        }
    }
}

/// What the runner needs from its owner while executing batches.
pub trait BatchContext: Send + Sync + 'static {
    /// Sensor currently bound to the instance, if any.
    fn sensor(&self) -> Option<Arc<dyn SensorInterface>>;

    /// Called exactly once per batch taken off the queue.
    fn complete(&self, outcome: BatchOutcome);
}

/// Producer side, owned by the notification path.
#[derive(Clone)]
pub struct SensorControlQueue {
    instance: u32,
    capacity: usize,
    tx: mpsc::Sender<BufferInfo>,
    state: Arc<AtomicU8>,
}

/// Consumer side.  Run it with [`spawn`][Self::spawn].
pub struct QueueRunner {
    instance: u32,
    rx: mpsc::Receiver<BufferInfo>,
    state: Arc<AtomicU8>,
}

impl SensorControlQueue {
    /// Create a queue holding at most `capacity` pending batches.
    ///
    /// The runner is returned separately so that it can be spawned (or, in
    /// tests, held back).
    pub fn bounded(instance: u32, capacity: usize) -> (Self, QueueRunner) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let state = Arc::new(AtomicU8::new(WorkerState::Open.to_raw()));
        (
            Self {
                instance,
                capacity,
                tx,
                state: Arc::clone(&state),
            },
            QueueRunner {
                instance,
                rx,
                state,
            },
        )
    }

    /// Enqueue a batch.  Never blocks.
    ///
    /// # Errors
    ///
    /// * [`CrtaError::QueueFull`] – `capacity` batches are already pending.
    /// * [`CrtaError::NotOpen`] – the runner has exited.
    pub fn submit(&self, batch: BufferInfo) -> Result<(), CrtaError> {
        match self.tx.try_send(batch) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(batch)) => {
                warn!(
                    instance = self.instance,
                    index = batch.buffer.index,
                    capacity = self.capacity,
                    "sensor-control queue full; rejecting batch"
                );
                Err(CrtaError::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(CrtaError::NotOpen),
        }
    }

    pub fn start(&self) {
        self.set_state(WorkerState::Started);
    }

    pub fn stop(&self) {
        self.set_state(WorkerState::Stopped);
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_raw(self.state.load(Ordering::SeqCst))
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    fn set_state(&self, state: WorkerState) {
        let old = self.state.swap(state.to_raw(), Ordering::SeqCst);
        debug!(
            instance = self.instance,
            from = ?WorkerState::from_raw(old),
            to = ?state,
            "sensor-control worker state"
        );
    }
}

impl QueueRunner {
    /// Start the consumer thread.  It exits once every
    /// [`SensorControlQueue`] clone has been dropped and the queue is
    /// drained.
    ///
    /// # Errors
    ///
    /// Returns [`CrtaError::HardwareFault`] if the OS refuses the thread.
    pub fn spawn(self, ctx: Arc<dyn BatchContext>) -> Result<JoinHandle<()>, CrtaError> {
        let instance = self.instance;
        std::thread::Builder::new()
            .name(format!("crta-sensor-ctrl-{instance}"))
            .spawn(move || self.run(ctx))
            .map_err(|err| CrtaError::HardwareFault {
                component: format!("sensor-ctrl worker {instance}"),
                details: err.to_string(),
            })
    }

    /// Consume batches until the queue closes.  Blocks the calling thread.
    pub fn run(mut self, ctx: Arc<dyn BatchContext>) {
        info!(instance = self.instance, "sensor-control worker running");
        while let Some(batch) = self.rx.blocking_recv() {
            self.execute(&batch, ctx.as_ref());
        }
        info!(instance = self.instance, "sensor-control worker exited");
    }

    fn execute(&self, batch: &BufferInfo, ctx: &dyn BatchContext) {
        let state = WorkerState::from_raw(self.state.load(Ordering::SeqCst));
        let refused = |err: CrtaError| BatchOutcome {
            instance: self.instance,
            buffer: batch.buffer,
            dva: batch.dva,
            result: Err(err),
        };

        if state != WorkerState::Started {
            debug!(instance = self.instance, ?state, "dropping batch outside Started");
            ctx.complete(refused(CrtaError::NotStarted(self.instance)));
            return;
        }
        let Some(sensor) = ctx.sensor() else {
            ctx.complete(refused(CrtaError::HardwareFault {
                component: format!("instance {}", self.instance),
                details: "no sensor bound".to_string(),
            }));
            return;
        };
        dispatcher::dispatch(self.instance, batch, sensor.as_ref(), |outcome| {
            ctx.complete(outcome)
        });
    }
}
