//! [`MessageAdapter`] – the host side of the coprocessor command protocol.
//!
//! # Lifecycle
//!
//! The adapter is reference counted across instances.  The first
//! [`open`][MessageAdapter::open] opens the transport and waits for the
//! coprocessor to boot; the last [`close`][MessageAdapter::close] closes it
//! and clears every response callback.  Each `open(instance)` also resets
//! the instance's wait slots and starts its sensor-control worker.
//!
//! # Delivery
//!
//! | Command | Delivery |
//! |---|---|
//! | OPEN, PUT_BUF, START, STOP, CLOSE | waits for the response, unless called with [`CallContext::Atomic`] |
//! | SET_SHARED_BUF_IDX and per-frame commands | fire-and-forget; the response reaches the callback only |
//!
//! Blocking sends are `async` and time out after
//! [`AdapterConfig::response_timeout`].  Fire-and-forget sends are plain
//! functions that return as soon as the frame is queued.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crta_hal::{BufferInfo, BufferManager, FrameReceiver, SensorInterface, Transport};
use crta_sensor_ctrl::{SensorControlQueue, WorkerState};
use crta_types::wire::check_instance;
use crta_types::{
    BufferKind, CdafEndBuffers, CrtaError, Delivery, FrameEndStats, HicCommand, HicMessage,
    MAX_INSTANCES, OpenParams, ResponseMessage,
};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::config::AdapterConfig;
use crate::dispatch::{FrameSink, WorkerLink};
use crate::slots::WaitSlots;

/// Handler for responses to one `(command, instance)`.
///
/// Runs in the transport's notification context: it must return quickly and
/// must not block.  An error is logged and otherwise ignored.
pub type ResponseCallback =
    Arc<dyn Fn(&ResponseMessage) -> Result<(), CrtaError> + Send + Sync>;

/// Context a send is issued from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallContext {
    /// An async task that may suspend until the response arrives.
    #[default]
    Task,
    /// A context that must not suspend; every command is sent
    /// fire-and-forget.
    Atomic,
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct Binding {
    pub(crate) sensor: Option<Arc<dyn SensorInterface>>,
    pub(crate) buffers: Option<Arc<dyn BufferManager>>,
    pub(crate) queue: Option<SensorControlQueue>,
}

pub(crate) struct Core {
    pub(crate) config: AdapterConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) slots: WaitSlots,
    refcount: Mutex<u32>,
    callbacks: Vec<RwLock<Option<ResponseCallback>>>,
    bindings: Vec<RwLock<Binding>>,
}

impl Core {
    fn callback_index(instance: u32, command: HicCommand) -> usize {
        instance as usize * HicCommand::COUNT + command.id() as usize
    }

    /// `instance` must already be range-checked.
    pub(crate) fn binding(&self, instance: u32) -> RwLockReadGuard<'_, Binding> {
        self.bindings[instance as usize]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn binding_mut(&self, instance: u32) -> RwLockWriteGuard<'_, Binding> {
        self.bindings[instance as usize]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// `instance` must already be range-checked.
    pub(crate) fn callback(&self, instance: u32, command: HicCommand) -> Option<ResponseCallback> {
        self.callbacks[Self::callback_index(instance, command)]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_callback(&self, instance: u32, command: HicCommand, callback: Option<ResponseCallback>) {
        *self.callbacks[Self::callback_index(instance, command)]
            .write()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }

    fn refcount(&self) -> MutexGuard<'_, u32> {
        self.refcount.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for [`MessageAdapter`].
#[derive(Default)]
pub struct MessageAdapterBuilder {
    transport: Option<Arc<dyn Transport>>,
    config: AdapterConfig,
}

impl MessageAdapterBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(mut self, config: AdapterConfig) -> Self {
        self.config = config;
        self
    }

    /// # Errors
    ///
    /// [`CrtaError::Config`] when no transport was given or the
    /// configuration is invalid.
    pub fn build(self) -> Result<MessageAdapter, CrtaError> {
        let transport = self
            .transport
            .ok_or_else(|| CrtaError::Config("a transport is required".to_string()))?;
        self.config.validate()?;

        let slot_count = MAX_INSTANCES as usize * HicCommand::COUNT;
        Ok(MessageAdapter {
            core: Arc::new(Core {
                config: self.config,
                transport,
                slots: WaitSlots::new(),
                refcount: Mutex::new(0),
                callbacks: (0..slot_count).map(|_| RwLock::new(None)).collect(),
                bindings: (0..MAX_INSTANCES).map(|_| RwLock::default()).collect(),
            }),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MessageAdapter
// ────────────────────────────────────────────────────────────────────────────

/// Host endpoint of the coprocessor link.  Cloning is cheap and every clone
/// drives the same link.
#[derive(Clone)]
pub struct MessageAdapter {
    core: Arc<Core>,
}

impl MessageAdapter {
    pub fn builder() -> MessageAdapterBuilder {
        MessageAdapterBuilder::default()
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.core.config
    }

    /// `true` while at least one instance is open.
    pub fn is_open(&self) -> bool {
        *self.core.refcount() > 0
    }

    // ── lifecycle ───────────────────────────────────────────────────────────

    /// Open `instance`.
    ///
    /// # Errors
    ///
    /// * [`CrtaError::OutOfRange`] – `instance >= MAX_INSTANCES`.
    /// * [`CrtaError::TransportFailure`] / [`CrtaError::BootFailure`] – the
    ///   first open could not bring the link up.  The reference count is
    ///   unchanged.
    pub fn open(&self, instance: u32) -> Result<(), CrtaError> {
        check_instance(instance)?;
        let core = &self.core;
        let mut refcount = core.refcount();

        let first = *refcount == 0;
        if first {
            let sink: Arc<dyn FrameReceiver> = Arc::new(FrameSink::new(Arc::downgrade(core)));
            core.transport.open(sink).inspect_err(|err| {
                error!(instance, %err, "failed to open coprocessor transport");
            })?;
            if let Err(err) = core.transport.wait_boot(core.config.boot_timeout()) {
                error!(instance, %err, "coprocessor did not boot");
                core.transport.close();
                return Err(err);
            }
            info!("coprocessor link up");
        }

        core.slots.reset_instance(instance);

        let (queue, runner) =
            SensorControlQueue::bounded(instance, core.config.sensor_ctrl_queue_depth);
        let link = Arc::new(WorkerLink::new(Arc::downgrade(core), instance));
        if let Err(err) = runner.spawn(link) {
            if first {
                core.transport.close();
            }
            return Err(err);
        }
        if let Some(previous) = core.binding_mut(instance).queue.replace(queue) {
            previous.stop();
        }

        *refcount += 1;
        info!(instance, refcount = *refcount, "instance opened");
        Ok(())
    }

    /// Close `instance`.
    ///
    /// # Errors
    ///
    /// * [`CrtaError::OutOfRange`] – `instance >= MAX_INSTANCES`.
    /// * [`CrtaError::NotOpen`] – nothing is open.
    pub fn close(&self, instance: u32) -> Result<(), CrtaError> {
        check_instance(instance)?;
        let core = &self.core;
        let mut refcount = core.refcount();
        if *refcount == 0 {
            return Err(CrtaError::NotOpen);
        }
        *refcount -= 1;

        let queue = {
            let mut binding = core.binding_mut(instance);
            binding.sensor = None;
            binding.queue.take()
        };
        if let Some(queue) = queue {
            queue.stop();
        }

        if *refcount == 0 {
            core.transport.close();
            for instance in 0..MAX_INSTANCES {
                for command in HicCommand::ALL {
                    core.set_callback(instance, command, None);
                }
            }
            info!("coprocessor link down");
        }
        info!(instance, refcount = *refcount, "instance closed");
        Ok(())
    }

    // ── bindings ────────────────────────────────────────────────────────────

    /// Attach the sensor peripherals used by `instance`.
    pub fn bind_sensor(
        &self,
        instance: u32,
        sensor: Arc<dyn SensorInterface>,
    ) -> Result<(), CrtaError> {
        check_instance(instance)?;
        self.core.binding_mut(instance).sensor = Some(sensor);
        Ok(())
    }

    /// Attach the buffer manager that resolves `instance`'s shared buffers.
    pub fn bind_buffer_manager(
        &self,
        instance: u32,
        buffers: Arc<dyn BufferManager>,
    ) -> Result<(), CrtaError> {
        check_instance(instance)?;
        self.core.binding_mut(instance).buffers = Some(buffers);
        Ok(())
    }

    /// State of `instance`'s sensor-control worker, `None` when it has none.
    pub fn worker_state(&self, instance: u32) -> Option<WorkerState> {
        check_instance(instance).ok()?;
        self.core.binding(instance).queue.as_ref().map(|q| q.state())
    }

    /// Install (or replace) the response handler for `(command, instance)`.
    ///
    /// # Errors
    ///
    /// * [`CrtaError::NotOpen`] – nothing is open.
    /// * [`CrtaError::OutOfRange`] – `instance >= MAX_INSTANCES`.
    pub fn register_response_callback<F>(
        &self,
        instance: u32,
        command: HicCommand,
        callback: F,
    ) -> Result<(), CrtaError>
    where
        F: Fn(&ResponseMessage) -> Result<(), CrtaError> + Send + Sync + 'static,
    {
        if !self.is_open() {
            return Err(CrtaError::NotOpen);
        }
        check_instance(instance)?;
        self.core
            .set_callback(instance, command, Some(Arc::new(callback)));
        debug!(instance, command = command.name(), "response callback registered");
        Ok(())
    }

    // ── host commands ───────────────────────────────────────────────────────

    pub async fn send_open(
        &self,
        instance: u32,
        params: OpenParams,
        ctx: CallContext,
    ) -> Result<(), CrtaError> {
        self.transmit(instance, HicMessage::Open(params), ctx).await
    }

    /// Hand a CPU-written buffer to the coprocessor.
    pub async fn send_put_buf(
        &self,
        instance: u32,
        buffer: &BufferInfo,
        ctx: CallContext,
    ) -> Result<(), CrtaError> {
        self.ensure_open()?;
        self.buffer_manager(instance)?.sync_for_device(buffer)?;
        let message = HicMessage::PutBuf {
            buffer: buffer.buffer,
            dva: buffer.dva,
            size: buffer.size,
        };
        self.transmit(instance, message, ctx).await
    }

    pub fn send_set_shared_buf_idx(
        &self,
        instance: u32,
        kind: BufferKind,
        fcount: u32,
    ) -> Result<(), CrtaError> {
        self.transmit_now(instance, HicMessage::SetSharedBufIdx { kind, fcount })
    }

    /// Refresh the sensor info in `pcsi`, then start streaming.  On success
    /// the instance's sensor-control worker accepts batches.
    pub async fn send_start(
        &self,
        instance: u32,
        pcsi: &BufferInfo,
        ctx: CallContext,
    ) -> Result<(), CrtaError> {
        self.ensure_open()?;
        self.refresh_sensor_info(instance, pcsi)?;
        self.transmit(instance, HicMessage::Start { pcsi_dva: pcsi.dva }, ctx)
            .await?;
        if let Some(queue) = self.queue(instance) {
            queue.start();
        }
        Ok(())
    }

    pub fn send_shot(
        &self,
        instance: u32,
        fcount: u32,
        meta: &BufferInfo,
        pcfi: &BufferInfo,
    ) -> Result<(), CrtaError> {
        self.ensure_open()?;
        let buffers = self.buffer_manager(instance)?;
        buffers.sync_for_device(meta)?;
        buffers.sync_for_device(pcfi)?;
        self.transmit_now(
            instance,
            HicMessage::Shot {
                fcount,
                meta_dva: meta.dva,
                pcfi_dva: pcfi.dva,
            },
        )
    }

    pub fn send_cstat_frame_start(
        &self,
        instance: u32,
        fcount: u32,
        pcsi: &BufferInfo,
    ) -> Result<(), CrtaError> {
        self.ensure_open()?;
        self.refresh_sensor_info(instance, pcsi)?;
        self.transmit_now(
            instance,
            HicMessage::CstatFrameStart {
                fcount,
                pcsi_dva: pcsi.dva,
            },
        )
    }

    /// End of CDAF statistics.  `laser_af` is filled by the CPU just before
    /// this call and is made visible to the coprocessor first; the raw CDAF
    /// and PDAF tail buffers are written by the ISP.
    pub fn send_cstat_cdaf_end(
        &self,
        instance: u32,
        fcount: u32,
        cdaf_raw: u64,
        pdaf_tail: u64,
        laser_af: &BufferInfo,
    ) -> Result<(), CrtaError> {
        self.ensure_open()?;
        self.buffer_manager(instance)?.sync_for_device(laser_af)?;
        self.transmit_now(
            instance,
            HicMessage::CstatCdafEnd {
                fcount,
                buffers: CdafEndBuffers {
                    cdaf_raw,
                    pdaf_tail,
                    laser_af: laser_af.dva,
                },
            },
        )
    }

    pub fn send_pdp_stat0_end(&self, instance: u32, fcount: u32, dva: u64) -> Result<(), CrtaError> {
        self.transmit_now(instance, HicMessage::PdpStat0End { fcount, dva })
    }

    pub fn send_pdp_stat1_end(&self, instance: u32, fcount: u32, dva: u64) -> Result<(), CrtaError> {
        self.transmit_now(instance, HicMessage::PdpStat1End { fcount, dva })
    }

    pub fn send_cstat_frame_end(
        &self,
        instance: u32,
        fcount: u32,
        shot_dva: u64,
        edge_score: u32,
        stats: FrameEndStats,
    ) -> Result<(), CrtaError> {
        self.transmit_now(
            instance,
            HicMessage::CstatFrameEnd {
                fcount,
                shot_dva,
                edge_score,
                stats,
            },
        )
    }

    /// Stop streaming.  The sensor-control worker stops accepting batches
    /// before the frame is sent.
    pub async fn send_stop(
        &self,
        instance: u32,
        suspend: bool,
        ctx: CallContext,
    ) -> Result<(), CrtaError> {
        self.ensure_open()?;
        check_instance(instance)?;
        if let Some(queue) = self.queue(instance) {
            queue.stop();
        }
        self.transmit(instance, HicMessage::Stop { suspend }, ctx).await
    }

    pub async fn send_close(&self, instance: u32, ctx: CallContext) -> Result<(), CrtaError> {
        self.transmit(instance, HicMessage::Close, ctx).await
    }

    // ── internals ───────────────────────────────────────────────────────────

    fn ensure_open(&self) -> Result<(), CrtaError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CrtaError::NotOpen)
        }
    }

    fn queue(&self, instance: u32) -> Option<SensorControlQueue> {
        check_instance(instance).ok()?;
        self.core.binding(instance).queue.clone()
    }

    fn buffer_manager(&self, instance: u32) -> Result<Arc<dyn BufferManager>, CrtaError> {
        check_instance(instance)?;
        self.core
            .binding(instance)
            .buffers
            .clone()
            .ok_or_else(|| CrtaError::Buffer(format!("no buffer manager bound to instance {instance}")))
    }

    fn sensor(&self, instance: u32) -> Result<Arc<dyn SensorInterface>, CrtaError> {
        check_instance(instance)?;
        self.core
            .binding(instance)
            .sensor
            .clone()
            .ok_or_else(|| CrtaError::HardwareFault {
                component: format!("instance {instance}"),
                details: "no sensor bound".to_string(),
            })
    }

    /// Sensor info into `buf`, then make it visible to the coprocessor.
    fn refresh_sensor_info(&self, instance: u32, buf: &BufferInfo) -> Result<(), CrtaError> {
        let sensor = self.sensor(instance)?;
        let buffers = self.buffer_manager(instance)?;
        buf.mem.with_words_mut(|words| sensor.update_sensor_info(words))?;
        buffers.sync_for_device(buf)
    }

    /// Send with the command's delivery policy.
    async fn transmit(
        &self,
        instance: u32,
        message: HicMessage,
        ctx: CallContext,
    ) -> Result<(), CrtaError> {
        let command = message.command();
        let words = message.encode(instance)?;
        self.ensure_open()?;
        match (command.delivery(), ctx) {
            (Delivery::BlockingUnlessAtomic, CallContext::Task) => {
                self.send_blocking(instance, command, &words).await
            }
            _ => self.send_non_blocking(instance, command, &words),
        }
    }

    /// Fire-and-forget send for commands that never block.
    fn transmit_now(&self, instance: u32, message: HicMessage) -> Result<(), CrtaError> {
        let command = message.command();
        let words = message.encode(instance)?;
        self.ensure_open()?;
        self.send_non_blocking(instance, command, &words)
    }

    fn send_non_blocking(
        &self,
        instance: u32,
        command: HicCommand,
        words: &[u32],
    ) -> Result<(), CrtaError> {
        self.core.slots.mark_non_blocking(command, instance);
        self.core
            .transport
            .send(words, command.descriptor().priority)
            .inspect_err(|err| {
                warn!(instance, command = command.name(), %err, "failed to queue frame");
            })
    }

    #[instrument(level = "debug", skip(self, words))]
    async fn send_blocking(
        &self,
        instance: u32,
        command: HicCommand,
        words: &[u32],
    ) -> Result<(), CrtaError> {
        let core = &self.core;
        let window = core.config.stale_response_window();
        let (generation, mut response) = core.slots.arm(command, instance, Instant::now(), window);

        if let Err(err) = core.transport.send(words, command.descriptor().priority) {
            core.slots.disarm(command, instance, generation);
            warn!(instance, command = command.name(), %err, "failed to send frame");
            return Err(err);
        }

        let signal = match tokio::time::timeout(core.config.response_timeout(), &mut response).await
        {
            Ok(Ok(signal)) => signal,
            // Slot was reset by a concurrent open/close.
            Ok(Err(_)) => return Err(CrtaError::NotOpen),
            Err(_) => match core.slots.expire(command, instance, generation, Instant::now()) {
                Some(signal) => {
                    debug!(
                        instance,
                        command = command.name(),
                        "answered by the response taken for an earlier timed-out request"
                    );
                    signal
                }
                // Delivered between the deadline and the expiry.
                None => match response.try_recv() {
                    Ok(signal) => signal,
                    Err(_) => {
                        error!(
                            instance,
                            command = command.name(),
                            timeout_ms = core.config.response_timeout_ms,
                            "no response from coprocessor"
                        );
                        return Err(CrtaError::Timeout {
                            command: command.name(),
                            instance,
                        });
                    }
                },
            },
        };

        signal.map_err(|code| {
            warn!(instance, command = command.name(), code, "coprocessor reported failure");
            CrtaError::Remote(code)
        })
    }
}
