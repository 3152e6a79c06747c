//! Frames arriving from the coprocessor.
//!
//! Everything here runs in the transport's notification context and only
//! decodes, looks up tables, signals waiters and enqueues work:
//!
//! * RESPONSE frames go to the registered callback and then to the wait
//!   slot of `(command, instance)`.
//! * CONTROL_SENSOR commands are checked against the instance's buffer
//!   manager and queued for the sensor-control worker.  Any intake failure
//!   is answered with FAIL right away so the coprocessor can reuse the
//!   buffer.

use std::sync::{Arc, Weak};

use crta_hal::{FrameReceiver, SensorInterface};
use crta_sensor_ctrl::{BatchContext, BatchOutcome};
use crta_types::wire::check_instance;
use crta_types::{
    BufferRef, CommandWord, ControlSensorRequest, CrtaError, HicCommand, IhcCommand,
    MessageType, ResponseCode, ResponseMessage,
};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::adapter::Core;
use crate::slots::SignalOutcome;

/// The adapter's [`FrameReceiver`].  Holds the adapter weakly so the
/// transport never keeps it alive.
pub(crate) struct FrameSink {
    core: Weak<Core>,
}

impl FrameSink {
    pub(crate) fn new(core: Weak<Core>) -> Self {
        Self { core }
    }
}

impl FrameReceiver for FrameSink {
    fn on_frame(&self, words: &[u32]) {
        if let Some(core) = self.core.upgrade() {
            core.on_frame(words);
        }
    }
}

impl Core {
    fn on_frame(&self, words: &[u32]) {
        let Some(&first) = words.first() else {
            warn!("empty frame from coprocessor");
            return;
        };
        let header = CommandWord::decode(first);
        match header.kind() {
            Some(MessageType::Response) => self.dispatch_response(header, words),
            Some(MessageType::Command) => self.dispatch_request(header, words),
            None => warn!(
                message_type = header.message_type,
                "frame with unknown message type dropped"
            ),
        }
    }

    fn dispatch_response(&self, header: CommandWord, words: &[u32]) {
        let instance = header.instance;
        if check_instance(instance).is_err() {
            warn!(instance, "response for out-of-range instance dropped");
            return;
        }
        let Ok(command) = HicCommand::from_id(header.command) else {
            warn!(instance, command = header.command, "response for unknown command dropped");
            return;
        };
        let result = header.result();

        if let Some(callback) = self.callback(instance, command) {
            let message = ResponseMessage {
                instance,
                command,
                result,
                fcount: words.get(1).copied().filter(|_| command.carries_fcount()),
            };
            if let Err(err) = callback(&message) {
                warn!(instance, command = command.name(), %err, "response callback failed");
            }
        }

        let outcome = self.slots.signal(
            command,
            instance,
            result,
            Instant::now(),
            self.config.stale_response_window(),
        );
        match outcome {
            SignalOutcome::Stale { generation } => debug!(
                instance,
                command = command.name(),
                generation,
                "late response to a timed-out request"
            ),
            SignalOutcome::NoWaiter => debug!(
                instance,
                command = command.name(),
                "response with no request outstanding"
            ),
            SignalOutcome::Delivered { .. } | SignalOutcome::NotBlocking => {
                trace!(instance, command = command.name(), ?outcome, "response routed");
            }
        }
    }

    fn dispatch_request(&self, header: CommandWord, words: &[u32]) {
        if IhcCommand::from_id(header.command).is_err() {
            warn!(command = header.command, "unknown coprocessor request dropped");
            return;
        }
        if check_instance(header.instance).is_err() {
            warn!(instance = header.instance, "request for out-of-range instance dropped");
            return;
        }
        let request = match ControlSensorRequest::decode(words) {
            Ok(request) => request,
            Err(err) => {
                warn!(instance = header.instance, %err, "malformed CONTROL_SENSOR dropped");
                return;
            }
        };
        if let Err(err) = self.accept_control_sensor(&request) {
            warn!(
                instance = request.instance,
                index = request.buffer.index,
                errno = err.errno(),
                %err,
                "CONTROL_SENSOR refused"
            );
            self.respond_control_sensor(
                request.instance,
                request.buffer,
                request.dva,
                ResponseCode::Fail,
            );
        }
    }

    fn accept_control_sensor(&self, request: &ControlSensorRequest) -> Result<(), CrtaError> {
        let (buffers, queue) = {
            let binding = self.binding(request.instance);
            (binding.buffers.clone(), binding.queue.clone())
        };
        let queue = queue.ok_or(CrtaError::NotOpen)?;
        let buffers = buffers.ok_or_else(|| {
            CrtaError::Buffer(format!(
                "no buffer manager bound to instance {}",
                request.instance
            ))
        })?;

        let info = buffers.resolve(request.buffer)?;
        if info.dva != request.dva {
            return Err(CrtaError::AddressMismatch {
                expected: info.dva,
                found: request.dva,
            });
        }
        buffers.sync_for_cpu(&info)?;
        queue.submit(info)
    }

    /// Fire-and-forget CONTROL_SENSOR answer.
    pub(crate) fn respond_control_sensor(
        &self,
        instance: u32,
        buffer: BufferRef,
        dva: u64,
        code: ResponseCode,
    ) {
        let request = ControlSensorRequest {
            instance,
            buffer,
            dva,
        };
        let sent = request.encode_response(code).and_then(|words| {
            self.transport
                .send(&words, IhcCommand::ControlSensor.descriptor().priority)
        });
        if let Err(err) = sent {
            warn!(instance, index = buffer.index, %err, "failed to answer CONTROL_SENSOR");
        }
    }
}

/// Connects an instance's sensor-control worker back to the adapter.
pub(crate) struct WorkerLink {
    core: Weak<Core>,
    instance: u32,
}

impl WorkerLink {
    pub(crate) fn new(core: Weak<Core>, instance: u32) -> Self {
        Self { core, instance }
    }
}

impl BatchContext for WorkerLink {
    fn sensor(&self) -> Option<Arc<dyn SensorInterface>> {
        self.core.upgrade()?.binding(self.instance).sensor.clone()
    }

    fn complete(&self, outcome: BatchOutcome) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        let code = match &outcome.result {
            Ok(()) => ResponseCode::Success,
            Err(err) => {
                warn!(
                    instance = outcome.instance,
                    index = outcome.buffer.index,
                    errno = err.errno(),
                    %err,
                    "sensor-control batch failed"
                );
                ResponseCode::Fail
            }
        };
        core.respond_control_sensor(outcome.instance, outcome.buffer, outcome.dva, code);
    }
}
