//! In-process simulation drivers for CI/CD testing without the coprocessor.
//!
//! * [`SimTransport`] records every frame it is asked to send and can answer
//!   them through a pluggable responder, delivering replies to the
//!   registered [`FrameReceiver`] exactly like the mailbox would.
//! * [`SimBufferManager`] hands out shared buffers at predictable addresses
//!   and counts coherency operations.
//! * [`SimCis`], [`SimFlash`], [`SimActuator`] and [`SimAperture`] record the
//!   hardware actions they receive in a shared [`SimLog`].
//! * [`SimPeri`] builds a [`SensorPeri`] out of the stub drivers.
//! * [`SimGate`] holds a gated [`SimActuator`] mid-move, to keep the
//!   sensor-control worker busy.
//!
//! # Example
//!
//! ```rust
//! use crta_hal::sim::SimPeri;
//! use crta_hal::SensorInterface;
//! use crta_types::SensorControl;
//!
//! let sim = SimPeri::new("imx754").with_actuator();
//! let log = sim.log();
//! let peri = sim.build();
//!
//! peri.apply(&SensorControl::SetActuatorPosition { position: 200 })
//!     .expect("sim actuator must succeed");
//! assert_eq!(log.entries(), vec!["sim_vcm:position 200"]);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crta_types::{
    BufferKind, BufferRef, CommandWord, CrtaError, HdrTriple, HicCommand, IhcCommand, LongShort,
    MessageType, Priority, ResponseCode, WbGain,
};

use crate::actuator::Actuator;
use crate::aperture::Aperture;
use crate::buffer::{BufferInfo, BufferManager, SharedMem};
use crate::cis::{Cis, CisParam, SENSOR_INFO_WORDS};
use crate::flash::{Flash, FlashRequest};
use crate::peri::SensorPeri;
use crate::transport::{FrameReceiver, Transport};

// ────────────────────────────────────────────────────────────────────────────
// Shared event log
// ────────────────────────────────────────────────────────────────────────────

/// Ordered record of simulated hardware actions.  Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct SimLog(Arc<Mutex<Vec<String>>>);

impl SimLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transport
// ────────────────────────────────────────────────────────────────────────────

/// Computes the frames the simulated coprocessor sends back for one frame
/// the host transmitted.
pub type Responder = Arc<dyn Fn(&[u32]) -> Vec<Vec<u32>> + Send + Sync>;

/// A frame handed to [`SimTransport::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub words: Vec<u32>,
    pub priority: Priority,
}

impl SentFrame {
    pub fn header(&self) -> CommandWord {
        CommandWord::decode(self.words.first().copied().unwrap_or_default())
    }
}

/// Turn a host command frame into the response the coprocessor would send:
/// same payload, header flipped to RESPONSE with `code`.
///
/// Returns `None` for frames that are not commands.
pub fn response_to(words: &[u32], code: ResponseCode) -> Option<Vec<u32>> {
    let header = CommandWord::decode(*words.first()?);
    if header.kind() != Some(MessageType::Command) {
        return None;
    }
    let reply = CommandWord {
        message_type: MessageType::Response.to_raw(),
        response: code.to_raw(),
        ..header
    };
    let mut out = words.to_vec();
    out[0] = reply.encode();
    Some(out)
}

#[derive(Default)]
struct TransportState {
    receiver: Option<Arc<dyn FrameReceiver>>,
    responder: Option<Responder>,
    sent: Vec<SentFrame>,
    open: bool,
    opens: usize,
    fail_open: bool,
    fail_boot: bool,
    fail_send: bool,
}

/// A loopback [`Transport`].
///
/// Replies produced by the responder are delivered synchronously from
/// inside [`send`][Transport::send], after the transport's own lock has been
/// released, so receivers may send again from `on_frame`.
#[derive(Default)]
pub struct SimTransport {
    state: Mutex<TransportState>,
    log: Option<SimLog>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `transport:send <COMMAND>` entries in `log`.
    pub fn with_log(mut self, log: SimLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_responder(self, responder: Responder) -> Self {
        self.set_responder(Some(responder));
        self
    }

    /// Answer every host command with SUCCESS.
    pub fn auto_ack(self) -> Self {
        self.with_responder(Arc::new(|words: &[u32]| {
            response_to(words, ResponseCode::Success).into_iter().collect()
        }))
    }

    pub fn set_responder(&self, responder: Option<Responder>) {
        self.lock().responder = responder;
    }

    pub fn fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    pub fn fail_boot(&self, fail: bool) {
        self.lock().fail_boot = fail;
    }

    pub fn fail_send(&self, fail: bool) {
        self.lock().fail_send = fail;
    }

    /// Deliver a frame from the simulated coprocessor.  Returns `false` when
    /// no receiver is registered.
    pub fn deliver(&self, words: &[u32]) -> bool {
        let receiver = self.lock().receiver.clone();
        match receiver {
            Some(receiver) => {
                receiver.on_frame(words);
                true
            }
            None => false,
        }
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.lock().sent.clone()
    }

    /// Header words of everything sent so far.
    pub fn sent_headers(&self) -> Vec<CommandWord> {
        self.lock().sent.iter().map(SentFrame::header).collect()
    }

    pub fn clear_sent(&self) {
        self.lock().sent.clear();
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    /// How many times the channel has been opened.
    pub fn open_count(&self) -> usize {
        self.lock().opens
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn frame_name(header: &CommandWord) -> String {
    match header.kind() {
        Some(MessageType::Command) => HicCommand::from_id(header.command)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|_| format!("#{}", header.command)),
        Some(MessageType::Response) => IhcCommand::from_id(header.command)
            .map(|c| format!("{} response", c.descriptor().name))
            .unwrap_or_else(|_| format!("#{} response", header.command)),
        None => format!("type {}", header.message_type),
    }
}

impl Transport for SimTransport {
    fn open(&self, receiver: Arc<dyn FrameReceiver>) -> Result<(), CrtaError> {
        let mut state = self.lock();
        if state.fail_open {
            return Err(CrtaError::TransportFailure(
                "simulated mailbox refused to open".to_string(),
            ));
        }
        state.receiver = Some(receiver);
        state.open = true;
        state.opens += 1;
        Ok(())
    }

    fn wait_boot(&self, timeout: Duration) -> Result<(), CrtaError> {
        if self.lock().fail_boot {
            return Err(CrtaError::BootFailure(format!(
                "no boot signal within {timeout:?}"
            )));
        }
        Ok(())
    }

    fn send(&self, words: &[u32], priority: Priority) -> Result<(), CrtaError> {
        let (responder, receiver) = {
            let mut state = self.lock();
            if !state.open {
                return Err(CrtaError::TransportFailure("channel is closed".to_string()));
            }
            if state.fail_send {
                return Err(CrtaError::TransportFailure(
                    "simulated mailbox is full".to_string(),
                ));
            }
            state.sent.push(SentFrame {
                words: words.to_vec(),
                priority,
            });
            (state.responder.clone(), state.receiver.clone())
        };

        if let Some(log) = &self.log {
            let header = CommandWord::decode(words.first().copied().unwrap_or_default());
            log.push(format!("transport:send {}", frame_name(&header)));
        }

        if let (Some(responder), Some(receiver)) = (responder, receiver) {
            for reply in responder(words) {
                receiver.on_frame(&reply);
            }
        }
        Ok(())
    }

    fn close(&self) {
        let mut state = self.lock();
        state.open = false;
        state.receiver = None;
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Buffer manager
// ────────────────────────────────────────────────────────────────────────────

const SIM_DVA_BASE: u64 = 0x1_0000_0000;
const SIM_DVA_STRIDE: u64 = 0x1_0000;

/// A [`BufferManager`] over plain heap memory.
#[derive(Default)]
pub struct SimBufferManager {
    buffers: Mutex<HashMap<BufferRef, BufferInfo>>,
    device_syncs: AtomicUsize,
    cpu_syncs: AtomicUsize,
    log: Option<SimLog>,
}

impl SimBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `bufmgr:<op> <Kind>/<index>` entries in `log`.
    pub fn with_log(mut self, log: SimLog) -> Self {
        self.log = Some(log);
        self
    }

    /// Allocate a zeroed buffer of `words` 32-bit words.  Addresses are
    /// assigned deterministically from the buffer reference.
    pub fn allocate(&self, kind: BufferKind, index: u16, words: usize) -> BufferInfo {
        let buffer = BufferRef::new(kind, index);
        let slot = u64::from(kind.to_raw()) * 0x100 + u64::from(index);
        let info = BufferInfo {
            buffer,
            dva: SIM_DVA_BASE + slot * SIM_DVA_STRIDE,
            size: (words * 4) as u32,
            mem: SharedMem::zeroed(words),
        };
        self.insert(info.clone());
        info
    }

    pub fn insert(&self, info: BufferInfo) {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(info.buffer, info);
    }

    pub fn device_syncs(&self) -> usize {
        self.device_syncs.load(Ordering::SeqCst)
    }

    pub fn cpu_syncs(&self) -> usize {
        self.cpu_syncs.load(Ordering::SeqCst)
    }

    fn record(&self, op: &str, buf: &BufferInfo) {
        if let Some(log) = &self.log {
            log.push(format!(
                "bufmgr:{op} {:?}/{}",
                buf.buffer.kind, buf.buffer.index
            ));
        }
    }
}

impl BufferManager for SimBufferManager {
    fn resolve(&self, buffer: BufferRef) -> Result<BufferInfo, CrtaError> {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&buffer)
            .cloned()
            .ok_or_else(|| {
                CrtaError::Buffer(format!(
                    "no {:?} buffer with index {}",
                    buffer.kind, buffer.index
                ))
            })
    }

    fn sync_for_device(&self, buf: &BufferInfo) -> Result<(), CrtaError> {
        self.device_syncs.fetch_add(1, Ordering::SeqCst);
        self.record("sync_for_device", buf);
        Ok(())
    }

    fn sync_for_cpu(&self, buf: &BufferInfo) -> Result<(), CrtaError> {
        self.cpu_syncs.fetch_add(1, Ordering::SeqCst);
        self.record("sync_for_cpu", buf);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub image sensor
// ────────────────────────────────────────────────────────────────────────────

/// A simulated image sensor.  Caches every setting and reports it back
/// through [`Cis::sensor_info`]:
///
/// | Word | Content |
/// |---|---|
/// | 0, 1 | exposure long / short |
/// | 2, 3 | analog gain long / short |
/// | 4, 5 | digital gain long / short |
/// | 6 | frame length lines |
/// | 7 | sensitivity |
pub struct SimCis {
    id: String,
    log: SimLog,
    exposure: HdrTriple,
    analog_gain: HdrTriple,
    digital_gain: HdrTriple,
    params: HashMap<CisParam, u32>,
}

impl SimCis {
    pub fn new(id: impl Into<String>, log: SimLog) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            log,
            exposure: HdrTriple::default(),
            analog_gain: HdrTriple::default(),
            digital_gain: HdrTriple::default(),
            params: HashMap::new(),
        })
    }

    fn record(&self, what: std::fmt::Arguments<'_>) {
        self.log.push(format!("{}:{what}", self.id));
    }
}

impl Cis for SimCis {
    fn id(&self) -> &str {
        &self.id
    }

    fn request_exposure(&mut self, exposure: HdrTriple) -> Result<(), CrtaError> {
        self.exposure = exposure;
        self.record(format_args!(
            "exposure {}/{}/{}",
            exposure.long, exposure.middle, exposure.short
        ));
        Ok(())
    }

    fn request_analog_gain(&mut self, gain: HdrTriple) -> Result<(), CrtaError> {
        self.analog_gain = gain;
        self.record(format_args!("again {}/{}/{}", gain.long, gain.middle, gain.short));
        Ok(())
    }

    fn request_digital_gain(&mut self, gain: HdrTriple) -> Result<(), CrtaError> {
        self.digital_gain = gain;
        self.record(format_args!("dgain {}/{}/{}", gain.long, gain.middle, gain.short));
        Ok(())
    }

    fn request_wb_gain(&mut self, gain: WbGain) -> Result<(), CrtaError> {
        self.record(format_args!(
            "wb {}/{}/{}/{}",
            gain.gr, gain.r, gain.b, gain.gb
        ));
        Ok(())
    }

    fn set_param(&mut self, param: CisParam, value: u32) -> Result<(), CrtaError> {
        self.params.insert(param, value);
        self.record(format_args!("{param:?}={value}"));
        Ok(())
    }

    fn set_mode_change(
        &mut self,
        exposure: u32,
        analog_gain: u32,
        digital_gain: u32,
    ) -> Result<(), CrtaError> {
        self.record(format_args!(
            "mode_change {exposure}/{analog_gain}/{digital_gain}"
        ));
        Ok(())
    }

    fn set_long_term_exposure(
        &mut self,
        mode: u32,
        exposure: u32,
        frames: u32,
    ) -> Result<(), CrtaError> {
        self.record(format_args!("long_term {mode}/{exposure}/{frames}"));
        Ok(())
    }

    fn set_sync_mode(&mut self, role: u32, mode: u32) -> Result<(), CrtaError> {
        self.record(format_args!("sync {role}/{mode}"));
        Ok(())
    }

    fn set_capture_intent(&mut self, intent: u32, frames: u32) -> Result<(), CrtaError> {
        self.record(format_args!("intent {intent}/{frames}"));
        Ok(())
    }

    fn sensor_info(&self, out: &mut [u32]) -> Result<(), CrtaError> {
        if out.len() < SENSOR_INFO_WORDS {
            return Err(CrtaError::Buffer(format!(
                "sensor info needs {SENSOR_INFO_WORDS} words, buffer has {}",
                out.len()
            )));
        }
        let param = |p| self.params.get(&p).copied().unwrap_or_default();
        out[..SENSOR_INFO_WORDS].copy_from_slice(&[
            self.exposure.long,
            self.exposure.short,
            self.analog_gain.long,
            self.analog_gain.short,
            self.digital_gain.long,
            self.digital_gain.short,
            param(CisParam::FrameLengthLines),
            param(CisParam::Sensitivity),
        ]);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub flash
// ────────────────────────────────────────────────────────────────────────────

pub struct SimFlash {
    id: String,
    log: SimLog,
    on: bool,
}

impl SimFlash {
    pub fn new(id: impl Into<String>, log: SimLog) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            log,
            on: false,
        })
    }
}

impl Flash for SimFlash {
    fn id(&self) -> &str {
        &self.id
    }

    fn fire(&mut self, request: FlashRequest) -> Result<(), CrtaError> {
        self.on = request.intensity > 0;
        self.log.push(format!(
            "{}:fire {}/{}/{}",
            self.id, request.mode, request.intensity, request.time_us
        ));
        Ok(())
    }

    fn set_expo_gain(&mut self, exposure: LongShort, gain: LongShort) -> Result<(), CrtaError> {
        self.log.push(format!(
            "{}:expo_gain {}/{} {}/{}",
            self.id, exposure.long, exposure.short, gain.long, gain.short
        ));
        Ok(())
    }

    fn off(&mut self) -> Result<(), CrtaError> {
        self.on = false;
        self.log.push(format!("{}:off", self.id));
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub actuator
// ────────────────────────────────────────────────────────────────────────────

/// A simulated focus actuator.  `move_after` skips the delay, unless the
/// actuator is [gated](SimActuator::gated).
pub struct SimActuator {
    id: String,
    log: SimLog,
    position: u32,
    gate: Option<SimGate>,
}

impl SimActuator {
    pub fn new(id: impl Into<String>, log: SimLog) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            log,
            position: 0,
            gate: None,
        })
    }

    /// An actuator whose every `move_after` is held until the returned gate
    /// is opened.  Lets tests keep the sensor-control worker busy.
    pub fn gated(id: impl Into<String>, log: SimLog) -> (Box<Self>, SimGate) {
        let gate = SimGate::default();
        let mut actuator = Self::new(id, log);
        actuator.gate = Some(gate.clone());
        (actuator, gate)
    }
}

/// Longest a gated move waits for [`SimGate::open`].
const GATE_LIMIT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct GateState {
    entered: usize,
    open: bool,
}

/// Holds gated [`SimActuator`] moves until opened.  Clones share the gate.
#[derive(Debug, Clone, Default)]
pub struct SimGate(Arc<(Mutex<GateState>, Condvar)>);

impl SimGate {
    /// Wait until `count` moves have reached the gate.  `false` on timeout.
    pub fn wait_entered(&self, count: usize, timeout: Duration) -> bool {
        let (state, changed) = &*self.0;
        let guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = changed
            .wait_timeout_while(guard, timeout, |s| s.entered < count)
            .unwrap_or_else(PoisonError::into_inner);
        guard.entered >= count
    }

    /// Release every held move, now and later.
    pub fn open(&self) {
        let (state, changed) = &*self.0;
        state.lock().unwrap_or_else(PoisonError::into_inner).open = true;
        changed.notify_all();
    }

    fn pass(&self) {
        let (state, changed) = &*self.0;
        let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entered += 1;
        changed.notify_all();
        let _released = changed
            .wait_timeout_while(guard, GATE_LIMIT, |s| !s.open)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

impl Actuator for SimActuator {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_position(&mut self, position: u32) -> Result<(), CrtaError> {
        self.position = position;
        self.log.push(format!("{}:position {position}", self.id));
        Ok(())
    }

    fn soft_landing(&mut self) -> Result<(), CrtaError> {
        self.position = 0;
        self.log.push(format!("{}:soft_landing", self.id));
        Ok(())
    }

    fn position(&self) -> u32 {
        self.position
    }

    fn move_after(&mut self, position: u32, delay_us: u32) -> Result<(), CrtaError> {
        if let Some(gate) = &self.gate {
            gate.pass();
        }
        self.log
            .push(format!("{}:move {position} after {delay_us}us", self.id));
        self.position = position;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stub aperture
// ────────────────────────────────────────────────────────────────────────────

pub struct SimAperture {
    id: String,
    log: SimLog,
    value: u32,
}

impl SimAperture {
    pub fn new(id: impl Into<String>, log: SimLog) -> Box<Self> {
        Box::new(Self {
            id: id.into(),
            log,
            value: 0,
        })
    }
}

impl Aperture for SimAperture {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_value(&mut self, f_number_x100: u32) -> Result<(), CrtaError> {
        self.value = f_number_x100;
        self.log.push(format!("{}:f {f_number_x100}", self.id));
        Ok(())
    }

    fn init(&mut self) -> Result<(), CrtaError> {
        self.value = 0;
        self.log.push(format!("{}:init", self.id));
        Ok(())
    }

    fn value(&self) -> u32 {
        self.value
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimPeri builder
// ────────────────────────────────────────────────────────────────────────────

/// Builder for a [`SensorPeri`] made of stub drivers sharing one [`SimLog`].
///
/// The optional drivers are named `sim_flash`, `sim_vcm` and
/// `sim_aperture`.
pub struct SimPeri {
    log: SimLog,
    peri: SensorPeri,
}

impl SimPeri {
    pub fn new(cis_id: impl Into<String>) -> Self {
        let log = SimLog::default();
        let peri = SensorPeri::new(SimCis::new(cis_id, log.clone()));
        Self { log, peri }
    }

    /// A module with every optional peripheral attached.
    pub fn full(cis_id: impl Into<String>) -> Self {
        Self::new(cis_id).with_flash().with_actuator().with_aperture()
    }

    pub fn with_flash(mut self) -> Self {
        self.peri = self.peri.with_flash(SimFlash::new("sim_flash", self.log.clone()));
        self
    }

    pub fn with_actuator(mut self) -> Self {
        self.peri = self
            .peri
            .with_actuator(SimActuator::new("sim_vcm", self.log.clone()));
        self
    }

    pub fn with_aperture(mut self) -> Self {
        self.peri = self
            .peri
            .with_aperture(SimAperture::new("sim_aperture", self.log.clone()));
        self
    }

    pub fn log(&self) -> SimLog {
        self.log.clone()
    }

    pub fn build(self) -> SensorPeri {
        self.peri
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peri::SensorInterface;
    use crta_types::SensorControl;

    struct Collect(Mutex<Vec<Vec<u32>>>);

    impl FrameReceiver for Collect {
        fn on_frame(&self, words: &[u32]) {
            self.0.lock().unwrap().push(words.to_vec());
        }
    }

    fn command(instance: u32, cmd: HicCommand, payload: &[u32]) -> Vec<u32> {
        let header = CommandWord::new(instance, MessageType::Command, cmd.id(), ResponseCode::Success)
            .unwrap();
        let mut words = vec![header.encode()];
        words.extend_from_slice(payload);
        words
    }

    #[test]
    fn auto_ack_answers_commands() {
        let transport = SimTransport::new().auto_ack();
        let rx = Arc::new(Collect(Mutex::new(Vec::new())));
        transport.open(rx.clone()).unwrap();

        transport
            .send(&command(2, HicCommand::Shot, &[7, 0, 0, 0, 0]), Priority::High)
            .unwrap();

        let replies = rx.0.lock().unwrap().clone();
        assert_eq!(replies.len(), 1);
        let header = CommandWord::decode(replies[0][0]);
        assert_eq!(header.kind(), Some(MessageType::Response));
        assert_eq!(header.instance, 2);
        assert_eq!(header.command, HicCommand::Shot.id());
        assert_eq!(replies[0][1], 7);
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn responses_are_not_answered() {
        let frame = command(0, HicCommand::Stop, &[0]);
        let response = response_to(&frame, ResponseCode::Fail).unwrap();
        assert!(response_to(&response, ResponseCode::Success).is_none());
        assert_eq!(CommandWord::decode(response[0]).result(), Err(-1));
    }

    #[test]
    fn send_fails_when_closed_or_full() {
        let transport = SimTransport::new();
        let frame = command(0, HicCommand::Close, &[]);
        assert!(matches!(
            transport.send(&frame, Priority::Normal),
            Err(CrtaError::TransportFailure(_))
        ));

        transport
            .open(Arc::new(Collect(Mutex::new(Vec::new()))))
            .unwrap();
        transport.fail_send(true);
        assert!(transport.send(&frame, Priority::Normal).is_err());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn open_and_boot_failures() {
        let transport = SimTransport::new();
        transport.fail_open(true);
        assert!(transport
            .open(Arc::new(Collect(Mutex::new(Vec::new()))))
            .is_err());
        assert!(!transport.is_open());

        transport.fail_boot(true);
        assert!(matches!(
            transport.wait_boot(Duration::from_millis(10)),
            Err(CrtaError::BootFailure(_))
        ));
    }

    #[test]
    fn buffer_manager_resolves_allocations() {
        let log = SimLog::default();
        let bufs = SimBufferManager::new().with_log(log.clone());
        let info = bufs.allocate(BufferKind::SensorControl, 3, 16);

        let resolved = bufs.resolve(info.buffer).unwrap();
        assert_eq!(resolved.dva, info.dva);
        assert_eq!(resolved.size, 64);
        assert_eq!(resolved.dva % 16, 0);

        bufs.sync_for_cpu(&resolved).unwrap();
        assert_eq!(bufs.cpu_syncs(), 1);
        assert_eq!(log.entries(), vec!["bufmgr:sync_for_cpu SensorControl/3"]);

        let missing = bufs.resolve(BufferRef::new(BufferKind::Rta, 9));
        assert!(matches!(missing, Err(CrtaError::Buffer(_))));
    }

    #[test]
    fn sensor_info_rejects_short_buffers() {
        let cis = SimCis::new("imx", SimLog::default());
        let mut out = [0u32; 2];
        assert!(matches!(cis.sensor_info(&mut out), Err(CrtaError::Buffer(_))));
    }

    #[test]
    fn full_sim_peri_handles_every_peripheral() {
        let sim = SimPeri::full("imx");
        let log = sim.log();
        let peri = sim.build();

        peri.apply(&SensorControl::RequestFlash {
            mode: 1,
            intensity: 5,
            time_us: 100,
        })
        .unwrap();
        peri.apply(&SensorControl::RequestActuatorMove {
            position: 40,
            delay_us: 500,
        })
        .unwrap();
        peri.apply(&SensorControl::SetApertureValue { f_number_x100: 180 })
            .unwrap();

        assert_eq!(
            log.entries(),
            vec![
                "sim_flash:fire 1/5/100",
                "sim_vcm:move 40 after 500us",
                "sim_aperture:f 180"
            ]
        );
    }
}
