//! A complete simulated streaming session.
//!
//! [`run_sim_session`] drives one instance through the whole protocol
//! against the simulation drivers of `crta-hal`:
//!
//! 1. open the instance, bind a simulated sensor module and buffer manager;
//! 2. OPEN, PUT_BUF (sensor info) and START;
//! 3. per frame: SET_SHARED_BUF_IDX, CSTAT_FRAME_START, SHOT,
//!    CSTAT_FRAME_END.  The scripted coprocessor answers each SHOT and
//!    then requests a sensor-control batch for that frame;
//! 4. wait for every batch to be answered, then STOP, CLOSE and close.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crta_adapter::{AdapterConfig, CallContext, MessageAdapter};
use crta_hal::sim::{Responder, SimBufferManager, SimPeri, SimTransport, response_to};
use crta_hal::BufferInfo;
use crta_sensor_ctrl::encode_batch;
use crta_types::wire::split_dva;
use crta_types::{
    BufferKind, BufferRef, CommandWord, CrtaError, FrameEndStats, HdrTriple, HicCommand,
    IhcCommand, MessageType, OpenParams, ResponseCode, SensorControl,
};
use tracing::{info, warn};

const PCSI_WORDS: usize = 16;
const FRAME_BUF_WORDS: usize = 64;
const BATCH_POLL: Duration = Duration::from_millis(1);

/// Parameters of a simulated session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub instance: u32,
    pub frames: u32,
    pub cis_id: String,
}

impl Default for SessionSpec {
    fn default() -> Self {
        Self {
            instance: 0,
            frames: 8,
            cis_id: "sim_cis".to_string(),
        }
    }
}

/// What happened during [`run_sim_session`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub frames_sent: u32,
    pub shot_responses: u32,
    pub batches_succeeded: usize,
    pub batches_failed: usize,
    /// Hardware actions recorded by the simulated sensor module.
    pub sensor_log: Vec<String>,
}

/// Sensor-control batch the scripted coprocessor asks for at `fcount`.
pub fn frame_batch(fcount: u32) -> Vec<SensorControl> {
    vec![
        SensorControl::RequestExposure(HdrTriple {
            long: 10_000 + fcount * 100,
            middle: 5_000,
            short: 1_000,
        }),
        SensorControl::RequestSensitivity { iso: 100 + fcount },
        SensorControl::SetActuatorPosition {
            position: 200 + fcount,
        },
    ]
}

/// Answers every host command with SUCCESS.  A SHOT is additionally
/// followed by a CONTROL_SENSOR request for the buffer of that frame.
fn scripted_coprocessor(instance: u32, batches: Arc<HashMap<u32, (BufferRef, u64)>>) -> Responder {
    Arc::new(move |words: &[u32]| {
        let mut replies: Vec<Vec<u32>> = response_to(words, ResponseCode::Success)
            .into_iter()
            .collect();
        let header = CommandWord::decode(words.first().copied().unwrap_or_default());
        let is_shot = header.kind() == Some(MessageType::Command)
            && header.command == HicCommand::Shot.id();
        if is_shot
            && let Some(&(buffer, dva)) = words.get(1).and_then(|fcount| batches.get(fcount))
            && let Ok(request) = CommandWord::new(
                instance,
                MessageType::Command,
                IhcCommand::ControlSensor.id(),
                ResponseCode::Success,
            )
        {
            let (high, low) = split_dva(dva);
            replies.push(vec![request.encode(), buffer.encode(), high, low]);
        }
        replies
    })
}

fn control_sensor_answers(transport: &SimTransport) -> (usize, usize) {
    transport
        .sent_headers()
        .into_iter()
        .filter(|h| {
            h.kind() == Some(MessageType::Response) && h.command == IhcCommand::ControlSensor.id()
        })
        .fold((0, 0), |(ok, failed), h| {
            if h.response == ResponseCode::Success.to_raw() {
                (ok + 1, failed)
            } else {
                (ok, failed + 1)
            }
        })
}

/// Run one simulated session.
///
/// # Errors
///
/// Any adapter error, or [`CrtaError::Timeout`] if the sensor-control
/// worker did not answer every batch within the configured response
/// timeout per frame.
pub async fn run_sim_session(
    config: AdapterConfig,
    spec: &SessionSpec,
) -> Result<SessionReport, CrtaError> {
    let instance = spec.instance;
    let buffers = Arc::new(SimBufferManager::new());
    let sim = SimPeri::full(spec.cis_id.clone());
    let sensor_log = sim.log();

    let mut batches = HashMap::new();
    for fcount in 1..=spec.frames {
        let words = encode_batch(&frame_batch(fcount));
        let index = u16::try_from(fcount).map_err(|_| CrtaError::OutOfRange {
            what: "frame count",
            value: fcount,
        })?;
        let info = buffers.allocate(BufferKind::SensorControl, index, words.len());
        info.mem.write(0, &words)?;
        batches.insert(fcount, (info.buffer, info.dva));
    }

    let transport = Arc::new(
        SimTransport::new().with_responder(scripted_coprocessor(instance, Arc::new(batches))),
    );
    let timeout = config.response_timeout();
    let adapter = MessageAdapter::builder()
        .transport(transport.clone())
        .config(config)
        .build()?;

    adapter.open(instance)?;
    adapter.bind_buffer_manager(instance, buffers.clone())?;
    adapter.bind_sensor(instance, Arc::new(sim.build()))?;

    let shots = Arc::new(AtomicU32::new(0));
    let counter = shots.clone();
    adapter.register_response_callback(instance, HicCommand::Shot, move |msg| {
        if msg.result.is_ok() {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    })?;

    let result = stream(&adapter, &transport, &buffers, spec, timeout).await;
    if let Err(err) = &result {
        warn!(instance, %err, "session aborted");
    }
    adapter.close(instance)?;

    let (batches_succeeded, batches_failed) = result?;
    let report = SessionReport {
        frames_sent: spec.frames,
        shot_responses: shots.load(Ordering::Relaxed),
        batches_succeeded,
        batches_failed,
        sensor_log: sensor_log.entries(),
    };
    info!(
        instance,
        frames = report.frames_sent,
        shots = report.shot_responses,
        batches_ok = report.batches_succeeded,
        batches_failed = report.batches_failed,
        "session finished"
    );
    Ok(report)
}

async fn stream(
    adapter: &MessageAdapter,
    transport: &SimTransport,
    buffers: &SimBufferManager,
    spec: &SessionSpec,
    timeout: Duration,
) -> Result<(usize, usize), CrtaError> {
    let instance = spec.instance;
    let ctx = CallContext::Task;

    adapter
        .send_open(
            instance,
            OpenParams {
                hw_id: instance,
                ..OpenParams::default()
            },
            ctx,
        )
        .await?;

    let pcsi = buffers.allocate(BufferKind::Rta, 0, PCSI_WORDS);
    let meta = buffers.allocate(BufferKind::Rta, 1, FRAME_BUF_WORDS);
    let pcfi = buffers.allocate(BufferKind::Rta, 2, FRAME_BUF_WORDS);
    adapter.send_put_buf(instance, &pcsi, ctx).await?;
    adapter.send_start(instance, &pcsi, ctx).await?;
    info!(instance, frames = spec.frames, "streaming");

    for fcount in 1..=spec.frames {
        send_frame(adapter, instance, fcount, &pcsi, &meta, &pcfi)?;
    }

    let expected = spec.frames as usize;
    let deadline = timeout * spec.frames.max(1);
    let answers = tokio::time::timeout(deadline, async {
        loop {
            let (ok, failed) = control_sensor_answers(transport);
            if ok + failed >= expected {
                return (ok, failed);
            }
            tokio::time::sleep(BATCH_POLL).await;
        }
    })
    .await
    .map_err(|_| CrtaError::Timeout {
        command: IhcCommand::ControlSensor.descriptor().name,
        instance,
    })?;

    adapter.send_stop(instance, false, ctx).await?;
    adapter.send_close(instance, ctx).await?;
    Ok(answers)
}

fn send_frame(
    adapter: &MessageAdapter,
    instance: u32,
    fcount: u32,
    pcsi: &BufferInfo,
    meta: &BufferInfo,
    pcfi: &BufferInfo,
) -> Result<(), CrtaError> {
    adapter.send_set_shared_buf_idx(instance, BufferKind::SensorControl, fcount)?;
    adapter.send_cstat_frame_start(instance, fcount, pcsi)?;
    adapter.send_shot(instance, fcount, meta, pcfi)?;
    adapter.send_cstat_frame_end(instance, fcount, meta.dva, 0, FrameEndStats::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_frame_gets_a_sensor_batch() {
        let spec = SessionSpec {
            frames: 4,
            ..SessionSpec::default()
        };
        let report = run_sim_session(AdapterConfig::default(), &spec)
            .await
            .unwrap();

        assert_eq!(report.frames_sent, 4);
        assert_eq!(report.shot_responses, 4);
        assert_eq!(report.batches_succeeded, 4);
        assert_eq!(report.batches_failed, 0);
        assert!(
            report
                .sensor_log
                .contains(&"sim_cis:exposure 10400/5000/1000".to_string())
        );
        assert!(report.sensor_log.contains(&"sim_vcm:position 204".to_string()));
    }

    #[tokio::test]
    async fn zero_frames_still_opens_and_closes() {
        let spec = SessionSpec {
            frames: 0,
            ..SessionSpec::default()
        };
        let report = run_sim_session(AdapterConfig::default(), &spec)
            .await
            .unwrap();
        assert_eq!(report.batches_succeeded, 0);
        assert_eq!(report.shot_responses, 0);
    }

    #[tokio::test]
    async fn out_of_range_instance_is_rejected() {
        let spec = SessionSpec {
            instance: 10,
            frames: 1,
            ..SessionSpec::default()
        };
        assert!(matches!(
            run_sim_session(AdapterConfig::default(), &spec).await,
            Err(CrtaError::OutOfRange { .. })
        ));
    }

    #[test]
    fn scripted_coprocessor_requests_a_batch_after_shot() {
        let buffer = BufferRef::new(BufferKind::SensorControl, 3);
        let mut batches = HashMap::new();
        batches.insert(3, (buffer, 0x1_2345_0000));
        let responder = scripted_coprocessor(1, Arc::new(batches));

        let shot = CommandWord::new(1, MessageType::Command, HicCommand::Shot.id(), ResponseCode::Success)
            .unwrap();
        let replies = responder(&[shot.encode(), 3, 0, 0, 0, 0]);
        assert_eq!(replies.len(), 2);
        let request = CommandWord::decode(replies[1][0]);
        assert_eq!(request.kind(), Some(MessageType::Command));
        assert_eq!(request.command, IhcCommand::ControlSensor.id());
        assert_eq!(replies[1][1..], [buffer.encode(), 0x1, 0x2345_0000]);

        // No batch scripted for this frame.
        assert_eq!(responder(&[shot.encode(), 9, 0, 0, 0, 0]).len(), 1);
    }
}
