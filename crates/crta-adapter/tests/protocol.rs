use std::sync::{Arc, Mutex};
use std::time::Duration;

use crta_adapter::{AdapterConfig, CallContext, MessageAdapter};
use crta_hal::sim::{
    SentFrame, SimActuator, SimBufferManager, SimCis, SimGate, SimLog, SimPeri, SimTransport,
    response_to,
};
use crta_hal::{BufferInfo, SensorInterface, SensorPeri};
use crta_sensor_ctrl::{WorkerState, encode_batch};
use crta_types::wire::split_dva;
use crta_types::{
    BufferKind, CommandWord, CrtaError, HicCommand, IhcCommand, MessageType, OpenParams,
    ResponseCode, ResponseMessage, SensorControl,
};
use futures_util::FutureExt;

struct Rig {
    adapter: MessageAdapter,
    transport: Arc<SimTransport>,
    buffers: Arc<SimBufferManager>,
}

fn rig(transport: SimTransport) -> Rig {
    rig_with(transport, AdapterConfig::default())
}

fn rig_with(transport: SimTransport, config: AdapterConfig) -> Rig {
    let transport = Arc::new(transport);
    let buffers = Arc::new(SimBufferManager::new());
    let adapter = MessageAdapter::builder()
        .transport(transport.clone())
        .config(config)
        .build()
        .unwrap();
    adapter.open(0).unwrap();
    adapter.bind_buffer_manager(0, buffers.clone()).unwrap();
    Rig {
        adapter,
        transport,
        buffers,
    }
}

fn response(instance: u32, command: HicCommand, code: ResponseCode, payload: &[u32]) -> Vec<u32> {
    let header = CommandWord {
        instance,
        message_type: MessageType::Response.to_raw(),
        command: command.id(),
        response: code.to_raw(),
    };
    let mut words = vec![header.encode()];
    words.extend_from_slice(payload);
    words
}

fn control_sensor(instance: u32, info: &BufferInfo) -> Vec<u32> {
    let header = CommandWord::new(
        instance,
        MessageType::Command,
        IhcCommand::ControlSensor.id(),
        ResponseCode::Success,
    )
    .unwrap();
    let (high, low) = split_dva(info.dva);
    vec![header.encode(), info.buffer.encode(), high, low]
}

async fn wait_for_sent(transport: &SimTransport, count: usize) {
    while transport.sent().len() < count {
        tokio::task::yield_now().await;
    }
}

/// Module with an image sensor and an actuator whose moves wait for the
/// returned gate.
fn gated_module(log: &SimLog) -> (SensorPeri, SimGate) {
    let (vcm, gate) = SimActuator::gated("vcm", log.clone());
    let peri = SensorPeri::new(SimCis::new("imx", log.clone())).with_actuator(vcm);
    (peri, gate)
}

fn answers(transport: &SimTransport) -> Vec<SentFrame> {
    transport
        .sent()
        .into_iter()
        .filter(|frame| frame.header().kind() == Some(MessageType::Response))
        .collect()
}

async fn wait_for_answers(transport: &SimTransport, count: usize) -> Vec<SentFrame> {
    for _ in 0..500 {
        let sent = answers(transport);
        if sent.len() >= count {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} CONTROL_SENSOR answers");
}

async fn wait_for_answer(transport: &SimTransport) -> CommandWord {
    for _ in 0..500 {
        let answer = transport
            .sent_headers()
            .into_iter()
            .find(|h| h.kind() == Some(MessageType::Response));
        if let Some(answer) = answer {
            return answer;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no CONTROL_SENSOR answer");
}

// ────────────────────────────────────────────────────────────────────────────
// Responses and callbacks
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn shot_response_reaches_callback_with_fcount() {
    let rig = rig(SimTransport::new().auto_ack());
    let seen: Arc<Mutex<Vec<ResponseMessage>>> = Arc::default();
    let sink = seen.clone();
    rig.adapter
        .register_response_callback(0, HicCommand::Shot, move |msg| {
            sink.lock().unwrap().push(msg.clone());
            Ok(())
        })
        .unwrap();

    let meta = rig.buffers.allocate(BufferKind::Rta, 1, 64);
    let pcfi = rig.buffers.allocate(BufferKind::Rta, 2, 64);
    rig.adapter.send_shot(0, 5, &meta, &pcfi).unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].result, Ok(()));
    assert_eq!(seen[0].instance, 0);
    assert_eq!(seen[0].fcount, Some(5));
    assert_eq!(rig.buffers.device_syncs(), 2);
}

#[tokio::test]
async fn shot_frame_layout() {
    let rig = rig(SimTransport::new());
    let meta = rig.buffers.allocate(BufferKind::Rta, 1, 64);
    let pcfi = rig.buffers.allocate(BufferKind::Static, 2, 64);
    rig.adapter.send_shot(0, 9, &meta, &pcfi).unwrap();

    let sent = rig.transport.sent();
    assert_eq!(sent.len(), 1);
    let (meta_h, meta_l) = split_dva(meta.dva);
    let (pcfi_h, pcfi_l) = split_dva(pcfi.dva);
    assert_eq!(&sent[0].words[1..], &[9, meta_h, meta_l, pcfi_h, pcfi_l]);
    assert_eq!(sent[0].priority, HicCommand::Shot.descriptor().priority);
}

#[tokio::test(start_paused = true)]
async fn misrouted_responses_neither_call_back_nor_signal() {
    let rig = rig(SimTransport::new());
    let calls = Arc::new(Mutex::new(0));
    let counter = calls.clone();
    rig.adapter
        .register_response_callback(0, HicCommand::Open, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        })
        .unwrap();

    let adapter = rig.adapter.clone();
    let pending = tokio::spawn(async move {
        adapter
            .send_open(0, OpenParams::default(), CallContext::Task)
            .await
    });
    wait_for_sent(&rig.transport, 1).await;

    // Instance 12 does not exist; command 30 is not a host command.
    rig.transport
        .deliver(&response(12, HicCommand::Open, ResponseCode::Success, &[]));
    let unknown = CommandWord {
        instance: 0,
        message_type: MessageType::Response.to_raw(),
        command: 30,
        response: 0,
    };
    rig.transport.deliver(&[unknown.encode()]);

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(CrtaError::Timeout { .. })));
    assert_eq!(*calls.lock().unwrap(), 0);
}

// ────────────────────────────────────────────────────────────────────────────
// Blocking and non-blocking sends
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn blocking_send_times_out_at_the_deadline() {
    let rig = rig(SimTransport::new());
    let started = tokio::time::Instant::now();

    let result = rig
        .adapter
        .send_open(0, OpenParams::default(), CallContext::Task)
        .await;

    let elapsed = started.elapsed();
    assert_eq!(
        result,
        Err(CrtaError::Timeout {
            command: "OPEN",
            instance: 0
        })
    );
    assert!(elapsed >= Duration::from_millis(250), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(251), "{elapsed:?}");
    assert_eq!(result.unwrap_err().errno(), -110);
}

#[tokio::test]
async fn blocking_send_returns_remote_failure() {
    let transport = SimTransport::new().with_responder(Arc::new(|words: &[u32]| {
        response_to(words, ResponseCode::Fail).into_iter().collect()
    }));
    let rig = rig(transport);
    let result = rig
        .adapter
        .send_open(0, OpenParams::default(), CallContext::Task)
        .await;
    assert_eq!(result, Err(CrtaError::Remote(-1)));
}

#[tokio::test]
async fn transmit_failure_is_reported_immediately() {
    let rig = rig(SimTransport::new());
    rig.transport.fail_send(true);
    let result = rig.adapter.send_close(0, CallContext::Task).await;
    assert!(matches!(result, Err(CrtaError::TransportFailure(_))));
}

#[tokio::test(start_paused = true)]
async fn stale_response_does_not_satisfy_a_newer_wait() {
    let rig = rig(SimTransport::new());

    let first = rig
        .adapter
        .send_open(0, OpenParams::default(), CallContext::Task)
        .await;
    assert!(matches!(first, Err(CrtaError::Timeout { .. })));

    let adapter = rig.adapter.clone();
    let second = tokio::spawn(async move {
        adapter
            .send_open(0, OpenParams::default(), CallContext::Task)
            .await
    });
    wait_for_sent(&rig.transport, 2).await;

    // Late answer to the first request.
    rig.transport
        .deliver(&response(0, HicCommand::Open, ResponseCode::Fail, &[0; 4]));
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!second.is_finished());

    rig.transport
        .deliver(&response(0, HicCommand::Open, ResponseCode::Success, &[0; 4]));
    assert_eq!(second.await.unwrap(), Ok(()));
}

#[tokio::test(start_paused = true)]
async fn lost_response_does_not_poison_the_next_request() {
    let rig = rig(SimTransport::new());

    let first = rig
        .adapter
        .send_open(0, OpenParams::default(), CallContext::Task)
        .await;
    assert!(matches!(first, Err(CrtaError::Timeout { .. })));

    // The coprocessor comes back and answers everything from now on.
    rig.transport.set_responder(Some(Arc::new(|words: &[u32]| {
        response_to(words, ResponseCode::Success).into_iter().collect()
    })));

    // Its only answer is taken for the timed-out request, then handed over
    // at the deadline.
    let started = tokio::time::Instant::now();
    let second = rig
        .adapter
        .send_open(0, OpenParams::default(), CallContext::Task)
        .await;
    assert_eq!(second, Ok(()));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(250), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(251), "{elapsed:?}");

    // Nothing is left outstanding: the next request is answered at once.
    let started = tokio::time::Instant::now();
    let third = rig
        .adapter
        .send_open(0, OpenParams::default(), CallContext::Task)
        .await;
    assert_eq!(third, Ok(()));
    assert!(started.elapsed() < Duration::from_millis(1));
}

#[tokio::test]
async fn frame_start_does_not_wait_for_the_sensor_worker() {
    let rig = rig(SimTransport::new().auto_ack());
    let log = SimLog::default();
    let (peri, gate) = gated_module(&log);
    peri.apply(&SensorControl::RequestFrameLengthLine { lines: 1800 })
        .unwrap();
    rig.adapter.bind_sensor(0, Arc::new(peri)).unwrap();

    let pcsi = rig.buffers.allocate(BufferKind::Rta, 0, 16);
    rig.adapter
        .send_start(0, &pcsi, CallContext::Task)
        .await
        .unwrap();

    let batch = rig.buffers.allocate(BufferKind::SensorControl, 1, 64);
    batch
        .mem
        .write(
            0,
            &encode_batch(&[SensorControl::RequestActuatorMove {
                position: 90,
                delay_us: 50_000,
            }]),
        )
        .unwrap();
    rig.transport.deliver(&control_sensor(0, &batch));
    assert!(gate.wait_entered(1, Duration::from_secs(5)));

    // The worker is parked inside the actuator move.
    let started = std::time::Instant::now();
    rig.adapter.send_cstat_frame_start(0, 1, &pcsi).unwrap();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(pcsi.mem.snapshot()[6], 1800);

    gate.open();
    let answer = wait_for_answer(&rig.transport).await;
    assert_eq!(answer.response, ResponseCode::Success.to_raw());
    assert!(log.entries().contains(&"vcm:move 90 after 50000us".to_string()));
}

#[test]
fn non_blocking_sends_do_not_wait() {
    // No responder: anything that waited for a response would never finish.
    let rig = rig(SimTransport::new());
    rig.adapter
        .bind_sensor(0, Arc::new(SimPeri::new("imx").build()))
        .unwrap();
    let pcsi = rig.buffers.allocate(BufferKind::Rta, 0, 16);

    rig.adapter
        .send_set_shared_buf_idx(0, BufferKind::Static, 3)
        .unwrap();
    rig.adapter.send_cstat_frame_start(0, 3, &pcsi).unwrap();
    rig.adapter.send_pdp_stat1_end(0, 3, 0x2000).unwrap();

    let start = rig
        .adapter
        .send_start(0, &pcsi, CallContext::Atomic)
        .now_or_never();
    assert_eq!(start, Some(Ok(())));
    assert_eq!(rig.transport.sent().len(), 4);
}

#[tokio::test]
async fn start_refreshes_sensor_info_before_sending() {
    let sim = SimPeri::new("imx");
    let log = sim.log();
    let transport = Arc::new(SimTransport::new().auto_ack().with_log(log.clone()));
    let buffers = Arc::new(SimBufferManager::new().with_log(log.clone()));
    let peri = Arc::new(sim.build());
    peri.apply(&SensorControl::RequestFrameLengthLine { lines: 2200 })
        .unwrap();

    let adapter = MessageAdapter::builder()
        .transport(transport.clone())
        .build()
        .unwrap();
    adapter.open(0).unwrap();
    adapter.bind_buffer_manager(0, buffers.clone()).unwrap();
    adapter.bind_sensor(0, peri).unwrap();
    let pcsi = buffers.allocate(BufferKind::Rta, 0, 16);
    log.clear();

    adapter.send_start(0, &pcsi, CallContext::Task).await.unwrap();

    assert_eq!(
        log.entries(),
        vec!["bufmgr:sync_for_device Rta/0", "transport:send START"]
    );
    assert_eq!(pcsi.mem.snapshot()[6], 2200);
    assert_eq!(adapter.worker_state(0), Some(WorkerState::Started));
}

#[tokio::test]
async fn frame_end_carries_compressed_stat_addresses() {
    let rig = rig(SimTransport::new());
    let stats = crta_types::FrameEndStats {
        pre_thumb: 0x1_0000_0010,
        ae_thumb: 0x20,
        awb_thumb: 0x30,
        rgby_hist: 0x40,
        cdaf_mw: 0x50,
    };
    rig.adapter
        .send_cstat_frame_end(0, 11, 0x9000, 77, stats)
        .unwrap();
    let words = &rig.transport.sent()[0].words;
    assert_eq!(words.len(), 10);
    assert_eq!(&words[4..], &[77, 0x1000_0001, 0x2, 0x3, 0x4, 0x5]);
    // Stat buffers are written by the coprocessor; no coherency step.
    assert_eq!(rig.buffers.device_syncs(), 0);
}

#[tokio::test]
async fn cdaf_end_syncs_the_laser_af_buffer() {
    let rig = rig(SimTransport::new());
    let laser_af = rig.buffers.allocate(BufferKind::Rta, 5, 16);
    rig.adapter
        .send_cstat_cdaf_end(0, 12, 0x1_0000_1000, 0x2000, &laser_af)
        .unwrap();

    assert_eq!(rig.buffers.device_syncs(), 1);
    let sent = rig.transport.sent();
    assert_eq!(sent.len(), 1);
    let (laser_h, laser_l) = split_dva(laser_af.dva);
    assert_eq!(
        &sent[0].words[1..],
        &[12, 0x1, 0x1000, 0x0, 0x2000, laser_h, laser_l]
    );
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor control
// ────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn control_sensor_batch_runs_and_is_answered() {
    let rig = rig(SimTransport::new().auto_ack());
    let sim = SimPeri::full("imx");
    let log = sim.log();
    rig.adapter.bind_sensor(0, Arc::new(sim.build())).unwrap();

    let pcsi = rig.buffers.allocate(BufferKind::Rta, 0, 16);
    rig.adapter
        .send_start(0, &pcsi, CallContext::Task)
        .await
        .unwrap();
    rig.transport.clear_sent();
    log.clear();

    let batch = rig.buffers.allocate(BufferKind::SensorControl, 1, 64);
    batch
        .mem
        .write(
            0,
            &encode_batch(&[
                SensorControl::RequestSensitivity { iso: 400 },
                SensorControl::SetApertureValue { f_number_x100: 240 },
            ]),
        )
        .unwrap();
    rig.transport.deliver(&control_sensor(0, &batch));

    let answer = wait_for_answer(&rig.transport).await;
    assert_eq!(answer.command, IhcCommand::ControlSensor.id());
    assert_eq!(answer.response, ResponseCode::Success.to_raw());
    assert_eq!(
        log.entries(),
        vec!["imx:Sensitivity=400", "sim_aperture:f 240"]
    );
    assert_eq!(rig.buffers.cpu_syncs(), 1);

    let sent = rig.transport.sent();
    let (high, low) = split_dva(batch.dva);
    assert_eq!(&sent[0].words[1..], &[batch.buffer.encode(), high, low]);
}

#[tokio::test]
async fn batches_after_stop_are_answered_with_fail() {
    let rig = rig(SimTransport::new().auto_ack());
    let sim = SimPeri::new("imx");
    let log = sim.log();
    rig.adapter.bind_sensor(0, Arc::new(sim.build())).unwrap();

    let pcsi = rig.buffers.allocate(BufferKind::Rta, 0, 16);
    rig.adapter
        .send_start(0, &pcsi, CallContext::Task)
        .await
        .unwrap();
    rig.adapter
        .send_stop(0, false, CallContext::Task)
        .await
        .unwrap();
    assert_eq!(rig.adapter.worker_state(0), Some(WorkerState::Stopped));
    rig.transport.clear_sent();
    log.clear();

    let batch = rig.buffers.allocate(BufferKind::SensorControl, 0, 16);
    batch
        .mem
        .write(0, &encode_batch(&[SensorControl::SetAdjustSync { value: 1 }]))
        .unwrap();
    rig.transport.deliver(&control_sensor(0, &batch));

    let answer = wait_for_answer(&rig.transport).await;
    assert_eq!(answer.response, ResponseCode::Fail.to_raw());
    assert!(log.entries().is_empty());
}

#[tokio::test]
async fn close_releases_the_sensor_binding() {
    let rig = rig(SimTransport::new().auto_ack());
    let sensor: Arc<dyn SensorInterface> = Arc::new(SimPeri::new("imx").build());
    rig.adapter.bind_sensor(0, sensor).unwrap();
    rig.adapter.close(0).unwrap();
    rig.adapter.open(0).unwrap();

    let pcsi = rig.buffers.allocate(BufferKind::Rta, 0, 16);
    let result = rig.adapter.send_start(0, &pcsi, CallContext::Task).await;
    assert!(matches!(result, Err(CrtaError::HardwareFault { .. })));
    assert_eq!(rig.transport.open_count(), 2);
}

#[tokio::test]
async fn full_sensor_queue_is_answered_fail_at_once() {
    let config = AdapterConfig {
        sensor_ctrl_queue_depth: 2,
        ..AdapterConfig::default()
    };
    let rig = rig_with(SimTransport::new().auto_ack(), config);
    let log = SimLog::default();
    let (peri, gate) = gated_module(&log);
    rig.adapter.bind_sensor(0, Arc::new(peri)).unwrap();

    let pcsi = rig.buffers.allocate(BufferKind::Rta, 0, 16);
    rig.adapter
        .send_start(0, &pcsi, CallContext::Task)
        .await
        .unwrap();
    rig.transport.clear_sent();

    let batches: Vec<BufferInfo> = (1u16..=4)
        .map(|index| {
            let batch = rig.buffers.allocate(BufferKind::SensorControl, index, 64);
            batch
                .mem
                .write(
                    0,
                    &encode_batch(&[SensorControl::RequestActuatorMove {
                        position: u32::from(index) * 10,
                        delay_us: 0,
                    }]),
                )
                .unwrap();
            batch
        })
        .collect();

    // The worker takes the first batch and is held in the move; two more
    // fill the queue.
    rig.transport.deliver(&control_sensor(0, &batches[0]));
    assert!(gate.wait_entered(1, Duration::from_secs(5)));
    rig.transport.deliver(&control_sensor(0, &batches[1]));
    rig.transport.deliver(&control_sensor(0, &batches[2]));
    assert!(answers(&rig.transport).is_empty());

    rig.transport.deliver(&control_sensor(0, &batches[3]));
    let refused = answers(&rig.transport);
    assert_eq!(refused.len(), 1);
    let header = refused[0].header();
    assert_eq!(header.command, IhcCommand::ControlSensor.id());
    assert_eq!(header.response, ResponseCode::Fail.to_raw());
    let (high, low) = split_dva(batches[3].dva);
    assert_eq!(&refused[0].words[1..], &[batches[3].buffer.encode(), high, low]);

    gate.open();
    let sent = wait_for_answers(&rig.transport, 4).await;
    assert_eq!(sent.len(), 4);
    for (frame, batch) in sent[1..].iter().zip(&batches[..3]) {
        assert_eq!(frame.header().response, ResponseCode::Success.to_raw());
        assert_eq!(frame.words[1], batch.buffer.encode());
    }
    assert_eq!(
        log.entries(),
        vec![
            "vcm:move 10 after 0us",
            "vcm:move 20 after 0us",
            "vcm:move 30 after 0us"
        ]
    );
}
