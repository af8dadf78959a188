//! Whole-pipeline scenarios over the simulated codec engine: transmit
//! jobs become chunked audio, looped-back audio becomes delivered frames.

use std::time::Duration;

use skywave_core::mode::frame_type;
use skywave_core::{
    ChannelId, DummyRig, Modem, ModemConfig, ModemEvent, ModeKind, TransmitJob,
};
use skywave_core::sim::SimCodec;

fn fast_config() -> ModemConfig {
    ModemConfig {
        enable_fft: false,
        worker_poll: Duration::from_millis(1),
        rig_poll_interval: Duration::from_millis(50),
        rig_poll_stagger: Duration::from_millis(1),
        ..Default::default()
    }
}

fn start_modem(cfg: ModemConfig) -> Modem {
    let _ = env_logger::builder().is_test(true).try_init();
    Modem::start(cfg, SimCodec::open, Box::<DummyRig>::default()).expect("modem start")
}

/// Drive the audio pump in a loopback: transmitted chunks are fed back in
/// as received audio, silence keeps the clock ticking otherwise.
fn pump_loopback(modem: &Modem, iterations: usize, mut until: impl FnMut() -> bool) {
    let input = modem.audio_input();
    let output = modem.audio_output();
    for _ in 0..iterations {
        if until() {
            return;
        }
        input
            .send(vec![0i16; skywave_core::AUDIO_FRAMES_PER_BUFFER_RX])
            .expect("audio input open");
        if let Ok(chunk) = output.recv_timeout(Duration::from_millis(100)) {
            input.send(chunk).expect("audio input open");
        }
        // pace the feed so the decode workers keep up with the rings
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_transmit_round_trips_to_received_frame() {
    let modem = start_modem(fast_config());
    let received = modem.received_frames();
    let events = modem.events();

    modem
        .enqueue_transmit(TransmitJob {
            mode: ModeKind::Datac13,
            repeats: 1,
            repeat_delay_ms: 0,
            frames: vec![vec![0x01, b'H', b'I']],
        })
        .unwrap();

    pump_loopback(&modem, 500, || !received.is_empty());

    let frame = received
        .recv_timeout(Duration::from_secs(2))
        .expect("frame should round-trip through the loopback");
    let spec = modem.mode_spec(ModeKind::Datac13);
    assert_eq!(frame.channel, ChannelId::Sig0);
    assert_eq!(frame.mode, ModeKind::Datac13);
    assert_eq!(frame.bytes_per_frame, spec.bytes_per_frame);
    assert_eq!(frame.data.len(), spec.bytes_per_frame);
    assert_eq!(&frame.data[..3], &[0x01, b'H', b'I']);
    assert!(frame.snr > 0.0);

    // keep pumping until the transmit job reports completion
    let mut complete = 0;
    let mut keyed_on = false;
    let mut keyed_off = false;
    pump_loopback(&modem, 500, || complete > 0 && keyed_off);
    while let Ok(event) = events.recv_timeout(Duration::from_secs(2)) {
        match event {
            ModemEvent::TransmitComplete { mode, result } => {
                assert_eq!(mode, ModeKind::Datac13);
                let report = result.expect("transmit should succeed");
                assert!(report.sample_count > 0);
                complete += 1;
            }
            ModemEvent::PttChanged(true) => keyed_on = true,
            ModemEvent::PttChanged(false) => keyed_off = true,
        }
        if complete > 0 && keyed_off {
            break;
        }
    }
    // exactly one completion per job, bracketed by the PTT transitions
    assert_eq!(complete, 1);
    assert!(keyed_on);
    assert!(keyed_off);
    assert!(!modem.context().ptt_state());
    assert!(!modem.context().transmitting());

    modem.shutdown();
}

#[test]
fn test_mesh_tagged_frames_take_the_mesh_queue() {
    let modem = start_modem(fast_config());
    let received = modem.received_frames();
    let mesh = modem.mesh_frames();

    modem
        .enqueue_transmit(TransmitJob {
            mode: ModeKind::Datac13,
            repeats: 1,
            repeat_delay_ms: 0,
            frames: vec![vec![frame_type::MESH_BROADCAST, 0xAA]],
        })
        .unwrap();

    pump_loopback(&modem, 500, || !mesh.is_empty());

    let frame = mesh
        .recv_timeout(Duration::from_secs(2))
        .expect("mesh frame should arrive on the mesh queue");
    assert_eq!(frame[0], frame_type::MESH_BROADCAST);
    assert_eq!(frame[1], 0xAA);
    // nothing leaked onto the primary queue
    assert!(received.is_empty());

    modem.shutdown();
}

#[test]
fn test_opener_deduped_on_sig1_but_not_sig0() {
    let mut cfg = fast_config();
    cfg.receive.sig1 = true;
    let modem = start_modem(cfg);
    let received = modem.received_frames();

    modem
        .enqueue_transmit(TransmitJob {
            mode: ModeKind::Datac13,
            repeats: 1,
            repeat_delay_ms: 0,
            frames: vec![vec![frame_type::ARQ_SESSION_OPEN, 0x42]],
        })
        .unwrap();

    pump_loopback(&modem, 500, || !received.is_empty());

    let frame = received
        .recv_timeout(Duration::from_secs(2))
        .expect("sig0 should deliver the opener");
    assert_eq!(frame.channel, ChannelId::Sig0);

    // sig1 decoded the same burst but suppressed the opener; give it a
    // moment and confirm nothing else shows up
    pump_loopback(&modem, 50, || false);
    assert!(received.is_empty());

    modem.shutdown();
}

#[test]
fn test_repeats_deliver_multiple_copies() {
    let modem = start_modem(fast_config());
    let received = modem.received_frames();

    modem
        .enqueue_transmit(TransmitJob {
            mode: ModeKind::Datac13,
            repeats: 2,
            repeat_delay_ms: 10,
            frames: vec![vec![0x05, b'X']],
        })
        .unwrap();

    let mut copies = 0;
    pump_loopback(&modem, 800, || {
        while received.try_recv().is_ok() {
            copies += 1;
        }
        copies >= 2
    });
    assert_eq!(copies, 2, "both repeats should decode");

    modem.shutdown();
}

#[test]
fn test_no_overflow_in_steady_state_listening() {
    let modem = start_modem(fast_config());

    // a few seconds of idle air
    pump_loopback(&modem, 50, || false);

    for (id, count) in modem.overflow_counts() {
        assert_eq!(count, 0, "channel {id} overflowed in steady state");
    }

    modem.shutdown();
}
