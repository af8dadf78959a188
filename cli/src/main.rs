use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::select;
use log::{info, warn};
use skywave_core::sim::SimCodec;
use skywave_core::{
    DummyRig, Modem, ModemConfig, ModemEvent, ModeKind, TransmitJob,
};

mod audio;

#[derive(Parser)]
#[command(name = "skywave")]
#[command(about = "Soundcard HF modem/TNC")]
struct Cli {
    /// Transmit audio level in percent (0-200)
    #[arg(long, default_value_t = 100)]
    tx_audio_level: i32,

    /// Pre-key silence in milliseconds, covering PTT-to-RF-up latency
    #[arg(long, default_value_t = 0)]
    tx_delay_ms: u64,

    /// Adjust the transmit level from the rig's ALC readings
    #[arg(long)]
    auto_tune: bool,

    /// Extra receive channels to enable (sig1, datac1, datac3, datac4, fsk)
    #[arg(long, value_delimiter = ',')]
    receive: Vec<String>,

    /// Run a self-contained loopback demo instead of opening a soundcard
    #[arg(long)]
    loopback: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut cfg = ModemConfig {
        tx_audio_level: cli.tx_audio_level,
        tx_delay_ms: cli.tx_delay_ms,
        audio_auto_tune: cli.auto_tune,
        ..Default::default()
    };
    for name in &cli.receive {
        match name.as_str() {
            "sig1" => cfg.receive.sig1 = true,
            "datac1" => cfg.receive.datac1 = true,
            "datac3" => cfg.receive.datac3 = true,
            "datac4" => cfg.receive.datac4 = true,
            "fsk" => cfg.receive.fsk = true,
            other => warn!("unknown receive channel ignored: {other}"),
        }
    }

    // the native codec backend links in as another CodecEngine; until
    // then the simulated engine carries the pipeline
    let modem = Modem::start(cfg, SimCodec::open, Box::<DummyRig>::default())?;

    if cli.loopback {
        run_loopback(&modem)
    } else {
        run_soundcard(&modem)
    }
}

/// Normal operation: default soundcard in/out, frames logged as they
/// arrive.
fn run_soundcard(modem: &Modem) -> Result<()> {
    let _streams = audio::start(
        modem,
        skywave_core::AUDIO_SAMPLE_RATE as u32,
        skywave_core::AUDIO_FRAMES_PER_BUFFER_RX as u32,
    )?;

    let received = modem.received_frames();
    let mesh = modem.mesh_frames();
    let events = modem.events();

    info!("listening; ctrl-c to exit");
    loop {
        select! {
            recv(received) -> frame => match frame {
                Ok(frame) => info!(
                    "received frame: channel={} nbytes={} snr={}",
                    frame.channel, frame.data.len(), frame.snr
                ),
                Err(_) => break,
            },
            recv(mesh) -> frame => match frame {
                Ok(frame) => info!("mesh frame: nbytes={}", frame.len()),
                Err(_) => break,
            },
            recv(events) -> event => match event {
                Ok(ModemEvent::PttChanged(state)) => info!("ptt: {state}"),
                Ok(ModemEvent::TransmitComplete { mode, result }) => match result {
                    Ok(report) => info!(
                        "transmit complete: mode={mode} on_air={:?}",
                        report.on_air
                    ),
                    Err(err) => warn!("transmit failed: mode={mode} error={err}"),
                },
                Err(_) => break,
            },
        }
    }
    Ok(())
}

/// Self-test without hardware: transmit one frame and feed the modulated
/// audio straight back into the receive path.
fn run_loopback(modem: &Modem) -> Result<()> {
    let received = modem.received_frames();
    let input = modem.audio_input();
    let output = modem.audio_output();

    modem.enqueue_transmit(TransmitJob {
        mode: ModeKind::Datac13,
        repeats: 1,
        repeat_delay_ms: 0,
        frames: vec![vec![0x01, b'L', b'O', b'O', b'P']],
    })?;

    for _ in 0..500 {
        if !received.is_empty() {
            break;
        }
        input.send(vec![0i16; skywave_core::AUDIO_FRAMES_PER_BUFFER_RX])?;
        if let Ok(chunk) = output.recv_timeout(Duration::from_millis(100)) {
            input.send(chunk)?;
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    let frame = received
        .recv_timeout(Duration::from_secs(2))
        .map_err(|_| anyhow::anyhow!("loopback frame never arrived"))?;
    info!(
        "loopback ok: channel={} payload={:?} snr={}",
        frame.channel,
        &frame.data[..5],
        frame.snr
    );
    modem.shutdown();
    Ok(())
}
