//! Orchestrator: opens every codec engine, wires the queues, and spawns
//! the worker threads.
//!
//! Workers are detached and stop cooperatively: the decode loops and the
//! audio pump watch the stream-active flag, the periodic workers watch
//! the stop flag, and the queue-driven workers exit when their queue
//! closes. Shutdown is best-effort; nothing waits for a clean drain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info, warn};

use crate::activity::{ChannelActivityMonitor, SpectrumTap};
use crate::audio::AudioPump;
use crate::channel::{ChannelShared, CodecChannel, DecodedFrame, FrameSinks};
use crate::context::SharedContext;
use crate::dispatch::ReceiveDispatcher;
use crate::engine::CodecEngine;
use crate::error::{ModemError, Result};
use crate::keying::{RigControl, RigKeyingController};
use crate::mode::{ChannelId, ModeKind, ModeSpec};
use crate::resample::Resampler;
use crate::transmit::{
    ModulatedSampleQueue, TransmitConfig, TransmitEngine, TransmitJob, TransmitReport,
};
use crate::{AUDIO_FRAMES_PER_BUFFER_RX, AUDIO_FRAMES_PER_BUFFER_TX, AUDIO_SAMPLE_RATE, MODEM_SAMPLE_RATE, RX_RING_CAPACITY};

/// Per-channel receive enables. Unused modes stay off to bound CPU.
#[derive(Debug, Clone)]
pub struct ReceiveToggles {
    pub sig0: bool,
    pub sig1: bool,
    pub datac1: bool,
    pub datac3: bool,
    pub datac4: bool,
    pub fsk: bool,
}

impl Default for ReceiveToggles {
    fn default() -> Self {
        Self {
            sig0: true,
            sig1: false,
            datac1: false,
            datac3: false,
            datac4: false,
            fsk: false,
        }
    }
}

impl ReceiveToggles {
    fn enabled(&self, id: ChannelId) -> bool {
        match id {
            ChannelId::Sig0 => self.sig0,
            ChannelId::Sig1 => self.sig1,
            ChannelId::Dat0Datac1 => self.datac1,
            ChannelId::Dat0Datac3 => self.datac3,
            ChannelId::Dat0Datac4 => self.datac4,
            ChannelId::FskLdpc0 | ChannelId::FskLdpc1 => self.fsk,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModemConfig {
    pub device_sample_rate: usize,
    pub modem_sample_rate: usize,
    /// Device-rate samples per input buffer period.
    pub rx_chunk_length: usize,
    /// Device-rate samples per output chunk.
    pub tx_chunk_length: usize,
    /// Per-channel ring capacity in modem-rate samples.
    pub rx_ring_capacity: usize,
    pub tx_delay_ms: u64,
    pub tx_audio_level: i32,
    pub audio_auto_tune: bool,
    pub enable_fft: bool,
    /// Backend consumes modem-rate audio on its own clock (no device-rate
    /// resample, transmit waits on computed duration).
    pub duration_clocked: bool,
    pub tuning_range: (f32, f32),
    pub receive: ReceiveToggles,
    pub worker_poll: Duration,
    pub fft_interval: Duration,
    pub rig_poll_interval: Duration,
    pub rig_poll_stagger: Duration,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            device_sample_rate: AUDIO_SAMPLE_RATE,
            modem_sample_rate: MODEM_SAMPLE_RATE,
            rx_chunk_length: AUDIO_FRAMES_PER_BUFFER_RX,
            tx_chunk_length: AUDIO_FRAMES_PER_BUFFER_TX,
            rx_ring_capacity: RX_RING_CAPACITY,
            tx_delay_ms: 0,
            tx_audio_level: 100,
            audio_auto_tune: false,
            enable_fft: true,
            duration_clocked: false,
            tuning_range: (-50.0, 50.0),
            receive: ReceiveToggles::default(),
            worker_poll: Duration::from_millis(10),
            fft_interval: Duration::from_millis(10),
            rig_poll_interval: Duration::from_millis(250),
            rig_poll_stagger: Duration::from_millis(100),
        }
    }
}

/// Notifications published to the application.
#[derive(Debug, Clone)]
pub enum ModemEvent {
    PttChanged(bool),
    /// Exactly one per consumed transmit job, success or failure.
    TransmitComplete {
        mode: ModeKind,
        result: std::result::Result<TransmitReport, String>,
    },
}

/// Requests for the rig command worker.
#[derive(Debug, Clone)]
pub enum RigCommand {
    SetFrequency(String),
    SetMode(String),
}

pub struct Modem {
    ctx: Arc<SharedContext>,
    specs: HashMap<ModeKind, ModeSpec>,
    channels: Vec<Arc<ChannelShared>>,
    queue: Arc<ModulatedSampleQueue>,
    keyer: Arc<RigKeyingController>,
    stream_active: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    tx_jobs: Sender<TransmitJob>,
    rig_cmds: Sender<RigCommand>,
    audio_in: Sender<Vec<i16>>,
    audio_out: Receiver<Vec<i16>>,
    received: Receiver<DecodedFrame>,
    mesh: Receiver<Vec<u8>>,
    events: Receiver<ModemEvent>,
}

impl Modem {
    /// Open all per-mode engines and bring the worker set up. `open_engine`
    /// is the codec factory; `rig` is whatever controls the radio.
    pub fn start<F>(cfg: ModemConfig, open_engine: F, rig: Box<dyn RigControl>) -> Result<Self>
    where
        F: Fn(ModeKind) -> Box<dyn CodecEngine>,
    {
        let ctx = Arc::new(SharedContext::new(cfg.tx_audio_level));
        let tap = Arc::new(SpectrumTap::new());
        let queue = Arc::new(ModulatedSampleQueue::new());
        let stream_active = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));

        let (events_tx, events_rx) = unbounded();
        let keyer = Arc::new(RigKeyingController::new(rig, ctx.clone(), events_tx.clone()));

        let (received_tx, received_rx) = unbounded();
        let (mesh_tx, mesh_rx) = unbounded();

        // one engine + ring + decode worker per receive channel
        let mut channels = Vec::with_capacity(ChannelId::ALL.len());
        for id in ChannelId::ALL {
            let mut engine = open_engine(id.mode());
            engine.set_tuning_range(cfg.tuning_range.0, cfg.tuning_range.1);
            engine.set_frames_per_burst(1);

            let shared = Arc::new(ChannelShared::new(
                id,
                cfg.rx_ring_capacity,
                cfg.receive.enabled(id),
            ));
            channels.push(shared.clone());

            let worker = CodecChannel::new(id, engine, shared);
            let sinks = FrameSinks {
                received: received_tx.clone(),
                mesh: mesh_tx.clone(),
            };
            let worker_ctx = ctx.clone();
            let worker_active = stream_active.clone();
            let poll = cfg.worker_poll;
            spawn_worker(format!("rx-{id}"), move || {
                worker.run(worker_ctx, sinks, worker_active, poll)
            })?;
        }

        // transmit side: every mode keeps its own encode engine
        let mut tx_engines: HashMap<ModeKind, Box<dyn CodecEngine>> = HashMap::new();
        let mut specs: HashMap<ModeKind, ModeSpec> = HashMap::new();
        for mode in ModeKind::ALL {
            let engine = open_engine(mode);
            specs.insert(mode, ModeSpec::from_engine(engine.as_ref()));
            tx_engines.insert(mode, engine);
        }
        let data_channels: Vec<_> = ChannelId::BURST_DATA_CHANNELS
            .iter()
            .map(|id| channels[id.index()].clone())
            .collect();
        let mut tx_engine = TransmitEngine::new(
            tx_engines,
            data_channels,
            Resampler::new(cfg.device_sample_rate, cfg.modem_sample_rate),
            queue.clone(),
            keyer.clone(),
            ctx.clone(),
            TransmitConfig {
                chunk_length: cfg.tx_chunk_length,
                tx_delay_ms: cfg.tx_delay_ms,
                auto_tune: cfg.audio_auto_tune,
                duration_clocked: cfg.duration_clocked,
                drain_poll: cfg.worker_poll,
            },
        );
        let (tx_jobs_tx, tx_jobs_rx) = unbounded::<TransmitJob>();
        {
            let events = events_tx.clone();
            spawn_worker("tx-worker".into(), move || loop {
                let Ok(job) = tx_jobs_rx.recv() else {
                    break;
                };
                debug!("transmit queue: qsize={}", tx_jobs_rx.len() + 1);
                let mode = job.mode;
                let result = tx_engine.transmit(&job).map_err(|e| e.to_string());
                let _ = events.send(ModemEvent::TransmitComplete { mode, result });
            })?;
        }

        // audio pump; a duration-clocked backend already delivers
        // modem-rate audio, so its receive resampler is the identity
        let (audio_in_tx, audio_in_rx) = unbounded::<Vec<i16>>();
        let (audio_out_tx, audio_out_rx) = unbounded::<Vec<i16>>();
        let rx_input_rate = if cfg.duration_clocked {
            cfg.modem_sample_rate
        } else {
            cfg.device_sample_rate
        };
        let dispatcher = ReceiveDispatcher::new(
            channels.clone(),
            Resampler::new(rx_input_rate, cfg.modem_sample_rate),
        );
        let pump = AudioPump::new(
            dispatcher,
            queue.clone(),
            tap.clone(),
            keyer.clone(),
            ctx.clone(),
            !cfg.duration_clocked,
        );
        {
            let active = stream_active.clone();
            let chunk_length = cfg.tx_chunk_length;
            spawn_worker("audio-pump".into(), move || {
                pump.run(audio_in_rx, audio_out_tx, active, chunk_length)
            })?;
        }

        if cfg.enable_fft {
            let monitor = ChannelActivityMonitor::new(ctx.clone(), tap);
            let monitor_stop = stop.clone();
            let interval = cfg.fft_interval;
            spawn_worker("fft".into(), move || monitor.run(monitor_stop, interval))?;
        }

        {
            let poll_keyer = keyer.clone();
            let poll_ctx = ctx.clone();
            let poll_stop = stop.clone();
            let interval = cfg.rig_poll_interval;
            let stagger = cfg.rig_poll_stagger;
            spawn_worker("rig-poll".into(), move || {
                poll_rig(poll_keyer, poll_ctx, poll_stop, interval, stagger)
            })?;
        }

        let (rig_cmds_tx, rig_cmds_rx) = unbounded::<RigCommand>();
        {
            let cmd_keyer = keyer.clone();
            spawn_worker("rig-cmd".into(), move || loop {
                let Ok(cmd) = rig_cmds_rx.recv() else {
                    break;
                };
                let result = match &cmd {
                    RigCommand::SetFrequency(freq) => {
                        cmd_keyer.with_rig(|rig| rig.set_frequency(freq))
                    }
                    RigCommand::SetMode(mode) => cmd_keyer.with_rig(|rig| rig.set_mode(mode)),
                };
                if let Err(err) = result {
                    warn!("rig command failed: cmd={cmd:?} error={err}");
                }
            })?;
        }

        info!(
            "modem started: device_rate={} modem_rate={} duration_clocked={}",
            cfg.device_sample_rate, cfg.modem_sample_rate, cfg.duration_clocked
        );

        Ok(Self {
            ctx,
            specs,
            channels,
            queue,
            keyer,
            stream_active,
            stop,
            tx_jobs: tx_jobs_tx,
            rig_cmds: rig_cmds_tx,
            audio_in: audio_in_tx,
            audio_out: audio_out_rx,
            received: received_rx,
            mesh: mesh_rx,
            events: events_rx,
        })
    }

    pub fn context(&self) -> Arc<SharedContext> {
        self.ctx.clone()
    }

    /// Size descriptor captured when the mode's engine was opened.
    pub fn mode_spec(&self, mode: ModeKind) -> ModeSpec {
        self.specs[&mode]
    }

    /// Queue a transmission. Jobs run strictly one at a time, FIFO.
    pub fn enqueue_transmit(&self, job: TransmitJob) -> Result<()> {
        self.tx_jobs.send(job).map_err(|_| ModemError::QueueClosed)
    }

    pub fn send_rig_command(&self, cmd: RigCommand) -> Result<()> {
        self.rig_cmds.send(cmd).map_err(|_| ModemError::QueueClosed)
    }

    /// Producer endpoint for device-rate input chunks.
    pub fn audio_input(&self) -> Sender<Vec<i16>> {
        self.audio_in.clone()
    }

    /// Consumer endpoint for output chunks.
    pub fn audio_output(&self) -> Receiver<Vec<i16>> {
        self.audio_out.clone()
    }

    pub fn received_frames(&self) -> Receiver<DecodedFrame> {
        self.received.clone()
    }

    pub fn mesh_frames(&self) -> Receiver<Vec<u8>> {
        self.mesh.clone()
    }

    pub fn events(&self) -> Receiver<ModemEvent> {
        self.events.clone()
    }

    pub fn channel(&self, id: ChannelId) -> &Arc<ChannelShared> {
        &self.channels[id.index()]
    }

    pub fn set_receive_enabled(&self, id: ChannelId, on: bool) {
        self.channel(id).set_enabled(on);
    }

    pub fn set_listen(&self, on: bool) {
        self.ctx.set_listen(on);
    }

    pub fn overflow_counts(&self) -> Vec<(ChannelId, u64)> {
        self.channels
            .iter()
            .map(|ch| (ch.id(), ch.overflow_count()))
            .collect()
    }

    /// Link-health query for the data-link layer: true when any enabled
    /// data channel accumulated a sustained decode-error streak. Querying
    /// clears the consulted histories.
    pub fn fatal_error_state(&self) -> bool {
        for id in ChannelId::DATA_CHANNELS {
            let ch = self.channel(id);
            if ch.enabled() && ch.take_fatal_error() {
                return true;
            }
        }
        false
    }

    /// Frames-per-burst control surface. The effective value is pinned to
    /// one frame per burst regardless of the request.
    pub fn set_frames_per_burst(&self, requested: u32) {
        debug!("frames per burst requested: n={requested}, applying 1");
        for id in ChannelId::BURST_DATA_CHANNELS {
            self.channel(id).request_frames_per_burst(1);
        }
    }

    pub fn keyer(&self) -> Arc<RigKeyingController> {
        self.keyer.clone()
    }

    pub fn mod_out_queue(&self) -> Arc<ModulatedSampleQueue> {
        self.queue.clone()
    }

    pub fn is_running(&self) -> bool {
        self.stream_active.load(Ordering::Relaxed)
    }

    /// Best-effort stop: flips the worker flags; detached workers wind
    /// down on their next poll.
    pub fn shutdown(&self) {
        info!("modem shutting down");
        self.stop.store(true, Ordering::Relaxed);
        self.stream_active.store(false, Ordering::Relaxed);
    }
}

fn spawn_worker<F>(name: String, f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name)
        .spawn(f)
        .map(|_| ())
        .map_err(|e| ModemError::WorkerSpawn(e.to_string()))
}

/// Periodic rig telemetry: frequency, mode, bandwidth, status, strength,
/// and ALC while transmitting. Calls are staggered so the control
/// connection is not hammered; each call takes the rig lock briefly so
/// keying never waits long.
fn poll_rig(
    keyer: Arc<RigKeyingController>,
    ctx: Arc<SharedContext>,
    stop: Arc<AtomicBool>,
    interval: Duration,
    stagger: Duration,
) {
    while !stop.load(Ordering::Relaxed) {
        thread::sleep(interval);

        let poll = || -> Result<()> {
            let frequency = keyer.with_rig(|rig| rig.get_frequency())?;
            thread::sleep(stagger);
            let mode = keyer.with_rig(|rig| rig.get_mode())?;
            thread::sleep(stagger);
            let bandwidth = keyer.with_rig(|rig| rig.get_bandwidth())?;
            thread::sleep(stagger);
            let status = keyer.with_rig(|rig| rig.get_status());
            thread::sleep(stagger);
            let alc = if ctx.transmitting() {
                let alc = keyer.with_rig(|rig| rig.get_alc())?;
                thread::sleep(stagger);
                Some(alc)
            } else {
                None
            };
            let strength = keyer.with_rig(|rig| rig.get_strength())?;

            ctx.update_rig(|rig| {
                rig.frequency = frequency;
                rig.mode = mode;
                rig.bandwidth = bandwidth;
                rig.status = status;
                rig.strength = strength;
                if let Some(alc) = alc {
                    rig.alc = alc;
                }
            });
            Ok(())
        };

        if let Err(err) = poll() {
            warn!("error polling rig data: error={err}");
            thread::sleep(Duration::from_secs(1));
        }
    }
}
