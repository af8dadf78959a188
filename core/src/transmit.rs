//! Transmit path: job model, the modulated-output queue, and the engine
//! that turns a job into keyed, level-corrected, chunked audio.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use parking_lot::Mutex;

use crate::channel::ChannelShared;
use crate::context::SharedContext;
use crate::engine::CodecEngine;
use crate::error::{ModemError, Result};
use crate::keying::RigKeyingController;
use crate::mode::ModeKind;
use crate::resample::Resampler;

/// One transmission request, consumed exactly once.
#[derive(Debug, Clone)]
pub struct TransmitJob {
    pub mode: ModeKind,
    pub repeats: usize,
    /// Silence appended after each repeat, in milliseconds.
    pub repeat_delay_ms: u64,
    /// Payload frames; each is truncated/padded to the mode's payload
    /// size before the CRC goes on.
    pub frames: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct TransmitReport {
    pub mode: ModeKind,
    pub on_air: Duration,
    /// Modulated samples handed to the output stage, before chunk padding.
    pub sample_count: usize,
    pub chunk_count: usize,
}

/// FIFO of fixed-size output chunks with a lock flag gating consumption.
/// The flag is set before a job's first chunk goes in and cleared only
/// after its last, so the audio callback can never start playing a
/// half-enqueued transmission. Starts locked.
pub struct ModulatedSampleQueue {
    chunks: Mutex<VecDeque<Vec<i16>>>,
    locked: AtomicBool,
}

impl ModulatedSampleQueue {
    pub fn new() -> Self {
        Self {
            chunks: Mutex::new(VecDeque::new()),
            locked: AtomicBool::new(true),
        }
    }

    pub fn lock(&self) {
        self.locked.store(true, Ordering::Release);
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    pub fn push_chunk(&self, chunk: Vec<i16>) {
        self.chunks.lock().push_back(chunk);
    }

    /// Next chunk for playback; `None` while locked or drained.
    pub fn pop_chunk(&self) -> Option<Vec<i16>> {
        if self.is_locked() {
            return None;
        }
        self.chunks.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }
}

impl Default for ModulatedSampleQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct TransmitConfig {
    /// Output chunk size in device-rate samples.
    pub chunk_length: usize,
    /// Silence pad before the first frame, covering PTT-to-RF latency.
    pub tx_delay_ms: u64,
    /// Adjust the level from the rig's ALC reading before each job.
    pub auto_tune: bool,
    /// Backend consumes modem-rate audio on its own clock (no resample,
    /// drain wait computed from playback duration).
    pub duration_clocked: bool,
    pub drain_poll: Duration,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            chunk_length: crate::AUDIO_FRAMES_PER_BUFFER_TX,
            tx_delay_ms: 0,
            auto_tune: false,
            duration_clocked: false,
            drain_poll: Duration::from_millis(10),
        }
    }
}

pub struct TransmitEngine {
    engines: HashMap<ModeKind, Box<dyn CodecEngine>>,
    data_channels: Vec<Arc<ChannelShared>>,
    resampler: Resampler,
    queue: Arc<ModulatedSampleQueue>,
    keyer: Arc<RigKeyingController>,
    ctx: Arc<SharedContext>,
    cfg: TransmitConfig,
}

impl TransmitEngine {
    pub fn new(
        engines: HashMap<ModeKind, Box<dyn CodecEngine>>,
        data_channels: Vec<Arc<ChannelShared>>,
        resampler: Resampler,
        queue: Arc<ModulatedSampleQueue>,
        keyer: Arc<RigKeyingController>,
        ctx: Arc<SharedContext>,
        cfg: TransmitConfig,
    ) -> Self {
        Self {
            engines,
            data_channels,
            resampler,
            queue,
            keyer,
            ctx,
            cfg,
        }
    }

    /// Run one job to completion: build the whole modulated buffer, level
    /// it, publish it under the queue lock, wait for drain, key off.
    pub fn transmit(&mut self, job: &TransmitJob) -> Result<TransmitReport> {
        // stale sync from the previous transmission must not leak into
        // this one
        self.reset_data_sync();

        let modem_rate = self.resampler.modem_rate();
        let Some(engine) = self.engines.get_mut(&job.mode) else {
            return Err(ModemError::UnknownMode(job.mode));
        };

        self.ctx.set_transmitting(true);
        self.ctx.set_channel_busy(false);
        let start = Instant::now();

        let txbuffer = {
            let payload_len = engine.payload_bytes_per_frame();
            debug!(
                "transmit: mode={} payload={} delay={}",
                job.mode, payload_len, self.cfg.tx_delay_ms
            );

            let mut txbuffer =
                vec![0i16; modem_rate * self.cfg.tx_delay_ms as usize / 1000];
            for _ in 0..job.repeats {
                for frame in &job.frames {
                    if !job.mode.skips_framing() {
                        txbuffer.extend(engine.preamble());
                    }
                    let framed = frame_with_crc(engine.as_ref(), frame);
                    txbuffer.extend(engine.modulate(&framed));
                    if !job.mode.skips_framing() {
                        txbuffer.extend(engine.postamble());
                    }
                }
                let silence = modem_rate * job.repeat_delay_ms as usize / 1000;
                txbuffer.extend(std::iter::repeat(0i16).take(silence));
            }
            txbuffer
        };

        if self.cfg.auto_tune {
            self.auto_tune_level();
        }
        let scaled = set_audio_volume(&txbuffer, self.ctx.tx_audio_level());

        let out = if self.cfg.duration_clocked {
            scaled
        } else {
            self.resampler.to_device(&scaled)
        };

        // publish the whole chunk sequence under the lock flag
        self.queue.lock();
        let mut chunk_count = 0;
        for chunk in out.chunks(self.cfg.chunk_length) {
            let mut padded = chunk.to_vec();
            padded.resize(self.cfg.chunk_length, 0);
            self.queue.push_chunk(padded);
            chunk_count += 1;
        }
        self.queue.unlock();

        let deadline = if self.cfg.duration_clocked {
            // no callback pulls chunks on a hardware clock here; key up
            // front and hold for the computed playback time
            let duration = Duration::from_secs_f64(out.len() as f64 / modem_rate as f64);
            debug!("duration-clocked transmit: duration={duration:?}");
            self.keyer.key(true);
            Some(Instant::now() + duration)
        } else {
            None
        };

        loop {
            let drained = self.queue.is_empty();
            let elapsed = deadline.map_or(true, |d| Instant::now() >= d);
            if drained && elapsed {
                break;
            }
            thread::sleep(self.cfg.drain_poll);
            // our own signal must not read as a busy channel
            self.ctx.set_channel_busy(false);
        }

        self.keyer.key(false);
        // locked again so the queue is ready for the next job
        self.queue.lock();
        self.ctx.set_transmitting(false);

        let on_air = start.elapsed();
        debug!("on air time: mode={} time={:?}", job.mode, on_air);
        Ok(TransmitReport {
            mode: job.mode,
            on_air,
            sample_count: out.len(),
            chunk_count,
        })
    }

    /// Unsync every data mode's receive engine before building a new
    /// transmission.
    fn reset_data_sync(&self) {
        for ch in &self.data_channels {
            ch.request_sync_reset();
        }
    }

    /// One ALC feedback step: nudge the configured level by a fixed
    /// amount picked from the band the latest reading falls into.
    fn auto_tune_level(&self) {
        let alc = self.ctx.alc();
        let level = self.ctx.tx_audio_level();
        let delta = alc_level_delta(alc);
        self.ctx.set_tx_audio_level(level + delta);
        debug!("audio tune: audio_level={} alc_level={alc}", level + delta);
    }
}

/// Level delta per ALC band.
pub(crate) fn alc_level_delta(alc: f32) -> i32 {
    if alc == 0.0 {
        20
    } else if alc > 0.0 && alc <= 0.1 {
        2
    } else if alc > 0.1 && alc < 0.2 {
        0
    } else if alc > 0.2 && alc < 0.99 {
        -20
    } else if alc >= 1.0 {
        -40
    } else {
        0
    }
}

/// Pad `payload` to the mode's payload size and append the engine's
/// 16-bit CRC, big-endian. Always yields exactly `bytes_per_frame` bytes.
pub fn frame_with_crc(engine: &dyn CodecEngine, payload: &[u8]) -> Vec<u8> {
    let payload_len = engine.payload_bytes_per_frame();
    let mut buffer = vec![0u8; payload_len];
    let n = payload.len().min(payload_len);
    buffer[..n].copy_from_slice(&payload[..n]);
    let crc = engine.gen_crc16(&buffer);
    buffer.extend_from_slice(&crc.to_be_bytes());
    buffer
}

/// Scale samples by `level` percent, clipped to 0..=200.
pub fn set_audio_volume(samples: &[i16], level: i32) -> Vec<i16> {
    let volume = level.clamp(0, 200) as f32 / 100.0;
    samples
        .iter()
        .map(|&s| (s as f32 * volume).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}
