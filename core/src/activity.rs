//! Channel-busy detection from the live spectrum.
//!
//! The monitor reads the most recent resampled window from the tap,
//! computes a log-power spectrum, flags bins standing well above the
//! mean, and integrates the flagged power per frequency slot. A per-slot
//! decay counter provides hysteresis so marginal signals do not flap the
//! busy state. Detection is suppressed while we transmit; our own signal
//! is not "the channel is busy".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rustfft::{num_complex::Complex, FftPlanner};

use crate::context::SharedContext;
use crate::{BUSY_DB_MARGIN, FFT_MAX_BINS, FFT_MIN_SAMPLES, NUM_BUSY_SLOTS};

/// Active-bin power a slot must integrate before it reads as busy.
const SLOT_BUSY_THRESHOLD: f32 = 200.0;
/// Sentinel written over active bins, also what the display highlights.
const ACTIVE_BIN_SENTINEL: f32 = 100.0;
/// Decay counter step-up per busy cycle and its saturation point. The
/// higher the cap, the longer a slot stays busy after the signal stops.
const BUSY_COUNTER_STEP: u32 = 10;
const BUSY_COUNTER_MAX: u32 = 200;
/// Loudness is refreshed every this many cycles.
const RMS_CYCLE: u32 = 50;

/// Spectrum bin ranges of the five frequency slots.
const SLOT_BINS: [(usize, usize); NUM_BUSY_SLOTS] =
    [(0, 65), (65, 120), (120, 176), (176, 231), (231, usize::MAX)];

/// Latest resampled window, written by the audio pump on every chunk.
pub struct SpectrumTap {
    samples: Mutex<Vec<i16>>,
}

impl SpectrumTap {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self, samples: &[i16]) {
        let mut tap = self.samples.lock();
        tap.clear();
        tap.extend_from_slice(samples);
    }

    pub fn snapshot(&self) -> Vec<i16> {
        self.samples.lock().clone()
    }
}

impl Default for SpectrumTap {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ChannelActivityMonitor {
    ctx: Arc<SharedContext>,
    tap: Arc<SpectrumTap>,
    planner: FftPlanner<f32>,
    busy_counters: [u32; NUM_BUSY_SLOTS],
    rms_counter: u32,
}

impl ChannelActivityMonitor {
    pub fn new(ctx: Arc<SharedContext>, tap: Arc<SpectrumTap>) -> Self {
        Self {
            ctx,
            tap,
            planner: FftPlanner::new(),
            busy_counters: [0; NUM_BUSY_SLOTS],
            rms_counter: 0,
        }
    }

    /// Periodic worker entry point.
    pub fn run(mut self, stop: Arc<AtomicBool>, interval: Duration) {
        while !stop.load(Ordering::Relaxed) {
            thread::sleep(interval);
            self.cycle();
        }
    }

    /// One analysis cycle. Skipped entirely until the tap has
    /// accumulated a minimum window.
    pub fn cycle(&mut self) {
        let data = self.tap.snapshot();
        if data.len() < FFT_MIN_SAMPLES {
            return;
        }

        let fft = self.planner.plan_fft_forward(data.len());
        let mut buf: Vec<Complex<f32>> = data
            .iter()
            .map(|&s| Complex::new(s as f32, 0.0))
            .collect();
        fft.process(&mut buf);

        // real input: only the first half of the spectrum is informative
        let half = data.len() / 2 + 1;
        let mut dfft: Vec<f32> = buf[..half]
            .iter()
            .map(|c| {
                // dead-silent bins read as magnitude 1 to keep log10 finite
                let magnitude = match c.norm() {
                    m if m == 0.0 => 1.0,
                    m => m,
                };
                10.0 * magnitude.log10()
            })
            .collect();

        let avg = dfft.iter().sum::<f32>() / dfft.len() as f32;
        let transmitting = self.ctx.transmitting();

        if !transmitting {
            // highlight anything standing clear of the noise floor
            for v in dfft.iter_mut() {
                if *v > avg + BUSY_DB_MARGIN {
                    *v = ACTIVE_BIN_SENTINEL;
                }
            }

            self.rms_counter += 1;
            if self.rms_counter > RMS_CYCLE {
                self.ctx.set_audio_dbfs(audio_dbfs(&data));
                self.rms_counter = 0;
            }
        }

        for (slot, &(lo, hi)) in SLOT_BINS.iter().enumerate() {
            let lo = lo.min(dfft.len());
            let hi = hi.min(dfft.len());
            let active_power: f32 = dfft[lo..hi]
                .iter()
                .filter(|&&v| v > avg + BUSY_DB_MARGIN)
                .sum();

            if active_power >= SLOT_BUSY_THRESHOLD && !transmitting {
                self.ctx.set_busy_slot(slot, true);
                self.busy_counters[slot] =
                    (self.busy_counters[slot] + BUSY_COUNTER_STEP).min(BUSY_COUNTER_MAX);
            } else {
                self.busy_counters[slot] = self.busy_counters[slot].saturating_sub(1);
                if self.busy_counters[slot] == 0 {
                    self.ctx.set_busy_slot(slot, false);
                }
            }
        }

        let any_busy = (0..NUM_BUSY_SLOTS).any(|slot| self.ctx.busy_slot(slot));
        self.ctx.set_channel_busy(any_busy && !transmitting);

        let bins = dfft.len().min(FFT_MAX_BINS);
        self.ctx
            .set_fft(dfft[..bins].iter().map(|&v| v as i32).collect());
    }
}

/// Loudness of the raw window in dBFS. An all-zero window reports the
/// floor value instead of failing on log(0).
fn audio_dbfs(samples: &[i16]) -> f32 {
    let peak = samples
        .iter()
        .map(|&s| (s as f32).powi(2))
        .fold(0.0f32, f32::max)
        .sqrt();
    if peak < 1.0 {
        return -100.0;
    }
    20.0 * (peak / 32768.0).log10()
}
