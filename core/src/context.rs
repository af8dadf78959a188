//! Shared runtime state, published for observers.
//!
//! Every field has exactly one writer (noted per accessor); readers
//! tolerate brief staleness. Scalars are atomics, composite values sit
//! behind a short-held `RwLock`. Nothing in here is used for inter-worker
//! handoff - that is what the queues are for.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use parking_lot::RwLock;

use crate::NUM_BUSY_SLOTS;

/// Last polled rig state, written only by the rig polling worker.
#[derive(Debug, Clone, Default)]
pub struct RigTelemetry {
    pub frequency: String,
    pub mode: String,
    pub bandwidth: String,
    pub status: String,
    pub strength: String,
    pub alc: f32,
}

pub struct SharedContext {
    transmitting: AtomicBool,
    ptt_state: AtomicBool,
    listen: AtomicBool,
    codec_traffic: AtomicBool,
    channel_busy: AtomicBool,
    busy_slots: [AtomicBool; NUM_BUSY_SLOTS],
    tx_audio_level: AtomicI32,
    snr: RwLock<f32>,
    frequency_offset: RwLock<f32>,
    audio_dbfs: RwLock<f32>,
    fft: RwLock<Vec<i32>>,
    scatter: RwLock<Vec<(i32, i32)>>,
    rig: RwLock<RigTelemetry>,
}

impl SharedContext {
    pub fn new(tx_audio_level: i32) -> Self {
        Self {
            transmitting: AtomicBool::new(false),
            ptt_state: AtomicBool::new(false),
            listen: AtomicBool::new(true),
            codec_traffic: AtomicBool::new(false),
            channel_busy: AtomicBool::new(false),
            busy_slots: Default::default(),
            tx_audio_level: AtomicI32::new(tx_audio_level),
            snr: RwLock::new(0.0),
            frequency_offset: RwLock::new(0.0),
            audio_dbfs: RwLock::new(0.0),
            fft: RwLock::new(Vec::new()),
            scatter: RwLock::new(Vec::new()),
            rig: RwLock::new(RigTelemetry::default()),
        }
    }

    // -- transmit state (writer: transmit worker) --

    pub fn transmitting(&self) -> bool {
        self.transmitting.load(Ordering::Relaxed)
    }

    pub fn set_transmitting(&self, on: bool) {
        self.transmitting.store(on, Ordering::Relaxed);
    }

    // -- PTT (writer: keying controller) --

    pub fn ptt_state(&self) -> bool {
        self.ptt_state.load(Ordering::Relaxed)
    }

    pub fn set_ptt_state(&self, on: bool) {
        self.ptt_state.store(on, Ordering::Relaxed);
    }

    // -- listen gate (writer: application) --

    pub fn listen(&self) -> bool {
        self.listen.load(Ordering::Relaxed)
    }

    pub fn set_listen(&self, on: bool) {
        self.listen.store(on, Ordering::Relaxed);
    }

    // -- codec traffic flag (writer: decode workers) --

    pub fn codec_traffic(&self) -> bool {
        self.codec_traffic.load(Ordering::Relaxed)
    }

    pub fn set_codec_traffic(&self, on: bool) {
        self.codec_traffic.store(on, Ordering::Relaxed);
    }

    // -- channel busy (writer: activity monitor; transmit worker forces
    //    clear while on air) --

    pub fn channel_busy(&self) -> bool {
        self.channel_busy.load(Ordering::Relaxed)
    }

    pub fn set_channel_busy(&self, on: bool) {
        self.channel_busy.store(on, Ordering::Relaxed);
    }

    pub fn busy_slot(&self, slot: usize) -> bool {
        self.busy_slots[slot].load(Ordering::Relaxed)
    }

    pub fn set_busy_slot(&self, slot: usize, on: bool) {
        self.busy_slots[slot].store(on, Ordering::Relaxed);
    }

    pub fn busy_slots(&self) -> [bool; NUM_BUSY_SLOTS] {
        std::array::from_fn(|i| self.busy_slot(i))
    }

    // -- transmit audio level, percent 0..=200 (writer: transmit worker
    //    via ALC auto-tune, or the application) --

    pub fn tx_audio_level(&self) -> i32 {
        self.tx_audio_level.load(Ordering::Relaxed)
    }

    pub fn set_tx_audio_level(&self, level: i32) {
        self.tx_audio_level.store(level, Ordering::Relaxed);
    }

    // -- receive quality snapshots (writer: decode workers) --

    pub fn snr(&self) -> f32 {
        *self.snr.read()
    }

    pub fn set_snr(&self, snr: f32) {
        *self.snr.write() = snr;
    }

    pub fn frequency_offset(&self) -> f32 {
        *self.frequency_offset.read()
    }

    pub fn set_frequency_offset(&self, offset: f32) {
        *self.frequency_offset.write() = offset;
    }

    pub fn scatter(&self) -> Vec<(i32, i32)> {
        self.scatter.read().clone()
    }

    pub fn set_scatter(&self, scatter: Vec<(i32, i32)>) {
        *self.scatter.write() = scatter;
    }

    // -- spectrum/loudness (writer: activity monitor) --

    pub fn audio_dbfs(&self) -> f32 {
        *self.audio_dbfs.read()
    }

    pub fn set_audio_dbfs(&self, dbfs: f32) {
        *self.audio_dbfs.write() = dbfs;
    }

    pub fn fft(&self) -> Vec<i32> {
        self.fft.read().clone()
    }

    pub fn set_fft(&self, fft: Vec<i32>) {
        *self.fft.write() = fft;
    }

    // -- rig telemetry (writer: rig polling worker) --

    pub fn rig(&self) -> RigTelemetry {
        self.rig.read().clone()
    }

    pub fn update_rig<F: FnOnce(&mut RigTelemetry)>(&self, f: F) {
        f(&mut self.rig.write());
    }

    pub fn alc(&self) -> f32 {
        self.rig.read().alc
    }
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new(100)
    }
}
