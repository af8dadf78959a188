//! Per-mode receive channel: one codec engine, one ring buffer, one
//! decode worker.
//!
//! The decode loop follows an always-advance policy: every attempt
//! consumes exactly the engine's current `nin` samples no matter what the
//! status was, then re-reads `nin`. A channel that never syncs therefore
//! keeps draining its buffer instead of stalling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::context::SharedContext;
use crate::engine::{CodecEngine, RxStatus};
use crate::mode::{frame_type, ChannelId, ModeKind};
use crate::ring::SampleRingBuffer;

/// Sustained-failure threshold: this many decode errors with no delivery
/// in between mark the channel's link as failing.
const ERROR_HISTORY_DEPTH: usize = 3;

/// Bounded history of decode-error status codes. Cleared by a successful
/// delivery or by the fatal-state query itself.
pub struct ErrorHistory {
    codes: VecDeque<u8>,
}

impl ErrorHistory {
    pub fn new() -> Self {
        Self {
            codes: VecDeque::with_capacity(ERROR_HISTORY_DEPTH),
        }
    }

    pub fn record(&mut self, code: u8) {
        if self.codes.len() == ERROR_HISTORY_DEPTH {
            self.codes.pop_front();
        }
        self.codes.push_back(code);
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn is_fatal(&self) -> bool {
        self.codes.len() == ERROR_HISTORY_DEPTH
    }

    pub fn clear(&mut self) {
        self.codes.clear();
    }
}

impl Default for ErrorHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// State shared between a channel's decode worker, the receive dispatcher
/// and the orchestrator. The ring buffer is the only contended piece;
/// both sides hold its lock just long enough to copy samples.
pub struct ChannelShared {
    id: ChannelId,
    enabled: AtomicBool,
    overflow_count: AtomicU64,
    sync_reset: AtomicBool,
    pending_fpb: AtomicU32,
    ring: Mutex<SampleRingBuffer>,
    history: Mutex<ErrorHistory>,
}

impl ChannelShared {
    pub fn new(id: ChannelId, capacity: usize, enabled: bool) -> Self {
        Self {
            id,
            enabled: AtomicBool::new(enabled),
            overflow_count: AtomicU64::new(0),
            sync_reset: AtomicBool::new(false),
            pending_fpb: AtomicU32::new(0),
            ring: Mutex::new(SampleRingBuffer::new(capacity)),
            history: Mutex::new(ErrorHistory::new()),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn note_overflow(&self) {
        self.overflow_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn with_ring<R>(&self, f: impl FnOnce(&mut SampleRingBuffer) -> R) -> R {
        f(&mut self.ring.lock())
    }

    /// Ask the decode worker to reset the engine's sync state before its
    /// next attempt.
    pub fn request_sync_reset(&self) {
        self.sync_reset.store(true, Ordering::Relaxed);
    }

    pub(crate) fn take_sync_reset(&self) -> bool {
        self.sync_reset.swap(false, Ordering::Relaxed)
    }

    pub fn request_frames_per_burst(&self, n: u32) {
        self.pending_fpb.store(n, Ordering::Relaxed);
    }

    pub(crate) fn take_frames_per_burst(&self) -> Option<u32> {
        match self.pending_fpb.swap(0, Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        }
    }

    pub fn record_error(&self, code: u8) {
        self.history.lock().record(code);
    }

    pub fn history_is_empty(&self) -> bool {
        self.history.lock().is_empty()
    }

    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    /// Fatal-state query for the data-link layer. Clears the history
    /// either way, so a repeated query reports false until new errors
    /// accumulate.
    pub fn take_fatal_error(&self) -> bool {
        let mut history = self.history.lock();
        let fatal = history.is_fatal();
        history.clear();
        fatal
    }
}

/// A decoded frame handed to the data-link layer. Carries quality
/// snapshots taken from the decoding engine at delivery time; the engine
/// itself stays with its worker.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub channel: ChannelId,
    pub mode: ModeKind,
    /// Full frame as decoded, `bytes_per_frame` bytes including the CRC.
    pub data: Vec<u8>,
    pub bytes_per_frame: usize,
    pub snr: f32,
    pub frequency_offset: f32,
}

/// Destinations for decoded frames.
#[derive(Clone)]
pub struct FrameSinks {
    pub received: Sender<DecodedFrame>,
    pub mesh: Sender<Vec<u8>>,
}

pub struct CodecChannel {
    id: ChannelId,
    engine: Box<dyn CodecEngine>,
    shared: Arc<ChannelShared>,
    bytes_out: Vec<u8>,
}

impl CodecChannel {
    pub fn new(id: ChannelId, engine: Box<dyn CodecEngine>, shared: Arc<ChannelShared>) -> Self {
        let bytes_out = vec![0u8; engine.bytes_per_frame()];
        Self {
            id,
            engine,
            shared,
            bytes_out,
        }
    }

    /// Decode loop; runs until the audio stream goes inactive.
    pub fn run(
        mut self,
        ctx: Arc<SharedContext>,
        sinks: FrameSinks,
        stream_active: Arc<AtomicBool>,
        poll: Duration,
    ) {
        debug!("decode worker started: channel={}", self.id);
        while stream_active.load(Ordering::Relaxed) {
            thread::sleep(poll);
            if self.shared.take_sync_reset() {
                self.engine.set_sync(false);
            }
            if let Some(n) = self.shared.take_frames_per_burst() {
                self.engine.set_frames_per_burst(n);
            }
            while self.decode_pass(&ctx, &sinks) {}
        }
        warn!("audio stream inactive, decode worker exiting: channel={}", self.id);
    }

    /// One demodulation attempt. Returns false when the buffer does not
    /// yet hold `nin` samples.
    fn decode_pass(&mut self, ctx: &SharedContext, sinks: &FrameSinks) -> bool {
        let nin = self.engine.nin();
        let window = self.shared.with_ring(|ring| {
            if ring.nbuffer() < nin {
                None
            } else {
                Some(ring.as_slice()[..nin].to_vec())
            }
        });
        let Some(window) = window else {
            return false;
        };

        let nbytes = self.engine.demodulate(&window, &mut self.bytes_out);
        let status = self.engine.rx_status();

        if status.is_traffic() {
            ctx.set_codec_traffic(true);
            debug!(
                "modem state: channel={} rx_status={}",
                self.id,
                status.code()
            );
        } else {
            ctx.set_codec_traffic(false);
        }

        if status == RxStatus::DecodeError {
            self.shared.record_error(status.code());
        }

        // always advance: the attempt's samples are consumed no matter
        // what came of them, and nin is re-read on the next pass
        let _ = self.shared.with_ring(|ring| ring.pop(nin));

        if nbytes == self.engine.bytes_per_frame() {
            self.deliver(ctx, sinks);
        }
        true
    }

    fn deliver(&mut self, ctx: &SharedContext, sinks: &FrameSinks) {
        if !ctx.listen() {
            warn!(
                "received frame but listen is disabled: channel={}",
                self.id
            );
            return;
        }

        let tag = self.bytes_out[0];

        // Opener dedup: an opener arriving while this channel is in a
        // clean state is a retransmission whose ACK got lost; handing it
        // up again would toggle the session twice.
        if self.id == ChannelId::Sig1
            && frame_type::is_session_opener(tag)
            && self.shared.history_is_empty()
        {
            debug!(
                "dropping redundant session opener: channel={} tag={}",
                self.id, tag
            );
            return;
        }

        if frame_type::is_mesh(tag) {
            debug!(
                "routing frame to mesh queue: channel={} nbytes={}",
                self.id,
                self.bytes_out.len()
            );
            let _ = sinks.mesh.send(self.bytes_out.clone());
            self.shared.clear_history();
            return;
        }

        let stats = self.engine.stats();
        let ext = self.engine.extended_stats();
        let snr = (stats.snr * 10.0).round() / 10.0;
        ctx.set_snr(snr);
        ctx.set_frequency_offset(-ext.frequency_offset.round());
        ctx.set_scatter(downsample_scatter(ext.scatter));

        debug!(
            "pushing received frame: channel={} nbytes={}",
            self.id,
            self.bytes_out.len()
        );
        let _ = sinks.received.send(DecodedFrame {
            channel: self.id,
            mode: self.engine.mode(),
            data: self.bytes_out.clone(),
            bytes_per_frame: self.engine.bytes_per_frame(),
            snr,
            frequency_offset: -ext.frequency_offset.round(),
        });
        self.shared.clear_history();
    }
}

/// Keep small scatter sets whole, thin out large ones.
fn downsample_scatter(scatter: Vec<(i32, i32)>) -> Vec<(i32, i32)> {
    if scatter.len() >= 150 {
        scatter.into_iter().step_by(10).collect()
    } else {
        scatter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ExtendedStats, ModemStats};
    use crossbeam_channel::unbounded;

    const TEST_BYTES_PER_FRAME: usize = 16;

    /// Engine fed from a script of (status, nin-after-attempt, frame).
    struct ScriptedEngine {
        steps: VecDeque<(RxStatus, usize, Option<Vec<u8>>)>,
        nin: usize,
        status: RxStatus,
        consumed: Vec<usize>,
    }

    impl ScriptedEngine {
        fn new(initial_nin: usize, steps: Vec<(RxStatus, usize, Option<Vec<u8>>)>) -> Self {
            Self {
                steps: steps.into(),
                nin: initial_nin,
                status: RxStatus::NoSync,
                consumed: Vec::new(),
            }
        }
    }

    impl CodecEngine for ScriptedEngine {
        fn mode(&self) -> ModeKind {
            ModeKind::Datac13
        }

        fn bits_per_modem_frame(&self) -> usize {
            TEST_BYTES_PER_FRAME * 8
        }

        fn n_tx_modem_samples(&self) -> usize {
            TEST_BYTES_PER_FRAME
        }

        fn n_tx_preamble_modem_samples(&self) -> usize {
            0
        }

        fn n_tx_postamble_modem_samples(&self) -> usize {
            0
        }

        fn preamble(&mut self) -> Vec<i16> {
            Vec::new()
        }

        fn postamble(&mut self) -> Vec<i16> {
            Vec::new()
        }

        fn modulate(&mut self, _frame: &[u8]) -> Vec<i16> {
            Vec::new()
        }

        fn demodulate(&mut self, samples: &[i16], bytes_out: &mut [u8]) -> usize {
            self.consumed.push(samples.len());
            let (status, next_nin, frame) = self
                .steps
                .pop_front()
                .unwrap_or((RxStatus::NoSync, self.nin, None));
            self.status = status;
            self.nin = next_nin;
            match frame {
                Some(frame) => {
                    bytes_out[..frame.len()].copy_from_slice(&frame);
                    frame.len()
                }
                None => 0,
            }
        }

        fn rx_status(&self) -> RxStatus {
            self.status
        }

        fn nin(&self) -> usize {
            self.nin
        }

        fn set_sync(&mut self, _sync: bool) {}
        fn set_frames_per_burst(&mut self, _n: u32) {}
        fn set_tuning_range(&mut self, _fmin: f32, _fmax: f32) {}

        fn stats(&self) -> ModemStats {
            ModemStats { sync: true, snr: 4.25 }
        }

        fn extended_stats(&self) -> ExtendedStats {
            ExtendedStats {
                frequency_offset: 12.6,
                scatter: vec![(1, 1)],
            }
        }
    }

    fn frame_with_tag(tag: u8) -> Vec<u8> {
        let mut frame = vec![0u8; TEST_BYTES_PER_FRAME];
        frame[0] = tag;
        frame
    }

    fn harness(
        id: ChannelId,
        engine: ScriptedEngine,
    ) -> (
        CodecChannel,
        Arc<ChannelShared>,
        Arc<SharedContext>,
        FrameSinks,
        crossbeam_channel::Receiver<DecodedFrame>,
        crossbeam_channel::Receiver<Vec<u8>>,
    ) {
        let shared = Arc::new(ChannelShared::new(id, 4096, true));
        let channel = CodecChannel::new(id, Box::new(engine), shared.clone());
        let ctx = Arc::new(SharedContext::default());
        let (received_tx, received_rx) = unbounded();
        let (mesh_tx, mesh_rx) = unbounded();
        let sinks = FrameSinks {
            received: received_tx,
            mesh: mesh_tx,
        };
        (channel, shared, ctx, sinks, received_rx, mesh_rx)
    }

    #[test]
    fn test_always_advance_consumes_each_nin() {
        // statuses never reach sync; nin changes between attempts
        let steps = vec![
            (RxStatus::NoSync, 300, None),
            (RxStatus::Trial, 150, None),
            (RxStatus::NoSync, 200, None),
            (RxStatus::TrialSync, 200, None),
        ];
        let (mut channel, shared, ctx, sinks, _rx, _mesh) =
            harness(ChannelId::Sig0, ScriptedEngine::new(200, steps));

        shared.with_ring(|ring| ring.push(&vec![0i16; 1000])).unwrap();
        let before = shared.with_ring(|ring| ring.nbuffer());

        let mut attempts = 0;
        while channel.decode_pass(&ctx, &sinks) {
            attempts += 1;
        }

        // nins used: 200, 300, 150, 200 = 850; the fifth pass needs 200
        // but only 150 remain
        assert_eq!(attempts, 4);
        let after = shared.with_ring(|ring| ring.nbuffer());
        assert_eq!(before - after, 200 + 300 + 150 + 200);
    }

    #[test]
    fn test_frame_delivery_with_stats_snapshot() {
        let steps = vec![(
            RxStatus::FrameDecoded,
            200,
            Some(frame_with_tag(42)),
        )];
        let (mut channel, shared, ctx, sinks, received, _mesh) =
            harness(ChannelId::Sig0, ScriptedEngine::new(200, steps));

        shared.with_ring(|ring| ring.push(&vec![0i16; 200])).unwrap();
        assert!(channel.decode_pass(&ctx, &sinks));

        let frame = received.try_recv().unwrap();
        assert_eq!(frame.channel, ChannelId::Sig0);
        assert_eq!(frame.bytes_per_frame, TEST_BYTES_PER_FRAME);
        assert_eq!(frame.data[0], 42);
        assert_eq!(frame.snr, 4.3);
        assert_eq!(frame.frequency_offset, -13.0);
        assert_eq!(ctx.snr(), 4.3);
    }

    #[test]
    fn test_opener_dropped_in_clean_state() {
        let steps = vec![(
            RxStatus::FrameDecoded,
            200,
            Some(frame_with_tag(frame_type::ARQ_DC_OPEN_W)),
        )];
        let (mut channel, shared, ctx, sinks, received, _mesh) =
            harness(ChannelId::Sig1, ScriptedEngine::new(200, steps));

        shared.with_ring(|ring| ring.push(&vec![0i16; 200])).unwrap();
        channel.decode_pass(&ctx, &sinks);
        assert!(received.try_recv().is_err());
    }

    #[test]
    fn test_opener_delivered_after_errors() {
        let steps = vec![(
            RxStatus::FrameDecoded,
            200,
            Some(frame_with_tag(frame_type::ARQ_SESSION_OPEN)),
        )];
        let (mut channel, shared, ctx, sinks, received, _mesh) =
            harness(ChannelId::Sig1, ScriptedEngine::new(200, steps));

        shared.record_error(RxStatus::DecodeError.code());
        shared.with_ring(|ring| ring.push(&vec![0i16; 200])).unwrap();
        channel.decode_pass(&ctx, &sinks);
        assert!(received.try_recv().is_ok());
        // delivery cleared the history
        assert!(shared.history_is_empty());
    }

    #[test]
    fn test_opener_not_deduped_on_sig0() {
        let steps = vec![(
            RxStatus::FrameDecoded,
            200,
            Some(frame_with_tag(frame_type::ARQ_SESSION_OPEN)),
        )];
        let (mut channel, shared, ctx, sinks, received, _mesh) =
            harness(ChannelId::Sig0, ScriptedEngine::new(200, steps));

        shared.with_ring(|ring| ring.push(&vec![0i16; 200])).unwrap();
        channel.decode_pass(&ctx, &sinks);
        assert!(received.try_recv().is_ok());
    }

    #[test]
    fn test_mesh_frames_routed_to_mesh_queue() {
        let steps = vec![(
            RxStatus::FrameDecoded,
            200,
            Some(frame_with_tag(frame_type::MESH_BROADCAST)),
        )];
        let (mut channel, shared, ctx, sinks, received, mesh) =
            harness(ChannelId::Sig0, ScriptedEngine::new(200, steps));

        shared.with_ring(|ring| ring.push(&vec![0i16; 200])).unwrap();
        channel.decode_pass(&ctx, &sinks);
        assert!(received.try_recv().is_err());
        let frame = mesh.try_recv().unwrap();
        assert_eq!(frame[0], frame_type::MESH_BROADCAST);
    }

    #[test]
    fn test_listen_gate_discards_frames() {
        let steps = vec![(
            RxStatus::FrameDecoded,
            200,
            Some(frame_with_tag(42)),
        )];
        let (mut channel, shared, ctx, sinks, received, _mesh) =
            harness(ChannelId::Sig0, ScriptedEngine::new(200, steps));

        ctx.set_listen(false);
        shared.with_ring(|ring| ring.push(&vec![0i16; 200])).unwrap();
        channel.decode_pass(&ctx, &sinks);
        assert!(received.try_recv().is_err());
    }

    #[test]
    fn test_three_errors_mark_fatal_and_query_clears() {
        let steps = vec![
            (RxStatus::DecodeError, 100, None),
            (RxStatus::DecodeError, 100, None),
            (RxStatus::DecodeError, 100, None),
        ];
        let (mut channel, shared, ctx, sinks, _rx, _mesh) =
            harness(ChannelId::Dat0Datac1, ScriptedEngine::new(100, steps));

        shared.with_ring(|ring| ring.push(&vec![0i16; 300])).unwrap();
        while channel.decode_pass(&ctx, &sinks) {}

        assert!(shared.take_fatal_error());
        // the query cleared the history
        assert!(!shared.take_fatal_error());
    }

    #[test]
    fn test_two_errors_not_fatal() {
        let steps = vec![
            (RxStatus::DecodeError, 100, None),
            (RxStatus::DecodeError, 100, None),
        ];
        let (mut channel, shared, ctx, sinks, _rx, _mesh) =
            harness(ChannelId::Dat0Datac1, ScriptedEngine::new(100, steps));

        shared.with_ring(|ring| ring.push(&vec![0i16; 200])).unwrap();
        while channel.decode_pass(&ctx, &sinks) {}
        assert!(!shared.take_fatal_error());
    }

    #[test]
    fn test_codec_traffic_flag_follows_status() {
        let steps = vec![
            (RxStatus::Sync, 100, None),
            (RxStatus::NoSync, 100, None),
        ];
        let (mut channel, shared, ctx, sinks, _rx, _mesh) =
            harness(ChannelId::Sig0, ScriptedEngine::new(100, steps));

        shared.with_ring(|ring| ring.push(&vec![0i16; 200])).unwrap();
        channel.decode_pass(&ctx, &sinks);
        assert!(ctx.codec_traffic());
        channel.decode_pass(&ctx, &sinks);
        assert!(!ctx.codec_traffic());
    }
}
