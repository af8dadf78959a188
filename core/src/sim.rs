//! Simulated codec engine.
//!
//! A deterministic stand-in for the native modem library: frames travel as
//! a recognizable sample pattern instead of a real waveform, so the whole
//! pipeline (dispatch, decode loops, transmit framing, CRC, resampling)
//! can run and be tested without DSP. The wire format survives the
//! 8 k/48 k linear resampler because chunk sizes keep the 6:1 sample grid
//! aligned.
//!
//! Wire format per frame: 8 preamble marks, then one sample per frame
//! byte (`DATA_OFFSET + byte`). `preamble()`/`postamble()` emit longer
//! mark runs for modes that use framing markers.

use crate::engine::{crc16, CodecEngine, ExtendedStats, ModemStats, RxStatus};
use crate::mode::ModeKind;

const PREAMBLE_MARK: i16 = 12_000;
const POSTAMBLE_MARK: i16 = -12_000;
const DATA_OFFSET: i16 = 1_000;
const SYNC_RUN: usize = 8;

/// `nin` reported while hunting for a frame.
const NIN_SEARCH: usize = 240;
/// `nin` reported while a partial frame is in view, to pull the remainder
/// in sooner. Exercises the callers' nin-refresh path.
const NIN_TRACK: usize = 120;

pub struct SimCodec {
    mode: ModeKind,
    bytes_per_frame: usize,
    nin: usize,
    status: RxStatus,
    synced: bool,
    acc: Vec<i16>,
}

impl SimCodec {
    /// Factory with the `open(mode)` shape the orchestrator expects.
    pub fn open(mode: ModeKind) -> Box<dyn CodecEngine> {
        Box::new(Self::new(mode))
    }

    pub fn new(mode: ModeKind) -> Self {
        let bytes_per_frame = match mode {
            ModeKind::Datac0 => 32,
            ModeKind::Datac1 => 512,
            ModeKind::Datac3 => 128,
            ModeKind::Datac4 => 64,
            ModeKind::Datac13 => 16,
            ModeKind::FskLdpc0 => 64,
            ModeKind::FskLdpc1 => 128,
        };
        Self {
            mode,
            bytes_per_frame,
            nin: NIN_SEARCH,
            status: RxStatus::NoSync,
            synced: false,
            acc: Vec::new(),
        }
    }

    fn find_sync(&self) -> Option<usize> {
        if self.acc.len() < SYNC_RUN {
            return None;
        }
        let mut i = 0;
        while i + SYNC_RUN <= self.acc.len() {
            if self.acc[i..i + SYNC_RUN].iter().all(|&s| s == PREAMBLE_MARK) {
                // skip to the end of the mark run; data starts there
                let mut j = i + SYNC_RUN;
                while j < self.acc.len() && self.acc[j] == PREAMBLE_MARK {
                    j += 1;
                }
                return Some(j);
            }
            i += 1;
        }
        None
    }

    fn bound_acc(&mut self) {
        let cap = 4 * (self.n_tx_preamble_modem_samples() + self.n_tx_modem_samples());
        if self.acc.len() > cap {
            let drop = self.acc.len() - cap;
            self.acc.drain(..drop);
        }
    }
}

impl CodecEngine for SimCodec {
    fn mode(&self) -> ModeKind {
        self.mode
    }

    fn bits_per_modem_frame(&self) -> usize {
        self.bytes_per_frame * 8
    }

    fn n_tx_modem_samples(&self) -> usize {
        SYNC_RUN + self.bytes_per_frame
    }

    fn n_tx_preamble_modem_samples(&self) -> usize {
        64
    }

    fn n_tx_postamble_modem_samples(&self) -> usize {
        32
    }

    fn preamble(&mut self) -> Vec<i16> {
        vec![PREAMBLE_MARK; self.n_tx_preamble_modem_samples()]
    }

    fn postamble(&mut self) -> Vec<i16> {
        vec![POSTAMBLE_MARK; self.n_tx_postamble_modem_samples()]
    }

    fn modulate(&mut self, frame: &[u8]) -> Vec<i16> {
        let mut out = Vec::with_capacity(self.n_tx_modem_samples());
        out.extend(std::iter::repeat(PREAMBLE_MARK).take(SYNC_RUN));
        for &byte in frame.iter().take(self.bytes_per_frame) {
            out.push(DATA_OFFSET + byte as i16);
        }
        // callers always hand over a full frame; pad defensively anyway
        while out.len() < self.n_tx_modem_samples() {
            out.push(DATA_OFFSET);
        }
        out
    }

    fn demodulate(&mut self, samples: &[i16], bytes_out: &mut [u8]) -> usize {
        self.acc.extend_from_slice(samples);
        self.bound_acc();

        let Some(data_start) = self.find_sync() else {
            self.status = RxStatus::NoSync;
            self.nin = NIN_SEARCH;
            return 0;
        };

        if self.acc.len() - data_start < self.bytes_per_frame {
            // frame in view but incomplete
            self.status = RxStatus::TrialSync;
            self.nin = NIN_TRACK;
            return 0;
        }

        let frame: Vec<u8> = self.acc[data_start..data_start + self.bytes_per_frame]
            .iter()
            .map(|&s| (s - DATA_OFFSET).clamp(0, 255) as u8)
            .collect();
        self.acc.drain(..data_start + self.bytes_per_frame);
        self.nin = NIN_SEARCH;

        let payload = &frame[..self.bytes_per_frame - 2];
        let wire_crc = u16::from_be_bytes([frame[self.bytes_per_frame - 2], frame[self.bytes_per_frame - 1]]);
        if crc16(payload) != wire_crc {
            self.status = RxStatus::DecodeError;
            return 0;
        }

        self.synced = true;
        self.status = RxStatus::FrameDecoded;
        let n = bytes_out.len().min(frame.len());
        bytes_out[..n].copy_from_slice(&frame[..n]);
        self.bytes_per_frame
    }

    fn rx_status(&self) -> RxStatus {
        self.status
    }

    fn nin(&self) -> usize {
        self.nin
    }

    fn set_sync(&mut self, sync: bool) {
        self.synced = sync;
        if !sync {
            self.acc.clear();
            self.status = RxStatus::NoSync;
            self.nin = NIN_SEARCH;
        }
    }

    fn set_frames_per_burst(&mut self, _n: u32) {}

    fn set_tuning_range(&mut self, _fmin: f32, _fmax: f32) {}

    fn stats(&self) -> ModemStats {
        ModemStats {
            sync: self.synced,
            snr: if self.synced { 12.0 } else { 0.0 },
        }
    }

    fn extended_stats(&self) -> ExtendedStats {
        ExtendedStats {
            frequency_offset: 0.0,
            scatter: if self.synced {
                vec![(700, 700), (-700, -700)]
            } else {
                Vec::new()
            },
        }
    }
}
