//! Receive-side fan-out: one resampled input chunk is offered to every
//! enabled channel's ring buffer.
//!
//! The fan-out is all-or-nothing per channel: a chunk that does not fit a
//! buffer is dropped for that channel only and counted, never partially
//! written, and never blocks the audio path.

use std::sync::Arc;

use crate::channel::ChannelShared;
use crate::resample::Resampler;

pub struct ReceiveDispatcher {
    channels: Vec<Arc<ChannelShared>>,
    resampler: Resampler,
}

impl ReceiveDispatcher {
    pub fn new(channels: Vec<Arc<ChannelShared>>, resampler: Resampler) -> Self {
        Self {
            channels,
            resampler,
        }
    }

    /// Resample one device-rate chunk to the modem rate and distribute it.
    /// Returns the resampled chunk for the caller's spectrum tap.
    pub fn dispatch(&self, chunk: &[i16]) -> Vec<i16> {
        let x = self.resampler.to_modem(chunk);
        let length_x = x.len();
        for ch in &self.channels {
            ch.with_ring(|ring| {
                if ring.nbuffer() + length_x > ring.size() {
                    ch.note_overflow();
                } else if ch.enabled() {
                    let _ = ring.push(&x);
                }
            });
        }
        x
    }

    pub fn channels(&self) -> &[Arc<ChannelShared>] {
        &self.channels
    }
}
