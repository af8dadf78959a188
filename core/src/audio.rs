//! Audio pump: the bridge between a hardware-paced callback (or a
//! streaming backend) and the pipeline.
//!
//! `process_audio` is the body of one duplex callback period and never
//! blocks: input fans out with drop-on-overflow, output comes from the
//! modulated queue or is silence. `run` wraps the same body in a
//! channel-driven worker for backends without a native callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

use crate::activity::SpectrumTap;
use crate::context::SharedContext;
use crate::dispatch::ReceiveDispatcher;
use crate::keying::RigKeyingController;
use crate::transmit::ModulatedSampleQueue;

pub struct AudioPump {
    dispatcher: ReceiveDispatcher,
    queue: Arc<ModulatedSampleQueue>,
    tap: Arc<SpectrumTap>,
    keyer: Arc<RigKeyingController>,
    ctx: Arc<SharedContext>,
    /// Callback-paced backends need a buffer every period; streaming
    /// backends only want actual modulation.
    emit_silence: bool,
}

impl AudioPump {
    pub fn new(
        dispatcher: ReceiveDispatcher,
        queue: Arc<ModulatedSampleQueue>,
        tap: Arc<SpectrumTap>,
        keyer: Arc<RigKeyingController>,
        ctx: Arc<SharedContext>,
        emit_silence: bool,
    ) -> Self {
        Self {
            dispatcher,
            queue,
            tap,
            keyer,
            ctx,
            emit_silence,
        }
    }

    /// One callback period: distribute the input, fill the output.
    /// Returns true when the output carries modulated audio.
    pub fn process_audio(&mut self, input: &[i16], output: &mut [i16]) -> bool {
        let x = self.dispatcher.dispatch(input);

        match self.queue.pop_chunk() {
            None => {
                output.fill(0);
                self.tap.store(&x);
                false
            }
            Some(chunk) => {
                if !self.ctx.ptt_state() {
                    // key as late as possible so the dead air before the
                    // modulation is minimal
                    self.keyer.key(true);
                }
                let n = chunk.len().min(output.len());
                output[..n].copy_from_slice(&chunk[..n]);
                output[n..].fill(0);
                // while sending, the spectrum display follows our own
                // signal
                self.tap.store(&chunk);
                true
            }
        }
    }

    /// Channel-driven pump for backends that deliver fixed-size buffers
    /// over queues instead of a hardware callback. Exits (and marks the
    /// stream inactive, stopping the decode workers) when the source or
    /// sink goes away.
    pub fn run(
        mut self,
        source: Receiver<Vec<i16>>,
        sink: Sender<Vec<i16>>,
        stream_active: Arc<AtomicBool>,
        chunk_length: usize,
    ) {
        debug!("audio pump started: chunk_length={chunk_length}");
        while stream_active.load(Ordering::Relaxed) {
            let input = match source.recv_timeout(Duration::from_millis(100)) {
                Ok(chunk) => chunk,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("audio source disconnected, receive stops");
                    stream_active.store(false, Ordering::Relaxed);
                    break;
                }
            };

            let mut output = vec![0i16; chunk_length];
            let modulated = self.process_audio(&input, &mut output);
            if modulated || self.emit_silence {
                if sink.send(output).is_err() {
                    warn!("audio sink disconnected, receive stops");
                    stream_active.store(false, Ordering::Relaxed);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelShared;
    use crate::keying::DummyRig;
    use crate::mode::ChannelId;
    use crate::resample::Resampler;
    use crossbeam_channel::unbounded;

    fn pump() -> (AudioPump, Arc<ChannelShared>, Arc<ModulatedSampleQueue>, Arc<SharedContext>, Arc<SpectrumTap>) {
        let ctx = Arc::new(SharedContext::default());
        let tap = Arc::new(SpectrumTap::new());
        let queue = Arc::new(ModulatedSampleQueue::new());
        let (events_tx, _events_rx) = unbounded();
        let keyer = Arc::new(RigKeyingController::new(
            Box::<DummyRig>::default(),
            ctx.clone(),
            events_tx,
        ));
        let channel = Arc::new(ChannelShared::new(ChannelId::Sig0, 9600, true));
        let dispatcher =
            ReceiveDispatcher::new(vec![channel.clone()], Resampler::new(48000, 8000));
        let pump = AudioPump::new(dispatcher, queue.clone(), tap.clone(), keyer, ctx.clone(), true);
        (pump, channel, queue, ctx, tap)
    }

    #[test]
    fn test_idle_period_outputs_silence_and_taps_input() {
        let (mut pump, channel, _queue, ctx, tap) = pump();
        let input = vec![500i16; 4800];
        let mut output = vec![99i16; 4800];

        let modulated = pump.process_audio(&input, &mut output);

        assert!(!modulated);
        assert!(output.iter().all(|&s| s == 0));
        assert!(!ctx.ptt_state());
        assert_eq!(channel.with_ring(|r| r.nbuffer()), 800);
        // the tap carries the resampled receive chunk
        assert_eq!(tap.snapshot().len(), 800);
    }

    #[test]
    fn test_modulated_chunk_played_and_ptt_keyed() {
        let (mut pump, _channel, queue, ctx, tap) = pump();
        queue.push_chunk(vec![1234i16; 4800]);
        queue.unlock();

        let input = vec![0i16; 4800];
        let mut output = vec![0i16; 4800];
        let modulated = pump.process_audio(&input, &mut output);

        assert!(modulated);
        assert!(output.iter().all(|&s| s == 1234));
        // PTT came up with the first chunk
        assert!(ctx.ptt_state());
        // the tap follows the outgoing audio while sending
        assert_eq!(tap.snapshot(), vec![1234i16; 4800]);
    }

    #[test]
    fn test_locked_queue_is_not_consumed() {
        let (mut pump, _channel, queue, ctx, _tap) = pump();
        queue.push_chunk(vec![1234i16; 4800]);
        // still locked: the job is not fully enqueued yet

        let input = vec![0i16; 4800];
        let mut output = vec![0i16; 4800];
        let modulated = pump.process_audio(&input, &mut output);

        assert!(!modulated);
        assert!(output.iter().all(|&s| s == 0));
        assert!(!ctx.ptt_state());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_ptt_keyed_once_across_chunks() {
        let (mut pump, _channel, queue, ctx, _tap) = pump();
        queue.push_chunk(vec![1i16; 4800]);
        queue.push_chunk(vec![2i16; 4800]);
        queue.unlock();

        let input = vec![0i16; 4800];
        let mut output = vec![0i16; 4800];
        pump.process_audio(&input, &mut output);
        assert!(ctx.ptt_state());
        pump.process_audio(&input, &mut output);
        assert!(ctx.ptt_state());
        assert!(queue.is_empty());
    }
}
