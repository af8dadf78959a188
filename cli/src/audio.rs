//! Soundcard wiring: a duplex pair of cpal streams feeding the modem's
//! audio queues.
//!
//! The callbacks never block: input chunks go out over an unbounded
//! sender, output is assembled from whatever modulated chunks have
//! arrived, zero-filled otherwise.

use std::collections::VecDeque;

use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use log::{error, info};
use skywave_core::Modem;

/// Keep both streams alive for the life of the daemon.
pub struct SoundcardStreams {
    _input: cpal::Stream,
    _output: cpal::Stream,
}

pub fn start(modem: &Modem, sample_rate: u32, chunk_length: u32) -> Result<SoundcardStreams> {
    let host = cpal::default_host();
    let input_device = host
        .default_input_device()
        .context("no default audio input device")?;
    let output_device = host
        .default_output_device()
        .context("no default audio output device")?;

    let config = StreamConfig {
        channels: 1,
        sample_rate: SampleRate(sample_rate),
        buffer_size: BufferSize::Fixed(chunk_length),
    };

    info!(
        "opening audio devices: input={} output={} rate={sample_rate}",
        input_device.name().unwrap_or_else(|_| "?".into()),
        output_device.name().unwrap_or_else(|_| "?".into()),
    );

    let audio_in = modem.audio_input();
    let input = input_device
        .build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let _ = audio_in.send(data.to_vec());
            },
            |err| error!("input stream error: {err}"),
            None,
        )
        .context("building audio input stream")?;

    let audio_out = modem.audio_output();
    let mut pending: VecDeque<i16> = VecDeque::new();
    let output = output_device
        .build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                while pending.len() < data.len() {
                    match audio_out.try_recv() {
                        Ok(chunk) => pending.extend(chunk),
                        Err(_) => break,
                    }
                }
                for sample in data.iter_mut() {
                    *sample = pending.pop_front().unwrap_or(0);
                }
            },
            |err| error!("output stream error: {err}"),
            None,
        )
        .context("building audio output stream")?;

    input.play().context("starting audio input stream")?;
    output.play().context("starting audio output stream")?;

    Ok(SoundcardStreams {
        _input: input,
        _output: output,
    })
}
