//! Sample-rate conversion between the soundcard rate and the modem's
//! native rate, using linear interpolation. Deterministic: the same input
//! always yields the same output length and values.

/// Converter pinned to one device-rate/modem-rate pair.
pub struct Resampler {
    device_rate: usize,
    modem_rate: usize,
}

impl Resampler {
    pub fn new(device_rate: usize, modem_rate: usize) -> Self {
        Self {
            device_rate,
            modem_rate,
        }
    }

    pub fn device_rate(&self) -> usize {
        self.device_rate
    }

    pub fn modem_rate(&self) -> usize {
        self.modem_rate
    }

    /// Device rate -> modem rate (receive direction).
    pub fn to_modem(&self, samples: &[i16]) -> Vec<i16> {
        resample(samples, self.device_rate, self.modem_rate)
    }

    /// Modem rate -> device rate (transmit direction).
    pub fn to_device(&self, samples: &[i16]) -> Vec<i16> {
        resample(samples, self.modem_rate, self.device_rate)
    }
}

/// Resample audio between two rates with linear interpolation.
pub fn resample(samples: &[i16], from_rate: usize, to_rate: usize) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f32 / from_rate as f32;
    let new_length = ((samples.len() as f32) * ratio).ceil() as usize;
    let mut resampled = Vec::with_capacity(new_length);

    for i in 0..new_length {
        let src_idx = i as f32 / ratio;
        let src_idx_floor = src_idx.floor() as usize;
        let src_idx_ceil = src_idx_floor + 1;
        let fraction = src_idx - (src_idx_floor as f32);

        let interpolated = if src_idx_ceil < samples.len() {
            samples[src_idx_floor] as f32 * (1.0 - fraction) + samples[src_idx_ceil] as f32 * fraction
        } else {
            samples[src_idx_floor.min(samples.len() - 1)] as f32
        };

        resampled.push(interpolated.round() as i16);
    }

    resampled
}
