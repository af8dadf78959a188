//! Soundcard HF modem/TNC pipeline
//!
//! Continuously ingests an audio stream, fans samples out to per-mode
//! decode workers, reassembles transmit jobs into keyed modulated audio,
//! and classifies channel occupancy for the data-link layer above. The
//! modulation/FEC mathematics live behind the [`engine::CodecEngine`]
//! trait; radio control behind [`keying::RigControl`].

pub mod activity;
pub mod audio;
pub mod channel;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod keying;
pub mod mode;
pub mod modem;
pub mod resample;
pub mod ring;
pub mod sim;
pub mod transmit;

pub use channel::{ChannelShared, CodecChannel, DecodedFrame, FrameSinks};
pub use context::SharedContext;
pub use engine::{CodecEngine, RxStatus};
pub use error::{ModemError, Result};
pub use keying::{DummyRig, RigControl, RigKeyingController};
pub use mode::{ChannelId, ModeKind, ModeSpec};
pub use modem::{Modem, ModemConfig, ModemEvent, ReceiveToggles, RigCommand};
pub use transmit::{ModulatedSampleQueue, TransmitJob, TransmitReport};

// Audio configuration
pub const AUDIO_SAMPLE_RATE: usize = 48_000;
pub const MODEM_SAMPLE_RATE: usize = 8_000;
pub const AUDIO_FRAMES_PER_BUFFER_RX: usize = 4800;
pub const AUDIO_FRAMES_PER_BUFFER_TX: usize = 4800;

/// Per-channel receive ring capacity in modem-rate samples.
pub const RX_RING_CAPACITY: usize = 2 * AUDIO_FRAMES_PER_BUFFER_RX;

// Spectrum analysis
pub const FFT_MIN_SAMPLES: usize = 128;
pub const FFT_MAX_BINS: usize = 315;
pub const BUSY_DB_MARGIN: f32 = 15.0;
pub const NUM_BUSY_SLOTS: usize = 5;
