//! Mode and channel identities.
//!
//! A `ModeKind` names one waveform the codec engine can run. A `ChannelId`
//! names one concurrently-running receive slot; the two signalling slots
//! share the same waveform but keep independent engines and buffers.

use std::fmt;

use crate::engine::CodecEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModeKind {
    Datac0,
    Datac1,
    Datac3,
    Datac4,
    Datac13,
    FskLdpc0,
    FskLdpc1,
}

impl ModeKind {
    pub const ALL: [ModeKind; 7] = [
        ModeKind::Datac0,
        ModeKind::Datac1,
        ModeKind::Datac3,
        ModeKind::Datac4,
        ModeKind::Datac13,
        ModeKind::FskLdpc0,
        ModeKind::FskLdpc1,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ModeKind::Datac0 => "datac0",
            ModeKind::Datac1 => "datac1",
            ModeKind::Datac3 => "datac3",
            ModeKind::Datac4 => "datac4",
            ModeKind::Datac13 => "datac13",
            ModeKind::FskLdpc0 => "fsk_ldpc0",
            ModeKind::FskLdpc1 => "fsk_ldpc1",
        }
    }

    /// The FSK preamble/postamble generator is known unreliable, so these
    /// modes are transmitted without framing markers.
    pub fn skips_framing(&self) -> bool {
        matches!(self, ModeKind::FskLdpc0 | ModeKind::FskLdpc1)
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One receive slot. Each slot owns a codec engine, a ring buffer and a
/// decode worker for its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// Signalling 0 - connection establishment, datac13.
    Sig0,
    /// Signalling 1 - ACK/NACK, datac13. Subject to opener dedup.
    Sig1,
    Dat0Datac1,
    Dat0Datac3,
    Dat0Datac4,
    FskLdpc0,
    FskLdpc1,
}

impl ChannelId {
    pub const ALL: [ChannelId; 7] = [
        ChannelId::Sig0,
        ChannelId::Sig1,
        ChannelId::Dat0Datac1,
        ChannelId::Dat0Datac3,
        ChannelId::Dat0Datac4,
        ChannelId::FskLdpc0,
        ChannelId::FskLdpc1,
    ];

    /// Channels consulted by the fatal-decode-error query.
    pub const DATA_CHANNELS: [ChannelId; 3] = [
        ChannelId::Dat0Datac1,
        ChannelId::Dat0Datac3,
        ChannelId::Dat0Datac4,
    ];

    /// Channels whose engines take the sync-reset and frames-per-burst
    /// controls.
    pub const BURST_DATA_CHANNELS: [ChannelId; 4] = [
        ChannelId::Dat0Datac1,
        ChannelId::Dat0Datac3,
        ChannelId::Dat0Datac4,
        ChannelId::FskLdpc0,
    ];

    pub fn mode(&self) -> ModeKind {
        match self {
            ChannelId::Sig0 | ChannelId::Sig1 => ModeKind::Datac13,
            ChannelId::Dat0Datac1 => ModeKind::Datac1,
            ChannelId::Dat0Datac3 => ModeKind::Datac3,
            ChannelId::Dat0Datac4 => ModeKind::Datac4,
            ChannelId::FskLdpc0 => ModeKind::FskLdpc0,
            ChannelId::FskLdpc1 => ModeKind::FskLdpc1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChannelId::Sig0 => "sig0-datac13",
            ChannelId::Sig1 => "sig1-datac13",
            ChannelId::Dat0Datac1 => "dat0-datac1",
            ChannelId::Dat0Datac3 => "dat0-datac3",
            ChannelId::Dat0Datac4 => "dat0-datac4",
            ChannelId::FskLdpc0 => "fsk_ldpc0",
            ChannelId::FskLdpc1 => "fsk_ldpc1",
        }
    }

    /// Position in per-channel counter arrays.
    pub fn index(&self) -> usize {
        match self {
            ChannelId::Sig0 => 0,
            ChannelId::Sig1 => 1,
            ChannelId::Dat0Datac1 => 2,
            ChannelId::Dat0Datac3 => 3,
            ChannelId::Dat0Datac4 => 4,
            ChannelId::FskLdpc0 => 5,
            ChannelId::FskLdpc1 => 6,
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Immutable per-mode size descriptor, captured once from an opened
/// engine. `nin` is deliberately absent: the required-input count adapts
/// at runtime and always comes fresh from the engine.
#[derive(Debug, Clone, Copy)]
pub struct ModeSpec {
    pub mode: ModeKind,
    pub bytes_per_frame: usize,
    pub payload_bytes_per_frame: usize,
    pub preamble_samples: usize,
    pub postamble_samples: usize,
    pub frame_samples: usize,
}

impl ModeSpec {
    pub fn from_engine(engine: &dyn CodecEngine) -> Self {
        Self {
            mode: engine.mode(),
            bytes_per_frame: engine.bytes_per_frame(),
            payload_bytes_per_frame: engine.payload_bytes_per_frame(),
            preamble_samples: engine.n_tx_preamble_modem_samples(),
            postamble_samples: engine.n_tx_postamble_modem_samples(),
            frame_samples: engine.n_tx_modem_samples(),
        }
    }

    /// Modem-rate samples of one framed burst as transmitted.
    pub fn burst_samples(&self) -> usize {
        if self.mode.skips_framing() {
            self.frame_samples
        } else {
            self.preamble_samples + self.frame_samples + self.postamble_samples
        }
    }
}

/// Frame-type tags carried in the first payload byte. Only the tags the
/// modem itself routes on are listed; everything else passes straight
/// through to the data-link layer.
pub mod frame_type {
    pub const ARQ_SESSION_OPEN: u8 = 221;
    pub const ARQ_DC_OPEN_W: u8 = 225;
    pub const ARQ_DC_OPEN_ACK_W: u8 = 226;
    pub const ARQ_DC_OPEN_N: u8 = 227;
    pub const ARQ_DC_OPEN_ACK_N: u8 = 228;

    pub const MESH_BROADCAST: u8 = 100;
    pub const MESH_SIGNALLING_PING: u8 = 101;
    pub const MESH_SIGNALLING_PING_ACK: u8 = 102;

    /// Link-session-opener variants, candidates for dedup on the sig1
    /// channel.
    pub fn is_session_opener(tag: u8) -> bool {
        matches!(
            tag,
            ARQ_SESSION_OPEN
                | ARQ_DC_OPEN_W
                | ARQ_DC_OPEN_ACK_W
                | ARQ_DC_OPEN_N
                | ARQ_DC_OPEN_ACK_N
        )
    }

    /// Mesh-network frames, routed to the mesh queue instead of the
    /// primary received-frame queue.
    pub fn is_mesh(tag: u8) -> bool {
        matches!(
            tag,
            MESH_BROADCAST | MESH_SIGNALLING_PING | MESH_SIGNALLING_PING_ACK
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_mode_mapping() {
        assert_eq!(ChannelId::Sig0.mode(), ModeKind::Datac13);
        assert_eq!(ChannelId::Sig1.mode(), ModeKind::Datac13);
        assert_eq!(ChannelId::Dat0Datac1.mode(), ModeKind::Datac1);
    }

    #[test]
    fn test_channel_indices_unique() {
        let mut seen = [false; 7];
        for id in ChannelId::ALL {
            assert!(!seen[id.index()]);
            seen[id.index()] = true;
        }
    }

    #[test]
    fn test_fsk_modes_skip_framing() {
        assert!(ModeKind::FskLdpc0.skips_framing());
        assert!(ModeKind::FskLdpc1.skips_framing());
        assert!(!ModeKind::Datac13.skips_framing());
    }

    #[test]
    fn test_mode_spec_from_engine() {
        let engine = crate::sim::SimCodec::new(ModeKind::Datac13);
        let spec = ModeSpec::from_engine(&engine);
        assert_eq!(spec.mode, ModeKind::Datac13);
        assert_eq!(spec.bytes_per_frame, 16);
        assert_eq!(spec.payload_bytes_per_frame, 14);
        assert_eq!(
            spec.burst_samples(),
            spec.preamble_samples + spec.frame_samples + spec.postamble_samples
        );
    }

    #[test]
    fn test_mode_spec_burst_without_framing() {
        let engine = crate::sim::SimCodec::new(ModeKind::FskLdpc0);
        let spec = ModeSpec::from_engine(&engine);
        assert_eq!(spec.burst_samples(), spec.frame_samples);
    }

    #[test]
    fn test_frame_type_tags() {
        assert!(frame_type::is_session_opener(frame_type::ARQ_SESSION_OPEN));
        assert!(frame_type::is_session_opener(frame_type::ARQ_DC_OPEN_ACK_N));
        assert!(!frame_type::is_session_opener(frame_type::MESH_BROADCAST));
        assert!(frame_type::is_mesh(frame_type::MESH_SIGNALLING_PING));
        assert!(!frame_type::is_mesh(0));
    }
}
