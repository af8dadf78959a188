use thiserror::Error;

use crate::mode::ModeKind;

#[derive(Debug, Error)]
pub enum ModemError {
    #[error("ring buffer overflow: {pushed} samples will not fit ({nbuffer}/{size} used)")]
    BufferOverflow {
        pushed: usize,
        nbuffer: usize,
        size: usize,
    },

    #[error("ring buffer underrun: requested {requested}, only {available} buffered")]
    BufferUnderrun { requested: usize, available: usize },

    #[error("no transmit engine for mode {0}")]
    UnknownMode(ModeKind),

    #[error("audio backend unavailable: {0}")]
    AudioBackend(String),

    #[error("rig control: {0}")]
    Rig(String),

    #[error("worker thread spawn failed: {0}")]
    WorkerSpawn(String),

    #[error("worker queue closed")]
    QueueClosed,
}

pub type Result<T> = std::result::Result<T, ModemError>;
