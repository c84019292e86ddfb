use thiserror::Error;

use crate::bus::BusState;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address must be 16 hex characters, got {0}")]
    Length(usize),
    #[error("address contains non-hex character {0:?}")]
    InvalidDigit(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("bus busy ({0:?})")]
    Busy(BusState),
    #[error("no conversion in progress")]
    NotConverting,
    #[error("no scan in progress")]
    NotScanning,
    #[error("no devices responded on the bus")]
    NoDevices,
    #[error("bus i/o failed: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefsError {
    #[error("preference {key} has the wrong type")]
    WrongType { key: String },
    #[error("value for {key} is out of range")]
    OutOfRange { key: String },
    #[error("name longer than {max} characters")]
    NameTooLong { max: usize },
    #[error("preference store unavailable: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("unknown relay {0}")]
    UnknownRelay(u8),
    #[error("queue full")]
    QueueFull,
    #[error("queue closed")]
    Closed,
}
