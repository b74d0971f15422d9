//! Error taxonomy. Nothing here is fatal: device errors degrade to "no data
//! this tick", registry errors go back to the caller, settings errors are
//! logged and skipped.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Failure to query one device during a poll tick
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("device {device} is unavailable: {reason}")]
    Unavailable { device: String, reason: String },

    #[error("device {device} does not support the {method} query method")]
    CapabilityUnsupported { device: String, method: &'static str },

    #[error("query for device {device} did not finish within {timeout:?}")]
    TimedOut { device: String, timeout: Duration },

    #[error("query for device {device} failed: {source}")]
    Query {
        device: String,
        #[source]
        source: io::Error,
    },
}

impl DeviceError {
    pub fn unavailable(device: impl Into<String>, reason: impl Into<String>) -> Self {
        DeviceError::Unavailable {
            device: device.into(),
            reason: reason.into(),
        }
    }

    pub fn query(device: impl Into<String>, source: io::Error) -> Self {
        DeviceError::Query {
            device: device.into(),
            source,
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a {kind} device with identity {identity} is already registered")]
    DuplicateIdentity { kind: &'static str, identity: String },
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("malformed {setting} segment {segment:?}: {reason}")]
    CorruptPersistedState {
        setting: &'static str,
        segment: String,
        reason: String,
    },

    #[error("settings file error: {0}")]
    Io(#[from] io::Error),

    #[error("settings format error: {0}")]
    Json(#[from] serde_json::Error),
}
