// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains exception and Result definitions
use thiserror::Error;

/// Represents all kind of errors which can occur while teleoperating an arm.
///
/// None of them is fatal for the process: a device whose arm link fails keeps running
/// in haptic-only mode.
#[derive(Error, Debug)]
pub enum TeleopException {
    /// LinkUnavailable is returned if the stream connection to an arm cannot be created or
    /// established, or if the arm closed the connection.
    #[error("arm link unavailable: {message}")]
    LinkUnavailable { message: String },

    /// SendFailure is returned if a command could not be written to the arm link.
    #[error("could not send command: {message}")]
    SendFailure { message: String },

    /// QueryExhausted is returned if the arm did not answer a state query with a valid pose
    /// within the allowed number of attempts. It must never be treated as "arm at origin".
    #[error("arm state query failed after {attempts} attempts")]
    QueryExhausted {
        /// Number of query attempts that were made.
        attempts: usize,
    },

    /// ProtocolMalformed is returned if a response does not contain the expected fields.
    #[error("malformed arm response: {message}")]
    ProtocolMalformed { message: String },

    /// ConfigInvalid is returned if a configuration value cannot be used, e.g. an axis
    /// index outside of 0..=2.
    #[error("invalid configuration value for {key}: {message}")]
    ConfigInvalid { key: String, message: String },

    /// ConfigIo is returned if the configuration file cannot be written.
    #[error("configuration file error: {message}")]
    ConfigIo { message: String },

    /// ActuatorUnavailable is returned if an external hand backend cannot be initialized
    /// or rejects a command.
    #[error("hand actuator unavailable: {message}")]
    ActuatorUnavailable { message: String },

    /// NotConnected is returned when a command needs the arm link but it is disconnected.
    #[error("arm link is not connected")]
    NotConnected,

    /// RealTimeException is returned if a tick thread cannot get realtime scheduling.
    #[error("{message}")]
    RealTimeException { message: String },
}

/// creates a LinkUnavailable exception from anything printable
pub(crate) fn create_link_exception<E: ToString>(error: E) -> TeleopException {
    TeleopException::LinkUnavailable {
        message: error.to_string(),
    }
}

/// creates a SendFailure exception from anything printable
pub(crate) fn create_send_exception<E: ToString>(error: E) -> TeleopException {
    TeleopException::SendFailure {
        message: error.to_string(),
    }
}

/// Result type which can have TeleopException as Error
pub type TeleopResult<T> = Result<T, TeleopException>;
