// Copyright 2026 the Cadence Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy.
//!
//! Only registration and configuration mistakes surface as errors to the
//! embedding application. Everything that can go wrong while frames are
//! running (task failures, write failures, probe failures) is contained by
//! the component that observed it and turned into a degraded mode of
//! operation plus a log line.

use crate::task::TaskId;

/// Convenience result type used across the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Top-level error returned by [`Runtime`](crate::runtime::Runtime) APIs.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Task registration failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A configuration value was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A render-surface write failed.
    #[error(transparent)]
    Surface(#[from] SurfaceError),
}

/// Failure reported by a task's `tick`.
///
/// Returning an error disables the task for the rest of the session.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The task gave up with a message.
    #[error("task failed: {0}")]
    Failed(String),

    /// The task panicked; the payload message is captured when it is a string.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    /// Build a [`TaskError::Failed`] value.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Errors from task registration and lookup.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// A task with this id is already registered.
    #[error("task `{0}` is already registered")]
    Duplicate(TaskId),

    /// No task with this id is registered.
    #[error("task `{0}` is not registered")]
    Unknown(TaskId),

    /// The target rate must be a finite, positive number of hertz.
    #[error("invalid target rate {rate} Hz for task `{id}`")]
    InvalidRate {
        /// Offending task.
        id: TaskId,
        /// Offending rate.
        rate: f64,
    },
}

/// A single render-surface write failed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// The value was rejected for this property.
    #[error("invalid value `{value}` for `{property}`")]
    InvalidValue {
        /// Property name.
        property: String,
        /// Rejected value.
        value: String,
    },

    /// The target handle does not resolve to a live element.
    #[error("unknown target {0:?}")]
    UnknownTarget(crate::batch::TargetId),

    /// The platform reported an error.
    #[error("platform error: {0}")]
    Platform(String),
}

/// A configuration value or settings key was rejected.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The settings key is not recognized.
    #[error("unknown setting `{0}`")]
    UnknownKey(String),

    /// The value has the wrong type or is out of range.
    #[error("invalid value for `{key}`: {reason}")]
    InvalidValue {
        /// Settings key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A configuration document failed to parse.
    #[error("configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_owned(),
            reason: reason.into(),
        }
    }
}

/// A capability probe could not produce a reading.
///
/// The classifier treats every probe error as "unsupported", which grades
/// the affected category as low.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The platform does not expose this capability.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    /// Probing threw or returned garbage.
    #[error("probe failed: {0}")]
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offender() {
        let err = Error::from(RegistryError::Duplicate(TaskId::from("sparkles")));
        assert_eq!(err.to_string(), "task `sparkles` is already registered");

        let err = Error::from(ConfigError::UnknownKey("batch.size".into()));
        assert_eq!(err.to_string(), "unknown setting `batch.size`");

        let err = TaskError::failed("gradient lost its canvas");
        assert_eq!(err.to_string(), "task failed: gradient lost its canvas");
    }

    #[test]
    fn parse_errors_convert() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ConfigError = parse.into();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
