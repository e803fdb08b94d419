use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

use crate::MessageId;

/// Boxed failure returned by a handler, kept intact for the caller.
pub type HandlerError = Box<dyn StdError + Send + Sync + 'static>;

/// A command failed its own field checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }

    /// Returns an error for `field` unless `condition` holds.
    pub fn ensure(
        condition: bool,
        field: &'static str,
        message: impl Into<String>,
    ) -> Result<(), Self> {
        if condition {
            Ok(())
        } else {
            Err(Self::new(field, message))
        }
    }
}

/// Errors produced by the command and query buses.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A handler is already bound to this tag; the first one stays active.
    #[error("a handler is already registered for {type_tag}")]
    RegistrationConflict { type_tag: &'static str },

    #[error("no handler registered for {type_tag}")]
    HandlerNotFound { type_tag: &'static str },

    /// The command's self-check failed; no handler ran.
    #[error("validation failed for {type_tag}: {source}")]
    ValidationFailed {
        type_tag: &'static str,
        #[source]
        source: ValidationError,
    },

    /// The handler ran and failed.
    #[error("handler for {type_tag} failed on message {message_id}: {source}")]
    Handler {
        type_tag: &'static str,
        message_id: MessageId,
        #[source]
        source: HandlerError,
    },

    /// The tag is bound to a handler for a different message type.
    #[error("handler registered for {type_tag} does not accept this message type")]
    TypeMismatch { type_tag: &'static str },

    /// The caller stopped waiting. The handler itself keeps running.
    #[error("no result within {0:?}")]
    DeadlineExceeded(Duration),

    /// The spawned dispatch ended without delivering a result.
    #[error("dispatch task ended without a result")]
    TaskFailed,
}

impl DispatchError {
    /// Finds an error of type `E` in a handler failure's source chain.
    pub fn handler_source<E: StdError + 'static>(&self) -> Option<&E> {
        let DispatchError::Handler { source, .. } = self else {
            return None;
        };

        let mut current: Option<&(dyn StdError + 'static)> = Some(source.as_ref());
        while let Some(err) = current {
            if let Some(found) = err.downcast_ref::<E>() {
                return Some(found);
            }
            current = err.source();
        }
        None
    }

    /// Type tag of the message this error is about, when known.
    pub fn type_tag(&self) -> Option<&'static str> {
        match self {
            DispatchError::RegistrationConflict { type_tag }
            | DispatchError::HandlerNotFound { type_tag }
            | DispatchError::ValidationFailed { type_tag, .. }
            | DispatchError::Handler { type_tag, .. }
            | DispatchError::TypeMismatch { type_tag } => Some(*type_tag),
            DispatchError::DeadlineExceeded(_) | DispatchError::TaskFailed => None,
        }
    }
}
