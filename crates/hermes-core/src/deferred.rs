//! Deferred transport actions.
//!
//! Business methods run on worker threads and cannot touch the
//! [`ResponseWriter`]. A [`DeferredResponse`] records the operations they want
//! instead, in order, together with an optional final payload and status. The
//! coordinator replays the log once the worker is done.
//!
//! Replay consumes the log, so a log can be applied at most once. Replaying
//! against a writer that is already finished is rejected before any action is
//! applied.
//!
//! ```
//! use hermes_core::{DeferredResponse, ResponseWriter};
//! use http::StatusCode;
//!
//! let log = DeferredResponse::new("created")
//!     .with_status(StatusCode::CREATED)
//!     .set_header("x-object-id", "42");
//!
//! let mut writer = ResponseWriter::new();
//! log.replay(&mut writer).unwrap();
//!
//! assert!(writer.is_finished());
//! assert_eq!(writer.status(), StatusCode::CREATED);
//! assert_eq!(writer.body(), b"created");
//! ```

use std::fmt;

use http::StatusCode;

use crate::transport::{Payload, ResponseWriter, TransportError};

/// A single recorded transport operation.
pub enum TransportAction {
    /// Set the status code.
    SetStatus(StatusCode),
    /// Set a header, replacing existing values.
    SetHeader(String, String),
    /// Append a header value.
    AddHeader(String, String),
    /// Remove a header.
    ClearHeader(String),
    /// Append a body chunk.
    Write(Payload),
    /// Redirect and complete.
    Redirect(String, StatusCode),
    /// Complete with an optional final chunk.
    Finish(Option<Payload>),
    /// Complete with an error body.
    SendError(StatusCode, String),
    /// Any other operation on the writer.
    Custom(Box<dyn FnOnce(&mut ResponseWriter) -> Result<(), TransportError> + Send>),
}

impl fmt::Debug for TransportAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetStatus(status) => f.debug_tuple("SetStatus").field(status).finish(),
            Self::SetHeader(name, value) => {
                f.debug_tuple("SetHeader").field(name).field(value).finish()
            }
            Self::AddHeader(name, value) => {
                f.debug_tuple("AddHeader").field(name).field(value).finish()
            }
            Self::ClearHeader(name) => f.debug_tuple("ClearHeader").field(name).finish(),
            Self::Write(payload) => f.debug_tuple("Write").field(payload).finish(),
            Self::Redirect(location, status) => f
                .debug_tuple("Redirect")
                .field(location)
                .field(status)
                .finish(),
            Self::Finish(payload) => f.debug_tuple("Finish").field(payload).finish(),
            Self::SendError(status, message) => f
                .debug_tuple("SendError")
                .field(status)
                .field(message)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl TransportAction {
    fn apply(self, writer: &mut ResponseWriter) -> Result<(), TransportError> {
        match self {
            Self::SetStatus(status) => writer.set_status(status),
            Self::SetHeader(name, value) => writer.set_header(&name, &value),
            Self::AddHeader(name, value) => writer.add_header(&name, &value),
            Self::ClearHeader(name) => writer.clear_header(&name),
            Self::Write(payload) => writer.write(payload),
            Self::Redirect(location, status) => writer.redirect(&location, status),
            Self::Finish(payload) => writer.finish(payload),
            Self::SendError(status, message) => writer.send_error(status, &message),
            Self::Custom(op) => op(writer),
        }
    }
}

/// Ordered log of transport operations built on a worker.
#[derive(Debug, Default)]
pub struct DeferredResponse {
    payload: Option<Payload>,
    status: Option<StatusCode>,
    actions: Vec<TransportAction>,
}

impl DeferredResponse {
    /// Creates a log that completes with `payload` unless an action finishes first.
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: Some(payload.into()),
            status: None,
            actions: Vec::new(),
        }
    }

    /// Creates a log with no final payload.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sets the status applied before any recorded action.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Records an arbitrary action.
    #[must_use]
    pub fn record(mut self, action: TransportAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Records a status change.
    #[must_use]
    pub fn set_status(self, status: StatusCode) -> Self {
        self.record(TransportAction::SetStatus(status))
    }

    /// Records a header assignment.
    #[must_use]
    pub fn set_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.record(TransportAction::SetHeader(name.into(), value.into()))
    }

    /// Records a header append.
    #[must_use]
    pub fn add_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.record(TransportAction::AddHeader(name.into(), value.into()))
    }

    /// Records a header removal.
    #[must_use]
    pub fn clear_header(self, name: impl Into<String>) -> Self {
        self.record(TransportAction::ClearHeader(name.into()))
    }

    /// Records a body write.
    #[must_use]
    pub fn write(self, chunk: impl Into<Payload>) -> Self {
        self.record(TransportAction::Write(chunk.into()))
    }

    /// Records a redirect.
    #[must_use]
    pub fn redirect(self, location: impl Into<String>, status: StatusCode) -> Self {
        self.record(TransportAction::Redirect(location.into(), status))
    }

    /// Records an explicit completion.
    #[must_use]
    pub fn finish(self, payload: Option<Payload>) -> Self {
        self.record(TransportAction::Finish(payload))
    }

    /// Records an error completion.
    #[must_use]
    pub fn send_error(self, status: StatusCode, message: impl Into<String>) -> Self {
        self.record(TransportAction::SendError(status, message.into()))
    }

    /// Records a closure run against the writer on the coordinator.
    #[must_use]
    pub fn custom<F>(self, op: F) -> Self
    where
        F: FnOnce(&mut ResponseWriter) -> Result<(), TransportError> + Send + 'static,
    {
        self.record(TransportAction::Custom(Box::new(op)))
    }

    /// Number of recorded actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns `true` if no action was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// The status applied before replay, if any.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    /// Drops diagnostic keys from the final payload and every recorded body.
    pub fn strip_diagnostics(&mut self) {
        let recorded = self.actions.iter_mut().filter_map(|action| match action {
            TransportAction::Write(payload) | TransportAction::Finish(Some(payload)) => {
                Some(payload)
            }
            _ => None,
        });
        for payload in self.payload.iter_mut().chain(recorded) {
            payload.strip_diagnostics();
        }
    }

    /// Applies the log to `writer`.
    ///
    /// Sets the status, applies every action in recorded order, then finishes
    /// with the payload if no action already finished the response. Stops at
    /// the first failing action.
    pub fn replay(self, writer: &mut ResponseWriter) -> Result<(), TransportError> {
        if writer.is_finished() {
            return Err(TransportError::AlreadyFinished);
        }
        if let Some(status) = self.status {
            writer.set_status(status)?;
        }
        for action in self.actions {
            action.apply(writer)?;
        }
        if !writer.is_finished() {
            writer.finish(self.payload)?;
        }
        Ok(())
    }
}
