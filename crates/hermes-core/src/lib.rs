//! # Hermes Core
//!
//! Core types shared by every stage of the Hermes request lifecycle.
//!
//! - [`CredentialRecord`] - identity resolved by the grant chain
//! - [`RequestContext`] - per-request state (method, arguments, identity)
//! - [`MethodResult`] - what a business method returns
//! - [`DeferredResponse`] - transport operations recorded on a worker and
//!   replayed on the coordinator
//! - [`ResponseWriter`] - the coordinator-only transport object
//! - [`HermesError`] - error taxonomy and client envelopes
//! - [`StructuredCodec`] - structured payload encoding

#![doc(html_root_url = "https://docs.rs/hermes-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod codec;
mod context;
mod credentials;
mod deferred;
mod error;
mod result;
mod transport;

pub use codec::{strip_diagnostics, CodecError, JsonCodec, StructuredCodec};
pub use context::{RequestContext, RequestId};
pub use credentials::{CredentialRecord, ANONYMOUS_USER, VISITOR_GROUP};
pub use deferred::{DeferredResponse, TransportAction};
pub use error::{ErrorCategory, ErrorDetail, ErrorEnvelope, HermesError, HermesResult};
pub use result::{returns, MethodResult};
pub use transport::{Payload, ResponseWriter, TransportError, OCTET_STREAM, STRUCTURED_CONTENT_TYPE};
