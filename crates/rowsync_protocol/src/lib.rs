//! # rowsync Protocol
//!
//! The step-coded session protocol that carries a synchronization over HTTP.
//!
//! This crate provides:
//! - [`StepCode`], the nine steps of a web session
//! - Header names and the [`RequestHeaders`] parser
//! - Request/response bodies for every step
//! - [`ErrorBody`] and [`ErrorKind`], the wire error taxonomy
//! - [`HttpRequest`]/[`HttpResponse`] framing and the [`HttpHandler`] seam
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod http;
mod messages;
mod step;

pub use error::{ErrorBody, ErrorKind, ProtocolError, ProtocolResult};
pub use http::{
    Headers, HttpHandler, HttpRequest, HttpResponse, RequestHeaders, SerializationHeader,
    HEADER_ACCEPT_ENCODING, HEADER_CONTENT_ENCODING, HEADER_CONVERTER, HEADER_ERROR, HEADER_HASH,
    HEADER_SCOPE_NAME, HEADER_SERIALIZATION_FORMAT, HEADER_SESSION_ID, HEADER_STEP,
    STATUS_BAD_REQUEST, STATUS_OK,
};
pub use messages::{
    BatchPartPayload, ChangesSummary, EndDownloadResponse, EnsureScopeRequest, EnsureScopeResponse,
    EstimatedChangesRequest, EstimatedChangesResponse, GetChangesRequest, GetMoreChangesRequest,
    GetSnapshotRequest, PartResponse, SendChangesRequest, SendChangesResponse, SessionRequest,
    SnapshotResponse, StepMessage,
};
pub use step::StepCode;
