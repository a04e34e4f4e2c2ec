// Copyright 2022 jmjoy
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types and result type aliases for the FastCGI/CGI runtime.
//!
//! This module defines the error kinds that can occur while decoding the
//! wire protocol, assembling requests, and driving the response encoder.

use crate::record::RecordType;

/// Result type alias for runtime operations.
pub type FcgiResult<T> = Result<T, FcgiError>;

/// Error kinds that can occur in the request-serving runtime.
#[derive(Debug, thiserror::Error)]
pub enum FcgiError {
    /// Wrapper of `std::io::Error`.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Bad protocol version or impossible record lengths. The connection
    /// carrying this record must be dropped.
    #[error("malformed FastCGI record: {reason}")]
    MalformedRecord {
        /// Human readable reason for rejection.
        reason: String,
    },

    /// Truncated name/value pair stream. The owning Pending Request is
    /// dropped and an `END_REQUEST` with app-status 1 is sent.
    #[error("malformed name/value params stream: {reason}")]
    MalformedParams {
        /// Human readable reason for rejection.
        reason: String,
    },

    /// A record referenced a request id that isn't known, or arrived after
    /// its Pending Request had already been dispatched. The connection must
    /// be dropped.
    #[error("unexpected record of type {record_type:?} for request id {request_id}")]
    UnexpectedRecord {
        /// The record type that was unexpected.
        record_type: RecordType,
        /// The request id the record named.
        request_id: u16,
    },

    /// `BEGIN_REQUEST` named a role other than `RESPONDER`.
    #[error("unsupported FastCGI role {role} for request id {request_id}")]
    UnknownRole {
        /// The raw role value from the wire.
        role: u16,
        /// The request id the record named.
        request_id: u16,
    },

    /// Attempted to mutate status/headers after they were already
    /// serialized onto the wire.
    #[error("response headers have already been sent")]
    HeadersSent,

    /// Attempted to write to or end a response that has already ended.
    #[error("response has already finished")]
    AlreadyFinished,

    /// The application handler returned an error or panicked.
    #[error("request handler failed: {reason}")]
    HandlerFailure {
        /// Human readable description of the failure.
        reason: String,
    },

    /// I/O failure on the underlying transport; the owning connection is
    /// destroyed and the failure is surfaced to the Server Core.
    #[error("transport failure: {0}")]
    TransportFailure(#[source] std::io::Error),
}
