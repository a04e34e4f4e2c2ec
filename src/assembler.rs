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

//! Request Assembler: per-(connection, request id) state machine that
//! accumulates `PARAMS` and `STDIN` records until both streams are closed,
//! per the state table in `spec.md` §4.3.

use std::collections::HashMap;

use crate::error::{FcgiError, FcgiResult};
use crate::nvpair;
use crate::record::Role;

/// Accumulated state for one in-flight request on one connection.
///
/// A `PendingRequest` is handed to the application at most once, exactly
/// when both `params_done` and `stdin_done` are set (see [`Self::poll`]).
#[derive(Debug)]
pub struct PendingRequest {
    /// The request id this state belongs to, kept for error context.
    pub request_id: u16,
    /// The role named by `BEGIN_REQUEST`. Only `Responder` is dispatched.
    pub role: Role,
    /// The keep-connection flag from `BEGIN_REQUEST`'s flags byte.
    pub keep_conn: bool,
    /// Accumulated CGI parameters, merged across `PARAMS` records.
    pub params: HashMap<String, String>,
    /// Whether the `PARAMS` stream has been closed by a zero-length record.
    pub params_done: bool,
    /// Accumulated standard-input bytes, appended across `STDIN` records.
    pub stdin: Vec<u8>,
    /// Whether the `STDIN` stream has been closed by a zero-length record.
    pub stdin_done: bool,
    /// Set once this request has been dispatched to the application, so a
    /// stray `STDIN` arriving afterwards is recognized as a protocol error.
    dispatched: bool,
}

impl PendingRequest {
    /// Creates a new Pending Request from a `BEGIN_REQUEST` record.
    pub fn new(request_id: u16, role: Role, keep_conn: bool) -> Self {
        Self {
            request_id,
            role,
            keep_conn,
            params: HashMap::new(),
            params_done: false,
            stdin: Vec::new(),
            stdin_done: false,
            dispatched: false,
        }
    }

    /// Merges a `PARAMS` record's content. An empty content closes the
    /// stream.
    pub fn on_params(&mut self, content: &[u8]) -> FcgiResult<()> {
        if content.is_empty() {
            self.params_done = true;
            return Ok(());
        }
        let pairs = nvpair::decode_pairs(content)?;
        self.params.extend(pairs);
        Ok(())
    }

    /// Appends a `STDIN` record's content. An empty content closes the
    /// stream. Fails with [`FcgiError::UnexpectedRecord`]-shaped semantics
    /// if standard input arrives after this request was already
    /// dispatched (the caller is expected to translate that into a
    /// connection-level error, per `spec.md` §4.3).
    pub fn on_stdin(&mut self, content: &[u8]) -> FcgiResult<()> {
        if self.dispatched {
            return Err(FcgiError::UnexpectedRecord {
                record_type: crate::record::RecordType::Stdin,
                request_id: self.request_id,
            });
        }
        if content.is_empty() {
            self.stdin_done = true;
            return Ok(());
        }
        if self.stdin.is_empty() {
            self.stdin = content.to_vec();
        } else {
            self.stdin.extend_from_slice(content);
        }
        Ok(())
    }

    /// True once both streams have been closed and the request is ready
    /// for dispatch to the application.
    pub fn is_ready(&self) -> bool {
        self.params_done && self.stdin_done && !self.dispatched
    }

    /// Marks this request as dispatched. Idempotent beyond the first call
    /// only in the sense that `is_ready` subsequently always reports
    /// false; a Pending Request is handed to the application at most once.
    pub fn mark_dispatched(&mut self) {
        self.dispatched = true;
    }
}
