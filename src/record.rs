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

//! Frame Codec: byte-level encode/decode of the FastCGI binary record
//! format (header + content + padding). Pure functions over byte buffers,
//! grounded in the wire layout used by `BeginRequestRec`/`Header` in the
//! upstream FastCGI client, but generalized from "build one outgoing
//! record" to "frame a byte buffer of arbitrary length into one or more
//! records, and parse an inbound buffer that may hold a partial record."

use std::fmt;

use crate::error::{FcgiError, FcgiResult};

/// FastCGI protocol version 1.
pub const VERSION_1: u8 = 1;
/// Length of the fixed FastCGI record header, in bytes.
pub const HEADER_LEN: usize = 8;
/// Maximum content length of a single record.
pub const MAX_CONTENT_LEN: usize = 0xffff;

/// FastCGI record types recognized on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Begins a request.
    BeginRequest = 1,
    /// Aborts an in-flight request.
    AbortRequest = 2,
    /// Ends a request.
    EndRequest = 3,
    /// Carries CGI parameter name/value pairs.
    Params = 4,
    /// Carries request body bytes.
    Stdin = 5,
    /// Carries response body bytes.
    Stdout = 6,
    /// Carries diagnostic output. Recognized but unused by the core.
    Stderr = 7,
    /// Carries filter-role data. Recognized but unused by the core.
    Data = 8,
    /// Queries server capabilities.
    GetValues = 9,
    /// Replies to a capabilities query.
    GetValuesResult = 10,
    /// Anything else.
    UnknownType(u8),
}

impl RecordType {
    fn from_u8(b: u8) -> Self {
        match b {
            1 => RecordType::BeginRequest,
            2 => RecordType::AbortRequest,
            3 => RecordType::EndRequest,
            4 => RecordType::Params,
            5 => RecordType::Stdin,
            6 => RecordType::Stdout,
            7 => RecordType::Stderr,
            8 => RecordType::Data,
            9 => RecordType::GetValues,
            10 => RecordType::GetValuesResult,
            other => RecordType::UnknownType(other),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            RecordType::BeginRequest => 1,
            RecordType::AbortRequest => 2,
            RecordType::EndRequest => 3,
            RecordType::Params => 4,
            RecordType::Stdin => 5,
            RecordType::Stdout => 6,
            RecordType::Stderr => 7,
            RecordType::Data => 8,
            RecordType::GetValues => 9,
            RecordType::GetValuesResult => 10,
            RecordType::UnknownType(b) => b,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// FastCGI application roles. Only `Responder` is dispatched; others
/// produce `UnknownRole` per `spec.md` §4.6/§7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Role {
    /// The application generates the HTTP response.
    Responder = 1,
    /// Authorization role. Not implemented; rejected with `UnknownRole`.
    Authorizer = 2,
    /// Filter role. Not implemented; rejected with `UnknownRole`.
    Filter = 3,
    /// Anything else.
    Other(u16),
}

impl Role {
    /// Interprets a raw role value from a `BEGIN_REQUEST` body.
    pub fn from_u16(v: u16) -> Self {
        match v {
            1 => Role::Responder,
            2 => Role::Authorizer,
            3 => Role::Filter,
            other => Role::Other(other),
        }
    }
}

/// Protocol status carried in an `END_REQUEST` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolStatus {
    /// Normal completion.
    RequestComplete = 0,
    /// The application can't multiplex connections.
    CantMultiplex = 1,
    /// New request rejected; server too busy.
    Overloaded = 2,
    /// `BEGIN_REQUEST` named a role the application doesn't support.
    UnknownRole = 3,
}

/// A decoded record header plus the bounds of its content within the
/// source buffer.
#[derive(Debug, Clone)]
pub struct RecordHeader {
    /// Record type.
    pub r#type: RecordType,
    /// Request id this record belongs to (0 for management records).
    pub request_id: u16,
    /// Length of the content in bytes.
    pub content_length: u16,
    /// Length of the trailing padding in bytes.
    pub padding_length: u8,
}

/// Outcome of attempting to decode one record from a buffer.
pub enum Decoded<'a> {
    /// Fewer than a full record's worth of bytes are present; the caller
    /// should read more and retry.
    NeedMore,
    /// A full record was decoded.
    Record {
        /// The record's header.
        header: RecordHeader,
        /// The record's content, borrowed from the input buffer.
        content: &'a [u8],
        /// Total bytes consumed from the input buffer, including padding.
        consumed: usize,
    },
}

/// Decodes one record from the head of `buf`.
///
/// Returns [`Decoded::NeedMore`] if `buf` does not yet hold a complete
/// record. Fails with [`FcgiError::MalformedRecord`] if the protocol
/// version is not 1.
pub fn decode_record(buf: &[u8]) -> FcgiResult<Decoded<'_>> {
    if buf.len() < HEADER_LEN {
        return Ok(Decoded::NeedMore);
    }

    let version = buf[0];
    if version != VERSION_1 {
        return Err(FcgiError::MalformedRecord {
            reason: format!("unsupported protocol version {version}"),
        });
    }

    let r#type = RecordType::from_u8(buf[1]);
    let request_id = be_u16(&buf[2..4]);
    let content_length = be_u16(&buf[4..6]);
    let padding_length = buf[6];

    let total = HEADER_LEN + content_length as usize + padding_length as usize;
    if buf.len() < total {
        return Ok(Decoded::NeedMore);
    }

    let content = &buf[HEADER_LEN..HEADER_LEN + content_length as usize];
    Ok(Decoded::Record {
        header: RecordHeader {
            r#type,
            request_id,
            content_length,
            padding_length,
        },
        content,
        consumed: total,
    })
}

/// Padding needed to round `content_length` up to the next multiple of 8.
pub fn padding_for(content_length: usize) -> u8 {
    ((8 - (content_length & 7)) & 7) as u8
}

/// Encodes a single record (header + content + zero-filled padding).
/// `content` must be at most [`MAX_CONTENT_LEN`] bytes; callers that have
/// more than that must chunk first (see [`encode_stream_records`]).
pub fn encode_record(r#type: RecordType, request_id: u16, content: &[u8]) -> Vec<u8> {
    debug_assert!(content.len() <= MAX_CONTENT_LEN);
    let padding_length = padding_for(content.len());
    let mut buf = Vec::with_capacity(HEADER_LEN + content.len() + padding_length as usize);
    buf.push(VERSION_1);
    buf.push(r#type.to_u8());
    buf.extend_from_slice(&request_id.to_be_bytes());
    buf.extend_from_slice(&(content.len() as u16).to_be_bytes());
    buf.push(padding_length);
    buf.push(0); // reserved
    buf.extend_from_slice(content);
    buf.extend(std::iter::repeat(0u8).take(padding_length as usize));
    buf
}

/// Frames `payload` into as many records as necessary (chunked at
/// [`MAX_CONTENT_LEN`] bytes each) and appends, per §4.1, a final
/// zero-length record to close the stream. Used for `STDOUT` and `PARAMS`,
/// the two stream record types the engine emits.
pub fn encode_stream_records(r#type: RecordType, request_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    if payload.is_empty() {
        out.extend(encode_record(r#type, request_id, &[]));
        return out;
    }
    for chunk in payload.chunks(MAX_CONTENT_LEN) {
        out.extend(encode_record(r#type, request_id, chunk));
    }
    out.extend(encode_record(r#type, request_id, &[]));
    out
}

/// Encodes the 8-byte body of a `BEGIN_REQUEST` record.
pub fn encode_begin_request_body(role: Role, keep_conn: bool) -> [u8; 8] {
    let role = match role {
        Role::Responder => 1u16,
        Role::Authorizer => 2,
        Role::Filter => 3,
        Role::Other(v) => v,
    };
    let mut body = [0u8; 8];
    body[0..2].copy_from_slice(&role.to_be_bytes());
    body[2] = keep_conn as u8;
    body
}

/// Encodes an `END_REQUEST` record.
pub fn encode_end_request(
    request_id: u16, app_status: u32, protocol_status: ProtocolStatus,
) -> Vec<u8> {
    let mut content = Vec::with_capacity(8);
    content.extend_from_slice(&app_status.to_be_bytes());
    content.push(protocol_status as u8);
    content.extend_from_slice(&[0, 0, 0]); // reserved
    encode_record(RecordType::EndRequest, request_id, &content)
}

fn be_u16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}
