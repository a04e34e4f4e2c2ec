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

//! Connection Handler: owns one transport connection, drives the Frame
//! Codec over inbound bytes, dispatches records to the right Request
//! Assembler, handles management records, and serializes outbound
//! writes, per `spec.md` §4.6.
//!
//! One task per connection (spawned by `server::Server`), processing
//! records and dispatching ready requests to the handler in sequence --
//! the "single-threaded cooperative per connection" model `spec.md` §5
//! recommends. Because reads and writes alternate on the same task,
//! outbound record order is trivially preserved without an extra lock,
//! satisfying the ordering guarantee in §5. Generic over
//! `AsyncRead + AsyncWrite`, mirroring the teacher's `Client<S, M>`
//! design (`client.rs`) of staying generic over the underlying stream
//! rather than hard-coding `TcpStream`/`UnixStream`.

use std::collections::HashMap;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::assembler::PendingRequest;
use crate::cgi;
use crate::error::{FcgiError, FcgiResult};
use crate::handler::{self, RequestHandler};
use crate::nvpair;
use crate::record::{self, Decoded, ProtocolStatus, RecordType, Role};
use crate::response::Response;
use crate::shutdown::Shutdown;

const FCGI_MAX_CONNS: &str = "FCGI_MAX_CONNS";
const FCGI_MAX_REQS: &str = "FCGI_MAX_REQS";
const FCGI_MPXS_CONNS: &str = "FCGI_MPXS_CONNS";

/// True once `keep_conn` is false and no other Pending Requests are still
/// in flight on this connection. Per `spec.md` §4.6, the connection closes
/// only once every Pending Request it carries has been dispatched and
/// ended, not the instant any single one of them finishes -- a connection
/// multiplexing several in-flight requests must keep running the others
/// even if the one that just finished asked not to be reused.
fn should_close(requests: &HashMap<u16, PendingRequest>, keep_conn: bool) -> bool {
    !keep_conn && requests.is_empty()
}

/// Drives one FastCGI connection to completion: reads records until the
/// peer closes the connection, a connection-level protocol error occurs
/// (`MALFORMED_RECORD`, `UNEXPECTED_RECORD`), every Pending Request the
/// connection carried has been dispatched/ended and the last one to
/// finish had its keep-connection flag unset (per `spec.md` §4.6's close
/// rule), or `shutdown` fires -- the Connection State's shutting-down
/// flag `spec.md` §3 names, checked at the same suspension point as the
/// next inbound read so an idle, keep-alive connection doesn't block
/// Server Core's shutdown indefinitely. `max_conns`/`max_reqs` are the
/// server's configured limits, reported back verbatim in reply to a
/// `GET_VALUES` management query.
pub async fn handle<S, H>(
    mut stream: S, handler: &H, max_conns: usize, max_reqs: usize, shutdown: Shutdown,
) -> FcgiResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: RequestHandler,
{
    let mut inbound = BytesMut::new();
    let mut requests: HashMap<u16, PendingRequest> = HashMap::new();
    let mut read_buf = vec![0u8; 64 * 1024];

    loop {
        loop {
            match record::decode_record(&inbound)? {
                Decoded::NeedMore => break,
                Decoded::Record { header, content, consumed } => {
                    let content = content.to_vec();
                    let request_type = header.r#type;
                    let request_id = header.request_id;
                    inbound.advance(consumed);

                    let should_close = dispatch_record(
                        &mut stream,
                        &request_type,
                        request_id,
                        &content,
                        &mut requests,
                        handler,
                        max_conns,
                        max_reqs,
                    )
                    .await?;
                    if should_close {
                        return Ok(());
                    }
                }
            }
        }

        tokio::select! {
            biased;
            _ = shutdown.notified() => return Ok(()),
            result = stream.read(&mut read_buf) => {
                let n = result.map_err(FcgiError::TransportFailure)?;
                if n == 0 {
                    return Ok(());
                }
                inbound.extend_from_slice(&read_buf[..n]);
            }
        }
    }
}

/// Dispatches one decoded record. Returns `Ok(true)` if the connection
/// should close now, per [`should_close`]: a `BEGIN_REQUEST` rejection, an
/// `ABORT_REQUEST`, or a completed dispatch, and no other Pending Requests
/// remain in flight on this connection.
async fn dispatch_record<S, H>(
    stream: &mut S, r#type: &RecordType, request_id: u16, content: &[u8],
    requests: &mut HashMap<u16, PendingRequest>, handler: &H, max_conns: usize, max_reqs: usize,
) -> FcgiResult<bool>
where
    S: AsyncWrite + Unpin,
    H: RequestHandler,
{
    match r#type {
        RecordType::BeginRequest => {
            if content.len() < 8 {
                return Err(FcgiError::MalformedRecord {
                    reason: "BEGIN_REQUEST content shorter than 8 bytes".to_string(),
                });
            }
            let raw_role = u16::from_be_bytes([content[0], content[1]]);
            let role = Role::from_u16(raw_role);
            let keep_conn = content[2] & 1 != 0;

            if !matches!(role, Role::Responder) {
                tracing::debug!(request_id, raw_role, "rejecting unsupported FastCGI role");
                write_record(stream, record::encode_end_request(request_id, 0, ProtocolStatus::UnknownRole))
                    .await?;
                return Ok(should_close(requests, keep_conn));
            }

            if requests.len() >= max_reqs {
                write_record(
                    stream,
                    record::encode_end_request(request_id, 0, ProtocolStatus::Overloaded),
                )
                .await?;
                return Ok(should_close(requests, keep_conn));
            }

            requests.insert(request_id, PendingRequest::new(request_id, role, keep_conn));
            Ok(false)
        }

        RecordType::Params | RecordType::Stdin => {
            let Some(pending) = requests.get_mut(&request_id) else {
                return Err(FcgiError::UnexpectedRecord {
                    record_type: *r#type,
                    request_id,
                });
            };

            let result = if matches!(r#type, RecordType::Params) {
                pending.on_params(content)
            } else {
                pending.on_stdin(content)
            };

            if let Err(err) = result {
                let keep_conn = pending.keep_conn;
                requests.remove(&request_id);
                return match err {
                    FcgiError::MalformedParams { .. } => {
                        write_record(
                            stream,
                            record::encode_end_request(request_id, 1, ProtocolStatus::RequestComplete),
                        )
                        .await?;
                        Ok(should_close(requests, keep_conn))
                    }
                    other => Err(other),
                };
            }

            if requests.get(&request_id).map(PendingRequest::is_ready).unwrap_or(false) {
                let mut pending = requests.remove(&request_id).unwrap();
                pending.mark_dispatched();
                let keep_conn = pending.keep_conn;
                dispatch_and_respond(stream, request_id, pending, handler).await?;
                return Ok(should_close(requests, keep_conn));
            }
            Ok(false)
        }

        RecordType::AbortRequest => {
            let keep_conn = requests.remove(&request_id).map(|p| p.keep_conn).unwrap_or(true);
            write_record(
                stream,
                record::encode_end_request(request_id, 0, ProtocolStatus::RequestComplete),
            )
            .await?;
            Ok(should_close(requests, keep_conn))
        }

        RecordType::GetValues if request_id == 0 => {
            let queried = nvpair::decode_pairs(content)?;
            let max_conns = max_conns.to_string();
            let max_reqs = max_reqs.to_string();
            let mut reply = Vec::new();
            for (name, _) in queried {
                let value = match name.as_str() {
                    FCGI_MAX_CONNS => Some(max_conns.as_str()),
                    FCGI_MAX_REQS => Some(max_reqs.as_str()),
                    FCGI_MPXS_CONNS => Some("1"),
                    _ => None,
                };
                if let Some(value) = value {
                    reply.push((name, value.to_string()));
                }
            }
            let pairs: Vec<(&str, &str)> = reply.iter().map(|(n, v)| (n.as_str(), v.as_str())).collect();
            let body = nvpair::encode_pairs(pairs);
            write_record(stream, record::encode_record(RecordType::GetValuesResult, 0, &body)).await?;
            Ok(false)
        }

        // `STDERR`, `DATA`, any other management record, or a genuinely
        // unrecognized type: silently dropped per `spec.md` §4.6/§9.
        _ => Ok(false),
    }
}

/// Runs the application handler for a ready Pending Request (via the
/// Handler Invocation Glue) and writes its serialized, framed response:
/// chunked `STDOUT` records, the empty `STDOUT` terminator, then
/// `END_REQUEST`, per `spec.md` §4.5's FastCGI envelope.
async fn dispatch_and_respond<S, H>(
    stream: &mut S, request_id: u16, pending: PendingRequest, handler: &H,
) -> FcgiResult<()>
where
    S: AsyncWrite + Unpin,
    H: RequestHandler,
{
    let request = cgi::decode::decode_request(&pending.params, &pending.stdin);
    let mut response = Response::new();
    handler::invoke(handler, request, &mut response).await;

    let body = response.serialize();
    let mut out = record::encode_stream_records(RecordType::Stdout, request_id, &body);
    out.extend(record::encode_end_request(request_id, 0, ProtocolStatus::RequestComplete));
    write_record(stream, out).await
}

async fn write_record<S: AsyncWrite + Unpin>(stream: &mut S, bytes: Vec<u8>) -> FcgiResult<()> {
    stream.write_all(&bytes).await.map_err(FcgiError::TransportFailure)?;
    stream.flush().await.map_err(FcgiError::TransportFailure)?;
    Ok(())
}
