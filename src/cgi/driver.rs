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

//! CGI One-Shot Driver: the classic, one-process-per-request transport
//! (`spec.md` §4.8). Reads the environment and at most `CONTENT_LENGTH`
//! bytes of standard input, builds a [`Request`](crate::cgi::Request) via
//! the CGI Environment Decoder, invokes the application handler through
//! the Handler Invocation Glue, and writes the serialized response to
//! standard output.
//!
//! Grounded in `george-hopkins-rust-cgi`'s top-level flow of reading
//! `std::env::vars()` plus stdin and writing a response back to stdout,
//! generalized to route through this crate's own [`Request`]/[`Response`]
//! types and [`RequestHandler`] trait instead of building an `http::Request`
//! directly.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use crate::cgi::Request;
use crate::error::FcgiResult;
use crate::handler::{self, RequestHandler};
use crate::response::Response;

/// Runs one CGI request end to end against the process environment and
/// standard streams, and returns the [`Response`] that was written to
/// standard output (primarily useful for tests; callers driving a real
/// CGI process can ignore the return value).
pub async fn run<H: RequestHandler>(handler: &H) -> FcgiResult<Response> {
    let params = env_params();
    let body = read_body(&params)?;
    let request = super::decode::decode_request(&params, &body);

    let mut response = Response::new();
    handler::invoke(handler, request, &mut response).await;

    let bytes = response.serialize();
    let mut stdout = io::stdout().lock();
    stdout.write_all(&bytes)?;
    stdout.flush()?;
    Ok(response)
}

/// Collects the process environment into the flat parameter map the CGI
/// Environment Decoder expects, mirroring `std::env::vars()`'s role in the
/// reference implementation.
fn env_params() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Reads at most `CONTENT_LENGTH` bytes from standard input, per `spec.md`
/// §4.4/§4.8 ("bodies are read up to the declared length only"). A missing
/// or unparsable `CONTENT_LENGTH` is treated as zero.
fn read_body(params: &HashMap<String, String>) -> FcgiResult<Vec<u8>> {
    let content_length: usize = params
        .get("CONTENT_LENGTH")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if content_length == 0 {
        return Ok(Vec::new());
    }

    let mut body = Vec::with_capacity(content_length);
    io::stdin()
        .lock()
        .take(content_length as u64)
        .read_to_end(&mut body)?;
    Ok(body)
}
