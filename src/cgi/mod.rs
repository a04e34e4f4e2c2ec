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

//! Application-facing request model shared by the CGI and FastCGI
//! transports, and the CGI Environment Decoder / One-Shot Driver that
//! produce it.

pub mod decode;
pub mod driver;

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::query::QueryMap;

/// The parsed request body, dispatched on content type per `spec.md`
/// §4.4.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// `application/json` body, successfully parsed.
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded` body.
    Form(QueryMap),
    /// Any `text/*`, `application/xml`, or content-type-less non-empty
    /// body, and a JSON body that failed to parse.
    Text(String),
    /// Binary content type, or an empty body.
    Null,
}

/// An HTTP-shaped request reconstructed from CGI/FastCGI parameters and a
/// request body, per `spec.md` §3.
#[derive(Debug, Clone)]
pub struct Request {
    /// Uppercased request method; defaults to `GET` when absent.
    pub method: String,
    /// The raw request URI, including any query component.
    pub uri: String,
    /// The URI with any query component removed.
    pub path: String,
    /// Ordered query mapping decoded from `QUERY_STRING`.
    pub query: QueryMap,
    /// Headers derived from `HTTP_*` parameters (lowercase, hyphenated),
    /// plus `content-type`/`content-length` from their unprefixed
    /// parameter names.
    pub headers: IndexMap<String, String>,
    /// Cookies decoded from the `cookie` header.
    pub cookies: HashMap<String, String>,
    /// The content type as sent by the client, if any.
    pub content_type: Option<String>,
    /// The parsed body.
    pub body: Body,
    /// The raw, undecoded body bytes.
    pub raw_body: Vec<u8>,
    /// `REMOTE_ADDR`, if present.
    pub remote_addr: Option<String>,
    /// `REMOTE_PORT`, if present and parsable.
    pub remote_port: Option<u16>,
    /// `SERVER_NAME`, if present.
    pub server_name: Option<String>,
    /// `SERVER_PORT`, if present and parsable.
    pub server_port: Option<u16>,
    /// The synthesized absolute URL, per `spec.md` §4.4's URL synthesis
    /// rules.
    pub url: String,
    /// The full CGI parameter map this request was decoded from, kept
    /// around so handlers can reach parameters `spec.md` §6 lists but this
    /// struct doesn't promote to a dedicated field (e.g. `SERVER_PROTOCOL`,
    /// `AUTH_TYPE`).
    pub params: HashMap<String, String>,
}

impl Request {
    /// Methods whose body is read and parsed; all others get an empty
    /// body and a `Body::Null` parsed form, per `spec.md` §4.4.
    pub(crate) fn methods_with_body() -> HashSet<&'static str> {
        ["POST", "PUT", "PATCH"].into_iter().collect()
    }
}
