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

//! Response Encoder: the mutable accumulator applications build a
//! response through, shared between the CGI and FastCGI transports, per
//! `spec.md` §4.5.
//!
//! Grounded in `slime21023-kaserve`'s `ResponseBuilder` (`network/http/
//! response.rs`) for the fluent `status(..).header(..).content_type(..)`
//! surface, and in `george-hopkins-rust-cgi`'s `serialize_response` for the
//! exact CGI byte layout (`Status: <code> <reason>\r\n`, then headers, then
//! a blank line, then the body) -- reworked from a one-shot consuming
//! builder into a mutable accumulator with a headers-sent guard, since
//! `spec.md` requires `status`/`header` to fail once headers have been
//! locked in by a `write` call. Both transports share this type: a
//! FastCGI connection frames `serialize()`'s output into `STDOUT` records
//! (see `conn::dispatch_and_respond`); CGI writes it to standard output
//! as-is (see `cgi::driver::run`).

use indexmap::IndexMap;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};

use crate::error::{FcgiError, FcgiResult};

const COOKIE_ENCODE_SET: &AsciiSet = &CONTROLS.add(b' ').add(b'=').add(b';').add(b',').add(b'%');

/// Reason phrase table from `spec.md` §4.5. Codes outside this table use
/// `Unknown`.
fn reason_phrase(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Maps the shorthand keys `spec.md` §4.5 names for `content_type` to the
/// full MIME value; any other string is used verbatim.
fn content_type_value(key: &str) -> String {
    match key {
        "html" => "text/html; charset=utf-8".to_string(),
        "text" => "text/plain; charset=utf-8".to_string(),
        "json" => "application/json; charset=utf-8".to_string(),
        "xml" => "application/xml; charset=utf-8".to_string(),
        "css" => "text/css; charset=utf-8".to_string(),
        "js" => "application/javascript; charset=utf-8".to_string(),
        other => other.to_string(),
    }
}

/// Recognized `cookie()` attributes from `spec.md` §4.5.
#[derive(Debug, Clone, Default)]
pub struct CookieOptions {
    /// `Max-Age=N`.
    pub max_age: Option<i64>,
    /// `Expires=<HTTP-date>`, formatted via `httpdate::fmt_http_date`.
    pub expires: Option<std::time::SystemTime>,
    /// `Path=…`.
    pub path: Option<String>,
    /// `Domain=…`.
    pub domain: Option<String>,
    /// `Secure`.
    pub secure: bool,
    /// `HttpOnly`.
    pub http_only: bool,
    /// `SameSite=…`.
    pub same_site: Option<String>,
}

/// A value accepted by [`Response::send`], dispatched per `spec.md` §4.5.
#[derive(Debug, Clone)]
pub enum SendBody {
    /// Equivalent to calling `end()` with no body.
    Null,
    /// Sent with content type `html` as a default.
    Text(String),
    /// Sent with content type `application/octet-stream` as a default.
    Bytes(Vec<u8>),
    /// Dispatched to [`Response::json`].
    Json(serde_json::Value),
}

impl From<()> for SendBody {
    fn from(_: ()) -> Self {
        SendBody::Null
    }
}

impl From<String> for SendBody {
    fn from(s: String) -> Self {
        SendBody::Text(s)
    }
}

impl From<&str> for SendBody {
    fn from(s: &str) -> Self {
        SendBody::Text(s.to_string())
    }
}

impl From<Vec<u8>> for SendBody {
    fn from(b: Vec<u8>) -> Self {
        SendBody::Bytes(b)
    }
}

impl From<serde_json::Value> for SendBody {
    fn from(v: serde_json::Value) -> Self {
        SendBody::Json(v)
    }
}

/// The application-facing response accumulator described in `spec.md` §3
/// and §4.5.
///
/// `status`/`header`/`content_type`/`cookie` may only mutate while
/// [`Self::headers_sent`] is false; [`Self::write`] locks that in. Once
/// [`Self::finished`] is true, no further mutation or writes are
/// accepted; `end` beyond the first call is a no-op, matching the
/// idempotence `spec.md` §8 requires.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    headers: IndexMap<String, Vec<String>>,
    cookies: Vec<String>,
    body: Vec<u8>,
    headers_sent: bool,
    finished: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    /// Creates a fresh response: status 200, no headers, no body.
    pub fn new() -> Self {
        Self {
            status: 200,
            headers: IndexMap::new(),
            cookies: Vec::new(),
            body: Vec::new(),
            headers_sent: false,
            finished: false,
        }
    }

    /// True once headers have been locked in by a `write` call (or
    /// implicitly by `end`/`send`/`json`/`redirect`).
    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// True once `end` has run to completion.
    pub fn finished(&self) -> bool {
        self.finished
    }

    fn guard_mutation(&self) -> FcgiResult<()> {
        if self.headers_sent {
            return Err(FcgiError::HeadersSent);
        }
        Ok(())
    }

    /// Sets the status code. Fails with [`FcgiError::HeadersSent`] if
    /// headers have already been serialized.
    pub fn status(&mut self, code: u16) -> FcgiResult<&mut Self> {
        self.guard_mutation()?;
        self.status = code;
        Ok(self)
    }

    /// Sets one header, replacing any prior value(s) under that name.
    pub fn header(&mut self, name: impl Into<String>, value: impl Into<String>) -> FcgiResult<&mut Self> {
        self.guard_mutation()?;
        self.headers.insert(name.into(), vec![value.into()]);
        Ok(self)
    }

    /// Sets many headers at once, in iteration order.
    pub fn headers<I, K, V>(&mut self, pairs: I) -> FcgiResult<&mut Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.guard_mutation()?;
        for (name, value) in pairs {
            self.headers.insert(name.into(), vec![value.into()]);
        }
        Ok(self)
    }

    /// Sets `Content-Type`, expanding the shorthand keys `spec.md` §4.5
    /// names (`html`, `text`, `json`, `xml`, `css`, `js`); any other
    /// string is used verbatim.
    pub fn content_type(&mut self, key: &str) -> FcgiResult<&mut Self> {
        self.header("Content-Type", content_type_value(key))
    }

    /// Appends a `Set-Cookie` line built from percent-encoded name/value
    /// plus the recognized attributes in `opts`.
    pub fn cookie(&mut self, name: &str, value: &str, opts: &CookieOptions) -> FcgiResult<&mut Self> {
        self.guard_mutation()?;
        self.cookies.push(build_cookie(name, value, opts));
        Ok(self)
    }

    /// Equivalent to `cookie(name, "", {..opts, expires: <epoch>})`.
    pub fn clear_cookie(&mut self, name: &str, opts: &CookieOptions) -> FcgiResult<&mut Self> {
        self.guard_mutation()?;
        let mut opts = opts.clone();
        opts.expires = Some(std::time::UNIX_EPOCH);
        opts.max_age = Some(0);
        self.cookies.push(build_cookie(name, "", &opts));
        Ok(self)
    }

    /// Appends bytes to the body, locking in headers on first call. Fails
    /// with [`FcgiError::AlreadyFinished`] once `end` has run.
    pub fn write(&mut self, chunk: impl AsRef<[u8]>) -> FcgiResult<&mut Self> {
        if self.finished {
            return Err(FcgiError::AlreadyFinished);
        }
        self.headers_sent = true;
        self.body.extend_from_slice(chunk.as_ref());
        Ok(self)
    }

    /// Ensures headers are serialized and marks the response finished.
    /// Idempotent: calling `end` again is a harmless no-op.
    pub fn end(&mut self, chunk: Option<&[u8]>) -> FcgiResult<&mut Self> {
        if self.finished {
            return Ok(self);
        }
        if let Some(chunk) = chunk {
            self.body.extend_from_slice(chunk);
        }
        self.headers_sent = true;
        self.finished = true;
        Ok(self)
    }

    /// Dispatches on the shape of `body` per `spec.md` §4.5's `send`
    /// table.
    pub fn send(&mut self, body: impl Into<SendBody>) -> FcgiResult<()> {
        match body.into() {
            SendBody::Null => {
                self.end(None)?;
            }
            SendBody::Text(text) => {
                if !self.headers_sent && !self.headers.contains_key("Content-Type") {
                    self.content_type("html")?;
                }
                self.end(Some(text.as_bytes()))?;
            }
            SendBody::Bytes(bytes) => {
                if !self.headers_sent && !self.headers.contains_key("Content-Type") {
                    self.content_type("application/octet-stream")?;
                }
                self.end(Some(&bytes))?;
            }
            SendBody::Json(value) => {
                self.json(&value)?;
            }
        }
        Ok(())
    }

    /// Serializes `value` as JSON, sets `Content-Type: application/json`
    /// and `Content-Length` to the encoded byte length, then ends.
    pub fn json<T: serde::Serialize>(&mut self, value: &T) -> FcgiResult<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| FcgiError::HandlerFailure { reason: e.to_string() })?;
        self.content_type("json")?;
        self.header("Content-Length", bytes.len().to_string())?;
        self.end(Some(&bytes))?;
        Ok(())
    }

    /// Sets `status` (default 302), `Location: url`, then ends.
    pub fn redirect(&mut self, url: &str, code: Option<u16>) -> FcgiResult<()> {
        self.status(code.unwrap_or(302))?;
        self.header("Location", url)?;
        self.end(None)?;
        Ok(())
    }

    /// Builds the byte sequence `spec.md` §4.5/§6 describes: `Status: ..`
    /// line, header lines (one per value for multi-valued headers, in
    /// insertion order), `Set-Cookie` lines, a blank line, then the body.
    /// Deterministic for a given sequence of mutations, and identical for
    /// both the CGI and FastCGI transports -- the FastCGI envelope is
    /// layered on top by the caller (see `conn::dispatch_and_respond`).
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(
            format!("Status: {} {}\r\n", self.status, reason_phrase(self.status)).as_bytes(),
        );
        for (name, values) in &self.headers {
            for value in values {
                out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
            }
        }
        for cookie in &self.cookies {
            out.extend_from_slice(format!("Set-Cookie: {cookie}\r\n").as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

fn build_cookie(name: &str, value: &str, opts: &CookieOptions) -> String {
    let mut out = format!(
        "{}={}",
        utf8_percent_encode(name, COOKIE_ENCODE_SET),
        utf8_percent_encode(value, COOKIE_ENCODE_SET),
    );
    if let Some(max_age) = opts.max_age {
        out.push_str(&format!("; Max-Age={max_age}"));
    }
    if let Some(expires) = opts.expires {
        out.push_str(&format!("; Expires={}", httpdate::fmt_http_date(expires)));
    }
    if let Some(path) = &opts.path {
        out.push_str(&format!("; Path={path}"));
    }
    if let Some(domain) = &opts.domain {
        out.push_str(&format!("; Domain={domain}"));
    }
    if opts.secure {
        out.push_str("; Secure");
    }
    if opts.http_only {
        out.push_str("; HttpOnly");
    }
    if let Some(same_site) = &opts.same_site {
        out.push_str(&format!("; SameSite={same_site}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_200_ok() {
        let res = Response::new();
        let bytes = res.serialize();
        assert!(bytes.starts_with(b"Status: 200 OK\r\n"));
        assert!(bytes.ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn json_sets_content_type_and_length() {
        let mut res = Response::new();
        res.json(&serde_json::json!({"message": "hi"})).unwrap();
        let bytes = res.serialize();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Content-Type: application/json; charset=utf-8\r\n"));
        assert!(text.contains("Content-Length: 15\r\n"));
        assert!(text.ends_with("{\"message\":\"hi\"}"));
    }

    #[test]
    fn redirect_defaults_to_302_and_accepts_override() {
        let mut res = Response::new();
        res.redirect("/new", None).unwrap();
        assert!(res.serialize().starts_with(b"Status: 302 Found\r\n"));

        let mut res = Response::new();
        res.redirect("/new", Some(301)).unwrap();
        let text = String::from_utf8(res.serialize()).unwrap();
        assert!(text.starts_with("Status: 301 Moved Permanently\r\n"));
        assert!(text.contains("Location: /new\r\n"));
    }

    #[test]
    fn mutation_after_headers_sent_fails() {
        let mut res = Response::new();
        res.write(b"x").unwrap();
        assert!(matches!(res.status(404), Err(FcgiError::HeadersSent)));
        assert!(matches!(res.header("X", "Y"), Err(FcgiError::HeadersSent)));
    }

    #[test]
    fn write_after_end_fails() {
        let mut res = Response::new();
        res.end(None).unwrap();
        assert!(matches!(res.write(b"x"), Err(FcgiError::AlreadyFinished)));
    }

    #[test]
    fn end_is_idempotent() {
        let mut res = Response::new();
        res.write(b"hello").unwrap();
        res.end(None).unwrap();
        let first = res.serialize();
        res.end(Some(b"more")).unwrap();
        let second = res.serialize();
        assert_eq!(first, second, "end() after finish must not append bytes");
    }

    #[test]
    fn cookie_percent_encodes_reserved_characters() {
        let mut res = Response::new();
        res.cookie("session", "abc=def=ghi", &CookieOptions::default())
            .unwrap();
        let text = String::from_utf8(res.serialize()).unwrap();
        assert!(text.contains("Set-Cookie: session=abc%3Ddef%3Dghi\r\n"));
    }

    #[test]
    fn clear_cookie_expires_in_the_past() {
        let mut res = Response::new();
        res.clear_cookie("session", &CookieOptions::default()).unwrap();
        let text = String::from_utf8(res.serialize()).unwrap();
        assert!(text.contains(&httpdate::fmt_http_date(std::time::UNIX_EPOCH)));
    }

    #[test]
    fn multi_valued_header_emits_one_line_per_value() {
        let mut res = Response::new();
        res.headers.insert("X-Tag".to_string(), vec!["a".to_string(), "b".to_string()]);
        let text = String::from_utf8(res.serialize()).unwrap();
        assert!(text.contains("X-Tag: a\r\n"));
        assert!(text.contains("X-Tag: b\r\n"));
    }
}
