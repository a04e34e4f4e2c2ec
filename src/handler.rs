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

//! Handler Invocation Glue: wraps the application callback with the
//! post-conditions `spec.md` §4.9 requires regardless of how it
//! terminates.
//!
//! The `async fn` in a trait plus `Arc<dyn RequestHandler>` shape is
//! grounded in the teacher's own use of `async_trait` (a declared
//! dependency in `jmjoy-fastcgi-client-rs`'s `Cargo.toml`, even though the
//! client itself doesn't need object safety) -- here it is load-bearing,
//! since `server::Server` must hold one handler behind a trait object
//! shared across every spawned connection task.

use async_trait::async_trait;

use crate::cgi::Request;
use crate::error::FcgiResult;
use crate::response::Response;

/// An application request handler. Implementations receive a fully
/// assembled [`Request`] and a [`Response`] to build a reply on.
///
/// Implement this directly on a unit struct or a struct carrying shared
/// state (a database pool, a router); `#[async_trait]` gives it the
/// object safety `server::Server` needs to hold one handler behind a
/// shared reference across every spawned connection task. A bare
/// closure can't implement this trait: an `async move { .. res .. }`
/// block borrowing `res` produces a future whose type is tied to that
/// borrow's lifetime, which a fixed `Fn(..) -> Fut` bound has no way to
/// name for every call -- the same reason plain closures don't satisfy
/// `async fn` trait methods elsewhere in the ecosystem without boxing.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handles one request. Returning `Err` triggers the 500 fallback in
    /// [`invoke`]; the post-conditions apply regardless of the outcome.
    async fn call(&self, req: Request, res: &mut Response) -> FcgiResult<()>;
}

/// Invokes `handler`, then enforces `spec.md` §4.9's two post-conditions:
///
/// 1. if the callback fails and headers have not been sent, set status
///    500, content type `text/plain`, and a body of
///    `Internal Server Error: <message>`, logging the failure;
/// 2. if the callback returns without ending the response, call `end()`.
pub async fn invoke<H: RequestHandler + ?Sized>(handler: &H, req: Request, res: &mut Response) {
    let method = req.method.clone();
    let path = req.path.clone();

    if let Err(err) = handler.call(req, res).await {
        tracing::error!(%method, %path, error = %err, "request handler failed");
        if !res.headers_sent() {
            // Best-effort: these can only fail with `HeadersSent`, which
            // we've just confirmed isn't the case.
            let _ = res.status(500);
            let _ = res.content_type("text");
            let _ = res.write(format!("Internal Server Error: {err}"));
        }
    }

    if !res.finished() {
        let _ = res.end(None);
    }
}
