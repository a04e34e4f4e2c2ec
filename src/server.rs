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

//! Server Core: binds the configured listen endpoint, accepts
//! connections up to `max_conns`, and spawns one Connection Handler task
//! per accepted connection, per `spec.md` §4.7.
//!
//! Mirrors the teacher's own split between a generic driver and the
//! concrete `TcpStream`/`UnixStream` transports it's instantiated over --
//! `conn::handle` stays generic over `AsyncRead + AsyncWrite`, and this
//! module is where that generic is finally pinned down to a real socket
//! type, one per listener kind.

use std::sync::Arc;

use tokio::net::{TcpListener, UnixListener};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::{ListenAddr, ServerConfig};
use crate::conn;
use crate::error::{FcgiError, FcgiResult};
use crate::handler::RequestHandler;
use crate::shutdown::Shutdown;

/// A bound, not-yet-running FastCGI server.
pub struct Server<H> {
    config: ServerConfig,
    handler: Arc<H>,
    shutdown: Shutdown,
}

impl<H: RequestHandler + 'static> Server<H> {
    /// Pairs a configuration with the application handler that will serve
    /// every request accepted on it.
    pub fn new(config: ServerConfig, handler: H) -> Self {
        Self {
            config,
            handler: Arc::new(handler),
            shutdown: Shutdown::new(),
        }
    }

    /// Stops accepting new connections and signals every open connection's
    /// shutting-down flag (`spec.md` §3), so an idle keep-alive connection
    /// closes on its own rather than blocking the drain indefinitely. Safe
    /// to call from another task while
    /// [`serve`](Self::serve)/[`serve_with_shutdown`](Self::serve_with_shutdown)
    /// is running; idempotent.
    pub fn shutdown(&self) {
        self.shutdown.signal();
    }

    /// Binds the configured listen endpoint and serves connections until
    /// [`shutdown`](Self::shutdown) is called or the listener errors. Each
    /// connection is handled on its own spawned task; at most `max_conns`
    /// run concurrently, enforced with a semaphore acquired before accept
    /// and released when the connection handler returns, per `spec.md`
    /// §4.7's "refuse, don't crash" rule.
    pub async fn serve(&self) -> FcgiResult<()> {
        self.serve_with_shutdown(|| {}).await
    }

    /// Like [`serve`](Self::serve), but invokes `on_shutdown` once the
    /// accept loop has stopped and every spawned connection task, tracked
    /// in a `JoinSet`, has finished -- per `spec.md` §4.7's requirement
    /// that a shutdown not abandon in-flight requests.
    pub async fn serve_with_shutdown<F>(&self, on_shutdown: F) -> FcgiResult<()>
    where
        F: FnOnce(),
    {
        let limiter = Arc::new(Semaphore::new(self.config.max_conns));
        let mut tasks = JoinSet::new();

        let result = if self.shutdown.is_set() {
            Ok(())
        } else {
            match &self.config.listen {
                ListenAddr::Tcp(addr) => {
                    let listener = TcpListener::bind(addr).await.map_err(FcgiError::TransportFailure)?;
                    tracing::info!(%addr, "FastCGI server listening");
                    loop {
                        tokio::select! {
                            biased;
                            _ = self.shutdown.notified() => break Ok(()),
                            accepted = listener.accept() => {
                                let (stream, peer) = match accepted {
                                    Ok(pair) => pair,
                                    Err(err) => break Err(FcgiError::TransportFailure(err)),
                                };
                                self.spawn_connection(&mut tasks, stream, limiter.clone(), peer.to_string());
                            }
                        }
                    }
                }
                ListenAddr::Unix(path) => {
                    let listener = UnixListener::bind(path).map_err(FcgiError::TransportFailure)?;
                    tracing::info!(path = %path.display(), "FastCGI server listening");
                    loop {
                        tokio::select! {
                            biased;
                            _ = self.shutdown.notified() => break Ok(()),
                            accepted = listener.accept() => {
                                let (stream, _) = match accepted {
                                    Ok(pair) => pair,
                                    Err(err) => break Err(FcgiError::TransportFailure(err)),
                                };
                                self.spawn_connection(&mut tasks, stream, limiter.clone(), path.display().to_string());
                            }
                        }
                    }
                }
            }
        };

        while tasks.join_next().await.is_some() {}
        on_shutdown();
        result
    }

    fn spawn_connection<S>(&self, tasks: &mut JoinSet<()>, stream: S, limiter: Arc<Semaphore>, peer: String)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin + 'static,
    {
        let handler = self.handler.clone();
        let max_conns = self.config.max_conns;
        let max_reqs = self.config.max_reqs;
        let shutdown = self.shutdown.clone();
        tasks.spawn(async move {
            let Ok(permit) = limiter.acquire_owned().await else {
                return;
            };
            tracing::debug!(%peer, "accepted connection");
            if let Err(err) = conn::handle(stream, handler.as_ref(), max_conns, max_reqs, shutdown).await {
                tracing::warn!(%peer, error = %err, "connection ended with an error");
            }
            drop(permit);
        });
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    use super::*;
    use crate::cgi::Request;
    use crate::record::{self, Decoded, Role};
    use crate::response::Response;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn call(&self, req: Request, res: &mut Response) -> FcgiResult<()> {
            res.send(req.path)?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn serves_a_request_over_a_real_tcp_socket() {
        let config = ServerConfig::new(ListenAddr::Tcp("127.0.0.1:0".parse().unwrap()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ServerConfig { listen: ListenAddr::Tcp(addr), ..config };
        let server = Arc::new(Server::new(config, Echo));
        let spawned = server.clone();
        tokio::spawn(async move { spawned.serve().await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut input = Vec::new();
        input.extend(record::encode_record(
            record::RecordType::BeginRequest,
            1,
            &record::encode_begin_request_body(Role::Responder, false),
        ));
        input.extend(record::encode_record(
            record::RecordType::Params,
            1,
            &crate::nvpair::encode_pairs(vec![("REQUEST_URI", "/ping")]),
        ));
        input.extend(record::encode_record(record::RecordType::Params, 1, &[]));
        input.extend(record::encode_record(record::RecordType::Stdin, 1, &[]));
        client.write_all(&input).await.unwrap();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();

        let Decoded::Record { header, content, .. } = record::decode_record(&out).unwrap() else {
            panic!("expected a record");
        };
        assert_eq!(header.r#type, record::RecordType::Stdout);
        assert!(String::from_utf8_lossy(content).contains("/ping"));
    }

    #[tokio::test]
    async fn shutdown_stops_the_accept_loop_and_waits_for_the_completion_callback() {
        let config = ServerConfig::new(ListenAddr::Tcp("127.0.0.1:0".parse().unwrap()));
        let server = Arc::new(Server::new(config, Echo));
        let spawned = server.clone();
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let done_flag = done.clone();
        let task = tokio::spawn(async move {
            spawned
                .serve_with_shutdown(move || {
                    done_flag.store(true, std::sync::atomic::Ordering::SeqCst);
                })
                .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        server.shutdown();
        task.await.unwrap().unwrap();
        assert!(done.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn shutdown_called_before_serve_starts_makes_serve_return_immediately() {
        let config = ServerConfig::new(ListenAddr::Tcp("127.0.0.1:0".parse().unwrap()));
        let server = Server::new(config, Echo);
        server.shutdown();
        server.serve().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_destroys_an_idle_keep_alive_connection() {
        let config = ServerConfig::new(ListenAddr::Tcp("127.0.0.1:0".parse().unwrap()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ServerConfig { listen: ListenAddr::Tcp(addr), ..config };
        let server = Arc::new(Server::new(config, Echo));
        let spawned = server.clone();
        let serve_task = tokio::spawn(async move { spawned.serve().await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut input = Vec::new();
        input.extend(record::encode_record(
            record::RecordType::BeginRequest,
            1,
            &record::encode_begin_request_body(Role::Responder, true),
        ));
        input.extend(record::encode_record(
            record::RecordType::Params,
            1,
            &crate::nvpair::encode_pairs(vec![("REQUEST_URI", "/ping")]),
        ));
        input.extend(record::encode_record(record::RecordType::Params, 1, &[]));
        input.extend(record::encode_record(record::RecordType::Stdin, 1, &[]));
        client.write_all(&input).await.unwrap();

        let mut buf = [0u8; 1024];
        client.read(&mut buf).await.unwrap();

        // the connection asked to be kept alive and no further bytes are
        // coming, so only a shutdown signal can close it.
        server.shutdown();

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        serve_task.await.unwrap().unwrap();
    }
}
