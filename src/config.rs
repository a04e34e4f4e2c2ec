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

//! Server configuration: the listen endpoint and the `maxConns`/`maxReqs`
//! knobs `spec.md` §4.7 names, with the documented defaults (100, 100).

use std::net::SocketAddr;
use std::path::PathBuf;

/// The version string baked in at build time by `build.rs` from this
/// crate's own `Cargo.toml`, used as the default `FCGI_SERVER_SOFTWARE`-
/// style identifier a `Server` reports nowhere on the wire today but
/// keeps around for diagnostic logging.
pub const BUILD_VERSION: &str = env!("LIB_BUILD_VERSION");

/// Where the [`crate::server::Server`] listens.
#[derive(Debug, Clone)]
pub enum ListenAddr {
    /// A TCP socket address.
    Tcp(SocketAddr),
    /// A Unix domain socket path.
    Unix(PathBuf),
}

/// Server-wide configuration, per `spec.md` §4.7.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Where to accept connections.
    pub listen: ListenAddr,
    /// Maximum number of concurrent connections. Past this, new
    /// connections are refused rather than crashing the server. Default
    /// 100.
    pub max_conns: usize,
    /// Maximum number of concurrent requests (advisory; reported via
    /// `GET_VALUES_RESULT`). Default 100.
    pub max_reqs: usize,
}

impl ServerConfig {
    /// Creates a configuration for `listen` with the documented defaults.
    pub fn new(listen: ListenAddr) -> Self {
        Self {
            listen,
            max_conns: 100,
            max_reqs: 100,
        }
    }

    /// Overrides `max_conns`.
    pub fn with_max_conns(mut self, max_conns: usize) -> Self {
        self.max_conns = max_conns;
        self
    }

    /// Overrides `max_reqs`.
    pub fn with_max_reqs(mut self, max_reqs: usize) -> Self {
        self.max_reqs = max_reqs;
        self
    }
}
