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

//! Thin `tracing` initialization helper. Diagnostic destinations (files,
//! syslog, a front-end's own log pipe) are the application's concern per
//! `spec.md` §1's "logging destinations" non-goal; this just wires a
//! reasonable default subscriber so `tracing::debug!`/`error!` call sites
//! throughout the crate (`conn`, `server`, `handler`) produce output
//! without every caller repeating the boilerplate.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs a global `tracing` subscriber reading `RUST_LOG` (defaulting
/// to `info`), if one hasn't been installed already. Safe to call more
/// than once; only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}
