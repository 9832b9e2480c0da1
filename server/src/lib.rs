// Copyright 2022 Ryan Seipp
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

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]
#![doc(test(attr(deny(warnings))))]

//! An embeddable, non-blocking HTTP/1.1 (with optional TLS) and WebSocket
//! server driven by a host application's cooperative event loop.
//!
//! The server never owns its own accept/dispatch loop: the host repeatedly
//! calls [`Server::has_request`] on its own schedule, pulls requests out
//! with [`Server::get_request`], and pushes responses back with
//! [`Server::respond`]. Every socket is non-blocking and every public
//! entry point is total — internal failures are logged and reported
//! through return values, never by panicking the host.

pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod net;
pub mod pool;
pub mod rate_limiter;
pub mod request;
pub mod response;
pub mod server;
pub mod static_cache;
pub mod static_handler;
pub mod tasks;
pub mod tempfile;
pub mod worker_pool;
pub mod ws;

pub use config::{Config, ConfigBuilder};
pub use error::ServerError;
pub use request::Request;
pub use response::Response;
pub use server::Server;
