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

//! Wire-level HTTP/1.1 and WebSocket codec.
//!
//! This crate only speaks bytes: it decodes request lines, headers and
//! bodies into borrowed views over the caller's buffer, serializes
//! responses, and frames/unframes WebSocket messages. It knows nothing
//! about sockets, polling, or connection lifecycle — that lives in the
//! `server` crate.

pub mod h1;
pub mod method;
pub mod raw_request;
pub mod status;
pub mod version;
pub mod ws;

pub use method::Method;
pub use status::Status;
pub use version::Version;
