// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Host-side engine for exchanging files with an Atari Portfolio through a
//! serial bridge.
//!
//! The [`bridge::Bridge`] owns one connection: it performs the handshake,
//! runs file operations over the credit-based block protocol, and keeps a
//! background listener answering the bridge's keep-alive traffic between
//! operations.  Hosts plug in a [`sink::MessageSink`] for operational
//! messages and a [`sink::FileProgress`] for transfer progress.

pub mod bridge;
pub mod dos;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod serial;
pub mod sink;
pub mod transport;
