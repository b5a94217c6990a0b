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

use crate::protocol::ErrorCode;

/// Protocol engine errors.
///
/// Timeout and Cancelled are transport faults: the caller may retry the
/// operation, which re-synchronizes.  The byte-level variants are protocol
/// faults, fatal to the current operation.  Remote carries an error code
/// signalled by the bridge with a NAK.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,

    #[error("bridge reported an error: {0}")]
    Remote(ErrorCode),

    #[error("expected byte 0x{expected:02X} but received 0x{received:02X}")]
    UnexpectedByte { expected: u8, received: u8 },

    #[error("unexpected response 0x{0:02X}")]
    UnexpectedResponse(u8),

    #[error("synchronization failed")]
    SyncFailed,

    #[error("block payload ended before the expected fields")]
    TruncatedBlock,

    #[error("unexpected bridge version (expected {expected_high}.{expected_low} but received {high}.{low})")]
    VersionMismatch {
        expected_high: u8,
        expected_low: u8,
        high: u8,
        low: u8,
    },

    #[error("received chunk size {received} does not equal {expected}")]
    ChunkSizeMismatch { expected: usize, received: u8 },

    #[error("bridge is not connected")]
    NotConnected,

    #[error("file '{0}' was not found on the Portfolio")]
    RemoteFileNotFound(String),

    #[error("'{0}' is not a valid DOS path")]
    InvalidRemotePath(String),
}

pub type Result<T> = std::result::Result<T, Error>;
