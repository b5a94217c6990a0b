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

//! Wire protocol constants and payload encoding

use std::fmt;

// ============================================================================
// Control Alphabet
// ============================================================================

/// Start of header - prefixes every session-level command
pub const SOH: u8 = 0x01;

/// Start of text - opens a framed payload from the bridge
pub const STX: u8 = 0x02;

/// End of text - closes a framed payload
pub const ETX: u8 = 0x03;

/// Acknowledge - accepts a header or chunk
pub const ACK: u8 = 0x06;

/// Data link escape - the next frame byte is literal data
pub const DLE: u8 = 0x10;

/// Negative acknowledge - followed by a single error code byte
pub const NAK: u8 = 0x15;

/// Synchronize - echoed by the bridge during the handshake
pub const SYN: u8 = 0x16;

/// Cancel - aborts an in-flight frame
pub const CAN: u8 = 0x18;

// ============================================================================
// Wire Constants
// ============================================================================

/// Protocol major version, must match the bridge exactly
pub const VERSION_HIGH: u8 = 1;

/// Protocol minor version, must match the bridge exactly
pub const VERSION_LOW: u8 = 1;

/// Chunk size negotiated with the bridge during initialization
pub const CHUNK_SIZE: usize = 60;

/// Largest payload carried by a single block
pub const MAX_BLOCK_SIZE: usize = 0x7000;

// ============================================================================
// Error Codes
// ============================================================================

/// Error code carried as the single byte following a NAK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    Ok = 0,
    Timeout = 1,
    Cancelled = 2,
    Unexpected = 3,
    Overflow = 4,
    SyncError = 5,
    ChecksumError = 6,
    End = 0xFF,
}

impl ErrorCode {
    pub fn from_byte(value: u8) -> Option<ErrorCode> {
        match value {
            0 => Some(ErrorCode::Ok),
            1 => Some(ErrorCode::Timeout),
            2 => Some(ErrorCode::Cancelled),
            3 => Some(ErrorCode::Unexpected),
            4 => Some(ErrorCode::Overflow),
            5 => Some(ErrorCode::SyncError),
            6 => Some(ErrorCode::ChecksumError),
            0xFF => Some(ErrorCode::End),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Ok => "ok",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Unexpected => "unexpected data",
            ErrorCode::Overflow => "overflow",
            ErrorCode::SyncError => "sync error",
            ErrorCode::ChecksumError => "checksum error",
            ErrorCode::End => "end of data",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// Session Commands
// ============================================================================

/// Session-level command byte sent after SOH, selects the bridge's
/// state-machine branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Init = 1,
    Ping = 2,
    WaitForServer = 3,
    SendBlock = 4,
    RetrieveBlock = 5,
}

impl Command {
    pub fn from_byte(value: u8) -> Option<Command> {
        match value {
            1 => Some(Command::Init),
            2 => Some(Command::Ping),
            3 => Some(Command::WaitForServer),
            4 => Some(Command::SendBlock),
            5 => Some(Command::RetrieveBlock),
            _ => None,
        }
    }
}

// ============================================================================
// Application Commands & Responses
// ============================================================================

/// First byte of a block payload sent to the Portfolio server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PortfolioCommand {
    Abort = 0,
    RetrieveFile = 0x02,
    SendFile = 0x03,
    Overwrite = 0x05,
    FileList = 0x06,
    Success = 0x20,
}

/// First byte of a block payload received from the Portfolio server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PortfolioResponse {
    FileExists = 0x20,
    FileNotFound = 0x21,
}

impl PortfolioResponse {
    pub fn from_byte(value: u8) -> Option<PortfolioResponse> {
        match value {
            0x20 => Some(PortfolioResponse::FileExists),
            0x21 => Some(PortfolioResponse::FileNotFound),
            _ => None,
        }
    }
}

// ============================================================================
// Payload Building
// ============================================================================

/// Little-endian payload builder used when composing block payloads
pub trait PayloadExt {
    fn put_command(&mut self, command: PortfolioCommand);
    fn put_u16_le(&mut self, value: u16);
    fn put_u32_le(&mut self, value: u32);
    /// Appends a string followed by a NUL terminator
    fn put_stringz(&mut self, value: &str);
}

impl PayloadExt for Vec<u8> {
    fn put_command(&mut self, command: PortfolioCommand) {
        self.push(command as u8);
    }

    fn put_u16_le(&mut self, value: u16) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    fn put_u32_le(&mut self, value: u32) {
        self.extend_from_slice(&value.to_le_bytes());
    }

    fn put_stringz(&mut self, value: &str) {
        self.extend_from_slice(value.as_bytes());
        self.push(0);
    }
}

// ============================================================================
// Payload Reading
// ============================================================================

/// Sequential reader over a received block payload
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        PayloadReader { data, pos: 0 }
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let value = self.data.get(self.pos).copied()?;
        self.pos += 1;
        Some(value)
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        let low = self.read_u8()?;
        let high = self.read_u8()?;
        Some(u16::from_le_bytes([low, high]))
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        let bytes = [
            self.read_u8()?,
            self.read_u8()?,
            self.read_u8()?,
            self.read_u8()?,
        ];
        Some(u32::from_le_bytes(bytes))
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }
}

// ============================================================================
// Tests
// ============================================================================
