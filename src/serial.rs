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

#[cfg(test)]
use std::collections::VecDeque;
use std::time::Duration;
use serialport::SerialPort as SerialPortTrait;

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Trait for the serial port operations needed by the bridge protocol
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;

    /// Number of bytes already received and not yet read
    fn bytes_to_read(&mut self) -> std::io::Result<u32>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, serialport::Error> {
        let mut port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;

        // The bridge resets when DTR toggles, keep it deasserted
        port.write_data_terminal_ready(false)?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.port.read(buf)
    }

    fn bytes_to_read(&mut self) -> std::io::Result<u32> {
        self.port.bytes_to_read()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

/// Scripted serial port.  Reads are served in order from `responses` where
/// `None` stands for one timed-out read.  Bytes seeded with `push_stale` are
/// served before the script and are the only bytes reported by
/// `bytes_to_read` - scripted responses model data that has not arrived yet.
#[cfg(test)]
pub struct MockSerialPort {
    // Data to return on reads (None = timeout)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Bytes that count as already arrived
    stale: VecDeque<u8>,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
    // Cancelled transfers leave scripted responses unread
    allow_unread: bool,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            stale: VecDeque::new(),
            write_log: Vec::new(),
            expected_writes,
            allow_unread: false,
        }
    }

    /// Seeds bytes that are reported as available before the script starts
    pub fn push_stale(&mut self, bytes: &[u8]) {
        self.stale.extend(bytes.iter().copied());
    }

    /// Skips the unconsumed-responses check on drop
    pub fn set_allow_unread(&mut self, allow: bool) {
        self.allow_unread = allow;
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if let Some(byte) = self.stale.pop_front() {
            buf[0] = byte;
            return Ok(1);
        }

        // Out of responses = timeout
        if self.read_pos >= self.read_buffer.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock timeout"
            ));
        }

        match self.read_buffer[self.read_pos] {
            Some(byte) => {
                self.read_pos += 1;
                buf[0] = byte;
                Ok(1)
            }
            None => {
                self.read_pos += 1;
                Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "Mock timeout"
                ))
            }
        }
    }

    fn bytes_to_read(&mut self) -> std::io::Result<u32> {
        Ok(self.stale.len() as u32)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        if !self.allow_unread {
            assert_eq!(
                self.read_pos,
                self.read_buffer.len(),
                "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
                self.read_buffer.len() - self.read_pos,
                self.read_pos,
                self.read_buffer.len()
            );
        }

        assert!(
            self.stale.is_empty(),
            "MockSerialPort dropped with {} undrained stale bytes",
            self.stale.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}
