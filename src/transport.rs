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

//! Byte-granular transport over the serial line

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::protocol::{Command, ErrorCode, NAK, SOH};
use crate::serial::SerialPort;

/// How often a cancellable read re-checks its token
const CANCEL_POLL: Duration = Duration::from_millis(100);

/// Timeout used when consuming bytes already reported as available
const DRAIN_READ_TIMEOUT: Duration = Duration::from_millis(10);

// ============================================================================
// Cancellation Token
// ============================================================================

/// Cooperative cancellation handle shared between an operation and the
/// caller that may cancel it
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Byte Transport
// ============================================================================

/// Shared transport over one serial port.  The port sits behind a narrow
/// mutex; exclusivity of logical readers (listener versus a foreground
/// operation) is the command gate's job, not the transport's.
pub struct ByteTransport {
    port: Mutex<Box<dyn SerialPort>>,
}

impl ByteTransport {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        ByteTransport {
            port: Mutex::new(port),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn SerialPort>> {
        self.port.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_raw(&self, timeout: Duration) -> Result<u8> {
        let mut buf = [0u8; 1];
        match self.lock().read_timeout(&mut buf, timeout) {
            Ok(n) if n > 0 => Ok(buf[0]),
            Ok(_) => Err(Error::Timeout),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(Error::Timeout),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Reads one byte, failing with Timeout when none arrives in time
    pub fn read_byte(&self, timeout: Duration) -> Result<u8> {
        self.read_raw(timeout)
    }

    /// Reads one byte, returning None instead of an error on timeout
    pub fn try_read_byte(&self, timeout: Duration) -> Result<Option<u8>> {
        match self.read_raw(timeout) {
            Ok(byte) => Ok(Some(byte)),
            Err(Error::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Reads one byte while re-checking the token between short poll
    /// slices, so a cancel request interrupts the wait rather than the
    /// caller's whole timeout
    pub fn read_byte_cancellable(&self, timeout: Duration, token: &CancelToken) -> Result<u8> {
        let deadline = Instant::now() + timeout;
        loop {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }
            match self.read_raw(remaining.min(CANCEL_POLL)) {
                Ok(byte) => return Ok(byte),
                Err(Error::Timeout) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Reads one byte and fails, naming both values, if it is not the
    /// expected one
    pub fn expect_byte(&self, expected: u8, timeout: Duration) -> Result<()> {
        let received = self.read_byte(timeout)?;
        if received != expected {
            return Err(Error::UnexpectedByte { expected, received });
        }
        Ok(())
    }

    pub fn write_byte(&self, value: u8) -> Result<()> {
        self.lock().write_all(&[value])?;
        Ok(())
    }

    pub fn write_all(&self, buf: &[u8]) -> Result<()> {
        self.lock().write_all(buf)?;
        Ok(())
    }

    /// Writes a 16-bit value, low byte first
    pub fn write_u16_le(&self, value: u16) -> Result<()> {
        self.write_all(&value.to_le_bytes())
    }

    /// Writes SOH followed by the command byte
    pub fn start_command(&self, command: Command) -> Result<()> {
        self.write_all(&[SOH, command as u8])
    }

    /// Writes NAK followed by the error code byte
    pub fn write_nak(&self, code: ErrorCode) -> Result<()> {
        self.write_all(&[NAK, code as u8])
    }

    /// True once a byte has arrived and has not yet been read
    pub fn data_available(&self) -> Result<bool> {
        Ok(self.lock().bytes_to_read()? > 0)
    }

    /// Consumes every currently-available byte, returning how many were
    /// discarded
    pub fn drain(&self) -> Result<usize> {
        let mut count = 0;
        while self.data_available()? {
            match self.read_raw(DRAIN_READ_TIMEOUT) {
                Ok(_) => count += 1,
                Err(Error::Timeout) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(count)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialPort;

    #[test]
    fn test_read_byte() {
        let mock = MockSerialPort::new(vec![Some(0x42)], vec![]);
        let transport = ByteTransport::new(Box::new(mock));
        assert_eq!(transport.read_byte(Duration::from_millis(100)).unwrap(), 0x42);
    }

    #[test]
    fn test_read_byte_timeout() {
        let mock = MockSerialPort::new(vec![None], vec![]);
        let transport = ByteTransport::new(Box::new(mock));
        assert!(matches!(
            transport.read_byte(Duration::from_millis(100)),
            Err(Error::Timeout)
        ));
    }

    #[test]
    fn test_try_read_byte_timeout_is_none() {
        let mock = MockSerialPort::new(vec![None, Some(0x16)], vec![]);
        let transport = ByteTransport::new(Box::new(mock));
        assert_eq!(transport.try_read_byte(Duration::from_millis(100)).unwrap(), None);
        assert_eq!(
            transport.try_read_byte(Duration::from_millis(100)).unwrap(),
            Some(0x16)
        );
    }

    #[test]
    fn test_expect_byte_mismatch_names_bytes() {
        let mock = MockSerialPort::new(vec![Some(0x15)], vec![]);
        let transport = ByteTransport::new(Box::new(mock));
        match transport.expect_byte(0x01, Duration::from_millis(100)) {
            Err(Error::UnexpectedByte { expected, received }) => {
                assert_eq!(expected, 0x01);
                assert_eq!(received, 0x15);
            }
            other => panic!("Expected UnexpectedByte, got {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_read_returns_cancelled() {
        let mock = MockSerialPort::new(vec![], vec![]);
        let transport = ByteTransport::new(Box::new(mock));
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            transport.read_byte_cancellable(Duration::from_secs(5), &token),
            Err(Error::Cancelled)
        ));
    }

    #[test]
    fn test_cancellable_read_delivers_data() {
        let mock = MockSerialPort::new(vec![Some(0x02)], vec![]);
        let transport = ByteTransport::new(Box::new(mock));
        let token = CancelToken::new();
        assert_eq!(
            transport
                .read_byte_cancellable(Duration::from_secs(1), &token)
                .unwrap(),
            0x02
        );
    }

    #[test]
    fn test_drain_consumes_only_available_bytes() {
        let mut mock = MockSerialPort::new(vec![Some(0x06)], vec![]);
        mock.push_stale(&[0x16, 0x15, 0x03]);
        let transport = ByteTransport::new(Box::new(mock));

        assert!(transport.data_available().unwrap());
        assert_eq!(transport.drain().unwrap(), 3);
        assert!(!transport.data_available().unwrap());

        // The scripted byte is untouched by the drain
        assert_eq!(transport.read_byte(Duration::from_millis(100)).unwrap(), 0x06);
    }

    #[test]
    fn test_command_and_nak_writes() {
        let mock = MockSerialPort::new(
            vec![],
            vec![0x01, 0x02, 0x15, 0x03, 0x34, 0x12],
        );
        let transport = ByteTransport::new(Box::new(mock));
        transport.start_command(Command::Ping).unwrap();
        transport.write_nak(ErrorCode::Unexpected).unwrap();
        transport.write_u16_le(0x1234).unwrap();
    }
}
