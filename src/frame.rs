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

//! Byte-stuffed frame decoding
//!
//! A frame is STX, the payload with every control byte escaped by a
//! preceding DLE, then ETX.  The bridge may answer NAK plus an error code
//! instead of a frame, or abort one midway with CAN.  Outbound payloads are
//! never framed: block sends use a length prefix and per-chunk
//! acknowledgments, so only the decode direction scans for terminators.

use std::time::Duration;

use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::{ACK, CAN, DLE, ETX, ErrorCode, NAK, SOH, STX, SYN};
use crate::sink::FileProgress;
use crate::transport::{ByteTransport, CancelToken};

/// Wait for the first byte of a frame
const FRAME_START_TIMEOUT: Duration = Duration::from_millis(5000);

/// Wait for each subsequent byte once a frame has started
const FRAME_BYTE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Wait for the error code byte following a NAK start
const NAK_CODE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Number of CAN bytes written to force the bridge out of its send loop
const CANCEL_BURST: usize = 5;

/// True for bytes that must be DLE-escaped inside a frame payload
fn is_control(byte: u8) -> bool {
    matches!(byte, SOH | STX | ETX | ACK | DLE | NAK | SYN | CAN)
}

/// Reads one frame from the transport.
///
/// The progress sink is incremented once per accepted payload byte.  When
/// the token fires mid-frame this writes a burst of CAN bytes and returns an
/// empty payload - a best-effort abort signal, not a negotiated one.
pub fn read_frame(
    transport: &ByteTransport,
    mut progress: Option<&mut dyn FileProgress>,
    token: Option<&CancelToken>,
) -> Result<Vec<u8>> {
    let start = match token {
        Some(token) => transport.read_byte_cancellable(FRAME_START_TIMEOUT, token)?,
        None => transport.read_byte(FRAME_START_TIMEOUT)?,
    };
    if start == NAK {
        return Err(read_error_code(transport, NAK_CODE_TIMEOUT)?);
    }
    if start != STX {
        return Err(Error::UnexpectedByte {
            expected: STX,
            received: start,
        });
    }

    let mut result = Vec::new();
    loop {
        let mut byte = transport.read_byte(FRAME_BYTE_TIMEOUT)?;
        match byte {
            DLE => byte = transport.read_byte(FRAME_BYTE_TIMEOUT)?,
            NAK => return Err(read_error_code(transport, FRAME_BYTE_TIMEOUT)?),
            CAN => return Err(Error::Cancelled),
            ETX => {
                debug!("frame received ({} bytes): {:02X?}", result.len(), result);
                return Ok(result);
            }
            _ => {}
        }
        result.push(byte);
        if let Some(progress) = progress.as_deref_mut() {
            progress.increment(1);
        }
        if token.is_some_and(|token| token.is_cancelled()) {
            for _ in 0..CANCEL_BURST {
                transport.write_byte(CAN)?;
            }
            return Ok(Vec::new());
        }
    }
}

/// Reads the error code byte that follows a NAK
fn read_error_code(transport: &ByteTransport, timeout: Duration) -> Result<Error> {
    let value = transport.read_byte(timeout)?;
    Ok(match ErrorCode::from_byte(value) {
        Some(code) => Error::Remote(code),
        None => Error::UnexpectedResponse(value),
    })
}

/// Encodes a payload as a frame, escaping every control byte.  The host
/// engine never frames its own traffic; this is the bridge-side encoding,
/// kept next to the decoder that must mirror it.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.push(STX);
    for &byte in payload {
        if is_control(byte) {
            frame.push(DLE);
        }
        frame.push(byte);
    }
    frame.push(ETX);
    frame
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockSerialPort;

    struct CountingProgress {
        total: u64,
        received: u64,
    }

    impl FileProgress for CountingProgress {
        fn start(&mut self, total_bytes: u64) {
            self.total = total_bytes;
        }

        fn increment(&mut self, bytes: u64) {
            self.received += bytes;
        }
    }

    fn transport_with_frame(payload: &[u8]) -> ByteTransport {
        let responses = encode_frame(payload).into_iter().map(Some).collect();
        ByteTransport::new(Box::new(MockSerialPort::new(responses, vec![])))
    }

    #[test]
    fn test_every_byte_value_round_trips() {
        for value in 0..=255u8 {
            let transport = transport_with_frame(&[value]);
            let decoded = read_frame(&transport, None, None).unwrap();
            assert_eq!(decoded, vec![value], "byte 0x{:02X}", value);
        }
    }

    #[test]
    fn test_mixed_payload_round_trips() {
        let payload = vec![SOH, b'H', STX, b'i', ETX, DLE, NAK, SYN, CAN, ACK, 0x00, 0xFF];
        let transport = transport_with_frame(&payload);
        assert_eq!(read_frame(&transport, None, None).unwrap(), payload);
    }

    #[test]
    fn test_progress_counts_payload_bytes() {
        let payload = vec![1u8; 10];
        let transport = transport_with_frame(&payload);
        let mut progress = CountingProgress { total: 0, received: 0 };
        read_frame(&transport, Some(&mut progress), None).unwrap();
        assert_eq!(progress.received, 10);
    }

    #[test]
    fn test_nak_start_surfaces_error_code() {
        let responses = vec![Some(NAK), Some(ErrorCode::Overflow as u8)];
        let transport = ByteTransport::new(Box::new(MockSerialPort::new(responses, vec![])));
        assert!(matches!(
            read_frame(&transport, None, None),
            Err(Error::Remote(ErrorCode::Overflow))
        ));
    }

    #[test]
    fn test_nak_mid_frame_surfaces_error_code() {
        let responses = vec![
            Some(STX),
            Some(b'A'),
            Some(NAK),
            Some(ErrorCode::SyncError as u8),
        ];
        let transport = ByteTransport::new(Box::new(MockSerialPort::new(responses, vec![])));
        assert!(matches!(
            read_frame(&transport, None, None),
            Err(Error::Remote(ErrorCode::SyncError))
        ));
    }

    #[test]
    fn test_unexpected_start_byte() {
        let responses = vec![Some(0x55)];
        let transport = ByteTransport::new(Box::new(MockSerialPort::new(responses, vec![])));
        match read_frame(&transport, None, None) {
            Err(Error::UnexpectedByte { expected, received }) => {
                assert_eq!(expected, STX);
                assert_eq!(received, 0x55);
            }
            other => panic!("Expected UnexpectedByte, got {:?}", other),
        }
    }

    #[test]
    fn test_can_aborts_frame() {
        let responses = vec![Some(STX), Some(b'A'), Some(CAN)];
        let transport = ByteTransport::new(Box::new(MockSerialPort::new(responses, vec![])));
        assert!(matches!(
            read_frame(&transport, None, None),
            Err(Error::Cancelled)
        ));
    }

    struct CancelOnFirstByte {
        token: CancelToken,
    }

    impl FileProgress for CancelOnFirstByte {
        fn start(&mut self, _total_bytes: u64) {}

        fn increment(&mut self, _bytes: u64) {
            self.token.cancel();
        }
    }

    #[test]
    fn test_cancel_mid_frame_sends_can_burst() {
        // Token fires after the first payload byte; the remaining scripted
        // bytes stay unread and the codec writes five CANs
        let responses = vec![Some(STX), Some(b'A'), Some(b'B'), Some(ETX)];
        let expected_writes = vec![CAN; CANCEL_BURST];
        let mut mock = MockSerialPort::new(responses, expected_writes);
        mock.set_allow_unread(true);
        let transport = ByteTransport::new(Box::new(mock));
        let token = CancelToken::new();
        let mut progress = CancelOnFirstByte {
            token: token.clone(),
        };
        let result = read_frame(&transport, Some(&mut progress), Some(&token)).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_cancelled_before_frame_start() {
        let transport = ByteTransport::new(Box::new(MockSerialPort::new(vec![], vec![])));
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            read_frame(&transport, None, Some(&token)),
            Err(Error::Cancelled)
        ));
    }
}
