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

//! Bridge connection: handshake, block transfer, file operations and the
//! background listener

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use tracing::debug;

use crate::dos;
use crate::error::{Error, Result};
use crate::frame;
use crate::protocol::*;
use crate::serial::{RealSerialPort, SerialPort};
use crate::sink::{FileProgress, MessageSink};
use crate::transport::{ByteTransport, CancelToken};

// ============================================================================
// Timeouts
// ============================================================================

/// Wait for an ACK or NAK after a header or chunk
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Wait for the error code byte following a NAK
const NAK_CODE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Wait for the SYN echo during synchronization
const SYNC_REPLY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Synchronization gives up after this many unanswered attempts
const SYNC_ATTEMPTS: usize = 10;

/// Wait for the SOH that starts the initialization header
const INIT_HEADER_TIMEOUT: Duration = Duration::from_millis(2500);

/// Wait for each subsequent initialization byte
const INIT_BYTE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Wait for the ping reply
const PING_REPLY_TIMEOUT: Duration = Duration::from_millis(2500);

/// Wait for the error code after a ping NAK
const PING_CODE_TIMEOUT: Duration = Duration::from_millis(2000);

/// How long the listener parks while a foreground command holds the gate
const LISTENER_IDLE_WAIT: Duration = Duration::from_millis(100);

/// Listener sleep between polls when the line is quiet
const LISTENER_POLL: Duration = Duration::from_millis(10);

/// Listener read timeout for a byte already reported available
const LISTENER_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Wait for the command byte after an unsolicited SOH
const LISTENER_COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long a cancelled retrieve keeps draining the bridge's trailing bytes
const CANCEL_DRAIN_WINDOW: Duration = Duration::from_secs(1);

// ============================================================================
// Command Gate
// ============================================================================

/// Reentrant guard for exclusive transport access.  A foreground operation
/// holds a scope for its whole conversation; the listener only reads while
/// the depth is zero.  Nested acquisition within one call chain is fine;
/// two independent concurrent foreground operations are a caller error the
/// gate does not detect.
pub struct CommandGate {
    depth: Mutex<usize>,
    idle: Condvar,
}

impl CommandGate {
    fn new() -> Self {
        CommandGate {
            depth: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.depth.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn acquire(&self) -> CommandScope<'_> {
        *self.lock() += 1;
        CommandScope { gate: self }
    }

    pub fn is_idle(&self) -> bool {
        *self.lock() == 0
    }

    /// Waits up to `timeout` for the gate to become idle, returning whether
    /// it is.  Release always notifies, so a parked listener cannot miss
    /// the transition.
    fn wait_idle(&self, timeout: Duration) -> bool {
        let depth = self.lock();
        if *depth == 0 {
            return true;
        }
        let (depth, _) = self
            .idle
            .wait_timeout(depth, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        *depth == 0
    }
}

/// RAII handle for one held command scope
pub struct CommandScope<'a> {
    gate: &'a CommandGate,
}

impl Drop for CommandScope<'_> {
    fn drop(&mut self) {
        let mut depth = self.gate.lock();
        *depth = depth.saturating_sub(1);
        if *depth == 0 {
            self.gate.idle.notify_all();
        }
    }
}

// ============================================================================
// Operation Outcomes
// ============================================================================

/// Result of a ping exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    /// Bridge answered ACK
    Success,
    /// Bridge answered NAK with this error code
    Failure(ErrorCode),
    /// Bridge did not answer at all
    NoResponse,
}

/// Result of a file transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    /// Destination exists and overwriting was not requested
    AlreadyExists,
    /// Transfer was cancelled; the Portfolio server needs a restart
    Cancelled,
    /// Bridge reported an unsuccessful final status
    Failed,
}

// ============================================================================
// Bridge
// ============================================================================

struct Shared {
    transport: ByteTransport,
    gate: CommandGate,
    sink: Mutex<Box<dyn MessageSink>>,
    cancel: Mutex<Option<CancelToken>>,
    connected: AtomicBool,
    connecting: AtomicBool,
}

impl Shared {
    fn sink(&self) -> MutexGuard<'_, Box<dyn MessageSink>> {
        self.sink.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One connection to the bridge.  Owns the transport, the command gate and
/// the background listener thread.
pub struct Bridge {
    shared: Arc<Shared>,
    listener: Mutex<Option<JoinHandle<()>>>,
    clock: fn() -> NaiveDateTime,
}

fn default_clock() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

impl Bridge {
    /// Opens the named serial port at the given baud rate and performs the
    /// connection handshake
    pub fn connect(port_name: &str, baud_rate: u32, mut sink: Box<dyn MessageSink>) -> Result<Bridge> {
        let port = RealSerialPort::open(port_name, baud_rate)
            .map_err(|e| Error::Io(std::io::Error::from(e)))?;
        sink.write_line(&format!("Connected to {}.", port_name));
        Bridge::open(Box::new(port), sink)
    }

    /// Performs the handshake over an already-open port and starts the
    /// background listener
    pub fn open(port: Box<dyn SerialPort>, sink: Box<dyn MessageSink>) -> Result<Bridge> {
        let bridge = Bridge::with_port(port, sink);

        bridge.shared.connecting.store(true, Ordering::SeqCst);
        let result = {
            let _scope = bridge.shared.gate.acquire();
            bridge.initialize()
        };
        bridge.shared.connecting.store(false, Ordering::SeqCst);
        result?;

        bridge.shared.connected.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&bridge.shared);
        *bridge.listener.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(thread::spawn(move || listener_loop(&shared)));
        Ok(bridge)
    }

    fn with_port(port: Box<dyn SerialPort>, sink: Box<dyn MessageSink>) -> Bridge {
        Bridge {
            shared: Arc::new(Shared {
                transport: ByteTransport::new(port),
                gate: CommandGate::new(),
                sink: Mutex::new(sink),
                cancel: Mutex::new(None),
                connected: AtomicBool::new(false),
                connecting: AtomicBool::new(false),
            }),
            listener: Mutex::new(None),
            clock: default_clock,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_connecting(&self) -> bool {
        self.shared.connecting.load(Ordering::SeqCst)
    }

    /// Stops the listener and marks the connection closed.  Safe to call
    /// more than once.
    pub fn disconnect(&self) {
        let was_connected = self.shared.connected.swap(false, Ordering::SeqCst);
        if let Some(handle) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = handle.join();
        }
        if was_connected {
            self.shared.sink().write_line("Disconnected.");
        }
    }

    /// Requests cancellation of the operation currently in flight, if any
    pub fn cancel(&self) {
        let token = self
            .shared
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// True while a cancellable operation is in flight
    pub fn can_cancel(&self) -> bool {
        self.shared
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn ensure_connected(&self) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    fn start_cancel_scope(&self) -> CancelScope<'_> {
        let token = CancelToken::new();
        *self
            .shared
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        CancelScope {
            shared: &self.shared,
            token,
        }
    }

    // ------------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------------

    /// Repeatedly offers SYN until the bridge echoes it back.  A NAK reply
    /// discards its error code and retries without consuming an attempt;
    /// anything else consumes one of the ten attempts.
    fn synchronize(&self) -> Result<()> {
        let transport = &self.shared.transport;
        let mut attempts = 0;
        loop {
            transport.write_byte(SYN)?;
            match transport.try_read_byte(SYNC_REPLY_TIMEOUT)? {
                Some(SYN) => return Ok(()),
                Some(NAK) => {
                    // Ignore the error code
                    transport.try_read_byte(SYNC_REPLY_TIMEOUT)?;
                }
                _ => {
                    attempts += 1;
                    if attempts >= SYNC_ATTEMPTS {
                        return Err(Error::SyncFailed);
                    }
                }
            }
        }
    }

    /// Synchronizes, negotiates version and chunk size, and streams the
    /// bridge's banner to the message sink
    fn initialize(&self) -> Result<()> {
        let transport = &self.shared.transport;

        let stale = transport.drain()?;
        if stale > 0 {
            debug!("discarded {} stale bytes", stale);
        }

        self.synchronize()?;

        transport.start_command(Command::Init)?;

        transport.expect_byte(SOH, INIT_HEADER_TIMEOUT)?;
        let high = transport.read_byte(INIT_BYTE_TIMEOUT)?;
        let low = transport.read_byte(INIT_BYTE_TIMEOUT)?;
        if high != VERSION_HIGH || low != VERSION_LOW {
            return Err(Error::VersionMismatch {
                expected_high: VERSION_HIGH,
                expected_low: VERSION_LOW,
                high,
                low,
            });
        }

        let size = transport.read_byte(INIT_BYTE_TIMEOUT)?;
        if size as usize != CHUNK_SIZE {
            return Err(Error::ChunkSizeMismatch {
                expected: CHUNK_SIZE,
                received: size,
            });
        }

        // The bridge streams a human-readable banner between STX and ETX
        transport.expect_byte(STX, INIT_BYTE_TIMEOUT)?;
        let mut sink = self.shared.sink();
        loop {
            let value = transport.read_byte(INIT_BYTE_TIMEOUT)?;
            if value == ETX {
                break;
            }
            sink.write(&(value as char).to_string());
        }
        sink.write_line("");
        Ok(())
    }

    /// Announces the host to the Portfolio server and awaits its ACK
    fn wait_for_server(&self) -> Result<()> {
        self.shared.transport.start_command(Command::WaitForServer)?;
        self.read_response()
    }

    // ------------------------------------------------------------------------
    // Acknowledgments
    // ------------------------------------------------------------------------

    /// Reads one ACK, surfacing a NAK's error code verbatim
    fn read_response(&self) -> Result<()> {
        let transport = &self.shared.transport;
        let response = transport.read_byte(RESPONSE_TIMEOUT)?;
        match response {
            ACK => Ok(()),
            NAK => {
                let value = transport.read_byte(NAK_CODE_TIMEOUT)?;
                Err(match ErrorCode::from_byte(value) {
                    Some(code) => Error::Remote(code),
                    None => Error::UnexpectedResponse(value),
                })
            }
            other => Err(Error::UnexpectedResponse(other)),
        }
    }

    /// Reads the NAK+Timeout pair the bridge emits when a cancelled send
    /// stops feeding it chunks
    fn read_forced_timeout_nak(&self) -> Result<()> {
        let transport = &self.shared.transport;
        let response = transport.read_byte(RESPONSE_TIMEOUT)?;
        if response != NAK {
            return Err(Error::UnexpectedResponse(response));
        }
        let code = transport.read_byte(NAK_CODE_TIMEOUT)?;
        if code != ErrorCode::Timeout as u8 {
            return Err(Error::UnexpectedResponse(code));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Block Transfer
    // ------------------------------------------------------------------------

    /// Sends one length-prefixed block, streaming the payload in
    /// chunk-sized groups with one acknowledgment each
    fn send_block(
        &self,
        data: &[u8],
        mut progress: Option<&mut dyn FileProgress>,
        token: Option<&CancelToken>,
    ) -> Result<()> {
        let transport = &self.shared.transport;
        transport.start_command(Command::SendBlock)?;
        transport.write_u16_le(data.len() as u16)?;
        self.read_response()?; // Header acknowledge

        for chunk in data.chunks(CHUNK_SIZE) {
            debug!("sending {} bytes: {:02X?}", chunk.len(), chunk);
            transport.write_all(chunk)?;
            self.read_response()?;
            if let Some(progress) = progress.as_deref_mut() {
                progress.increment(chunk.len() as u64);
            }
            if token.is_some_and(|token| token.is_cancelled()) {
                // The bridge times out waiting for the next chunk and
                // reports it; consume that NAK so the line is clean
                self.read_forced_timeout_nak()?;
                return Ok(());
            }
        }

        self.read_response()?; // Final acknowledge
        self.read_response()?; // Second final acknowledge the bridge insists on
        Ok(())
    }

    /// Requests one block from the Portfolio and decodes its frame
    fn retrieve_block(
        &self,
        progress: Option<&mut dyn FileProgress>,
        token: Option<&CancelToken>,
    ) -> Result<Vec<u8>> {
        self.shared.transport.start_command(Command::RetrieveBlock)?;
        frame::read_frame(&self.shared.transport, progress, token)
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Pings the bridge
    pub fn ping(&self) -> Result<PingOutcome> {
        self.ensure_connected()?;
        let _scope = self.shared.gate.acquire();
        let transport = &self.shared.transport;

        debug!("clearing stream");
        transport.drain()?;

        debug!("synchronizing");
        self.synchronize()?;

        self.shared.sink().write("Pinging... ");
        transport.start_command(Command::Ping)?;
        match transport.try_read_byte(PING_REPLY_TIMEOUT)? {
            Some(ACK) => {
                self.shared.sink().write_line("Success.");
                Ok(PingOutcome::Success)
            }
            Some(NAK) => {
                let code = transport
                    .try_read_byte(PING_CODE_TIMEOUT)?
                    .map(|value| ErrorCode::from_byte(value).unwrap_or(ErrorCode::Unexpected))
                    .unwrap_or(ErrorCode::Timeout);
                self.shared
                    .sink()
                    .write_line(&format!("Ping failure.  Error: {}", code));
                Ok(PingOutcome::Failure(code))
            }
            _ => {
                self.shared.sink().write_line("No response.");
                Ok(PingOutcome::NoResponse)
            }
        }
    }

    /// Lists files on the Portfolio matching a DOS wildcard pattern
    pub fn list_files(&self, pattern: &str) -> Result<Vec<String>> {
        self.ensure_connected()?;

        let mut data = Vec::new();
        data.put_command(PortfolioCommand::FileList);
        data.put_u16_le(MAX_BLOCK_SIZE as u16);
        data.put_stringz(pattern);

        let _scope = self.shared.gate.acquire();

        debug!("clearing stream");
        self.shared.transport.drain()?;

        debug!("synchronizing");
        self.synchronize()?;

        debug!("waiting for server");
        self.wait_for_server()?;

        debug!("requesting file list");
        self.send_block(&data, None, None)?;

        let block = self.retrieve_block(None, None)?;
        let mut reader = PayloadReader::new(&block);
        let count = reader.read_u16_le().ok_or(Error::TruncatedBlock)?;
        debug!("file count: {}", count);

        let mut files = Vec::new();
        let mut name = String::new();
        for &value in reader.remaining() {
            if value == 0 {
                files.push(std::mem::take(&mut name));
            } else {
                name.push(value as char);
            }
        }
        Ok(files)
    }

    /// Sends a local file to the Portfolio
    pub fn send_file(
        &self,
        local_path: &Path,
        remote_path: &str,
        overwrite: bool,
        progress: &mut dyn FileProgress,
    ) -> Result<TransferOutcome> {
        self.ensure_connected()?;
        if !dos::validate_remote_path(remote_path) {
            return Err(Error::InvalidRemotePath(remote_path.to_string()));
        }

        let mut file = File::open(local_path)?;
        let file_length = u32::try_from(file.metadata()?.len()).map_err(|_| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "file is too large to send",
            ))
        })?;

        let _scope = self.shared.gate.acquire();
        let cancel = self.start_cancel_scope();
        let token = cancel.token.clone();

        {
            let mut sink = self.shared.sink();
            sink.write_line(&format!(
                "Sending '{}' to Portfolio as '{}'",
                local_path.display(),
                remote_path
            ));
            if overwrite {
                sink.write_line("Overwriting file if it exists");
            }
        }

        debug!("clearing stream");
        self.shared.transport.drain()?;

        debug!("synchronizing");
        self.synchronize()?;

        debug!("waiting for server");
        self.wait_for_server()?;

        progress.start(file_length as u64);

        let now = (self.clock)();
        let mut data = Vec::new();
        data.put_command(PortfolioCommand::SendFile);
        data.put_u16_le(MAX_BLOCK_SIZE as u16);
        data.put_u16_le(dos::pack_time(now.time()));
        data.put_u16_le(dos::pack_date(now.date()));
        data.put_u32_le(file_length);
        data.put_stringz(remote_path);

        debug!("sending file header");
        self.send_block(&data, None, None)?;

        let block = self.retrieve_block(None, None)?;
        let status = block.first().copied().ok_or(Error::TruncatedBlock)?;
        match PortfolioResponse::from_byte(status) {
            Some(PortfolioResponse::FileNotFound) => {
                debug!("destination is clear to write");
            }
            Some(PortfolioResponse::FileExists) => {
                if overwrite {
                    self.shared.sink().write_line("File exists, overwriting");
                    let mut data = Vec::new();
                    data.put_command(PortfolioCommand::Overwrite);
                    data.put_u16_le(MAX_BLOCK_SIZE as u16);
                    self.send_block(&data, None, None)?;
                } else {
                    self.shared
                        .sink()
                        .write_line(&format!("File '{}' already exists.", remote_path));
                    self.send_abort_block()?;
                    return Ok(TransferOutcome::AlreadyExists);
                }
            }
            None => {
                self.shared
                    .sink()
                    .write_line(&format!("Unexpected response from Portfolio: 0x{:02X}", status));
                return Err(Error::UnexpectedResponse(status));
            }
        }

        let mut buffer = vec![0u8; MAX_BLOCK_SIZE];
        loop {
            let length = file.read(&mut buffer)?;
            if length == 0 {
                break;
            }
            debug!("sending block of {} bytes", length);
            self.send_block(&buffer[..length], Some(&mut *progress), Some(&token))?;
            if token.is_cancelled() {
                self.shared
                    .sink()
                    .write_line("Cancelled.  Restart the server on the Portfolio to try again.");
                // Best effort; the server is already stuck mid-block
                self.send_abort_block()?;
                return Ok(TransferOutcome::Cancelled);
            }
        }

        let block = self.retrieve_block(None, None)?;
        let status = block.first().copied().ok_or(Error::TruncatedBlock)?;
        if PortfolioResponse::from_byte(status) == Some(PortfolioResponse::FileExists) {
            self.shared.sink().write_line("Success.");
            Ok(TransferOutcome::Completed)
        } else {
            self.shared.sink().write_line("Failure.");
            Ok(TransferOutcome::Failed)
        }
    }

    /// Retrieves a file from the Portfolio.  The local file is only
    /// created once the Portfolio confirms the remote file exists.
    pub fn retrieve_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        progress: &mut dyn FileProgress,
    ) -> Result<TransferOutcome> {
        self.ensure_connected()?;
        if !dos::validate_remote_path(remote_path) {
            return Err(Error::InvalidRemotePath(remote_path.to_string()));
        }

        let _scope = self.shared.gate.acquire();
        let cancel = self.start_cancel_scope();
        let token = cancel.token.clone();

        self.shared.sink().write_line(&format!(
            "Retrieving '{}' from Portfolio as '{}'",
            remote_path,
            local_path.display()
        ));

        debug!("clearing stream");
        self.shared.transport.drain()?;

        debug!("synchronizing");
        self.synchronize()?;

        debug!("waiting for server");
        self.wait_for_server()?;

        let mut data = Vec::new();
        data.put_command(PortfolioCommand::RetrieveFile);
        data.put_u16_le(MAX_BLOCK_SIZE as u16);
        data.put_stringz(remote_path);

        debug!("sending retrieve header");
        self.send_block(&data, None, None)?;

        let block = self.retrieve_block(None, None)?;
        let mut reader = PayloadReader::new(&block);
        let status = reader.read_u8().ok_or(Error::TruncatedBlock)?;
        match PortfolioResponse::from_byte(status) {
            Some(PortfolioResponse::FileExists) => {
                debug!("remote file found");
            }
            Some(PortfolioResponse::FileNotFound) => {
                self.shared
                    .sink()
                    .write_line("File was not found on the Portfolio");
                return Err(Error::RemoteFileNotFound(remote_path.to_string()));
            }
            None => {
                self.shared
                    .sink()
                    .write_line(&format!("Unexpected response from Portfolio: 0x{:02X}", status));
                return Err(Error::UnexpectedResponse(status));
            }
        }

        let _block_size = reader.read_u16_le().ok_or(Error::TruncatedBlock)?;
        let file_time = reader.read_u16_le().ok_or(Error::TruncatedBlock)?;
        let file_date = reader.read_u16_le().ok_or(Error::TruncatedBlock)?;
        let mut remaining = reader.read_u32_le().ok_or(Error::TruncatedBlock)? as i64;
        if let Some(stamp) = dos::unpack_date_time(file_date, file_time) {
            debug!("remote timestamp: {}", stamp);
        }

        progress.start(remaining as u64);

        let mut file = File::create(local_path)?;
        let mut cancelled = false;
        loop {
            let block = match self.retrieve_block(Some(&mut *progress), Some(&token)) {
                Ok(block) => block,
                Err(Error::Cancelled) => {
                    cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            remaining -= block.len() as i64;
            file.write_all(&block)?;
            if remaining <= 0 {
                break;
            }
            if token.is_cancelled() {
                cancelled = true;
                break;
            }
        }

        if cancelled || token.is_cancelled() {
            // The bridge may still be mid-send; soak up whatever trails in
            debug!("clearing stream");
            let deadline = Instant::now() + CANCEL_DRAIN_WINDOW;
            while Instant::now() < deadline {
                self.shared.transport.drain()?;
                thread::sleep(LISTENER_POLL);
            }
            self.shared
                .sink()
                .write_line("Cancelled.  Restart the server on the Portfolio to try again.");
            return Ok(TransferOutcome::Cancelled);
        }

        let mut data = Vec::new();
        data.put_command(PortfolioCommand::Success);
        data.put_u16_le(3);
        self.send_block(&data, None, None)?;
        self.shared.sink().write_line("Success.");
        Ok(TransferOutcome::Completed)
    }

    /// Tells the Portfolio server to abandon the current transfer
    fn send_abort_block(&self) -> Result<()> {
        let mut data = Vec::new();
        data.put_command(PortfolioCommand::Abort);
        data.put_u16_le(0);
        self.send_block(&data, None, None)
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Clears the active cancellation token when the operation ends, whatever
/// the outcome
struct CancelScope<'a> {
    shared: &'a Shared,
    token: CancelToken,
}

impl Drop for CancelScope<'_> {
    fn drop(&mut self) {
        *self
            .shared
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// ============================================================================
// Background Listener
// ============================================================================

/// Drains spontaneous inbound bytes and answers unsolicited pings while no
/// foreground command holds the gate
fn listener_loop(shared: &Shared) {
    while shared.connected.load(Ordering::SeqCst) {
        if !shared.gate.wait_idle(LISTENER_IDLE_WAIT) {
            continue;
        }
        match shared.transport.data_available() {
            Ok(true) => {
                if let Err(e) = handle_unsolicited(&shared.transport) {
                    debug!("listener error: {}", e);
                }
            }
            Ok(false) => thread::sleep(LISTENER_POLL),
            Err(e) => {
                debug!("listener error: {}", e);
                thread::sleep(LISTENER_POLL);
            }
        }
    }
}

/// Handles one unsolicited inbound byte
fn handle_unsolicited(transport: &ByteTransport) -> Result<()> {
    let Some(byte) = transport.try_read_byte(LISTENER_READ_TIMEOUT)? else {
        return Ok(());
    };
    match byte {
        // Keep-alive symmetry: answer sync with sync
        SYN => transport.write_byte(SYN)?,
        SOH => {
            if let Some(value) = transport.try_read_byte(LISTENER_COMMAND_TIMEOUT)? {
                if Command::from_byte(value) == Some(Command::Ping) {
                    transport.write_byte(ACK)?;
                }
            }
        }
        _ => transport.write_nak(ErrorCode::Unexpected)?,
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
