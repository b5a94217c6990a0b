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

//! Collaborator interfaces for messages and transfer progress

/// Always-visible operational messages.  Verbose traffic goes through
/// `tracing` instead and can be filtered out.
pub trait MessageSink: Send {
    /// Appends text to the current line
    fn write(&mut self, text: &str);

    /// Writes a complete line
    fn write_line(&mut self, text: &str);
}

/// Transfer progress reporting, mapped to a percentage by the consumer
pub trait FileProgress {
    /// Called once with the total transfer size in bytes
    fn start(&mut self, total_bytes: u64);

    /// Called once per transferred chunk or byte group
    fn increment(&mut self, bytes: u64);
}

/// Progress sink that ignores all reports
pub struct NullProgress;

impl FileProgress for NullProgress {
    fn start(&mut self, _total_bytes: u64) {}

    fn increment(&mut self, _bytes: u64) {}
}
