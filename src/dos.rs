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

//! Packed DOS date/time encoding and 8.3 path validation

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Packs a date into the 16-bit DOS layout:
/// 7-bit year offset from 1980, 4-bit month, 5-bit day.
pub fn pack_date(date: NaiveDate) -> u16 {
    let year = (date.year() - 1980).clamp(0, 127) as u16;
    let month = date.month() as u16;
    let day = date.day() as u16;
    (year << 9) | (month << 5) | day
}

/// Packs a time into the 16-bit DOS layout:
/// 5-bit hour, 6-bit minute, 5-bit two-second count.
pub fn pack_time(time: NaiveTime) -> u16 {
    let hour = time.hour() as u16;
    let minute = time.minute() as u16;
    let second = (time.second() / 2) as u16; // DOS stores seconds divided by 2
    (hour << 11) | (minute << 5) | second
}

/// Expands packed DOS date and time values back into a timestamp.
/// Returns None for field values that do not form a real date.
pub fn unpack_date_time(date: u16, time: u16) -> Option<NaiveDateTime> {
    let year = 1980 + (date >> 9) as i32;
    let month = ((date >> 5) & 0xF) as u32;
    let day = (date & 0x1F) as u32;

    let hour = (time >> 11) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Checks that a remote path is a DOS-style path: an optional drive letter
/// followed by components of at most eight name characters and a three
/// character extension.
pub fn validate_remote_path(path: &str) -> bool {
    if path.is_empty() || !path.is_ascii() {
        return false;
    }

    let rest = match path.split_once(':') {
        Some((drive, rest)) => {
            if drive.len() != 1 || !drive.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
                return false;
            }
            rest
        }
        None => path,
    };

    let components: Vec<&str> = rest.split(['\\', '/']).collect();
    for (index, component) in components.iter().enumerate() {
        // A leading separator (root) produces one empty component
        if component.is_empty() {
            if index == 0 {
                continue;
            }
            return false;
        }
        let (name, ext) = match component.split_once('.') {
            Some((name, ext)) => (name, Some(ext)),
            None => (*component, None),
        };
        if name.is_empty() || name.len() > 8 {
            return false;
        }
        if let Some(ext) = ext {
            if ext.is_empty() || ext.len() > 3 || ext.contains('.') {
                return false;
            }
        }
        if component.contains([' ', '\0']) {
            return false;
        }
    }
    true
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_date() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 28).unwrap();
        assert_eq!(pack_date(date), ((2026 - 1980) << 9) | (8 << 5) | 28);

        // Epoch packs to january first with a zero year offset
        let epoch = NaiveDate::from_ymd_opt(1980, 1, 1).unwrap();
        assert_eq!(pack_date(epoch), (1 << 5) | 1);
    }

    #[test]
    fn test_pack_time() {
        let time = NaiveTime::from_hms_opt(23, 59, 58).unwrap();
        assert_eq!(pack_time(time), (23 << 11) | (59 << 5) | 29);

        let time = NaiveTime::from_hms_opt(0, 0, 1).unwrap();
        assert_eq!(pack_time(time), 0); // odd seconds round down
    }

    #[test]
    fn test_unpack_round_trip() {
        let stamp = NaiveDate::from_ymd_opt(1991, 12, 3)
            .unwrap()
            .and_hms_opt(14, 30, 44)
            .unwrap();
        let unpacked =
            unpack_date_time(pack_date(stamp.date()), pack_time(stamp.time())).unwrap();
        assert_eq!(unpacked, stamp);
    }

    #[test]
    fn test_unpack_rejects_invalid_date() {
        // Month 15 does not exist
        assert_eq!(unpack_date_time(15 << 5 | 1, 0), None);
    }

    #[test]
    fn test_validate_remote_path() {
        assert!(validate_remote_path("FILE.TXT"));
        assert!(validate_remote_path("C:\\FILE.TXT"));
        assert!(validate_remote_path("C:\\SUBDIR\\FILE.TXT"));
        assert!(validate_remote_path("C:/SUBDIR/FILE.TXT"));
        assert!(validate_remote_path("README"));
        assert!(validate_remote_path("A.C"));

        assert!(!validate_remote_path(""));
        assert!(!validate_remote_path("TOOLONGNAME.TXT"));
        assert!(!validate_remote_path("FILE.LONG"));
        assert!(!validate_remote_path("FILE..TXT"));
        assert!(!validate_remote_path("C:\\"));
        assert!(!validate_remote_path("BAD NAME.TXT"));
        assert!(!validate_remote_path("CC:\\FILE.TXT"));
    }
}
