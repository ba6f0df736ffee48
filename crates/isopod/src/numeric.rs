//! ECMA-119 §7 numeric and date encodings.
//!
//! ISO 9660 stores most multi-byte integers twice: once little-endian,
//! once big-endian, back to back ("both-byte order", §7.2.3/§7.3.3).
//! A parser must check the two halves agree; a writer only ever has one
//! canonical value to derive both halves from.

use crate::error::{Error, Result};

/// A 16-bit value stored both-byte-order (4 bytes on the wire).
pub fn read_u16_lsb_msb(field: &'static str, buf: &[u8]) -> Result<u16> {
  let le = u16::from_le_bytes([buf[0], buf[1]]);
  let be = u16::from_be_bytes([buf[2], buf[3]]);
  if le != be {
    return Err(Error::LeBeMismatch { field, le: le as u32, be: be as u32 });
  }
  Ok(le)
}

pub fn write_u16_lsb_msb(buf: &mut [u8], value: u16) {
  buf[0..2].copy_from_slice(&value.to_le_bytes());
  buf[2..4].copy_from_slice(&value.to_be_bytes());
}

/// A 32-bit value stored both-byte-order (8 bytes on the wire).
pub fn read_u32_lsb_msb(field: &'static str, buf: &[u8]) -> Result<u32> {
  let le = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
  let be = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
  if le != be {
    return Err(Error::LeBeMismatch { field, le, be });
  }
  Ok(le)
}

pub fn write_u32_lsb_msb(buf: &mut [u8], value: u32) {
  buf[0..4].copy_from_slice(&value.to_le_bytes());
  buf[4..8].copy_from_slice(&value.to_be_bytes());
}

/// The 17-byte decimal volume date/time used by the volume descriptors
/// (`YYYYMMDDHHMMSSCC` plus a GMT offset in 15-minute units). All-zero
/// digits with a `0` offset denotes "not specified".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeTimestamp {
  pub year: u16,
  pub month: u8,
  pub day: u8,
  pub hour: u8,
  pub minute: u8,
  pub second: u8,
  pub hundredths: u8,
  pub gmt_offset: i8,
}

impl VolumeTimestamp {
  pub const UNSPECIFIED: VolumeTimestamp =
    VolumeTimestamp { year: 0, month: 0, day: 0, hour: 0, minute: 0, second: 0, hundredths: 0, gmt_offset: 0 };

  pub fn now() -> Self {
    Self::from_chrono(chrono::Utc::now())
  }

  pub fn from_chrono(dt: chrono::DateTime<chrono::Utc>) -> Self {
    use chrono::{Datelike, Timelike};
    VolumeTimestamp {
      year: dt.year() as u16,
      month: dt.month() as u8,
      day: dt.day() as u8,
      hour: dt.hour() as u8,
      minute: dt.minute() as u8,
      second: dt.second() as u8,
      hundredths: (dt.timestamp_subsec_millis() / 10) as u8,
      gmt_offset: 0,
    }
  }

  pub fn parse(buf: &[u8; 17]) -> Self {
    let digits = |range: std::ops::Range<usize>, default: u32| -> u32 {
      std::str::from_utf8(&buf[range])
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(default)
    };
    VolumeTimestamp {
      year: digits(0..4, 0) as u16,
      month: digits(4..6, 0) as u8,
      day: digits(6..8, 0) as u8,
      hour: digits(8..10, 0) as u8,
      minute: digits(10..12, 0) as u8,
      second: digits(12..14, 0) as u8,
      hundredths: digits(14..16, 0) as u8,
      gmt_offset: buf[16] as i8,
    }
  }

  pub fn write(&self, buf: &mut [u8; 17]) {
    if *self == Self::UNSPECIFIED {
      buf[0..16].fill(b'0');
      buf[16] = 0;
      return;
    }
    let s = format!(
      "{:04}{:02}{:02}{:02}{:02}{:02}{:02}",
      self.year, self.month, self.day, self.hour, self.minute, self.second, self.hundredths
    );
    buf[0..16].copy_from_slice(s.as_bytes());
    buf[16] = self.gmt_offset as u8;
  }
}

/// The 7-byte binary directory-record date/time (§9.1.5): year since
/// 1900, month, day, hour, minute, second, GMT offset in 15-minute units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTimestamp {
  pub years_since_1900: u8,
  pub month: u8,
  pub day: u8,
  pub hour: u8,
  pub minute: u8,
  pub second: u8,
  pub gmt_offset: i8,
}

impl RecordTimestamp {
  pub fn now() -> Self {
    Self::from_chrono(chrono::Utc::now())
  }

  pub fn from_chrono(dt: chrono::DateTime<chrono::Utc>) -> Self {
    use chrono::{Datelike, Timelike};
    RecordTimestamp {
      years_since_1900: (dt.year() - 1900).clamp(0, 255) as u8,
      month: dt.month() as u8,
      day: dt.day() as u8,
      hour: dt.hour() as u8,
      minute: dt.minute() as u8,
      second: dt.second() as u8,
      gmt_offset: 0,
    }
  }

  pub fn parse(buf: &[u8; 7]) -> Self {
    RecordTimestamp {
      years_since_1900: buf[0],
      month: buf[1],
      day: buf[2],
      hour: buf[3],
      minute: buf[4],
      second: buf[5],
      gmt_offset: buf[6] as i8,
    }
  }

  pub fn write(&self, buf: &mut [u8; 7]) {
    buf[0] = self.years_since_1900;
    buf[1] = self.month;
    buf[2] = self.day;
    buf[3] = self.hour;
    buf[4] = self.minute;
    buf[5] = self.second;
    buf[6] = self.gmt_offset as u8;
  }
}

/// Project a byte length onto a whole number of logical blocks.
pub fn blocks_for_bytes(bytes: u32, block_size: u32) -> u32 {
  bytes.div_ceil(block_size)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn u16_round_trips() {
    let mut buf = [0u8; 4];
    write_u16_lsb_msb(&mut buf, 0x1234);
    assert_eq!(read_u16_lsb_msb("test", &buf).unwrap(), 0x1234);
  }

  #[test]
  fn u32_round_trips() {
    let mut buf = [0u8; 8];
    write_u32_lsb_msb(&mut buf, 0xdead_beef);
    assert_eq!(read_u32_lsb_msb("test", &buf).unwrap(), 0xdead_beef);
  }

  #[test]
  fn u32_mismatch_rejected() {
    let mut buf = [0u8; 8];
    write_u32_lsb_msb(&mut buf, 42);
    buf[7] ^= 0xff;
    assert!(read_u32_lsb_msb("test", &buf).is_err());
  }

  #[test]
  fn volume_timestamp_round_trips() {
    let ts = VolumeTimestamp { year: 2026, month: 7, day: 27, hour: 1, minute: 2, second: 3, hundredths: 4, gmt_offset: 8 };
    let mut buf = [0u8; 17];
    ts.write(&mut buf);
    assert_eq!(VolumeTimestamp::parse(&buf), ts);
  }

  #[test]
  fn blocks_for_bytes_rounds_up() {
    assert_eq!(blocks_for_bytes(0, 2048), 0);
    assert_eq!(blocks_for_bytes(1, 2048), 1);
    assert_eq!(blocks_for_bytes(2048, 2048), 1);
    assert_eq!(blocks_for_bytes(2049, 2048), 2);
  }
}
