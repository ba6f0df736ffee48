//! ECMA-119 §9.1 directory records: the 33-byte fixed header, the
//! d-character identifier, and a trailing system-use area that carries
//! Rock Ridge SUSP entries when enabled.

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::numeric::{read_u16_lsb_msb, read_u32_lsb_msb, write_u16_lsb_msb, write_u32_lsb_msb, RecordTimestamp};

bitflags! {
  /// File flags byte (§9.1.6).
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct RecordFlags: u8 {
    const HIDDEN          = 0x01;
    const DIRECTORY       = 0x02;
    const ASSOCIATED_FILE = 0x04;
    const RECORD          = 0x08;
    const PROTECTION      = 0x10;
    const MULTI_EXTENT    = 0x80;
  }
}

/// The special single-byte identifiers `.` (0x00) and `..` (0x01) used
/// for self/parent directory records (§9.1.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialIdentifier {
  SelfDirectory,
  ParentDirectory,
}

/// A directory record's name: either a regular d-character identifier
/// or one of the two special single-byte self/parent markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordIdentifier {
  Special(SpecialIdentifier),
  Named(String),
}

impl RecordIdentifier {
  fn byte_len(&self) -> usize {
    match self {
      RecordIdentifier::Special(_) => 1,
      RecordIdentifier::Named(s) => s.len(),
    }
  }

  fn write(&self, buf: &mut [u8]) {
    match self {
      RecordIdentifier::Special(SpecialIdentifier::SelfDirectory) => buf[0] = 0x00,
      RecordIdentifier::Special(SpecialIdentifier::ParentDirectory) => buf[0] = 0x01,
      RecordIdentifier::Named(s) => buf[..s.len()].copy_from_slice(s.as_bytes()),
    }
  }
}

/// A parsed ECMA-119 directory record, plus whatever raw system-use
/// bytes trailed the identifier (Rock Ridge entries, if any).
#[derive(Debug, Clone)]
pub struct DirectoryRecord {
  pub extended_attr_length: u8,
  pub extent: u32,
  pub data_length: u32,
  pub recorded: RecordTimestamp,
  pub flags: RecordFlags,
  pub file_unit_size: u8,
  pub interleave_gap: u8,
  pub volume_sequence_number: u16,
  pub identifier: RecordIdentifier,
  pub system_use: Vec<u8>,
}

impl DirectoryRecord {
  pub fn new_file(name: &str, extent: u32, data_length: u32, recorded: RecordTimestamp) -> Self {
    Self {
      extended_attr_length: 0,
      extent,
      data_length,
      recorded,
      flags: RecordFlags::empty(),
      file_unit_size: 0,
      interleave_gap: 0,
      volume_sequence_number: 1,
      identifier: RecordIdentifier::Named(name.to_string()),
      system_use: Vec::new(),
    }
  }

  pub fn new_directory(name: &str, extent: u32, data_length: u32, recorded: RecordTimestamp) -> Self {
    Self { flags: RecordFlags::DIRECTORY, ..Self::new_file(name, extent, data_length, recorded) }
  }

  pub fn new_special(which: SpecialIdentifier, extent: u32, data_length: u32, recorded: RecordTimestamp) -> Self {
    Self {
      extended_attr_length: 0,
      extent,
      data_length,
      recorded,
      flags: RecordFlags::DIRECTORY,
      file_unit_size: 0,
      interleave_gap: 0,
      volume_sequence_number: 1,
      identifier: RecordIdentifier::Special(which),
      system_use: Vec::new(),
    }
  }

  pub fn is_directory(&self) -> bool {
    self.flags.contains(RecordFlags::DIRECTORY)
  }

  /// Total on-disk length of this record, including the name-length
  /// padding byte required when the identifier has even length
  /// (§9.1.12) and the trailing system-use area.
  pub fn encoded_len(&self) -> usize {
    let name_len = self.identifier.byte_len();
    let padding = if name_len % 2 == 0 { 1 } else { 0 };
    33 + name_len + padding + self.system_use.len()
  }

  pub fn write(&self, buf: &mut [u8]) -> Result<()> {
    let len = self.encoded_len();
    if buf.len() < len {
      return Err(Error::RecordCrossesBlockBoundary { extent: self.extent, offset: 0 });
    }
    buf[0] = len as u8;
    buf[1] = self.extended_attr_length;
    write_u32_lsb_msb(&mut buf[2..10], self.extent);
    write_u32_lsb_msb(&mut buf[10..18], self.data_length);
    let mut date = [0u8; 7];
    self.recorded.write(&mut date);
    buf[18..25].copy_from_slice(&date);
    buf[25] = self.flags.bits();
    buf[26] = self.file_unit_size;
    buf[27] = self.interleave_gap;
    write_u16_lsb_msb(&mut buf[28..32], self.volume_sequence_number);
    let name_len = self.identifier.byte_len();
    buf[32] = name_len as u8;
    self.identifier.write(&mut buf[33..33 + name_len]);
    let mut offset = 33 + name_len;
    if name_len % 2 == 0 {
      buf[offset] = 0;
      offset += 1;
    }
    buf[offset..offset + self.system_use.len()].copy_from_slice(&self.system_use);
    Ok(())
  }

  /// Parse one record starting at `buf[0]`. Returns `None` at a
  /// zero-length byte, which marks the end of records within a block
  /// (§9.1, the padding that fills out a directory's last sector).
  pub fn parse(extent_hint: u32, buf: &[u8]) -> Result<Option<Self>> {
    if buf.is_empty() || buf[0] == 0 {
      return Ok(None);
    }
    let record_len = buf[0] as usize;
    if record_len < 33 || record_len > buf.len() {
      return Err(Error::RecordCrossesBlockBoundary { extent: extent_hint, offset: 0 });
    }
    let extent = read_u32_lsb_msb("directory_record.extent", &buf[2..10])?;
    let data_length = read_u32_lsb_msb("directory_record.data_length", &buf[10..18])?;
    let recorded = RecordTimestamp::parse(buf[18..25].try_into().unwrap());
    let flags = RecordFlags::from_bits_truncate(buf[25]);
    let file_unit_size = buf[26];
    let interleave_gap = buf[27];
    let volume_sequence_number = read_u16_lsb_msb("directory_record.volume_sequence_number", &buf[28..32])?;
    let name_len = buf[32] as usize;
    if 33 + name_len > record_len {
      return Err(Error::RecordCrossesBlockBoundary { extent, offset: 33 });
    }
    let identifier = if flags.contains(RecordFlags::DIRECTORY) && name_len == 1 && (buf[33] == 0 || buf[33] == 1) {
      RecordIdentifier::Special(if buf[33] == 0 { SpecialIdentifier::SelfDirectory } else { SpecialIdentifier::ParentDirectory })
    } else {
      RecordIdentifier::Named(String::from_utf8_lossy(&buf[33..33 + name_len]).to_string())
    };
    let mut offset = 33 + name_len;
    if name_len % 2 == 0 {
      offset += 1;
    }
    let system_use = buf[offset..record_len].to_vec();
    Ok(Some(Self {
      extended_attr_length: buf[1],
      extent,
      data_length,
      recorded,
      flags,
      file_unit_size,
      interleave_gap,
      volume_sequence_number,
      identifier,
      system_use,
    }))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_record_round_trips() {
    let rec = DirectoryRecord::new_file("FOO.TXT;1", 100, 2048, RecordTimestamp::now());
    let mut buf = vec![0u8; rec.encoded_len()];
    rec.write(&mut buf).unwrap();
    let parsed = DirectoryRecord::parse(0, &buf).unwrap().unwrap();
    assert_eq!(parsed.extent, 100);
    assert_eq!(parsed.data_length, 2048);
    assert!(!parsed.is_directory());
    assert_eq!(parsed.identifier, RecordIdentifier::Named("FOO.TXT;1".to_string()));
  }

  #[test]
  fn directory_record_round_trips() {
    let rec = DirectoryRecord::new_directory("SUBDIR", 50, 2048, RecordTimestamp::now());
    let mut buf = vec![0u8; rec.encoded_len()];
    rec.write(&mut buf).unwrap();
    let parsed = DirectoryRecord::parse(0, &buf).unwrap().unwrap();
    assert!(parsed.is_directory());
  }

  #[test]
  fn special_self_and_parent_round_trip() {
    for which in [SpecialIdentifier::SelfDirectory, SpecialIdentifier::ParentDirectory] {
      let rec = DirectoryRecord::new_special(which, 10, 2048, RecordTimestamp::now());
      let mut buf = vec![0u8; rec.encoded_len()];
      rec.write(&mut buf).unwrap();
      let parsed = DirectoryRecord::parse(0, &buf).unwrap().unwrap();
      assert_eq!(parsed.identifier, RecordIdentifier::Special(which));
    }
  }

  #[test]
  fn zero_length_byte_signals_end_of_block() {
    let buf = [0u8; 33];
    assert!(DirectoryRecord::parse(0, &buf).unwrap().is_none());
  }

  #[test]
  fn even_length_name_gets_padding_byte() {
    // "AB" (2 bytes) is even -> one pad byte -> encoded_len = 33 + 2 + 1 = 36
    let rec = DirectoryRecord::new_file("AB", 1, 1, RecordTimestamp::now());
    assert_eq!(rec.encoded_len(), 36);
    // "ABC" (3 bytes) is odd -> no pad byte -> encoded_len = 33 + 3 = 36 too,
    // but via a different split; check the no-padding arithmetic directly.
    let rec2 = DirectoryRecord::new_file("ABC", 1, 1, RecordTimestamp::now());
    assert_eq!(rec2.encoded_len(), 36);
  }

  #[test]
  fn system_use_area_round_trips() {
    let mut rec = DirectoryRecord::new_file("FOO", 1, 1, RecordTimestamp::now());
    rec.system_use = vec![b'R', b'R', 5, 1, 0xAB];
    let mut buf = vec![0u8; rec.encoded_len()];
    rec.write(&mut buf).unwrap();
    let parsed = DirectoryRecord::parse(0, &buf).unwrap().unwrap();
    assert_eq!(parsed.system_use, rec.system_use);
  }
}
