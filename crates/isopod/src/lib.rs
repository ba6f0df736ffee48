// ISO 9660 library implementation
//
// This library provides functionality for creating, reading, and
// manipulating ISO 9660 filesystem images, including the Joliet, Rock
// Ridge, El Torito, and isohybrid extensions.

mod dirrecord;
mod eltorito;
mod error;
mod ident;
mod isohybrid;
mod layout;
mod numeric;
mod pathtable;
mod rockridge;
mod session;
mod tree;
mod volume;

pub use dirrecord::{DirectoryRecord, RecordFlags, RecordIdentifier, SpecialIdentifier};
pub use eltorito::{
  BootCatalog, BootEntry, BootInfoTable, BootMediaType, PlatformId, Section, SectionHeader, ValidationEntry,
};
pub use error::Error;
pub use ident::{FileIdentifierParts, InterchangeLevel};
pub use isohybrid::{IsohybridMbr, MbrPartitionEntry};
pub use numeric::{RecordTimestamp, VolumeTimestamp};
pub use pathtable::{ByteOrder, PathTable, PathTableRecord};
pub use rockridge::{NameFlags, PosixFileAttributes, RockRidgeEntry, SymlinkComponent, SymlinkComponentFlags, TimestampFlags};
pub use session::{FeatureFlags, IsoBuilder, ParseStrictness, Session, SessionOptions};
pub use tree::{FileSource, NodeEntry, NodeHandle};
pub use volume::{
  BootRecordDescriptor, JolietLevel, PrimaryVolumeDescriptor, RootRecordSummary, SupplementaryKind, SupplementaryVolumeDescriptor,
  VolumeDescriptor,
};

/// Result type for operations that may return an Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// ISO 9660 standard constants.
pub mod constants {
  /// Standard identifier for ISO 9660.
  pub const ISO_STANDARD_ID: &[u8; 5] = b"CD001";

  /// Volume descriptor types (ECMA-119 §8.1.2).
  pub mod volume_type {
    pub const BOOT_RECORD: u8 = 0;
    pub const PRIMARY_VOLUME_DESCRIPTOR: u8 = 1;
    pub const SUPPLEMENTARY_VOLUME_DESCRIPTOR: u8 = 2;
    pub const VOLUME_PARTITION_DESCRIPTOR: u8 = 3;
    pub const VOLUME_DESCRIPTOR_SET_TERMINATOR: u8 = 255;
  }

  /// Logical block / sector size (2048 bytes).
  pub const SECTOR_SIZE: usize = 2048;

  /// Maximum filename length in ISO 9660 Level 1.
  pub const MAX_FILENAME_LENGTH_LEVEL_1: usize = 8;

  /// Maximum extension length in ISO 9660 Level 1.
  pub const MAX_EXTENSION_LENGTH_LEVEL_1: usize = 3;

  /// Maximum unrelocated directory nesting depth.
  pub const MAX_PATH_DEPTH: usize = 8;
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn end_to_end_single_file_no_extensions() {
    let mut session = Session::new_session(SessionOptions { volume_id: "MYDISC".to_string(), ..SessionOptions::default() });
    session.add_directory("/DOCS").unwrap();
    session.add_file(FileSource::InMemory(b"hello world".to_vec()), "/DOCS/A.TXT;1", None).unwrap();

    let mut image = Cursor::new(Vec::new());
    session.write(&mut image).unwrap();

    let mut out = Vec::new();
    session.get_and_write("/DOCS/A.TXT;1", &mut out).unwrap();
    assert_eq!(out, b"hello world");
  }

  #[test]
  fn joliet_parallel_tree_keeps_one_payload() {
    let mut session = Session::new_session(SessionOptions {
      volume_id: "MYDISC".to_string(),
      features: FeatureFlags { joliet: true, rock_ridge: false },
      ..SessionOptions::default()
    });
    session.add_file(FileSource::InMemory(vec![9; 10]), "/LONGNAME.TXT;1", Some("a very long name.txt")).unwrap();
    let mut image = Cursor::new(Vec::new());
    session.write(&mut image).unwrap();
    assert!(session.lookup("/LONGNAME.TXT;1").is_ok());
  }

  #[test]
  fn write_then_reopen_then_write_is_idempotent() {
    let mut session = Session::new_session(SessionOptions { volume_id: "STABLE".to_string(), ..SessionOptions::default() });
    session.add_file(FileSource::InMemory(vec![1, 2, 3]), "/A.TXT;1", None).unwrap();
    let mut first = Cursor::new(Vec::new());
    session.write(&mut first).unwrap();

    let mut reopened = Session::open_session(Cursor::new(first.clone().into_inner()), ParseStrictness::Lenient).unwrap();
    let mut second = Cursor::new(Vec::new());
    reopened.write(&mut second).unwrap();
    assert_eq!(first.into_inner().len(), second.into_inner().len());
  }
}
