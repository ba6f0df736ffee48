use std::io;

/// Error taxonomy for every operation exposed by this crate.
///
/// Every variant maps onto one of the five kinds an operation can fail
/// with: a malformed on-disk image, an unsupported-but-recognised
/// feature, an invalid identifier, an invalid request given the current
/// session state, or a state error (session not open / already open).
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// I/O error from the underlying reader/writer.
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  // -- MalformedImage --------------------------------------------------
  #[error("descriptor type {found} at extent {extent} does not match identifier {identifier:?}")]
  UnknownDescriptorType { extent: u32, found: u8, identifier: [u8; 5] },

  #[error("volume descriptor at extent {extent} has bad standard identifier {found:?}")]
  BadStandardIdentifier { extent: u32, found: [u8; 5] },

  #[error("volume descriptor at extent {extent} has unsupported version {found}")]
  BadDescriptorVersion { extent: u32, found: u8 },

  #[error("field {field} disagrees between its little- and big-endian halves: {le} != {be}")]
  LeBeMismatch { field: &'static str, le: u32, be: u32 },

  #[error("no primary volume descriptor found in the descriptor set")]
  MissingPrimaryVolumeDescriptor,

  #[error("no volume descriptor set terminator found")]
  MissingSetTerminator,

  #[error("multiple primary volume descriptors present and not byte-identical")]
  ConflictingPrimaryVolumeDescriptors,

  #[error("directory record at extent {extent} offset {offset} crosses a block boundary")]
  RecordCrossesBlockBoundary { extent: u32, offset: usize },

  #[error("reserved field {field} at extent {extent} was not zero")]
  ReservedFieldNotZero { extent: u32, field: &'static str },

  #[error("path table LE/BE mismatch at record {index}")]
  PathTableMismatch { index: usize },

  #[error("El Torito boot catalog checksum is invalid")]
  BadElToritoChecksum,

  #[error("isohybrid MBR signature bytes are invalid")]
  BadIsohybridSignature,

  // -- Unsupported ------------------------------------------------------
  #[error("volume partition descriptors are not supported")]
  VolumePartitionDescriptor,

  #[error("more than one {0} supplementary volume descriptor is present")]
  DuplicateSupplementaryVolumeDescriptor(&'static str),

  #[error("optional path table locations are not supported")]
  OptionalPathTableLocation,

  // -- InvalidName --------------------------------------------------------
  #[error("identifier {0:?} contains characters outside the permitted d1-character set")]
  InvalidCharacters(String),

  #[error("identifier {name:?} exceeds the level-{level} length limit of {limit}")]
  NameTooLong { name: String, level: u8, limit: usize },

  #[error("identifier must not be empty")]
  EmptyIdentifier,

  #[error("Joliet name {0:?} exceeds 64 UCS-2 code units")]
  JolietNameTooLong(String),

  #[error("path {0:?} exceeds the maximum tree depth")]
  PathTooDeep(String),

  // -- InvalidRequest -----------------------------------------------------
  #[error("a Rock Ridge path was supplied but Rock Ridge is not enabled for this session")]
  RockRidgeNotEnabled,

  #[error("Rock Ridge is enabled but no Rock Ridge name was supplied")]
  RockRidgeNameRequired,

  #[error("a Joliet path was supplied but Joliet is not enabled for this session")]
  JolietNotEnabled,

  #[error("hard link target {0:?} does not exist")]
  HardLinkTargetMissing(String),

  #[error("in-place update of {path:?} changed block count from {old} to {new}")]
  InPlaceBlockCountChanged { path: String, old: u32, new: u32 },

  #[error("cannot remove non-empty directory {0:?}")]
  DirectoryNotEmpty(String),

  #[error("no El Torito boot record is attached to this session")]
  NoElToritoPresent,

  #[error("isohybrid signature check failed: boot code must start with 0x33 0xED")]
  IsohybridSignatureCheck,

  #[error("isohybrid overlay requires an El Torito boot record to already be attached")]
  IsohybridRequiresElTorito,

  #[error("path {0:?} was not found")]
  NotFound(String),

  #[error("path {0:?} already exists")]
  AlreadyExists(String),

  #[error("file payload references the source image, but this session retains none")]
  SourceImageUnavailable,

  // -- StateError -----------------------------------------------------------
  #[error("operation requires an opened session, but none is open")]
  SessionNotOpen,

  #[error("session is already open")]
  SessionAlreadyOpen,
}

pub type Result<T> = std::result::Result<T, Error>;
