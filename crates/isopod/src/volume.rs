//! ECMA-119 §8 volume descriptors: Primary, Supplementary (Joliet /
//! Enhanced), Boot Record, Set Terminator, and the informal Version
//! descriptor some authoring tools emit after the terminator.

use crate::constants::{volume_type, ISO_STANDARD_ID, SECTOR_SIZE};
use crate::error::{Error, Result};
use crate::numeric::{read_u16_lsb_msb, read_u32_lsb_msb, write_u16_lsb_msb, write_u32_lsb_msb, VolumeTimestamp};

fn read_a_string(buf: &[u8]) -> String {
  String::from_utf8_lossy(buf).trim_end().to_string()
}

fn write_a_string(buf: &mut [u8], s: &str) {
  buf.fill(b' ');
  let bytes = s.as_bytes();
  let n = bytes.len().min(buf.len());
  buf[..n].copy_from_slice(&bytes[..n]);
}

fn write_d_string(buf: &mut [u8], s: &str) {
  write_a_string(buf, &s.to_uppercase());
}

/// Everything the root directory record embedded in a PVD/SVD needs;
/// the full `DirectoryRecord` lives in the tree and is kept in sync with
/// this summary by the extent re-packer (see `layout`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootRecordSummary {
  pub extent: u32,
  pub data_length: u32,
}

const ROOT_RECORD_LEN: usize = 34;

fn write_root_record(buf: &mut [u8], summary: &RootRecordSummary, recording_date: crate::numeric::RecordTimestamp) {
  buf[0] = ROOT_RECORD_LEN as u8;
  buf[1] = 0; // extended attribute record length
  write_u32_lsb_msb(&mut buf[2..10], summary.extent);
  write_u32_lsb_msb(&mut buf[10..18], summary.data_length);
  let mut date = [0u8; 7];
  recording_date.write(&mut date);
  buf[18..25].copy_from_slice(&date);
  buf[25] = 0x02; // directory flag
  buf[26] = 0; // file unit size
  buf[27] = 0; // interleave gap
  write_u16_lsb_msb(&mut buf[28..32], 1);
  buf[32] = 1; // identifier length
  buf[33] = 0x00; // "."
}

fn read_root_record(buf: &[u8]) -> Result<RootRecordSummary> {
  Ok(RootRecordSummary {
    extent: read_u32_lsb_msb("root_directory_record.extent", &buf[2..10])?,
    data_length: read_u32_lsb_msb("root_directory_record.data_length", &buf[10..18])?,
  })
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryVolumeDescriptor {
  pub system_id: String,
  pub volume_id: String,
  pub volume_space_size: u32,
  pub volume_set_size: u16,
  pub volume_sequence_number: u16,
  pub logical_block_size: u16,
  pub path_table_size: u32,
  pub type_l_path_table: u32,
  pub opt_type_l_path_table: u32,
  pub type_m_path_table: u32,
  pub opt_type_m_path_table: u32,
  pub root_directory_record: RootRecordSummary,
  pub volume_set_id: String,
  pub publisher_id: String,
  pub preparer_id: String,
  pub application_id: String,
  pub copyright_file_id: String,
  pub abstract_file_id: String,
  pub bibliographic_file_id: String,
  pub creation_date: VolumeTimestamp,
  pub modification_date: VolumeTimestamp,
  pub expiration_date: VolumeTimestamp,
  pub effective_date: VolumeTimestamp,
  pub file_structure_version: u8,
  pub application_use: Vec<u8>,
}

impl PrimaryVolumeDescriptor {
  pub fn new(volume_id: &str, publisher_id: &str, preparer_id: &str, application_id: &str) -> Self {
    let now = VolumeTimestamp::now();
    Self {
      system_id: String::new(),
      volume_id: volume_id.to_string(),
      volume_space_size: 0,
      volume_set_size: 1,
      volume_sequence_number: 1,
      logical_block_size: SECTOR_SIZE as u16,
      path_table_size: 10,
      type_l_path_table: 0,
      opt_type_l_path_table: 0,
      type_m_path_table: 0,
      opt_type_m_path_table: 0,
      root_directory_record: RootRecordSummary::default(),
      volume_set_id: String::new(),
      publisher_id: publisher_id.to_string(),
      preparer_id: preparer_id.to_string(),
      application_id: application_id.to_string(),
      copyright_file_id: String::new(),
      abstract_file_id: String::new(),
      bibliographic_file_id: String::new(),
      creation_date: now,
      modification_date: now,
      expiration_date: VolumeTimestamp::UNSPECIFIED,
      effective_date: VolumeTimestamp::UNSPECIFIED,
      file_structure_version: 1,
      application_use: vec![0u8; 512],
    }
  }

  pub fn parse(extent: u32, buf: &[u8]) -> Result<Self> {
    if buf[6] != 1 {
      return Err(Error::BadDescriptorVersion { extent, found: buf[6] });
    }
    Ok(Self {
      system_id: read_a_string(&buf[8..40]),
      volume_id: read_a_string(&buf[40..72]),
      volume_space_size: read_u32_lsb_msb("volume_space_size", &buf[80..88])?,
      volume_set_size: read_u16_lsb_msb("volume_set_size", &buf[120..124])?,
      volume_sequence_number: read_u16_lsb_msb("volume_sequence_number", &buf[124..128])?,
      logical_block_size: read_u16_lsb_msb("logical_block_size", &buf[128..132])?,
      path_table_size: read_u32_lsb_msb("path_table_size", &buf[132..140])?,
      type_l_path_table: u32::from_le_bytes(buf[140..144].try_into().unwrap()),
      opt_type_l_path_table: u32::from_le_bytes(buf[144..148].try_into().unwrap()),
      type_m_path_table: u32::from_be_bytes(buf[148..152].try_into().unwrap()),
      opt_type_m_path_table: u32::from_be_bytes(buf[152..156].try_into().unwrap()),
      root_directory_record: read_root_record(&buf[156..190])?,
      volume_set_id: read_a_string(&buf[190..318]),
      publisher_id: read_a_string(&buf[318..446]),
      preparer_id: read_a_string(&buf[446..574]),
      application_id: read_a_string(&buf[574..702]),
      copyright_file_id: read_a_string(&buf[702..739]),
      abstract_file_id: read_a_string(&buf[739..776]),
      bibliographic_file_id: read_a_string(&buf[776..813]),
      creation_date: VolumeTimestamp::parse(buf[813..830].try_into().unwrap()),
      modification_date: VolumeTimestamp::parse(buf[830..847].try_into().unwrap()),
      expiration_date: VolumeTimestamp::parse(buf[847..864].try_into().unwrap()),
      effective_date: VolumeTimestamp::parse(buf[864..881].try_into().unwrap()),
      file_structure_version: buf[881],
      application_use: buf[883..1395].to_vec(),
    })
  }

  pub fn write(&self, buf: &mut [u8]) {
    buf[0] = volume_type::PRIMARY_VOLUME_DESCRIPTOR;
    buf[1..6].copy_from_slice(ISO_STANDARD_ID);
    buf[6] = 1;
    write_a_string(&mut buf[8..40], &self.system_id);
    write_d_string(&mut buf[40..72], &self.volume_id);
    write_u32_lsb_msb(&mut buf[80..88], self.volume_space_size);
    write_u16_lsb_msb(&mut buf[120..124], self.volume_set_size);
    write_u16_lsb_msb(&mut buf[124..128], self.volume_sequence_number);
    write_u16_lsb_msb(&mut buf[128..132], self.logical_block_size);
    write_u32_lsb_msb(&mut buf[132..140], self.path_table_size);
    buf[140..144].copy_from_slice(&self.type_l_path_table.to_le_bytes());
    buf[144..148].copy_from_slice(&self.opt_type_l_path_table.to_le_bytes());
    buf[148..152].copy_from_slice(&self.type_m_path_table.to_be_bytes());
    buf[152..156].copy_from_slice(&self.opt_type_m_path_table.to_be_bytes());
    write_root_record(&mut buf[156..190], &self.root_directory_record, crate::numeric::RecordTimestamp::now());
    write_d_string(&mut buf[190..318], &self.volume_set_id);
    write_a_string(&mut buf[318..446], &self.publisher_id);
    write_a_string(&mut buf[446..574], &self.preparer_id);
    write_a_string(&mut buf[574..702], &self.application_id);
    write_d_string(&mut buf[702..739], &self.copyright_file_id);
    write_d_string(&mut buf[739..776], &self.abstract_file_id);
    write_d_string(&mut buf[776..813], &self.bibliographic_file_id);
    self.creation_date.write(buf[813..830].try_into().unwrap());
    self.modification_date.write(buf[830..847].try_into().unwrap());
    self.expiration_date.write(buf[847..864].try_into().unwrap());
    self.effective_date.write(buf[864..881].try_into().unwrap());
    buf[881] = self.file_structure_version;
    buf[882] = 0;
    let n = self.application_use.len().min(512);
    buf[883..883 + n].copy_from_slice(&self.application_use[..n]);
    // buf[883+n..1395] and buf[1395..2048] are reserved/zero, already zeroed.
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupplementaryKind {
  Joliet(JolietLevel),
  Enhanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JolietLevel {
  Level1,
  Level2,
  Level3,
}

impl JolietLevel {
  fn escape_sequence(self) -> &'static [u8; 3] {
    match self {
      JolietLevel::Level1 => b"%/@",
      JolietLevel::Level2 => b"%/C",
      JolietLevel::Level3 => b"%/E",
    }
  }

  fn from_escape(seq: &[u8]) -> Option<Self> {
    match seq {
      b"%/@" => Some(JolietLevel::Level1),
      b"%/C" => Some(JolietLevel::Level2),
      b"%/E" => Some(JolietLevel::Level3),
      _ => None,
    }
  }
}

#[derive(Debug, Clone)]
pub struct SupplementaryVolumeDescriptor {
  pub kind: SupplementaryKind,
  pub volume_flags: u8,
  pub system_id: String,
  pub volume_id: String,
  pub volume_space_size: u32,
  pub volume_set_size: u16,
  pub volume_sequence_number: u16,
  pub logical_block_size: u16,
  pub path_table_size: u32,
  pub type_l_path_table: u32,
  pub opt_type_l_path_table: u32,
  pub type_m_path_table: u32,
  pub opt_type_m_path_table: u32,
  pub root_directory_record: RootRecordSummary,
  pub volume_set_id: String,
  pub publisher_id: String,
  pub preparer_id: String,
  pub application_id: String,
  pub copyright_file_id: String,
  pub abstract_file_id: String,
  pub bibliographic_file_id: String,
  pub creation_date: VolumeTimestamp,
  pub modification_date: VolumeTimestamp,
  pub expiration_date: VolumeTimestamp,
  pub effective_date: VolumeTimestamp,
  pub file_structure_version: u8,
  pub application_use: Vec<u8>,
}

impl SupplementaryVolumeDescriptor {
  pub fn new_joliet(level: JolietLevel, volume_id: &str, publisher_id: &str, preparer_id: &str, application_id: &str) -> Self {
    let now = VolumeTimestamp::now();
    Self {
      kind: SupplementaryKind::Joliet(level),
      volume_flags: 0,
      system_id: String::new(),
      volume_id: volume_id.to_string(),
      volume_space_size: 0,
      volume_set_size: 1,
      volume_sequence_number: 1,
      logical_block_size: SECTOR_SIZE as u16,
      path_table_size: 10,
      type_l_path_table: 0,
      opt_type_l_path_table: 0,
      type_m_path_table: 0,
      opt_type_m_path_table: 0,
      root_directory_record: RootRecordSummary::default(),
      volume_set_id: String::new(),
      publisher_id: publisher_id.to_string(),
      preparer_id: preparer_id.to_string(),
      application_id: application_id.to_string(),
      copyright_file_id: String::new(),
      abstract_file_id: String::new(),
      bibliographic_file_id: String::new(),
      creation_date: now,
      modification_date: now,
      expiration_date: VolumeTimestamp::UNSPECIFIED,
      effective_date: VolumeTimestamp::UNSPECIFIED,
      file_structure_version: 1,
      application_use: vec![0u8; 512],
    }
  }

  pub fn parse(extent: u32, buf: &[u8]) -> Result<Self> {
    let version = buf[6];
    if version != 1 && version != 2 {
      return Err(Error::BadDescriptorVersion { extent, found: version });
    }
    let escape = &buf[88..120];
    let kind = if version == 2 {
      SupplementaryKind::Enhanced
    } else if let Some(level) = JolietLevel::from_escape(&escape[0..3]) {
      SupplementaryKind::Joliet(level)
    } else {
      // Unrecognised SVD kind; treat as a generic Enhanced-like record so
      // callers may still inspect raw fields rather than fail outright.
      SupplementaryKind::Enhanced
    };
    Ok(Self {
      kind,
      volume_flags: buf[7],
      system_id: read_a_string(&buf[8..40]),
      volume_id: read_a_string(&buf[40..72]),
      volume_space_size: read_u32_lsb_msb("volume_space_size", &buf[80..88])?,
      volume_set_size: read_u16_lsb_msb("volume_set_size", &buf[120..124])?,
      volume_sequence_number: read_u16_lsb_msb("volume_sequence_number", &buf[124..128])?,
      logical_block_size: read_u16_lsb_msb("logical_block_size", &buf[128..132])?,
      path_table_size: read_u32_lsb_msb("path_table_size", &buf[132..140])?,
      type_l_path_table: u32::from_le_bytes(buf[140..144].try_into().unwrap()),
      opt_type_l_path_table: u32::from_le_bytes(buf[144..148].try_into().unwrap()),
      type_m_path_table: u32::from_be_bytes(buf[148..152].try_into().unwrap()),
      opt_type_m_path_table: u32::from_be_bytes(buf[152..156].try_into().unwrap()),
      root_directory_record: read_root_record(&buf[156..190])?,
      volume_set_id: read_a_string(&buf[190..318]),
      publisher_id: read_a_string(&buf[318..446]),
      preparer_id: read_a_string(&buf[446..574]),
      application_id: read_a_string(&buf[574..702]),
      copyright_file_id: read_a_string(&buf[702..739]),
      abstract_file_id: read_a_string(&buf[739..776]),
      bibliographic_file_id: read_a_string(&buf[776..813]),
      creation_date: VolumeTimestamp::parse(buf[813..830].try_into().unwrap()),
      modification_date: VolumeTimestamp::parse(buf[830..847].try_into().unwrap()),
      expiration_date: VolumeTimestamp::parse(buf[847..864].try_into().unwrap()),
      effective_date: VolumeTimestamp::parse(buf[864..881].try_into().unwrap()),
      file_structure_version: buf[881],
      application_use: buf[883..1395].to_vec(),
    })
  }

  pub fn write(&self, buf: &mut [u8]) {
    buf[0] = volume_type::SUPPLEMENTARY_VOLUME_DESCRIPTOR;
    buf[1..6].copy_from_slice(ISO_STANDARD_ID);
    buf[6] = match self.kind {
      SupplementaryKind::Joliet(_) => 1,
      SupplementaryKind::Enhanced => 2,
    };
    buf[7] = self.volume_flags;
    write_a_string(&mut buf[8..40], &self.system_id);
    write_a_string(&mut buf[40..72], &self.volume_id);
    write_u32_lsb_msb(&mut buf[80..88], self.volume_space_size);
    if let SupplementaryKind::Joliet(level) = self.kind {
      buf[88..91].copy_from_slice(level.escape_sequence());
    }
    write_u16_lsb_msb(&mut buf[120..124], self.volume_set_size);
    write_u16_lsb_msb(&mut buf[124..128], self.volume_sequence_number);
    write_u16_lsb_msb(&mut buf[128..132], self.logical_block_size);
    write_u32_lsb_msb(&mut buf[132..140], self.path_table_size);
    buf[140..144].copy_from_slice(&self.type_l_path_table.to_le_bytes());
    buf[144..148].copy_from_slice(&self.opt_type_l_path_table.to_le_bytes());
    buf[148..152].copy_from_slice(&self.type_m_path_table.to_be_bytes());
    buf[152..156].copy_from_slice(&self.opt_type_m_path_table.to_be_bytes());
    write_root_record(&mut buf[156..190], &self.root_directory_record, crate::numeric::RecordTimestamp::now());
    write_a_string(&mut buf[190..318], &self.volume_set_id);
    write_a_string(&mut buf[318..446], &self.publisher_id);
    write_a_string(&mut buf[446..574], &self.preparer_id);
    write_a_string(&mut buf[574..702], &self.application_id);
    write_a_string(&mut buf[702..739], &self.copyright_file_id);
    write_a_string(&mut buf[739..776], &self.abstract_file_id);
    write_a_string(&mut buf[776..813], &self.bibliographic_file_id);
    self.creation_date.write(buf[813..830].try_into().unwrap());
    self.modification_date.write(buf[830..847].try_into().unwrap());
    self.expiration_date.write(buf[847..864].try_into().unwrap());
    self.effective_date.write(buf[864..881].try_into().unwrap());
    buf[881] = self.file_structure_version;
    let n = self.application_use.len().min(512);
    buf[883..883 + n].copy_from_slice(&self.application_use[..n]);
  }
}

/// "EL TORITO SPECIFICATION", space-padded to 32 bytes.
pub const EL_TORITO_BOOT_SYSTEM_ID: &[u8; 32] = b"EL TORITO SPECIFICATION        ";

#[derive(Debug, Clone)]
pub struct BootRecordDescriptor {
  pub boot_system_id: [u8; 32],
  pub boot_id: [u8; 32],
  pub boot_system_use: Vec<u8>,
}

impl BootRecordDescriptor {
  pub fn new_el_torito(boot_catalog_extent: u32) -> Self {
    let mut boot_system_use = vec![0u8; 1977];
    boot_system_use[0..4].copy_from_slice(&boot_catalog_extent.to_le_bytes());
    Self { boot_system_id: *EL_TORITO_BOOT_SYSTEM_ID, boot_id: [0u8; 32], boot_system_use }
  }

  pub fn is_el_torito(&self) -> bool {
    &self.boot_system_id == EL_TORITO_BOOT_SYSTEM_ID
  }

  pub fn el_torito_catalog_extent(&self) -> Option<u32> {
    self.is_el_torito().then(|| u32::from_le_bytes(self.boot_system_use[0..4].try_into().unwrap()))
  }

  pub fn set_el_torito_catalog_extent(&mut self, extent: u32) {
    self.boot_system_use[0..4].copy_from_slice(&extent.to_le_bytes());
  }

  pub fn parse(extent: u32, buf: &[u8]) -> Result<Self> {
    if buf[6] != 1 {
      return Err(Error::BadDescriptorVersion { extent, found: buf[6] });
    }
    Ok(Self {
      boot_system_id: buf[7..39].try_into().unwrap(),
      boot_id: buf[39..71].try_into().unwrap(),
      boot_system_use: buf[71..2048].to_vec(),
    })
  }

  pub fn write(&self, buf: &mut [u8]) {
    buf[0] = volume_type::BOOT_RECORD;
    buf[1..6].copy_from_slice(ISO_STANDARD_ID);
    buf[6] = 1;
    buf[7..39].copy_from_slice(&self.boot_system_id);
    buf[39..71].copy_from_slice(&self.boot_id);
    let n = self.boot_system_use.len().min(1977);
    buf[71..71 + n].copy_from_slice(&self.boot_system_use[..n]);
  }
}

#[derive(Debug, Clone)]
pub enum VolumeDescriptor {
  Primary(PrimaryVolumeDescriptor),
  Supplementary(SupplementaryVolumeDescriptor),
  BootRecord(BootRecordDescriptor),
  SetTerminator,
  Version,
}

impl VolumeDescriptor {
  /// Parse one 2048-byte descriptor block. `tail_strict` controls
  /// whether non-zero Set Terminator tail bytes are rejected (see
  /// DESIGN.md's record of the corresponding Open Question).
  pub fn parse(extent: u32, buf: &[u8], tail_strict: bool) -> Result<Self> {
    if &buf[1..6] != ISO_STANDARD_ID {
      return Err(Error::BadStandardIdentifier { extent, found: buf[1..6].try_into().unwrap() });
    }
    match buf[0] {
      volume_type::PRIMARY_VOLUME_DESCRIPTOR => Ok(VolumeDescriptor::Primary(PrimaryVolumeDescriptor::parse(extent, buf)?)),
      volume_type::SUPPLEMENTARY_VOLUME_DESCRIPTOR => Ok(VolumeDescriptor::Supplementary(SupplementaryVolumeDescriptor::parse(extent, buf)?)),
      volume_type::BOOT_RECORD => Ok(VolumeDescriptor::BootRecord(BootRecordDescriptor::parse(extent, buf)?)),
      volume_type::VOLUME_PARTITION_DESCRIPTOR => Err(Error::VolumePartitionDescriptor),
      volume_type::VOLUME_DESCRIPTOR_SET_TERMINATOR => {
        if tail_strict && buf[7..].iter().any(|&b| b != 0) {
          return Err(Error::ReservedFieldNotZero { extent, field: "set_terminator.tail" });
        }
        Ok(VolumeDescriptor::SetTerminator)
      }
      other => Err(Error::UnknownDescriptorType { extent, found: other, identifier: *ISO_STANDARD_ID }),
    }
  }

  pub fn write(&self, buf: &mut [u8]) {
    buf.fill(0);
    match self {
      VolumeDescriptor::Primary(pvd) => pvd.write(buf),
      VolumeDescriptor::Supplementary(svd) => svd.write(buf),
      VolumeDescriptor::BootRecord(br) => br.write(buf),
      VolumeDescriptor::SetTerminator => {
        buf[0] = volume_type::VOLUME_DESCRIPTOR_SET_TERMINATOR;
        buf[1..6].copy_from_slice(ISO_STANDARD_ID);
        buf[6] = 1;
      }
      VolumeDescriptor::Version => {}
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pvd_round_trips() {
    let mut pvd = PrimaryVolumeDescriptor::new("MYVOL", "PUB", "PREP", "APP");
    pvd.volume_space_size = 42;
    pvd.type_l_path_table = 19;
    pvd.type_m_path_table = 21;
    pvd.root_directory_record = RootRecordSummary { extent: 23, data_length: 2048 };

    let mut buf = vec![0u8; SECTOR_SIZE];
    pvd.write(&mut buf);
    let parsed = PrimaryVolumeDescriptor::parse(16, &buf).unwrap();
    assert_eq!(parsed.volume_id, "MYVOL");
    assert_eq!(parsed.volume_space_size, 42);
    assert_eq!(parsed.type_l_path_table, 19);
    assert_eq!(parsed.type_m_path_table, 21);
    assert_eq!(parsed.root_directory_record.extent, 23);
  }

  #[test]
  fn joliet_svd_round_trips() {
    let mut svd = SupplementaryVolumeDescriptor::new_joliet(JolietLevel::Level3, "V", "P", "PR", "A");
    svd.volume_space_size = 99;
    let mut buf = vec![0u8; SECTOR_SIZE];
    svd.write(&mut buf);
    let parsed = SupplementaryVolumeDescriptor::parse(17, &buf).unwrap();
    assert_eq!(parsed.kind, SupplementaryKind::Joliet(JolietLevel::Level3));
    assert_eq!(parsed.volume_space_size, 99);
  }

  #[test]
  fn rejects_bad_standard_identifier() {
    let mut buf = vec![0u8; SECTOR_SIZE];
    buf[0] = volume_type::PRIMARY_VOLUME_DESCRIPTOR;
    buf[1..6].copy_from_slice(b"XXXXX");
    assert!(VolumeDescriptor::parse(16, &buf, true).is_err());
  }

  #[test]
  fn el_torito_boot_record_round_trips() {
    let br = BootRecordDescriptor::new_el_torito(30);
    let mut buf = vec![0u8; SECTOR_SIZE];
    br.write(&mut buf);
    let parsed = BootRecordDescriptor::parse(17, &buf).unwrap();
    assert!(parsed.is_el_torito());
    assert_eq!(parsed.el_torito_catalog_extent(), Some(30));
  }

  #[test]
  fn volume_partition_descriptor_rejected() {
    let mut buf = vec![0u8; SECTOR_SIZE];
    buf[0] = volume_type::VOLUME_PARTITION_DESCRIPTOR;
    buf[1..6].copy_from_slice(ISO_STANDARD_ID);
    assert!(matches!(VolumeDescriptor::parse(16, &buf, true), Err(Error::VolumePartitionDescriptor)));
  }
}
