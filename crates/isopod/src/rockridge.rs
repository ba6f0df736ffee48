//! Rock Ridge (IEEE P1282 / RRIP) SUSP entries layered into directory
//! record system-use areas: POSIX metadata, symbolic links, long
//! names, continuation areas, and the `/RR_MOVED` relocation scheme
//! used once a directory tree exceeds the eight-level depth ECMA-119
//! directory records can address directly.

use bitflags::bitflags;

use crate::error::{Error, Result};
use crate::numeric::{read_u32_lsb_msb, write_u32_lsb_msb, RecordTimestamp};

/// Maximum directory nesting depth an unmodified ECMA-119 tree can
/// represent; deeper directories get relocated under `/RR_MOVED` with
/// a CL/PL pair linking the two locations back together.
pub const MAX_UNRELOCATED_DEPTH: usize = 8;
pub const RELOCATED_DIRECTORY_NAME: &str = "RR_MOVED";

bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct NameFlags: u8 {
    const CONTINUE = 0x01;
    const CURRENT  = 0x02;
    const PARENT   = 0x04;
  }
}

bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct SymlinkComponentFlags: u8 {
    const CONTINUE = 0x01;
    const CURRENT  = 0x02;
    const PARENT   = 0x04;
    const ROOT     = 0x08;
  }
}

bitflags! {
  #[derive(Debug, Clone, Copy, PartialEq, Eq)]
  pub struct TimestampFlags: u8 {
    const CREATION    = 0x01;
    const MODIFY      = 0x02;
    const ACCESS      = 0x04;
    const ATTRIBUTES  = 0x08;
    const BACKUP      = 0x10;
    const EXPIRATION  = 0x20;
    const EFFECTIVE   = 0x40;
    const LONG_FORM   = 0x80;
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymlinkComponent {
  pub flags: SymlinkComponentFlags,
  pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixFileAttributes {
  pub mode: u32,
  pub links: u32,
  pub uid: u32,
  pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationArea {
  pub block: u32,
  pub offset: u32,
  pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionsReference {
  pub identifier: String,
  pub descriptor: String,
  pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Timestamps {
  pub creation: Option<RecordTimestamp>,
  pub modify: Option<RecordTimestamp>,
  pub access: Option<RecordTimestamp>,
  pub attributes: Option<RecordTimestamp>,
  pub backup: Option<RecordTimestamp>,
  pub expiration: Option<RecordTimestamp>,
  pub effective: Option<RecordTimestamp>,
}

/// One parsed Rock Ridge SUSP entry. `Unknown` preserves anything this
/// crate does not interpret so round-tripping an image never silently
/// drops foreign extension data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RockRidgeEntry {
  SharingProtocol { skip_bytes: u8 },
  ContinuationAreaEntry(ContinuationArea),
  ExtensionsReferenceEntry(ExtensionsReference),
  PosixAttributes(PosixFileAttributes),
  DeviceNumber { device_high: u32, device_low: u32 },
  AlternateName { flags: NameFlags, name: String },
  SymbolicLink { flags: NameFlags, components: Vec<SymlinkComponent> },
  ChildLink { extent: u32 },
  ParentLink { extent: u32 },
  Relocated,
  Timestamps(Timestamps),
  Terminator,
  Unknown { signature: [u8; 2], data: Vec<u8> },
}

fn write_header(out: &mut Vec<u8>, signature: &[u8; 2], len: u8, version: u8) {
  out.push(signature[0]);
  out.push(signature[1]);
  out.push(len);
  out.push(version);
}

impl RockRidgeEntry {
  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::new();
    match self {
      RockRidgeEntry::SharingProtocol { skip_bytes } => {
        write_header(&mut out, b"SP", 7, 1);
        out.push(0xBE);
        out.push(0xEF);
        out.push(*skip_bytes);
      }
      RockRidgeEntry::ContinuationAreaEntry(ca) => {
        write_header(&mut out, b"CE", 28, 1);
        let mut field = [0u8; 8];
        write_u32_lsb_msb(&mut field, ca.block);
        out.extend_from_slice(&field);
        write_u32_lsb_msb(&mut field, ca.offset);
        out.extend_from_slice(&field);
        write_u32_lsb_msb(&mut field, ca.length);
        out.extend_from_slice(&field);
      }
      RockRidgeEntry::ExtensionsReferenceEntry(er) => {
        let len = 8 + er.identifier.len() + er.descriptor.len() + er.source.len();
        write_header(&mut out, b"ER", len as u8, 1);
        out.push(er.identifier.len() as u8);
        out.push(er.descriptor.len() as u8);
        out.push(er.source.len() as u8);
        out.push(1); // extension version
        out.extend_from_slice(er.identifier.as_bytes());
        out.extend_from_slice(er.descriptor.as_bytes());
        out.extend_from_slice(er.source.as_bytes());
      }
      RockRidgeEntry::PosixAttributes(px) => {
        write_header(&mut out, b"PX", 36, 1);
        let mut field = [0u8; 8];
        write_u32_lsb_msb(&mut field, px.mode);
        out.extend_from_slice(&field);
        write_u32_lsb_msb(&mut field, px.links);
        out.extend_from_slice(&field);
        write_u32_lsb_msb(&mut field, px.uid);
        out.extend_from_slice(&field);
        write_u32_lsb_msb(&mut field, px.gid);
        out.extend_from_slice(&field);
      }
      RockRidgeEntry::DeviceNumber { device_high, device_low } => {
        write_header(&mut out, b"PN", 20, 1);
        let mut field = [0u8; 8];
        write_u32_lsb_msb(&mut field, *device_high);
        out.extend_from_slice(&field);
        write_u32_lsb_msb(&mut field, *device_low);
        out.extend_from_slice(&field);
      }
      RockRidgeEntry::AlternateName { flags, name } => {
        let len = 5 + name.len();
        write_header(&mut out, b"NM", len as u8, 1);
        out.push(flags.bits());
        out.extend_from_slice(name.as_bytes());
      }
      RockRidgeEntry::SymbolicLink { flags, components } => {
        let mut body = Vec::new();
        for c in components {
          body.push(c.flags.bits());
          body.push(c.content.len() as u8);
          body.extend_from_slice(c.content.as_bytes());
        }
        let len = 5 + body.len();
        write_header(&mut out, b"SL", len as u8, 1);
        out.push(flags.bits());
        out.extend_from_slice(&body);
      }
      RockRidgeEntry::ChildLink { extent } => {
        write_header(&mut out, b"CL", 12, 1);
        let mut field = [0u8; 8];
        write_u32_lsb_msb(&mut field, *extent);
        out.extend_from_slice(&field);
      }
      RockRidgeEntry::ParentLink { extent } => {
        write_header(&mut out, b"PL", 12, 1);
        let mut field = [0u8; 8];
        write_u32_lsb_msb(&mut field, *extent);
        out.extend_from_slice(&field);
      }
      RockRidgeEntry::Relocated => write_header(&mut out, b"RE", 4, 1),
      RockRidgeEntry::Timestamps(ts) => {
        let mut flags = TimestampFlags::empty();
        let mut body = Vec::new();
        for (flag, value) in [
          (TimestampFlags::CREATION, ts.creation),
          (TimestampFlags::MODIFY, ts.modify),
          (TimestampFlags::ACCESS, ts.access),
          (TimestampFlags::ATTRIBUTES, ts.attributes),
          (TimestampFlags::BACKUP, ts.backup),
          (TimestampFlags::EXPIRATION, ts.expiration),
          (TimestampFlags::EFFECTIVE, ts.effective),
        ] {
          if let Some(t) = value {
            flags |= flag;
            let mut buf = [0u8; 7];
            t.write(&mut buf);
            body.extend_from_slice(&buf);
          }
        }
        let len = 5 + body.len();
        write_header(&mut out, b"TF", len as u8, 1);
        out.push(flags.bits());
        out.extend_from_slice(&body);
      }
      RockRidgeEntry::Terminator => write_header(&mut out, b"ST", 4, 1),
      RockRidgeEntry::Unknown { signature, data } => {
        write_header(&mut out, signature, (4 + data.len()) as u8, 1);
        out.extend_from_slice(data);
      }
    }
    out
  }

  fn parse_one(buf: &[u8]) -> Result<(Self, usize)> {
    if buf.len() < 4 {
      return Err(Error::RecordCrossesBlockBoundary { extent: 0, offset: 0 });
    }
    let signature: [u8; 2] = [buf[0], buf[1]];
    let len = buf[2] as usize;
    if len < 4 || len > buf.len() {
      return Err(Error::RecordCrossesBlockBoundary { extent: 0, offset: 2 });
    }
    let body = &buf[4..len];
    let entry = match &signature {
      b"SP" => RockRidgeEntry::SharingProtocol { skip_bytes: body[2] },
      b"CE" => RockRidgeEntry::ContinuationAreaEntry(ContinuationArea {
        block: read_u32_lsb_msb("rockridge.ce.block", &body[0..8])?,
        offset: read_u32_lsb_msb("rockridge.ce.offset", &body[8..16])?,
        length: read_u32_lsb_msb("rockridge.ce.length", &body[16..24])?,
      }),
      b"ER" => {
        let id_len = body[0] as usize;
        let des_len = body[1] as usize;
        let src_len = body[2] as usize;
        let rest = &body[4..];
        RockRidgeEntry::ExtensionsReferenceEntry(ExtensionsReference {
          identifier: String::from_utf8_lossy(&rest[0..id_len]).to_string(),
          descriptor: String::from_utf8_lossy(&rest[id_len..id_len + des_len]).to_string(),
          source: String::from_utf8_lossy(&rest[id_len + des_len..id_len + des_len + src_len]).to_string(),
        })
      }
      b"PX" => RockRidgeEntry::PosixAttributes(PosixFileAttributes {
        mode: read_u32_lsb_msb("rockridge.px.mode", &body[0..8])?,
        links: read_u32_lsb_msb("rockridge.px.links", &body[8..16])?,
        uid: read_u32_lsb_msb("rockridge.px.uid", &body[16..24])?,
        gid: read_u32_lsb_msb("rockridge.px.gid", &body[24..32])?,
      }),
      b"PN" => RockRidgeEntry::DeviceNumber {
        device_high: read_u32_lsb_msb("rockridge.pn.high", &body[0..8])?,
        device_low: read_u32_lsb_msb("rockridge.pn.low", &body[8..16])?,
      },
      b"NM" => RockRidgeEntry::AlternateName {
        flags: NameFlags::from_bits_truncate(body[0]),
        name: String::from_utf8_lossy(&body[1..]).to_string(),
      },
      b"SL" => {
        let flags = NameFlags::from_bits_truncate(body[0]);
        let mut components = Vec::new();
        let mut i = 1;
        while i + 2 <= body.len() {
          let cflags = SymlinkComponentFlags::from_bits_truncate(body[i]);
          let clen = body[i + 1] as usize;
          let content = String::from_utf8_lossy(&body[i + 2..i + 2 + clen]).to_string();
          components.push(SymlinkComponent { flags: cflags, content });
          i += 2 + clen;
        }
        RockRidgeEntry::SymbolicLink { flags, components }
      }
      b"CL" => RockRidgeEntry::ChildLink { extent: read_u32_lsb_msb("rockridge.cl", &body[0..8])? },
      b"PL" => RockRidgeEntry::ParentLink { extent: read_u32_lsb_msb("rockridge.pl", &body[0..8])? },
      b"RE" => RockRidgeEntry::Relocated,
      b"TF" => {
        let flags = TimestampFlags::from_bits_truncate(body[0]);
        let mut ts = Timestamps::default();
        let mut offset = 1;
        for (flag, slot) in [
          (TimestampFlags::CREATION, &mut ts.creation),
          (TimestampFlags::MODIFY, &mut ts.modify),
          (TimestampFlags::ACCESS, &mut ts.access),
          (TimestampFlags::ATTRIBUTES, &mut ts.attributes),
          (TimestampFlags::BACKUP, &mut ts.backup),
          (TimestampFlags::EXPIRATION, &mut ts.expiration),
          (TimestampFlags::EFFECTIVE, &mut ts.effective),
        ] {
          if flags.contains(flag) {
            *slot = Some(RecordTimestamp::parse(body[offset..offset + 7].try_into().unwrap()));
            offset += 7;
          }
        }
        RockRidgeEntry::Timestamps(ts)
      }
      b"ST" => RockRidgeEntry::Terminator,
      _ => RockRidgeEntry::Unknown { signature, data: body.to_vec() },
    };
    Ok((entry, len))
  }
}

/// Decode the sequence of SUSP entries packed into a directory
/// record's system-use area, stopping at a Terminator entry or the
/// end of the buffer (whichever comes first).
pub fn parse_entries(buf: &[u8]) -> Result<Vec<RockRidgeEntry>> {
  let mut entries = Vec::new();
  let mut offset = 0;
  while offset + 4 <= buf.len() && buf[offset] != 0 {
    let (entry, consumed) = RockRidgeEntry::parse_one(&buf[offset..])?;
    let is_terminator = matches!(entry, RockRidgeEntry::Terminator);
    entries.push(entry);
    offset += consumed;
    if is_terminator {
      break;
    }
  }
  Ok(entries)
}

pub fn encode_entries(entries: &[RockRidgeEntry]) -> Vec<u8> {
  entries.iter().flat_map(RockRidgeEntry::encode).collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn posix_attributes_round_trip() {
    let entry = RockRidgeEntry::PosixAttributes(PosixFileAttributes { mode: 0o100644, links: 1, uid: 1000, gid: 1000 });
    let encoded = entry.encode();
    let (parsed, consumed) = RockRidgeEntry::parse_one(&encoded).unwrap();
    assert_eq!(consumed, encoded.len());
    assert_eq!(parsed, entry);
  }

  #[test]
  fn symlink_with_multiple_components_round_trips() {
    let entry = RockRidgeEntry::SymbolicLink {
      flags: NameFlags::empty(),
      components: vec![
        SymlinkComponent { flags: SymlinkComponentFlags::ROOT, content: String::new() },
        SymlinkComponent { flags: SymlinkComponentFlags::empty(), content: "usr".to_string() },
        SymlinkComponent { flags: SymlinkComponentFlags::empty(), content: "bin".to_string() },
      ],
    };
    let encoded = entry.encode();
    let (parsed, _) = RockRidgeEntry::parse_one(&encoded).unwrap();
    assert_eq!(parsed, entry);
  }

  #[test]
  fn alternate_name_round_trips() {
    let entry = RockRidgeEntry::AlternateName { flags: NameFlags::empty(), name: "a-very-long-filename.tar.gz".to_string() };
    let encoded = entry.encode();
    let (parsed, _) = RockRidgeEntry::parse_one(&encoded).unwrap();
    assert_eq!(parsed, entry);
  }

  #[test]
  fn continuation_area_round_trips() {
    let entry = RockRidgeEntry::ContinuationAreaEntry(ContinuationArea { block: 40, offset: 0, length: 200 });
    let encoded = entry.encode();
    let (parsed, _) = RockRidgeEntry::parse_one(&encoded).unwrap();
    assert_eq!(parsed, entry);
  }

  #[test]
  fn child_and_parent_link_round_trip() {
    let cl = RockRidgeEntry::ChildLink { extent: 500 };
    let pl = RockRidgeEntry::ParentLink { extent: 30 };
    assert_eq!(RockRidgeEntry::parse_one(&cl.encode()).unwrap().0, cl);
    assert_eq!(RockRidgeEntry::parse_one(&pl.encode()).unwrap().0, pl);
  }

  #[test]
  fn entry_sequence_round_trips_and_stops_at_terminator() {
    let entries = vec![
      RockRidgeEntry::SharingProtocol { skip_bytes: 0 },
      RockRidgeEntry::PosixAttributes(PosixFileAttributes { mode: 0o40755, links: 2, uid: 0, gid: 0 }),
      RockRidgeEntry::Terminator,
    ];
    let encoded = encode_entries(&entries);
    let parsed = parse_entries(&encoded).unwrap();
    assert_eq!(parsed, entries);
  }

  #[test]
  fn unknown_signature_preserved() {
    let entry = RockRidgeEntry::Unknown { signature: *b"ZZ", data: vec![1, 2, 3] };
    let encoded = entry.encode();
    let (parsed, _) = RockRidgeEntry::parse_one(&encoded).unwrap();
    assert_eq!(parsed, entry);
  }
}
