use std::io::Cursor;

use isopod::{Error, FeatureFlags, FileSource, ParseStrictness, PlatformId, Session, SessionOptions};

const SECTOR_SIZE: usize = 2048;

fn options(volume_id: &str) -> SessionOptions {
  SessionOptions { volume_id: volume_id.to_string(), ..SessionOptions::default() }
}

#[test]
fn empty_pvd_only_image_matches_expected_offsets() {
  let mut session = Session::new_session(options("EMPTY"));
  let mut out = Cursor::new(Vec::new());
  session.write(&mut out).unwrap();
  let bytes = out.into_inner();

  assert_eq!(&bytes[32768 + 1..32768 + 6], b"CD001");
  assert_eq!(bytes[32768], 1, "PVD type byte");

  let space_size_le = u32::from_le_bytes(bytes[32768 + 80..32768 + 84].try_into().unwrap());
  assert_eq!(space_size_le, bytes.len() as u32 / SECTOR_SIZE as u32);

  let set_size = u16::from_le_bytes(bytes[32768 + 120..32768 + 122].try_into().unwrap());
  assert_eq!(set_size, 1);
  let seqnum = u16::from_le_bytes(bytes[32768 + 124..32768 + 126].try_into().unwrap());
  assert_eq!(seqnum, 1);
}

#[test]
fn single_file_no_extensions_places_child_after_root() {
  let mut session = Session::new_session(options("VOL"));
  session.add_file(FileSource::InMemory(vec![0u8; 5]), "/FOO.;1", None).unwrap();
  let mut out = Cursor::new(Vec::new());
  session.write(&mut out).unwrap();

  let handle = session.lookup("/FOO.;1").unwrap();
  assert!(!session.is_directory(handle));
  assert_eq!(session.file_size(handle).unwrap(), 5);
}

#[test]
fn joliet_parallel_tree_shares_one_payload() {
  let mut session = Session::new_session(SessionOptions {
    volume_id: "VOL".to_string(),
    features: FeatureFlags { joliet: true, rock_ridge: false },
    ..SessionOptions::default()
  });
  session.add_file(FileSource::InMemory(vec![0u8; 5]), "/FOO.;1", Some("foo")).unwrap();
  let mut out = Cursor::new(Vec::new());
  session.write(&mut out).unwrap();

  let mut a = Vec::new();
  let mut b = Vec::new();
  session.get_and_write("/FOO.;1", &mut a).unwrap();
  session.get_and_write("/FOO.;1", &mut b).unwrap();
  assert_eq!(a, b);
  assert_eq!(a.len(), 5);
}

#[test]
fn rock_ridge_relocation_at_ninth_level() {
  let mut session = Session::new_session(SessionOptions {
    volume_id: "VOL".to_string(),
    features: FeatureFlags { joliet: false, rock_ridge: true },
    ..SessionOptions::default()
  });

  let mut path = String::new();
  for i in 0..8 {
    path.push_str(&format!("/LEVEL{i}"));
    session.add_directory(&path).unwrap();
  }
  // The ninth level exceeds MAX_UNRELOCATED_DEPTH and must be relocated.
  let ninth = format!("{path}/LEVEL8");
  let handle = session.add_directory(&ninth).unwrap();
  assert!(session.lookup("/RR_MOVED").is_ok());

  let relocated_children = session.list_dir("/RR_MOVED").unwrap();
  assert!(relocated_children.contains(&"LEVEL8".to_string()));

  let placeholder_parent = &path;
  let placeholder_children = session.list_dir(placeholder_parent).unwrap();
  assert!(placeholder_children.iter().any(|n| n == "LEVEL8_PLC"));

  let mut out = Cursor::new(Vec::new());
  session.write(&mut out).unwrap();
  assert!(session.is_directory(handle));
}

#[test]
fn rock_ridge_not_enabled_rejects_deep_relocation() {
  let mut session = Session::new_session(options("VOL"));
  let mut path = String::new();
  for i in 0..8 {
    path.push_str(&format!("/LEVEL{i}"));
    session.add_directory(&path).unwrap();
  }
  let ninth = format!("{path}/LEVEL8");
  assert!(matches!(session.add_directory(&ninth), Err(Error::PathTooDeep(_))));
}

#[test]
fn eltorito_with_boot_info_table_patches_checksum() {
  let mut session = Session::new_session(options("VOL"));
  session.add_file(FileSource::InMemory(vec![0xAB; SECTOR_SIZE]), "/BOOT.IMG;1", None).unwrap();
  session.add_eltorito("/BOOT.IMG;1", "/BOOT.CAT;1", PlatformId::X86, true).unwrap();

  let mut out = Cursor::new(Vec::new());
  session.write(&mut out).unwrap();
  let bytes = out.into_inner();

  let handle = session.lookup("/BOOT.IMG;1").unwrap();
  assert!(session.file_size(handle).is_ok());

  // A boot record descriptor must be present right after the PVD.
  assert_eq!(bytes[32768 + SECTOR_SIZE], 0, "boot record descriptor type byte");
  assert_eq!(&bytes[32768 + SECTOR_SIZE + 1..32768 + SECTOR_SIZE + 6], b"CD001");
}

#[test]
fn in_place_update_rejected_on_size_change_leaves_file_untouched() {
  let mut session = Session::new_session(options("VOL"));
  session.add_file(FileSource::InMemory(vec![0u8; SECTOR_SIZE]), "/FOO.;1", None).unwrap();
  let mut image = Cursor::new(Vec::new());
  session.write(&mut image).unwrap();
  let before = image.clone().into_inner();

  let result = session.in_place_update(&mut image, &vec![0u8; SECTOR_SIZE * 2], "/FOO.;1");
  assert!(matches!(result, Err(Error::InPlaceBlockCountChanged { old: 1, new: 2, .. })));
  assert_eq!(image.into_inner(), before);
}

#[test]
fn in_place_update_accepted_when_block_count_matches() {
  let mut session = Session::new_session(options("VOL"));
  session.add_file(FileSource::InMemory(vec![0u8; SECTOR_SIZE]), "/FOO.;1", None).unwrap();
  let mut image = Cursor::new(Vec::new());
  session.write(&mut image).unwrap();

  session.in_place_update(&mut image, &vec![7u8; 100], "/FOO.;1").unwrap();
  let mut out = Vec::new();
  session.get_and_write("/FOO.;1", &mut out).unwrap();
  assert_eq!(out.len(), 100);
  assert!(out.iter().all(|&b| b == 7));
}

#[test]
fn hard_link_group_shares_extent_and_length_after_write() {
  let mut session = Session::new_session(options("VOL"));
  session.add_file(FileSource::InMemory(vec![1, 2, 3, 4]), "/A.TXT;1", None).unwrap();
  session.add_hard_link("/B.TXT;1", "/A.TXT;1").unwrap();

  let mut out = Cursor::new(Vec::new());
  session.write(&mut out).unwrap();

  let mut a_bytes = Vec::new();
  let mut b_bytes = Vec::new();
  session.get_and_write("/A.TXT;1", &mut a_bytes).unwrap();
  session.get_and_write("/B.TXT;1", &mut b_bytes).unwrap();
  assert_eq!(a_bytes, b_bytes);
}

#[test]
fn write_open_write_is_idempotent_in_size() {
  let mut session = Session::new_session(options("STABLE"));
  session.add_directory("/DOCS").unwrap();
  session.add_file(FileSource::InMemory(vec![9, 9, 9]), "/DOCS/A.TXT;1", None).unwrap();

  let mut first = Cursor::new(Vec::new());
  session.write(&mut first).unwrap();

  let mut reopened = Session::open_session(Cursor::new(first.clone().into_inner()), ParseStrictness::Lenient).unwrap();
  let mut second = Cursor::new(Vec::new());
  reopened.write(&mut second).unwrap();

  assert_eq!(first.into_inner().len(), second.into_inner().len());
  assert!(reopened.lookup("/DOCS/A.TXT;1").is_ok());
}

#[test]
fn isohybrid_requires_eltorito_and_writes_mbr_signature() {
  let mut session = Session::new_session(options("VOL"));
  session.add_file(FileSource::InMemory(vec![0u8; SECTOR_SIZE]), "/BOOT.IMG;1", None).unwrap();
  session.add_eltorito("/BOOT.IMG;1", "/BOOT.CAT;1", PlatformId::X86, false).unwrap();
  session.add_isohybrid(vec![0x33, 0xED], 0xDEADBEEF, 0x00).unwrap();

  let mut out = Cursor::new(Vec::new());
  session.write(&mut out).unwrap();
  let bytes = out.into_inner();
  assert_eq!(&bytes[510..512], &[0x55, 0xAA]);
}

#[test]
fn closed_session_rejects_mutation() {
  let mut session = Session::new_session(options("VOL"));
  session.close_session();
  assert!(matches!(session.add_directory("/DOCS"), Err(Error::SessionNotOpen)));
}
