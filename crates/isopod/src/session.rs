//! The public driver: parses an existing image into the in-memory
//! tree, exposes the mutation operations external collaborators use,
//! and serialises the model back out through the extent re-packer.

use std::io::{Read, Seek, SeekFrom, Write};

use log::{debug, info, warn};

use crate::constants::SECTOR_SIZE;
use crate::dirrecord::{DirectoryRecord, RecordIdentifier};
use crate::eltorito::{BootCatalog, BootEntry, BootInfoTable, BootMediaType, PlatformId};
use crate::error::{Error, Result};
use crate::ident::InterchangeLevel;
use crate::isohybrid::IsohybridMbr;
use crate::pathtable::ByteOrder;
use crate::tree::{FileSource, NodeEntry, NodeHandle, Tree};
use crate::volume::{
  BootRecordDescriptor, JolietLevel, PrimaryVolumeDescriptor, RootRecordSummary, SupplementaryKind, SupplementaryVolumeDescriptor,
  VolumeDescriptor,
};

/// Feature flags requested at session creation (§6, `new_session`).
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureFlags {
  pub joliet: bool,
  pub rock_ridge: bool,
}

/// How strictly the parser enforces "reserved bytes must be zero"
/// outside the Set Terminator tail (§9, the second Open Question).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseStrictness {
  #[default]
  Lenient,
  Strict,
}

pub struct SessionOptions {
  pub interchange_level: InterchangeLevel,
  pub volume_id: String,
  pub publisher_id: String,
  pub preparer_id: String,
  pub application_id: String,
  pub set_size: u16,
  pub sequence_number: u16,
  pub block_size: u16,
  pub features: FeatureFlags,
}

impl Default for SessionOptions {
  fn default() -> Self {
    Self {
      interchange_level: InterchangeLevel::Level1,
      volume_id: String::new(),
      publisher_id: String::new(),
      preparer_id: String::new(),
      application_id: String::new(),
      set_size: 1,
      sequence_number: 1,
      block_size: SECTOR_SIZE as u16,
      features: FeatureFlags::default(),
    }
  }
}

/// Builder for `SessionOptions`, the way the CLI and library callers
/// assemble a new session without threading positional arguments.
#[derive(Default)]
pub struct IsoBuilder {
  options: SessionOptions,
}

impl IsoBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn volume_id(mut self, id: impl Into<String>) -> Self {
    self.options.volume_id = id.into();
    self
  }

  pub fn publisher_id(mut self, id: impl Into<String>) -> Self {
    self.options.publisher_id = id.into();
    self
  }

  pub fn joliet(mut self, enabled: bool) -> Self {
    self.options.features.joliet = enabled;
    self
  }

  pub fn rock_ridge(mut self, enabled: bool) -> Self {
    self.options.features.rock_ridge = enabled;
    self
  }

  pub fn interchange_level(mut self, level: InterchangeLevel) -> Self {
    self.options.interchange_level = level;
    self
  }

  pub fn build(self) -> Session {
    Session::new_session(self.options)
  }
}

struct ElToritoState {
  catalog: BootCatalog,
  catalog_path: String,
  boot_file_path: String,
  platform_id: PlatformId,
  add_boot_info_table: bool,
}

/// The engine's single logical session (§5: single-threaded, not
/// re-entrant, no internal concurrency).
pub struct Session {
  options: SessionOptions,
  tree: Tree,
  pvd: PrimaryVolumeDescriptor,
  svd_joliet: Option<SupplementaryVolumeDescriptor>,
  eltorito: Option<ElToritoState>,
  isohybrid: Option<IsohybridMbr>,
  strictness: ParseStrictness,
  open: bool,
  /// The full bytes of the image this session was opened from, kept so
  /// `FileSource::Existing` payloads carried over untouched can still be
  /// re-exported rather than emitted as zeros. `None` for a session
  /// created fresh via `new_session`, which has no source image to read.
  source_image: Option<Vec<u8>>,
}

impl Session {
  /// `new_session` from §6: an empty, freshly-minted volume.
  pub fn new_session(options: SessionOptions) -> Self {
    let tree = Tree::new(options.interchange_level, options.features.joliet, options.features.rock_ridge);
    let mut pvd = PrimaryVolumeDescriptor::new(&options.volume_id, &options.publisher_id, &options.preparer_id, &options.application_id);
    pvd.volume_set_size = options.set_size;
    pvd.volume_sequence_number = options.sequence_number;
    pvd.logical_block_size = options.block_size;
    let svd_joliet = options
      .features
      .joliet
      .then(|| SupplementaryVolumeDescriptor::new_joliet(JolietLevel::Level3, &options.volume_id, &options.publisher_id, &options.preparer_id, &options.application_id));
    Self { options, tree, pvd, svd_joliet, eltorito: None, isohybrid: None, strictness: ParseStrictness::Lenient, open: true, source_image: None }
  }

  pub fn open_session<R: Read + Seek>(mut reader: R, strictness: ParseStrictness) -> Result<Self> {
    let mut source_image = Vec::new();
    reader.seek(SeekFrom::Start(0))?;
    reader.read_to_end(&mut source_image)?;
    reader.seek(SeekFrom::Start(0))?;

    let mut pvd = None;
    let mut svd_joliet = None;
    let mut terminator_seen = false;
    let mut extent = crate::layout::FIRST_DESCRIPTOR_EXTENT;
    let mut boot_record: Option<BootRecordDescriptor> = None;
    loop {
      let mut block = vec![0u8; SECTOR_SIZE];
      reader.seek(SeekFrom::Start(extent as u64 * SECTOR_SIZE as u64))?;
      reader.read_exact(&mut block)?;
      let descriptor = VolumeDescriptor::parse(extent, &block, strictness == ParseStrictness::Strict)?;
      match descriptor {
        VolumeDescriptor::Primary(p) => {
          if let Some(existing) = &pvd {
            if existing != &p {
              return Err(Error::ConflictingPrimaryVolumeDescriptors);
            }
          } else {
            pvd = Some(p);
          }
        }
        VolumeDescriptor::Supplementary(s) => {
          if let SupplementaryKind::Joliet(_) = s.kind {
            if svd_joliet.is_some() {
              return Err(Error::DuplicateSupplementaryVolumeDescriptor("Joliet"));
            }
            svd_joliet = Some(s);
          }
        }
        VolumeDescriptor::BootRecord(br) => boot_record = Some(br),
        VolumeDescriptor::SetTerminator => {
          terminator_seen = true;
          extent += 1;
          break;
        }
        VolumeDescriptor::Version => {}
      }
      extent += 1;
    }
    if !terminator_seen {
      return Err(Error::MissingSetTerminator);
    }
    let pvd = pvd.ok_or(Error::MissingPrimaryVolumeDescriptor)?;

    let interchange_level = InterchangeLevel::Level3;
    let mut tree = Tree::new(interchange_level, svd_joliet.is_some(), false);
    read_directory_tree(&mut reader, &pvd, &mut tree)?;

    let options = SessionOptions {
      interchange_level,
      volume_id: pvd.volume_id.clone(),
      publisher_id: pvd.publisher_id.clone(),
      preparer_id: pvd.preparer_id.clone(),
      application_id: pvd.application_id.clone(),
      set_size: pvd.volume_set_size,
      sequence_number: pvd.volume_sequence_number,
      block_size: pvd.logical_block_size,
      features: FeatureFlags { joliet: svd_joliet.is_some(), rock_ridge: false },
    };

    let eltorito = match boot_record {
      Some(br) if br.is_el_torito() => {
        let catalog_extent = br.el_torito_catalog_extent().unwrap();
        let mut catalog_block = vec![0u8; SECTOR_SIZE];
        reader.seek(SeekFrom::Start(catalog_extent as u64 * SECTOR_SIZE as u64))?;
        reader.read_exact(&mut catalog_block)?;
        let catalog = BootCatalog::parse(&catalog_block)?;
        Some(ElToritoState {
          catalog,
          catalog_path: String::new(),
          boot_file_path: String::new(),
          platform_id: PlatformId::X86,
          add_boot_info_table: false,
        })
      }
      _ => None,
    };

    info!("opened session: volume_id={:?}", options.volume_id);
    Ok(Self { options, tree, pvd, svd_joliet, eltorito, isohybrid: None, strictness, open: true, source_image: Some(source_image) })
  }

  pub fn close_session(&mut self) {
    self.open = false;
  }

  fn require_open(&self) -> Result<()> {
    if !self.open {
      return Err(Error::SessionNotOpen);
    }
    Ok(())
  }

  fn split_path<'a>(&self, iso_path: &'a str) -> (&'a str, &'a str) {
    match iso_path.rsplit_once('/') {
      Some((parent, name)) => (if parent.is_empty() { "/" } else { parent }, name),
      None => ("/", iso_path),
    }
  }

  pub fn add_directory(&mut self, iso_path: &str) -> Result<NodeHandle> {
    self.require_open()?;
    let (parent_path, name) = self.split_path(iso_path);
    let parent = self.tree.lookup(parent_path)?;
    // §4.5 only lifts this cap for an Enhanced SVD, which this crate
    // never constructs; a Joliet SVD does not exempt a PVD directory
    // from relocation.
    if self.tree.depth(parent) + 1 > crate::rockridge::MAX_UNRELOCATED_DEPTH {
      return self.add_relocated_directory(parent, name);
    }
    self.tree.mkdir(parent, name)
  }

  fn add_relocated_directory(&mut self, original_parent: NodeHandle, name: &str) -> Result<NodeHandle> {
    if !self.tree.rock_ridge_enabled {
      return Err(Error::PathTooDeep(name.to_string()));
    }
    let root = self.tree.root();
    let rr_moved = match self.tree.lookup(&format!("/{}", crate::rockridge::RELOCATED_DIRECTORY_NAME)) {
      Ok(handle) => handle,
      Err(_) => self.tree.mkdir(root, crate::rockridge::RELOCATED_DIRECTORY_NAME)?,
    };
    let real = self.tree.mkdir(rr_moved, name)?;
    self.tree.node_mut(real).relocated_original_parent = Some(original_parent);
    let placeholder_name = format!("{name}_PLC");
    let placeholder = self.tree.mkdir(original_parent, &placeholder_name)?;
    self.tree.node_mut(placeholder).relocated_placeholder_target = Some(real);
    warn!("relocated directory {name:?} under /RR_MOVED (depth limit exceeded)");
    Ok(real)
  }

  pub fn add_file(&mut self, source: FileSource, iso_path: &str, joliet_name: Option<&str>) -> Result<NodeHandle> {
    self.require_open()?;
    if joliet_name.is_some() && self.svd_joliet.is_none() {
      return Err(Error::JolietNotEnabled);
    }
    let (parent_path, name) = self.split_path(iso_path);
    let parent = self.tree.lookup(parent_path)?;
    let handle = self.tree.add_file(parent, name, source)?;
    if let Some(jname) = joliet_name {
      self.tree.node_mut(handle).joliet_name = Some(jname.to_string());
    }
    Ok(handle)
  }

  pub fn add_hard_link(&mut self, iso_path: &str, target_iso_path: &str) -> Result<NodeHandle> {
    self.require_open()?;
    let target = self.tree.lookup(target_iso_path)?;
    let (parent_path, name) = self.split_path(iso_path);
    let parent = self.tree.lookup(parent_path)?;
    self.tree.add_hard_link(parent, name, target)
  }

  pub fn add_symlink(&mut self, iso_path: &str, rr_target: &str) -> Result<NodeHandle> {
    self.require_open()?;
    let (parent_path, name) = self.split_path(iso_path);
    let parent = self.tree.lookup(parent_path)?;
    self.tree.add_symlink(parent, name, rr_target)
  }

  pub fn remove_file(&mut self, iso_path: &str) -> Result<()> {
    self.require_open()?;
    let handle = self.tree.lookup(iso_path)?;
    self.tree.remove(handle)
  }

  pub fn remove_directory(&mut self, iso_path: &str) -> Result<()> {
    self.require_open()?;
    let handle = self.tree.lookup(iso_path)?;
    if !self.tree.node(handle).is_directory() {
      return Err(Error::NotFound(iso_path.to_string()));
    }
    self.remove_directory_handle(handle)
  }

  /// Removes a directory and, if it is one half of a §4.5 relocation
  /// pair, unlinks the other half too so a CL placeholder never
  /// outlives the real directory it points at (or vice versa).
  fn remove_directory_handle(&mut self, handle: NodeHandle) -> Result<()> {
    let node = self.tree.node(handle);
    let placeholder_target = node.relocated_placeholder_target;
    let original_parent = node.relocated_original_parent;

    if let Some(real) = placeholder_target {
      // `handle` is the placeholder; `real` is the directory under /RR_MOVED.
      if !self.tree.children(real).is_empty() {
        return Err(Error::DirectoryNotEmpty(self.tree.node(real).name.clone()));
      }
      self.tree.remove(handle)?;
      self.tree.remove(real)?;
      self.remove_rr_moved_if_empty();
    } else if let Some(orig_parent) = original_parent {
      // `handle` is the real, relocated directory; find its placeholder.
      let placeholder = self
        .tree
        .children(orig_parent)
        .iter()
        .copied()
        .find(|&c| self.tree.node(c).relocated_placeholder_target == Some(handle));
      self.tree.remove(handle)?;
      if let Some(placeholder) = placeholder {
        self.tree.remove(placeholder)?;
      }
      self.remove_rr_moved_if_empty();
    } else {
      self.tree.remove(handle)?;
    }
    Ok(())
  }

  fn remove_rr_moved_if_empty(&mut self) {
    if let Ok(rr_moved) = self.tree.lookup(&format!("/{}", crate::rockridge::RELOCATED_DIRECTORY_NAME)) {
      if self.tree.children(rr_moved).is_empty() {
        let _ = self.tree.remove(rr_moved);
      }
    }
  }

  pub fn lookup(&self, iso_path: &str) -> Result<NodeHandle> {
    self.require_open()?;
    self.tree.lookup(iso_path)
  }

  pub fn list_dir(&self, iso_path: &str) -> Result<Vec<String>> {
    self.require_open()?;
    let handle = self.tree.lookup(iso_path)?;
    Ok(self.tree.children(handle).iter().map(|&h| self.tree.node(h).name.clone()).collect())
  }

  pub fn is_directory(&self, handle: NodeHandle) -> bool {
    self.tree.node(handle).is_directory()
  }

  pub fn file_size(&self, handle: NodeHandle) -> Result<u32> {
    match &self.tree.node(handle).entry {
      NodeEntry::File { source, .. } => source.len(),
      _ => Err(Error::NotFound(self.tree.path_of(handle))),
    }
  }

  pub fn add_eltorito(&mut self, boot_iso_path: &str, catalog_iso_path: &str, platform_id: PlatformId, add_boot_info_table: bool) -> Result<()> {
    self.require_open()?;
    let boot_handle = self.tree.lookup(boot_iso_path)?;
    let blocks = match &self.tree.node(boot_handle).entry {
      NodeEntry::File { source, .. } => crate::numeric::blocks_for_bytes(source.len()?, SECTOR_SIZE as u32),
      _ => return Err(Error::NotFound(boot_iso_path.to_string())),
    };
    let (parent_path, name) = self.split_path(catalog_iso_path);
    let parent = self.tree.lookup(parent_path)?;
    self.tree.add_file(parent, name, FileSource::InMemory(vec![0u8; SECTOR_SIZE]))?;
    let default_entry = BootEntry {
      bootable: true,
      media_type: BootMediaType::NoEmulation,
      load_segment: 0,
      system_type: 0,
      sector_count: (blocks * SECTOR_SIZE as u32 / 512) as u16,
      load_rba: 0,
      selection_criteria_type: 0,
    };
    let catalog = BootCatalog::new(platform_id, default_entry);
    self.eltorito = Some(ElToritoState {
      catalog,
      catalog_path: catalog_iso_path.to_string(),
      boot_file_path: boot_iso_path.to_string(),
      platform_id,
      add_boot_info_table,
    });
    Ok(())
  }

  pub fn remove_eltorito(&mut self) -> Result<()> {
    self.require_open()?;
    if self.eltorito.is_none() {
      return Err(Error::NoElToritoPresent);
    }
    self.eltorito = None;
    Ok(())
  }

  pub fn add_isohybrid(&mut self, boot_code: Vec<u8>, disk_signature: u32, partition_type: u8) -> Result<()> {
    self.require_open()?;
    let boot_file_path = match &self.eltorito {
      Some(eltorito) => eltorito.boot_file_path.clone(),
      None => return Err(Error::IsohybridRequiresElTorito),
    };
    let boot_handle = self.tree.lookup(&boot_file_path)?;
    let boot_bytes = match &self.tree.node(boot_handle).entry {
      NodeEntry::File { source, .. } => source.len()?,
      _ => 0,
    };
    let blocks = crate::numeric::blocks_for_bytes(boot_bytes, SECTOR_SIZE as u32);
    let partition = crate::isohybrid::MbrPartitionEntry { bootable: true, partition_type, lba_start: 0, num_sectors: blocks * (SECTOR_SIZE as u32 / 512) };
    self.isohybrid = Some(IsohybridMbr::new(boot_code, disk_signature, vec![partition])?);
    Ok(())
  }

  pub fn remove_isohybrid(&mut self) -> Result<()> {
    self.require_open()?;
    self.isohybrid = None;
    Ok(())
  }

  /// Serialise the in-memory model to `writer`, running the extent
  /// re-packer first (§4.7/§4.8).
  pub fn write<W: Write + Seek>(&mut self, mut writer: W) -> Result<()> {
    self.require_open()?;
    let catalog_ref = self.eltorito.as_ref().map(|e| &e.catalog);
    let boot_catalog_path = self.eltorito.as_ref().map(|e| e.catalog_path.clone());
    let boot_file_path = self.eltorito.as_ref().map(|e| e.boot_file_path.clone());
    let layout = crate::layout::repack(crate::layout::RepackInput {
      tree: &mut self.tree,
      boot_records_present: self.eltorito.is_some(),
      svd_count: self.svd_joliet.is_some() as usize,
      joliet_enabled: self.svd_joliet.is_some(),
      boot_catalog: catalog_ref,
      boot_file_path: boot_file_path.clone(),
      boot_catalog_path: boot_catalog_path.clone(),
    })?;

    self.pvd.volume_space_size = layout.space_size;
    self.pvd.path_table_size = layout.pvd_path_table_bytes as u32;
    self.pvd.type_l_path_table = layout.pvd_path_table_le_extent;
    self.pvd.type_m_path_table = layout.pvd_path_table_be_extent;
    self.pvd.root_directory_record = RootRecordSummary { extent: layout.root_extent, data_length: SECTOR_SIZE as u32 };

    if let Some(svd) = &mut self.svd_joliet {
      svd.volume_space_size = layout.space_size;
      svd.path_table_size = layout.joliet_path_table.as_ref().map(|t| t.byte_len()).unwrap_or(10) as u32;
      svd.type_l_path_table = layout.joliet_path_table_le_extent;
      svd.type_m_path_table = layout.joliet_path_table_be_extent;
      svd.root_directory_record = RootRecordSummary { extent: layout.joliet_root_extent.unwrap_or(0), data_length: SECTOR_SIZE as u32 };
    }

    // Patch the PVD path table's LE root extent and every record's extent.
    let mut pvd_path_table = layout.pvd_path_table.clone();
    patch_path_table_extents(&mut pvd_path_table, &self.tree, false);

    writer.seek(SeekFrom::Start(0))?;
    let system_area = vec![0u8; SECTOR_SIZE * 16];
    writer.write_all(&system_area)?;

    let mut pvd_block = vec![0u8; SECTOR_SIZE];
    self.pvd.write(&mut pvd_block);
    writer.write_all(&pvd_block)?;

    if let Some(eltorito) = &self.eltorito {
      let br = BootRecordDescriptor::new_el_torito(layout.boot_catalog_extent.unwrap_or(0));
      let mut block = vec![0u8; SECTOR_SIZE];
      br.write(&mut block);
      writer.write_all(&block)?;
      let _ = eltorito;
    }

    if let Some(svd) = &self.svd_joliet {
      let mut block = vec![0u8; SECTOR_SIZE];
      svd.write(&mut block);
      writer.write_all(&block)?;
    }

    writer.write_all(&terminator_block())?;
    writer.write_all(&vec![0u8; SECTOR_SIZE])?; // Version descriptor

    let le_bytes = pvd_path_table.write(ByteOrder::Little);
    write_padded(&mut writer, &le_bytes, layout.pvd_path_table_blocks_per_order as usize * SECTOR_SIZE)?;
    let be_bytes = pvd_path_table.write(ByteOrder::Big);
    write_padded(&mut writer, &be_bytes, layout.pvd_path_table_blocks_per_order as usize * SECTOR_SIZE)?;

    if let Some(joliet_table) = &layout.joliet_path_table {
      let mut table = joliet_table.clone();
      patch_path_table_extents(&mut table, &self.tree, true);
      let le = table.write(ByteOrder::Little);
      write_padded(&mut writer, &le, layout.joliet_path_table_blocks_per_order as usize * SECTOR_SIZE)?;
      let be = table.write(ByteOrder::Big);
      write_padded(&mut writer, &be, layout.joliet_path_table_blocks_per_order as usize * SECTOR_SIZE)?;
    }

    let mut ordered_extents: Vec<&u32> = layout.directory_blocks.keys().collect();
    ordered_extents.sort();
    for extent in ordered_extents {
      writer.seek(SeekFrom::Start(*extent as u64 * SECTOR_SIZE as u64))?;
      writer.write_all(&layout.directory_blocks[extent])?;
    }

    if let (Some(eltorito), Some(catalog_extent)) = (&self.eltorito, layout.boot_catalog_extent) {
      writer.seek(SeekFrom::Start(catalog_extent as u64 * SECTOR_SIZE as u64))?;
      writer.write_all(&eltorito.catalog.encode())?;
    }

    let catalog_handle = boot_catalog_path.as_deref().and_then(|p| self.tree.lookup(p).ok());

    for (&handle, &extent) in &layout.file_extents {
      if matches!(&self.tree.node(handle).entry, NodeEntry::File { hard_link_of: Some(_), .. }) {
        continue;
      }
      if Some(handle) == catalog_handle {
        // The catalog sector is written from `eltorito.catalog.encode()`
        // above; the tracked `InMemory` placeholder backing this handle
        // must not overwrite it with zeros.
        continue;
      }
      let mut bytes = read_file_bytes(self, handle)?;
      if let (Some(eltorito), Some(boot_path)) = (&self.eltorito, &boot_file_path) {
        if eltorito.add_boot_info_table && self.tree.path_of(handle) == *boot_path {
          let padded_len = crate::numeric::blocks_for_bytes(bytes.len() as u32, SECTOR_SIZE as u32) as usize * SECTOR_SIZE;
          bytes.resize(padded_len, 0);
          let table = BootInfoTable::compute(crate::layout::FIRST_DESCRIPTOR_EXTENT, extent, &bytes);
          table.write_into(&mut bytes);
        }
      }
      let padded_len = crate::numeric::blocks_for_bytes(bytes.len() as u32, SECTOR_SIZE as u32) as usize * SECTOR_SIZE;
      bytes.resize(padded_len, 0);
      writer.seek(SeekFrom::Start(extent as u64 * SECTOR_SIZE as u64))?;
      writer.write_all(&bytes)?;
    }

    // Truncation is a property of the underlying stream; callers using
    // `std::fs::File` should `set_len` themselves after `write` returns
    // if they need a byte-exact file size (see isopod-cli).
    debug!("wrote image: space_size={} blocks", layout.space_size);

    if let Some(mbr) = &self.isohybrid {
      // The MBR sector overlays the (currently all-zero) system area
      // reserved in the first 16 blocks, so no read-back is needed.
      let bytes = mbr.write();
      writer.seek(SeekFrom::Start(0))?;
      writer.write_all(&bytes)?;
    }

    Ok(())
  }

  /// The narrow in-place update fast-path (§4.9): only legal when the
  /// new payload occupies the same block count as the old one.
  pub fn in_place_update<S: Read + Write + Seek>(&mut self, mut stream: S, new_bytes: &[u8], iso_path: &str) -> Result<()> {
    self.require_open()?;
    let handle = self.tree.lookup(iso_path)?;
    let old_len = match &self.tree.node(handle).entry {
      NodeEntry::File { source, .. } => source.len()?,
      _ => return Err(Error::NotFound(iso_path.to_string())),
    };
    let old_blocks = crate::numeric::blocks_for_bytes(old_len, SECTOR_SIZE as u32);
    let new_blocks = crate::numeric::blocks_for_bytes(new_bytes.len() as u32, SECTOR_SIZE as u32);
    if old_blocks != new_blocks {
      return Err(Error::InPlaceBlockCountChanged { path: iso_path.to_string(), old: old_blocks, new: new_blocks });
    }
    let extent = self.tree.node(handle).extent;
    let mut padded = new_bytes.to_vec();
    padded.resize(new_blocks as usize * SECTOR_SIZE, 0);
    stream.seek(SeekFrom::Start(extent as u64 * SECTOR_SIZE as u64))?;
    stream.write_all(&padded)?;
    if let NodeEntry::File { source, .. } = &mut self.tree.node_mut(handle).entry {
      *source = FileSource::Existing { extent, length: new_bytes.len() as u32 };
    }
    if let Some(image) = &mut self.source_image {
      let start = extent as usize * SECTOR_SIZE;
      let end = start + padded.len();
      if end > image.len() {
        image.resize(end, 0);
      }
      image[start..end].copy_from_slice(&padded);
    }
    Ok(())
  }

  pub fn get_and_write<W: Write>(&self, iso_path: &str, mut out: W) -> Result<()> {
    self.require_open()?;
    let handle = self.tree.lookup(iso_path)?;
    let bytes = read_file_bytes(self, handle)?;
    out.write_all(&bytes)?;
    Ok(())
  }

  pub fn options(&self) -> &SessionOptions {
    &self.options
  }
}

fn terminator_block() -> Vec<u8> {
  let mut block = vec![0u8; SECTOR_SIZE];
  VolumeDescriptor::SetTerminator.write(&mut block);
  block
}

fn write_padded<W: Write>(writer: &mut W, bytes: &[u8], total: usize) -> Result<()> {
  let mut padded = bytes.to_vec();
  padded.resize(total, 0);
  writer.write_all(&padded)?;
  Ok(())
}

fn patch_path_table_extents(table: &mut crate::pathtable::PathTable, tree: &Tree, joliet: bool) {
  // Records were built in BFS order starting with the root; walk the
  // same order over the tree to patch in the extents the re-packer
  // assigned (build_path_table in layout.rs does not know extents yet).
  let mut handles = vec![tree.root()];
  let mut frontier = vec![tree.root()];
  while !frontier.is_empty() {
    let mut next = Vec::new();
    for &parent in &frontier {
      for &child in tree.children(parent) {
        if tree.node(child).is_directory() {
          next.push(child);
        }
      }
    }
    handles.extend(next.iter().copied());
    frontier = next;
  }
  for (record, &handle) in table.records.iter_mut().zip(handles.iter()) {
    record.extent = if joliet { tree.node(handle).joliet_extent } else { tree.node(handle).extent };
  }
}

fn read_file_bytes(session: &Session, handle: NodeHandle) -> Result<Vec<u8>> {
  match &session.tree.node(handle).entry {
    NodeEntry::File { source: FileSource::InMemory(bytes), .. } => Ok(bytes.clone()),
    NodeEntry::File { source: FileSource::OnDisk(path), .. } => Ok(std::fs::read(path)?),
    NodeEntry::File { source: FileSource::Existing { extent, length }, .. } => {
      let image = session.source_image.as_ref().ok_or(Error::SourceImageUnavailable)?;
      let start = *extent as usize * SECTOR_SIZE;
      let end = start + *length as usize;
      if end > image.len() {
        return Err(Error::RecordCrossesBlockBoundary { extent: *extent, offset: 0 });
      }
      Ok(image[start..end].to_vec())
    }
    _ => Ok(Vec::new()),
  }
}

fn read_directory_tree<R: Read + Seek>(reader: &mut R, pvd: &PrimaryVolumeDescriptor, tree: &mut Tree) -> Result<()> {
  let root = tree.root();
  tree.node_mut(root).extent = pvd.root_directory_record.extent;
  read_directory_block(reader, pvd.root_directory_record.extent, pvd.root_directory_record.data_length, tree, root)
}

fn read_directory_block<R: Read + Seek>(
  reader: &mut R,
  extent: u32,
  data_length: u32,
  tree: &mut Tree,
  parent: NodeHandle,
) -> Result<()> {
  let blocks = crate::numeric::blocks_for_bytes(data_length, SECTOR_SIZE as u32).max(1);
  let mut buf = vec![0u8; blocks as usize * SECTOR_SIZE];
  reader.seek(SeekFrom::Start(extent as u64 * SECTOR_SIZE as u64))?;
  reader.read_exact(&mut buf)?;

  let mut children = Vec::new();
  let mut offset = 0usize;
  let mut seen_self = false;
  let mut seen_parent = false;
  while offset < buf.len() {
    let block_start = offset - (offset % SECTOR_SIZE);
    let block_end = block_start + SECTOR_SIZE;
    match DirectoryRecord::parse(extent, &buf[offset..block_end])? {
      None => {
        offset = block_end;
        continue;
      }
      Some(record) => {
        offset += record.encoded_len();
        match &record.identifier {
          RecordIdentifier::Special(_) if !seen_self => seen_self = true,
          RecordIdentifier::Special(_) if !seen_parent => seen_parent = true,
          RecordIdentifier::Special(_) => {}
          RecordIdentifier::Named(name) => children.push((name.clone(), record)),
        }
      }
    }
  }

  for (name, record) in children {
    if record.is_directory() {
      let handle = tree.mkdir(parent, &name)?;
      tree.node_mut(handle).extent = record.extent;
      read_directory_block(reader, record.extent, record.data_length, tree, handle)?;
    } else {
      tree.add_file(parent, &name, FileSource::Existing { extent: record.extent, length: record.data_length })?;
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  fn options(volume_id: &str) -> SessionOptions {
    SessionOptions { volume_id: volume_id.to_string(), ..SessionOptions::default() }
  }

  #[test]
  fn empty_session_writes_expected_layout() {
    let mut session = Session::new_session(options("EMPTY"));
    let mut out = Cursor::new(Vec::new());
    session.write(&mut out).unwrap();
    let bytes = out.into_inner();
    assert!(bytes.len() >= 24 * SECTOR_SIZE);
    assert_eq!(&bytes[32768 + 1..32768 + 6], b"CD001");
  }

  #[test]
  fn add_file_then_write_places_record() {
    let mut session = Session::new_session(options("VOL"));
    session.add_file(FileSource::InMemory(vec![1, 2, 3, 4, 5]), "/FOO.;1", None).unwrap();
    let mut out = Cursor::new(Vec::new());
    session.write(&mut out).unwrap();
    assert!(session.lookup("/FOO.;1").is_ok());
  }

  #[test]
  fn joliet_twin_shares_extent_with_pvd_record() {
    let mut opts = options("VOL");
    opts.features.joliet = true;
    let mut session = Session::new_session(opts);
    session.add_file(FileSource::InMemory(vec![1, 2, 3]), "/FOO.;1", Some("foo")).unwrap();
    let mut out = Cursor::new(Vec::new());
    session.write(&mut out).unwrap();
    let handle = session.lookup("/FOO.;1").unwrap();
    assert_eq!(session.tree.node(handle).joliet_name.as_deref(), Some("foo"));
  }

  #[test]
  fn in_place_update_rejects_size_change() {
    let mut session = Session::new_session(options("VOL"));
    session.add_file(FileSource::InMemory(vec![0u8; 2048]), "/FOO.;1", None).unwrap();
    let mut image = Cursor::new(Vec::new());
    session.write(&mut image).unwrap();
    let result = session.in_place_update(&mut image, &vec![0u8; 4096], "/FOO.;1");
    assert!(matches!(result, Err(Error::InPlaceBlockCountChanged { old: 1, new: 2, .. })));
  }

  #[test]
  fn eltorito_requires_boot_file_present() {
    let mut session = Session::new_session(options("VOL"));
    assert!(session.add_eltorito("/MISSING.;1", "/BOOT.CAT;1", PlatformId::X86, false).is_err());
  }

  #[test]
  fn isohybrid_requires_eltorito_first() {
    let mut session = Session::new_session(options("VOL"));
    let result = session.add_isohybrid(vec![0x33, 0xED], 1, 0x00);
    assert!(matches!(result, Err(Error::IsohybridRequiresElTorito)));
  }

  #[test]
  fn remove_non_empty_directory_rejected() {
    let mut session = Session::new_session(options("VOL"));
    session.add_directory("/DOCS").unwrap();
    session.add_file(FileSource::InMemory(vec![1]), "/DOCS/A.TXT;1", None).unwrap();
    assert!(session.remove_directory("/DOCS").is_err());
  }
}
