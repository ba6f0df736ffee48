//! The extent re-packer: the deterministic, twelve-step assignment of
//! logical block numbers to every descriptor, path table, directory
//! block, continuation area, boot-catalog entry, and file payload
//! (§4.7). Runs after every tree mutation.

use std::collections::HashMap;

use log::debug;

use crate::constants::SECTOR_SIZE;
use crate::dirrecord::{DirectoryRecord, RecordFlags, SpecialIdentifier};
use crate::eltorito::BootCatalog;
use crate::numeric::{blocks_for_bytes, RecordTimestamp};
use crate::pathtable::{ByteOrder, PathTable, PathTableRecord};
use crate::rockridge::{encode_entries, ContinuationArea, ExtensionsReference, RockRidgeEntry};
use crate::tree::{FileSource, NodeEntry, NodeHandle, Tree};

pub const FIRST_DESCRIPTOR_EXTENT: u32 = 16;

/// Everything a re-pack computed, handed back to the session so it can
/// patch its volume descriptors and drive the writer.
pub struct Layout {
  pub space_size: u32,
  pub pvd_path_table_le_extent: u32,
  pub pvd_path_table_be_extent: u32,
  pub pvd_path_table_blocks_per_order: u32,
  pub pvd_path_table_bytes: usize,
  pub pvd_path_table: PathTable,
  pub joliet_path_table_le_extent: u32,
  pub joliet_path_table_be_extent: u32,
  pub joliet_path_table_blocks_per_order: u32,
  pub joliet_path_table: Option<PathTable>,
  pub root_extent: u32,
  pub joliet_root_extent: Option<u32>,
  pub continuation_area_extent: Option<u32>,
  pub boot_catalog_extent: Option<u32>,
  pub boot_catalog_blocks: u32,
  /// Rendered directory blocks, keyed by the extent they were placed at.
  pub directory_blocks: HashMap<u32, Vec<u8>>,
  /// Per-node continuation-area placement (directory-record system-use
  /// entries that did not fit in the record itself).
  pub continuations: HashMap<NodeHandle, ContinuationArea>,
  /// File payload extents, keyed by canonical node handle.
  pub file_extents: HashMap<NodeHandle, u32>,
}

struct Allocator {
  next_extent: u32,
}

impl Allocator {
  fn take(&mut self, blocks: u32) -> u32 {
    let extent = self.next_extent;
    self.next_extent += blocks;
    extent
  }
}

/// Everything the re-packer needs from the session, gathered up front
/// so this module does not depend on `session`'s type (avoiding a
/// layout ⇄ session cycle at the type level; only call direction is
/// session → layout).
pub struct RepackInput<'a> {
  pub tree: &'a mut Tree,
  pub boot_records_present: bool,
  pub svd_count: usize,
  pub joliet_enabled: bool,
  pub boot_catalog: Option<&'a BootCatalog>,
  pub boot_file_path: Option<String>,
  pub boot_catalog_path: Option<String>,
}

pub fn repack(input: RepackInput) -> crate::error::Result<Layout> {
  let tree = input.tree;
  let mut alloc = Allocator { next_extent: FIRST_DESCRIPTOR_EXTENT };

  // Step 1: PVD.
  alloc.take(1);
  // Step 2: boot records.
  if input.boot_records_present {
    alloc.take(1);
  }
  // Step 3: SVDs.
  alloc.take(input.svd_count as u32);
  // Step 4: set terminator.
  alloc.take(1);
  // Step 5: version descriptor.
  alloc.take(1);

  // Step 6: PVD path table (LE then BE), each rounded up to a 4KiB pair.
  let pvd_path_table = build_path_table(tree, false);
  let pvd_bytes = pvd_path_table.byte_len();
  let pvd_blocks_per_order = blocks_for_bytes(pvd_bytes as u32, 4096) * (4096 / SECTOR_SIZE as u32);
  let pvd_le_extent = alloc.take(pvd_blocks_per_order);
  let pvd_be_extent = alloc.take(pvd_blocks_per_order);

  // Step 7: Joliet path table, if present.
  let (joliet_path_table, joliet_blocks_per_order, joliet_le_extent, joliet_be_extent) = if input.joliet_enabled {
    let table = build_path_table(tree, true);
    let bytes = table.byte_len();
    let blocks = blocks_for_bytes(bytes as u32, 4096) * (4096 / SECTOR_SIZE as u32);
    let le = alloc.take(blocks);
    let be = alloc.take(blocks);
    (Some(table), blocks, le, be)
  } else {
    (None, 0, 0, 0)
  };

  // Step 8: PVD directory extents, BFS from root. Rendering the actual
  // block bytes is deferred until after step 10: a record's inline
  // system-use area may end with a CE entry pointing at the
  // continuation area, whose placement isn't known until every
  // directory (including the ones a CL/PL/RE entry references) has an
  // extent.
  let root_extent = assign_directory_extents_only(tree, &mut alloc, false);

  // Step 9: Joliet directory extents, BFS.
  let joliet_root_extent = if input.joliet_enabled { Some(assign_directory_extents_only(tree, &mut alloc, true)) } else { None };

  // Step 10: Rock Ridge continuation area.
  let mut directory_blocks = HashMap::new();
  let (continuation_area_extent, continuations) = if tree.rock_ridge_enabled {
    let (extent, placements, payload) = allocate_continuation_area(tree, &mut alloc);
    if let (Some(extent), Some(payload)) = (extent, payload) {
      directory_blocks.insert(extent, payload);
    }
    (extent, placements)
  } else {
    (None, HashMap::new())
  };

  // Now render every directory block, PVD first then Joliet (which
  // never carries Rock Ridge system-use, so it gets an empty placement map).
  render_directory_blocks(tree, false, &continuations, &mut directory_blocks)?;
  if input.joliet_enabled {
    render_directory_blocks(tree, true, &HashMap::new(), &mut directory_blocks)?;
  }

  // Step 11: El Torito boot catalog, then initial-entry/section payloads.
  let mut file_extents: HashMap<NodeHandle, u32> = HashMap::new();
  let mut already_placed: std::collections::HashSet<NodeHandle> = std::collections::HashSet::new();
  let boot_catalog_blocks = input.boot_catalog.map(|c| c.block_count()).unwrap_or(0);
  let boot_catalog_extent = if let Some(catalog_path) = &input.boot_catalog_path {
    if input.boot_catalog.is_some() {
      let extent = alloc.take(boot_catalog_blocks);
      if let Ok(handle) = tree.lookup(catalog_path) {
        file_extents.insert(handle, extent);
        already_placed.insert(handle);
      }
      Some(extent)
    } else {
      None
    }
  } else {
    None
  };
  if let Some(boot_path) = &input.boot_file_path {
    if let Ok(handle) = tree.lookup(boot_path) {
      if !already_placed.contains(&handle) {
        let blocks = file_blocks(tree, handle)?;
        let extent = alloc.take(blocks);
        file_extents.insert(handle, extent);
        already_placed.insert(handle);
      }
    }
  }

  // Step 12: remaining file payloads, directory-walk order, skipping
  // already-placed files and follower linked records.
  for handle in tree.walk_preorder(tree.root()) {
    let node = tree.node(handle);
    if node.is_directory() || already_placed.contains(&handle) {
      continue;
    }
    let is_follower = matches!(&node.entry, NodeEntry::File { hard_link_of: Some(_), .. });
    if is_follower {
      continue;
    }
    if matches!(node.entry, NodeEntry::Symlink { .. }) {
      continue;
    }
    let blocks = file_blocks(tree, handle)?;
    let extent = alloc.take(blocks.max(0));
    file_extents.insert(handle, extent);
    already_placed.insert(handle);
  }
  // Resolve follower (hard link) extents to their canonical node's extent.
  let follower_handles: Vec<NodeHandle> = tree
    .walk_preorder(tree.root())
    .into_iter()
    .filter(|&h| matches!(&tree.node(h).entry, NodeEntry::File { hard_link_of: Some(_), .. }))
    .collect();
  for handle in follower_handles {
    if let NodeEntry::File { hard_link_of: Some(canonical), .. } = &tree.node(handle).entry {
      if let Some(&extent) = file_extents.get(canonical) {
        file_extents.insert(handle, extent);
      }
    }
  }

  for (&handle, &extent) in &file_extents {
    tree.node_mut(handle).extent = extent;
  }

  let space_size = alloc.next_extent;
  debug!("repack assigned {space_size} blocks");

  Ok(Layout {
    space_size,
    pvd_path_table_le_extent: pvd_le_extent,
    pvd_path_table_be_extent: pvd_be_extent,
    pvd_path_table_blocks_per_order: pvd_blocks_per_order,
    pvd_path_table_bytes: pvd_bytes,
    pvd_path_table,
    joliet_path_table_le_extent: joliet_le_extent,
    joliet_path_table_be_extent: joliet_be_extent,
    joliet_path_table_blocks_per_order: joliet_blocks_per_order,
    joliet_path_table,
    root_extent,
    joliet_root_extent,
    continuation_area_extent,
    boot_catalog_extent,
    boot_catalog_blocks,
    directory_blocks,
    continuations,
    file_extents,
  })
}

fn file_blocks(tree: &Tree, handle: NodeHandle) -> crate::error::Result<u32> {
  match &tree.node(handle).entry {
    NodeEntry::File { source, .. } => Ok(blocks_for_bytes(source.len()?, SECTOR_SIZE as u32)),
    _ => Ok(0),
  }
}

fn build_path_table(tree: &Tree, joliet: bool) -> PathTable {
  // Breadth-first so records naturally come out ordered by depth;
  // within a depth level we additionally sort by (parent, identifier)
  // as §4.3 requires.
  let mut by_depth: Vec<Vec<(NodeHandle, NodeHandle)>> = vec![vec![(tree.root(), tree.root())]];
  let mut frontier = vec![tree.root()];
  while !frontier.is_empty() {
    let mut next = Vec::new();
    for &parent in &frontier {
      for &child in tree.children(parent) {
        if tree.node(child).is_directory() {
          next.push((child, parent));
        }
      }
    }
    if next.is_empty() {
      break;
    }
    frontier = next.iter().map(|&(c, _)| c).collect();
    by_depth.push(next);
  }

  let mut directory_numbers: HashMap<NodeHandle, u16> = HashMap::new();
  let mut records = Vec::new();
  let mut index: u16 = 0;
  for level in &by_depth {
    let mut level_sorted = level.clone();
    level_sorted.sort_by(|(a, pa), (b, pb)| {
      let pa_num = directory_numbers.get(pa).copied().unwrap_or(1);
      let pb_num = directory_numbers.get(pb).copied().unwrap_or(1);
      pa_num.cmp(&pb_num).then_with(|| node_label(tree, *a, joliet).cmp(&node_label(tree, *b, joliet)))
    });
    for (handle, parent) in level_sorted {
      index += 1;
      directory_numbers.insert(handle, index);
      let parent_number = directory_numbers.get(&parent).copied().unwrap_or(1);
      records.push(PathTableRecord { identifier: node_label(tree, handle, joliet), extent: 0, parent_number });
    }
  }
  PathTable { records }
}

fn node_label(tree: &Tree, handle: NodeHandle, joliet: bool) -> String {
  if handle == tree.root() {
    return String::new();
  }
  let node = tree.node(handle);
  if joliet {
    node.joliet_name.clone().unwrap_or_else(|| node.name.clone())
  } else {
    node.name.clone()
  }
}

/// Walk directories breadth-first, assigning each one's extent. Byte
/// rendering happens later, in `render_directory_blocks`, once the Rock
/// Ridge continuation area (which some of these directories' records
/// may reference) also has a location.
fn assign_directory_extents_only(tree: &mut Tree, alloc: &mut Allocator, joliet: bool) -> u32 {
  let root = tree.root();
  let root_blocks = directory_byte_blocks(tree, root, joliet);
  let root_extent = alloc.take(root_blocks);
  if joliet {
    tree.node_mut(root).joliet_extent = root_extent;
  } else {
    tree.node_mut(root).extent = root_extent;
  }

  let mut frontier = vec![root];
  while !frontier.is_empty() {
    let mut next = Vec::new();
    for &parent in &frontier {
      let children: Vec<NodeHandle> = tree.children(parent).iter().copied().filter(|&c| tree.node(c).is_directory()).collect();
      for child in children {
        let blocks = directory_byte_blocks(tree, child, joliet);
        let extent = alloc.take(blocks);
        if joliet {
          tree.node_mut(child).joliet_extent = extent;
        } else {
          tree.node_mut(child).extent = extent;
        }
        next.push(child);
      }
    }
    frontier = next;
  }
  root_extent
}

/// Renders every directory's block bytes (needs self, parent, and — for
/// Rock Ridge relocation/continuation entries — other directories'
/// extents to already be assigned).
fn render_directory_blocks(
  tree: &Tree,
  joliet: bool,
  continuations: &HashMap<NodeHandle, ContinuationArea>,
  directory_blocks: &mut HashMap<u32, Vec<u8>>,
) -> crate::error::Result<()> {
  for handle in tree.all_directories_preorder() {
    let bytes = render_directory_block(tree, handle, joliet, continuations)?;
    let extent = if joliet { tree.node(handle).joliet_extent } else { tree.node(handle).extent };
    directory_blocks.insert(extent, bytes);
  }
  Ok(())
}

fn directory_node_extent(tree: &Tree, handle: NodeHandle, joliet: bool) -> u32 {
  if joliet {
    tree.node(handle).joliet_extent
  } else {
    tree.node(handle).extent
  }
}

fn directory_byte_blocks(tree: &Tree, handle: NodeHandle, joliet: bool) -> u32 {
  let len = directory_byte_len(tree, handle, joliet);
  blocks_for_bytes(len as u32, SECTOR_SIZE as u32).max(1)
}

/// Fixed on-disk length of a Continuation Area (CE) entry: a 4-byte
/// SUSP header plus three LSB/MSB `u32` fields, independent of the
/// block/offset/length values it actually carries. That makes it safe
/// to account for in a sizing pass before the continuation area's real
/// placement is known (the render pass fills in the real values later).
const CE_ENTRY_LEN: usize = 28;

/// How many system-use bytes a directory record for a `name_len`-byte
/// identifier has left to spend before hitting ECMA-119's 255-byte
/// record-length ceiling (§9.1, enforced by `DirectoryRecord::write`'s
/// single-byte length field).
fn record_budget(name_len: usize) -> usize {
  let pad = if name_len % 2 == 0 { 1 } else { 0 };
  255usize.saturating_sub(33 + name_len + pad)
}

/// Splits Rock Ridge entries into what fits inline within `max_len`
/// bytes (terminated with ST) and, if it doesn't all fit, the entries
/// that spill into the continuation area (in which case the inline
/// part is left without a terminator — the caller appends a CE entry
/// instead, and the continuation area itself carries the ST).
fn layout_system_use(entries: &[RockRidgeEntry], max_len: usize) -> (Vec<u8>, Option<Vec<RockRidgeEntry>>) {
  let mut terminated = entries.to_vec();
  terminated.push(RockRidgeEntry::Terminator);
  let full = encode_entries(&terminated);
  if full.len() <= max_len {
    return (full, None);
  }
  let mut inline = Vec::new();
  let mut packed = 0usize;
  let mut split_at = entries.len();
  for (i, entry) in entries.iter().enumerate() {
    let bytes = entry.encode();
    if packed + bytes.len() + CE_ENTRY_LEN > max_len {
      split_at = i;
      break;
    }
    inline.extend_from_slice(&bytes);
    packed += bytes.len();
  }
  let mut overflow: Vec<RockRidgeEntry> = entries[split_at..].to_vec();
  overflow.push(RockRidgeEntry::Terminator);
  (inline, Some(overflow))
}

fn directory_byte_len(tree: &Tree, handle: NodeHandle, joliet: bool) -> usize {
  let mut len = self_and_parent_record_len(tree, handle, joliet);
  for &child in tree.children(handle) {
    let record_len = child_record_len(tree, child, joliet);
    if len % SECTOR_SIZE + record_len > SECTOR_SIZE {
      len += SECTOR_SIZE - (len % SECTOR_SIZE);
    }
    len += record_len;
  }
  len
}

/// The `.` and `..` records' combined length, including the root's SP
/// signature and ER registration (only ever written on `.` for the
/// root) and a relocated directory's PL back-reference (only ever
/// written on `..`, per §4.5).
fn self_and_parent_record_len(tree: &Tree, handle: NodeHandle, joliet: bool) -> usize {
  let mut len = 34 * 2; // `.` and `..`: 33 header bytes + 1-byte identifier each, already even so no pad
  if !joliet && tree.rock_ridge_enabled {
    if handle == tree.root() {
      len += root_self_system_use().len();
    }
    len += parent_record_system_use(tree, handle).len();
  }
  len
}

fn root_self_system_use() -> Vec<u8> {
  encode_entries(&[
    RockRidgeEntry::SharingProtocol { skip_bytes: 0 },
    RockRidgeEntry::ExtensionsReferenceEntry(ExtensionsReference {
      identifier: "RRIP_1991A".to_string(),
      descriptor: "THE ROCK RIDGE INTERCHANGE PROTOCOL".to_string(),
      source: "PLEASE CONTACT THE DISC PUBLISHER FOR SPECIFICATION SOURCE".to_string(),
    }),
    RockRidgeEntry::Terminator,
  ])
}

fn parent_record_system_use(tree: &Tree, handle: NodeHandle) -> Vec<u8> {
  match tree.node(handle).relocated_original_parent {
    Some(original_parent) => {
      let extent = tree.node(original_parent).extent;
      encode_entries(&[RockRidgeEntry::ParentLink { extent }, RockRidgeEntry::Terminator])
    }
    None => Vec::new(),
  }
}

fn child_record_name(tree: &Tree, child: NodeHandle, joliet: bool) -> String {
  let node = tree.node(child);
  if joliet {
    node.joliet_name.clone().unwrap_or_else(|| node.name.clone())
  } else {
    node.name.clone()
  }
}

/// The inline/overflow split for a child record's system-use area.
/// Called identically from the sizing pass (`directory_byte_len`, via
/// `child_record_len`) and the render pass (`finalize_child_system_use`)
/// so the two can never disagree on how many bytes a record occupies.
fn child_system_use_plan(tree: &Tree, child: NodeHandle, joliet: bool, name_len: usize) -> (Vec<u8>, Option<Vec<RockRidgeEntry>>) {
  if joliet || !tree.rock_ridge_enabled {
    return (Vec::new(), None);
  }
  let budget = record_budget(name_len);
  let entries = rock_ridge_child_entries(tree, child);
  layout_system_use(&entries, budget)
}

fn child_record_len(tree: &Tree, child: NodeHandle, joliet: bool) -> usize {
  let name = child_record_name(tree, child, joliet);
  let name_len = name.len().max(1);
  let pad = if name_len % 2 == 0 { 1 } else { 0 };
  let (inline, overflow) = child_system_use_plan(tree, child, joliet, name_len);
  let system_use_len = if overflow.is_some() { inline.len() + CE_ENTRY_LEN } else { inline.len() };
  33 + name_len + pad + system_use_len
}

fn finalize_child_system_use(tree: &Tree, child: NodeHandle, continuations: &HashMap<NodeHandle, ContinuationArea>) -> Vec<u8> {
  let name = child_record_name(tree, child, false);
  let name_len = name.len().max(1);
  let (mut inline, overflow) = child_system_use_plan(tree, child, false, name_len);
  if overflow.is_some() {
    let area = continuations.get(&child).cloned().unwrap_or(ContinuationArea { block: 0, offset: 0, length: 0 });
    inline.extend_from_slice(&RockRidgeEntry::ContinuationAreaEntry(area).encode());
  }
  inline
}

fn render_directory_block(
  tree: &Tree,
  handle: NodeHandle,
  joliet: bool,
  continuations: &HashMap<NodeHandle, ContinuationArea>,
) -> crate::error::Result<Vec<u8>> {
  let blocks = directory_byte_blocks(tree, handle, joliet);
  let mut out = vec![0u8; (blocks as usize) * SECTOR_SIZE];
  let self_extent = directory_node_extent(tree, handle, joliet);
  let parent = tree.node(handle).parent.unwrap_or(handle);
  let parent_extent = directory_node_extent(tree, parent, joliet);
  let now = RecordTimestamp::now();

  let mut offset = 0;
  let mut self_record = DirectoryRecord::new_special(SpecialIdentifier::SelfDirectory, self_extent, (blocks as usize * SECTOR_SIZE) as u32, now);
  if !joliet && tree.rock_ridge_enabled && handle == tree.root() {
    self_record.system_use = root_self_system_use();
  }
  self_record.write(&mut out[offset..offset + self_record.encoded_len()])?;
  offset += self_record.encoded_len();
  let mut parent_record = DirectoryRecord::new_special(SpecialIdentifier::ParentDirectory, parent_extent, 0, now);
  if !joliet && tree.rock_ridge_enabled {
    parent_record.system_use = parent_record_system_use(tree, handle);
  }
  parent_record.write(&mut out[offset..offset + parent_record.encoded_len()])?;
  offset += parent_record.encoded_len();

  for &child in tree.children(handle) {
    let node = tree.node(child);
    let name = child_record_name(tree, child, joliet);
    let (extent, data_length) = match &node.entry {
      NodeEntry::Directory => (directory_node_extent(tree, child, joliet), directory_byte_len(tree, child, joliet) as u32),
      NodeEntry::File { .. } | NodeEntry::Symlink { .. } => (node.extent, node_payload_len(node)?),
    };
    let mut record = DirectoryRecord::new_file(&name, extent, data_length, now);
    if node.is_directory() {
      record.flags |= RecordFlags::DIRECTORY;
    }
    if !joliet && tree.rock_ridge_enabled {
      record.system_use = finalize_child_system_use(tree, child, continuations);
    }
    let record_len = record.encoded_len();
    if offset % SECTOR_SIZE + record_len > SECTOR_SIZE {
      offset += SECTOR_SIZE - (offset % SECTOR_SIZE);
    }
    record.write(&mut out[offset..offset + record_len])?;
    offset += record_len;
  }
  Ok(out)
}

fn node_payload_len(node: &crate::tree::Node) -> crate::error::Result<u32> {
  match &node.entry {
    NodeEntry::File { source, .. } => source.len(),
    NodeEntry::Symlink { .. } => Ok(0),
    NodeEntry::Directory => Ok(0),
  }
}

/// The Rock Ridge entries carried on a *child* record (not `.`/`..`,
/// which get their own system-use builders above), not yet terminated
/// or split for continuation — `child_system_use_plan` does that.
fn rock_ridge_child_entries(tree: &Tree, handle: NodeHandle) -> Vec<RockRidgeEntry> {
  use crate::rockridge::{NameFlags, PosixFileAttributes};
  let node = tree.node(handle);
  let mut entries = vec![RockRidgeEntry::PosixAttributes(PosixFileAttributes {
    mode: if node.is_directory() { 0o40755 } else { 0o100644 },
    links: 1,
    uid: 0,
    gid: 0,
  })];
  entries.push(RockRidgeEntry::AlternateName { flags: NameFlags::empty(), name: node.name.clone() });
  if let NodeEntry::Symlink { target } = &node.entry {
    let parts: Vec<_> = target.split('/').filter(|s| !s.is_empty()).collect();
    entries.push(RockRidgeEntry::SymbolicLink {
      flags: NameFlags::empty(),
      components: parts
        .into_iter()
        .map(|p| crate::rockridge::SymlinkComponent { flags: crate::rockridge::SymlinkComponentFlags::empty(), content: p.to_string() })
        .collect(),
    });
  }
  // §4.5 relocation back-references: CL on the placeholder left behind
  // at the original location, RE on the real directory now living
  // under /RR_MOVED (its own `..` record separately carries PL, built
  // by `parent_record_system_use`).
  if let Some(real) = node.relocated_placeholder_target {
    entries.push(RockRidgeEntry::ChildLink { extent: tree.node(real).extent });
  }
  if node.relocated_original_parent.is_some() {
    entries.push(RockRidgeEntry::Relocated);
  }
  entries
}

/// Computes the continuation area in two passes: first decide, for
/// every node whose inline system-use overflows its record, how many
/// bytes it needs and which block it lands in (packed one block at a
/// time, filled from the front; a payload that doesn't fit in what's
/// left of the current block starts the next one); then take the
/// extent and re-walk the same order to build the actual bytes now that
/// absolute block numbers are known.
fn allocate_continuation_area(tree: &Tree, alloc: &mut Allocator) -> (Option<u32>, HashMap<NodeHandle, ContinuationArea>, Option<Vec<u8>>) {
  let root = tree.root();
  let mut overflow_payloads: Vec<(NodeHandle, Vec<u8>)> = Vec::new();
  for handle in tree.walk_preorder(root) {
    if handle == root {
      continue; // the root's own `.` record never carries a CE entry
    }
    let name_len = child_record_name(tree, handle, false).len().max(1);
    let (_, overflow) = child_system_use_plan(tree, handle, false, name_len);
    if let Some(entries) = overflow {
      overflow_payloads.push((handle, encode_entries(&entries)));
    }
  }
  if overflow_payloads.is_empty() {
    return (None, HashMap::new(), None);
  }

  let mut block_index = 0u32;
  let mut block_offset = 0u32;
  let mut relative: Vec<(NodeHandle, u32, u32, u32)> = Vec::new();
  for (handle, bytes) in &overflow_payloads {
    let len = bytes.len() as u32;
    if block_offset + len > SECTOR_SIZE as u32 {
      block_index += 1;
      block_offset = 0;
    }
    relative.push((*handle, block_index, block_offset, len));
    block_offset += len;
  }
  let blocks_needed = block_index + 1;
  let extent = alloc.take(blocks_needed);

  let mut payload = vec![0u8; blocks_needed as usize * SECTOR_SIZE];
  let mut placements = HashMap::new();
  for ((_, bytes), &(handle, rel_block, rel_offset, len)) in overflow_payloads.iter().zip(relative.iter()) {
    let start = rel_block as usize * SECTOR_SIZE + rel_offset as usize;
    payload[start..start + len as usize].copy_from_slice(bytes);
    placements.insert(handle, ContinuationArea { block: extent + rel_block, offset: rel_offset, length: len });
  }

  (Some(extent), placements, Some(payload))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ident::InterchangeLevel;

  #[test]
  fn empty_tree_repacks_to_root_only() {
    let mut tree = Tree::new(InterchangeLevel::Level1, false, false);
    let layout = repack(RepackInput {
      tree: &mut tree,
      boot_records_present: false,
      svd_count: 0,
      joliet_enabled: false,
      boot_catalog: None,
      boot_file_path: None,
      boot_catalog_path: None,
    })
    .unwrap();
    // 16 (system area skip handled by caller) + 1 PVD + 1 terminator + 1 version
    // + 2 path table blocks (ceil(10/4096)*2) + 1 root directory block.
    assert_eq!(layout.root_extent, FIRST_DESCRIPTOR_EXTENT + 1 + 1 + 1 + 4);
  }

  #[test]
  fn single_file_gets_placed_after_root() {
    let mut tree = Tree::new(InterchangeLevel::Level1, false, false);
    let root = tree.root();
    let file = tree.add_file(root, "FOO.;1", FileSource::InMemory(vec![1, 2, 3, 4, 5])).unwrap();
    let layout = repack(RepackInput {
      tree: &mut tree,
      boot_records_present: false,
      svd_count: 0,
      joliet_enabled: false,
      boot_catalog: None,
      boot_file_path: None,
      boot_catalog_path: None,
    })
    .unwrap();
    let file_extent = *layout.file_extents.get(&file).unwrap();
    assert_eq!(file_extent, layout.root_extent + 1);
    assert_eq!(layout.space_size, file_extent + 1);
  }

  #[test]
  fn hard_linked_files_share_an_extent() {
    let mut tree = Tree::new(InterchangeLevel::Level1, false, false);
    let root = tree.root();
    let original = tree.add_file(root, "A.TXT;1", FileSource::InMemory(vec![1, 2, 3])).unwrap();
    let link = tree.add_hard_link(root, "B.TXT;1", original).unwrap();
    let layout = repack(RepackInput {
      tree: &mut tree,
      boot_records_present: false,
      svd_count: 0,
      joliet_enabled: false,
      boot_catalog: None,
      boot_file_path: None,
      boot_catalog_path: None,
    })
    .unwrap();
    assert_eq!(layout.file_extents.get(&original), layout.file_extents.get(&link));
  }

  #[test]
  fn joliet_tree_gets_independent_directory_extents() {
    let mut tree = Tree::new(InterchangeLevel::Level1, true, false);
    let root = tree.root();
    tree.add_file(root, "FOO.;1", FileSource::InMemory(vec![1])).unwrap();
    let layout = repack(RepackInput {
      tree: &mut tree,
      boot_records_present: false,
      svd_count: 1,
      joliet_enabled: true,
      boot_catalog: None,
      boot_file_path: None,
      boot_catalog_path: None,
    })
    .unwrap();
    assert!(layout.joliet_root_extent.is_some());
    assert_ne!(layout.joliet_root_extent.unwrap(), layout.root_extent);
  }
}
