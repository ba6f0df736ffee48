//! The in-memory directory tree every session operation mutates.
//!
//! Directories, files, hard links, and symlinks live in a flat arena
//! addressed by `NodeHandle` rather than through owning parent/child
//! `Rc`/`RefCell` links, so a node can be relocated (renamed, moved
//! under `/RR_MOVED`) without fighting the borrow checker over a cycle.

use std::path::PathBuf;

use log::trace;

use crate::error::{Error, Result};
use crate::ident::{self, InterchangeLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle(pub usize);

/// Where a file's bytes come from. Editing an existing image without
/// touching every file keeps untouched extents as `Existing` so the
/// writer can copy them verbatim instead of re-reading source data
/// that may no longer exist on the host filesystem.
#[derive(Debug, Clone)]
pub enum FileSource {
  InMemory(Vec<u8>),
  OnDisk(PathBuf),
  Existing { extent: u32, length: u32 },
}

impl FileSource {
  pub fn len(&self) -> Result<u32> {
    Ok(match self {
      FileSource::InMemory(bytes) => bytes.len() as u32,
      FileSource::OnDisk(path) => std::fs::metadata(path)?.len() as u32,
      FileSource::Existing { length, .. } => *length,
    })
  }
}

#[derive(Debug, Clone)]
pub enum NodeEntry {
  Directory,
  File { source: FileSource, hard_link_of: Option<NodeHandle> },
  Symlink { target: String },
}

#[derive(Debug, Clone)]
pub struct Node {
  pub name: String,
  pub joliet_name: Option<String>,
  pub parent: Option<NodeHandle>,
  pub children: Vec<NodeHandle>,
  pub entry: NodeEntry,
  /// Set once the extent re-packer assigns this node a position; used
  /// by the directory-record/path-table writers. For a file this is
  /// its payload extent (shared by every linked/Joliet record); for a
  /// directory this is the extent of its PVD-tree directory block.
  pub extent: u32,
  /// A directory's Joliet-tree directory block extent, distinct from
  /// `extent` because the two trees render different byte content
  /// (UCS-2BE names) even though they describe the same hierarchy.
  /// Unused for files, which share one payload extent across trees.
  pub joliet_extent: u32,
  /// Set on the *relocated* directory itself (the one living under
  /// `/RR_MOVED`) to the handle of its true original parent, so its
  /// `..` record can carry a PL entry pointing back there.
  pub relocated_original_parent: Option<NodeHandle>,
  /// Set on a placeholder left behind at the original location, to the
  /// handle of the real directory now living under `/RR_MOVED`, so its
  /// own record can carry a CL entry pointing at it.
  pub relocated_placeholder_target: Option<NodeHandle>,
}

impl Node {
  pub fn is_directory(&self) -> bool {
    matches!(self.entry, NodeEntry::Directory)
  }
}

/// Orders two ISO 9660 identifiers the way ECMA-119 §9.3 orders
/// directory records: byte-wise ascending, which for our uppercase
/// d-character names is equivalent to ASCII order.
fn compare_identifiers(a: &str, b: &str) -> std::cmp::Ordering {
  a.as_bytes().cmp(b.as_bytes())
}

pub struct Tree {
  nodes: Vec<Node>,
  root: NodeHandle,
  pub interchange_level: InterchangeLevel,
  pub joliet_enabled: bool,
  pub rock_ridge_enabled: bool,
}

impl Tree {
  pub fn new(interchange_level: InterchangeLevel, joliet_enabled: bool, rock_ridge_enabled: bool) -> Self {
    let root = Node {
      name: String::new(),
      joliet_name: None,
      parent: None,
      children: Vec::new(),
      entry: NodeEntry::Directory,
      extent: 0,
      joliet_extent: 0,
      relocated_original_parent: None,
      relocated_placeholder_target: None,
    };
    Self { nodes: vec![root], root: NodeHandle(0), interchange_level, joliet_enabled, rock_ridge_enabled }
  }

  pub fn root(&self) -> NodeHandle {
    self.root
  }

  pub fn node(&self, handle: NodeHandle) -> &Node {
    &self.nodes[handle.0]
  }

  pub fn node_mut(&mut self, handle: NodeHandle) -> &mut Node {
    &mut self.nodes[handle.0]
  }

  pub fn depth(&self, mut handle: NodeHandle) -> usize {
    let mut depth = 0;
    while let Some(parent) = self.nodes[handle.0].parent {
      depth += 1;
      handle = parent;
    }
    depth
  }

  pub fn children(&self, handle: NodeHandle) -> &[NodeHandle] {
    &self.nodes[handle.0].children
  }

  fn find_child(&self, parent: NodeHandle, name: &str) -> Option<NodeHandle> {
    self.nodes[parent.0].children.iter().copied().find(|&child| self.nodes[child.0].name == name)
  }

  fn insert_sorted(&mut self, parent: NodeHandle, handle: NodeHandle) {
    let name = self.nodes[handle.0].name.clone();
    let children = &mut self.nodes[parent.0].children;
    let position = children.partition_point(|&existing| {
      compare_identifiers(&self.nodes[existing.0].name, &name) == std::cmp::Ordering::Less
    });
    children.insert(position, handle);
  }

  fn validate_name(&self, name: &str) -> Result<()> {
    if self.rock_ridge_enabled {
      // Rock Ridge carries the real name out-of-band (NM entries); the
      // ECMA-119 identifier just needs to be well-formed, not descriptive.
      return Ok(());
    }
    ident::validate_file_identifier(name, self.interchange_level).or_else(|_| ident::validate_directory_identifier(name, self.interchange_level))
  }

  fn push_node(&mut self, node: Node) -> NodeHandle {
    self.nodes.push(node);
    NodeHandle(self.nodes.len() - 1)
  }

  pub fn mkdir(&mut self, parent: NodeHandle, name: &str) -> Result<NodeHandle> {
    self.validate_name(name)?;
    if self.find_child(parent, name).is_some() {
      return Err(Error::AlreadyExists(name.to_string()));
    }
    let node = Node {
      name: name.to_string(),
      joliet_name: self.joliet_enabled.then(|| name.to_string()),
      parent: Some(parent),
      children: Vec::new(),
      entry: NodeEntry::Directory,
      extent: 0,
      joliet_extent: 0,
      relocated_original_parent: None,
      relocated_placeholder_target: None,
    };
    let handle = self.push_node(node);
    self.insert_sorted(parent, handle);
    trace!("created directory {name:?} under {parent:?}");
    Ok(handle)
  }

  pub fn add_file(&mut self, parent: NodeHandle, name: &str, source: FileSource) -> Result<NodeHandle> {
    self.validate_name(name)?;
    if self.find_child(parent, name).is_some() {
      return Err(Error::AlreadyExists(name.to_string()));
    }
    let node = Node {
      name: name.to_string(),
      joliet_name: self.joliet_enabled.then(|| name.to_string()),
      parent: Some(parent),
      children: Vec::new(),
      entry: NodeEntry::File { source, hard_link_of: None },
      extent: 0,
      joliet_extent: 0,
      relocated_original_parent: None,
      relocated_placeholder_target: None,
    };
    let handle = self.push_node(node);
    self.insert_sorted(parent, handle);
    trace!("added file {name:?} under {parent:?}");
    Ok(handle)
  }

  pub fn add_hard_link(&mut self, parent: NodeHandle, name: &str, target: NodeHandle) -> Result<NodeHandle> {
    self.validate_name(name)?;
    if !matches!(self.nodes[target.0].entry, NodeEntry::File { .. }) {
      return Err(Error::HardLinkTargetMissing(name.to_string()));
    }
    let source = match &self.nodes[target.0].entry {
      NodeEntry::File { source, .. } => clone_source(source),
      _ => unreachable!(),
    };
    let canonical = match &self.nodes[target.0].entry {
      NodeEntry::File { hard_link_of: Some(existing), .. } => *existing,
      _ => target,
    };
    let node = Node {
      name: name.to_string(),
      joliet_name: self.joliet_enabled.then(|| name.to_string()),
      parent: Some(parent),
      children: Vec::new(),
      entry: NodeEntry::File { source, hard_link_of: Some(canonical) },
      extent: 0,
      joliet_extent: 0,
      relocated_original_parent: None,
      relocated_placeholder_target: None,
    };
    let handle = self.push_node(node);
    self.insert_sorted(parent, handle);
    Ok(handle)
  }

  pub fn add_symlink(&mut self, parent: NodeHandle, name: &str, target: &str) -> Result<NodeHandle> {
    if !self.rock_ridge_enabled {
      return Err(Error::RockRidgeNotEnabled);
    }
    self.validate_name(name)?;
    let node = Node {
      name: name.to_string(),
      joliet_name: self.joliet_enabled.then(|| name.to_string()),
      parent: Some(parent),
      children: Vec::new(),
      entry: NodeEntry::Symlink { target: target.to_string() },
      extent: 0,
      joliet_extent: 0,
      relocated_original_parent: None,
      relocated_placeholder_target: None,
    };
    let handle = self.push_node(node);
    self.insert_sorted(parent, handle);
    Ok(handle)
  }

  pub fn remove(&mut self, handle: NodeHandle) -> Result<()> {
    if handle == self.root {
      return Err(Error::InvalidCharacters("/".to_string()));
    }
    if self.nodes[handle.0].is_directory() && !self.nodes[handle.0].children.is_empty() {
      return Err(Error::DirectoryNotEmpty(self.nodes[handle.0].name.clone()));
    }
    let parent = self.nodes[handle.0].parent.expect("non-root node has a parent");
    self.nodes[parent.0].children.retain(|&child| child != handle);
    Ok(())
  }

  pub fn lookup(&self, path: &str) -> Result<NodeHandle> {
    let mut current = self.root;
    for component in path.split('/').filter(|c| !c.is_empty()) {
      current = self.find_child(current, component).ok_or_else(|| Error::NotFound(path.to_string()))?;
    }
    Ok(current)
  }

  pub fn path_of(&self, mut handle: NodeHandle) -> String {
    let mut components = Vec::new();
    while let Some(parent) = self.nodes[handle.0].parent {
      components.push(self.nodes[handle.0].name.clone());
      handle = parent;
    }
    components.reverse();
    format!("/{}", components.join("/"))
  }

  /// All nodes in a pre-order walk starting at `handle`, directories
  /// before their children, used by both the extent re-packer and
  /// directory listing.
  pub fn walk_preorder(&self, handle: NodeHandle) -> Vec<NodeHandle> {
    let mut out = vec![handle];
    for &child in &self.nodes[handle.0].children {
      if self.nodes[child.0].is_directory() {
        out.extend(self.walk_preorder(child));
      } else {
        out.push(child);
      }
    }
    out
  }

  pub fn all_directories_preorder(&self) -> Vec<NodeHandle> {
    fn visit(tree: &Tree, handle: NodeHandle, out: &mut Vec<NodeHandle>) {
      out.push(handle);
      for &child in &tree.nodes[handle.0].children {
        if tree.nodes[child.0].is_directory() {
          visit(tree, child, out);
        }
      }
    }
    let mut out = Vec::new();
    visit(self, self.root, &mut out);
    out
  }
}

fn clone_source(source: &FileSource) -> FileSource {
  match source {
    FileSource::InMemory(bytes) => FileSource::InMemory(bytes.clone()),
    FileSource::OnDisk(path) => FileSource::OnDisk(path.clone()),
    FileSource::Existing { extent, length } => FileSource::Existing { extent: *extent, length: *length },
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mkdir_and_lookup() {
    let mut tree = Tree::new(InterchangeLevel::Level1, false, false);
    let root = tree.root();
    let docs = tree.mkdir(root, "DOCS").unwrap();
    tree.add_file(docs, "A.TXT", FileSource::InMemory(vec![1, 2, 3])).unwrap();
    assert_eq!(tree.lookup("/DOCS/A.TXT").unwrap(), tree.find_child(docs, "A.TXT").unwrap());
    assert_eq!(tree.path_of(docs), "/DOCS");
  }

  #[test]
  fn children_stay_sorted() {
    let mut tree = Tree::new(InterchangeLevel::Level1, false, false);
    let root = tree.root();
    tree.mkdir(root, "ZDIR").unwrap();
    tree.mkdir(root, "ADIR").unwrap();
    tree.mkdir(root, "MDIR").unwrap();
    let names: Vec<_> = tree.children(root).iter().map(|&h| tree.node(h).name.clone()).collect();
    assert_eq!(names, vec!["ADIR", "MDIR", "ZDIR"]);
  }

  #[test]
  fn duplicate_name_rejected() {
    let mut tree = Tree::new(InterchangeLevel::Level1, false, false);
    let root = tree.root();
    tree.mkdir(root, "DIR").unwrap();
    assert!(tree.mkdir(root, "DIR").is_err());
  }

  #[test]
  fn hard_link_shares_source() {
    let mut tree = Tree::new(InterchangeLevel::Level1, false, false);
    let root = tree.root();
    let file = tree.add_file(root, "A.TXT", FileSource::Existing { extent: 20, length: 2048 }).unwrap();
    let link = tree.add_hard_link(root, "B.TXT", file).unwrap();
    match &tree.node(link).entry {
      NodeEntry::File { hard_link_of, .. } => assert_eq!(*hard_link_of, Some(file)),
      _ => panic!("expected file"),
    }
  }

  #[test]
  fn remove_non_empty_directory_rejected() {
    let mut tree = Tree::new(InterchangeLevel::Level1, false, false);
    let root = tree.root();
    let docs = tree.mkdir(root, "DOCS").unwrap();
    tree.add_file(docs, "A.TXT", FileSource::InMemory(vec![])).unwrap();
    assert!(tree.remove(docs).is_err());
  }

  #[test]
  fn symlink_requires_rock_ridge() {
    let mut tree = Tree::new(InterchangeLevel::Level1, false, false);
    let root = tree.root();
    assert!(matches!(tree.add_symlink(root, "LINK", "/docs/a.txt"), Err(Error::RockRidgeNotEnabled)));
  }

  #[test]
  fn depth_counts_from_root() {
    let mut tree = Tree::new(InterchangeLevel::Level1, false, false);
    let root = tree.root();
    let a = tree.mkdir(root, "A").unwrap();
    let b = tree.mkdir(a, "B").unwrap();
    assert_eq!(tree.depth(root), 0);
    assert_eq!(tree.depth(a), 1);
    assert_eq!(tree.depth(b), 2);
  }
}
