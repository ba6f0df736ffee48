use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
  #[command(subcommand)]
  pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
  /// Build a new ISO image from a directory tree.
  Create {
    /// Path to write the finished image to.
    #[arg(short, long)]
    output: PathBuf,
    /// Directories/files to add at the image root, `host:iso_path` to
    /// place a host path at a specific image path.
    files: Vec<String>,
    #[arg(long, default_value = "ISOPOD")]
    volume_id: String,
    #[arg(long, default_value = "")]
    publisher: String,
    #[arg(long, default_value = "")]
    preparer: String,
    #[arg(long)]
    joliet: bool,
    #[arg(long)]
    rock_ridge: bool,
    /// Path to a boot image to register as the El Torito default entry.
    #[arg(long)]
    boot_image: Option<PathBuf>,
    /// Patch an El Torito boot information table into the boot image.
    #[arg(long)]
    boot_info_table: bool,
  },
  /// Extract a directory's contents to a host directory.
  Extract {
    #[arg(short, long)]
    input: PathBuf,
    /// Directory inside the image to extract, defaulting to the root.
    #[arg(default_value = "/")]
    path: String,
    dest: PathBuf,
  },
  /// List the contents of a directory inside an image.
  Ls {
    #[arg(short, long)]
    input: PathBuf,
    #[arg(default_value = "/")]
    path: String,
    #[arg(short, long)]
    verbose: bool,
  },
  /// Add a single file to an existing image, writing the result to a
  /// new output image.
  Add {
    #[arg(short, long)]
    input: PathBuf,
    #[arg(short, long)]
    output: PathBuf,
    /// Host file to add.
    source: PathBuf,
    /// Destination path inside the image.
    dest: String,
  },
  /// Print a summary of an image's volume descriptors and, if
  /// present, its El Torito boot catalog.
  BootInfo {
    #[arg(short, long)]
    input: PathBuf,
  },
}
