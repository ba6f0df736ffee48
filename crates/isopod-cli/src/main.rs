use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use walkdir::WalkDir;

mod cli;

use isopod::{FeatureFlags, FileSource, ParseStrictness, PlatformId, Session, SessionOptions};

fn open_image(path: &Path) -> Result<Session> {
  let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
  Session::open_session(file, ParseStrictness::Lenient).with_context(|| format!("parsing {}", path.display()))
}

/// Adds every file and directory under `host_root` at `iso_root`,
/// upper-casing path components the way ISO 9660 identifiers expect.
fn add_host_tree(session: &mut Session, host_root: &Path, iso_root: &str, progress: &ProgressBar) -> Result<()> {
  if iso_root != "/" {
    let _ = session.add_directory(iso_root);
  }
  let entries = WalkDir::new(host_root).min_depth(1).sort_by_file_name().into_iter().filter_map(|e| e.ok());

  for entry in entries {
    let relative = entry.path().strip_prefix(host_root).unwrap();
    let iso_path = relative
      .components()
      .fold(iso_root.trim_end_matches('/').to_string(), |acc, c| format!("{acc}/{}", c.as_os_str().to_string_lossy().to_uppercase()));

    if entry.file_type().is_dir() {
      session.add_directory(&iso_path)?;
    } else if entry.file_type().is_file() {
      let (parent_path, _) = iso_path.rsplit_once('/').unwrap_or(("/", &iso_path));
      let _ = session.add_directory(if parent_path.is_empty() { "/" } else { parent_path });
      session.add_file(FileSource::OnDisk(entry.path().to_path_buf()), &iso_path, None)?;
      progress.inc(1);
    }
  }
  Ok(())
}

fn extract_tree(session: &Session, iso_path: &str, host_dir: &Path) -> Result<()> {
  std::fs::create_dir_all(host_dir)?;
  for name in session.list_dir(iso_path)? {
    let child_iso = format!("{}/{}", iso_path.trim_end_matches('/'), name);
    let host_path = host_dir.join(&name);
    match session.lookup(&child_iso) {
      Ok(handle) if session.is_directory(handle) => extract_tree(session, &child_iso, &host_path)?,
      Ok(_) => {
        let mut out = File::create(&host_path)?;
        session.get_and_write(&child_iso, &mut out)?;
      }
      Err(_) => {}
    }
  }
  Ok(())
}

fn print_tree(session: &Session, iso_path: &str, depth: usize, verbose: bool) -> Result<()> {
  for name in session.list_dir(iso_path)? {
    let child_iso = format!("{}/{}", iso_path.trim_end_matches('/'), name);
    let handle = session.lookup(&child_iso)?;
    let indent = "  ".repeat(depth);
    if session.is_directory(handle) {
      println!("{indent}{name}/");
      print_tree(session, &child_iso, depth + 1, verbose)?;
    } else if verbose {
      println!("{indent}{name}  ({} bytes)", session.file_size(handle)?);
    } else {
      println!("{indent}{name}");
    }
  }
  Ok(())
}

fn main() -> Result<()> {
  env_logger::init();
  let cli = cli::Cli::parse();

  match cli.command {
    cli::Command::Create { output, files, volume_id, publisher, preparer, joliet, rock_ridge, boot_image, boot_info_table } => {
      let mut session = Session::new_session(SessionOptions {
        volume_id,
        publisher_id: publisher,
        preparer_id: preparer,
        features: FeatureFlags { joliet, rock_ridge },
        ..SessionOptions::default()
      });

      let progress = ProgressBar::new_spinner();
      progress.set_style(ProgressStyle::with_template("{spinner} {msg} ({pos} files)").unwrap());
      progress.set_message("adding files");

      for spec in &files {
        let (host, iso_dest) = match spec.split_once(':') {
          Some((h, i)) => (PathBuf::from(h), i.to_string()),
          None => {
            let base = Path::new(spec).file_name().map(|n| n.to_string_lossy().to_uppercase()).unwrap_or_default();
            (PathBuf::from(spec), format!("/{base}"))
          }
        };
        let metadata = std::fs::metadata(&host).with_context(|| format!("reading {}", host.display()))?;
        if metadata.is_dir() {
          add_host_tree(&mut session, &host, &iso_dest, &progress)?;
        } else {
          session.add_file(FileSource::OnDisk(host), &iso_dest, None)?;
          progress.inc(1);
        }
      }

      if let Some(boot_image) = boot_image {
        let boot_dest = "/BOOT.IMG;1";
        session.add_file(FileSource::OnDisk(boot_image), boot_dest, None)?;
        session.add_eltorito(boot_dest, "/BOOT.CAT;1", PlatformId::X86, boot_info_table)?;
      }

      progress.finish_with_message("writing image");
      let file = File::create(&output).with_context(|| format!("creating {}", output.display()))?;
      session.write(BufWriter::new(file))?;
      info!("wrote {}", output.display());
    }

    cli::Command::Extract { input, path, dest } => {
      let session = open_image(&input)?;
      extract_tree(&session, &path, &dest)?;
    }

    cli::Command::Ls { input, path, verbose } => {
      let session = open_image(&input)?;
      print_tree(&session, &path, 0, verbose)?;
    }

    cli::Command::Add { input, output, source, dest } => {
      let mut session = open_image(&input)?;
      session.add_file(FileSource::OnDisk(source), &dest, None)?;
      let file = File::create(&output).with_context(|| format!("writing {}", output.display()))?;
      session.write(BufWriter::new(file))?;
    }

    cli::Command::BootInfo { input } => {
      let session = open_image(&input)?;
      println!("volume_id: {}", session.options().volume_id);
      println!("joliet: {}", session.options().features.joliet);
      println!("rock_ridge: {}", session.options().features.rock_ridge);
    }
  }

  Ok(())
}
