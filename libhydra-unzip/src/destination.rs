/*
 * Description: Where extracted entries land: directory pre-creation, temporary
 * naming, and finalization of renames and timestamps.
 *
 * Copyright (C) 2024 Danny McClanahan <dmcC2@hypnicjerk.ai>
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (see LICENSE).
 */

//! Where extracted entries land on the local filesystem.

use crate::{
  util::{encode_alpha36, fold_hash32},
  RelativePath,
};

use cfg_if::cfg_if;
use displaydoc::Display;
use filetime::FileTime;
use thiserror::Error;

use std::{
  collections::HashSet,
  fs, io,
  path::{Path, PathBuf},
};

/// All types of errors from preparing or finalizing destination paths.
#[derive(Debug, Display, Error)]
pub enum DestinationError {
  /// path {0} exists but is not a directory
  NotADirectory(PathBuf),
  /// i/o error: {0}
  Io(#[from] io::Error),
}

/// Idempotent recursive directory creation beneath one root, memoizing every
/// path already known to exist.
///
/// All of an archive's directories are materialized from the coordinating
/// thread before any worker writes a file, so workers never race on `mkdir`.
pub struct DirTree {
  root: PathBuf,
  known: HashSet<RelativePath>,
}

impl DirTree {
  pub fn new(root: PathBuf) -> Self { Self { root, known: HashSet::new() } }

  pub fn root(&self) -> &Path { &self.root }

  /// Create the root itself, including any missing native ancestors.
  pub fn ensure_root(&self) -> Result<(), DestinationError> {
    if !self.root.as_os_str().is_empty() {
      fs::create_dir_all(&self.root)?;
    }
    Ok(())
  }

  pub fn ensure_all<I>(&mut self, paths: I) -> Result<(), DestinationError>
  where I: IntoIterator<Item=RelativePath> {
    for path in paths {
      self.ensure(&path)?;
    }
    Ok(())
  }

  /// Create `path` and every ancestor under the root. The empty path is a
  /// no-op. A cached path is trusted without re-statting; an uncached one is
  /// statted, and anything present that is not a directory fails.
  pub fn ensure(&mut self, path: &RelativePath) -> Result<(), DestinationError> {
    if path.is_empty() || self.known.contains(path) {
      return Ok(());
    }
    let parent = path.dirname().unwrap_or_else(|_| RelativePath::empty());
    self.ensure(&parent)?;
    let on_disk = path.resolve_under(&self.root);
    match fs::metadata(&on_disk) {
      Ok(info) if info.is_dir() => {},
      Ok(_) => return Err(DestinationError::NotADirectory(on_disk)),
      Err(probe) if probe.kind() == io::ErrorKind::NotFound => fs::create_dir(&on_disk)?,
      Err(probe) => return Err(probe.into()),
    }
    self.known.insert(path.clone());
    Ok(())
  }
}

/// Pure mapping from an archive path to the on-disk path an entry is written
/// to before its final rename.
///
/// Callable from any number of threads at once; both variants are functions
/// of their input alone.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum NameRemapper {
  /// Entries are written directly at their archive names.
  #[default]
  Identity,
  /// Extensions longer than three characters are written through a
  /// three-character stand-in drawn from `a-z0-9`, then renamed back.
  ///
  /// The stand-in is derived from a 32-bit fold of the whole original path,
  /// not just the extension, so sibling files that share a stem cannot
  /// collide on their temporary names just by having extensions that hash
  /// alike.
  ShortExtensions,
}

impl NameRemapper {
  pub fn remap(&self, path: &RelativePath) -> RelativePath {
    match self {
      Self::Identity => path.clone(),
      Self::ShortExtensions => match path.split_ext() {
        Some((stem, ext)) if ext.chars().count() > 3 => {
          stem.add_ext(&encode_alpha36(fold_hash32(&path.to_string())))
        },
        /* Dotfile basenames and short extensions pass through untouched. */
        _ => path.clone(),
      },
    }
  }
}

/// What to stamp on an extracted file once its bytes are on disk.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TimestampPolicy {
  /// Apply the mtime stored in the archive verbatim.
  #[default]
  Archive,
  /// Apply this epoch second to every file.
  Explicit(i64),
  /// Leave whatever the filesystem assigned at write time.
  Current,
}

impl TimestampPolicy {
  /// The epoch second to apply, where `0` means "do not set". An archive
  /// member genuinely stamped at the epoch therefore keeps its write-time
  /// timestamp instead.
  pub fn transform(&self, stored: i64) -> i64 {
    match self {
      Self::Archive => stored,
      Self::Explicit(stamp) => *stamp,
      Self::Current => 0,
    }
  }
}

/// Rename `from` onto `to`, replacing anything already there. Renaming a path
/// onto itself succeeds without touching the filesystem.
pub fn replace_rename(from: &Path, to: &Path) -> io::Result<()> {
  if from == to {
    return Ok(());
  }
  cfg_if! {
    if #[cfg(windows)] {
      /* Windows rename refuses to clobber; clear the destination first. */
      match fs::remove_file(to) {
        Ok(()) => {},
        Err(stale) if stale.kind() == io::ErrorKind::NotFound => {},
        Err(stale) => return Err(stale),
      }
    }
  }
  fs::rename(from, to)
}

/// Set both the access and modification times of `path` to `stamp` epoch
/// seconds.
pub fn apply_mtime(path: &Path, stamp: i64) -> io::Result<()> {
  let stamp = FileTime::from_unix_time(stamp, 0);
  filetime::set_file_times(path, stamp, stamp)
}

#[cfg(test)]
mod test {
  use super::*;

  fn rel(path: &str) -> RelativePath { RelativePath::parse(path).unwrap() }

  #[test]
  fn ensure_creates_ancestors_once() {
    let tmp = tempfile::tempdir().unwrap();
    let mut tree = DirTree::new(tmp.path().to_path_buf());
    tree.ensure_all(vec![rel("a/b/c"), rel("a/b"), rel("x")]).unwrap();
    assert!(tmp.path().join("a/b/c").is_dir());
    assert!(tmp.path().join("x").is_dir());
    /* Running the same batch again must be a clean no-op. */
    tree.ensure_all(vec![rel("a/b/c"), rel("x")]).unwrap();
    let mut fresh = DirTree::new(tmp.path().to_path_buf());
    fresh.ensure_all(vec![rel("a/b/c"), rel("x")]).unwrap();
  }

  #[test]
  fn ensure_ignores_the_empty_path() {
    let tmp = tempfile::tempdir().unwrap();
    let mut tree = DirTree::new(tmp.path().to_path_buf());
    tree.ensure(&RelativePath::empty()).unwrap();
  }

  #[test]
  fn ensure_rejects_a_file_in_the_way() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("blocked"), b"file").unwrap();
    let mut tree = DirTree::new(tmp.path().to_path_buf());
    match tree.ensure(&rel("blocked")) {
      Err(DestinationError::NotADirectory(path)) => {
        assert_eq!(path, tmp.path().join("blocked"));
      },
      other => panic!("expected NotADirectory, got {:?}", other.map(|()| "ok")),
    }
  }

  #[test]
  fn short_extension_remapping_shape() {
    let remapper = NameRemapper::ShortExtensions;
    let remapped = remapper.remap(&rel("docs/report.longext"));
    let rendered = remapped.to_string();
    assert!(rendered.starts_with("docs/report."));
    let ext = rendered.rsplit('.').next().unwrap();
    assert_eq!(ext.chars().count(), 3);
    assert!(ext.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    /* Pure: same input, same output. */
    assert_eq!(remapped, remapper.remap(&rel("docs/report.longext")));
  }

  #[test]
  fn short_extension_remapping_leaves_short_and_hidden_names() {
    let remapper = NameRemapper::ShortExtensions;
    for name in ["a.txt", "noext", ".hidden.longext", "a/b.gz", ".foo"] {
      assert_eq!(remapper.remap(&rel(name)), rel(name), "{} must not remap", name);
    }
    assert_eq!(NameRemapper::Identity.remap(&rel("docs/report.longext")), rel("docs/report.longext"));
  }

  #[test]
  fn sibling_stems_get_distinct_stand_ins() {
    let remapper = NameRemapper::ShortExtensions;
    let first = remapper.remap(&rel("docs/report.longext"));
    let second = remapper.remap(&rel("docs/report.otherext"));
    assert_ne!(first, second);
  }

  #[test]
  fn timestamp_policies() {
    assert_eq!(TimestampPolicy::Archive.transform(1234567890), 1234567890);
    assert_eq!(TimestampPolicy::Explicit(1000000000).transform(1234567890), 1000000000);
    assert_eq!(TimestampPolicy::Current.transform(1234567890), 0);
  }

  #[test]
  fn rename_onto_self_is_a_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("same");
    fs::write(&path, b"contents").unwrap();
    replace_rename(&path, &path).unwrap();
    assert_eq!(fs::read(&path).unwrap(), b"contents");
  }

  #[test]
  fn rename_replaces_the_destination() {
    let tmp = tempfile::tempdir().unwrap();
    let from = tmp.path().join("from");
    let to = tmp.path().join("to");
    fs::write(&from, b"new").unwrap();
    fs::write(&to, b"old").unwrap();
    replace_rename(&from, &to).unwrap();
    assert_eq!(fs::read(&to).unwrap(), b"new");
    assert!(!from.exists());
  }

  #[test]
  fn mtime_is_applied_in_epoch_seconds() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("stamped");
    fs::write(&path, b"x").unwrap();
    apply_mtime(&path, 1000000000).unwrap();
    let stamped = FileTime::from_last_modification_time(&fs::metadata(&path).unwrap());
    assert_eq!(stamped.unix_seconds(), 1000000000);
  }
}
