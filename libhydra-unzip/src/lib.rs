/*
 * Description: Extract zip files onto the local filesystem with OS-thread
 * parallelism.
 *
 * Copyright (C) 2024 Danny McClanahan <dmcC2@hypnicjerk.ai>
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (see LICENSE).
 */

//! Extract zip files onto the local filesystem with OS-thread parallelism.

/* These clippy lint descriptions are purely non-functional and do not affect the functionality
 * or correctness of the code. */
// #![warn(missing_docs)]

/* Note: run clippy with: rustup run nightly cargo-clippy! */
#![deny(unsafe_code)]
/* Ensure any doctest warnings fails the doctest! */
#![doc(test(attr(deny(warnings))))]
/* Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be
 * copied and pasted across crates, but there doesn't appear to be a way to include inner
 * attributes from a common source. */
#![deny(
  clippy::all,
  clippy::default_trait_access,
  clippy::expl_impl_clone_on_copy,
  clippy::if_not_else,
  clippy::needless_continue,
  clippy::single_match_else,
  clippy::unseparated_literal_suffix,
  clippy::used_underscore_binding
)]
/* It is often more clear to show that nothing is being moved. */
#![allow(clippy::match_ref_pats)]
/* Subjective style. */
#![allow(
  clippy::derived_hash_with_manual_eq,
  clippy::len_without_is_empty,
  clippy::redundant_field_names,
  clippy::too_many_arguments,
  clippy::single_component_path_imports,
  clippy::double_must_use
)]
/* Default isn't as big a deal as people seem to think it is. */
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
/* Arc<Mutex> can be more clear than needing to grok Orderings. */
#![allow(clippy::mutex_atomic)]

use displaydoc::Display;
use thiserror::Error;

use std::{
  fmt,
  path::{Path, PathBuf},
};

/// Paths we refuse to write through to the local filesystem.
#[derive(Debug, Display, Error)]
pub enum PathError {
  /// rooted path {0} is not supported
  Rooted(String),
  /// drive-qualified path {0} is not supported
  DriveQualified(String),
  /// backslashes in path are not supported: {0}
  Backslash(String),
  /// the empty path has no parent
  NoParent,
  /// the empty path has no basename
  NoBasename,
}

/// A relative path within the archive, held as its non-empty `/`-separated
/// components.
///
/// The empty sequence stands for the extraction root itself. Backslashes,
/// drive letters, and rooted names never construct successfully, so every
/// value of this type can be joined under an output prefix without escaping
/// it.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelativePath {
  components: Vec<String>,
}

impl fmt::Display for RelativePath {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{}", self.components.join("/")) }
}

impl RelativePath {
  pub fn empty() -> Self { Self { components: Vec::new() } }

  /// Split `path` on `/`, discarding empty segments, so `a//b/` and `a/b`
  /// name the same location.
  pub fn parse(path: &str) -> Result<Self, PathError> {
    if path.starts_with('/') {
      return Err(PathError::Rooted(path.to_string()));
    }
    if path.contains(':') {
      return Err(PathError::DriveQualified(path.to_string()));
    }
    if path.contains('\\') {
      return Err(PathError::Backslash(path.to_string()));
    }
    let components: Vec<String> =
      path.split('/').filter(|c| !c.is_empty()).map(|c| c.to_string()).collect();
    Ok(Self { components })
  }

  pub fn is_empty(&self) -> bool { self.components.is_empty() }

  pub fn components(&self) -> impl Iterator<Item=&str> {
    self.components.iter().map(|c| c.as_str())
  }

  /// The parent path. A single remaining component parents to the empty path,
  /// not to `.`.
  pub fn dirname(&self) -> Result<Self, PathError> {
    if self.components.is_empty() {
      return Err(PathError::NoParent);
    }
    let mut parent = self.clone();
    parent.components.pop();
    Ok(parent)
  }

  pub fn basename(&self) -> Result<&str, PathError> {
    self.components.last().map(|c| c.as_str()).ok_or(PathError::NoBasename)
  }

  pub fn join(&self, suffix: &Self) -> Self {
    let mut components = self.components.clone();
    components.extend(suffix.components.iter().cloned());
    Self { components }
  }

  /// Append `ext` to the final component verbatim, minting that component
  /// from `ext` when the path is empty. No dot is inserted; callers that want
  /// one pass it themselves.
  pub fn add_ext(&self, ext: &str) -> Self {
    let mut with_ext = self.clone();
    if let Some(last) = with_ext.components.last_mut() {
      last.push_str(ext);
    } else {
      with_ext.components.push(ext.to_string());
    }
    with_ext
  }

  /// Split the final component at its last dot, keeping the dot on the left
  /// side. Yields nothing when there is no dot to split on or when the
  /// component is a dotfile name like `.profile`.
  pub fn split_ext(&self) -> Option<(Self, String)> {
    let last = self.components.last()?;
    if last.starts_with('.') {
      return None;
    }
    let dot = last.rfind('.')?;
    let ext = last[dot + 1..].to_string();
    let mut stem = self.clone();
    if let Some(last) = stem.components.last_mut() {
      last.truncate(dot + 1);
    }
    Some((stem, ext))
  }

  /// Rejoin the components beneath a native directory.
  pub fn resolve_under(&self, root: &Path) -> PathBuf {
    let mut resolved = root.to_path_buf();
    for component in self.components.iter() {
      resolved.push(component);
    }
    resolved
  }

}

pub mod archive;

pub mod destination;

pub mod distribute;

pub mod extract;

pub mod diagnostics;

pub mod util;

pub use extract::{extract, extract_basic, ExtractRequest, DEFAULT_CHUNK_SIZE};
