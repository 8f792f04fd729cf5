/*
 * Description: Read-only view over an in-memory zip image: entry metadata and
 * chunked streaming extraction.
 *
 * Copyright (C) 2024 Danny McClanahan <dmcC2@hypnicjerk.ai>
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (see LICENSE).
 */

//! Read-only view over an in-memory zip image.

use crate::{PathError, RelativePath};

use displaydoc::Display;
use thiserror::Error;
use time::error::ComponentRange;
use zip::{read::ZipArchive, result::ZipError};

use std::{
  fs,
  io::{self, Cursor, Read, Write},
  path::Path,
  sync::Arc,
};

/// All types of errors from opening or streaming a zip archive.
#[derive(Debug, Display, Error)]
pub enum ArchiveError {
  /// internal zip impl error: {0}
  Zip(#[from] ZipError),
  /// i/o error: {0}
  Io(#[from] io::Error),
  /// entry name {0:?} cannot be written through to disk: {1}
  EntryName(String, #[source] PathError),
  /// entry {0} has an empty name
  EmptyEntryName(u64),
  /// entry {0} stores a timestamp outside the representable range: {1}
  EntryTime(u64, #[source] ComponentRange),
  /// entry index {0} is out of range
  UnknownIndex(u64),
  /// entry {index} produced {actual} bytes but declares {expected}
  WrongSize { index: u64, expected: u64, actual: u64 },
}

/// One owner of the raw zip bytes, many read-only viewers.
///
/// Every [`Archive`] holds a clone, so the byte region outlives the last view
/// taken over it no matter which thread drops last.
#[derive(Clone)]
pub struct SharedBuffer {
  bytes: Arc<Vec<u8>>,
}

impl SharedBuffer {
  /// Read the entire file at `path` into memory.
  pub fn load(path: &Path) -> Result<Self, ArchiveError> {
    Ok(Self { bytes: Arc::new(fs::read(path)?) })
  }

  pub fn from_bytes(bytes: Vec<u8>) -> Self { Self { bytes: Arc::new(bytes) } }

  pub fn len(&self) -> usize { self.bytes.len() }
}

impl AsRef<[u8]> for SharedBuffer {
  fn as_ref(&self) -> &[u8] { &self.bytes }
}

/// Immutable per-entry facts cached when the archive is opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryMeta {
  /// Zero-based position within the archive's central directory.
  pub index: u64,
  /// The stored name; folder entries end with `/`.
  pub name: String,
  /// [`Self::name`] parsed into a writable relative path.
  pub path: RelativePath,
  /// Uncompressed size in bytes.
  pub size: u64,
  /// Compressed size in bytes.
  pub compressed_size: u64,
  /// Seconds since the epoch, at the zip format's 2-second resolution and
  /// with no timezone attached.
  pub mtime: i64,
  pub is_folder: bool,
}

impl EntryMeta {
  /// The directory this entry materializes: its parent for files, itself for
  /// folders.
  pub fn folder(&self) -> RelativePath {
    if self.is_folder {
      self.path.clone()
    } else {
      /* Entries with empty names are rejected at open time, so a parent
       * always exists (possibly the extraction root). */
      self.path.dirname().unwrap_or_else(|_| RelativePath::empty())
    }
  }
}

/// A handle over one [`SharedBuffer`], exclusive to the thread that opened it.
///
/// The underlying zip library is not assumed to be thread-safe for a single
/// handle, so concurrent readers each open their own `Archive` over a clone
/// of the same buffer.
pub struct Archive {
  zip: ZipArchive<Cursor<SharedBuffer>>,
  entries: Vec<EntryMeta>,
}

impl Archive {
  /// Parse the central directory and stat every entry up front.
  pub fn open(buffer: SharedBuffer) -> Result<Self, ArchiveError> {
    let mut zip = ZipArchive::new(Cursor::new(buffer))?;
    let mut entries: Vec<EntryMeta> = Vec::with_capacity(zip.len());
    for index in 0..zip.len() {
      let entry = zip.by_index_raw(index)?;
      let name = entry.name().to_string();
      let path = RelativePath::parse(&name)
        .map_err(|source| ArchiveError::EntryName(name.clone(), source))?;
      if path.is_empty() {
        return Err(ArchiveError::EmptyEntryName(index as u64));
      }
      let mtime = entry
        .last_modified()
        .to_time()
        .map_err(|source| ArchiveError::EntryTime(index as u64, source))?
        .unix_timestamp();
      entries.push(EntryMeta {
        index: index as u64,
        is_folder: name.ends_with('/'),
        name,
        path,
        size: entry.size(),
        compressed_size: entry.compressed_size(),
        mtime,
      });
    }
    Ok(Self { zip, entries })
  }

  /// All entries, in archive order.
  pub fn entries(&self) -> &[EntryMeta] { &self.entries }

  pub fn entry(&self, index: u64) -> Result<&EntryMeta, ArchiveError> {
    self.entries.get(index as usize).ok_or(ArchiveError::UnknownIndex(index))
  }

  /// Stream the decompressed contents of entry `index` into a new file at
  /// `dest`, `scratch.len()` bytes at a time, truncating anything already
  /// there. Fails unless exactly the declared uncompressed size comes out of
  /// the stream.
  pub fn extract_to_file(
    &mut self,
    index: u64,
    dest: &Path,
    scratch: &mut [u8],
  ) -> Result<u64, ArchiveError> {
    let expected = self.entry(index)?.size;
    let mut stream = self.zip.by_index(index as usize)?;
    let mut out = fs::File::create(dest)?;
    let mut actual: u64 = 0;
    loop {
      let count = stream.read(scratch)?;
      if count == 0 {
        break;
      }
      out.write_all(&scratch[..count])?;
      actual += count as u64;
    }
    if actual != expected {
      return Err(ArchiveError::WrongSize { index, expected, actual });
    }
    Ok(actual)
  }
}
