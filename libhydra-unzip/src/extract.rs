/*
 * Description: The staged parallel extraction pipeline: load, plan,
 * pre-materialize, dispatch, join, audit.
 *
 * Copyright (C) 2024 Danny McClanahan <dmcC2@hypnicjerk.ai>
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (see LICENSE).
 */

//! The staged parallel extraction pipeline.

use crate::{
  archive::{Archive, ArchiveError, EntryMeta, SharedBuffer},
  destination::{self, DestinationError, DirTree, NameRemapper, TimestampPolicy},
  diagnostics::{ExtractSummary, Stopwatch, StopwatchError},
  distribute::{self, PlanError, DEFAULT_STRATEGY},
};

use displaydoc::Display;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error};

use std::{io, path::PathBuf, thread};

/// Streaming buffer size used when a request does not name one.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// All types of errors from the parallel extraction process.
#[derive(Debug, Display, Error)]
pub enum ExtractError {
  /// archive error: {0}
  Archive(#[from] ArchiveError),
  /// destination error: {0}
  Destination(#[from] DestinationError),
  /// work plan error: {0}
  Plan(#[from] PlanError),
  /// stopwatch error: {0}
  Stopwatch(#[from] StopwatchError),
  /// i/o error: {0}
  Io(#[from] io::Error),
  /// chunk size {0} is invalid; workers stream through at least one byte
  InvalidChunkSize(usize),
  /// at least one worker is required
  NoJobs,
  /// worker {worker} failed: {source}
  Worker {
    worker: usize,
    #[source]
    source: Box<ExtractError>,
  },
  /// worker {0} panicked
  WorkerPanic(usize),
  /// workers wrote {actual} files but the archive holds {expected}
  FileTotalMismatch { expected: u64, actual: u64 },
  /// workers wrote {actual} bytes but the archive declares {expected}
  ByteTotalMismatch { expected: u64, actual: u64 },
}

/// Everything the pipeline needs to know to extract one archive.
#[derive(Clone, Debug)]
pub struct ExtractRequest {
  /// Path of the zip file to extract.
  pub filename: PathBuf,
  /// Suppress the per-file progress lines.
  pub quiet: bool,
  /// Exactly this many workers are spawned, busy or not.
  pub jobs: usize,
  /// Registered name of the distribution strategy.
  pub strategy: String,
  /// Per-worker streaming buffer size in bytes; also the largest single
  /// write. Total buffer memory is `jobs * chunk_size`.
  pub chunk_size: usize,
  pub timestamps: TimestampPolicy,
  pub remapper: NameRemapper,
  /// Directory every extracted path is rooted under; `None` extracts
  /// relative to the working directory.
  pub output_prefix: Option<PathBuf>,
}

/// Run a full parallel extraction with library defaults: quiet, the default
/// strategy and chunk size, archive timestamps applied verbatim.
pub fn extract_basic(filename: PathBuf, jobs: usize) -> Result<ExtractSummary, ExtractError> {
  extract(ExtractRequest {
    filename,
    quiet: true,
    jobs,
    strategy: DEFAULT_STRATEGY.to_string(),
    chunk_size: DEFAULT_CHUNK_SIZE,
    timestamps: TimestampPolicy::Archive,
    remapper: NameRemapper::Identity,
    output_prefix: None,
  })
}

/// Extract `request.filename` onto the local filesystem.
///
/// The stages run strictly one way: the archive image is loaded and statted,
/// every directory it mentions is materialized from this thread, the chosen
/// strategy partitions the file entries, and only then are workers spawned
/// over clones of the shared image. After every worker has been joined the
/// per-worker counters must add back up to the archive's own totals.
///
/// Nothing is rolled back on failure: the caller decides what to do with a
/// partially extracted tree.
pub fn extract(request: ExtractRequest) -> Result<ExtractSummary, ExtractError> {
  let ExtractRequest {
    filename,
    quiet,
    jobs,
    strategy,
    chunk_size,
    timestamps,
    remapper,
    output_prefix,
  } = request;

  let mut watch = Stopwatch::default();
  watch.start("total");

  watch.start("load_zip");
  let buffer = SharedBuffer::load(&filename)?;
  let archive = Archive::open(buffer.clone())?;
  let (folder_entries, file_entries): (Vec<EntryMeta>, Vec<EntryMeta>) =
    archive.entries().iter().cloned().partition(|meta| meta.is_folder);
  watch.stop("load_zip")?;

  /* The archive is loaded and statted before the request itself is judged,
   * so an unreadable zip always reports ahead of a bad argument. */
  if jobs < 1 {
    return Err(ExtractError::NoJobs);
  }
  if chunk_size < 1 {
    return Err(ExtractError::InvalidChunkSize(chunk_size));
  }

  let max_file_size = file_entries.iter().map(|meta| meta.size).max().unwrap_or(0);
  let expected_bytes: u64 = file_entries.iter().map(|meta| meta.size).sum();

  /* Materializing the whole directory tree up front (from this thread)
   * leaves nothing for the workers to race on but their own files. */
  let root = output_prefix.unwrap_or_default();
  let mut tree = DirTree::new(root.clone());
  watch.time("folders", || {
    tree.ensure_root()?;
    tree.ensure_all(archive.entries().iter().map(|meta| meta.folder()))
  })?;

  let work_plan = watch.time("distribute", || distribute::plan(&strategy, jobs, &file_entries))?;
  debug!(
    %strategy,
    jobs,
    files = file_entries.len(),
    folders = folder_entries.len(),
    "work plan ready"
  );

  watch.start("unzip");
  let mut handles: Vec<thread::JoinHandle<WorkerOutput>> = Vec::with_capacity(jobs);
  for (worker, indices) in work_plan.into_lists().into_iter().enumerate() {
    let context = WorkerContext {
      worker,
      buffer: buffer.clone(),
      indices,
      chunk_size,
      quiet,
      timestamps,
      remapper,
      root: root.clone(),
    };
    let handle =
      thread::Builder::new().name(format!("unzip-{}", worker)).spawn(move || run_worker(context))?;
    handles.push(handle);
  }
  /* Join every worker before reporting anything; a failure in one does not
   * interrupt the others. */
  let mut outputs: Vec<WorkerOutput> = Vec::with_capacity(jobs);
  let mut panicked: Option<usize> = None;
  for (worker, handle) in handles.into_iter().enumerate() {
    if let Ok(output) = handle.join() {
      outputs.push(output);
    } else {
      panicked.get_or_insert(worker);
    }
  }
  watch.stop("unzip")?;
  watch.stop("total")?;
  if let Some(worker) = panicked {
    return Err(ExtractError::WorkerPanic(worker));
  }

  let mut files: u64 = 0;
  let mut bytes: u64 = 0;
  let mut tmp_renames: u64 = 0;
  let mut files_per_worker: Vec<u64> = Vec::with_capacity(jobs);
  let mut bytes_per_worker: Vec<u64> = Vec::with_capacity(jobs);
  let mut worker_watches: Vec<Stopwatch> = Vec::with_capacity(jobs);
  let mut first_failure: Option<(usize, ExtractError)> = None;
  for (worker, output) in outputs.into_iter().enumerate() {
    if let Err(failure) = output.result {
      first_failure.get_or_insert((worker, failure));
    }
    files += output.files;
    bytes += output.bytes;
    tmp_renames += output.tmp_renames;
    files_per_worker.push(output.files);
    bytes_per_worker.push(output.bytes);
    worker_watches.push(output.watch);
  }
  if let Some((worker, source)) = first_failure {
    return Err(ExtractError::Worker { worker, source: Box::new(source) });
  }

  /* The workers' own bookkeeping is the source of truth here: it must add
   * back up to what the archive says it holds. */
  if files != file_entries.len() as u64 {
    return Err(ExtractError::FileTotalMismatch { expected: file_entries.len() as u64, actual: files });
  }
  if bytes != expected_bytes {
    return Err(ExtractError::ByteTotalMismatch { expected: expected_bytes, actual: bytes });
  }

  Ok(ExtractSummary {
    filename,
    jobs,
    strategy,
    chunk_size,
    files,
    folders: folder_entries.len() as u64,
    bytes,
    tmp_renames,
    max_file_size,
    files_per_worker,
    bytes_per_worker,
    watch,
    worker_watches,
  })
}

/// The per-file progress lines share one process-wide lock so lines from
/// different workers never interleave.
static PROGRESS_LINES: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct WorkerContext {
  worker: usize,
  buffer: SharedBuffer,
  indices: Vec<u64>,
  chunk_size: usize,
  quiet: bool,
  timestamps: TimestampPolicy,
  remapper: NameRemapper,
  root: PathBuf,
}

/// Written only by the owning worker; read by the coordinator after join.
struct WorkerOutput {
  files: u64,
  bytes: u64,
  tmp_renames: u64,
  watch: Stopwatch,
  result: Result<(), ExtractError>,
}

fn run_worker(context: WorkerContext) -> WorkerOutput {
  let mut output = WorkerOutput {
    files: 0,
    bytes: 0,
    tmp_renames: 0,
    watch: Stopwatch::default(),
    result: Ok(()),
  };
  output.watch.start("unzip");
  output.result = extract_assigned(&context, &mut output);
  if let Err(failure) = &output.result {
    error!(worker = context.worker, "extraction failed: {}", failure);
  }
  /* Success or failure, the clock stops. */
  output.watch.stop("unzip").expect("the event was started above");
  output
}

fn extract_assigned(context: &WorkerContext, output: &mut WorkerOutput) -> Result<(), ExtractError> {
  /* A fresh view per worker: the zip library is not trusted to share one
   * handle across threads, and opening another view only bumps the refcount
   * on the shared image. */
  let mut archive = Archive::open(context.buffer.clone())?;
  let mut scratch = vec![0_u8; context.chunk_size];
  for &index in context.indices.iter() {
    /* The coordinator only hands out file entries, never folders. */
    let meta = archive.entry(index)?.clone();
    if !context.quiet {
      let _held = PROGRESS_LINES.lock();
      eprintln!("{}> {}", context.worker, meta.name);
    }
    let staged = context.remapper.remap(&meta.path);
    if staged != meta.path {
      output.tmp_renames += 1;
    }
    let staged_disk = staged.resolve_under(&context.root);
    archive.extract_to_file(index, &staged_disk, &mut scratch)?;
    let final_disk = meta.path.resolve_under(&context.root);
    destination::replace_rename(&staged_disk, &final_disk)?;
    let stamp = context.timestamps.transform(meta.mtime);
    if stamp != 0 {
      destination::apply_mtime(&final_disk, stamp)?;
    }
    output.files += 1;
    output.bytes += meta.size;
  }
  Ok(())
}

#[cfg(test)]
mod test {
  use super::*;

  use std::{
    fs,
    io::{Cursor, Write},
    path::Path,
  };

  use zip::write::{FileOptions, ZipWriter};

  fn fixture_archive(dir: &Path) -> PathBuf {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("fixture.txt", FileOptions::default()).unwrap();
    zip.write_all(b"fixture").unwrap();
    let bytes = zip.finish().unwrap().into_inner();
    let path = dir.join("fixture.zip");
    fs::write(&path, bytes).unwrap();
    path
  }

  #[test]
  fn chunk_size_zero_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let request = ExtractRequest {
      filename: fixture_archive(tmp.path()),
      quiet: true,
      jobs: 1,
      strategy: DEFAULT_STRATEGY.to_string(),
      chunk_size: 0,
      timestamps: TimestampPolicy::Archive,
      remapper: NameRemapper::Identity,
      output_prefix: Some(tmp.path().join("out")),
    };
    assert!(matches!(extract(request), Err(ExtractError::InvalidChunkSize(0))));
    /* Rejected before the folders stage, so nothing was written. */
    assert!(!tmp.path().join("out").exists());
  }

  #[test]
  fn zero_jobs_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = fixture_archive(tmp.path());
    assert!(matches!(extract_basic(archive, 0), Err(ExtractError::NoJobs)));
  }

  #[test]
  fn a_missing_archive_is_an_archive_error() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("nope.zip");
    assert!(matches!(extract_basic(missing, 1), Err(ExtractError::Archive(_))));
  }

  #[test]
  fn loading_is_judged_before_the_request_arguments() {
    let tmp = tempfile::tempdir().unwrap();
    let request = ExtractRequest {
      filename: tmp.path().join("nope.zip"),
      quiet: true,
      jobs: 0,
      strategy: DEFAULT_STRATEGY.to_string(),
      chunk_size: 0,
      timestamps: TimestampPolicy::Archive,
      remapper: NameRemapper::Identity,
      output_prefix: None,
    };
    /* An unreadable archive wins over the bad chunk size and job count. */
    assert!(matches!(extract(request), Err(ExtractError::Archive(_))));
  }
}
