/*
 * Description: Partition archive entries across workers under competing
 * balance objectives.
 *
 * Copyright (C) 2024 Danny McClanahan <dmcC2@hypnicjerk.ai>
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (see LICENSE).
 */

//! Partition archive entries across workers under competing balance
//! objectives.

use crate::{archive::EntryMeta, RelativePath};

use displaydoc::Display;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use thiserror::Error;

use std::collections::{BTreeMap, HashSet};

/// The strategy used when a request does not name one.
pub const DEFAULT_STRATEGY: &str = "cyclic";

/// Estimated fixed cost of creating one file, in size-units, for the
/// `runtime` strategy. The per-byte weight is 1.
/* TODO: calibrate per platform; these constants were tuned on linux ext4. */
const RUNTIME_COST_PER_FILE: u64 = 5_000_000;

/// All types of errors from looking up a strategy or validating its output.
#[derive(Debug, Display, Error)]
pub enum PlanError {
  /// strategy {0:?} is not registered
  UnknownStrategy(String),
  /// a plan for zero workers was requested
  NoWorkers,
  /// strategy produced {actual} lists for {expected} workers
  WrongWidth { expected: usize, actual: usize },
  /// entry index {0} was assigned to more than one worker
  DuplicateIndex(u64),
  /// entry index {0} does not name an input entry
  ForeignIndex(u64),
  /// strategy assigned {actual} of {expected} entries
  CountMismatch { expected: usize, actual: usize },
}

/// The partition of file-entry indices across workers: one index list per
/// worker, pairwise disjoint, jointly covering every input entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkPlan {
  lists: Vec<Vec<u64>>,
}

impl WorkPlan {
  pub fn width(&self) -> usize { self.lists.len() }

  pub fn lists(&self) -> &[Vec<u64>] { &self.lists }

  pub fn into_lists(self) -> Vec<Vec<u64>> { self.lists }
}

type PartitionFn = fn(usize, &[EntryMeta]) -> Vec<Vec<u64>>;

/// Process-wide name → partition function table, populated once. The
/// coordinator only ever reaches strategies through [`plan`], which wraps
/// every raw function with [`validate`].
static REGISTRY: Lazy<BTreeMap<&'static str, PartitionFn>> = Lazy::new(|| {
  BTreeMap::from([
    ("cyclic", partition_cyclic as PartitionFn),
    ("sliced", partition_sliced as PartitionFn),
    ("bytes", partition_bytes as PartitionFn),
    ("runtime", partition_runtime as PartitionFn),
    ("folder_bytes", partition_folder_bytes as PartitionFn),
    ("folder_files", partition_folder_files as PartitionFn),
  ])
});

/// Names of every registered strategy, for help text and CLI validation.
pub fn strategy_names() -> impl Iterator<Item=&'static str> { REGISTRY.keys().copied() }

/// Look up `strategy` and partition `entries` across `workers` index lists.
///
/// `entries` is expected to hold only non-folder entries; the caller
/// classifies. Whatever the strategy returns is checked against the
/// [`WorkPlan`] invariants before anything downstream can act on it.
pub fn plan(strategy: &str, workers: usize, entries: &[EntryMeta]) -> Result<WorkPlan, PlanError> {
  if workers == 0 {
    return Err(PlanError::NoWorkers);
  }
  let partition = REGISTRY
    .get(strategy)
    .ok_or_else(|| PlanError::UnknownStrategy(strategy.to_string()))?;
  let lists = partition(workers, entries);
  validate(workers, entries, &lists)?;
  Ok(WorkPlan { lists })
}

fn validate(workers: usize, entries: &[EntryMeta], lists: &[Vec<u64>]) -> Result<(), PlanError> {
  if lists.len() != workers {
    return Err(PlanError::WrongWidth { expected: workers, actual: lists.len() });
  }
  let known: HashSet<u64> = entries.iter().map(|meta| meta.index).collect();
  let mut seen: HashSet<u64> = HashSet::with_capacity(entries.len());
  let mut assigned: usize = 0;
  for index in lists.iter().flatten().copied() {
    if !known.contains(&index) {
      return Err(PlanError::ForeignIndex(index));
    }
    if !seen.insert(index) {
      return Err(PlanError::DuplicateIndex(index));
    }
    assigned += 1;
  }
  if assigned != entries.len() {
    return Err(PlanError::CountMismatch { expected: entries.len(), actual: assigned });
  }
  Ok(())
}

/// Walk the entries in archive order, dealing them out like cards: entry `i`
/// goes to worker `i mod workers`.
fn partition_cyclic(workers: usize, entries: &[EntryMeta]) -> Vec<Vec<u64>> {
  let mut lists: Vec<Vec<u64>> = vec![Vec::new(); workers];
  for (position, meta) in entries.iter().enumerate() {
    lists[position % workers].push(meta.index);
  }
  lists
}

/// Sort by name, then hand each worker one contiguous slice of the sorted
/// order. Sorting first keeps the files of a folder adjacent, which makes it
/// unlikely (though not guaranteed) that a folder is split across workers.
/// The `n mod workers` residual entries at the tail are dealt out cyclically
/// by position, which can never land on an index a slice already claimed.
fn partition_sliced(workers: usize, entries: &[EntryMeta]) -> Vec<Vec<u64>> {
  let mut sorted: Vec<&EntryMeta> = entries.iter().collect();
  sorted.par_sort_by(|left, right| left.path.cmp(&right.path));
  let chunk = std::cmp::max(sorted.len() / workers, 1);
  let sliced_end = sorted.len() - sorted.len() % workers;
  let mut lists: Vec<Vec<u64>> = vec![Vec::new(); workers];
  for (position, meta) in sorted.iter().enumerate() {
    let target = if position < sliced_end { position / chunk } else { position % workers };
    lists[target].push(meta.index);
  }
  lists
}

/// Greedy assignment of the heaviest remaining item to the least-loaded
/// worker. Handing out the large items first leaves the small ones to even
/// out the totals. Ties go to the lowest worker index.
fn assign_greedy(workers: usize, items: impl Iterator<Item=(u64, u64)>) -> Vec<Vec<u64>> {
  let mut lists: Vec<Vec<u64>> = vec![Vec::new(); workers];
  let mut loads: Vec<u64> = vec![0; workers];
  for (index, weight) in items {
    let target = least_loaded(&loads);
    lists[target].push(index);
    loads[target] += weight;
  }
  lists
}

fn least_loaded(loads: &[u64]) -> usize {
  let mut target = 0;
  for (worker, load) in loads.iter().enumerate().skip(1) {
    if *load < loads[target] {
      target = worker;
    }
  }
  target
}

fn sorted_descending_by_size(entries: &[EntryMeta]) -> Vec<&EntryMeta> {
  let mut sorted: Vec<&EntryMeta> = entries.iter().collect();
  /* Secondary key keeps equal sizes in archive order, so plans are
   * reproducible run to run. */
  sorted.par_sort_by(|left, right| {
    right.size.cmp(&left.size).then_with(|| left.index.cmp(&right.index))
  });
  sorted
}

/// Balance the total uncompressed bytes each worker writes.
fn partition_bytes(workers: usize, entries: &[EntryMeta]) -> Vec<Vec<u64>> {
  let sorted = sorted_descending_by_size(entries);
  assign_greedy(workers, sorted.into_iter().map(|meta| (meta.index, meta.size)))
}

/// Balance an estimate of each worker's wall-clock runtime: one unit per
/// byte written plus a fixed cost per file created.
fn partition_runtime(workers: usize, entries: &[EntryMeta]) -> Vec<Vec<u64>> {
  let sorted = sorted_descending_by_size(entries);
  assign_greedy(
    workers,
    sorted.into_iter().map(|meta| (meta.index, meta.size + RUNTIME_COST_PER_FILE)),
  )
}

/// Group the entries by the folder they land in, then greedily assign whole
/// groups to the least-loaded worker so no folder is ever split. `weigh`
/// scores a group; groups are handed out heaviest first.
fn partition_folders<W>(workers: usize, entries: &[EntryMeta], weigh: W) -> Vec<Vec<u64>>
where W: Fn(&[&EntryMeta]) -> u64 {
  let mut groups: BTreeMap<RelativePath, Vec<&EntryMeta>> = BTreeMap::new();
  for meta in entries.iter() {
    groups.entry(meta.folder()).or_default().push(meta);
  }
  let mut weighed: Vec<(RelativePath, Vec<&EntryMeta>, u64)> =
    groups.into_iter().map(|(folder, members)| {
      let weight = weigh(&members);
      (folder, members, weight)
    }).collect();
  weighed.sort_by(|left, right| right.2.cmp(&left.2).then_with(|| left.0.cmp(&right.0)));

  let mut lists: Vec<Vec<u64>> = vec![Vec::new(); workers];
  let mut loads: Vec<u64> = vec![0; workers];
  for (_, members, weight) in weighed.into_iter() {
    let target = least_loaded(&loads);
    lists[target].extend(members.into_iter().map(|meta| meta.index));
    loads[target] += weight;
  }
  lists
}

/// Folder-cohesive variant of `bytes`: whole folders balanced by their byte
/// totals.
fn partition_folder_bytes(workers: usize, entries: &[EntryMeta]) -> Vec<Vec<u64>> {
  partition_folders(workers, entries, |members| members.iter().map(|meta| meta.size).sum())
}

/// Folder-cohesive balancing by file count.
fn partition_folder_files(workers: usize, entries: &[EntryMeta]) -> Vec<Vec<u64>> {
  partition_folders(workers, entries, |members| members.len() as u64)
}
