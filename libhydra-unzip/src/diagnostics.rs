/*
 * Description: Timing of pipeline stages and the post-run summary handed back
 * to callers.
 *
 * Copyright (C) 2024 Danny McClanahan <dmcC2@hypnicjerk.ai>
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (see LICENSE).
 */

//! Timing of pipeline stages and the post-run summary handed back to callers.

use crate::util::format_bytes;

use displaydoc::Display;
use thiserror::Error;

use std::{
  fmt,
  path::PathBuf,
  time::{Duration, Instant},
};

/// All types of errors from interrogating a stopwatch.
#[derive(Debug, Display, Error)]
pub enum StopwatchError {
  /// no event named {0:?} was ever started
  NeverStarted(String),
  /// event {0:?} has not finished
  StillRunning(String),
}

#[derive(Copy, Clone, Debug)]
struct Span {
  begin: Instant,
  end: Option<Instant>,
}

/// Named begin/end instants, remembered in insertion order.
#[derive(Clone, Debug, Default)]
pub struct Stopwatch {
  events: Vec<(String, Span)>,
}

impl Stopwatch {
  /// Begin (or restart) the named event. Restarting discards any prior end
  /// instant.
  pub fn start(&mut self, name: &str) {
    let span = Span { begin: Instant::now(), end: None };
    if let Some((_, existing)) = self.events.iter_mut().find(|(event, _)| event == name) {
      *existing = span;
    } else {
      self.events.push((name.to_string(), span));
    }
  }

  /// End the named event. Fails if it was never started.
  pub fn stop(&mut self, name: &str) -> Result<(), StopwatchError> {
    let now = Instant::now();
    let (_, span) = self
      .events
      .iter_mut()
      .find(|(event, _)| event == name)
      .ok_or_else(|| StopwatchError::NeverStarted(name.to_string()))?;
    span.end = Some(now);
    Ok(())
  }

  /// Run `body` between a start and stop of the named event.
  pub fn time<T>(&mut self, name: &str, body: impl FnOnce() -> T) -> T {
    self.start(name);
    let ret = body();
    self.stop(name).expect("the event was started just above");
    ret
  }

  pub fn duration(&self, name: &str) -> Result<Duration, StopwatchError> {
    let (_, span) = self
      .events
      .iter()
      .find(|(event, _)| event == name)
      .ok_or_else(|| StopwatchError::NeverStarted(name.to_string()))?;
    let end = span.end.ok_or_else(|| StopwatchError::StillRunning(name.to_string()))?;
    Ok(end.duration_since(span.begin))
  }

  pub fn milliseconds(&self, name: &str) -> Result<u128, StopwatchError> {
    Ok(self.duration(name)?.as_millis())
  }

  pub fn seconds(&self, name: &str) -> Result<f64, StopwatchError> {
    Ok(self.duration(name)?.as_secs_f64())
  }

  pub fn minutes(&self, name: &str) -> Result<f64, StopwatchError> {
    Ok(self.duration(name)?.as_secs_f64() / 60.0)
  }

  pub fn human(&self, name: &str) -> Result<String, StopwatchError> {
    Ok(human_duration(self.duration(name)?))
  }

  /// Every completed event as `(name, human duration)`, in insertion order.
  pub fn results(&self) -> Vec<(String, String)> {
    self
      .events
      .iter()
      .filter_map(|(event, span)| {
        span.end.map(|end| (event.clone(), human_duration(end.duration_since(span.begin))))
      })
      .collect()
  }
}

/// Scale the rendering to the magnitude: whole minutes, then seconds at
/// decreasing precision, then milliseconds.
pub fn human_duration(duration: Duration) -> String {
  let seconds = duration.as_secs_f64();
  if seconds >= 60.0 {
    format!("{}m{:02}s", duration.as_secs() / 60, duration.as_secs() % 60)
  } else if seconds >= 10.0 {
    format!("{:.1}s", seconds)
  } else if seconds >= 1.0 {
    format!("{:.3}s", seconds)
  } else {
    format!("{}ms", duration.as_millis())
  }
}

/// Statistics and diagnostic info collected during a parallel extraction,
/// for auditing and tuning rather than for control flow.
#[derive(Clone, Debug)]
pub struct ExtractSummary {
  /// The archive that was extracted.
  pub filename: PathBuf,
  /// How many workers ran.
  pub jobs: usize,
  /// Name of the distribution strategy that produced the work plan.
  pub strategy: String,
  /// Size of each worker's streaming buffer, in bytes.
  pub chunk_size: usize,
  /// Total files written, summed over the workers.
  pub files: u64,
  /// Folder entries materialized as directories.
  pub folders: u64,
  /// Total uncompressed bytes written.
  pub bytes: u64,
  /// How many entries were staged under a temporary name first.
  pub tmp_renames: u64,
  /// Uncompressed size of the largest entry in the archive.
  pub max_file_size: u64,
  /// Files written by each worker.
  pub files_per_worker: Vec<u64>,
  /// Bytes written by each worker.
  pub bytes_per_worker: Vec<u64>,
  /// Stage timings recorded by the coordinator.
  pub watch: Stopwatch,
  /// Each worker's own timings.
  pub worker_watches: Vec<Stopwatch>,
}

impl fmt::Display for ExtractSummary {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    writeln!(f, "{:<12}{}", "file:", self.filename.display())?;
    writeln!(f, "{:<12}{}", "jobs:", self.jobs)?;
    writeln!(f, "{:<12}{}", "strategy:", self.strategy)?;
    writeln!(f, "{:<12}{}", "chunk:", format_bytes(self.chunk_size as u64))?;
    writeln!(f, "{:<12}{}", "files:", self.files)?;
    writeln!(f, "{:<12}{}", "folders:", self.folders)?;
    writeln!(f, "{:<12}{}", "tmp names:", self.tmp_renames)?;
    writeln!(f, "{:<12}{}", "max file:", format_bytes(self.max_file_size))?;
    for (worker, watch) in self.worker_watches.iter().enumerate() {
      let elapsed = watch.human("unzip").unwrap_or_else(|_| "--".to_string());
      writeln!(
        f,
        "{:<12}{} files, {} (unzip {})",
        format!("job {}:", worker),
        self.files_per_worker.get(worker).copied().unwrap_or(0),
        format_bytes(self.bytes_per_worker.get(worker).copied().unwrap_or(0)),
        elapsed
      )?;
    }
    writeln!(f, "{:<12}{} files, {}", "written:", self.files, format_bytes(self.bytes))?;
    /* Coordinator stage times, with `total` always the last line. */
    for (event, elapsed) in self.watch.results() {
      if event != "total" {
        writeln!(f, "{:<12}{}", format!("{}:", event), elapsed)?;
      }
    }
    if let Ok(elapsed) = self.watch.human("total") {
      writeln!(f, "{:<12}{}", "total:", elapsed)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  use std::thread;

  #[test]
  fn stop_requires_a_start() {
    let mut watch = Stopwatch::default();
    assert!(matches!(watch.stop("load_zip"), Err(StopwatchError::NeverStarted(_))));
    watch.start("load_zip");
    assert!(watch.stop("load_zip").is_ok());
  }

  #[test]
  fn durations_require_completion() {
    let mut watch = Stopwatch::default();
    assert!(matches!(watch.duration("unzip"), Err(StopwatchError::NeverStarted(_))));
    watch.start("unzip");
    assert!(matches!(watch.duration("unzip"), Err(StopwatchError::StillRunning(_))));
    watch.stop("unzip").unwrap();
    let elapsed = watch.duration("unzip").unwrap();
    assert!(elapsed >= Duration::ZERO);
    assert!(watch.milliseconds("unzip").is_ok());
    assert!(watch.seconds("unzip").unwrap() >= 0.0);
    assert!(watch.minutes("unzip").unwrap() >= 0.0);
  }

  #[test]
  fn restarting_discards_the_prior_end() {
    let mut watch = Stopwatch::default();
    watch.start("work");
    thread::sleep(Duration::from_millis(15));
    watch.stop("work").unwrap();
    let first = watch.duration("work").unwrap();
    assert!(first >= Duration::from_millis(10));

    watch.start("work");
    assert!(matches!(watch.duration("work"), Err(StopwatchError::StillRunning(_))));
    watch.stop("work").unwrap();
    /* Only one event with that name survives. */
    assert_eq!(watch.results().len(), 1);
  }

  #[test]
  fn results_preserve_insertion_order() {
    let mut watch = Stopwatch::default();
    for name in ["load_zip", "folders", "distribute"] {
      watch.start(name);
      watch.stop(name).unwrap();
    }
    watch.start("dangling");
    let names: Vec<String> = watch.results().into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["load_zip", "folders", "distribute"]);
  }

  #[test]
  fn time_brackets_the_body() {
    let mut watch = Stopwatch::default();
    let answer = watch.time("compute", || 42);
    assert_eq!(answer, 42);
    assert!(watch.duration("compute").is_ok());
  }

  #[test]
  fn human_duration_tiers() {
    assert_eq!(human_duration(Duration::from_millis(3)), "3ms");
    assert_eq!(human_duration(Duration::from_millis(1234)), "1.234s");
    assert_eq!(human_duration(Duration::from_millis(12_340)), "12.3s");
    assert_eq!(human_duration(Duration::from_secs(63)), "1m03s");
    assert_eq!(human_duration(Duration::from_secs(120)), "2m00s");
  }

  #[test]
  fn summary_renders_every_label() {
    let mut watch = Stopwatch::default();
    for name in ["load_zip", "folders", "distribute", "unzip", "total"] {
      watch.start(name);
      watch.stop(name).unwrap();
    }
    let summary = ExtractSummary {
      filename: PathBuf::from("archive.zip"),
      jobs: 2,
      strategy: "cyclic".to_string(),
      chunk_size: 4096,
      files: 4,
      folders: 1,
      bytes: 2048,
      tmp_renames: 1,
      max_file_size: 1024,
      files_per_worker: vec![2, 2],
      bytes_per_worker: vec![1024, 1024],
      watch,
      worker_watches: vec![Stopwatch::default(), Stopwatch::default()],
    };
    let rendered = summary.to_string();
    for label in
      ["file:", "jobs:", "strategy:", "chunk:", "files:", "folders:", "tmp names:", "max file:",
       "job 0:", "job 1:", "written:", "load_zip:", "distribute:", "unzip:", "total:"]
    {
      assert!(rendered.contains(label), "missing {:?} in:\n{}", label, rendered);
    }
    /* `total` is always the last line. */
    assert!(rendered.trim_end().lines().last().unwrap().starts_with("total:"));
  }
}
