/*
 * Description: Command-line value types that mirror the library's extraction
 * knobs.
 *
 * Copyright (C) 2024 Danny McClanahan <dmcC2@hypnicjerk.ai>
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (see LICENSE).
 */

//! Command-line value types that mirror the library's extraction knobs.

use libhydra_unzip::destination::TimestampPolicy;

use clap::{
  builder::{TypedValueParser, ValueParserFactory},
  error::{ContextKind, ContextValue, ErrorKind},
};

/* NB: insert()ing these context kinds is the only way the default clap
 * formatter will print out any additional detail about a rejected -j or -t
 * value. It is ridiculously frustrating. */
fn bad_value(
  cmd: &clap::Command,
  arg: Option<&clap::Arg>,
  val: &str,
  reason: impl std::fmt::Display,
  hint: &str,
) -> clap::Error {
  let mut err = clap::Error::new(ErrorKind::ValueValidation).with_cmd(cmd);
  if let Some(arg) = arg {
    err.insert(
      ContextKind::InvalidArg,
      ContextValue::String(arg.to_string()),
    );
  }
  err.insert(
    ContextKind::InvalidValue,
    ContextValue::String(val.to_string()),
  );
  err.insert(
    ContextKind::Usage,
    ContextValue::StyledStr(format!("Error: {}.", reason).into()),
  );
  err.insert(
    ContextKind::Suggested,
    ContextValue::StyledStrs(vec![hint.to_string().into()]),
  );
  err
}

/// How many worker threads to run.
#[derive(Copy, Clone, Debug)]
pub enum JobCount {
  /// Exactly this many workers, busy or not.
  Exactly(usize),
  /// One worker per reported hardware thread.
  Max,
  /// Three quarters of the reported hardware threads, rounded, never fewer
  /// than one.
  Auto,
}

impl JobCount {
  pub fn resolve(self) -> usize {
    match self {
      Self::Exactly(count) => count,
      Self::Max => num_cpus::get(),
      Self::Auto => (((num_cpus::get() as f64) * 0.75).round() as usize).max(1),
    }
  }
}

#[derive(Clone)]
pub struct JobCountParser;

impl TypedValueParser for JobCountParser {
  type Value = JobCount;

  fn parse_ref(
    &self,
    cmd: &clap::Command,
    arg: Option<&clap::Arg>,
    value: &std::ffi::OsStr,
  ) -> Result<Self::Value, clap::Error> {
    let inner = clap::builder::StringValueParser::new();
    let val = inner.parse_ref(cmd, arg, value)?;

    match val.as_str() {
      "max" => Ok(JobCount::Max),
      "auto" => Ok(JobCount::Auto),
      _ => match val.parse::<usize>() {
        Ok(count) if count >= 1 => Ok(JobCount::Exactly(count)),
        parsed => {
          let reason = match parsed {
            Ok(_) => "at least one worker is required".to_string(),
            Err(e) => e.to_string(),
          };
          Err(bad_value(
            cmd,
            arg,
            &val,
            reason,
            "Provide a positive integer, or 'max' (one worker per hardware thread), or 'auto' (three quarters of the hardware threads).",
          ))
        },
      },
    }
  }
}

impl ValueParserFactory for JobCount {
  type Parser = JobCountParser;

  fn value_parser() -> Self::Parser { JobCountParser }
}

/// What timestamps extracted files receive.
#[derive(Copy, Clone, Debug)]
pub enum TimestampArg {
  /// Keep whatever the filesystem assigns at write time.
  Current,
  /// Stamp this epoch second on every file.
  Explicit(i64),
}

impl From<TimestampArg> for TimestampPolicy {
  fn from(x: TimestampArg) -> Self {
    match x {
      TimestampArg::Current => Self::Current,
      TimestampArg::Explicit(stamp) => Self::Explicit(stamp),
    }
  }
}

#[derive(Clone)]
pub struct TimestampArgParser;

impl TypedValueParser for TimestampArgParser {
  type Value = TimestampArg;

  fn parse_ref(
    &self,
    cmd: &clap::Command,
    arg: Option<&clap::Arg>,
    value: &std::ffi::OsStr,
  ) -> Result<Self::Value, clap::Error> {
    let inner = clap::builder::StringValueParser::new();
    let val = inner.parse_ref(cmd, arg, value)?;

    if val == "current" {
      return Ok(TimestampArg::Current);
    }
    match val.parse::<i64>() {
      Ok(stamp) if stamp > 0 => Ok(TimestampArg::Explicit(stamp)),
      parsed => {
        let reason = match parsed {
          Ok(_) => "the epoch second must be positive".to_string(),
          Err(e) => e.to_string(),
        };
        Err(bad_value(
          cmd,
          arg,
          &val,
          reason,
          "Provide 'current' to keep write-time stamps, or a positive epoch second to apply to every file.",
        ))
      },
    }
  }
}

impl ValueParserFactory for TimestampArg {
  type Parser = TimestampArgParser;

  fn value_parser() -> Self::Parser { TimestampArgParser }
}
