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
#![warn(missing_docs)]
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
  clippy::single_component_path_imports
)]
/* Default isn't as big a deal as people seem to think it is. */
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
/* Arc<Mutex> can be more clear than needing to grok Orderings. */
#![allow(clippy::mutex_atomic)]

mod options;

mod cli {
  mod args {
    use crate::options::{JobCount, TimestampArg};

    use libhydra_unzip::distribute::{strategy_names, DEFAULT_STRATEGY};
    use libhydra_unzip::DEFAULT_CHUNK_SIZE;

    use clap::{builder::PossibleValuesParser, Parser};

    use std::path::PathBuf;

    fn strategy_parser() -> PossibleValuesParser {
      PossibleValuesParser::new(strategy_names().collect::<Vec<_>>())
    }

    /// Extract a zip archive using a bounded pool of worker threads.
    ///
    /// Every directory named by the archive is created before any worker
    /// starts, then each worker streams its assigned entries to disk through
    /// its own fixed-size buffer.
    #[derive(Parser, Debug)]
    #[command(name = "hydra-unzip", author, version, about, verbatim_doc_comment)]
    pub struct Cli {
      /// Path of the zip archive to extract.
      #[arg(value_name = "FILE")]
      pub file: PathBuf,
      /// Suppress the per-file progress lines.
      #[arg(short = 'q')]
      pub quiet: bool,
      /// Worker count: a positive integer, 'max' (one worker per hardware
      /// thread), or 'auto' (three quarters of the hardware threads).
      #[arg(short = 'j', value_name = "N", default_value = "1")]
      pub jobs: JobCount,
      /// Strategy for distributing archived files among the workers.
      #[arg(
        short = 'd',
        value_name = "NAME",
        default_value = DEFAULT_STRATEGY,
        value_parser = strategy_parser()
      )]
      pub strategy: String,
      /// Size in bytes of each worker's streaming buffer; total buffer
      /// memory is N times this.
      #[arg(short = 'c', value_name = "SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
      pub chunk_size: usize,
      /// Timestamp policy: 'current' to keep the write-time stamps, or a
      /// positive epoch second to apply to every file. When omitted, the
      /// mtimes archived in the zip are restored verbatim (erasing time
      /// zone, as usual).
      #[arg(short = 't', value_name = "POLICY")]
      pub timestamps: Option<TimestampArg>,
      /// Directory prefix prepended to every extracted path.
      #[arg(short = 'o', value_name = "PREFIX")]
      pub output_prefix: Option<PathBuf>,
      /// Stage files under three-character hashed extensions, renaming to
      /// the archived names once written.
      #[arg(short = 'a')]
      pub short_extensions: bool,
      /// Print the diagnostic summary to stderr after extraction.
      #[arg(short = 'g')]
      pub summary: bool,
    }
  }
  pub use args::Cli;

  mod run {
    use super::Cli;

    use libhydra_unzip::{
      destination::{NameRemapper, TimestampPolicy},
      ExtractRequest,
    };

    use eyre::WrapErr;
    use tracing::debug;

    impl Cli {
      pub fn run(self) -> eyre::Result<()> {
        let Self {
          file,
          quiet,
          jobs,
          strategy,
          chunk_size,
          timestamps,
          output_prefix,
          short_extensions,
          summary,
        } = self;

        let request = ExtractRequest {
          filename: file,
          quiet,
          jobs: jobs.resolve(),
          strategy,
          chunk_size,
          timestamps: timestamps.map(TimestampPolicy::from).unwrap_or(TimestampPolicy::Archive),
          remapper: if short_extensions {
            NameRemapper::ShortExtensions
          } else {
            NameRemapper::Identity
          },
          output_prefix,
        };

        debug!(jobs = request.jobs, strategy = %request.strategy, "dispatching extraction");
        /* Do the parallel unzip!!! */
        let outcome = libhydra_unzip::extract(request).wrap_err("parallel unzip failed")?;

        if summary {
          eprint!("{}", outcome);
        }
        Ok(())
      }
    }
  }
}

fn main() -> eyre::Result<()> {
  use clap::Parser as _;
  use eyre::WrapErr;

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
    )
    .with_writer(std::io::stderr)
    .init();

  /* Usage problems exit 1; requested help or version information exits 0. */
  let cli = match cli::Cli::try_parse() {
    Ok(cli) => cli,
    Err(parse_error) => {
      parse_error.print()?;
      let code = if parse_error.use_stderr() { 1 } else { 0 };
      std::process::exit(code);
    },
  };
  cli.run().wrap_err("top-level error")?;
  Ok(())
}
