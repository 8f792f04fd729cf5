/*
 * Description: Small formatting and hashing helpers shared across the crate.
 *
 * Copyright (C) 2024 Danny McClanahan <dmcC2@hypnicjerk.ai>
 * SPDX-License-Identifier: Apache-2.0
 *
 * Licensed under the Apache License, Version 2.0 (see LICENSE).
 */

//! Small formatting and hashing helpers shared across the crate.

/// Render a byte count with a binary-unit suffix.
pub fn format_bytes(count: u64) -> String {
  const KIB: u64 = 1024;
  const MIB: u64 = KIB * 1024;
  const GIB: u64 = MIB * 1024;
  if count >= GIB {
    format!("{:.2} GiB", count as f64 / GIB as f64)
  } else if count >= MIB {
    format!("{:.2} MiB", count as f64 / MIB as f64)
  } else if count >= KIB {
    format!("{:.2} KiB", count as f64 / KIB as f64)
  } else {
    format!("{} B", count)
  }
}

/// 32-bit multiplicative fold over the input bytes. Not cryptographic; used
/// only to derive short stand-in names.
pub fn fold_hash32(input: &str) -> u32 {
  input.bytes().fold(0_u32, |hash, byte| hash.wrapping_mul(31).wrapping_add(u32::from(byte)))
}

const ALPHA36: &[u8; 36] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Three characters from the 36-character alphabet `a-z0-9`, indexed by
/// successive bytes of `hash`.
pub fn encode_alpha36(hash: u32) -> String {
  (0..3)
    .map(|slot| {
      let byte = (hash >> (8 * slot)) & 0xff;
      char::from(ALPHA36[byte as usize % ALPHA36.len()])
    })
    .collect()
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn format_bytes_picks_the_unit() {
    assert_eq!(format_bytes(0), "0 B");
    assert_eq!(format_bytes(512), "512 B");
    assert_eq!(format_bytes(1536), "1.50 KiB");
    assert_eq!(format_bytes(1048576), "1.00 MiB");
    assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00 GiB");
  }

  #[test]
  fn fold_hash32_is_deterministic() {
    assert_eq!(fold_hash32("longext"), fold_hash32("longext"));
    assert_ne!(fold_hash32("longext"), fold_hash32("longex"));
    assert_eq!(fold_hash32(""), 0);
  }

  #[test]
  fn encode_alpha36_stays_in_alphabet() {
    for hash in [0u32, 1, 0xdead_beef, u32::MAX] {
      let code = encode_alpha36(hash);
      assert_eq!(code.chars().count(), 3);
      assert!(code.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
  }
}
