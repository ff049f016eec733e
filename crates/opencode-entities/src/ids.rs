// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Lexicographically-sortable identifiers and deterministic project ids.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use sha2::{Digest, Sha256};

const CROCKFORD: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Produce a 26-character ULID-shaped id: a 48-bit millisecond timestamp
/// (10 base32 chars) followed by 80 bits of randomness (16 base32 chars).
/// Ids generated later sort lexicographically after ids generated earlier.
pub fn next_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let mut random = [0u8; 10];
    rand::thread_rng().fill_bytes(&mut random);
    encode_ulid(millis, &random)
}

fn encode_ulid(millis: u64, random: &[u8; 10]) -> String {
    let mut out = String::with_capacity(26);

    // 48-bit timestamp -> 10 base32 chars, 5 bits each.
    for i in (0..10).rev() {
        let shift = i * 5;
        let idx = ((millis >> shift) & 0x1F) as usize;
        out.push(CROCKFORD[idx] as char);
    }

    // 80-bit randomness -> 16 base32 chars. Pack the 10 random bytes into a
    // u128 (80 bits used) and slice off 5 bits at a time.
    let mut value: u128 = 0;
    for &b in random {
        value = (value << 8) | b as u128;
    }
    for i in (0..16).rev() {
        let shift = i * 5;
        let idx = ((value >> shift) & 0x1F) as usize;
        out.push(CROCKFORD[idx] as char);
    }

    out
}

/// Deterministic 16-hex-char project id: the first 16 hex characters of the
/// SHA-256 digest of the absolute worktree path. Two sessions opened against
/// the same worktree always derive the same project id, across restarts.
pub fn project_id(worktree: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(worktree.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}
