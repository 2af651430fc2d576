// Copyright (c) Anza Technology, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Portable seeded randomness for challenge selection.
//!
//! The verifier and the challenged node never exchange which block is being
//! challenged, only the seed. Both sides must therefore derive exactly the same
//! stream of draws from it, independent of platform, runtime or `rand` version.
//! [`ChallengeRng`] is a fully specified generator:
//!
//! - key: first 16 bytes of `SHA-256("possession/challenge-rng/v1" || seed_le)`,
//!   where `seed_le` is the `u64` seed as 8 little-endian bytes
//! - stream: AES-128 in CTR mode with a 64-bit little-endian counter and an
//!   all-zero IV
//! - words: consecutive 8-byte chunks of the keystream, read as little-endian `u64`
//! - `index(n)`: with `r = 2^64 mod n`, draw words until one is `>= r` and
//!   return it modulo `n`
//!
//! The rejection step keeps `index` exactly uniform.

use std::fmt::Debug;

use aes::Aes128;
use aes::cipher::{Array, KeyIvInit, StreamCipher};
use ctr::Ctr64LE;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Seed type shared between verifier and challenged node.
pub type Seed = u64;

/// Domain separator mixed into the key derivation.
const KEY_DOMAIN: &[u8] = b"possession/challenge-rng/v1";

/// Number of keystream bytes generated at once.
const BUFFER_BYTES: usize = 64;

/// Deterministic generator used for all challenge draws.
pub struct ChallengeRng {
    seed: Seed,
    cipher: Ctr64LE<Aes128>,
    buffer: [u8; BUFFER_BYTES],
    pos: usize,
    words_drawn: u64,
}

impl ChallengeRng {
    /// Creates a fresh generator for the given seed.
    pub fn new(seed: Seed) -> Self {
        let digest = Sha256::new()
            .chain_update(KEY_DOMAIN)
            .chain_update(seed.to_le_bytes())
            .finalize();
        let mut key_bytes = [0; 16];
        key_bytes.copy_from_slice(&digest[..16]);
        let key = Array::from(key_bytes);
        let iv = Array::from([0; 16]);
        Self {
            seed,
            cipher: Ctr64LE::<Aes128>::new(&key, &iv),
            buffer: [0; BUFFER_BYTES],
            pos: BUFFER_BYTES,
            words_drawn: 0,
        }
    }

    /// Returns the seed this generator was created from.
    pub fn seed(&self) -> Seed {
        self.seed
    }

    /// Returns the number of 64-bit words drawn so far.
    pub fn words_drawn(&self) -> u64 {
        self.words_drawn
    }

    /// Draws the next 64-bit word of the stream.
    ///
    /// Words continue exactly where earlier byte draws left off.
    pub fn next_word(&mut self) -> u64 {
        let mut word = [0; 8];
        self.fill(&mut word);
        self.words_drawn += 1;
        u64::from_le_bytes(word)
    }

    /// Draws a uniformly distributed index in `[0, n)`.
    ///
    /// Returns `None` for an empty range, without consuming any randomness.
    pub fn index(&mut self, n: usize) -> Option<usize> {
        if n == 0 {
            return None;
        }
        let n = n as u64;
        // 2^64 mod n, the size of the biased tail
        let threshold = n.wrapping_neg() % n;
        loop {
            let word = self.next_word();
            if word >= threshold {
                return Some((word % n) as usize);
            }
        }
    }

    fn fill(&mut self, dst: &mut [u8]) {
        let mut written = 0;
        while written < dst.len() {
            if self.pos == BUFFER_BYTES {
                self.refill();
            }
            let n = (BUFFER_BYTES - self.pos).min(dst.len() - written);
            dst[written..written + n].copy_from_slice(&self.buffer[self.pos..self.pos + n]);
            self.pos += n;
            written += n;
        }
    }

    fn refill(&mut self) {
        self.buffer = [0; BUFFER_BYTES];
        self.cipher.apply_keystream(&mut self.buffer);
        self.pos = 0;
    }
}

impl RngCore for ChallengeRng {
    fn next_u32(&mut self) -> u32 {
        self.next_word() as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.next_word()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        self.fill(dst);
    }
}

impl Debug for ChallengeRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeRng")
            .field("seed", &self.seed)
            .field("words_drawn", &self.words_drawn)
            .finish()
    }
}
