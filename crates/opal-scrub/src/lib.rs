// SPDX-License-Identifier: MIT OR Apache-2.0
//! Secret-scrubbing [`Write`] adapter.
//!
//! A [`Scrubber`] wraps a downstream writer so that no registered
//! secret's runtime value — nor any of its common obfuscations — can
//! appear on the wrapped stream. Matches are replaced by the secret's
//! DisplayID placeholder. The adapter buffers only as much as the
//! longest matchable form requires, so chunk boundaries never split a
//! match, and passes bytes straight through when no secret is
//! registered.
//!
//! Recognised forms per secret value `v`: the raw bytes, standard and
//! unpadded base64, lower- and upper-case hex, URL percent-encoding,
//! byte reversal, and separator obfuscation (characters from
//! `- _ . : space` inserted between consecutive bytes, runs of at most
//! two).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod lockdown;

pub use lockdown::{LockdownGuard, lockdown_streams};

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use blake2::Blake2bMac;
use blake2::digest::consts::U32;
use blake2::digest::{FixedOutput, KeyInit, Update};
use percent_encoding::{NON_ALPHANUMERIC, percent_encode};
use rand::RngCore;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// The separator alphabet recognised between secret bytes.
///
/// Extending this set changes what counts as an obfuscated leak;
/// treat it as part of the scrubber's contract.
pub const SEPARATORS: &[u8] = b"-_.: ";

/// Longest run of separator characters matched inside one gap.
const MAX_SEP_RUN: usize = 2;

fn is_separator(b: u8) -> bool {
    SEPARATORS.contains(&b)
}

// ---------------------------------------------------------------------------
// Secret patterns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct SecretEntry {
    /// Raw secret bytes, used by the separator matcher.
    value: Vec<u8>,
    /// Placeholder substituted for every match.
    placeholder: Vec<u8>,
    /// Literal encodings of the value.
    literals: Vec<Vec<u8>>,
    /// Longest matchable form for this entry.
    max_form_len: usize,
}

impl SecretEntry {
    fn new(value: &[u8], placeholder: &str) -> Self {
        let mut literals: Vec<Vec<u8>> = vec![
            value.to_vec(),
            STANDARD.encode(value).into_bytes(),
            STANDARD_NO_PAD.encode(value).into_bytes(),
            hex::encode(value).into_bytes(),
            hex::encode_upper(value).into_bytes(),
            percent_encode(value, NON_ALPHANUMERIC).to_string().into_bytes(),
            value.iter().rev().copied().collect(),
        ];
        literals.sort();
        literals.dedup();

        let sep_max = if value.len() >= 2 {
            value.len() + (value.len() - 1) * MAX_SEP_RUN
        } else {
            value.len()
        };
        let max_form_len = literals
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(sep_max);

        Self {
            value: value.to_vec(),
            placeholder: placeholder.as_bytes().to_vec(),
            literals,
            max_form_len,
        }
    }

    /// Longest match of any admissible form at `data[at..]`.
    fn match_at(&self, data: &[u8], at: usize) -> Option<usize> {
        let rest = &data[at..];
        let mut best = None;
        for literal in &self.literals {
            if rest.len() >= literal.len() && rest[..literal.len()] == literal[..] {
                best = best.max(Some(literal.len()));
            }
        }
        if let Some(len) = self.match_separated(data, at) {
            best = best.max(Some(len));
        }
        best
    }

    /// Match the separator-obfuscated form, returning the longest
    /// consumed length.
    fn match_separated(&self, data: &[u8], at: usize) -> Option<usize> {
        if self.value.len() < 2 || at >= data.len() || data[at] != self.value[0] {
            return None;
        }
        // Positions reachable after each matched value byte. Bounded by
        // MAX_SEP_RUN + 1 alternatives per gap.
        let mut frontier: Vec<usize> = vec![at + 1];
        for &vb in &self.value[1..] {
            let mut next: Vec<usize> = Vec::new();
            for &pos in &frontier {
                for skip in 0..=MAX_SEP_RUN {
                    let p = pos + skip;
                    if skip > 0 && !(data.len() >= p && data[pos..p].iter().all(|b| is_separator(*b)))
                    {
                        break;
                    }
                    if p < data.len() && data[p] == vb && !next.contains(&(p + 1)) {
                        next.push(p + 1);
                    }
                }
            }
            if next.is_empty() {
                return None;
            }
            frontier = next;
        }
        frontier.iter().max().map(|end| end - at)
    }
}

// ---------------------------------------------------------------------------
// Scrubber
// ---------------------------------------------------------------------------

struct Inner<W> {
    downstream: W,
    secrets: Vec<SecretEntry>,
    max_len: usize,
    carry: Vec<u8>,
    run_key: [u8; 32],
}

impl<W: Write> Inner<W> {
    /// Scan and emit `carry[..emit_limit]`, substituting matches.
    ///
    /// A match beginning below the limit may consume past it; the carry
    /// drains to wherever scanning stopped.
    fn scan_emit(&mut self, emit_limit: usize) -> io::Result<()> {
        let mut out = Vec::with_capacity(emit_limit);
        let mut i = 0usize;
        while i < emit_limit {
            let mut matched: Option<(usize, usize)> = None; // (len, secret index)
            for (idx, entry) in self.secrets.iter().enumerate() {
                if let Some(len) = entry.match_at(&self.carry, i) {
                    if matched.map_or(true, |(best, _)| len > best) {
                        matched = Some((len, idx));
                    }
                }
            }
            match matched {
                Some((len, idx)) => {
                    out.extend_from_slice(&self.secrets[idx].placeholder);
                    i += len;
                }
                None => {
                    out.push(self.carry[i]);
                    i += 1;
                }
            }
        }
        self.carry.drain(..i);
        self.downstream.write_all(&out)
    }
}

/// A thread-safe scrubbing writer.
///
/// Clones share the same downstream, secret table, and carry; concurrent
/// writes serialise on an internal lock.
pub struct Scrubber<W> {
    inner: Arc<Mutex<Inner<W>>>,
}

impl<W> Clone for Scrubber<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: Write> Scrubber<W> {
    /// Wrap a downstream writer with no secrets registered.
    #[must_use]
    pub fn new(downstream: W) -> Self {
        let mut run_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut run_key);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                downstream,
                secrets: Vec::new(),
                max_len: 0,
                carry: Vec::new(),
                run_key,
            })),
        }
    }

    /// Register a secret value and its placeholder.
    ///
    /// Recomputes the carry bound over every currently matchable form.
    ///
    /// # Panics
    ///
    /// Panics when `value` or `placeholder` is empty — an empty pattern
    /// would match everywhere.
    pub fn register_secret(&self, value: &[u8], placeholder: &str) {
        assert!(!value.is_empty(), "scrubber secret value must not be empty");
        assert!(
            !placeholder.is_empty(),
            "scrubber placeholder must not be empty"
        );
        let mut inner = self.inner.lock().expect("scrubber lock poisoned");
        let entry = SecretEntry::new(value, placeholder);
        inner.max_len = inner.max_len.max(entry.max_form_len);
        inner.secrets.push(entry);
    }

    /// Number of registered secrets.
    #[must_use]
    pub fn secret_count(&self) -> usize {
        self.inner.lock().expect("scrubber lock poisoned").secrets.len()
    }

    /// Keyed BLAKE2b-256 fingerprint of `data` under this instance's run
    /// key. For test diagnostics; the key itself never leaves the
    /// scrubber.
    #[must_use]
    pub fn fingerprint(&self, data: &[u8]) -> [u8; 32] {
        let inner = self.inner.lock().expect("scrubber lock poisoned");
        let mut mac = <Blake2bMac<U32> as KeyInit>::new_from_slice(&inner.run_key)
            .expect("32-byte key is within BLAKE2b bounds");
        mac.update(data);
        mac.finalize_fixed().into()
    }

    /// Drain the carry with end-of-stream semantics and flush
    /// downstream.
    ///
    /// # Errors
    ///
    /// Propagates downstream I/O errors.
    pub fn close(&self) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("scrubber lock poisoned");
        let limit = inner.carry.len();
        inner.scan_emit(limit)?;
        debug_assert!(inner.carry.is_empty());
        inner.downstream.flush()
    }
}

impl<W: Write> Write for Scrubber<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().expect("scrubber lock poisoned");
        if inner.secrets.is_empty() {
            // Pass-through: nothing registered, nothing buffered.
            inner.downstream.write_all(buf)?;
            return Ok(buf.len());
        }
        inner.carry.extend_from_slice(buf);
        let hold = inner.max_len;
        if inner.carry.len() > hold {
            let limit = inner.carry.len() - hold;
            inner.scan_emit(limit)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.close()
    }
}

impl<W> std::fmt::Debug for Scrubber<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scrubber").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
