// SPDX-License-Identifier: MIT OR Apache-2.0
//! The vault: stable identity for every resolved value.
//!
//! Every value a plan resolves gets an opaque, non-reversible
//! [`DisplayID`](Vault::register) minted here. The vault is the only
//! component that can map an ID back to its runtime bytes, and only the
//! scrubber and the executor consult that mapping — output streams see
//! IDs, never values.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use hkdf::Hkdf;
use opal_core::{PLAN_SALT_LEN, Secret};
use opal_decorator::{PlanSeed, ValueClass};
use opal_error::OpalError;
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::RwLock;

/// Lowercase RFC 4648 base32 alphabet used for DisplayID suffixes.
const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// Number of derived bytes per DisplayID suffix (10 base32 characters).
const ID_BYTES: usize = 6;

/// Generate a fresh 32-byte plan salt.
#[must_use]
pub fn new_plan_salt() -> [u8; PLAN_SALT_LEN] {
    let mut salt = [0u8; PLAN_SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Encode bytes as unpadded lowercase base32.
fn base32(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(5) * 8);
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    for &b in bytes {
        acc = (acc << 8) | u32::from(b);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((acc >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((acc << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

// ---------------------------------------------------------------------------
// IdFactory
// ---------------------------------------------------------------------------

/// How DisplayIDs (and plan-seeded bytes) are derived.
#[derive(Debug, Clone)]
pub enum IdFactory {
    /// Per-execution random IDs. Used for direct execution, where
    /// determinism across invocations is unwanted.
    Run,
    /// IDs derived from the plan salt, so identical plans mint identical
    /// IDs. Used for contracts.
    Plan {
        /// The plan salt seeding every derivation.
        salt: [u8; PLAN_SALT_LEN],
    },
}

impl IdFactory {
    /// A plan-mode factory over `salt`.
    #[must_use]
    pub fn plan(salt: [u8; PLAN_SALT_LEN]) -> Self {
        Self::Plan { salt }
    }

    /// Derive `len` bytes bound to `info`.
    ///
    /// Plan mode expands `HKDF-SHA256(salt, info)`; run mode returns
    /// fresh randomness.
    #[must_use]
    pub fn derive(&self, info: &[u8], len: usize) -> Vec<u8> {
        match self {
            Self::Run => {
                let mut bytes = vec![0u8; len];
                rand::thread_rng().fill_bytes(&mut bytes);
                bytes
            }
            Self::Plan { salt } => {
                let hkdf = Hkdf::<Sha256>::new(Some(salt), info);
                let mut bytes = vec![0u8; len];
                hkdf.expand(info, &mut bytes)
                    .expect("output length within HKDF bounds");
                bytes
            }
        }
    }

    /// Mint a DisplayID for one resolved occurrence.
    ///
    /// The identifier is `opal:v:` or `opal:s:` plus a 10-character
    /// base32 suffix derived from
    /// `decorator_key ‖ canonical(args) ‖ occurrence`.
    #[must_use]
    pub fn mint(
        &self,
        decorator_key: &str,
        canonical_args: &[u8],
        occurrence: u32,
        class: ValueClass,
    ) -> String {
        let mut info = Vec::with_capacity(decorator_key.len() + canonical_args.len() + 8);
        info.extend_from_slice(decorator_key.as_bytes());
        info.push(0);
        info.extend_from_slice(canonical_args);
        info.push(0);
        info.extend_from_slice(&occurrence.to_le_bytes());
        let suffix = base32(&self.derive(&info, ID_BYTES));
        let prefix = match class {
            ValueClass::Variable => "opal:v:",
            ValueClass::Secret => "opal:s:",
        };
        format!("{prefix}{suffix}")
    }
}

impl PlanSeed for IdFactory {
    fn derive(&self, info: &[u8], len: usize) -> Vec<u8> {
        IdFactory::derive(self, info, len)
    }
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// Process-scoped mapping from DisplayID to resolved secret.
///
/// Writes happen only during planning; reads are the hot path for the
/// scrubber and executor, so the map sits behind a read-write lock.
pub struct Vault {
    factory: IdFactory,
    entries: RwLock<HashMap<String, Secret>>,
    order: RwLock<Vec<String>>,
}

impl Vault {
    /// A vault minting IDs with `factory`.
    #[must_use]
    pub fn new(factory: IdFactory) -> Self {
        Self {
            factory,
            entries: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
        }
    }

    /// The factory this vault mints with.
    #[must_use]
    pub fn factory(&self) -> &IdFactory {
        &self.factory
    }

    /// Register a resolved value and mint its DisplayID.
    ///
    /// `key` names the resolving occurrence (e.g. `"var.SECRET"`);
    /// `occurrence` disambiguates repeated occurrences of the same
    /// invocation.
    ///
    /// # Errors
    ///
    /// `Internal` if the minted ID collides with an existing entry —
    /// a vault inconsistency, since (key, args, occurrence) triples are
    /// unique per plan.
    pub fn register(
        &self,
        key: &str,
        canonical_args: &[u8],
        occurrence: u32,
        bytes: Vec<u8>,
        class: ValueClass,
    ) -> Result<String, OpalError> {
        let display_id = self.factory.mint(key, canonical_args, occurrence, class);
        let mut entries = self.entries.write().expect("vault lock poisoned");
        if entries.contains_key(&display_id) {
            return Err(OpalError::internal(format!(
                "display id `{display_id}` minted twice"
            )));
        }
        entries.insert(
            display_id.clone(),
            Secret {
                key: key.to_string(),
                display_id: display_id.clone(),
                runtime_value: bytes,
            },
        );
        self.order
            .write()
            .expect("vault lock poisoned")
            .push(display_id.clone());
        Ok(display_id)
    }

    /// The raw bytes behind a DisplayID.
    ///
    /// This is the secret-provider surface: callers are the scrubber
    /// (pattern seeding) and the executor (arg materialisation) only.
    #[must_use]
    pub fn secret_bytes(&self, display_id: &str) -> Option<Vec<u8>> {
        self.entries
            .read()
            .expect("vault lock poisoned")
            .get(display_id)
            .map(|s| s.runtime_value.clone())
    }

    /// Whether an ID is registered.
    #[must_use]
    pub fn contains(&self, display_id: &str) -> bool {
        self.entries
            .read()
            .expect("vault lock poisoned")
            .contains_key(display_id)
    }

    /// Number of registered secrets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().expect("vault lock poisoned").len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All registered secrets in registration order.
    ///
    /// The planner copies these into `plan.secrets`.
    #[must_use]
    pub fn secrets(&self) -> Vec<Secret> {
        let entries = self.entries.read().expect("vault lock poisoned");
        self.order
            .read()
            .expect("vault lock poisoned")
            .iter()
            .filter_map(|id| entries.get(id).cloned())
            .collect()
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: [u8; PLAN_SALT_LEN] = [7u8; PLAN_SALT_LEN];

    #[test]
    fn base32_known_values() {
        assert_eq!(base32(b""), "");
        assert_eq!(base32(&[0]), "aa");
        assert_eq!(base32(&[0xff; 5]), "77777777");
    }

    #[test]
    fn plan_mode_is_deterministic() {
        let a = IdFactory::plan(SALT);
        let b = IdFactory::plan(SALT);
        let id_a = a.mint("var.SECRET", b"{}", 0, ValueClass::Variable);
        let id_b = b.mint("var.SECRET", b"{}", 0, ValueClass::Variable);
        assert_eq!(id_a, id_b);
        assert!(id_a.starts_with("opal:v:"));
        assert_eq!(id_a.len(), "opal:v:".len() + 10);
    }

    #[test]
    fn different_salts_mint_different_ids() {
        let a = IdFactory::plan(SALT);
        let b = IdFactory::plan([8u8; PLAN_SALT_LEN]);
        assert_ne!(
            a.mint("var.SECRET", b"{}", 0, ValueClass::Variable),
            b.mint("var.SECRET", b"{}", 0, ValueClass::Variable)
        );
    }

    #[test]
    fn occurrence_index_disambiguates() {
        let factory = IdFactory::plan(SALT);
        assert_ne!(
            factory.mint("random", b"{}", 0, ValueClass::Secret),
            factory.mint("random", b"{}", 1, ValueClass::Secret)
        );
    }

    #[test]
    fn secret_class_uses_s_prefix() {
        let factory = IdFactory::plan(SALT);
        let id = factory.mint("random", b"{}", 0, ValueClass::Secret);
        assert!(id.starts_with("opal:s:"));
    }

    #[test]
    fn run_mode_ids_differ_across_mints() {
        let factory = IdFactory::Run;
        let a = factory.mint("var.X", b"{}", 0, ValueClass::Variable);
        let b = factory.mint("var.X", b"{}", 0, ValueClass::Variable);
        assert_ne!(a, b);
    }

    #[test]
    fn derive_is_deterministic_and_info_bound() {
        let factory = IdFactory::plan(SALT);
        let a = factory.derive(b"random:hex:0", 32);
        let b = factory.derive(b"random:hex:0", 32);
        let c = factory.derive(b"random:hex:1", 32);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn vault_register_and_read_back() {
        let vault = Vault::new(IdFactory::plan(SALT));
        let id = vault
            .register("var.SECRET", b"{}", 0, b"my-secret-value".to_vec(), ValueClass::Variable)
            .unwrap();
        assert!(vault.contains(&id));
        assert_eq!(vault.secret_bytes(&id).unwrap(), b"my-secret-value");
        assert_eq!(vault.len(), 1);
    }

    #[test]
    fn vault_collision_is_internal_error() {
        let vault = Vault::new(IdFactory::plan(SALT));
        vault
            .register("var.X", b"{}", 0, b"a".to_vec(), ValueClass::Variable)
            .unwrap();
        let err = vault
            .register("var.X", b"{}", 0, b"b".to_vec(), ValueClass::Variable)
            .unwrap_err();
        assert_eq!(err.kind, opal_error::ErrorKind::Internal);
    }

    #[test]
    fn secrets_preserve_registration_order() {
        let vault = Vault::new(IdFactory::plan(SALT));
        vault
            .register("var.A", b"{}", 0, b"1".to_vec(), ValueClass::Variable)
            .unwrap();
        vault
            .register("var.B", b"{}", 1, b"2".to_vec(), ValueClass::Variable)
            .unwrap();
        let secrets = vault.secrets();
        assert_eq!(secrets.len(), 2);
        assert_eq!(secrets[0].key, "var.A");
        assert_eq!(secrets[1].key, "var.B");
    }

    #[test]
    fn unknown_id_reads_none() {
        let vault = Vault::new(IdFactory::Run);
        assert!(vault.secret_bytes("opal:v:aaaaaaaaaa").is_none());
    }

    #[test]
    fn new_plan_salt_is_random() {
        assert_ne!(new_plan_salt(), new_plan_salt());
    }
}
