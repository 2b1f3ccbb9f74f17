//! Shared types and identifiers for reef.
//!
//! This crate defines the core types used across the reef workspace:
//! identifiers ([`PublicKey`], [`DiscoveryKey`]), the drive signing
//! [`Keypair`], the two log namespaces ([`LogKind`]) and the file
//! metadata record ([`Stat`]) stored in the trie.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = KeyError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                decode_hex32(s).map(Self)
            }
        }
    };
}

define_id!(
    /// Ed25519 verification key identifying a drive.
    ///
    /// Anyone holding it can replicate and verify the drive; only the
    /// holder of the matching secret key can append to it.
    PublicKey
);

define_id!(
    /// Public identifier derived from a [`PublicKey`].
    ///
    /// Exchanged during the replication handshake so peers can confirm they
    /// hold the same drive without putting the key itself on the wire.
    DiscoveryKey
);

/// Context string for [`DiscoveryKey`] derivation.
const DISCOVERY_CONTEXT: &[u8; 32] = b"reef discovery key derivation v1";

impl PublicKey {
    /// Verify an ed25519 signature made by the matching secret key.
    ///
    /// Returns `false` if the key bytes are not a valid curve point or the
    /// signature does not match.
    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let signature = Signature::from_bytes(signature);
        verifying_key.verify(message, &signature).is_ok()
    }

    /// Derive the discovery key for this public key.
    pub fn discovery_key(&self) -> DiscoveryKey {
        let mut hasher = blake3::Hasher::new_keyed(DISCOVERY_CONTEXT);
        hasher.update(&self.0);
        DiscoveryKey(hasher.finalize().into())
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// Errors produced when decoding key material.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// Hex input was not exactly 64 characters.
    #[error("expected 64 hex characters, got {0}")]
    InvalidLength(usize),

    /// Hex input contained a non-hex character.
    #[error("invalid hex character {0:?}")]
    InvalidCharacter(char),

    /// The secret key does not match the expected public key.
    #[error("secret key does not match public key {0}")]
    Mismatch(PublicKey),
}

/// The signing keypair that grants write authority over a drive.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        use rand::RngCore;

        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        Self::from_secret_bytes(&seed)
    }

    /// Rebuild a keypair from its 32-byte secret seed.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(secret),
        }
    }

    /// Return the public half.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }

    /// Return the 32-byte secret seed.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Split a 64-byte signature into two 32-byte halves.
///
/// serde does not derive for `[u8; 64]`, so persisted and wire records
/// carry signatures as `(r, s)` halves.
pub fn split_signature(signature: &[u8; 64]) -> ([u8; 32], [u8; 32]) {
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&signature[..32]);
    s.copy_from_slice(&signature[32..]);
    (r, s)
}

/// Reassemble a signature split with [`split_signature`].
pub fn join_signature(r: &[u8; 32], s: &[u8; 32]) -> [u8; 64] {
    let mut sig = [0u8; 64];
    sig[..32].copy_from_slice(r);
    sig[32..].copy_from_slice(s);
    sig
}

/// Decode a 64-character hex string into 32 bytes.
pub fn decode_hex32(s: &str) -> Result<[u8; 32], KeyError> {
    let s = s.trim();
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(s, &mut bytes).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { c, .. } => KeyError::InvalidCharacter(c),
        _ => KeyError::InvalidLength(s.len()),
    })?;
    Ok(bytes)
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// Which of a drive's two logs a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogKind {
    /// Trie entries (paths and their [`Stat`] records).
    Metadata,
    /// Raw file bytes.
    Content,
}

impl LogKind {
    /// Both kinds, in channel order.
    pub const ALL: [LogKind; 2] = [LogKind::Metadata, LogKind::Content];

    /// Domain-separation prefix mixed into every signed head of this log.
    pub fn namespace(&self) -> &'static [u8] {
        match self {
            LogKind::Metadata => b"reef/metadata",
            LogKind::Content => b"reef/content",
        }
    }

    /// Short name used for storage paths and log fields.
    pub fn name(&self) -> &'static str {
        match self {
            LogKind::Metadata => "metadata",
            LogKind::Content => "content",
        }
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// File metadata
// ---------------------------------------------------------------------------

/// Default `mode` for regular files (`0o100644`).
pub const DEFAULT_FILE_MODE: u32 = 0o100_644;

/// Default `mode` for directories (`0o040755`).
pub const DEFAULT_DIR_MODE: u32 = 0o040_755;

/// Whether a [`Stat`] describes a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// A regular file with content in the content log.
    File,
    /// A directory. Directories are implicit; this kind is only produced
    /// for listable path prefixes, never stored.
    Directory,
}

/// Metadata record stored for every path in the trie.
///
/// `byte_offset`/`size` address the file's bytes in the content log;
/// `offset`/`blocks` give the same range in block units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// File or directory.
    pub kind: EntryKind,
    /// File size in bytes.
    pub size: u64,
    /// Number of content blocks holding the file.
    pub blocks: u64,
    /// Index of the first content block.
    pub offset: u64,
    /// Absolute byte offset of the file in the content log.
    pub byte_offset: u64,
    /// Unix permission and type bits.
    pub mode: u32,
    /// Modification time, milliseconds since the Unix epoch.
    pub mtime: u64,
    /// Change time, milliseconds since the Unix epoch.
    pub ctime: u64,
}

impl Stat {
    /// A synthetic record for an implicit directory.
    pub fn directory() -> Self {
        Self {
            kind: EntryKind::Directory,
            size: 0,
            blocks: 0,
            offset: 0,
            byte_offset: 0,
            mode: DEFAULT_DIR_MODE,
            mtime: 0,
            ctime: 0,
        }
    }

    /// Whether this record describes a file.
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Whether this record describes a directory.
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}
