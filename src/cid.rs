//! Content identifiers.
//!
//! Values are addressed by the SHA-256 digest of their bytes. The digest is
//! wrapped in a `sha2-256` multihash and rendered as a CIDv0 string (base58btc,
//! always starting with `Qm`), which is what users copy around to `/get` a
//! value. The DHT works on the raw digest.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::core::Key;
use crate::error::ValueError;

/// Multihash code for `sha2-256`.
const MULTIHASH_SHA2_256: u8 = 0x12;

/// Digest length byte that follows the code in the multihash header.
const MULTIHASH_SHA2_256_LEN: u8 = 32;

/// Length of an encoded multihash: two header bytes plus the digest.
const MULTIHASH_LEN: usize = 34;

/// A content identifier: the SHA-256 digest of a value.
///
/// ```
/// use iroh_dht_values::ContentId;
///
/// let cid = ContentId::for_value(b"hello");
/// let text = cid.to_string();
/// assert!(text.starts_with("Qm"));
/// assert_eq!(text.len(), 46);
/// assert_eq!(text.parse::<ContentId>().unwrap(), cid);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; 32]);

impl ContentId {
    /// Hash `value` and wrap the digest.
    pub fn for_value(value: &[u8]) -> Self {
        let digest = Sha256::digest(value);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Wrap an existing digest.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.0
    }

    /// The key under which this content is routed and announced in the DHT.
    pub fn routing_key(&self) -> Key {
        self.0
    }

    /// Check that `value` hashes to this identifier.
    pub fn matches(&self, value: &[u8]) -> bool {
        Self::for_value(value) == *self
    }

    /// The `sha2-256` multihash bytes.
    pub fn to_multihash(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MULTIHASH_LEN);
        out.push(MULTIHASH_SHA2_256);
        out.push(MULTIHASH_SHA2_256_LEN);
        out.extend_from_slice(&self.0);
        out
    }

    /// Parse a CID field taken straight off the wire.
    pub fn from_wire(field: &[u8]) -> Result<Self, ValueError> {
        let text = std::str::from_utf8(field)
            .map_err(|_| ValueError::InvalidCid("not valid utf-8".into()))?;
        text.parse()
    }
}

impl FromStr for ContentId {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|err| ValueError::InvalidCid(format!("{s}: {err}")))?;
        if bytes.len() != MULTIHASH_LEN
            || bytes[0] != MULTIHASH_SHA2_256
            || bytes[1] != MULTIHASH_SHA2_256_LEN
        {
            return Err(ValueError::InvalidCid(format!(
                "{s}: not a sha2-256 CIDv0"
            )));
        }
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[2..]);
        Ok(Self(digest))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.to_multihash()).into_string())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({self})")
    }
}
