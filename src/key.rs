// [[file:../intranode.note::*imports][imports:1]]
use super::*;

use std::hash::{Hash, Hasher};
// imports:1 ends here

// [[file:../intranode.note::6c1f0e2a][6c1f0e2a]]
/// The fixed number of bytes every participant sends for its host
/// identifier. All members of a group must agree on it.
pub const HOST_KEY_LEN: usize = 256;
// 6c1f0e2a ends here

// [[file:../intranode.note::d94b7a35][d94b7a35]]
/// Opaque identifier of the host a process runs on.
///
/// The key is only ever compared for equality and hashed; its bytes are
/// the host name, zero padded (or truncated) to `HOST_KEY_LEN`.
#[derive(Clone)]
pub struct ColocationKey {
    bytes: Box<[u8; HOST_KEY_LEN]>,
}

impl ColocationKey {
    /// Construct a key from raw host identifier bytes.
    pub fn from_bytes(raw: &[u8]) -> Self {
        let mut bytes = Box::new([0u8; HOST_KEY_LEN]);
        let n = raw.len().min(HOST_KEY_LEN);
        if raw.len() > HOST_KEY_LEN {
            debug!("host identifier truncated to {HOST_KEY_LEN} bytes");
        }
        bytes[..n].copy_from_slice(&raw[..n]);
        Self { bytes }
    }

    /// Construct a key from one fixed-length slot of a gathered buffer.
    pub fn from_slot(slot: &[u8]) -> Result<Self> {
        if slot.len() != HOST_KEY_LEN {
            bail!("colocation key slot has {} bytes, expected {HOST_KEY_LEN}", slot.len());
        }
        Ok(Self::from_bytes(slot))
    }

    /// The fixed-length wire form of the key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..]
    }

    /// Return true if the key carries no host identifier at all.
    pub fn is_blank(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }
}

impl PartialEq for ColocationKey {
    fn eq(&self, other: &Self) -> bool {
        self.bytes[..] == other.bytes[..]
    }
}

impl Eq for ColocationKey {}

impl Hash for ColocationKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bytes[..].hash(state);
    }
}

impl std::fmt::Display for ColocationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let n = self.bytes.iter().position(|&b| b == 0).unwrap_or(HOST_KEY_LEN);
        write!(f, "{}", String::from_utf8_lossy(&self.bytes[..n]))
    }
}

impl std::fmt::Debug for ColocationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ColocationKey({:?})", self.to_string())
    }
}

impl From<&str> for ColocationKey {
    fn from(host: &str) -> Self {
        Self::from_bytes(host.as_bytes())
    }
}
// d94b7a35 ends here

// [[file:../intranode.note::0b8e4d17][0b8e4d17]]
#[test]
fn test_colocation_key() {
    let a: ColocationKey = "node01".into();
    let b = ColocationKey::from_slot(a.as_bytes()).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.as_bytes().len(), HOST_KEY_LEN);
    assert_eq!(a.to_string(), "node01");
    assert_ne!(a, ColocationKey::from("node02"));
    assert!(ColocationKey::from("").is_blank());

    // long host names share a key only when their first HOST_KEY_LEN bytes agree
    let long1 = "x".repeat(HOST_KEY_LEN + 3);
    let long2 = "x".repeat(HOST_KEY_LEN + 7);
    assert_eq!(ColocationKey::from(long1.as_str()), ColocationKey::from(long2.as_str()));

    assert!(ColocationKey::from_slot(b"node01").is_err());
}
// 0b8e4d17 ends here
