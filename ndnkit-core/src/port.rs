//! Platform crypto port.
//!
//! The codec and the key types never touch a crypto library directly; they
//! go through the small surface in this module, backed by the RustCrypto
//! crates. A constrained target can swap these bindings for a hardware
//! implementation without touching the packet layer.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Digest;
use subtle::ConstantTimeEq;

pub const SHA256_LEN: usize = 32;

/// Streaming SHA-256 hasher.
pub struct Sha256(sha2::Sha256);

impl Sha256 {
    pub fn new() -> Self {
        Self(sha2::Sha256::new())
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    pub fn finish(self) -> [u8; SHA256_LEN] {
        self.0.finalize().into()
    }
}

impl Default for Sha256 {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 over a list of chunks hashed in order.
pub fn sha256_chunks(chunks: &[&[u8]]) -> [u8; SHA256_LEN] {
    let mut hash = Sha256::new();
    for chunk in chunks {
        hash.update(chunk);
    }
    hash.finish()
}

/// Constant-time comparison. Slices of unequal length compare unequal, in
/// constant time over the shorter length.
pub fn timing_safe_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        let n = a.len().min(b.len());
        let _ = a[..n].ct_eq(&b[..n]);
        return false;
    }
    a.ct_eq(b).into()
}

/// Cryptographically secure random bytes.
pub struct RandomSource;

impl RandomSource {
    pub fn generate(buf: &mut [u8]) -> bool {
        OsRng.try_fill_bytes(buf).is_ok()
    }
}
