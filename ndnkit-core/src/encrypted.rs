//! AES-GCM encrypted-message framing.
//!
//! Fixed layout: 12-byte IV, 16-byte authentication tag, then ciphertext.
//! The IV is an 8-byte random number followed by a 4-byte block counter;
//! the encrypt side advances the counter by the number of cipher blocks,
//! and the decrypt side enforces a consistent random part and a
//! monotonically increasing counter, so a replayed or reordered message
//! fails with `IvReuse`.

use aes_gcm::aead::generic_array::typenum::{U12, U16};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::{AeadCore, AeadInPlace, Aes128Gcm, Aes256Gcm, KeyInit};

use crate::error::{Error, Result};
use crate::port;
use crate::region::Region;

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

fn block_count(size: usize) -> u64 {
    (size / BLOCK_LEN + usize::from(size % BLOCK_LEN != 0)) as u64
}

/// View over one encrypted message: `iv ‖ tag ‖ ciphertext`.
#[derive(Debug, Clone, Copy)]
pub struct EncryptedMessage<'a> {
    pub iv: &'a [u8],
    pub tag: &'a [u8],
    pub ciphertext: &'a [u8],
}

impl<'a> EncryptedMessage<'a> {
    pub fn parse(wire: &'a [u8]) -> Result<Self> {
        if wire.len() < IV_LEN + TAG_LEN {
            return Err(Error::Truncated);
        }
        Ok(Self {
            iv: &wire[..IV_LEN],
            tag: &wire[IV_LEN..IV_LEN + TAG_LEN],
            ciphertext: &wire[IV_LEN + TAG_LEN..],
        })
    }
}

/// Encrypt-side IV state. Refuses to produce an IV once the counter would
/// overflow; the key is then poisoned for further encryption.
struct IvGenerator {
    random: u64,
    counter: u32,
    exhausted: bool,
}

impl IvGenerator {
    fn new() -> Result<Self> {
        let mut random = [0u8; 8];
        if !port::RandomSource::generate(&mut random) {
            return Err(Error::Unsupported);
        }
        Ok(Self {
            random: u64::from_be_bytes(random),
            counter: 0,
            exhausted: false,
        })
    }

    fn next(&mut self, plaintext_len: usize) -> Result<[u8; IV_LEN]> {
        if self.exhausted {
            return Err(Error::IvExhausted);
        }
        let advanced = u64::from(self.counter) + block_count(plaintext_len);
        if advanced > u64::from(u32::MAX) {
            self.exhausted = true;
            return Err(Error::IvExhausted);
        }
        let mut iv = [0u8; IV_LEN];
        iv[..8].copy_from_slice(&self.random.to_be_bytes());
        iv[8..].copy_from_slice(&self.counter.to_be_bytes());
        self.counter = advanced as u32;
        Ok(iv)
    }
}

/// Decrypt-side IV checker. The first successful decryption fixes the
/// random part for the session; afterwards the counter must keep
/// increasing. State is committed only after authentication succeeds, so
/// a rejected message leaves the checker untouched.
#[derive(Default)]
struct IvChecker {
    random: Option<u64>,
    counter: u64,
}

impl IvChecker {
    fn check(&self, iv: &[u8], ciphertext_len: usize) -> Result<(u64, u64)> {
        if iv.len() != IV_LEN {
            return Err(Error::Truncated);
        }
        let random = u64::from_be_bytes([iv[0], iv[1], iv[2], iv[3], iv[4], iv[5], iv[6], iv[7]]);
        let counter = u64::from(u32::from_be_bytes([iv[8], iv[9], iv[10], iv[11]]));
        if let Some(fixed) = self.random {
            if fixed != random {
                return Err(Error::IvReuse);
            }
        }
        if counter < self.counter {
            return Err(Error::IvReuse);
        }
        Ok((random, counter + block_count(ciphertext_len)))
    }

    fn commit(&mut self, random: u64, counter: u64) {
        self.random = Some(random);
        self.counter = counter;
    }
}

/// AES-GCM secret key with monotonic-IV encrypted-message framing.
///
/// The key size is fixed by the cipher parameter; see [`AesGcm128`] and
/// [`AesGcm256`].
pub struct AesGcmKey<C> {
    cipher: C,
    iv_encrypt: IvGenerator,
    iv_decrypt: IvChecker,
}

pub type AesGcm128 = AesGcmKey<Aes128Gcm>;
pub type AesGcm256 = AesGcmKey<Aes256Gcm>;

impl<C> AesGcmKey<C>
where
    C: KeyInit + AeadInPlace + AeadCore<NonceSize = U12, TagSize = U16>,
{
    /// Import a raw AES key (16 or 32 bytes, per the cipher).
    pub fn import(key: &[u8]) -> Result<Self> {
        let cipher = C::new_from_slice(key).map_err(|_| Error::BadFormat)?;
        Ok(Self {
            cipher,
            iv_encrypt: IvGenerator::new()?,
            iv_decrypt: IvChecker::default(),
        })
    }

    /// Encrypt into an encrypted-message allocated from `region`.
    /// Fails with `IvExhausted`, before writing anything, once the IV
    /// counter would overflow.
    pub fn encrypt<'a>(
        &mut self,
        region: &mut Region<'a>,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<&'a [u8]> {
        let iv = self.iv_encrypt.next(plaintext.len())?;
        let out = region.alloc(IV_LEN + TAG_LEN + plaintext.len())?;
        let (head, ciphertext) = out.split_at_mut(IV_LEN + TAG_LEN);
        head[..IV_LEN].copy_from_slice(&iv);
        ciphertext.copy_from_slice(plaintext);
        let tag = self
            .cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), aad, ciphertext)
            .map_err(|_| Error::Unsupported)?;
        head[IV_LEN..].copy_from_slice(tag.as_slice());
        Ok(out)
    }

    /// Decrypt an encrypted-message into plaintext allocated from
    /// `region`. A replayed or reordered IV fails with `IvReuse` and does
    /// not update the checker state.
    pub fn decrypt<'a>(
        &mut self,
        region: &mut Region<'a>,
        message: &EncryptedMessage<'_>,
        aad: &[u8],
    ) -> Result<&'a [u8]> {
        let (random, counter) = self.iv_decrypt.check(message.iv, message.ciphertext.len())?;
        let out = region.alloc(message.ciphertext.len())?;
        out.copy_from_slice(message.ciphertext);
        self.cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(message.iv),
                aad,
                out,
                GenericArray::from_slice(message.tag),
            )
            .map_err(|_| Error::BadSignature)?;
        self.iv_decrypt.commit(random, counter);
        Ok(out)
    }

    /// Reset the decrypt-side IV checker; for callers that deduplicate
    /// incoming messages upstream.
    pub fn clear_decrypt_iv_checker(&mut self) {
        self.iv_decrypt = IvChecker::default();
    }

    #[cfg(test)]
    fn set_encrypt_counter(&mut self, counter: u32) {
        self.iv_encrypt.counter = counter;
    }
}
