use hmac::{Hmac, Mac};
use p256::ecdsa::signature::{DigestSigner, DigestVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rand::rngs::OsRng;
use sha2::Digest;

use crate::error::{Error, Result};
use crate::name::Name;
use crate::packets::SigInfo;
use crate::port;
use crate::tlv::sig_types;

/// Upper bound on any signature the packet signers reserve room for.
/// A key reporting a larger `max_sig_len` cannot be used.
pub const MAX_SIG_BUF: usize = 96;

/// DER-encoded ECDSA-P256 signature bound, including the DER wrapper.
pub const MAX_ECDSA_SIG_LEN: usize = 74;

/// Signing side of a key: a capability set of exactly three operations.
/// Packet code never learns which algorithm is behind it.
pub trait PrivateKey {
    /// Fill in `sig_type`, the key locator name, and any fixed extensions.
    fn update_sig_info<'a>(&'a self, sig_info: &mut SigInfo<'a>);

    /// Upper bound of the signature length, used to reserve encoder room.
    fn max_sig_len(&self) -> usize;

    /// Sign the concatenation of `chunks` into `sig`, returning the actual
    /// signature length.
    fn sign(&self, chunks: &[&[u8]], sig: &mut [u8]) -> Result<usize>;

    /// Whether signing the same input twice yields identical bytes.
    fn deterministic(&self) -> bool {
        true
    }
}

/// Verification side of a key.
pub trait PublicKey {
    /// Verify `sig` over the concatenation of `chunks`. Failure modes are
    /// deliberately not distinguished.
    fn verify(&self, chunks: &[&[u8]], sig: &[u8]) -> bool;
}

/// DigestSha256 "signing": the signature is the SHA-256 of the input.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestKey;

impl PrivateKey for DigestKey {
    fn update_sig_info<'a>(&'a self, sig_info: &mut SigInfo<'a>) {
        sig_info.sig_type = sig_types::DIGEST_SHA256;
        sig_info.key_name = Name::default();
    }

    fn max_sig_len(&self) -> usize {
        port::SHA256_LEN
    }

    fn sign(&self, chunks: &[&[u8]], sig: &mut [u8]) -> Result<usize> {
        let digest = port::sha256_chunks(chunks);
        sig.get_mut(..port::SHA256_LEN)
            .ok_or(Error::Unsupported)?
            .copy_from_slice(&digest);
        Ok(port::SHA256_LEN)
    }
}

impl PublicKey for DigestKey {
    fn verify(&self, chunks: &[&[u8]], sig: &[u8]) -> bool {
        let digest = port::sha256_chunks(chunks);
        port::timing_safe_equal(&digest, sig)
    }
}

/// ECDSA-P256 private key with SHA-256 and DER signatures, deterministic
/// per RFC 6979. Carries the name of its certificate for the key locator.
pub struct EcdsaPrivateKey {
    name_value: Vec<u8>,
    name_comps: usize,
    key: SigningKey,
}

impl EcdsaPrivateKey {
    /// Generate a fresh key pair named `name`.
    pub fn generate(name: &Name<'_>) -> (EcdsaPrivateKey, EcdsaPublicKey) {
        let key = SigningKey::random(&mut OsRng);
        let pvt = Self::with_key(name, key);
        let public = pvt.public_key();
        (pvt, public)
    }

    /// Import a PKCS#8 DER private key.
    pub fn from_pkcs8(name: &Name<'_>, der: &[u8]) -> Result<Self> {
        let key = SigningKey::from_pkcs8_der(der).map_err(|_| Error::BadFormat)?;
        Ok(Self::with_key(name, key))
    }

    /// Export as PKCS#8 DER.
    pub fn to_pkcs8(&self) -> Result<Vec<u8>> {
        let doc = self
            .key
            .to_pkcs8_der()
            .map_err(|_| Error::Unsupported)?;
        Ok(doc.as_bytes().to_vec())
    }

    pub fn public_key(&self) -> EcdsaPublicKey {
        EcdsaPublicKey {
            name_value: self.name_value.clone(),
            name_comps: self.name_comps,
            key: *self.key.verifying_key(),
        }
    }

    pub fn name(&self) -> Name<'_> {
        Name::from_parts(&self.name_value, self.name_comps)
    }

    fn with_key(name: &Name<'_>, key: SigningKey) -> Self {
        Self {
            name_value: name.value().to_vec(),
            name_comps: name.size(),
            key,
        }
    }
}

impl PrivateKey for EcdsaPrivateKey {
    fn update_sig_info<'a>(&'a self, sig_info: &mut SigInfo<'a>) {
        sig_info.sig_type = sig_types::SHA256_WITH_ECDSA;
        sig_info.key_name = self.name();
    }

    fn max_sig_len(&self) -> usize {
        MAX_ECDSA_SIG_LEN
    }

    fn sign(&self, chunks: &[&[u8]], sig: &mut [u8]) -> Result<usize> {
        let mut digest = sha2::Sha256::new();
        for chunk in chunks {
            digest.update(chunk);
        }
        let signature: Signature = self
            .key
            .try_sign_digest(digest)
            .map_err(|_| Error::BadSignature)?;
        let der = signature.to_der();
        let bytes = der.as_bytes();
        sig.get_mut(..bytes.len())
            .ok_or(Error::Unsupported)?
            .copy_from_slice(bytes);
        Ok(bytes.len())
    }
}

/// ECDSA-P256 public key; the SEC1 uncompressed point is 65 bytes.
pub struct EcdsaPublicKey {
    name_value: Vec<u8>,
    name_comps: usize,
    key: VerifyingKey,
}

impl EcdsaPublicKey {
    /// Import a 65-byte uncompressed SEC1 point.
    pub fn from_sec1(name: &Name<'_>, point: &[u8]) -> Result<Self> {
        let key = VerifyingKey::from_sec1_bytes(point).map_err(|_| Error::BadFormat)?;
        Ok(Self {
            name_value: name.value().to_vec(),
            name_comps: name.size(),
            key,
        })
    }

    /// The 65-byte uncompressed SEC1 point.
    pub fn to_sec1(&self) -> Vec<u8> {
        self.key.to_encoded_point(false).as_bytes().to_vec()
    }

    /// SubjectPublicKeyInfo DER, the certificate content format.
    pub fn to_spki(&self) -> Result<Vec<u8>> {
        let doc = self
            .key
            .to_public_key_der()
            .map_err(|_| Error::Unsupported)?;
        Ok(doc.as_bytes().to_vec())
    }

    /// Import SubjectPublicKeyInfo DER.
    pub fn from_spki(name: &Name<'_>, der: &[u8]) -> Result<Self> {
        use p256::pkcs8::DecodePublicKey;
        let key = VerifyingKey::from_public_key_der(der).map_err(|_| Error::BadFormat)?;
        Ok(Self {
            name_value: name.value().to_vec(),
            name_comps: name.size(),
            key,
        })
    }

    pub fn name(&self) -> Name<'_> {
        Name::from_parts(&self.name_value, self.name_comps)
    }
}

impl PublicKey for EcdsaPublicKey {
    fn verify(&self, chunks: &[&[u8]], sig: &[u8]) -> bool {
        let Ok(signature) = Signature::from_der(sig) else {
            return false;
        };
        let mut digest = sha2::Sha256::new();
        for chunk in chunks {
            digest.update(chunk);
        }
        self.key.verify_digest(digest, &signature).is_ok()
    }
}

/// HMAC-SHA256 symmetric key.
pub struct HmacKey {
    key: Vec<u8>,
}

impl HmacKey {
    pub fn new(key: &[u8]) -> Self {
        Self { key: key.to_vec() }
    }

    fn compute(&self, chunks: &[&[u8]]) -> Option<[u8; port::SHA256_LEN]> {
        // HMAC-SHA256 accepts keys of any length.
        let mut mac = Hmac::<sha2::Sha256>::new_from_slice(&self.key).ok()?;
        for chunk in chunks {
            mac.update(chunk);
        }
        Some(mac.finalize().into_bytes().into())
    }
}

impl PrivateKey for HmacKey {
    fn update_sig_info<'a>(&'a self, sig_info: &mut SigInfo<'a>) {
        sig_info.sig_type = sig_types::HMAC_WITH_SHA256;
        sig_info.key_name = Name::default();
    }

    fn max_sig_len(&self) -> usize {
        port::SHA256_LEN
    }

    fn sign(&self, chunks: &[&[u8]], sig: &mut [u8]) -> Result<usize> {
        let mac = self.compute(chunks).ok_or(Error::Unsupported)?;
        sig.get_mut(..mac.len())
            .ok_or(Error::Unsupported)?
            .copy_from_slice(&mac);
        Ok(mac.len())
    }
}

impl PublicKey for HmacKey {
    fn verify(&self, chunks: &[&[u8]], sig: &[u8]) -> bool {
        match self.compute(chunks) {
            Some(mac) => port::timing_safe_equal(&mac, sig),
            None => false,
        }
    }
}

/// Identity signer for tests: zero-length signature, always verifies.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullKey;

impl PrivateKey for NullKey {
    fn update_sig_info<'a>(&'a self, sig_info: &mut SigInfo<'a>) {
        sig_info.sig_type = sig_types::NULL;
        sig_info.key_name = Name::default();
    }

    fn max_sig_len(&self) -> usize {
        0
    }

    fn sign(&self, _chunks: &[&[u8]], _sig: &mut [u8]) -> Result<usize> {
        Ok(0)
    }
}

impl PublicKey for NullKey {
    fn verify(&self, _chunks: &[&[u8]], _sig: &[u8]) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    fn sign_chunks(key: &dyn PrivateKey, chunks: &[&[u8]]) -> Vec<u8> {
        let mut buf = [0u8; MAX_SIG_BUF];
        let n = key.sign(chunks, &mut buf).unwrap();
        buf[..n].to_vec()
    }

    #[test]
    fn test_digest_key_sign_verify() {
        let key = DigestKey;
        let sig = sign_chunks(&key, &[b"hello", b" world"]);
        assert_eq!(sig.len(), 32);
        assert!(key.verify(&[b"hello", b" world"], &sig));
        assert!(key.verify(&[b"hello world"], &sig));
        assert!(!key.verify(&[b"hello"], &sig));
    }

    #[test]
    fn test_ecdsa_sign_verify_and_cross_key() {
        let mut buf = [0u8; 256];
        let mut region = Region::new(&mut buf);
        let name = Name::parse(&mut region, "/test/key").unwrap();
        let (pvt_a, pub_a) = EcdsaPrivateKey::generate(&name);
        let (_pvt_b, pub_b) = EcdsaPrivateKey::generate(&name);

        let sig = sign_chunks(&pvt_a, &[b"message"]);
        assert!(sig.len() <= MAX_ECDSA_SIG_LEN);
        assert!(pub_a.verify(&[b"message"], &sig));
        assert!(!pub_a.verify(&[b"other message"], &sig));
        assert!(!pub_b.verify(&[b"message"], &sig));
        assert!(!pub_a.verify(&[b"message"], &[0u8; 70]));
    }

    #[test]
    fn test_ecdsa_deterministic() {
        let mut buf = [0u8; 256];
        let mut region = Region::new(&mut buf);
        let name = Name::parse(&mut region, "/k").unwrap();
        let (pvt, _) = EcdsaPrivateKey::generate(&name);
        assert!(pvt.deterministic());
        assert_eq!(sign_chunks(&pvt, &[b"m"]), sign_chunks(&pvt, &[b"m"]));
    }

    #[test]
    fn test_ecdsa_pkcs8_roundtrip() {
        let mut buf = [0u8; 256];
        let mut region = Region::new(&mut buf);
        let name = Name::parse(&mut region, "/k").unwrap();
        let (pvt, public) = EcdsaPrivateKey::generate(&name);

        let der = pvt.to_pkcs8().unwrap();
        let restored = EcdsaPrivateKey::from_pkcs8(&name, &der).unwrap();
        let sig = sign_chunks(&restored, &[b"m"]);
        assert!(public.verify(&[b"m"], &sig));

        let spki = public.to_spki().unwrap();
        let pub_restored = EcdsaPublicKey::from_spki(&name, &spki).unwrap();
        assert!(pub_restored.verify(&[b"m"], &sig));
        assert_eq!(public.to_sec1().len(), 65);
    }

    #[test]
    fn test_hmac_symmetric() {
        let a = HmacKey::new(b"shared secret");
        let b = HmacKey::new(b"shared secret");
        let other = HmacKey::new(b"different secret");

        let sig = sign_chunks(&a, &[b"m1", b"m2"]);
        assert_eq!(sig.len(), 32);
        assert!(b.verify(&[b"m1", b"m2"], &sig));
        assert!(!b.verify(&[b"m1"], &sig));
        assert!(!other.verify(&[b"m1", b"m2"], &sig));
        assert_eq!(sig, sign_chunks(&b, &[b"m1", b"m2"]));
    }

    #[test]
    fn test_null_key() {
        let key = NullKey;
        let mut buf = [0u8; 4];
        assert_eq!(key.sign(&[b"x"], &mut buf).unwrap(), 0);
        assert!(key.verify(&[b"anything"], &[]));
    }

    #[test]
    fn test_update_sig_info_types() {
        let mut si = SigInfo::default();
        DigestKey.update_sig_info(&mut si);
        assert_eq!(si.sig_type, sig_types::DIGEST_SHA256);
        assert!(si.key_name.is_empty());

        let mut buf = [0u8; 64];
        let mut region = Region::new(&mut buf);
        let name = Name::parse(&mut region, "/k").unwrap();
        let (pvt, _) = EcdsaPrivateKey::generate(&name);
        let mut si = SigInfo::default();
        pvt.update_sig_info(&mut si);
        assert_eq!(si.sig_type, sig_types::SHA256_WITH_ECDSA);
        assert_eq!(si.key_name.size(), 1);
    }
}
