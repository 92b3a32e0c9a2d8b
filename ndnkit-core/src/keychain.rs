use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

use log::debug;

use crate::decoder::{self, def};
use crate::encoder::{enc, Encoder};
use crate::error::{Error, Result};
use crate::name::Name;
use crate::packets::{Data, SigInfo, CONTENT_TYPE_KEY};
use crate::port;
use crate::region::Region;
use crate::signature::{EcdsaPrivateKey, EcdsaPublicKey};
use crate::tlv::{tlv_types, Tlv};

/// Certificate validity window, encoded as 15-character UTC timestamps
/// (`YYYYMMDDThhmmss`) in seconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityPeriod {
    pub not_before: u64,
    pub not_after: u64,
}

impl ValidityPeriod {
    /// The widest encodable window.
    pub fn max() -> Self {
        Self {
            not_before: 0,
            not_after: timestamp_from_civil(9999, 12, 31, 23, 59, 59),
        }
    }

    pub fn includes(&self, t: u64) -> bool {
        self.not_before <= t && t <= self.not_after
    }

    pub(crate) fn encode_to(&self, encoder: &mut Encoder<'_>) {
        let not_before = to_timestamp(self.not_before);
        let not_after = to_timestamp(self.not_after);
        encoder.prepend_tlv(
            tlv_types::VALIDITY_PERIOD,
            (
                enc(|e| {
                    e.prepend_tlv(tlv_types::NOT_BEFORE, not_before.as_slice());
                }),
                enc(|e| {
                    e.prepend_tlv(tlv_types::NOT_AFTER, not_after.as_slice());
                }),
            ),
        );
    }

    pub fn decode_from(input: &Tlv<'_>) -> Result<Self> {
        let mut not_before = 0u64;
        let mut not_after = 0u64;
        decoder::decode(
            input,
            &[tlv_types::VALIDITY_PERIOD],
            (
                def(tlv_types::NOT_BEFORE, |d: &Tlv| {
                    not_before = parse_timestamp(d.value)?;
                    Ok(())
                }),
                def(tlv_types::NOT_AFTER, |d: &Tlv| {
                    not_after = parse_timestamp(d.value)?;
                    Ok(())
                }),
            ),
        )?;
        Ok(Self {
            not_before,
            not_after,
        })
    }
}

impl fmt::Display for ValidityPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let not_before = to_timestamp(self.not_before);
        let not_after = to_timestamp(self.not_after);
        write!(
            f,
            "{} - {}",
            String::from_utf8_lossy(&not_before),
            String::from_utf8_lossy(&not_after)
        )
    }
}

// Civil-date conversion after Howard Hinnant's algorithms.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

fn days_from_civil(y: i64, m: u32, d: u32) -> i64 {
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u64;
    let mp = if m > 2 { m - 3 } else { m + 9 } as u64;
    let doy = (153 * mp + 2) / 5 + u64::from(d) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe as i64 - 719_468
}

fn timestamp_from_civil(y: i64, mo: u32, d: u32, h: u64, mi: u64, s: u64) -> u64 {
    days_from_civil(y, mo, d) as u64 * 86_400 + h * 3600 + mi * 60 + s
}

fn to_timestamp(t: u64) -> [u8; 15] {
    let (y, mo, d) = civil_from_days((t / 86_400) as i64);
    let secs = t % 86_400;
    let mut out = [0u8; 15];
    write_digits(&mut out[0..4], y as u64);
    write_digits(&mut out[4..6], u64::from(mo));
    write_digits(&mut out[6..8], u64::from(d));
    out[8] = b'T';
    write_digits(&mut out[9..11], secs / 3600);
    write_digits(&mut out[11..13], (secs / 60) % 60);
    write_digits(&mut out[13..15], secs % 60);
    out
}

fn write_digits(out: &mut [u8], mut n: u64) {
    for b in out.iter_mut().rev() {
        *b = b'0' + (n % 10) as u8;
        n /= 10;
    }
}

fn parse_timestamp(s: &[u8]) -> Result<u64> {
    if s.len() != 15 || s[8] != b'T' {
        return Err(Error::BadFormat);
    }
    let y = parse_digits(&s[0..4])?;
    let mo = parse_digits(&s[4..6])?;
    let d = parse_digits(&s[6..8])?;
    let h = parse_digits(&s[9..11])?;
    let mi = parse_digits(&s[11..13])?;
    let sec = parse_digits(&s[13..15])?;
    if mo < 1 || mo > 12 || d < 1 || d > 31 || h > 23 || mi > 59 || sec > 59 {
        return Err(Error::BadFormat);
    }
    Ok(timestamp_from_civil(y as i64, mo as u32, d as u32, h, mi, sec))
}

fn parse_digits(s: &[u8]) -> Result<u64> {
    let mut n = 0u64;
    for &b in s {
        if !b.is_ascii_digit() {
            return Err(Error::BadFormat);
        }
        n = n * 10 + u64::from(b - b'0');
    }
    Ok(n)
}

/// Slot ids are non-empty lowercase alphanumeric.
pub fn check_slot_id(id: &str) -> Result<()> {
    if !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        Ok(())
    } else {
        Err(Error::BadFormat)
    }
}

const NS_KEYS: &str = "keys";
const NS_CERTS: &str = "certs";

/// Storage behind the keychain: namespaced slots holding opaque blobs.
pub trait StoreBackend {
    fn get(&self, namespace: &str, id: &str) -> Result<Vec<u8>>;
    fn set(&mut self, namespace: &str, id: &str, blob: &[u8]) -> Result<()>;
}

/// One file per slot under `<root>/<namespace>/<id>`, written atomically
/// via `<id>.tmp` then rename.
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl StoreBackend for FsBackend {
    fn get(&self, namespace: &str, id: &str) -> Result<Vec<u8>> {
        let path = self.root.join(namespace).join(id);
        match fs::read(&path) {
            Ok(blob) => Ok(blob),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::NotFound),
            Err(e) => Err(Error::IoError(e)),
        }
    }

    fn set(&mut self, namespace: &str, id: &str, blob: &[u8]) -> Result<()> {
        let dir = self.root.join(namespace);
        fs::create_dir_all(&dir)?;
        let tmp = dir.join(format!("{id}.tmp"));
        fs::write(&tmp, blob)?;
        fs::rename(&tmp, dir.join(id))?;
        debug!("keychain wrote {namespace}/{id} ({} bytes)", blob.len());
        Ok(())
    }
}

/// In-memory backend for tests and ephemeral keychains.
#[derive(Default)]
pub struct MemBackend {
    entries: HashMap<(String, String), Vec<u8>>,
}

impl StoreBackend for MemBackend {
    fn get(&self, namespace: &str, id: &str) -> Result<Vec<u8>> {
        self.entries
            .get(&(namespace.to_string(), id.to_string()))
            .cloned()
            .ok_or(Error::NotFound)
    }

    fn set(&mut self, namespace: &str, id: &str, blob: &[u8]) -> Result<()> {
        self.entries
            .insert((namespace.to_string(), id.to_string()), blob.to_vec());
        Ok(())
    }
}

/// Named-slot store for keys and certificates over a pluggable backend.
/// The façade validates slot ids and folds backend failures into
/// `{NotFound, IoError, BadFormat}`.
pub struct KeyChain<B: StoreBackend> {
    backend: B,
}

impl<B: StoreBackend> KeyChain<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn get_key(&self, id: &str) -> Result<Vec<u8>> {
        check_slot_id(id)?;
        self.backend.get(NS_KEYS, id)
    }

    pub fn set_key(&mut self, id: &str, blob: &[u8]) -> Result<()> {
        check_slot_id(id)?;
        self.backend.set(NS_KEYS, id, blob)
    }

    pub fn get_cert(&self, id: &str) -> Result<Vec<u8>> {
        check_slot_id(id)?;
        self.backend.get(NS_CERTS, id)
    }

    pub fn set_cert(&mut self, id: &str, blob: &[u8]) -> Result<()> {
        check_slot_id(id)?;
        self.backend.set(NS_CERTS, id, blob)
    }
}

/// Minimal NDN certificates: a certificate is a Data packet named
/// `<subject>/KEY/<key-id>/<issuer>/<version>` whose content is the
/// SubjectPublicKeyInfo DER of an ECDSA-P256 key, with the validity window
/// carried in DSigInfo.
pub mod certificate {
    use super::*;

    /// Self-issued certificates use this issuer component.
    pub const ISSUER_SELF: &[u8] = b"self";

    /// `<subject>/KEY/<key-id>` with a random 8-byte key id.
    pub fn make_key_name<'a>(region: &mut Region<'a>, subject: &Name<'_>) -> Result<Name<'a>> {
        let mut key_id = [0u8; 8];
        if !port::RandomSource::generate(&mut key_id) {
            return Err(Error::Unsupported);
        }
        subject
            .append_component(region, tlv_types::GENERIC_NAME_COMPONENT, b"KEY")?
            .append_component(region, tlv_types::GENERIC_NAME_COMPONENT, &key_id)
    }

    /// `<key-name>/<issuer>/<version>`.
    pub fn make_cert_name<'a>(
        region: &mut Region<'a>,
        key_name: &Name<'_>,
        issuer_id: &[u8],
        version: u64,
    ) -> Result<Name<'a>> {
        key_name
            .append_component(region, tlv_types::GENERIC_NAME_COMPONENT, issuer_id)?
            .append_component(
                region,
                tlv_types::VERSION_NAME_COMPONENT,
                &version.to_be_bytes(),
            )
    }

    /// Build and sign a certificate, returning its wire encoding backed by
    /// `region`.
    pub fn build<'a>(
        region: &mut Region<'a>,
        name: Name<'a>,
        validity: ValidityPeriod,
        public_key: &EcdsaPublicKey,
        signer: &EcdsaPrivateKey,
    ) -> Result<&'a [u8]> {
        let spki = public_key.to_spki()?;
        let content = region.dup(&spki)?;
        let mut data = Data::new(name);
        data.content = content;
        data.content_type = CONTENT_TYPE_KEY;
        data.freshness_period = 3_600_000;

        let sig_info = SigInfo {
            validity: Some(validity),
            ..SigInfo::default()
        };
        let mut encoder = Encoder::new(region);
        encoder.prepend(data.sign_with_info(signer, sig_info));
        encoder.into_output(region).ok_or(Error::OutOfRegion)
    }

    /// Self-sign `public_key` with its own private half.
    pub fn self_sign<'a>(
        region: &mut Region<'a>,
        validity: ValidityPeriod,
        private_key: &EcdsaPrivateKey,
        public_key: &EcdsaPublicKey,
    ) -> Result<&'a [u8]> {
        let name = make_cert_name(region, &private_key.name(), ISSUER_SELF, 1)?;
        build(region, name, validity, public_key, private_key)
    }

    /// Issuer name recorded in the certificate's key locator.
    pub fn issuer<'a>(cert: &Data<'a>) -> Option<Name<'a>> {
        cert.sig_info.as_ref().map(|si| si.key_name)
    }

    /// Validity window of a decoded certificate.
    pub fn validity(cert: &Data<'_>) -> Option<ValidityPeriod> {
        cert.sig_info.as_ref().and_then(|si| si.validity)
    }

    /// Extract the public key from a decoded certificate.
    pub fn public_key(cert: &Data<'_>) -> Result<EcdsaPublicKey> {
        if cert.content_type != CONTENT_TYPE_KEY {
            return Err(Error::BadFormat);
        }
        EcdsaPublicKey::from_spki(&cert.name, cert.content)
    }
}
