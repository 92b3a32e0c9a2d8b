use std::cell::Cell;

use crate::decoder::{self, def, def_nni};
use crate::encoder::{enc, Encodable, Encoder, Nni, Nni1, Nni4};
use crate::error::{Error, Result};
use crate::keychain::ValidityPeriod;
use crate::name::{Name, NameCmp};
use crate::port;
use crate::signature::{PrivateKey, PublicKey, MAX_SIG_BUF};
use crate::tlv::{self, tlv_types, NniWidth, Tlv};

/// Byte offset of `inner` within `outer`. `inner` must be a subslice of
/// `outer`, which holds for every TLV handed out by the decoder.
fn offset_in(outer: &[u8], inner: &[u8]) -> usize {
    inner.as_ptr() as usize - outer.as_ptr() as usize
}

/// Signature metadata carried in ISigInfo (Interest) or DSigInfo (Data).
///
/// `extensions` is an opaque view of trailing unrecognized TLVs, captured
/// on decode and re-emitted verbatim on encode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SigInfo<'a> {
    pub sig_type: u8,
    pub key_name: Name<'a>,
    pub nonce: Option<&'a [u8]>,
    pub time: Option<u64>,
    pub seq_num: Option<u64>,
    pub validity: Option<ValidityPeriod>,
    pub extensions: &'a [u8],
}

impl<'a> SigInfo<'a> {
    pub(crate) fn encode_as<'e>(&self, encoder: &mut Encoder<'e>, typ: u32) {
        encoder.prepend_tlv(
            typ,
            (
                enc(|e| {
                    e.prepend_tlv(tlv_types::SIGNATURE_TYPE, Nni(u64::from(self.sig_type)));
                }),
                enc(|e| {
                    if !self.key_name.is_empty() {
                        e.prepend_tlv(tlv_types::KEY_LOCATOR, self.key_name);
                    }
                }),
                enc(|e| {
                    if let Some(nonce) = self.nonce {
                        e.prepend_tlv(tlv_types::SIGNATURE_NONCE, nonce);
                    }
                }),
                enc(|e| {
                    if let Some(time) = self.time {
                        e.prepend_tlv(tlv_types::SIGNATURE_TIME, Nni(time));
                    }
                }),
                enc(|e| {
                    if let Some(seq) = self.seq_num {
                        e.prepend_tlv(tlv_types::SIGNATURE_SEQ_NUM, Nni(seq));
                    }
                }),
                enc(|e| {
                    if let Some(vp) = &self.validity {
                        vp.encode_to(e);
                    }
                }),
                self.extensions,
            ),
        );
    }

    pub fn decode_from(input: &Tlv<'a>) -> Result<SigInfo<'a>> {
        let mut sig_type = 0u8;
        let mut key_name = Name::default();
        let mut nonce: Option<&'a [u8]> = None;
        let mut time: Option<u64> = None;
        let mut seq_num: Option<u64> = None;
        let mut validity: Option<ValidityPeriod> = None;
        let ext_start: Cell<Option<usize>> = Cell::new(None);

        decoder::decode_with_unknown(
            input,
            &[tlv_types::ISIG_INFO, tlv_types::DSIG_INFO],
            (
                def_nni(tlv_types::SIGNATURE_TYPE, NniWidth::Variable, &mut sig_type),
                def(tlv_types::KEY_LOCATOR, |d: &Tlv<'a>| {
                    decoder::decode_with_unknown(
                        d,
                        &[tlv_types::KEY_LOCATOR],
                        def(tlv_types::NAME, |dd: &Tlv<'a>| {
                            key_name = Name::from_tlv(dd)?;
                            Ok(())
                        }),
                        |dd| Ok(dd.typ == tlv_types::KEY_DIGEST),
                    )
                }),
                def(tlv_types::SIGNATURE_NONCE, |d: &Tlv<'a>| {
                    nonce = Some(d.value);
                    Ok(())
                }),
                def(tlv_types::SIGNATURE_TIME, |d: &Tlv<'a>| {
                    time = Some(tlv::read_nni(d.value, NniWidth::Variable)?);
                    Ok(())
                }),
                def(tlv_types::SIGNATURE_SEQ_NUM, |d: &Tlv<'a>| {
                    seq_num = Some(tlv::read_nni(d.value, NniWidth::Variable)?);
                    Ok(())
                }),
                def(tlv_types::VALIDITY_PERIOD, |d: &Tlv<'a>| {
                    validity = Some(ValidityPeriod::decode_from(d)?);
                    Ok(())
                }),
            ),
            |d| {
                if ext_start.get().is_none() {
                    ext_start.set(Some(offset_in(input.value, d.wire)));
                }
                Ok(true)
            },
        )?;

        let extensions = match ext_start.get() {
            Some(off) => &input.value[off..],
            None => &[][..],
        };
        Ok(SigInfo {
            sig_type,
            key_name,
            nonce,
            time,
            seq_num,
            validity,
            extensions,
        })
    }
}

/// Sub-record of a parameterized or signed Interest, present only on a
/// decoded packet. The byte-range views are contiguous slices of the
/// original wire buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterestParams<'a> {
    pub app_parameters: &'a [u8],
    pub sig_info: Option<SigInfo<'a>>,
    pub sig_value: &'a [u8],
    /// AppParameters TLV through the field preceding ISigValue.
    pub signed_params: &'a [u8],
    /// AppParameters TLV through the end of the Interest.
    pub all_params: &'a [u8],
}

pub const DEFAULT_INTEREST_LIFETIME: u16 = 4000;
pub const MAX_HOP_LIMIT: u8 = 0xFF;

/// Interest packet.
///
/// Field views borrow the buffer the packet was decoded from, or the
/// region its name was built in; the packet is valid only while that
/// memory is.
#[derive(Debug, Clone, PartialEq)]
pub struct Interest<'a> {
    pub name: Name<'a>,
    pub nonce: u32,
    pub lifetime: u16,
    pub hop_limit: u8,
    pub can_be_prefix: bool,
    pub must_be_fresh: bool,
    pub nack_reason: u8,
    /// Only relevant on a decoded packet.
    pub params: Option<InterestParams<'a>>,
}

impl<'a> Interest<'a> {
    /// New Interest with a random nonce and default selectors.
    pub fn new(name: Name<'a>) -> Self {
        let mut nonce = [0u8; 4];
        if !port::RandomSource::generate(&mut nonce) {
            nonce = [0; 4];
        }
        Self {
            name,
            nonce: u32::from_be_bytes(nonce),
            lifetime: DEFAULT_INTEREST_LIFETIME,
            hop_limit: MAX_HOP_LIMIT,
            can_be_prefix: false,
            must_be_fresh: false,
            nack_reason: 0,
            params: None,
        }
    }

    /// AppParameters of a decoded packet.
    pub fn app_parameters(&self) -> &'a [u8] {
        self.params.as_ref().map_or(&[], |p| p.app_parameters)
    }

    /// SignatureInfo of a decoded packet.
    pub fn sig_info(&self) -> Option<&SigInfo<'a>> {
        self.params.as_ref().and_then(|p| p.sig_info.as_ref())
    }

    /// Add AppParameters, producing an encodable view. The name may carry
    /// zero or one ParametersSha256DigestComponent placeholder; the
    /// computed digest is substituted there, or appended.
    pub fn parameterize<'s>(&'s self, app_parameters: &'s [u8]) -> ParameterizedInterest<'s>
    where
        'a: 's,
    {
        ParameterizedInterest {
            interest: self,
            app_parameters,
        }
    }

    /// Sign without AppParameters. If the name carries a digest
    /// placeholder it must be the last component, otherwise the encode
    /// fails. To sign with AppParameters, go through
    /// [`Interest::parameterize`] first.
    pub fn sign<'s>(&'s self, key: &'s dyn PrivateKey) -> SignedInterest<'s>
    where
        'a: 's,
    {
        self.parameterize(&[]).sign(key)
    }

    /// Decode from the outermost TLV. Views into `input` are retained.
    pub fn decode(input: &Tlv<'a>) -> Result<Interest<'a>> {
        let mut name = Name::default();
        let mut can_be_prefix = false;
        let mut must_be_fresh = false;
        let mut nonce = 0u32;
        let mut lifetime = DEFAULT_INTEREST_LIFETIME;
        let mut hop_limit = MAX_HOP_LIMIT;
        let mut app_parameters: &'a [u8] = &[];
        let mut sig_info: Option<SigInfo<'a>> = None;
        let mut sig_value: &'a [u8] = &[];
        let params_off: Cell<Option<usize>> = Cell::new(None);
        let sig_value_off: Cell<Option<usize>> = Cell::new(None);

        decoder::decode(
            input,
            &[tlv_types::INTEREST],
            (
                def(tlv_types::NAME, |d: &Tlv<'a>| {
                    name = Name::from_tlv(d)?;
                    Ok(())
                }),
                def(tlv_types::CAN_BE_PREFIX, |_d: &Tlv<'a>| {
                    can_be_prefix = true;
                    Ok(())
                }),
                def(tlv_types::MUST_BE_FRESH, |_d: &Tlv<'a>| {
                    must_be_fresh = true;
                    Ok(())
                }),
                def_nni(tlv_types::NONCE, NniWidth::Fixed4, &mut nonce),
                def_nni(tlv_types::INTEREST_LIFETIME, NniWidth::Variable, &mut lifetime),
                def_nni(tlv_types::HOP_LIMIT, NniWidth::Fixed1, &mut hop_limit),
                def(tlv_types::APP_PARAMETERS, |d: &Tlv<'a>| {
                    params_off.set(Some(offset_in(input.value, d.wire)));
                    app_parameters = d.value;
                    Ok(())
                })
                .in_order(1),
                def(tlv_types::ISIG_INFO, |d: &Tlv<'a>| {
                    if params_off.get().is_none() {
                        return Err(Error::BadFormat);
                    }
                    sig_info = Some(SigInfo::decode_from(d)?);
                    Ok(())
                })
                .in_order(2),
                def(tlv_types::ISIG_VALUE, |d: &Tlv<'a>| {
                    if params_off.get().is_none() {
                        return Err(Error::BadFormat);
                    }
                    sig_value_off.set(Some(offset_in(input.value, d.wire)));
                    sig_value = d.value;
                    Ok(())
                })
                .in_order(3),
            ),
        )?;

        let params = params_off.get().map(|off| InterestParams {
            app_parameters,
            sig_info,
            sig_value,
            signed_params: match sig_value_off.get() {
                Some(end) => &input.value[off..end],
                None => &[][..],
            },
            all_params: &input.value[off..],
        });

        Ok(Interest {
            name,
            nonce,
            lifetime,
            hop_limit,
            can_be_prefix,
            must_be_fresh,
            nack_reason: 0,
            params,
        })
    }

    /// Recompute the parameters digest of a decoded packet and compare it
    /// to the digest component, in constant time.
    pub fn check_digest(&self) -> bool {
        let Some(params) = &self.params else {
            return false;
        };
        let Some(pos) = find_params_digest(&self.name) else {
            return false;
        };
        let Some(comp) = self.name.get(pos as isize) else {
            return false;
        };
        let digest = port::sha256_chunks(&[params.all_params]);
        port::timing_safe_equal(&digest, comp.value())
    }

    /// Verify a decoded signed Interest against a public key.
    pub fn verify(&self, key: &dyn PublicKey) -> bool {
        if !self.check_digest() {
            return false;
        }
        let Some(pos) = find_params_digest(&self.name) else {
            return false;
        };
        if pos + 1 != self.name.size() {
            return false;
        }
        let Some(params) = &self.params else {
            return false;
        };
        let signed_name = self.name.get_prefix(-1);
        key.verify(
            &[signed_name.value(), params.signed_params],
            params.sig_value,
        )
    }

    /// Determine whether `data` can satisfy this Interest.
    pub fn match_data(&self, data: &Data<'_>) -> bool {
        if self.must_be_fresh && data.freshness_period == 0 {
            return false;
        }
        match self.name.compare(&data.name) {
            NameCmp::Equal => true,
            NameCmp::LPrefix => self.can_be_prefix,
            NameCmp::RPrefix => {
                if self.name.size() != data.name.size() + 1 {
                    return false;
                }
                let Some(last) = self.name.get(-1) else {
                    return false;
                };
                if !last.is_implicit_digest() {
                    return false;
                }
                match data.compute_implicit_digest() {
                    Some(digest) => port::timing_safe_equal(&digest, last.value()),
                    None => false,
                }
            }
            _ => false,
        }
    }

    fn encode_middle<'e>(&self, encoder: &mut Encoder<'e>) {
        encoder.prepend((
            enc(|e| {
                if self.can_be_prefix {
                    e.prepend_tlv(tlv_types::CAN_BE_PREFIX, ());
                }
            }),
            enc(|e| {
                if self.must_be_fresh {
                    e.prepend_tlv(tlv_types::MUST_BE_FRESH, ());
                }
            }),
            enc(|e| {
                e.prepend_tlv(tlv_types::NONCE, Nni4(self.nonce));
            }),
            enc(|e| {
                if self.lifetime != DEFAULT_INTEREST_LIFETIME {
                    e.prepend_tlv(tlv_types::INTEREST_LIFETIME, Nni(u64::from(self.lifetime)));
                }
            }),
            enc(|e| {
                if self.hop_limit != MAX_HOP_LIMIT {
                    e.prepend_tlv(tlv_types::HOP_LIMIT, Nni1(self.hop_limit));
                }
            }),
        ));
    }
}

/// Encode without AppParameters. Fields recorded in `params` during a
/// previous decode are not preserved.
impl<'e, 'p> Encodable<'e> for &Interest<'p> {
    fn encode_to(&self, encoder: &mut Encoder<'e>) {
        encoder.prepend_tlv(
            tlv_types::INTEREST,
            (self.name, enc(|e| self.encode_middle(e))),
        );
    }
}

fn find_params_digest(name: &Name<'_>) -> Option<usize> {
    name.iter()
        .position(|c| c.typ() == tlv_types::PARAMETERS_SHA256_DIGEST_COMPONENT)
}

/// Write the packet name with the parameters digest substituted into the
/// placeholder slot, or appended when there is none. `lo..hi` is the
/// already-encoded parameters range being digested.
fn encode_digest_name<'e>(interest: &Interest<'_>, encoder: &mut Encoder<'e>, lo: usize, hi: usize) {
    let digest = {
        let mut hash = port::Sha256::new();
        hash.update(encoder.between(lo, hi));
        hash.finish()
    };
    let mut comp = [0u8; 2 + port::SHA256_LEN];
    comp[0] = tlv_types::PARAMETERS_SHA256_DIGEST_COMPONENT as u8;
    comp[1] = port::SHA256_LEN as u8;
    comp[2..].copy_from_slice(&digest);

    let name = &interest.name;
    match find_params_digest(name) {
        Some(pos) => {
            let prefix = name.slice(0, pos);
            let suffix = name.suffix(pos + 1);
            encoder.prepend_tlv(
                tlv_types::NAME,
                (prefix.value(), comp.as_slice(), suffix.value()),
            );
        }
        None => {
            encoder.prepend_tlv(tlv_types::NAME, (name.value(), comp.as_slice()));
        }
    }
}

/// Shared layout of parameterized and signed Interests: Name with digest,
/// middle fields, then the parameters section written by `encode_params`.
fn encode_parameterized<'e>(
    interest: &Interest<'_>,
    encoder: &mut Encoder<'e>,
    encode_params: impl Fn(&mut Encoder<'e>),
) {
    let params_range = Cell::new((0usize, 0usize));
    encoder.prepend_tlv(
        tlv_types::INTEREST,
        (
            enc(|e| {
                let (lo, hi) = params_range.get();
                encode_digest_name(interest, e, lo, hi);
            }),
            enc(|e| interest.encode_middle(e)),
            enc(|e| {
                let hi = e.mark();
                encode_params(e);
                if e.ok() {
                    params_range.set((e.mark(), hi));
                }
            }),
        ),
    );
}

/// Transient encodable view of an Interest with AppParameters. Valid only
/// while the Interest and the parameters are; pass it to an encoder right
/// away.
#[derive(Clone, Copy)]
pub struct ParameterizedInterest<'s> {
    interest: &'s Interest<'s>,
    app_parameters: &'s [u8],
}

impl<'s> ParameterizedInterest<'s> {
    /// Sign with `key`, producing a signed-Interest view.
    pub fn sign(self, key: &'s dyn PrivateKey) -> SignedInterest<'s> {
        self.sign_with_info(key, SigInfo::default())
    }

    /// Sign with a caller-prepared SigInfo (nonce, time, extensions).
    pub fn sign_with_info(
        self,
        key: &'s dyn PrivateKey,
        sig_info: SigInfo<'s>,
    ) -> SignedInterest<'s> {
        SignedInterest {
            interest: self.interest,
            app_parameters: self.app_parameters,
            key,
            sig_info,
        }
    }
}

impl<'e, 's> Encodable<'e> for ParameterizedInterest<'s> {
    fn encode_to(&self, encoder: &mut Encoder<'e>) {
        let app_parameters = self.app_parameters;
        encode_parameterized(self.interest, encoder, |e| {
            e.prepend_tlv(tlv_types::APP_PARAMETERS, app_parameters);
        });
    }
}

/// Transient encodable view of a signed Interest. Valid only while the
/// Interest and the key are.
pub struct SignedInterest<'s> {
    interest: &'s Interest<'s>,
    app_parameters: &'s [u8],
    key: &'s dyn PrivateKey,
    sig_info: SigInfo<'s>,
}

impl<'e, 's> Encodable<'e> for SignedInterest<'s> {
    fn encode_to(&self, encoder: &mut Encoder<'e>) {
        let name = &self.interest.name;
        let signed_name = match find_params_digest(name) {
            None => *name,
            Some(pos) if pos + 1 == name.size() => name.get_prefix(-1),
            Some(_) => {
                // The digest placeholder must be the last component.
                encoder.set_error();
                return;
            }
        };
        let mut sig_info = self.sig_info.clone();
        self.key.update_sig_info(&mut sig_info);

        // First pass: lay out the signed portion at the tail of the
        // buffer, so it can be hashed in place.
        let after = encoder.mark();
        encoder.prepend((
            enc(|e| {
                e.prepend_tlv(tlv_types::APP_PARAMETERS, self.app_parameters);
            }),
            enc(|e| sig_info.encode_as(e, tlv_types::ISIG_INFO)),
        ));
        if !encoder.ok() {
            return;
        }
        let lo = encoder.mark();

        let max = self.key.max_sig_len();
        if max > MAX_SIG_BUF {
            encoder.set_error();
            return;
        }
        let mut sig_buf = [0u8; MAX_SIG_BUF];
        let sig_len = {
            let portion = encoder.between(lo, after);
            match self.key.sign(&[signed_name.value(), portion], &mut sig_buf[..max]) {
                Ok(n) if n <= max => n,
                _ => {
                    encoder.set_error();
                    return;
                }
            }
        };

        // Second pass: the signature is known, encode the real packet.
        // The signed portion re-encodes to identical bytes, so the digest
        // in the name covers exactly what was signed.
        encoder.rewind(after);
        let sig = &sig_buf[..sig_len];
        encode_parameterized(self.interest, encoder, |e| {
            e.prepend((
                enc(|e| {
                    e.prepend_tlv(tlv_types::APP_PARAMETERS, self.app_parameters);
                }),
                enc(|e| sig_info.encode_as(e, tlv_types::ISIG_INFO)),
                enc(|e| {
                    e.prepend_tlv(tlv_types::ISIG_VALUE, sig);
                }),
            ));
        });
    }
}

pub const DEFAULT_CONTENT_TYPE: u8 = 0;
/// ContentType of a certificate.
pub const CONTENT_TYPE_KEY: u8 = 2;

/// Data packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Data<'a> {
    pub name: Name<'a>,
    pub content: &'a [u8],
    pub freshness_period: u32,
    pub content_type: u8,
    pub is_final_block: bool,
    /// Only relevant on a decoded packet.
    pub sig_info: Option<SigInfo<'a>>,
    /// Only relevant on a decoded packet.
    pub sig_value: &'a [u8],
    signed_portion: &'a [u8],
    wire: Option<&'a [u8]>,
}

impl<'a> Data<'a> {
    pub fn new(name: Name<'a>) -> Self {
        Self {
            name,
            content: &[],
            freshness_period: 0,
            content_type: DEFAULT_CONTENT_TYPE,
            is_final_block: false,
            sig_info: None,
            sig_value: &[],
            signed_portion: &[],
            wire: None,
        }
    }

    /// Sign with `key`, producing an encodable view.
    pub fn sign<'s>(&'s self, key: &'s dyn PrivateKey) -> SignedData<'s>
    where
        'a: 's,
    {
        self.sign_with_info(key, SigInfo::default())
    }

    pub fn sign_with_info<'s>(
        &'s self,
        key: &'s dyn PrivateKey,
        sig_info: SigInfo<'s>,
    ) -> SignedData<'s>
    where
        'a: 's,
    {
        SignedData {
            data: self,
            key,
            sig_info,
        }
    }

    /// Decode from the outermost TLV. Views into `input` are retained.
    pub fn decode(input: &Tlv<'a>) -> Result<Data<'a>> {
        let mut name = Name::default();
        let mut content: &'a [u8] = &[];
        let mut freshness_period = 0u32;
        let mut content_type = DEFAULT_CONTENT_TYPE;
        let mut final_block_id: Option<&'a [u8]> = None;
        let mut sig_info: Option<SigInfo<'a>> = None;
        let mut sig_value: &'a [u8] = &[];
        let sig_value_off: Cell<Option<usize>> = Cell::new(None);

        decoder::decode(
            input,
            &[tlv_types::DATA],
            (
                def(tlv_types::NAME, |d: &Tlv<'a>| {
                    name = Name::from_tlv(d)?;
                    Ok(())
                }),
                def(tlv_types::META_INFO, |d: &Tlv<'a>| {
                    decoder::decode(
                        d,
                        &[tlv_types::META_INFO],
                        (
                            def_nni(tlv_types::CONTENT_TYPE, NniWidth::Variable, &mut content_type),
                            def_nni(
                                tlv_types::FRESHNESS_PERIOD,
                                NniWidth::Variable,
                                &mut freshness_period,
                            ),
                            def(tlv_types::FINAL_BLOCK_ID, |dd: &Tlv<'a>| {
                                final_block_id = Some(dd.value);
                                Ok(())
                            }),
                        ),
                    )
                }),
                def(tlv_types::CONTENT, |d: &Tlv<'a>| {
                    content = d.value;
                    Ok(())
                }),
                def(tlv_types::DSIG_INFO, |d: &Tlv<'a>| {
                    sig_info = Some(SigInfo::decode_from(d)?);
                    Ok(())
                }),
                def(tlv_types::DSIG_VALUE, |d: &Tlv<'a>| {
                    sig_value_off.set(Some(offset_in(input.value, d.wire)));
                    sig_value = d.value;
                    Ok(())
                }),
            ),
        )?;

        let signed_portion = match sig_value_off.get() {
            Some(end) => &input.value[..end],
            None => &[][..],
        };
        let is_final_block = match (final_block_id, name.get(-1)) {
            (Some(v), Some(last)) => v == last.wire(),
            _ => false,
        };

        Ok(Data {
            name,
            content,
            freshness_period,
            content_type,
            is_final_block,
            sig_info,
            sig_value,
            signed_portion,
            wire: Some(input.wire),
        })
    }

    /// Verify a decoded packet against a public key.
    pub fn verify(&self, key: &dyn PublicKey) -> bool {
        !self.signed_portion.is_empty() && key.verify(&[self.signed_portion], self.sig_value)
    }

    /// SHA-256 of the full wire encoding; available on a decoded packet.
    pub fn compute_implicit_digest(&self) -> Option<[u8; port::SHA256_LEN]> {
        self.wire.map(|wire| port::sha256_chunks(&[wire]))
    }

    /// Whether `interest` can be satisfied by this Data.
    pub fn can_satisfy(&self, interest: &Interest<'_>) -> bool {
        interest.match_data(self)
    }

    fn encode_value<'e>(&self, encoder: &mut Encoder<'e>, sig_info: Option<&SigInfo<'_>>) {
        encoder.prepend((
            self.name,
            enc(|e| {
                e.prepend_tlv_omit_empty(
                    tlv_types::META_INFO,
                    (
                        enc(|e| {
                            if self.content_type != DEFAULT_CONTENT_TYPE {
                                e.prepend_tlv(
                                    tlv_types::CONTENT_TYPE,
                                    Nni(u64::from(self.content_type)),
                                );
                            }
                        }),
                        enc(|e| {
                            if self.freshness_period != 0 {
                                e.prepend_tlv(
                                    tlv_types::FRESHNESS_PERIOD,
                                    Nni(u64::from(self.freshness_period)),
                                );
                            }
                        }),
                        enc(|e| {
                            if self.is_final_block {
                                if let Some(comp) = self.name.get(-1) {
                                    e.prepend_tlv(tlv_types::FINAL_BLOCK_ID, comp.wire());
                                }
                            }
                        }),
                    ),
                );
            }),
            enc(|e| {
                e.prepend_tlv_omit_empty(tlv_types::CONTENT, self.content);
            }),
            enc(move |e| {
                if let Some(si) = sig_info {
                    si.encode_as(e, tlv_types::DSIG_INFO);
                }
            }),
        ));
    }
}

/// Encode without a signature. Signature fields recorded during a
/// previous decode are not preserved; use [`Data::sign`] to produce a
/// verifiable packet.
impl<'e, 'p> Encodable<'e> for &Data<'p> {
    fn encode_to(&self, encoder: &mut Encoder<'e>) {
        encoder.prepend_tlv(tlv_types::DATA, enc(|e| self.encode_value(e, None)));
    }
}

/// Transient encodable view of a signed Data packet.
pub struct SignedData<'s> {
    data: &'s Data<'s>,
    key: &'s dyn PrivateKey,
    sig_info: SigInfo<'s>,
}

impl<'e, 's> Encodable<'e> for SignedData<'s> {
    fn encode_to(&self, encoder: &mut Encoder<'e>) {
        let mut sig_info = self.sig_info.clone();
        self.key.update_sig_info(&mut sig_info);

        // First pass: lay out the signed portion (Name through DSigInfo)
        // at the buffer tail and sign it in place.
        let after = encoder.mark();
        self.data.encode_value(encoder, Some(&sig_info));
        if !encoder.ok() {
            return;
        }
        let lo = encoder.mark();

        let max = self.key.max_sig_len();
        if max > MAX_SIG_BUF {
            encoder.set_error();
            return;
        }
        let mut sig_buf = [0u8; MAX_SIG_BUF];
        let sig_len = {
            let portion = encoder.between(lo, after);
            match self.key.sign(&[portion], &mut sig_buf[..max]) {
                Ok(n) if n <= max => n,
                _ => {
                    encoder.set_error();
                    return;
                }
            }
        };

        // Second pass: identical signed portion plus the DSigValue.
        encoder.rewind(after);
        let sig = &sig_buf[..sig_len];
        encoder.prepend_tlv(
            tlv_types::DATA,
            (
                enc(|e| self.data.encode_value(e, Some(&sig_info))),
                enc(|e| {
                    e.prepend_tlv(tlv_types::DSIG_VALUE, sig);
                }),
            ),
        );
    }
}

/// Network-layer Nack reason codes.
pub mod nack_reason {
    pub const CONGESTION: u8 = 50;
    pub const DUPLICATE: u8 = 100;
    pub const NO_ROUTE: u8 = 150;
}

/// Nack packet: an Interest returned inside an NDNLPv2 LpPacket with a
/// reason code.
#[derive(Debug, Clone, PartialEq)]
pub struct Nack<'a> {
    pub interest: Interest<'a>,
}

impl<'a> Nack<'a> {
    pub fn new(mut interest: Interest<'a>, reason: u8) -> Self {
        interest.nack_reason = reason;
        Self { interest }
    }

    pub fn reason(&self) -> u8 {
        self.interest.nack_reason
    }

    pub fn name(&self) -> Name<'a> {
        self.interest.name
    }

    pub fn decode(input: &Tlv<'a>) -> Result<Nack<'a>> {
        let mut reason = 0u8;
        let mut interest: Option<Interest<'a>> = None;

        decoder::decode(
            input,
            &[tlv_types::LP_PACKET],
            (
                def(tlv_types::LP_NACK, |d: &Tlv<'a>| {
                    decoder::decode(
                        d,
                        &[tlv_types::LP_NACK],
                        def_nni(tlv_types::LP_NACK_REASON, NniWidth::Variable, &mut reason),
                    )
                }),
                def(tlv_types::LP_FRAGMENT, |d: &Tlv<'a>| {
                    let (inner, _) = tlv::read_tlv(d.value)?;
                    interest = Some(Interest::decode(&inner)?);
                    Ok(())
                }),
            ),
        )?;

        let mut interest = interest.ok_or(Error::BadFormat)?;
        interest.nack_reason = reason;
        Ok(Nack { interest })
    }
}

impl<'e, 'p> Encodable<'e> for &Nack<'p> {
    fn encode_to(&self, encoder: &mut Encoder<'e>) {
        let reason = self.interest.nack_reason;
        encoder.prepend_tlv(
            tlv_types::LP_PACKET,
            (
                enc(move |e| {
                    e.prepend_tlv(
                        tlv_types::LP_NACK,
                        enc(move |e| {
                            if reason != 0 {
                                e.prepend_tlv(tlv_types::LP_NACK_REASON, Nni(u64::from(reason)));
                            }
                        }),
                    );
                }),
                enc(|e| {
                    e.prepend_tlv(
                        tlv_types::LP_FRAGMENT,
                        enc(|e| {
                            e.prepend(&self.interest);
                        }),
                    );
                }),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;
    use crate::signature::{DigestKey, EcdsaPrivateKey, HmacKey, NullKey};

    fn encode_in<'a>(region: &mut Region<'a>, item: impl Encodable<'a>) -> &'a [u8] {
        let mut encoder = Encoder::new(region);
        assert!(encoder.prepend(item));
        encoder.into_output(region).unwrap()
    }

    fn decode_interest(wire: &[u8]) -> Interest<'_> {
        let (outer, _) = tlv::read_tlv(wire).unwrap();
        Interest::decode(&outer).unwrap()
    }

    fn decode_data(wire: &[u8]) -> Data<'_> {
        let (outer, _) = tlv::read_tlv(wire).unwrap();
        Data::decode(&outer).unwrap()
    }

    #[test]
    fn test_interest_default_wire() {
        let mut buf = [0u8; 128];
        let mut region = Region::new(&mut buf);
        let name = Name::parse(&mut region, "/A").unwrap();
        let mut interest = Interest::new(name);
        interest.nonce = 0x1122_3344;

        let wire = encode_in(&mut region, &interest);
        assert_eq!(
            wire,
            &[0x05, 0x0B, 0x07, 0x03, 0x08, 0x01, 0x41, 0x0A, 0x04, 0x11, 0x22, 0x33, 0x44]
        );
    }

    #[test]
    fn test_interest_roundtrip_with_selectors() {
        let mut buf = [0u8; 256];
        let mut region = Region::new(&mut buf);
        let name = Name::parse(&mut region, "/A/B").unwrap();
        let mut interest = Interest::new(name);
        interest.can_be_prefix = true;
        interest.must_be_fresh = true;
        interest.lifetime = 9000;
        interest.hop_limit = 16;

        let wire = encode_in(&mut region, &interest);
        let decoded = decode_interest(wire);
        assert_eq!(decoded, interest);
    }

    #[test]
    fn test_parameterized_interest_appends_digest() {
        let mut buf = [0u8; 256];
        let mut region = Region::new(&mut buf);
        let name = Name::parse(&mut region, "/A").unwrap();
        let interest = Interest::new(name);
        let app_params = [0xC0, 0x01, 0xFF];

        let wire = encode_in(&mut region, interest.parameterize(&app_params));

        let digest = port::sha256_chunks(&[&[0x24, 0x03, 0xC0, 0x01, 0xFF]]);
        let mut expected_name = vec![0x07, 0x25, 0x08, 0x01, 0x41, 0x02, 0x20];
        expected_name.extend_from_slice(&digest);
        assert_eq!(&wire[2..2 + expected_name.len()], &expected_name[..]);
        // AppParameters trails the middle fields.
        assert_eq!(&wire[wire.len() - 5..], &[0x24, 0x03, 0xC0, 0x01, 0xFF]);

        let decoded = decode_interest(wire);
        assert_eq!(decoded.app_parameters(), &app_params);
        assert!(decoded.check_digest());
        assert_eq!(decoded.name.size(), 2);
        assert!(decoded.name.get(-1).unwrap().is_params_digest());
    }

    #[test]
    fn test_parameterized_interest_substitutes_placeholder() {
        let mut buf = [0u8; 512];
        let mut region = Region::new(&mut buf);
        let name = Name::parse(&mut region, "/A").unwrap();
        let name = name
            .append_component(&mut region, 0x02, &[0u8; 32])
            .unwrap();
        let name = name.append_component(&mut region, 0x08, b"B").unwrap();
        let interest = Interest::new(name);

        let wire = encode_in(&mut region, interest.parameterize(&[0xC0, 0x01, 0xFF]));
        let decoded = decode_interest(wire);
        assert_eq!(decoded.name.size(), 3);
        // Placeholder slot carries the real digest, suffix kept.
        assert!(decoded.name.get(1).unwrap().is_params_digest());
        assert!(decoded.check_digest());
        assert_eq!(decoded.name.get(2).unwrap().value(), b"B");
    }

    #[test]
    fn test_signed_interest_digest_must_be_last() {
        let mut buf = [0u8; 512];
        let mut region = Region::new(&mut buf);
        let name = Name::parse(&mut region, "/A").unwrap();
        let with_placeholder = name
            .append_component(&mut region, 0x02, &[0u8; 32])
            .unwrap();
        let bad = with_placeholder
            .append_component(&mut region, 0x08, b"B")
            .unwrap();

        let interest = Interest::new(bad);
        let mut encoder = Encoder::new(&mut region);
        assert!(!encoder.prepend(interest.sign(&DigestKey)));
        assert!(!encoder.ok());
        encoder.discard(&mut region);

        // Truncated to /A/<placeholder>, signing succeeds and the digest
        // lands in the last component.
        let interest = Interest::new(with_placeholder);
        let wire = encode_in(&mut region, interest.sign(&DigestKey));
        let decoded = decode_interest(wire);
        assert_eq!(decoded.name.size(), 2);
        assert!(decoded.name.get(-1).unwrap().is_params_digest());
        assert!(decoded.check_digest());
        assert!(decoded.verify(&DigestKey));
    }

    #[test]
    fn test_signed_interest_ecdsa_roundtrip() {
        let mut buf = [0u8; 1024];
        let mut region = Region::new(&mut buf);
        let key_name = Name::parse(&mut region, "/issuer/KEY/1").unwrap();
        let (pvt, public) = EcdsaPrivateKey::generate(&key_name);
        let (_pvt_b, public_b) = EcdsaPrivateKey::generate(&key_name);

        let name = Name::parse(&mut region, "/A").unwrap();
        let interest = Interest::new(name);
        let app_params = [0xC0, 0x01, 0xFF];
        let wire = encode_in(&mut region, interest.parameterize(&app_params).sign(&pvt));

        let decoded = decode_interest(wire);
        assert_eq!(decoded.app_parameters(), &app_params);
        let sig_info = decoded.sig_info().unwrap();
        assert_eq!(sig_info.sig_type, crate::tlv::sig_types::SHA256_WITH_ECDSA);
        assert_eq!(sig_info.key_name.size(), 3);
        assert!(decoded.check_digest());
        assert!(decoded.verify(&public));
        assert!(!decoded.verify(&public_b));

        // Signed portion precedes ISigValue and both are wire slices.
        let params = decoded.params.as_ref().unwrap();
        assert!(params.all_params.len() > params.signed_params.len());
        assert_eq!(params.all_params[0], 0x24);
    }

    #[test]
    fn test_signed_interest_null_key_empty_signature() {
        let mut buf = [0u8; 512];
        let mut region = Region::new(&mut buf);
        let name = Name::parse(&mut region, "/A").unwrap();
        let interest = Interest::new(name);

        let wire = encode_in(&mut region, interest.sign(&NullKey));
        let decoded = decode_interest(wire);
        let params = decoded.params.as_ref().unwrap();
        assert!(params.sig_value.is_empty());
        assert!(decoded.verify(&NullKey));
    }

    #[test]
    fn test_match_rules() {
        let mut buf = [0u8; 1024];
        let mut region = Region::new(&mut buf);
        let name_a = Name::parse(&mut region, "/A").unwrap();
        let name_a1 = Name::parse(&mut region, "/A/1").unwrap();

        let data_a1 = {
            let data = Data::new(name_a1);
            let wire = encode_in(&mut region, &data);
            decode_data(wire)
        };

        let mut interest = Interest::new(name_a);
        interest.can_be_prefix = true;
        assert!(interest.match_data(&data_a1));
        interest.can_be_prefix = false;
        assert!(!interest.match_data(&data_a1));

        // Exact match.
        let data_a = {
            let data = Data::new(name_a);
            let wire = encode_in(&mut region, &data);
            decode_data(wire)
        };
        assert!(interest.match_data(&data_a));

        // Implicit digest: interest name extends the data name by the
        // digest of the full data encoding.
        let digest = data_a.compute_implicit_digest().unwrap();
        let digest_name = name_a
            .append_component(&mut region, 0x01, &digest)
            .unwrap();
        let digest_interest = Interest::new(digest_name);
        assert!(digest_interest.match_data(&data_a));

        // Wrong digest does not match.
        let wrong_name = name_a
            .append_component(&mut region, 0x01, &[0u8; 32])
            .unwrap();
        assert!(!Interest::new(wrong_name).match_data(&data_a));

        // MustBeFresh vs zero freshness loses regardless of name.
        let mut fresh_interest = Interest::new(name_a);
        fresh_interest.must_be_fresh = true;
        assert!(!fresh_interest.match_data(&data_a));
    }

    #[test]
    fn test_unknown_critical_field_rejected() {
        // Interest with child 0x09 (odd, <= 31): fatal.
        let wire = [0x05, 0x07, 0x07, 0x03, 0x08, 0x01, 0x41, 0x09, 0x00];
        let (outer, _) = tlv::read_tlv(&wire).unwrap();
        assert!(matches!(
            Interest::decode(&outer),
            Err(Error::UnexpectedCritical(0x09))
        ));

        // Child 0xFD00 (even, >= 32): ignored.
        let wire = [0x05, 0x09, 0x07, 0x03, 0x08, 0x01, 0x41, 0xFD, 0xFD, 0x00, 0x00];
        let (outer, _) = tlv::read_tlv(&wire).unwrap();
        let decoded = Interest::decode(&outer).unwrap();
        assert_eq!(decoded.name.size(), 1);
    }

    #[test]
    fn test_isig_value_without_app_parameters_rejected() {
        // ISigValue with no preceding AppParameters is malformed.
        let wire = [0x05, 0x07, 0x07, 0x03, 0x08, 0x01, 0x41, 0x2E, 0x00];
        let (outer, _) = tlv::read_tlv(&wire).unwrap();
        assert!(matches!(Interest::decode(&outer), Err(Error::BadFormat)));
    }

    #[test]
    fn test_data_roundtrip() {
        let mut buf = [0u8; 512];
        let mut region = Region::new(&mut buf);
        let name = Name::parse(&mut region, "/A/B/seg0").unwrap();
        let mut data = Data::new(name);
        data.content = b"hello";
        data.freshness_period = 15000;
        data.content_type = CONTENT_TYPE_KEY;
        data.is_final_block = true;

        let wire = encode_in(&mut region, &data);
        let decoded = decode_data(wire);
        assert_eq!(decoded.name, data.name);
        assert_eq!(decoded.content, b"hello");
        assert_eq!(decoded.freshness_period, 15000);
        assert_eq!(decoded.content_type, CONTENT_TYPE_KEY);
        assert!(decoded.is_final_block);
        assert!(decoded.compute_implicit_digest().is_some());
    }

    #[test]
    fn test_data_empty_content_omits_metainfo_and_content() {
        let mut buf = [0u8; 128];
        let mut region = Region::new(&mut buf);
        let name = Name::parse(&mut region, "/A").unwrap();
        let data = Data::new(name);
        let wire = encode_in(&mut region, &data);
        // Only the Name inside: MetaInfo and Content are omitted empty.
        assert_eq!(wire, &[0x06, 0x05, 0x07, 0x03, 0x08, 0x01, 0x41]);
    }

    #[test]
    fn test_data_sign_verify() {
        let mut buf = [0u8; 1024];
        let mut region = Region::new(&mut buf);
        let key_name = Name::parse(&mut region, "/issuer/KEY/1").unwrap();
        let (pvt_a, pub_a) = EcdsaPrivateKey::generate(&key_name);
        let (_pvt_b, pub_b) = EcdsaPrivateKey::generate(&key_name);

        let name = Name::parse(&mut region, "/A/B").unwrap();
        let mut data = Data::new(name);
        data.content = b"payload";

        let wire = encode_in(&mut region, data.sign(&pvt_a));
        let decoded = decode_data(wire);
        assert!(decoded.verify(&pub_a));
        assert!(!decoded.verify(&pub_b));
        assert_eq!(decoded.content, b"payload");
    }

    #[test]
    fn test_data_sign_extensions_roundtrip() {
        let mut buf = [0u8; 1024];
        let mut region = Region::new(&mut buf);
        let name = Name::parse(&mut region, "/A").unwrap();
        let data = Data::new(name);

        let ext = [0x20, 0x00];
        let key = HmacKey::new(b"k");
        let sig_info = SigInfo {
            extensions: &ext,
            ..SigInfo::default()
        };
        let wire = encode_in(&mut region, data.sign_with_info(&key, sig_info));
        let decoded = decode_data(wire);
        assert!(decoded.verify(&key));
        assert_eq!(decoded.sig_info.as_ref().unwrap().extensions, &ext);
    }

    #[test]
    fn test_deterministic_signing_byte_identical() {
        let mut buf = [0u8; 2048];
        let mut region = Region::new(&mut buf);
        let key_name = Name::parse(&mut region, "/k").unwrap();
        let (pvt, _) = EcdsaPrivateKey::generate(&key_name);
        assert!(pvt.deterministic());

        let name = Name::parse(&mut region, "/A/B").unwrap();
        let mut data = Data::new(name);
        data.content = b"payload";

        let wire_a = encode_in(&mut region, data.sign(&pvt));
        let wire_b = encode_in(&mut region, data.sign(&pvt));
        assert_eq!(wire_a, wire_b);
    }

    #[test]
    fn test_nack_roundtrip() {
        let mut buf = [0u8; 512];
        let mut region = Region::new(&mut buf);
        let name = Name::parse(&mut region, "/A").unwrap();
        let mut interest = Interest::new(name);
        interest.nonce = 7;
        let nack = Nack::new(interest, nack_reason::NO_ROUTE);

        let wire = encode_in(&mut region, &nack);
        let (outer, _) = tlv::read_tlv(wire).unwrap();
        let decoded = Nack::decode(&outer).unwrap();
        assert_eq!(decoded.reason(), nack_reason::NO_ROUTE);
        assert_eq!(decoded.interest.nonce, 7);
        assert_eq!(decoded.name().size(), 1);
    }

    #[test]
    fn test_sig_info_roundtrip_fields() {
        let mut buf = [0u8; 512];
        let mut region = Region::new(&mut buf);
        let key_name = Name::parse(&mut region, "/issuer/KEY/1").unwrap();
        let nonce = [0xAB, 0xCD];
        let sig_info = SigInfo {
            sig_type: 3,
            key_name,
            nonce: Some(&nonce),
            time: Some(1_700_000_000_000),
            seq_num: Some(42),
            validity: None,
            extensions: &[],
        };

        let mut encoder = Encoder::new(&mut region);
        sig_info.encode_as(&mut encoder, tlv_types::ISIG_INFO);
        assert!(encoder.ok());
        let wire = encoder.into_output(&mut region).unwrap();

        let (outer, _) = tlv::read_tlv(wire).unwrap();
        let decoded = SigInfo::decode_from(&outer).unwrap();
        assert_eq!(decoded, sig_info);
    }
}
