use std::fmt;

use crate::encoder::{Encodable, Encoder};
use crate::error::{Error, Result};
use crate::region::Region;
use crate::tlv::{self, tlv_types, Tlv};

/// One name component: a view over its `(type, length, value)` TLV bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component<'a> {
    typ: u32,
    value: &'a [u8],
    wire: &'a [u8],
}

impl<'a> Component<'a> {
    pub fn from_tlv(d: &Tlv<'a>) -> Result<Self> {
        if d.typ == 0 || d.typ > 0xFFFF {
            return Err(Error::BadFormat);
        }
        Ok(Self {
            typ: d.typ,
            value: d.value,
            wire: d.wire,
        })
    }

    pub fn typ(&self) -> u32 {
        self.typ
    }

    pub fn value(&self) -> &'a [u8] {
        self.value
    }

    pub fn length(&self) -> usize {
        self.value.len()
    }

    /// The raw `(type, length, value)` bytes.
    pub fn wire(&self) -> &'a [u8] {
        self.wire
    }

    pub fn is_implicit_digest(&self) -> bool {
        self.typ == tlv_types::IMPLICIT_SHA256_DIGEST_COMPONENT && self.value.len() == 32
    }

    pub fn is_params_digest(&self) -> bool {
        self.typ == tlv_types::PARAMETERS_SHA256_DIGEST_COMPONENT && self.value.len() == 32
    }
}

impl fmt::Display for Component<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.typ != tlv_types::GENERIC_NAME_COMPONENT {
            write!(f, "{}=", self.typ)?;
        }
        for &b in self.value {
            if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "%{b:02X}")?;
            }
        }
        Ok(())
    }
}

/// Outcome of [`Name::compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameCmp {
    /// Names are identical.
    Equal,
    /// Self is a strict prefix of the other name.
    LPrefix,
    /// The other name is a strict prefix of self.
    RPrefix,
    Lt,
    Gt,
}

/// Immutable view over the TLV-VALUE of a Name: a concatenation of
/// components in canonical encoding.
///
/// A name never owns bytes; it stays valid as long as the buffer it was
/// decoded from or the region it was parsed into.
#[derive(Debug, Clone, Copy, Default, Eq)]
pub struct Name<'a> {
    value: &'a [u8],
    n_comps: usize,
}

impl<'a> Name<'a> {
    /// View over a Name TLV-VALUE, validating the component encoding.
    pub fn from_value(value: &'a [u8]) -> Result<Self> {
        let mut n_comps = 0;
        let mut rest = value;
        while !rest.is_empty() {
            let (d, consumed) = tlv::read_tlv(rest)?;
            Component::from_tlv(&d)?;
            rest = &rest[consumed..];
            n_comps += 1;
        }
        Ok(Self { value, n_comps })
    }

    pub fn from_tlv(d: &Tlv<'a>) -> Result<Self> {
        if d.typ != tlv_types::NAME {
            return Err(Error::BadFormat);
        }
        Self::from_value(d.value)
    }

    pub(crate) fn from_parts(value: &'a [u8], n_comps: usize) -> Self {
        Self { value, n_comps }
    }

    /// Parse a URI such as `/A/B`, `/8=A`, or `/%41%42`. Each component
    /// may carry a numeric `type=` prefix; the value is percent-decoded.
    pub fn parse(region: &mut Region<'a>, uri: &str) -> Result<Self> {
        let mut total = 0;
        let mut n_comps = 0;
        for part in uri.split('/').filter(|p| !p.is_empty()) {
            let (typ, text) = split_component_type(part)?;
            let len = percent_decoded_len(text)?;
            total += tlv::sizeof_varnum(typ) + tlv::sizeof_varnum(len as u32) + len;
            n_comps += 1;
        }

        let room = region.alloc(total)?;
        let mut at = 0;
        for part in uri.split('/').filter(|p| !p.is_empty()) {
            let (typ, text) = split_component_type(part)?;
            let len = percent_decoded_len(text)?;
            let size_t = tlv::sizeof_varnum(typ);
            let size_l = tlv::sizeof_varnum(len as u32);
            tlv::write_varnum(&mut room[at..at + size_t], typ);
            at += size_t;
            tlv::write_varnum(&mut room[at..at + size_l], len as u32);
            at += size_l;
            percent_decode_into(text, &mut room[at..at + len]);
            at += len;
        }
        Ok(Self {
            value: room,
            n_comps,
        })
    }

    /// The Name TLV-VALUE bytes.
    pub fn value(&self) -> &'a [u8] {
        self.value
    }

    pub fn length(&self) -> usize {
        self.value.len()
    }

    /// Number of components.
    pub fn size(&self) -> usize {
        self.n_comps
    }

    pub fn is_empty(&self) -> bool {
        self.n_comps == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Component<'a>> + '_ {
        ComponentIter { rest: self.value }
    }

    /// Component at index `i`; negative indices count from the end.
    pub fn get(&self, i: isize) -> Option<Component<'a>> {
        let i = if i < 0 {
            self.n_comps.checked_sub(i.unsigned_abs())?
        } else {
            i as usize
        };
        self.iter().nth(i)
    }

    /// Sub-name covering components `[first, last)`, clamped to bounds.
    pub fn slice(&self, first: usize, last: usize) -> Name<'a> {
        let last = last.min(self.n_comps);
        if first >= last {
            return Name::default();
        }
        let lo = self.offset_of(first);
        let hi = self.offset_of(last);
        Name {
            value: &self.value[lo..hi],
            n_comps: last - first,
        }
    }

    /// Sub-name from component `first` to the end.
    pub fn suffix(&self, first: usize) -> Name<'a> {
        self.slice(first, self.n_comps)
    }

    /// Prefix of `n` components; negative `n` counts from the end, so
    /// `get_prefix(-1)` drops the last component.
    pub fn get_prefix(&self, n: isize) -> Name<'a> {
        let n = if n < 0 {
            self.n_comps.saturating_sub(n.unsigned_abs())
        } else {
            n as usize
        };
        self.slice(0, n)
    }

    /// Compare component-by-component in canonical order.
    pub fn compare(&self, other: &Name<'_>) -> NameCmp {
        let mut a = self.iter();
        let mut b = other.iter();
        loop {
            match (a.next(), b.next()) {
                (None, None) => return NameCmp::Equal,
                (None, Some(_)) => return NameCmp::LPrefix,
                (Some(_), None) => return NameCmp::RPrefix,
                (Some(ca), Some(cb)) => match compare_component(&ca, &cb) {
                    std::cmp::Ordering::Equal => continue,
                    std::cmp::Ordering::Less => return NameCmp::Lt,
                    std::cmp::Ordering::Greater => return NameCmp::Gt,
                },
            }
        }
    }

    pub fn is_prefix_of(&self, other: &Name<'_>) -> bool {
        matches!(self.compare(other), NameCmp::Equal | NameCmp::LPrefix)
    }

    /// New name in `region` with one component appended.
    pub fn append_component<'r>(
        &self,
        region: &mut Region<'r>,
        typ: u32,
        value: &[u8],
    ) -> Result<Name<'r>> {
        let size_t = tlv::sizeof_varnum(typ);
        let size_l = tlv::sizeof_varnum(value.len() as u32);
        let room = region.alloc(self.value.len() + size_t + size_l + value.len())?;
        let mut at = self.value.len();
        room[..at].copy_from_slice(self.value);
        tlv::write_varnum(&mut room[at..at + size_t], typ);
        at += size_t;
        tlv::write_varnum(&mut room[at..at + size_l], value.len() as u32);
        at += size_l;
        room[at..].copy_from_slice(value);
        Ok(Name {
            value: room,
            n_comps: self.n_comps + 1,
        })
    }

    /// New name in `region` with all of `other`'s components appended.
    pub fn append<'r>(&self, region: &mut Region<'r>, other: &Name<'_>) -> Result<Name<'r>> {
        let room = region.alloc(self.value.len() + other.value.len())?;
        room[..self.value.len()].copy_from_slice(self.value);
        room[self.value.len()..].copy_from_slice(other.value);
        Ok(Name {
            value: room,
            n_comps: self.n_comps + other.n_comps,
        })
    }

    fn offset_of(&self, comp_index: usize) -> usize {
        let mut rest = self.value;
        for _ in 0..comp_index {
            // Validated at construction, so read_tlv cannot fail here.
            if let Ok((_, consumed)) = tlv::read_tlv(rest) {
                rest = &rest[consumed..];
            }
        }
        self.value.len() - rest.len()
    }
}

fn compare_component(a: &Component<'_>, b: &Component<'_>) -> std::cmp::Ordering {
    a.typ()
        .cmp(&b.typ())
        .then(a.length().cmp(&b.length()))
        .then(a.value().cmp(b.value()))
}

impl PartialEq for Name<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<'a, 'n> Encodable<'a> for Name<'n> {
    fn encode_to(&self, encoder: &mut Encoder<'a>) {
        encoder.prepend_tlv(tlv_types::NAME, self.value);
    }
}

impl fmt::Display for Name<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "/");
        }
        for comp in self.iter() {
            write!(f, "/{comp}")?;
        }
        Ok(())
    }
}

struct ComponentIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for ComponentIter<'a> {
    type Item = Component<'a>;

    fn next(&mut self) -> Option<Component<'a>> {
        if self.rest.is_empty() {
            return None;
        }
        let (d, consumed) = tlv::read_tlv(self.rest).ok()?;
        self.rest = &self.rest[consumed..];
        Component::from_tlv(&d).ok()
    }
}

fn split_component_type(part: &str) -> Result<(u32, &str)> {
    if let Some((prefix, rest)) = part.split_once('=') {
        if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) {
            let typ: u32 = prefix.parse().map_err(|_| Error::BadFormat)?;
            if typ == 0 || typ > 0xFFFF {
                return Err(Error::BadFormat);
            }
            return Ok((typ, rest));
        }
    }
    Ok((tlv_types::GENERIC_NAME_COMPONENT, part))
}

fn percent_decoded_len(text: &str) -> Result<usize> {
    let bytes = text.as_bytes();
    let mut len = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 3 > bytes.len()
                || !bytes[i + 1].is_ascii_hexdigit()
                || !bytes[i + 2].is_ascii_hexdigit()
            {
                return Err(Error::BadFormat);
            }
            i += 3;
        } else {
            i += 1;
        }
        len += 1;
    }
    Ok(len)
}

fn percent_decode_into(text: &str, out: &mut [u8]) {
    let bytes = text.as_bytes();
    let mut i = 0;
    let mut at = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = (bytes[i + 1] as char).to_digit(16).unwrap_or(0) as u8;
            let lo = (bytes[i + 2] as char).to_digit(16).unwrap_or(0) as u8;
            out[at] = (hi << 4) | lo;
            i += 3;
        } else {
            out[at] = bytes[i];
            i += 1;
        }
        at += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name_of<'a>(region: &mut Region<'a>, uri: &str) -> Name<'a> {
        Name::parse(region, uri).unwrap()
    }

    #[test]
    fn test_parse_uri() {
        let mut buf = [0u8; 256];
        let mut region = Region::new(&mut buf);
        let name = name_of(&mut region, "/A");
        assert_eq!(name.value(), &[0x08, 0x01, 0x41]);
        assert_eq!(name.size(), 1);

        let name = name_of(&mut region, "/hello/world");
        assert_eq!(name.size(), 2);
        assert_eq!(name.get(0).unwrap().value(), b"hello");
        assert_eq!(name.get(1).unwrap().value(), b"world");
    }

    #[test]
    fn test_parse_typed_and_percent() {
        let mut buf = [0u8; 256];
        let mut region = Region::new(&mut buf);
        let name = name_of(&mut region, "/2=%00%01/B%20C");
        let first = name.get(0).unwrap();
        assert_eq!(first.typ(), 2);
        assert_eq!(first.value(), &[0x00, 0x01]);
        let second = name.get(1).unwrap();
        assert_eq!(second.typ(), 8);
        assert_eq!(second.value(), b"B C");
    }

    #[test]
    fn test_parse_bad_percent() {
        let mut buf = [0u8; 64];
        let mut region = Region::new(&mut buf);
        assert!(matches!(
            Name::parse(&mut region, "/A%4"),
            Err(Error::BadFormat)
        ));
        assert!(matches!(
            Name::parse(&mut region, "/A%GG"),
            Err(Error::BadFormat)
        ));
    }

    #[test]
    fn test_negative_index_and_out_of_range() {
        let mut buf = [0u8; 64];
        let mut region = Region::new(&mut buf);
        let name = name_of(&mut region, "/A/B/C");
        assert_eq!(name.get(-1).unwrap().value(), b"C");
        assert_eq!(name.get(-3).unwrap().value(), b"A");
        assert!(name.get(3).is_none());
        assert!(name.get(-4).is_none());
    }

    #[test]
    fn test_slice_and_prefix() {
        let mut buf = [0u8; 64];
        let mut region = Region::new(&mut buf);
        let name = name_of(&mut region, "/A/B/C");

        let middle = name.slice(1, 2);
        assert_eq!(middle.size(), 1);
        assert_eq!(middle.get(0).unwrap().value(), b"B");

        let prefix = name.get_prefix(-1);
        assert_eq!(prefix.size(), 2);
        assert_eq!(prefix.value(), &name.value()[..6]);

        assert_eq!(name.suffix(2).get(0).unwrap().value(), b"C");
        assert!(name.slice(2, 1).is_empty());
    }

    #[test]
    fn test_compare() {
        let mut buf = [0u8; 256];
        let mut region = Region::new(&mut buf);
        let ab = name_of(&mut region, "/A/B");
        let ab2 = name_of(&mut region, "/A/B");
        let abc = name_of(&mut region, "/A/B/C");
        let ac = name_of(&mut region, "/A/C");

        assert_eq!(ab.compare(&ab2), NameCmp::Equal);
        assert_eq!(ab.compare(&abc), NameCmp::LPrefix);
        assert_eq!(abc.compare(&ab), NameCmp::RPrefix);
        assert_eq!(ab.compare(&ac), NameCmp::Lt);
        assert_eq!(ac.compare(&ab), NameCmp::Gt);
        assert!(ab.is_prefix_of(&abc));
        assert!(!abc.is_prefix_of(&ab));
    }

    #[test]
    fn test_compare_shorter_value_sorts_first() {
        let mut buf = [0u8; 64];
        let mut region = Region::new(&mut buf);
        let short = name_of(&mut region, "/AB");
        let long = name_of(&mut region, "/AAA");
        assert_eq!(short.compare(&long), NameCmp::Lt);
    }

    #[test]
    fn test_append() {
        let mut buf = [0u8; 256];
        let mut region = Region::new(&mut buf);
        let a = name_of(&mut region, "/A");
        let b = name_of(&mut region, "/B/C");
        let joined = a.append(&mut region, &b).unwrap();
        assert_eq!(joined.size(), 3);
        assert_eq!(joined.get(2).unwrap().value(), b"C");

        let keyed = a.append_component(&mut region, 8, b"KEY").unwrap();
        assert_eq!(keyed.size(), 2);
        assert_eq!(keyed.get(1).unwrap().value(), b"KEY");
    }

    #[test]
    fn test_display_roundtrip() {
        let mut buf = [0u8; 256];
        let mut region = Region::new(&mut buf);
        let name = name_of(&mut region, "/A/2=%00/B%20C");
        assert_eq!(name.to_string(), "/A/2=%00/B%20C");
        assert_eq!(Name::default().to_string(), "/");
    }

    #[test]
    fn test_from_value_rejects_garbage() {
        assert!(Name::from_value(&[0x08, 0x05, 0x41]).is_err());
        assert!(Name::from_value(&[0x00, 0x00]).is_err());
    }
}
