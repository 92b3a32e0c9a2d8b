use crate::error::{Error, Result};
use crate::tlv::{self, NniWidth, Tlv};

/// Event-driven TLV decoder: streams the children of an outer TLV to
/// per-type handlers in a single left-to-right pass.
///
/// Each child is matched against a set of [`Def`] rules. An unmatched
/// child falls to the critical-type rule: types that are odd or at most 31
/// must be understood, so an unrecognized critical type aborts the decode
/// with `UnexpectedCritical`; other unknowns are skipped.
pub fn decode<'a>(input: &Tlv<'a>, expected_types: &[u32], defs: impl DefSet<'a>) -> Result<()> {
    decode_with_unknown(input, expected_types, defs, |_| Ok(false))
}

/// Like [`decode`], but an unmatched child is first offered to `unknown`;
/// returning `Ok(true)` claims it and bypasses the critical-type rule.
pub fn decode_with_unknown<'a, D, U>(
    input: &Tlv<'a>,
    expected_types: &[u32],
    mut defs: D,
    mut unknown: U,
) -> Result<()>
where
    D: DefSet<'a>,
    U: FnMut(&Tlv<'a>) -> Result<bool>,
{
    if !expected_types.is_empty() && !expected_types.contains(&input.typ) {
        return Err(Error::UnexpectedCritical(input.typ));
    }
    let mut rest = input.value;
    let mut last_order = 0u16;
    while !rest.is_empty() {
        let (child, consumed) = tlv::read_tlv(rest)?;
        rest = &rest[consumed..];
        match defs.try_apply(&child, &mut last_order) {
            Some(handled) => handled?,
            None => {
                if !unknown(&child)? && tlv::is_critical(child.typ) {
                    return Err(Error::UnexpectedCritical(child.typ));
                }
            }
        }
    }
    Ok(())
}

/// One decoding rule: a TLV-TYPE and its handler.
pub struct Def<F> {
    typ: u32,
    order: u16,
    f: F,
}

/// Build a rule for `typ`. The handler may capture mutable state; a
/// returned error aborts the whole decode.
pub fn def<'a, F>(typ: u32, f: F) -> Def<F>
where
    F: FnMut(&Tlv<'a>) -> Result<()>,
{
    Def { typ, order: 0, f }
}

impl<F> Def<F> {
    /// Restrict this rule to in-order matching: once a rule with a higher
    /// order number has matched, a child for this rule is treated as
    /// unrecognized. Order numbers start at 1.
    pub fn in_order(mut self, order: u16) -> Self {
        self.order = order;
        self
    }
}

/// Rule for a non-negative integer field of the given wire width, read
/// into `slot`. A width or range mismatch fails with `BadNni`.
pub fn def_nni<'a, 's, T>(
    typ: u32,
    width: NniWidth,
    slot: &'s mut T,
) -> Def<impl FnMut(&Tlv<'a>) -> Result<()> + 's>
where
    T: TryFrom<u64>,
{
    def(typ, move |d| {
        let n = tlv::read_nni(d.value, width)?;
        *slot = T::try_from(n).map_err(|_| Error::BadNni)?;
        Ok(())
    })
}

/// A set of rules; implemented for single rules and for tuples of rules.
pub trait DefSet<'a> {
    /// Apply the matching rule, if any. `None` means no rule claimed the
    /// child and the critical-type rule decides.
    fn try_apply(&mut self, d: &Tlv<'a>, last_order: &mut u16) -> Option<Result<()>>;
}

impl<'a, F> DefSet<'a> for Def<F>
where
    F: FnMut(&Tlv<'a>) -> Result<()>,
{
    fn try_apply(&mut self, d: &Tlv<'a>, last_order: &mut u16) -> Option<Result<()>> {
        if d.typ != self.typ {
            return None;
        }
        if self.order > 0 {
            if self.order < *last_order {
                return None;
            }
            *last_order = self.order;
        }
        Some((self.f)(d))
    }
}

macro_rules! impl_def_set_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<'a, $($name: DefSet<'a>),+> DefSet<'a> for ($($name,)+) {
            fn try_apply(&mut self, d: &Tlv<'a>, last_order: &mut u16) -> Option<Result<()>> {
                $(
                    if let Some(r) = self.$idx.try_apply(d, last_order) {
                        return Some(r);
                    }
                )+
                None
            }
        }
    };
}

impl_def_set_tuple!(A: 0);
impl_def_set_tuple!(A: 0, B: 1);
impl_def_set_tuple!(A: 0, B: 1, C: 2);
impl_def_set_tuple!(A: 0, B: 1, C: 2, D: 3);
impl_def_set_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4);
impl_def_set_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_def_set_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_def_set_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
impl_def_set_tuple!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7, I: 8);
