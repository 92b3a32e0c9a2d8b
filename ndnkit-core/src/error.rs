use std::io;

/// Errors surfaced by the codec, crypto, and keychain layers.
///
/// Encoding does not use this type: the encoder carries a sticky error flag
/// instead, so composition code can write the happy path and check `ok()`
/// once at the end. Verification returns a plain `bool` so that malformed
/// signatures and wrong keys are indistinguishable to a caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The region cannot satisfy an allocation request.
    #[error("out of region capacity")]
    OutOfRegion,
    /// Input ended before a complete TLV or VAR-NUMBER.
    #[error("truncated input")]
    Truncated,
    /// A VAR-NUMBER marker that is not decodable.
    #[error("bad VAR-NUMBER")]
    BadVarNum,
    /// An unrecognized TLV whose type number is critical (odd or <= 31).
    #[error("unexpected critical TLV type {0:#04x}")]
    UnexpectedCritical(u32),
    /// A non-negative integer field with an invalid wire width or value.
    #[error("bad non-negative integer")]
    BadNni,
    /// A ParametersSha256DigestComponent that does not match its payload.
    #[error("parameters digest mismatch")]
    DigestMismatch,
    /// Signature verification failure.
    #[error("bad signature")]
    BadSignature,
    /// AES-GCM initialization vector reuse or regression on decrypt.
    #[error("initialization vector reuse")]
    IvReuse,
    /// AES-GCM encrypt-side IV counter would overflow.
    #[error("initialization vector space exhausted")]
    IvExhausted,
    /// A wire construct the codec does not implement, such as the
    /// 9-byte VAR-NUMBER form.
    #[error("unsupported construct")]
    Unsupported,
    /// Keychain slot does not exist.
    #[error("keychain slot not found")]
    NotFound,
    /// Keychain backend I/O failure.
    #[error("keychain I/O error: {0}")]
    IoError(#[from] io::Error),
    /// Malformed input outside the TLV layer: a name URI, a keychain slot
    /// id or stored blob, or a packet whose fields violate structure rules.
    #[error("bad format")]
    BadFormat,
}

pub type Result<T> = std::result::Result<T, Error>;
