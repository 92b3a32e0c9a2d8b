//! NDN packet codec and signing core.
//!
//! The crate provides the pieces an NDN application or forwarder front-end
//! needs to materialize and consume packets without a general-purpose
//! heap: a region allocator over caller-owned buffers, a backward TLV
//! encoder, an event-driven decoder, Name/Interest/Data/Nack packet
//! objects, a pluggable signing abstraction with digest, ECDSA-P256, and
//! HMAC-SHA256 keys, AES-GCM encrypted-message framing, and a keychain
//! façade over pluggable storage.
//!
//! Transports, face loops, and forwarding logic are out of scope; they
//! sit on top of the interfaces exposed here.

pub mod decoder;
pub mod encoder;
pub mod encrypted;
pub mod error;
pub mod keychain;
pub mod name;
pub mod packets;
pub mod port;
pub mod region;
pub mod signature;
pub mod tlv;

pub use encoder::{enc, Encodable, Encoder};
pub use error::{Error, Result};
pub use name::{Component, Name, NameCmp};
pub use packets::{Data, Interest, Nack, SigInfo};
pub use region::Region;
pub use signature::{
    DigestKey, EcdsaPrivateKey, EcdsaPublicKey, HmacKey, NullKey, PrivateKey, PublicKey,
};
