//! # Strainer ABI
//!
//! The contract between a Strainer host and a compiled filter blueprint.
//!
//! A blueprint is an untrusted WebAssembly module that decides, record by
//! record, whether a streaming record matches a caller-supplied predicate.
//! Host and blueprint share nothing but linear memory and `i32` values, so
//! this crate pins down:
//!
//! - the [`InputRecord`] shape handed to the host by upstream consumers,
//! - the byte layout a record takes inside the blueprint's memory
//!   ([`codec`]),
//! - the names and meaning of the two exports and their `i32` results
//!   ([`contract`]).
//!
//! It has no sandbox dependency so that blueprints written in Rust can link
//! it and decode records with the exact code the host used to encode them.
//!
//! ## Layout
//!
//! ```text
//! value    : len prefix | utf-8 bytes
//! key      : len prefix | utf-8 bytes
//! topic    : len prefix | utf-8 bytes
//! timestamp: i64
//! partition: i32
//! offset   : i64
//! headers  : count prefix | (klen | key | vlen | value)*
//! ```
//!
//! Byte order and prefix width are [`AbiConfig`] parameters; the default is
//! little-endian with `u32` prefixes.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod codec;
pub mod contract;
pub mod error;
pub mod record;

pub use codec::{
    decode_record, encode_record, encode_record_into, encoded_len, AbiConfig, Endianness,
    PrefixWidth,
};
pub use contract::{FilterVerdict, MatchOutcome, ParseOutcome};
pub use error::{CodecError, Result};
pub use record::{Headers, InputRecord};
