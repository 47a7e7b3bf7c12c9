//! Reference filter blueprint.
//!
//! Build with:
//!
//! ```text
//! cargo build --release --target wasm32-unknown-unknown
//! ```
//!
//! Parameters are one tag byte followed by a UTF-8 operand:
//!
//! | tag    | predicate                         |
//! |--------|-----------------------------------|
//! | `0x01` | topic equals operand              |
//! | `0x02` | key starts with operand           |
//! | `0x03` | value contains operand            |
//! | `0x04` | header `name=value` is present    |
//!
//! The handle returned by `parse_parameters` is the tag.

use strainer_abi::contract::{MATCH, NO_MATCH};
use strainer_abi::{decode_record, AbiConfig, InputRecord};

/// `parse_parameters` rejection codes.
pub mod reject {
    /// No parameters at all
    pub const EMPTY: i32 = -1;
    /// Unknown tag byte
    pub const UNKNOWN_TAG: i32 = -2;
    /// Operand is not UTF-8
    pub const NOT_UTF8: i32 = -3;
    /// Header operand without `=`
    pub const BAD_HEADER: i32 = -4;
}

/// `matches` result when the record cannot be decoded.
pub const UNDECODABLE: i32 = -10;

/// `matches` result when no parameters have been parsed.
pub const UNCONFIGURED: i32 = -11;

/// A parsed filter predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// Topic equals
    Topic(String),
    /// Key prefix
    KeyPrefix(String),
    /// Value substring
    ValueContains(String),
    /// Header present with this exact value
    Header(String, String),
}

impl Predicate {
    /// Parse raw parameter bytes, returning a negative code on rejection.
    pub fn parse(params: &[u8]) -> Result<Self, i32> {
        let (&tag, operand) = params.split_first().ok_or(reject::EMPTY)?;
        let operand = std::str::from_utf8(operand).map_err(|_| reject::NOT_UTF8)?;
        match tag {
            0x01 => Ok(Predicate::Topic(operand.to_string())),
            0x02 => Ok(Predicate::KeyPrefix(operand.to_string())),
            0x03 => Ok(Predicate::ValueContains(operand.to_string())),
            0x04 => {
                let (name, value) = operand.split_once('=').ok_or(reject::BAD_HEADER)?;
                Ok(Predicate::Header(name.to_string(), value.to_string()))
            }
            _ => Err(reject::UNKNOWN_TAG),
        }
    }

    /// Tag byte, used as the parameters handle.
    pub fn handle(&self) -> i32 {
        match self {
            Predicate::Topic(_) => 0x01,
            Predicate::KeyPrefix(_) => 0x02,
            Predicate::ValueContains(_) => 0x03,
            Predicate::Header(..) => 0x04,
        }
    }

    /// Does `record` satisfy the predicate?
    pub fn matches(&self, record: &InputRecord) -> bool {
        match self {
            Predicate::Topic(topic) => record.topic == *topic,
            Predicate::KeyPrefix(prefix) => record.key.starts_with(prefix.as_str()),
            Predicate::ValueContains(needle) => record.value.contains(needle.as_str()),
            Predicate::Header(name, value) => record.headers.get(name) == Some(value),
        }
    }
}

/// Evaluate an encoded record against the parsed predicate, if any.
pub fn evaluate_configured(predicate: Option<&Predicate>, encoded: &[u8]) -> i32 {
    match predicate {
        Some(predicate) => evaluate(predicate, encoded),
        None => UNCONFIGURED,
    }
}

/// Evaluate an encoded record.
pub fn evaluate(predicate: &Predicate, encoded: &[u8]) -> i32 {
    match decode_record(encoded, &AbiConfig::default()) {
        Ok(record) if predicate.matches(&record) => MATCH,
        Ok(_) => NO_MATCH,
        Err(_) => UNDECODABLE,
    }
}

#[cfg(target_arch = "wasm32")]
thread_local! {
    static PREDICATE: std::cell::RefCell<Option<Predicate>> =
        const { std::cell::RefCell::new(None) };
}

#[cfg(target_arch = "wasm32")]
mod host {
    #[link(wasm_import_module = "blueprint")]
    extern "C" {
        pub fn input_offset() -> i32;
        pub fn input_length() -> i32;
        pub fn log(level: i32, ptr: i32, len: i32);
    }

    /// The bytes the host placed in memory for the current call.
    pub fn input() -> &'static [u8] {
        // SAFETY: the host guarantees the window lies inside our memory and
        // stays untouched until the export returns.
        unsafe {
            let offset = input_offset();
            let len = input_length();
            if offset < 0 || len <= 0 {
                return &[];
            }
            std::slice::from_raw_parts(offset as usize as *const u8, len as usize)
        }
    }

    pub fn warn(message: &str) {
        // SAFETY: pointer and length describe a live string in our memory.
        unsafe {
            log(
                strainer_abi::contract::log_level::WARN,
                message.as_ptr() as i32,
                message.len() as i32,
            )
        }
    }
}

#[cfg(target_arch = "wasm32")]
#[no_mangle]
pub extern "C" fn parse_parameters() -> i32 {
    match Predicate::parse(host::input()) {
        Ok(predicate) => {
            let handle = predicate.handle();
            PREDICATE.with(|p| *p.borrow_mut() = Some(predicate));
            handle
        }
        Err(code) => {
            host::warn(&format!("rejected parameters (code {})", code));
            PREDICATE.with(|p| *p.borrow_mut() = None);
            code
        }
    }
}

#[cfg(target_arch = "wasm32")]
#[no_mangle]
pub extern "C" fn matches() -> i32 {
    PREDICATE.with(|p| evaluate_configured(p.borrow().as_ref(), host::input()))
}
