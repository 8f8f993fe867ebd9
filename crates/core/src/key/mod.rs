//! Typed key and row coding for the storage boundary.
//!
//! Storage keys are opaque byte strings ordered lexicographically, so
//! every typed key column is encoded in a form whose byte order
//! matches its value order: sign-flipped big-endian integers,
//! bit-twiddled floats, packed-digit decimals and escaped,
//! NUL-terminated varlen bytes. Nulls order first; descending columns
//! complement the encoded bytes. Row payloads use a plain tagged
//! serialization with no ordering requirement.

mod coder;

pub use coder::{
	decode_row, encode_key, encode_key_prefix, encode_row, encode_value, Direction,
};
