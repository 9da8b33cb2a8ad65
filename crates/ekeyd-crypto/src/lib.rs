//! Keyed hash primitive, MAC, and keystream for the entropy key protocol.
//!
//! Pure functions over byte slices: deterministic, no I/O, no OS state.
//! Every role the construction is ever armed for is covered by one of the
//! five personalizations in [`personalization`]. See [`primitive::Primitive`]
//! for the armed-then-cloned value-type the rest of this crate builds on.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod derive;
pub mod personalization;
pub mod primitive;

pub use derive::{derive_long_term_key, derive_session_key};
pub use primitive::{Primitive, compute_mac, truncate_mac, xor_keystream};
