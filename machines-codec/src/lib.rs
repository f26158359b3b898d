//! # machines-codec
//!
//! Persistence for machine descriptions.
//!
//! This crate provides:
//! - The JSON format codec, with `{kind, payload}` attribute encoding
//! - Checksummed bundle directories (`<Name>.machine/`)
//! - Loading of a machine's dependencies

pub mod bundle;
pub mod codec;
pub mod error;

pub use bundle::{Bundle, BUNDLE_EXTENSION, CHECKSUM_FILE, MACHINE_FILE};
pub use codec::{FormatCodec, JsonCodec};
pub use error::CodecError;
