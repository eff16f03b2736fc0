//! Postings codecs for Xyston.
//!
//! A codec owns the byte layout of per-term postings chunks. The merge engine
//! is codec-agnostic: it talks to the capability traits in [`traits`] and
//! only requires that chunks of matching codecs be byte-transferable between
//! segments. Two in-memory codecs ship in-tree: the delta/varint codec in
//! [`vint`] and the fixed-width codec in [`plain`].

pub mod plain;
pub mod traits;
pub mod types;
pub mod vint;

// Re-export commonly used types
pub use plain::*;
pub use traits::*;
pub use types::*;
pub use vint::*;
