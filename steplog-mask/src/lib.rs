#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod mask;
pub mod matcher;

pub use mask::{apply_matches, Mask, MaskSet, PLACEHOLDER};
pub use matcher::{LiteralMatcher, MaskError, MaskMatch};
