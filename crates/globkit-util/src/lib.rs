#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Shared utilities for globkit.
//!
//! Pure helpers with no logging dependencies: text reads, atomic writes,
//! lexical path normalization and short BLAKE3 digests.

pub mod fs;
pub mod hash;
pub mod path;
