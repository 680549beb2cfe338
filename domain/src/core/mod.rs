//! Cross-cutting domain helpers.

pub mod string;
