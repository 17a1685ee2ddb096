//! Settings that control how queries are compiled.

pub mod translation;
