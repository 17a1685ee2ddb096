//! Translation of host-language query trees into normalized trees ready for
//! SQL generation.
//!
//! The entry point is [`compiler::QueryCompiler`], which runs the rewrite
//! passes in [`translate`] and caches the results by query shape.

pub mod cache;
pub mod compiler;
pub mod config;
pub mod datatype;
pub mod expr;
pub mod functions;
pub mod model;
pub mod operators;
pub mod sql;
pub mod testutil;
pub mod translate;
pub mod visitor;
