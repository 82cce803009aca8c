// Mlog - core/mod.rs
//
// Core layer: event model, query filter, line parsers, path classifier,
// export formatting.
// Dependencies: standard library, regex/glob/chrono/serde.
// Must NOT depend on: app, store, platform, or perform file I/O directly.

pub mod classify;
pub mod export;
pub mod filter;
pub mod model;
pub mod parser;
