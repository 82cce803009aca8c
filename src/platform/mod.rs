// Mlog - platform/mod.rs
//
// Platform abstraction layer: config file, platform directories, directory
// listing.
// Dependencies: standard library, directories/walkdir/glob, core types for
// parser selection.
// Must NOT depend on: app, store.

pub mod config;
pub mod fs;
