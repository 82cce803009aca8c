// Mlog - app/mod.rs
//
// Application layer: ingestion orchestration (watcher thread, offsets,
// progress reporting).
// Dependencies: core, store (through the EventSink trait).
// Must NOT depend on: platform specifics.

pub mod watcher;
