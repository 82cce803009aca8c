// Mlog - lib.rs
//
// Library entry point. The `mlog` binary is a thin host over these modules;
// integration tests drive them directly.

pub mod app;
pub mod core;
pub mod platform;
pub mod store;
pub mod util;
