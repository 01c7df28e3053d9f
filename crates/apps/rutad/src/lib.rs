//! Daemon internals for `rutad`: configuration loading, the router engine
//! and the interactive control surface. The binary in `main.rs` glues
//! these to a transport picked by `--mode`.

pub mod config;
pub mod engine;
pub mod repl;
