//! Streamkeeper command-line front end.
//!
//! Argument parsing and command implementations live in [`cli`]; `main.rs`
//! only installs logging and a runtime.

pub mod cli;
