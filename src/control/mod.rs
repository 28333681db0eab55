//! Operator-facing control channel: command grammar and TCP adapter.

pub mod parser;
pub mod server;

pub use parser::{parse, ControlRequest};
pub use server::serve_control;
