#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod machine;
pub mod opcode_table;
pub mod revision;
pub mod state;
pub mod tracing;
pub mod types;

pub use revision::{ChainConfig, Revision};
