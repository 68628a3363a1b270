//! Authentication mechanisms

mod scram;

pub use scram::{ScramSha256, MECHANISM as SCRAM_MECHANISM};
