pub mod client;
pub mod envelope;

pub use client::{GenerationClient, GenerationError};
pub use envelope::{EnvelopeError, unwrap_envelope};
