//! Ingress pipeline (C10): gates inbound messages on chat monitoring state,
//! logs them, and routes into the responder or client branch.

pub mod error;
pub mod pipeline;

pub use error::{IngressError, Result};
pub use pipeline::{process_message, IncomingMessage, IngressContext, Outcome};
