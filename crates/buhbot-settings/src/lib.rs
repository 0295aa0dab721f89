//! Three-layer configuration resolution (chat-local, tier-default, global)
//! with a short-TTL process cache.

pub mod resolver;

pub use resolver::ConfigResolver;
