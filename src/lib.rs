//! Gatekeeper - request-filtering front for a web application
//!
//! Blocks malicious traffic before it reaches application logic:
//! - Allow-list of legitimate routes
//! - Attack signature scanning (extensions, probe paths, JNDI lookups)
//! - Adaptive IP blocking on expiring caches
//! - Normalization of downstream failures into generic responses

pub mod blocklist;
pub mod config;
pub mod downstream;
pub mod error;
pub mod filter;
pub mod gatekeeper;
pub mod normalizer;
pub mod proxy;
pub mod recorder;
pub mod request;
pub mod response;
pub mod scheduler;
pub mod server;
