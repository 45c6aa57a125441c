//! tlstool - TLS diagnostic client and server
//!
//! This crate provides a TLS client and a TLS server that bridge the
//! encrypted connection to standard input/output, report the peer's
//! certificate chain and apply a configurable trust policy.

pub mod client;
pub mod conn;
pub mod log;
pub mod server;
pub mod tls;
