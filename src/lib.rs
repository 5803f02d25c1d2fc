//! Palaver is a multi-provider chat client library with branching message
//! history and streaming replies.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns sessions, message groups, the vendor adapters, the stream
//!   service that runs generations on spawned tasks, and configuration.
//! - [`api`] defines the wire payloads each vendor protocol speaks.
//! - [`utils`] holds URL and authentication-header helpers.
//!
//! The binary (`src/main.rs`) routes through [`crate::cli::main`], a thin
//! command-line front end over [`core::session::Session`].

pub mod api;
pub mod cli;
pub mod core;
pub mod utils;
