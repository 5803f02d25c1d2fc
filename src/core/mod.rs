pub mod adapters;
pub mod builtin_providers;
pub mod chat_stream;
pub mod config;
pub mod error;
pub mod generation;
pub mod ids;
pub mod message;
pub mod message_group;
pub mod providers;
pub mod service;
pub mod session;
pub mod title;
