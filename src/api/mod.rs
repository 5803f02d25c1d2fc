//! Vendor wire payloads.
//!
//! Each submodule mirrors one vendor's JSON request and response shapes
//! field-for-field. Translation between these payloads and the normalized
//! conversation model lives in [`crate::core::adapters`].

pub mod anthropic;
pub mod google;
pub mod models;
pub mod openai;
