//! Crumb CLI Library
//!
//! Operator tooling for cookie keys and tokens: generate a key, mint a login
//! token or nonce for testing, and inspect tokens presented by clients.

pub mod token_cmd;
