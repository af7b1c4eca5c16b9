//! Greetings, once or as a stream.

pub mod greeting_api;
pub mod greeting_service;
