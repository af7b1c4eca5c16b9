//! A small web service that greets people, once or once per second.

pub mod api;
pub mod app;
pub mod infra;
