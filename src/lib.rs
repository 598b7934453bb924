//! A small content web service: an axum API and an in-process task worker
//! sharing one resource lifecycle and one error-translation boundary.

pub mod api;
pub mod config;
pub mod container;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod state;
pub mod tasks;
pub mod translate;

#[cfg(test)]
mod test_support;
