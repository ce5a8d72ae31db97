//! The `utils` module provides definitions shared across the `popchat`
//! application: the status/error taxonomy and logging set-up.

pub mod error;
pub mod logging;

pub use error::{Code, ErrorClass, ServerError, Status};

#[cfg(test)]
mod tests;
