//! The `auth` module guards every call: credential parsing, bearer token
//! issuance and the gate that admits or refuses calls.

pub mod credentials;
pub mod gate;
pub mod token;

pub use credentials::Credentials;
pub use gate::{AdmittedCall, AuthGate};
pub use token::TokenGenerator;

#[cfg(test)]
mod tests;
