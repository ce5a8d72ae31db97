use std::sync::atomic::{AtomicU64, Ordering};

use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::broker::Token;

/// Issues bearer tokens.
///
/// A token is the SHA-256 of a process-wide counter, the wall clock in
/// milliseconds and 64 bits from the OS random source, so it reveals none
/// of them. There is no collision check.
#[derive(Debug, Default)]
pub struct TokenGenerator {
    counter: AtomicU64,
}

impl TokenGenerator {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    pub fn generate(&self) -> Token {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        let millis = chrono::Utc::now().timestamp_millis();
        let nonce = OsRng.next_u64();

        let mut hasher = Sha256::new();
        hasher.update(id.to_be_bytes());
        hasher.update(millis.to_be_bytes());
        hasher.update(nonce.to_be_bytes());
        format!("{:x}", hasher.finalize())
    }
}
