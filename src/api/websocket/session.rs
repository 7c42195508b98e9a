// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use sha2::{Digest, Sha256};

/// Fresh session id: hex SHA-256 of 16 random bytes
pub fn generate_session_id() -> String {
    let seed: [u8; 16] = rand::random();
    hex::encode(Sha256::digest(seed))
}
