// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod auth;
pub mod handler;
pub mod messages;
pub mod session;

pub use auth::{AuthError, FirebaseVerifier, IdentityClaims, IdentityVerifier};
pub use messages::{MessageType, ServerFrame};
