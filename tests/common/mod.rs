// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use sportsync::backend::MemoryBackend;
use sportsync::models::Role;
use sportsync::services::{ClientEnvironment, SessionManager, SessionSettings};
use std::sync::Arc;
use uuid::Uuid;

#[allow(dead_code)]
pub const TEST_EMAIL: &str = "sam@example.com";
#[allow(dead_code)]
pub const TEST_PASSWORD: &str = "Str0ng!Pass";

/// Settings with a fixed client environment so fingerprints are stable.
#[allow(dead_code)]
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        client: ClientEnvironment {
            user_agent: "sportsync-tests".to_string(),
            language: "en-US".to_string(),
            ..Default::default()
        },
        ..SessionSettings::default()
    }
}

/// Create a manager over an in-memory backend with one seeded account.
/// Returns the manager, the backend and the seeded account id.
#[allow(dead_code)]
pub fn create_test_manager() -> (SessionManager, Arc<MemoryBackend>, Uuid) {
    create_test_manager_with(test_settings())
}

#[allow(dead_code)]
pub fn create_test_manager_with(
    settings: SessionSettings,
) -> (SessionManager, Arc<MemoryBackend>, Uuid) {
    let backend = Arc::new(MemoryBackend::new());
    let user_id = backend.insert_account(TEST_EMAIL, TEST_PASSWORD, "Sam Rivera", Role::Player);
    let manager = SessionManager::new(backend.clone(), settings);
    (manager, backend, user_id)
}

/// Seed a second account.
#[allow(dead_code)]
pub fn add_user(backend: &MemoryBackend, name: &str) -> Uuid {
    let email = format!("{}@example.com", name.to_lowercase());
    backend.insert_account(&email, TEST_PASSWORD, name, Role::Coach)
}
