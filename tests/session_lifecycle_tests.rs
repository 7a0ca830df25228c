// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Login/logout lifecycle through the session manager.

use sportsync::backend::{BackendError, BackendErrorKind};
use sportsync::error::AppError;
use sportsync::models::UnreadCounters;
use sportsync::services::Navigation;

mod common;
use common::{add_user, create_test_manager, TEST_EMAIL, TEST_PASSWORD};

#[tokio::test]
async fn test_login_then_logout_clears_all_state() {
    let (manager, backend, user_id) = create_test_manager();
    let kai = add_user(&backend, "Kai");
    backend.insert_follow(user_id, kai);
    backend.insert_notification(user_id, "like", "Kai liked your post");
    backend.insert_message(kai, user_id, "Nice shot");

    let mut nav = manager.navigation();
    manager.login(TEST_EMAIL, TEST_PASSWORD).await.unwrap();

    let snapshot = manager.snapshot();
    assert!(snapshot.is_authenticated());
    assert!(snapshot.is_following(kai));
    assert_eq!(
        snapshot.unread,
        UnreadCounters {
            messages: 1,
            notifications: 1
        }
    );
    assert_eq!(nav.recv().await.unwrap(), Navigation::Home);

    let outcome = manager.logout().await;
    assert!(outcome.is_ok());

    let snapshot = manager.snapshot();
    assert!(snapshot.session.is_none());
    assert!(snapshot.following.is_empty());
    assert_eq!(snapshot.unread, UnreadCounters::default());
    assert!(!snapshot.is_loading);
    assert!(!manager.is_following(kai));
    assert_eq!(manager.current_user_id(), None);
    assert_eq!(nav.recv().await.unwrap(), Navigation::Login);
}

#[tokio::test]
async fn test_login_with_invalid_email_makes_no_backend_call() {
    let (manager, backend, _) = create_test_manager();

    let err = manager.login("not-an-email", TEST_PASSWORD).await.unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(err.user_message(), "Please enter a valid email address");
    assert_eq!(backend.call_count(), 0);
    assert!(!manager.is_loading());
}

#[tokio::test]
async fn test_login_with_short_password_makes_no_backend_call() {
    let (manager, backend, _) = create_test_manager();

    let err = manager.login(TEST_EMAIL, "12345").await.unwrap_err();

    assert_eq!(
        err.user_message(),
        "Password must be at least 6 characters long"
    );
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_login_normalizes_email() {
    let (manager, _backend, user_id) = create_test_manager();

    let session = manager
        .login("  SAM@Example.com ", TEST_PASSWORD)
        .await
        .unwrap();

    assert_eq!(session.id, user_id);
    assert_eq!(session.email, TEST_EMAIL);
}

#[tokio::test]
async fn test_logout_clears_state_even_when_backend_fails() {
    let (manager, backend, _) = create_test_manager();
    manager.login(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
    backend.fail_next(
        "sign_out",
        BackendError::new(BackendErrorKind::Network, "connection reset"),
    );

    let outcome = manager.logout().await;

    assert!(!outcome.is_ok());
    assert!(matches!(outcome.error(), Some(AppError::Backend(_))));
    assert!(!manager.is_authenticated());
}

#[tokio::test]
async fn test_subscribers_observe_transitions() {
    let (manager, _backend, user_id) = create_test_manager();
    let mut rx = manager.subscribe();

    manager.login(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().user_id(), Some(user_id));

    manager.logout().await;
    assert!(rx.has_changed().unwrap());
    assert!(!rx.borrow_and_update().is_authenticated());
}

#[tokio::test]
async fn test_backend_rate_limit_on_login_is_distinguished() {
    let (manager, backend, _) = create_test_manager();
    backend.fail_next(
        "sign_in",
        BackendError::new(
            BackendErrorKind::RateLimited {
                retry_after: std::time::Duration::from_secs(45),
            },
            "Request rate limit reached",
        ),
    );

    let err = manager.login(TEST_EMAIL, TEST_PASSWORD).await.unwrap_err();

    assert!(err.is_rate_limited());
    assert_eq!(
        err.user_message(),
        "Too many attempts. Please try again in 45 seconds."
    );
}
