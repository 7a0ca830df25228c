// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Unread notification counter behavior.

use sportsync::backend::{BackendError, BackendErrorKind};
use sportsync::services::Operation;
use uuid::Uuid;

mod common;
use common::{create_test_manager, TEST_EMAIL, TEST_PASSWORD};

#[tokio::test]
async fn test_counter_never_goes_below_zero() {
    let (manager, _backend, _) = create_test_manager();
    manager.login(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
    assert_eq!(manager.snapshot().unread.notifications, 0);

    // Unknown id: the backend call fails, the counter stays at zero.
    let outcome = manager.mark_notification_as_read(Uuid::new_v4()).await;

    assert!(!outcome.is_ok());
    assert_eq!(outcome.operation(), Operation::MarkNotificationRead);
    assert_eq!(manager.snapshot().unread.notifications, 0);
}

#[tokio::test]
async fn test_mark_read_decrements_by_one() {
    let (manager, backend, user_id) = create_test_manager();
    let first = backend.insert_notification(user_id, "follow", "Kai followed you");
    backend.insert_notification(user_id, "like", "Ana liked your post");
    manager.login(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
    assert_eq!(manager.snapshot().unread.notifications, 2);

    assert!(manager.mark_notification_as_read(first).await.is_ok());

    assert_eq!(manager.snapshot().unread.notifications, 1);
    assert_eq!(backend.unread_notifications(user_id), 1);
}

#[tokio::test]
async fn test_optimistic_update_survives_backend_failure() {
    let (manager, backend, user_id) = create_test_manager();
    let id = backend.insert_notification(user_id, "comment", "New comment");
    manager.login(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
    backend.fail_next(
        "mark_notification_read",
        BackendError::new(BackendErrorKind::Network, "offline"),
    );

    let outcome = manager.mark_notification_as_read(id).await;

    assert!(outcome.into_result().is_err());
    assert_eq!(manager.snapshot().unread.notifications, 0);
    assert_eq!(backend.unread_notifications(user_id), 1);
}

#[tokio::test]
async fn test_mark_all_resets_counter() {
    let (manager, backend, user_id) = create_test_manager();
    for i in 0..3 {
        backend.insert_notification(user_id, "like", &format!("Like #{}", i));
    }
    manager.login(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
    assert_eq!(manager.snapshot().unread.notifications, 3);

    assert!(manager.mark_all_notifications_as_read().await.is_ok());

    assert_eq!(manager.snapshot().unread.notifications, 0);
    assert_eq!(backend.unread_notifications(user_id), 0);
}

#[tokio::test]
async fn test_listing_notifications_refreshes_counter() {
    let (manager, backend, user_id) = create_test_manager();
    manager.login(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
    backend.insert_notification(user_id, "follow", "Kai followed you");

    let notifications = manager.notifications().await.unwrap();

    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, "follow");
    assert_eq!(manager.snapshot().unread.notifications, 1);
}
