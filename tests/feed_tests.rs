// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Posts, feed paging and comments.

use sportsync::error::AppError;

mod common;
use common::{add_user, create_test_manager, TEST_EMAIL, TEST_PASSWORD};

#[tokio::test]
async fn test_feed_limit_is_clamped() {
    let (manager, _backend, _) = create_test_manager();
    manager.login(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
    for i in 0..60 {
        manager
            .create_post(&format!("Training log day {}", i), None)
            .await
            .unwrap();
    }

    assert_eq!(manager.feed(0, 0).await.unwrap().len(), 1);
    assert_eq!(manager.feed(0, 500).await.unwrap().len(), 50);
    assert_eq!(manager.feed(1, 50).await.unwrap().len(), 10);
    assert_eq!(manager.snapshot().session.unwrap().stats.posts, 60);
}

#[tokio::test]
async fn test_post_content_is_sanitized() {
    let (manager, _backend, _) = create_test_manager();
    manager.login(TEST_EMAIL, TEST_PASSWORD).await.unwrap();

    let post = manager
        .create_post(
            "  <img src=x onerror=alert(1)>Won the regional final!  ",
            Some("https://cdn.example.com/final.jpg"),
        )
        .await
        .unwrap();

    assert!(!post.content.contains('<'));
    assert!(!post.content.to_lowercase().contains("onerror="));
    assert!(post.content.ends_with("Won the regional final!"));
    assert_eq!(
        post.media_url.as_deref(),
        Some("https://cdn.example.com/final.jpg")
    );
}

#[tokio::test]
async fn test_post_with_script_media_url_rejected() {
    let (manager, backend, _) = create_test_manager();
    manager.login(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
    let calls = backend.call_count();

    let err = manager
        .create_post("Highlights", Some("javascript:alert(1)"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(backend.call_count(), calls);
}

#[tokio::test]
async fn test_comment_rules() {
    let (manager, _backend, _) = create_test_manager();
    manager.login(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
    let post = manager.create_post("Match day", None).await.unwrap();

    let err = manager.add_comment(post.id, "<>").await.unwrap_err();
    assert_eq!(err.user_message(), "Comment is required");

    let err = manager
        .add_comment(post.id, &"x".repeat(1001))
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "Comment must be at most 1000 characters");

    manager.add_comment(post.id, "Great game!").await.unwrap();
    let comments = manager.comments(post.id).await.unwrap();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].content, "Great game!");
}

#[tokio::test]
async fn test_like_toggles_and_cannot_delete_others_post() {
    let (manager, backend, _) = create_test_manager();
    let kai = add_user(&backend, "Kai");
    manager.login(TEST_EMAIL, TEST_PASSWORD).await.unwrap();
    let mut post = manager.create_post("Tryouts tomorrow", None).await.unwrap();

    assert!(manager.toggle_like(post.id).await.unwrap());
    assert!(!manager.toggle_like(post.id).await.unwrap());

    post.author_id = kai;
    let err = manager.delete_post(&post).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    assert_eq!(manager.feed(0, 10).await.unwrap().len(), 1);
}
