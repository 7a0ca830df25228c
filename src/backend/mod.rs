// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Backend client layer.
//!
//! The backend (auth, database, realtime) is the system of record. This
//! module defines the contract the session layer needs from it and two
//! implementations:
//! - [`SupabaseBackend`]: HTTP client for a Supabase project
//! - [`MemoryBackend`]: in-process store for offline mode and tests

pub mod memory;
pub mod supabase;

pub use memory::MemoryBackend;
pub use supabase::SupabaseBackend;

use crate::models::{
    AuthAccount, Comment, ConnectionDecision, ConnectionRequest, Conversation, Message, NewPost,
    Notification, Post, ProfileRecord, ProfileUpdate, SignupMetadata, UserSummary,
};
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Structured failure categories, translated from backend error codes at
/// the client boundary so callers never inspect message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendErrorKind {
    InvalidCredentials,
    EmailNotConfirmed,
    UserAlreadyExists,
    WeakPassword,
    RateLimited { retry_after: Duration },
    SessionExpired,
    NotFound,
    PermissionDenied,
    Conflict,
    Validation,
    Network,
    Unavailable,
    Unknown,
}

/// Error returned by every backend call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    /// Raw backend text. Never shown to users without sanitization.
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.kind, BackendErrorKind::RateLimited { .. })
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Operations the client requires from the backend.
#[async_trait]
pub trait Backend: Send + Sync {
    // ─── Auth ────────────────────────────────────────────────────

    /// Create an account. Does not sign in.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignupMetadata,
    ) -> BackendResult<Uuid>;

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<AuthAccount>;

    async fn sign_out(&self) -> BackendResult<()>;

    /// The account behind the current credentials, if they are still valid.
    async fn current_user(&self) -> BackendResult<Option<AuthAccount>>;

    async fn reset_password_for_email(&self, email: &str, redirect_url: &str)
        -> BackendResult<()>;

    async fn update_password(&self, new_password: &str) -> BackendResult<()>;

    // ─── Profile ─────────────────────────────────────────────────

    async fn get_profile(&self, account_id: Uuid) -> BackendResult<ProfileRecord>;

    /// Must reject callers that do not own `account_id`.
    async fn update_profile(
        &self,
        account_id: Uuid,
        fields: &ProfileUpdate,
    ) -> BackendResult<ProfileRecord>;

    // ─── Social Graph ────────────────────────────────────────────

    async fn get_followers(&self, account_id: Uuid) -> BackendResult<Vec<UserSummary>>;

    async fn get_following(&self, account_id: Uuid) -> BackendResult<Vec<UserSummary>>;

    /// Idempotent: following twice is not an error.
    async fn follow(&self, follower_id: Uuid, target_id: Uuid) -> BackendResult<()>;

    /// Idempotent: unfollowing a user not followed is not an error.
    async fn unfollow(&self, follower_id: Uuid, target_id: Uuid) -> BackendResult<()>;

    async fn send_connection_request(
        &self,
        from_id: Uuid,
        to_id: Uuid,
        message: Option<&str>,
    ) -> BackendResult<ConnectionRequest>;

    async fn respond_to_connection_request(
        &self,
        request_id: Uuid,
        decision: ConnectionDecision,
    ) -> BackendResult<()>;

    // ─── Content ─────────────────────────────────────────────────

    async fn create_post(&self, author_id: Uuid, post: &NewPost) -> BackendResult<Post>;

    async fn get_feed(&self, account_id: Uuid, page: u32, limit: u32) -> BackendResult<Vec<Post>>;

    /// Returns whether the post is liked after the toggle.
    async fn toggle_like(&self, post_id: Uuid, account_id: Uuid) -> BackendResult<bool>;

    async fn add_comment(
        &self,
        post_id: Uuid,
        author_id: Uuid,
        content: &str,
    ) -> BackendResult<Comment>;

    async fn get_comments(&self, post_id: Uuid) -> BackendResult<Vec<Comment>>;

    /// Ownership-checked delete.
    async fn delete_post(&self, post_id: Uuid, author_id: Uuid) -> BackendResult<()>;

    // ─── Messaging ───────────────────────────────────────────────

    async fn create_or_get_conversation(&self, user_a: Uuid, user_b: Uuid) -> BackendResult<Uuid>;

    async fn get_conversations(&self, account_id: Uuid) -> BackendResult<Vec<Conversation>>;

    async fn get_messages(&self, conversation_id: Uuid) -> BackendResult<Vec<Message>>;

    async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> BackendResult<Message>;

    /// Mark messages from the other participant as read; returns how many changed.
    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> BackendResult<u32>;

    /// Deliver newly inserted messages of a conversation as they arrive.
    async fn subscribe_to_messages(&self, conversation_id: Uuid)
        -> BackendResult<MessageSubscription>;

    // ─── Notifications ───────────────────────────────────────────

    async fn get_notifications(&self, account_id: Uuid) -> BackendResult<Vec<Notification>>;

    async fn mark_notification_read(&self, notification_id: Uuid) -> BackendResult<()>;

    async fn mark_all_notifications_read(&self, account_id: Uuid) -> BackendResult<()>;
}

/// Live feed of new messages in one conversation.
///
/// Dropping the subscription stops the background delivery task.
pub struct MessageSubscription {
    conversation_id: Uuid,
    receiver: mpsc::Receiver<Message>,
    cancel: CancellationToken,
}

impl MessageSubscription {
    pub fn new(
        conversation_id: Uuid,
        receiver: mpsc::Receiver<Message>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            conversation_id,
            receiver,
            cancel,
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    /// Wait for the next message. `None` once the feed has shut down.
    pub async fn recv(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }
}

impl Stream for MessageSubscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for MessageSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
