// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process backend for offline mode and tests.
//!
//! Mirrors the behavior the session layer relies on from the real backend
//! (ambiguous credential errors, owner checks, idempotent follows) and adds
//! test hooks:
//! - a log of every call made, by operation name
//! - one-shot injected failures per operation
//! - artificial latency applied to every call

use super::{Backend, BackendError, BackendErrorKind, BackendResult, MessageSubscription};
use crate::models::user::non_blank;
use crate::models::{
    AuthAccount, Comment, ConnectionDecision, ConnectionRequest, ConnectionStatus, Conversation,
    Message, NewPost, Notification, Post, ProfileRecord, ProfileUpdate, Role, SignupMetadata,
    UserSummary,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const SUBSCRIPTION_BUFFER: usize = 64;

struct MemoryAccount {
    id: Uuid,
    password: String,
    email_verified: bool,
}

#[derive(Default)]
struct MemoryStore {
    accounts: HashMap<String, MemoryAccount>,
    current: Option<AuthAccount>,
    profiles: HashMap<Uuid, ProfileRecord>,
    /// (follower, followed)
    follows: HashSet<(Uuid, Uuid)>,
    connection_requests: HashMap<Uuid, ConnectionRequest>,
    posts: Vec<Post>,
    /// (post, user)
    likes: HashSet<(Uuid, Uuid)>,
    comments: Vec<Comment>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    notifications: Vec<Notification>,
}

impl MemoryStore {
    fn summaries(&self, ids: impl Iterator<Item = Uuid>) -> Vec<UserSummary> {
        ids.filter_map(|id| self.profiles.get(&id).map(UserSummary::from))
            .collect()
    }

    fn adjust_follow_counts(&mut self, follower_id: Uuid, target_id: Uuid, delta: i64) {
        if let Some(profile) = self.profiles.get_mut(&follower_id) {
            profile.following_count = apply_delta(profile.following_count, delta);
        }
        if let Some(profile) = self.profiles.get_mut(&target_id) {
            profile.followers_count = apply_delta(profile.followers_count, delta);
        }
    }

    fn unread_for(&self, conversation_id: Uuid, reader_id: Uuid) -> u32 {
        self.messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id && m.sender_id != reader_id)
            .filter(|m| !m.is_read)
            .count() as u32
    }

    fn conversation_between(&mut self, user_a: Uuid, user_b: Uuid) -> Uuid {
        if let Some(existing) = self
            .conversations
            .iter()
            .find(|c| c.involves(user_a) && c.involves(user_b))
        {
            return existing.id;
        }
        let conversation = Conversation {
            id: Uuid::new_v4(),
            participant_one: user_a,
            participant_two: user_b,
            last_message: None,
            updated_at: Utc::now(),
            unread_count: 0,
        };
        let id = conversation.id;
        self.conversations.push(conversation);
        id
    }

    fn insert_message(&mut self, conversation_id: Uuid, sender_id: Uuid, content: &str) -> Message {
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: content.to_string(),
            is_read: false,
            created_at: Utc::now(),
        };
        if let Some(conversation) = self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conversation.last_message = Some(message.content.clone());
            conversation.updated_at = message.created_at;
        }
        self.messages.push(message.clone());
        message
    }
}

fn apply_delta(value: u32, delta: i64) -> u32 {
    if delta >= 0 {
        value.saturating_add(delta as u32)
    } else {
        value.saturating_sub(delta.unsigned_abs() as u32)
    }
}

fn not_found(what: &str) -> BackendError {
    BackendError::new(BackendErrorKind::NotFound, format!("{} not found", what))
}

/// In-memory [`Backend`].
pub struct MemoryBackend {
    store: Mutex<MemoryStore>,
    calls: Mutex<Vec<&'static str>>,
    failures: Mutex<HashMap<&'static str, BackendError>>,
    latency: Mutex<Option<Duration>>,
    message_events: broadcast::Sender<Message>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (message_events, _) = broadcast::channel(SUBSCRIPTION_BUFFER);
        Self {
            store: Mutex::new(MemoryStore::default()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
            message_events,
        }
    }

    fn store(&self) -> MutexGuard<'_, MemoryStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the call, apply latency, and surface any injected failure.
    async fn enter(&self, operation: &'static str) -> BackendResult<()> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(operation);

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }

        let injected = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(operation);
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn require_current(&self, account_id: Uuid) -> BackendResult<()> {
        match self.store().current {
            Some(current) if current.account_id == account_id => Ok(()),
            Some(_) => Err(BackendError::new(
                BackendErrorKind::PermissionDenied,
                "new row violates row-level security policy",
            )),
            None => Err(BackendError::new(
                BackendErrorKind::SessionExpired,
                "JWT expired",
            )),
        }
    }

    // ─── Test Hooks ──────────────────────────────────────────────

    /// Create a confirmed account with a profile. Returns the account id.
    pub fn insert_account(&self, email: &str, password: &str, full_name: &str, role: Role) -> Uuid {
        let id = Uuid::new_v4();
        let email = email.trim().to_lowercase();
        let mut store = self.store();
        store.accounts.insert(
            email.clone(),
            MemoryAccount {
                id,
                password: password.to_string(),
                email_verified: true,
            },
        );
        store.profiles.insert(
            id,
            ProfileRecord {
                id,
                email,
                full_name: full_name.to_string(),
                role,
                sport: None,
                location: None,
                bio: None,
                avatar_url: None,
                cover_url: None,
                is_verified: false,
                followers_count: 0,
                following_count: 0,
                posts_count: 0,
            },
        );
        id
    }

    /// Add an unread notification for `user_id`.
    pub fn insert_notification(&self, user_id: Uuid, kind: &str, message: &str) -> Uuid {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id,
            kind: kind.to_string(),
            message: message.to_string(),
            actor_id: None,
            is_read: false,
            created_at: Utc::now(),
        };
        let id = notification.id;
        self.store().notifications.push(notification);
        id
    }

    /// Deliver a message from `sender_id` to `recipient_id`, creating the
    /// conversation if needed.
    pub fn insert_message(&self, sender_id: Uuid, recipient_id: Uuid, content: &str) -> Message {
        let message = {
            let mut store = self.store();
            let conversation_id = store.conversation_between(sender_id, recipient_id);
            store.insert_message(conversation_id, sender_id, content)
        };
        let _ = self.message_events.send(message.clone());
        message
    }

    /// Record a follow edge directly, bypassing the current-user check.
    pub fn insert_follow(&self, follower_id: Uuid, target_id: Uuid) {
        let mut store = self.store();
        if store.follows.insert((follower_id, target_id)) {
            store.adjust_follow_counts(follower_id, target_id, 1);
        }
    }

    /// Drop the signed-in account, as if its token expired server-side.
    pub fn expire_session(&self) {
        self.store().current = None;
    }

    /// Fail the next call of `operation` with `error`.
    pub fn fail_next(&self, operation: &'static str, error: BackendError) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(operation, error);
    }

    /// Delay every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Names of all operations called so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn profile(&self, account_id: Uuid) -> Option<ProfileRecord> {
        self.store().profiles.get(&account_id).cloned()
    }

    pub fn is_following(&self, follower_id: Uuid, target_id: Uuid) -> bool {
        self.store().follows.contains(&(follower_id, target_id))
    }

    pub fn unread_notifications(&self, user_id: Uuid) -> usize {
        self.store()
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignupMetadata,
    ) -> BackendResult<Uuid> {
        self.enter("sign_up").await?;
        let email = email.trim().to_lowercase();
        if self.store().accounts.contains_key(&email) {
            return Err(BackendError::new(
                BackendErrorKind::UserAlreadyExists,
                "User already registered",
            ));
        }
        let id = self.insert_account(&email, password, &metadata.full_name, metadata.role.clone());
        if let Some(account) = self.store().accounts.get_mut(&email) {
            account.email_verified = false;
        }
        Ok(id)
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<AuthAccount> {
        self.enter("sign_in").await?;
        let mut store = self.store();
        let account = store
            .accounts
            .get(&email.trim().to_lowercase())
            .filter(|account| account.password == password)
            .map(|account| AuthAccount {
                account_id: account.id,
                email_verified: account.email_verified,
            })
            .ok_or_else(|| {
                BackendError::new(
                    BackendErrorKind::InvalidCredentials,
                    "Invalid login credentials",
                )
            })?;
        store.current = Some(account);
        Ok(account)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.enter("sign_out").await?;
        self.store().current = None;
        Ok(())
    }

    async fn current_user(&self) -> BackendResult<Option<AuthAccount>> {
        self.enter("current_user").await?;
        Ok(self.store().current)
    }

    async fn reset_password_for_email(
        &self,
        _email: &str,
        _redirect_url: &str,
    ) -> BackendResult<()> {
        // Succeeds for unknown addresses too, like the hosted auth service.
        self.enter("reset_password_for_email").await
    }

    async fn update_password(&self, new_password: &str) -> BackendResult<()> {
        self.enter("update_password").await?;
        let mut store = self.store();
        let current = store.current.ok_or_else(|| {
            BackendError::new(BackendErrorKind::SessionExpired, "JWT expired")
        })?;
        if let Some(account) = store
            .accounts
            .values_mut()
            .find(|account| account.id == current.account_id)
        {
            account.password = new_password.to_string();
        }
        Ok(())
    }

    async fn get_profile(&self, account_id: Uuid) -> BackendResult<ProfileRecord> {
        self.enter("get_profile").await?;
        self.store()
            .profiles
            .get(&account_id)
            .cloned()
            .ok_or_else(|| not_found("Profile"))
    }

    async fn update_profile(
        &self,
        account_id: Uuid,
        fields: &ProfileUpdate,
    ) -> BackendResult<ProfileRecord> {
        self.enter("update_profile").await?;
        self.require_current(account_id)?;
        let mut store = self.store();
        let profile = store
            .profiles
            .get_mut(&account_id)
            .ok_or_else(|| not_found("Profile"))?;
        if let Some(full_name) = &fields.full_name {
            profile.full_name = full_name.clone();
        }
        if let Some(role) = &fields.role {
            profile.role = role.clone();
        }
        for (target, value) in [
            (&mut profile.sport, &fields.sport),
            (&mut profile.location, &fields.location),
            (&mut profile.bio, &fields.bio),
            (&mut profile.avatar_url, &fields.avatar_url),
            (&mut profile.cover_url, &fields.cover_url),
        ] {
            if let Some(value) = value {
                *target = non_blank(Some(value.clone()));
            }
        }
        Ok(profile.clone())
    }

    async fn get_followers(&self, account_id: Uuid) -> BackendResult<Vec<UserSummary>> {
        self.enter("get_followers").await?;
        let store = self.store();
        let ids: Vec<Uuid> = store
            .follows
            .iter()
            .filter(|(_, followed)| *followed == account_id)
            .map(|(follower, _)| *follower)
            .collect();
        Ok(store.summaries(ids.into_iter()))
    }

    async fn get_following(&self, account_id: Uuid) -> BackendResult<Vec<UserSummary>> {
        self.enter("get_following").await?;
        let store = self.store();
        let ids: Vec<Uuid> = store
            .follows
            .iter()
            .filter(|(follower, _)| *follower == account_id)
            .map(|(_, followed)| *followed)
            .collect();
        Ok(store.summaries(ids.into_iter()))
    }

    async fn follow(&self, follower_id: Uuid, target_id: Uuid) -> BackendResult<()> {
        self.enter("follow").await?;
        self.require_current(follower_id)?;
        let mut store = self.store();
        if !store.profiles.contains_key(&target_id) {
            return Err(not_found("Profile"));
        }
        if store.follows.insert((follower_id, target_id)) {
            store.adjust_follow_counts(follower_id, target_id, 1);
        }
        Ok(())
    }

    async fn unfollow(&self, follower_id: Uuid, target_id: Uuid) -> BackendResult<()> {
        self.enter("unfollow").await?;
        self.require_current(follower_id)?;
        let mut store = self.store();
        if store.follows.remove(&(follower_id, target_id)) {
            store.adjust_follow_counts(follower_id, target_id, -1);
        }
        Ok(())
    }

    async fn send_connection_request(
        &self,
        from_id: Uuid,
        to_id: Uuid,
        message: Option<&str>,
    ) -> BackendResult<ConnectionRequest> {
        self.enter("send_connection_request").await?;
        self.require_current(from_id)?;
        let mut store = self.store();
        if store.connection_requests.values().any(|r| {
            r.from_user_id == from_id && r.to_user_id == to_id && r.status == ConnectionStatus::Pending
        }) {
            return Err(BackendError::new(
                BackendErrorKind::Conflict,
                "duplicate key value violates unique constraint",
            ));
        }
        let request = ConnectionRequest {
            id: Uuid::new_v4(),
            from_user_id: from_id,
            to_user_id: to_id,
            message: message.map(str::to_string),
            status: ConnectionStatus::Pending,
            created_at: Utc::now(),
        };
        store.connection_requests.insert(request.id, request.clone());
        Ok(request)
    }

    async fn respond_to_connection_request(
        &self,
        request_id: Uuid,
        decision: ConnectionDecision,
    ) -> BackendResult<()> {
        self.enter("respond_to_connection_request").await?;
        let mut store = self.store();
        let current = store.current.map(|c| c.account_id);
        let request = store
            .connection_requests
            .get_mut(&request_id)
            .ok_or_else(|| not_found("Connection request"))?;
        if Some(request.to_user_id) != current {
            return Err(BackendError::new(
                BackendErrorKind::PermissionDenied,
                "only the recipient may respond",
            ));
        }
        request.status = decision.status();
        Ok(())
    }

    async fn create_post(&self, author_id: Uuid, post: &NewPost) -> BackendResult<Post> {
        self.enter("create_post").await?;
        self.require_current(author_id)?;
        let created = Post {
            id: Uuid::new_v4(),
            author_id,
            content: post.content.clone(),
            media_url: post.media_url.clone(),
            likes_count: 0,
            comments_count: 0,
            created_at: Utc::now(),
        };
        let mut store = self.store();
        store.posts.push(created.clone());
        if let Some(profile) = store.profiles.get_mut(&author_id) {
            profile.posts_count += 1;
        }
        Ok(created)
    }

    async fn get_feed(&self, _account_id: Uuid, page: u32, limit: u32) -> BackendResult<Vec<Post>> {
        self.enter("get_feed").await?;
        let mut posts = self.store().posts.clone();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts
            .into_iter()
            .skip(page as usize * limit as usize)
            .take(limit as usize)
            .collect())
    }

    async fn toggle_like(&self, post_id: Uuid, account_id: Uuid) -> BackendResult<bool> {
        self.enter("toggle_like").await?;
        let mut store = self.store();
        if !store.posts.iter().any(|p| p.id == post_id) {
            return Err(not_found("Post"));
        }
        let liked = if store.likes.remove(&(post_id, account_id)) {
            false
        } else {
            store.likes.insert((post_id, account_id));
            true
        };
        let post = store
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| not_found("Post"))?;
        post.likes_count = apply_delta(post.likes_count, if liked { 1 } else { -1 });
        Ok(liked)
    }

    async fn add_comment(
        &self,
        post_id: Uuid,
        author_id: Uuid,
        content: &str,
    ) -> BackendResult<Comment> {
        self.enter("add_comment").await?;
        let mut store = self.store();
        let post = store
            .posts
            .iter_mut()
            .find(|p| p.id == post_id)
            .ok_or_else(|| not_found("Post"))?;
        post.comments_count += 1;
        let comment = Comment {
            id: Uuid::new_v4(),
            post_id,
            author_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        store.comments.push(comment.clone());
        Ok(comment)
    }

    async fn get_comments(&self, post_id: Uuid) -> BackendResult<Vec<Comment>> {
        self.enter("get_comments").await?;
        Ok(self
            .store()
            .comments
            .iter()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect())
    }

    async fn delete_post(&self, post_id: Uuid, author_id: Uuid) -> BackendResult<()> {
        self.enter("delete_post").await?;
        let mut store = self.store();
        let index = store
            .posts
            .iter()
            .position(|p| p.id == post_id && p.author_id == author_id)
            .ok_or_else(|| not_found("Post"))?;
        store.posts.remove(index);
        store.comments.retain(|c| c.post_id != post_id);
        if let Some(profile) = store.profiles.get_mut(&author_id) {
            profile.posts_count = profile.posts_count.saturating_sub(1);
        }
        Ok(())
    }

    async fn create_or_get_conversation(&self, user_a: Uuid, user_b: Uuid) -> BackendResult<Uuid> {
        self.enter("create_or_get_conversation").await?;
        Ok(self.store().conversation_between(user_a, user_b))
    }

    async fn get_conversations(&self, account_id: Uuid) -> BackendResult<Vec<Conversation>> {
        self.enter("get_conversations").await?;
        let store = self.store();
        let mut conversations: Vec<Conversation> = store
            .conversations
            .iter()
            .filter(|c| c.involves(account_id))
            .map(|c| Conversation {
                unread_count: store.unread_for(c.id, account_id),
                ..c.clone()
            })
            .collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(conversations)
    }

    async fn get_messages(&self, conversation_id: Uuid) -> BackendResult<Vec<Message>> {
        self.enter("get_messages").await?;
        Ok(self
            .store()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> BackendResult<Message> {
        self.enter("send_message").await?;
        self.require_current(sender_id)?;
        let message = {
            let mut store = self.store();
            if !store.conversations.iter().any(|c| c.id == conversation_id) {
                return Err(not_found("Conversation"));
            }
            store.insert_message(conversation_id, sender_id, content)
        };
        let _ = self.message_events.send(message.clone());
        Ok(message)
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> BackendResult<u32> {
        self.enter("mark_conversation_read").await?;
        let mut changed = 0;
        for message in self.store().messages.iter_mut() {
            if message.conversation_id == conversation_id
                && message.sender_id != reader_id
                && !message.is_read
            {
                message.is_read = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn subscribe_to_messages(
        &self,
        conversation_id: Uuid,
    ) -> BackendResult<MessageSubscription> {
        self.enter("subscribe_to_messages").await?;
        let mut events = self.message_events.subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(message) if message.conversation_id == conversation_id => {
                            if tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Message subscription lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(MessageSubscription::new(conversation_id, rx, cancel))
    }

    async fn get_notifications(&self, account_id: Uuid) -> BackendResult<Vec<Notification>> {
        self.enter("get_notifications").await?;
        let mut notifications: Vec<Notification> = self
            .store()
            .notifications
            .iter()
            .filter(|n| n.user_id == account_id)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    async fn mark_notification_read(&self, notification_id: Uuid) -> BackendResult<()> {
        self.enter("mark_notification_read").await?;
        let mut store = self.store();
        let notification = store
            .notifications
            .iter_mut()
            .find(|n| n.id == notification_id)
            .ok_or_else(|| not_found("Notification"))?;
        notification.is_read = true;
        Ok(())
    }

    async fn mark_all_notifications_read(&self, account_id: Uuid) -> BackendResult<()> {
        self.enter("mark_all_notifications_read").await?;
        for notification in self.store().notifications.iter_mut() {
            if notification.user_id == account_id {
                notification.is_read = true;
            }
        }
        Ok(())
    }
}
