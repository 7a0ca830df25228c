// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session and account state manager.
//!
//! [`SessionManager`] owns everything the client knows about the signed-in
//! user: the [`Session`], the set of followed accounts and the unread
//! counters. Observers read it through [`SessionSnapshot`]s published on a
//! watch channel; only manager operations mutate it.
//!
//! Every operation follows the same order:
//! 1. validate and sanitize input locally
//! 2. consult local guards (auth forms only)
//! 3. call the backend, bounded by a timeout and the manager's cancel token
//! 4. mutate local state only after the backend succeeded
//!
//! The notification counters are the exception to (4): they are updated
//! optimistically and backend failures are only logged.

use crate::backend::{Backend, BackendErrorKind, BackendResult, MessageSubscription, SupabaseBackend};
use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{
    AuthAccount, Comment, ConnectionDecision, ConnectionRequest, Conversation, Message, NewPost,
    Notification, Post, ProfileUpdate, Role, Session, SignupInput, SignupMetadata,
    UnreadCounters, UserSummary,
};
use crate::services::fingerprint::ClientEnvironment;
use crate::services::guard::{AuthAction, AuthGuard, GuardSettings, WindowLimit};
use crate::services::social;
use crate::services::validation::{
    check_password_strength, require_text, sanitize_text, validate_email,
    validate_length, validate_login_password, validate_url, UrlPolicy,
};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const NAVIGATION_BUFFER: usize = 16;
const MAX_POST_LEN: usize = 2000;
const MAX_COMMENT_LEN: usize = 1000;
const MAX_FEED_PAGE_SIZE: u32 = 50;

// ─── State ───────────────────────────────────────────────────────

/// Immutable view of the manager state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub session: Option<Session>,
    /// Accounts the current user follows. Never contains the user itself.
    pub following: HashSet<Uuid>,
    pub unread: UnreadCounters,
    pub is_loading: bool,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn is_following(&self, user_id: Uuid) -> bool {
        self.following.contains(&user_id)
    }
}

/// Where the UI should go after an auth transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Navigation {
    Home,
    Login,
    CompleteProfile,
}

/// What happens to a backend failure of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Returned to the caller as `Err`.
    Propagate,
    /// Logged and reported through [`BestEffort`].
    LogOnly,
}

/// Manager operations, used as a structured log field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Login,
    Signup,
    Logout,
    RefreshSession,
    LoadAccount,
    RequestPasswordReset,
    UpdatePassword,
    UpdateProfile,
    Follow,
    Unfollow,
    Followers,
    Following,
    SendConnectionRequest,
    RespondToConnectionRequest,
    CreatePost,
    Feed,
    ToggleLike,
    AddComment,
    Comments,
    DeletePost,
    SendMessage,
    Conversations,
    Messages,
    MarkConversationRead,
    SubscribeToMessages,
    Notifications,
    MarkNotificationRead,
    MarkAllNotificationsRead,
}

impl Operation {
    pub fn failure_policy(self) -> FailurePolicy {
        match self {
            Operation::Logout
            | Operation::MarkNotificationRead
            | Operation::MarkAllNotificationsRead => FailurePolicy::LogOnly,
            _ => FailurePolicy::Propagate,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Login => "login",
            Operation::Signup => "signup",
            Operation::Logout => "logout",
            Operation::RefreshSession => "refresh_session",
            Operation::LoadAccount => "load_account",
            Operation::RequestPasswordReset => "request_password_reset",
            Operation::UpdatePassword => "update_password",
            Operation::UpdateProfile => "update_profile",
            Operation::Follow => "follow",
            Operation::Unfollow => "unfollow",
            Operation::Followers => "followers",
            Operation::Following => "following",
            Operation::SendConnectionRequest => "send_connection_request",
            Operation::RespondToConnectionRequest => "respond_to_connection_request",
            Operation::CreatePost => "create_post",
            Operation::Feed => "feed",
            Operation::ToggleLike => "toggle_like",
            Operation::AddComment => "add_comment",
            Operation::Comments => "comments",
            Operation::DeletePost => "delete_post",
            Operation::SendMessage => "send_message",
            Operation::Conversations => "conversations",
            Operation::Messages => "messages",
            Operation::MarkConversationRead => "mark_conversation_read",
            Operation::SubscribeToMessages => "subscribe_to_messages",
            Operation::Notifications => "notifications",
            Operation::MarkNotificationRead => "mark_notification_read",
            Operation::MarkAllNotificationsRead => "mark_all_notifications_read",
        }
    }
}

/// Outcome of an operation whose backend failures are logged, not returned.
///
/// The local effect has already happened either way. Inspecting the result
/// is optional.
#[derive(Debug)]
pub struct BestEffort {
    operation: Operation,
    error: Option<AppError>,
}

impl BestEffort {
    fn from_result<T>(operation: Operation, result: Result<T>) -> Self {
        debug_assert_eq!(operation.failure_policy(), FailurePolicy::LogOnly);
        match result {
            Ok(_) => Self {
                operation,
                error: None,
            },
            Err(err) => {
                tracing::warn!(
                    operation = operation.as_str(),
                    code = err.code(),
                    error = %err,
                    "Backend failure ignored"
                );
                Self {
                    operation,
                    error: Some(err),
                }
            }
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn error(&self) -> Option<&AppError> {
        self.error.as_ref()
    }

    pub fn into_result(self) -> Result<()> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ─── Settings ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Upper bound on every backend call.
    pub request_timeout: Duration,
    /// Which hosts avatar, cover and media URLs may point at.
    pub url_policy: UrlPolicy,
    pub password_reset_redirect: String,
    pub guard: GuardSettings,
    /// Source of the rate-limit key.
    pub client: ClientEnvironment,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            url_policy: UrlPolicy::Permissive,
            password_reset_redirect: "http://localhost:5173/reset-password".to_string(),
            guard: GuardSettings::default(),
            client: ClientEnvironment::current_process(),
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout,
            url_policy: config.environment.url_policy(),
            password_reset_redirect: config.password_reset_redirect(),
            guard: GuardSettings {
                login: WindowLimit::new(config.login_max_attempts, config.login_window),
                ..GuardSettings::default()
            },
            client: ClientEnvironment::current_process(),
        }
    }
}

// ─── Manager ─────────────────────────────────────────────────────

pub struct SessionManager {
    backend: Arc<dyn Backend>,
    settings: SessionSettings,
    guard: AuthGuard,
    state: watch::Sender<SessionSnapshot>,
    /// Auth operations in flight; `is_loading` mirrors `loading > 0`.
    loading: AtomicUsize,
    navigation: broadcast::Sender<Navigation>,
    cancel: Mutex<CancellationToken>,
}

/// Keeps `is_loading` set while alive.
struct LoadingGuard<'a> {
    manager: &'a SessionManager,
}

impl<'a> LoadingGuard<'a> {
    fn new(manager: &'a SessionManager) -> Self {
        manager.loading.fetch_add(1, Ordering::SeqCst);
        manager.sync_loading();
        Self { manager }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.manager.loading.fetch_sub(1, Ordering::SeqCst);
        self.manager.sync_loading();
    }
}

impl SessionManager {
    pub fn new(backend: Arc<dyn Backend>, settings: SessionSettings) -> Self {
        let guard = AuthGuard::new(settings.client.fingerprint(), settings.guard.clone());
        let (state, _) = watch::channel(SessionSnapshot::default());
        let (navigation, _) = broadcast::channel(NAVIGATION_BUFFER);

        Self {
            backend,
            settings,
            guard,
            state,
            loading: AtomicUsize::new(0),
            navigation,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Manager backed by the configured Supabase project.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = SupabaseBackend::new(config)?;
        Ok(Self::new(Arc::new(backend), SessionSettings::from(config)))
    }

    // ─── Observation ─────────────────────────────────────────────

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub fn navigation(&self) -> broadcast::Receiver<Navigation> {
        self.navigation.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    pub fn current_user_id(&self) -> Option<Uuid> {
        self.state.borrow().user_id()
    }

    /// Local membership check; never touches the network.
    pub fn is_following(&self, user_id: Uuid) -> bool {
        self.state.borrow().is_following(user_id)
    }

    /// Cancel every backend call currently in flight on this manager.
    pub fn cancel_pending(&self) {
        let mut token = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
        tracing::debug!("Cancelled pending backend calls");
    }

    // ─── Auth ────────────────────────────────────────────────────

    /// Sign in and load the account.
    ///
    /// Wrong passwords and unknown accounts both surface as
    /// [`AppError::InvalidCredentials`].
    pub async fn login(&self, email: &str, password: &str) -> Result<Session> {
        let email = validate_email(email)?;
        validate_login_password(password)?;
        self.guard.precheck(AuthAction::Login)?;

        let _loading = LoadingGuard::new(self);

        let account = match self
            .call(Operation::Login, self.backend.sign_in(&email, password))
            .await
        {
            Ok(account) => account,
            Err(err) => {
                let err = match err {
                    AppError::Backend(e) if e.kind == BackendErrorKind::NotFound => {
                        AppError::InvalidCredentials
                    }
                    other => other,
                };
                if matches!(err, AppError::InvalidCredentials | AppError::Backend(_)) {
                    self.guard.record_failure(AuthAction::Login);
                }
                tracing::info!(code = err.code(), "Login failed");
                return Err(err);
            }
        };

        let session = match self.install_account(account).await {
            Ok(session) => session,
            Err(err) => {
                // Signed in but unusable: drop the backend session too.
                tracing::warn!(code = err.code(), "Account load failed after sign-in");
                let result = self.call(Operation::Logout, self.backend.sign_out()).await;
                BestEffort::from_result(Operation::Logout, result);
                return Err(err);
            }
        };
        self.guard.record_success(AuthAction::Login);
        tracing::info!(user_id = %session.id, role = %session.role, "Logged in");
        self.navigate(Navigation::Home);
        Ok(session)
    }

    /// Create an account. The new user is not signed in.
    pub async fn signup(&self, input: SignupInput) -> Result<()> {
        let email = validate_email(&input.email)?;
        check_password_strength(&input.password).into_result()?;
        let full_name = clean_required("Full name", &input.full_name)?;
        let role = Role::from(clean_required("Role", &input.role)?);
        self.guard.precheck(AuthAction::Signup)?;
        self.guard.record_attempt(AuthAction::Signup);

        let _loading = LoadingGuard::new(self);

        let metadata = SignupMetadata { full_name, role };
        let account_id = self
            .call(
                Operation::Signup,
                self.backend.sign_up(&email, &input.password, &metadata),
            )
            .await?;

        tracing::info!(account_id = %account_id, role = %metadata.role, "Account created");
        self.navigate(Navigation::CompleteProfile);
        Ok(())
    }

    /// Sign out. Local state is cleared even if the backend call fails.
    pub async fn logout(&self) -> BestEffort {
        let _loading = LoadingGuard::new(self);

        let result = self
            .call(Operation::Logout, self.backend.sign_out())
            .await;
        let user_id = self.current_user_id();
        self.clear_state();
        tracing::info!(user_id = ?user_id, "Logged out");
        self.navigate(Navigation::Login);

        BestEffort::from_result(Operation::Logout, result)
    }

    /// Re-read the account from the backend.
    ///
    /// Returns `None` when the backend no longer recognizes the credentials;
    /// a local session is then treated as expired.
    pub async fn refresh_session(&self) -> Result<Option<Session>> {
        let _loading = LoadingGuard::new(self);

        let account = self
            .call(Operation::RefreshSession, self.backend.current_user())
            .await?;
        match account {
            Some(account) => Ok(Some(self.install_account(account).await?)),
            None => {
                self.expire_session();
                Ok(None)
            }
        }
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let email = validate_email(email)?;
        self.guard.precheck(AuthAction::PasswordReset)?;
        self.guard.record_attempt(AuthAction::PasswordReset);

        self.call(
            Operation::RequestPasswordReset,
            self.backend
                .reset_password_for_email(&email, &self.settings.password_reset_redirect),
        )
        .await?;
        tracing::info!("Password reset requested");
        Ok(())
    }

    pub async fn update_password(&self, new_password: &str) -> Result<()> {
        let user_id = self.require_user_id()?;
        check_password_strength(new_password).into_result()?;

        self.call(
            Operation::UpdatePassword,
            self.backend.update_password(new_password),
        )
        .await?;
        tracing::info!(user_id = %user_id, "Password updated");
        Ok(())
    }

    // ─── Profile ─────────────────────────────────────────────────

    /// Update the current user's profile and merge the change into the session.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<Session> {
        let user_id = self.require_user_id()?;
        self.update_profile_for(user_id, update).await
    }

    /// Update the profile of `account_id`, which must be the current user.
    pub async fn update_profile_for(
        &self,
        account_id: Uuid,
        update: ProfileUpdate,
    ) -> Result<Session> {
        let session = self.require_session()?;
        ensure_owner(session.id, account_id, "edit this profile")?;
        let update = self.clean_profile_update(update)?;
        if update.is_empty() {
            return Ok(session);
        }

        self.call(
            Operation::UpdateProfile,
            self.backend.update_profile(account_id, &update),
        )
        .await?;

        let mut updated = None;
        self.state.send_modify(|state| {
            if let Some(current) = state.session.as_mut().filter(|s| s.id == account_id) {
                current.apply(&update);
                updated = Some(current.clone());
            }
        });
        updated.ok_or(AppError::Unauthenticated)
    }

    fn clean_profile_update(&self, update: ProfileUpdate) -> Result<ProfileUpdate> {
        let full_name = update
            .full_name
            .map(|name| clean_required("Full name", &name))
            .transpose()?;
        let role = update
            .role
            .map(|role| clean_required("Role", role.as_str()).map(Role::from))
            .transpose()?;

        Ok(ProfileUpdate {
            full_name,
            role,
            sport: update.sport.map(|v| sanitize_text(&v)),
            location: update.location.map(|v| sanitize_text(&v)),
            bio: update.bio.map(|v| sanitize_text(&v)),
            avatar_url: self.clean_url(update.avatar_url)?,
            cover_url: self.clean_url(update.cover_url)?,
        })
    }

    /// Validate an optional URL field. A blank value clears the field.
    fn clean_url(&self, value: Option<String>) -> Result<Option<String>> {
        match value {
            None => Ok(None),
            Some(v) if v.trim().is_empty() => Ok(Some(String::new())),
            Some(v) => Ok(Some(
                validate_url(&v, self.settings.url_policy)?.to_string(),
            )),
        }
    }

    // ─── Social Graph ────────────────────────────────────────────

    pub async fn follow_user(&self, target_id: Uuid) -> Result<()> {
        let user_id = self.require_user_id()?;
        if target_id == user_id {
            return Err(AppError::Validation("You cannot follow yourself".to_string()));
        }

        self.call(Operation::Follow, self.backend.follow(user_id, target_id))
            .await?;

        self.state.send_modify(|state| {
            if state.user_id() != Some(user_id) {
                return;
            }
            if state.following.insert(target_id) {
                if let Some(session) = state.session.as_mut() {
                    session.stats.following = session.stats.following.saturating_add(1);
                }
            }
        });
        tracing::debug!(user_id = %user_id, target_id = %target_id, "Followed user");
        Ok(())
    }

    pub async fn unfollow_user(&self, target_id: Uuid) -> Result<()> {
        let user_id = self.require_user_id()?;
        if target_id == user_id {
            return Err(AppError::Validation("You cannot unfollow yourself".to_string()));
        }

        self.call(Operation::Unfollow, self.backend.unfollow(user_id, target_id))
            .await?;

        self.state.send_modify(|state| {
            if state.user_id() != Some(user_id) {
                return;
            }
            if state.following.remove(&target_id) {
                if let Some(session) = state.session.as_mut() {
                    session.stats.following = session.stats.following.saturating_sub(1);
                }
            }
        });
        tracing::debug!(user_id = %user_id, target_id = %target_id, "Unfollowed user");
        Ok(())
    }

    pub async fn followers(&self, user_id: Uuid) -> Result<Vec<UserSummary>> {
        self.require_user_id()?;
        self.call(Operation::Followers, self.backend.get_followers(user_id))
            .await
    }

    pub async fn following(&self, user_id: Uuid) -> Result<Vec<UserSummary>> {
        self.require_user_id()?;
        self.call(Operation::Following, self.backend.get_following(user_id))
            .await
    }

    /// Accounts followed by both the current user and `other_id`.
    pub async fn mutual_connections(&self, other_id: Uuid) -> Result<Vec<UserSummary>> {
        let user_id = self.require_user_id()?;
        let (mine, theirs) = tokio::try_join!(
            self.call(Operation::Following, self.backend.get_following(user_id)),
            self.call(Operation::Following, self.backend.get_following(other_id)),
        )?;
        Ok(social::mutual_connections(&mine, &theirs))
    }

    pub async fn send_connection_request(
        &self,
        to_id: Uuid,
        message: Option<&str>,
    ) -> Result<ConnectionRequest> {
        let user_id = self.require_user_id()?;
        if to_id == user_id {
            return Err(AppError::Validation(
                "You cannot connect with yourself".to_string(),
            ));
        }
        let message = message.map(sanitize_text).filter(|m| !m.is_empty());

        self.call(
            Operation::SendConnectionRequest,
            self.backend
                .send_connection_request(user_id, to_id, message.as_deref()),
        )
        .await
    }

    pub async fn respond_to_connection_request(
        &self,
        request_id: Uuid,
        decision: ConnectionDecision,
    ) -> Result<()> {
        self.require_user_id()?;
        self.call(
            Operation::RespondToConnectionRequest,
            self.backend.respond_to_connection_request(request_id, decision),
        )
        .await
    }

    // ─── Posts ───────────────────────────────────────────────────

    pub async fn create_post(&self, content: &str, media_url: Option<&str>) -> Result<Post> {
        let user_id = self.require_user_id()?;
        let content = clean_required("Post", content)?;
        validate_length("Post", &content, MAX_POST_LEN)?;
        let media_url = self
            .clean_url(media_url.map(str::to_string))?
            .filter(|url| !url.is_empty());

        let post = self
            .call(
                Operation::CreatePost,
                self.backend
                    .create_post(user_id, &NewPost { content, media_url }),
            )
            .await?;

        self.state.send_modify(|state| {
            if let Some(session) = state.session.as_mut().filter(|s| s.id == user_id) {
                session.stats.posts = session.stats.posts.saturating_add(1);
            }
        });
        Ok(post)
    }

    /// One page of the feed, newest first. `limit` is clamped to 1..=50.
    pub async fn feed(&self, page: u32, limit: u32) -> Result<Vec<Post>> {
        let user_id = self.require_user_id()?;
        let limit = limit.clamp(1, MAX_FEED_PAGE_SIZE);
        self.call(Operation::Feed, self.backend.get_feed(user_id, page, limit))
            .await
    }

    /// Returns whether the post is liked afterwards.
    pub async fn toggle_like(&self, post_id: Uuid) -> Result<bool> {
        let user_id = self.require_user_id()?;
        self.call(Operation::ToggleLike, self.backend.toggle_like(post_id, user_id))
            .await
    }

    pub async fn add_comment(&self, post_id: Uuid, content: &str) -> Result<Comment> {
        let user_id = self.require_user_id()?;
        let content = clean_required("Comment", content)?;
        validate_length("Comment", &content, MAX_COMMENT_LEN)?;

        self.call(
            Operation::AddComment,
            self.backend.add_comment(post_id, user_id, &content),
        )
        .await
    }

    pub async fn comments(&self, post_id: Uuid) -> Result<Vec<Comment>> {
        self.require_user_id()?;
        self.call(Operation::Comments, self.backend.get_comments(post_id))
            .await
    }

    /// Delete one of the current user's posts. The backend enforces
    /// ownership as well.
    pub async fn delete_post(&self, post: &Post) -> Result<()> {
        let user_id = self.require_user_id()?;
        ensure_owner(user_id, post.author_id, "delete this post")?;

        self.call(Operation::DeletePost, self.backend.delete_post(post.id, user_id))
            .await?;

        self.state.send_modify(|state| {
            if let Some(session) = state.session.as_mut().filter(|s| s.id == user_id) {
                session.stats.posts = session.stats.posts.saturating_sub(1);
            }
        });
        Ok(())
    }

    // ─── Messaging ───────────────────────────────────────────────

    /// Send a direct message, creating the conversation if needed.
    pub async fn send_message(&self, recipient_id: Uuid, content: &str) -> Result<Message> {
        let user_id = self.require_user_id()?;
        if recipient_id == user_id {
            return Err(AppError::Validation(
                "You cannot message yourself".to_string(),
            ));
        }
        let content = clean_required("Message", content)?;

        let conversation_id = self
            .call(
                Operation::SendMessage,
                self.backend.create_or_get_conversation(user_id, recipient_id),
            )
            .await?;
        let message = self
            .call(
                Operation::SendMessage,
                self.backend.send_message(conversation_id, user_id, &content),
            )
            .await?;

        tracing::debug!(conversation_id = %conversation_id, "Message sent");
        Ok(message)
    }

    /// The current user's conversations; also refreshes the unread counter.
    pub async fn conversations(&self) -> Result<Vec<Conversation>> {
        let user_id = self.require_user_id()?;
        let conversations = self
            .call(
                Operation::Conversations,
                self.backend.get_conversations(user_id),
            )
            .await?;

        let unread = unread_messages(&conversations);
        self.update_unread(user_id, |counters| counters.messages = unread);
        Ok(conversations)
    }

    pub async fn messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        self.require_user_id()?;
        self.call(Operation::Messages, self.backend.get_messages(conversation_id))
            .await
    }

    /// Mark the other participant's messages as read. Returns how many changed.
    pub async fn mark_conversation_as_read(&self, conversation_id: Uuid) -> Result<u32> {
        let user_id = self.require_user_id()?;
        let changed = self
            .call(
                Operation::MarkConversationRead,
                self.backend.mark_conversation_read(conversation_id, user_id),
            )
            .await?;

        self.update_unread(user_id, |counters| {
            counters.messages = counters.messages.saturating_sub(changed);
        });
        Ok(changed)
    }

    pub async fn subscribe_to_messages(
        &self,
        conversation_id: Uuid,
    ) -> Result<MessageSubscription> {
        self.require_user_id()?;
        self.call(
            Operation::SubscribeToMessages,
            self.backend.subscribe_to_messages(conversation_id),
        )
        .await
    }

    // ─── Notifications ───────────────────────────────────────────

    /// The current user's notifications; also refreshes the unread counter.
    pub async fn notifications(&self) -> Result<Vec<Notification>> {
        let user_id = self.require_user_id()?;
        let notifications = self
            .call(
                Operation::Notifications,
                self.backend.get_notifications(user_id),
            )
            .await?;

        let unread = unread_notifications(&notifications);
        self.update_unread(user_id, |counters| counters.notifications = unread);
        Ok(notifications)
    }

    /// Decrement the unread counter (never below zero) and tell the backend.
    pub async fn mark_notification_as_read(&self, notification_id: Uuid) -> BestEffort {
        let op = Operation::MarkNotificationRead;
        let user_id = match self.require_user_id() {
            Ok(id) => id,
            Err(err) => return BestEffort::from_result::<()>(op, Err(err)),
        };

        self.update_unread(user_id, |counters| {
            counters.notifications = counters.notifications.saturating_sub(1);
        });
        let result = self
            .call(op, self.backend.mark_notification_read(notification_id))
            .await;
        BestEffort::from_result(op, result)
    }

    pub async fn mark_all_notifications_as_read(&self) -> BestEffort {
        let op = Operation::MarkAllNotificationsRead;
        let user_id = match self.require_user_id() {
            Ok(id) => id,
            Err(err) => return BestEffort::from_result::<()>(op, Err(err)),
        };

        self.update_unread(user_id, |counters| counters.notifications = 0);
        let result = self
            .call(op, self.backend.mark_all_notifications_read(user_id))
            .await;
        BestEffort::from_result(op, result)
    }

    // ─── Internals ───────────────────────────────────────────────

    /// Run one backend call under the manager's timeout and cancel token.
    async fn call<T, F>(&self, operation: Operation, request: F) -> Result<T>
    where
        F: Future<Output = BackendResult<T>>,
    {
        let cancel = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let timeout = self.settings.request_timeout;

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(AppError::Cancelled),
            outcome = tokio::time::timeout(timeout, request) => match outcome {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(AppError::from(err)),
                Err(_) => Err(AppError::TimedOut(timeout)),
            },
        };

        if let Err(err) = &result {
            tracing::debug!(
                operation = operation.as_str(),
                code = err.code(),
                "Backend call failed"
            );
            if matches!(err, AppError::SessionExpired) {
                self.expire_session();
            }
        }
        result
    }

    /// Load profile, follows and counters, then install them atomically.
    async fn install_account(&self, account: AuthAccount) -> Result<Session> {
        let user_id = account.account_id;
        let (profile, following, notifications, conversations) = tokio::try_join!(
            self.call(Operation::LoadAccount, self.backend.get_profile(user_id)),
            self.call(Operation::LoadAccount, self.backend.get_following(user_id)),
            self.call(
                Operation::LoadAccount,
                self.backend.get_notifications(user_id)
            ),
            self.call(
                Operation::LoadAccount,
                self.backend.get_conversations(user_id)
            ),
        )?;

        let session = Session::from_profile(profile, account.email_verified);
        let following: HashSet<Uuid> = following
            .into_iter()
            .map(|u| u.id)
            .filter(|id| *id != user_id)
            .collect();
        let unread = UnreadCounters {
            messages: unread_messages(&conversations),
            notifications: unread_notifications(&notifications),
        };

        let installed = session.clone();
        self.state.send_modify(|state| {
            state.session = Some(installed);
            state.following = following;
            state.unread = unread;
        });
        Ok(session)
    }

    fn expire_session(&self) {
        let user_id = self.current_user_id();
        if let Some(user_id) = user_id {
            tracing::warn!(user_id = %user_id, "Session expired");
            self.clear_state();
            self.navigate(Navigation::Login);
        }
    }

    fn clear_state(&self) {
        self.state.send_modify(|state| {
            state.session = None;
            state.following.clear();
            state.unread = UnreadCounters::default();
        });
    }

    /// Apply `f` to the counters if `user_id` is still the signed-in user.
    fn update_unread(&self, user_id: Uuid, f: impl FnOnce(&mut UnreadCounters)) {
        self.state.send_modify(|state| {
            if state.user_id() == Some(user_id) {
                f(&mut state.unread);
            }
        });
    }

    fn sync_loading(&self) {
        let loading = self.loading.load(Ordering::SeqCst) > 0;
        self.state.send_if_modified(|state| {
            let changed = state.is_loading != loading;
            state.is_loading = loading;
            changed
        });
    }

    fn navigate(&self, to: Navigation) {
        // No receivers is fine.
        let _ = self.navigation.send(to);
    }

    fn require_session(&self) -> Result<Session> {
        self.state
            .borrow()
            .session
            .clone()
            .ok_or(AppError::Unauthenticated)
    }

    fn require_user_id(&self) -> Result<Uuid> {
        self.current_user_id().ok_or(AppError::Unauthenticated)
    }
}

/// Sanitize, then require something to be left.
fn clean_required(field: &str, value: &str) -> Result<String> {
    require_text(field, &sanitize_text(value))
}

fn ensure_owner(user_id: Uuid, owner_id: Uuid, action: &str) -> Result<()> {
    if user_id != owner_id {
        return Err(AppError::Forbidden(format!("You cannot {}", action)));
    }
    Ok(())
}

fn unread_messages(conversations: &[Conversation]) -> u32 {
    conversations
        .iter()
        .fold(0u32, |total, c| total.saturating_add(c.unread_count))
}

fn unread_notifications(notifications: &[Notification]) -> u32 {
    notifications.iter().filter(|n| !n.is_read).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, MemoryBackend};

    const EMAIL: &str = "sam@example.com";
    const PASSWORD: &str = "Str0ng!Pass";

    fn manager() -> (SessionManager, Arc<MemoryBackend>, Uuid) {
        let backend = Arc::new(MemoryBackend::new());
        let user_id = backend.insert_account(EMAIL, PASSWORD, "Sam Rivera", Role::Player);
        let manager = SessionManager::new(backend.clone(), SessionSettings::default());
        (manager, backend, user_id)
    }

    #[test]
    fn test_failure_policy() {
        assert_eq!(Operation::Logout.failure_policy(), FailurePolicy::LogOnly);
        assert_eq!(
            Operation::MarkNotificationRead.failure_policy(),
            FailurePolicy::LogOnly
        );
        assert_eq!(Operation::Follow.failure_policy(), FailurePolicy::Propagate);
        assert_eq!(Operation::Login.failure_policy(), FailurePolicy::Propagate);
    }

    #[tokio::test]
    async fn test_login_populates_state() {
        let (manager, backend, user_id) = manager();
        let other = backend.insert_account("kai@example.com", PASSWORD, "Kai", Role::Coach);
        backend.insert_follow(user_id, other);
        backend.insert_notification(user_id, "follow", "Kai followed you");
        backend.insert_message(other, user_id, "Good game!");

        let mut nav = manager.navigation();
        let session = manager.login(EMAIL, PASSWORD).await.unwrap();

        assert_eq!(session.id, user_id);
        let snapshot = manager.snapshot();
        assert!(snapshot.is_authenticated());
        assert!(snapshot.is_following(other));
        assert_eq!(snapshot.unread.notifications, 1);
        assert_eq!(snapshot.unread.messages, 1);
        assert!(!snapshot.is_loading);
        assert_eq!(nav.recv().await.unwrap(), Navigation::Home);
    }

    #[tokio::test]
    async fn test_unknown_account_is_invalid_credentials() {
        let (manager, _backend, _) = manager();
        let err = manager
            .login("nobody@example.com", PASSWORD)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
        assert_eq!(err.user_message(), "Invalid email or password.");

        let err = manager.login(EMAIL, "wrong-password").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_failed_account_load_signs_out() {
        let (manager, backend, _) = manager();
        backend.fail_next(
            "get_profile",
            BackendError::new(BackendErrorKind::Unavailable, "upstream down"),
        );

        let err = manager.login(EMAIL, PASSWORD).await.unwrap_err();

        assert!(matches!(err, AppError::Backend(_)));
        assert!(!manager.is_authenticated());
        assert!(backend.calls().contains(&"sign_out"));
        assert!(manager.refresh_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_operations_require_session() {
        let (manager, backend, _) = manager();
        let target = Uuid::new_v4();

        assert!(matches!(
            manager.follow_user(target).await,
            Err(AppError::Unauthenticated)
        ));
        assert!(matches!(
            manager.send_message(target, "hi").await,
            Err(AppError::Unauthenticated)
        ));
        assert!(matches!(
            manager.update_profile(ProfileUpdate::default()).await,
            Err(AppError::Unauthenticated)
        ));
        assert!(!manager.mark_notification_as_read(target).await.is_ok());
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_update_profile_merges_and_sanitizes() {
        let (manager, backend, user_id) = manager();
        manager.login(EMAIL, PASSWORD).await.unwrap();

        let session = manager
            .update_profile(ProfileUpdate {
                bio: Some("<b>Point guard</b>".to_string()),
                avatar_url: Some("https://cdn.example.com/sam.png".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(session.profile.bio.as_deref(), Some("bPoint guard/b"));
        assert_eq!(session.full_name, "Sam Rivera");
        assert_eq!(manager.snapshot().session, Some(session));
        assert_eq!(
            backend.profile(user_id).unwrap().avatar_url.as_deref(),
            Some("https://cdn.example.com/sam.png")
        );
    }

    #[tokio::test]
    async fn test_blank_url_clears_field() {
        let (manager, backend, user_id) = manager();
        manager.login(EMAIL, PASSWORD).await.unwrap();
        manager
            .update_profile(ProfileUpdate {
                avatar_url: Some("https://cdn.example.com/sam.png".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let session = manager
            .update_profile(ProfileUpdate {
                avatar_url: Some("   ".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(session.profile.avatar_url, None);
        assert_eq!(backend.profile(user_id).unwrap().avatar_url, None);
    }

    #[tokio::test]
    async fn test_update_profile_rejects_bad_url_before_backend() {
        let (manager, backend, _) = manager();
        manager.login(EMAIL, PASSWORD).await.unwrap();
        let calls = backend.call_count();

        let err = manager
            .update_profile(ProfileUpdate {
                cover_url: Some("javascript:alert(1)".to_string()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(backend.call_count(), calls);
    }

    #[tokio::test]
    async fn test_update_other_profile_is_forbidden() {
        let (manager, backend, _) = manager();
        let other = backend.insert_account("kai@example.com", PASSWORD, "Kai", Role::Coach);
        manager.login(EMAIL, PASSWORD).await.unwrap();

        let err = manager
            .update_profile_for(
                other,
                ProfileUpdate {
                    bio: Some("hijacked".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(backend.profile(other).unwrap().bio, None);
    }

    #[tokio::test]
    async fn test_failed_profile_update_leaves_session() {
        let (manager, backend, _) = manager();
        let before = manager.login(EMAIL, PASSWORD).await.unwrap();
        backend.fail_next(
            "update_profile",
            BackendError::new(BackendErrorKind::Unavailable, "upstream down"),
        );

        let result = manager
            .update_profile(ProfileUpdate {
                location: Some("Austin, TX".to_string()),
                ..Default::default()
            })
            .await;
        assert!(result.is_err());
        assert_eq!(manager.snapshot().session, Some(before));
    }

    #[tokio::test]
    async fn test_session_expiry_clears_state() {
        let (manager, backend, _) = manager();
        manager.login(EMAIL, PASSWORD).await.unwrap();
        let mut nav = manager.navigation();

        backend.expire_session();
        let err = manager.follow_user(Uuid::new_v4()).await.unwrap_err();

        assert!(matches!(err, AppError::SessionExpired));
        assert!(!manager.is_authenticated());
        assert_eq!(nav.recv().await.unwrap(), Navigation::Login);
    }

    #[tokio::test]
    async fn test_refresh_session_detects_expiry() {
        let (manager, backend, _) = manager();
        manager.login(EMAIL, PASSWORD).await.unwrap();

        assert!(manager.refresh_session().await.unwrap().is_some());
        backend.expire_session();
        assert!(manager.refresh_session().await.unwrap().is_none());
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_send_message_rules() {
        let (manager, backend, user_id) = manager();
        let other = backend.insert_account("kai@example.com", PASSWORD, "Kai", Role::Coach);
        manager.login(EMAIL, PASSWORD).await.unwrap();

        assert!(matches!(
            manager.send_message(user_id, "hello me").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            manager.send_message(other, "  <>  ").await,
            Err(AppError::Validation(_))
        ));

        // Not length checked.
        let long = "a".repeat(5000);
        let message = manager.send_message(other, &long).await.unwrap();
        assert_eq!(message.content.len(), 5000);

        let again = manager.send_message(other, "<i>rematch?</i>").await.unwrap();
        assert_eq!(again.conversation_id, message.conversation_id);
        assert_eq!(again.content, "irematch?/i");
    }

    #[tokio::test]
    async fn test_posts_and_ownership() {
        let (manager, backend, _) = manager();
        let other = backend.insert_account("kai@example.com", PASSWORD, "Kai", Role::Coach);
        manager.login(EMAIL, PASSWORD).await.unwrap();

        assert!(manager.create_post("   ", None).await.is_err());
        assert!(manager.create_post(&"x".repeat(2001), None).await.is_err());

        let post = manager
            .create_post("Won the regional final", Some("https://cdn.example.com/trophy.jpg"))
            .await
            .unwrap();
        assert_eq!(manager.snapshot().session.unwrap().stats.posts, 1);

        assert!(manager.toggle_like(post.id).await.unwrap());
        assert!(!manager.toggle_like(post.id).await.unwrap());

        assert!(manager.add_comment(post.id, &"c".repeat(1001)).await.is_err());
        manager.add_comment(post.id, "Congrats!").await.unwrap();
        assert_eq!(manager.comments(post.id).await.unwrap().len(), 1);
        assert_eq!(manager.feed(0, 500).await.unwrap().len(), 1);

        let foreign = Post {
            author_id: other,
            ..post.clone()
        };
        assert!(matches!(
            manager.delete_post(&foreign).await,
            Err(AppError::Forbidden(_))
        ));

        manager.delete_post(&post).await.unwrap();
        assert_eq!(manager.snapshot().session.unwrap().stats.posts, 0);
        assert!(manager.feed(0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connection_requests() {
        let (manager, backend, user_id) = manager();
        let other = backend.insert_account("kai@example.com", PASSWORD, "Kai", Role::Coach);
        manager.login(EMAIL, PASSWORD).await.unwrap();

        assert!(manager.send_connection_request(user_id, None).await.is_err());
        let request = manager
            .send_connection_request(other, Some("  Let's train  "))
            .await
            .unwrap();
        assert_eq!(request.message.as_deref(), Some("Let's train"));

        // Only the recipient may answer.
        let err = manager
            .respond_to_connection_request(request.id, ConnectionDecision::Accept)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Backend(_)));
    }

    #[tokio::test]
    async fn test_mutual_connections() {
        let (manager, backend, user_id) = manager();
        let kai = backend.insert_account("kai@example.com", PASSWORD, "Kai", Role::Coach);
        let ana = backend.insert_account("ana@example.com", PASSWORD, "Ana", Role::Player);
        let team = backend.insert_account("team@example.com", PASSWORD, "Hawks", Role::Team);
        backend.insert_follow(user_id, ana);
        backend.insert_follow(user_id, team);
        backend.insert_follow(kai, team);
        manager.login(EMAIL, PASSWORD).await.unwrap();

        let mutual = manager.mutual_connections(kai).await.unwrap();
        let ids: Vec<Uuid> = mutual.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![team]);
    }

    #[tokio::test]
    async fn test_mark_conversation_as_read_decrements_counter() {
        let (manager, backend, user_id) = manager();
        let other = backend.insert_account("kai@example.com", PASSWORD, "Kai", Role::Coach);
        let first = backend.insert_message(other, user_id, "one");
        backend.insert_message(other, user_id, "two");
        manager.login(EMAIL, PASSWORD).await.unwrap();
        assert_eq!(manager.snapshot().unread.messages, 2);

        let changed = manager
            .mark_conversation_as_read(first.conversation_id)
            .await
            .unwrap();
        assert_eq!(changed, 2);
        assert_eq!(manager.snapshot().unread.messages, 0);
    }

    #[tokio::test]
    async fn test_subscription_delivers_new_messages() {
        let (manager, backend, user_id) = manager();
        let other = backend.insert_account("kai@example.com", PASSWORD, "Kai", Role::Coach);
        let first = backend.insert_message(other, user_id, "hello");
        manager.login(EMAIL, PASSWORD).await.unwrap();

        let mut subscription = manager
            .subscribe_to_messages(first.conversation_id)
            .await
            .unwrap();
        // Messages in other conversations are not delivered.
        let stranger = backend.insert_account("x@example.com", PASSWORD, "X", Role::Player);
        backend.insert_message(stranger, user_id, "spam");
        backend.insert_message(other, user_id, "you there?");

        let received = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.content, "you there?");
    }

    #[tokio::test]
    async fn test_password_reset_and_update() {
        let (manager, backend, _) = manager();

        assert!(manager.request_password_reset("not-an-email").await.is_err());
        manager
            .request_password_reset("sam@example.com")
            .await
            .unwrap();
        assert_eq!(backend.calls(), vec!["reset_password_for_email"]);

        assert!(matches!(
            manager.update_password("Newer!Pass9").await,
            Err(AppError::Unauthenticated)
        ));
        manager.login(EMAIL, PASSWORD).await.unwrap();
        assert!(matches!(
            manager.update_password("weak").await,
            Err(AppError::WeakPassword { .. })
        ));
        manager.update_password("Newer!Pass9").await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_pending() {
        let (manager, backend, _) = manager();
        let manager = Arc::new(manager);
        backend.set_latency(Some(Duration::from_secs(5)));

        let task = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.login(EMAIL, PASSWORD).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.cancel_pending();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
        assert!(!manager.is_loading());
        assert!(!manager.is_authenticated());
    }
}
