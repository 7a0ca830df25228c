// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Supabase backend client.
//!
//! Talks to a Supabase project over HTTP:
//! - GoTrue (`/auth/v1/...`) for accounts and sessions
//! - PostgREST (`/rest/v1/...`) for profiles, the social graph, posts,
//!   messages and notifications
//!
//! Error responses are translated into [`BackendErrorKind`] here, from the
//! status code and the structured error code in the body.

use super::{Backend, BackendError, BackendErrorKind, BackendResult, MessageSubscription};
use crate::config::Config;
use crate::models::{
    AuthAccount, Comment, ConnectionDecision, ConnectionRequest, Conversation, Message, NewPost,
    Notification, Post, ProfileRecord, ProfileUpdate, SignupMetadata, UserSummary,
};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Retry delay assumed when a 429 carries no `Retry-After` header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);
/// How often a message subscription polls for new rows.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SUBSCRIPTION_BUFFER: usize = 64;

const PREFER: &str = "Prefer";
const RETURN_REPRESENTATION: &str = "return=representation";
const RETURN_MINIMAL: &str = "return=minimal";
/// Makes PostgREST return a single object (406 → `PGRST116` if none).
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

const SUMMARY_COLUMNS: &str = "id,full_name,role,sport,avatar_url,is_verified";

/// Supabase HTTP client. Cheap to clone; clones share the signed-in session.
#[derive(Clone)]
pub struct SupabaseBackend {
    inner: Arc<Inner>,
    poll_interval: Duration,
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    tokens: RwLock<Option<AuthTokens>>,
}

#[derive(Clone)]
struct AuthTokens {
    access_token: String,
    account: AuthAccount,
}

impl SupabaseBackend {
    /// Create a client for the configured project.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Self::with_base_url(
            &config.supabase_url,
            &config.supabase_anon_key,
            config.request_timeout,
        )
    }

    /// Create a client for an explicit base URL (used by tests with a mock server).
    pub fn with_base_url(
        base_url: &str,
        anon_key: &str,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed building Supabase HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();
        tracing::info!(base_url = %base_url, "Initialized Supabase backend");

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url,
                anon_key: anon_key.to_string(),
                tokens: RwLock::new(None),
            }),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Build a request carrying the project key and the best available bearer.
    async fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let bearer = self
            .inner
            .tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.access_token.clone())
            .unwrap_or_else(|| self.inner.anon_key.clone());

        self.inner
            .http
            .request(method, format!("{}{}", self.inner.base_url, path))
            .header("apikey", &self.inner.anon_key)
            .bearer_auth(bearer)
    }

    async fn signed_in_account(&self) -> BackendResult<AuthAccount> {
        self.inner
            .tokens
            .read()
            .await
            .as_ref()
            .map(|t| t.account)
            .ok_or_else(|| BackendError::new(BackendErrorKind::SessionExpired, "Not signed in"))
    }

    async fn messages_since(
        &self,
        conversation_id: Uuid,
        since: DateTime<Utc>,
    ) -> BackendResult<Vec<Message>> {
        let request = self.request(Method::GET, "/rest/v1/messages").await.query(&[
            ("conversation_id", eq(conversation_id)),
            (
                "created_at",
                format!("gt.{}", since.to_rfc3339_opts(SecondsFormat::Micros, true)),
            ),
            ("order", "created_at.asc".to_string()),
        ]);
        send_json(request).await
    }

    async fn profile_list(
        &self,
        filter_column: &str,
        account_id: Uuid,
        embed: &str,
    ) -> BackendResult<Vec<UserSummary>> {
        let request = self.request(Method::GET, "/rest/v1/follows").await.query(&[
            (filter_column, eq(account_id)),
            ("select", format!("profile:{}({})", embed, SUMMARY_COLUMNS)),
        ]);
        let rows: Vec<EmbeddedProfile> = send_json(request).await?;
        Ok(rows.into_iter().filter_map(|row| row.profile).collect())
    }
}

// ─── Wire Types ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct GoTrueUser {
    id: Uuid,
    #[serde(default)]
    email_confirmed_at: Option<String>,
}

impl GoTrueUser {
    fn account(&self) -> AuthAccount {
        AuthAccount {
            account_id: self.id,
            email_verified: self.email_confirmed_at.is_some(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    user: GoTrueUser,
}

/// Signup returns the bare user when email confirmation is on, and a full
/// session (with a nested user) when it is off.
#[derive(Deserialize)]
struct SignupResponse {
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    user: Option<GoTrueUser>,
}

#[derive(Deserialize)]
struct IdRow {
    id: Uuid,
}

#[derive(Deserialize)]
struct ConversationRef {
    conversation_id: Uuid,
}

#[derive(Deserialize)]
struct EmbeddedProfile {
    profile: Option<UserSummary>,
}

/// Error body. GoTrue and PostgREST use different field names.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorBody {
    fn code(&self) -> Option<String> {
        self.error_code
            .clone()
            .or_else(|| match &self.code {
                Some(serde_json::Value::String(code)) => Some(code.clone()),
                _ => None,
            })
            // OAuth-style bodies put the code in `error`
            .or_else(|| self.error.clone().filter(|e| !e.contains(' ')))
    }

    fn message(&self) -> Option<String> {
        self.msg
            .clone()
            .or_else(|| self.message.clone())
            .or_else(|| self.error_description.clone())
            .or_else(|| self.error.clone())
    }
}

// ─── Response Handling ───────────────────────────────────────────

fn eq(value: impl Display) -> String {
    format!("eq.{}", value)
}

fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::new(BackendErrorKind::Network, format!("Request timed out: {}", err))
    } else {
        BackendError::new(BackendErrorKind::Network, err.to_string())
    }
}

async fn send(request: RequestBuilder) -> BackendResult<Response> {
    let response = request.send().await.map_err(transport_error)?;
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(error_from_response(response).await)
    }
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> BackendResult<T> {
    send(request).await?.json::<T>().await.map_err(|e| {
        BackendError::new(
            BackendErrorKind::Unknown,
            format!("Malformed backend response: {}", e),
        )
    })
}

async fn error_from_response(response: Response) -> BackendError {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
    let code = parsed.code();

    let kind = classify(status, code.as_deref(), retry_after);
    if status == 429 {
        tracing::warn!(code = ?code, "Backend rate limit hit (429)");
    } else {
        tracing::debug!(status, code = ?code, kind = ?kind, "Backend request failed");
    }

    BackendError::new(kind, parsed.message().unwrap_or(body))
}

/// Map an HTTP status and backend error code to a [`BackendErrorKind`].
///
/// The error code wins when recognized; the status is the fallback.
pub fn classify(status: u16, code: Option<&str>, retry_after: Option<Duration>) -> BackendErrorKind {
    let rate_limited = || BackendErrorKind::RateLimited {
        retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
    };

    let by_code = code.and_then(|code| match code {
        "invalid_credentials" | "invalid_grant" => Some(BackendErrorKind::InvalidCredentials),
        "email_not_confirmed" => Some(BackendErrorKind::EmailNotConfirmed),
        "user_already_exists" | "email_exists" => Some(BackendErrorKind::UserAlreadyExists),
        "weak_password" => Some(BackendErrorKind::WeakPassword),
        c if c.starts_with("over_") && c.ends_with("rate_limit") => Some(rate_limited()),
        "session_expired" | "session_not_found" | "bad_jwt" | "PGRST301" | "PGRST303" => {
            Some(BackendErrorKind::SessionExpired)
        }
        "user_not_found" | "PGRST116" => Some(BackendErrorKind::NotFound),
        "42501" => Some(BackendErrorKind::PermissionDenied),
        "23505" => Some(BackendErrorKind::Conflict),
        "23502" | "23514" | "22P02" | "validation_failed" | "email_address_invalid" => {
            Some(BackendErrorKind::Validation)
        }
        _ => None,
    });
    if let Some(kind) = by_code {
        return kind;
    }

    match status {
        429 => rate_limited(),
        401 => BackendErrorKind::SessionExpired,
        403 => BackendErrorKind::PermissionDenied,
        404 => BackendErrorKind::NotFound,
        409 => BackendErrorKind::Conflict,
        400 | 422 => BackendErrorKind::Validation,
        502..=504 => BackendErrorKind::Unavailable,
        _ => BackendErrorKind::Unknown,
    }
}

#[async_trait]
impl Backend for SupabaseBackend {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignupMetadata,
    ) -> BackendResult<Uuid> {
        let request = self
            .request(Method::POST, "/auth/v1/signup")
            .await
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "data": metadata,
            }));
        let response: SignupResponse = send_json(request).await?;
        response
            .user
            .map(|u| u.id)
            .or(response.id)
            .ok_or_else(|| BackendError::new(BackendErrorKind::Unknown, "Signup returned no user"))
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<AuthAccount> {
        let request = self
            .request(Method::POST, "/auth/v1/token")
            .await
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({ "email": email, "password": password }));
        let response: TokenResponse = send_json(request).await?;

        let account = response.user.account();
        *self.inner.tokens.write().await = Some(AuthTokens {
            access_token: response.access_token,
            account,
        });
        tracing::debug!(account_id = %account.account_id, "Signed in");
        Ok(account)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let result = send(self.request(Method::POST, "/auth/v1/logout").await).await;
        // Local credentials are dropped whether or not the server heard us.
        *self.inner.tokens.write().await = None;
        result.map(|_| ())
    }

    async fn current_user(&self) -> BackendResult<Option<AuthAccount>> {
        if self.inner.tokens.read().await.is_none() {
            return Ok(None);
        }
        match send_json::<GoTrueUser>(self.request(Method::GET, "/auth/v1/user").await).await {
            Ok(user) => Ok(Some(user.account())),
            Err(err) if err.kind == BackendErrorKind::SessionExpired => {
                *self.inner.tokens.write().await = None;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_url: &str,
    ) -> BackendResult<()> {
        let path = format!(
            "/auth/v1/recover?redirect_to={}",
            urlencoding::encode(redirect_url)
        );
        let request = self
            .request(Method::POST, &path)
            .await
            .json(&serde_json::json!({ "email": email }));
        send(request).await.map(|_| ())
    }

    async fn update_password(&self, new_password: &str) -> BackendResult<()> {
        self.signed_in_account().await?;
        let request = self
            .request(Method::PUT, "/auth/v1/user")
            .await
            .json(&serde_json::json!({ "password": new_password }));
        send(request).await.map(|_| ())
    }

    async fn get_profile(&self, account_id: Uuid) -> BackendResult<ProfileRecord> {
        let request = self
            .request(Method::GET, "/rest/v1/profiles")
            .await
            .query(&[("id", eq(account_id)), ("select", "*".to_string())])
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT);
        send_json(request).await
    }

    async fn update_profile(
        &self,
        account_id: Uuid,
        fields: &ProfileUpdate,
    ) -> BackendResult<ProfileRecord> {
        let current = self.signed_in_account().await?;
        if current.account_id != account_id {
            return Err(BackendError::new(
                BackendErrorKind::PermissionDenied,
                "Cannot update another user's profile",
            ));
        }
        let request = self
            .request(Method::PATCH, "/rest/v1/profiles")
            .await
            .query(&[("id", eq(account_id))])
            .header(PREFER, RETURN_REPRESENTATION)
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
            .json(fields);
        send_json(request).await
    }

    async fn get_followers(&self, account_id: Uuid) -> BackendResult<Vec<UserSummary>> {
        self.profile_list("following_id", account_id, "profiles!follows_follower_id_fkey")
            .await
    }

    async fn get_following(&self, account_id: Uuid) -> BackendResult<Vec<UserSummary>> {
        self.profile_list("follower_id", account_id, "profiles!follows_following_id_fkey")
            .await
    }

    async fn follow(&self, follower_id: Uuid, target_id: Uuid) -> BackendResult<()> {
        let request = self
            .request(Method::POST, "/rest/v1/follows")
            .await
            .header(PREFER, "resolution=ignore-duplicates,return=minimal")
            .json(&serde_json::json!({
                "follower_id": follower_id,
                "following_id": target_id,
            }));
        match send(request).await {
            Ok(_) => Ok(()),
            Err(err) if err.kind == BackendErrorKind::Conflict => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn unfollow(&self, follower_id: Uuid, target_id: Uuid) -> BackendResult<()> {
        let request = self
            .request(Method::DELETE, "/rest/v1/follows")
            .await
            .query(&[
                ("follower_id", eq(follower_id)),
                ("following_id", eq(target_id)),
            ]);
        send(request).await.map(|_| ())
    }

    async fn send_connection_request(
        &self,
        from_id: Uuid,
        to_id: Uuid,
        message: Option<&str>,
    ) -> BackendResult<ConnectionRequest> {
        let request = self
            .request(Method::POST, "/rest/v1/connection_requests")
            .await
            .header(PREFER, RETURN_REPRESENTATION)
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
            .json(&serde_json::json!({
                "from_user_id": from_id,
                "to_user_id": to_id,
                "message": message,
                "status": "pending",
            }));
        send_json(request).await
    }

    async fn respond_to_connection_request(
        &self,
        request_id: Uuid,
        decision: ConnectionDecision,
    ) -> BackendResult<()> {
        let request = self
            .request(Method::PATCH, "/rest/v1/connection_requests")
            .await
            .query(&[("id", eq(request_id)), ("select", "id".to_string())])
            .header(PREFER, RETURN_REPRESENTATION)
            .json(&serde_json::json!({ "status": decision.status() }));
        let updated: Vec<IdRow> = send_json(request).await?;
        if updated.is_empty() {
            return Err(BackendError::new(
                BackendErrorKind::NotFound,
                "Connection request not found",
            ));
        }
        Ok(())
    }

    async fn create_post(&self, author_id: Uuid, post: &NewPost) -> BackendResult<Post> {
        let request = self
            .request(Method::POST, "/rest/v1/posts")
            .await
            .header(PREFER, RETURN_REPRESENTATION)
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
            .json(&serde_json::json!({
                "author_id": author_id,
                "content": post.content,
                "media_url": post.media_url,
            }));
        send_json(request).await
    }

    async fn get_feed(&self, _account_id: Uuid, page: u32, limit: u32) -> BackendResult<Vec<Post>> {
        let offset = u64::from(page) * u64::from(limit);
        let request = self.request(Method::GET, "/rest/v1/posts").await.query(&[
            ("select", "*".to_string()),
            ("order", "created_at.desc".to_string()),
            ("offset", offset.to_string()),
            ("limit", limit.to_string()),
        ]);
        send_json(request).await
    }

    async fn toggle_like(&self, post_id: Uuid, account_id: Uuid) -> BackendResult<bool> {
        let filter = [("post_id", eq(post_id)), ("user_id", eq(account_id))];
        let existing: Vec<serde_json::Value> = send_json(
            self.request(Method::GET, "/rest/v1/likes")
                .await
                .query(&filter)
                .query(&[("select", "post_id")]),
        )
        .await?;

        if existing.is_empty() {
            let request = self
                .request(Method::POST, "/rest/v1/likes")
                .await
                .header(PREFER, RETURN_MINIMAL)
                .json(&serde_json::json!({ "post_id": post_id, "user_id": account_id }));
            send(request).await?;
            Ok(true)
        } else {
            send(self.request(Method::DELETE, "/rest/v1/likes").await.query(&filter)).await?;
            Ok(false)
        }
    }

    async fn add_comment(
        &self,
        post_id: Uuid,
        author_id: Uuid,
        content: &str,
    ) -> BackendResult<Comment> {
        let request = self
            .request(Method::POST, "/rest/v1/comments")
            .await
            .header(PREFER, RETURN_REPRESENTATION)
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
            .json(&serde_json::json!({
                "post_id": post_id,
                "author_id": author_id,
                "content": content,
            }));
        send_json(request).await
    }

    async fn get_comments(&self, post_id: Uuid) -> BackendResult<Vec<Comment>> {
        let request = self.request(Method::GET, "/rest/v1/comments").await.query(&[
            ("post_id", eq(post_id)),
            ("order", "created_at.asc".to_string()),
        ]);
        send_json(request).await
    }

    async fn delete_post(&self, post_id: Uuid, author_id: Uuid) -> BackendResult<()> {
        let request = self
            .request(Method::DELETE, "/rest/v1/posts")
            .await
            .query(&[
                ("id", eq(post_id)),
                ("author_id", eq(author_id)),
                ("select", "id".to_string()),
            ])
            .header(PREFER, RETURN_REPRESENTATION);
        let deleted: Vec<IdRow> = send_json(request).await?;
        if deleted.is_empty() {
            return Err(BackendError::new(BackendErrorKind::NotFound, "Post not found"));
        }
        Ok(())
    }

    async fn create_or_get_conversation(&self, user_a: Uuid, user_b: Uuid) -> BackendResult<Uuid> {
        let pair = format!(
            "(and(participant_one.eq.{a},participant_two.eq.{b}),and(participant_one.eq.{b},participant_two.eq.{a}))",
            a = user_a,
            b = user_b
        );
        let existing: Vec<IdRow> = send_json(
            self.request(Method::GET, "/rest/v1/conversations")
                .await
                .query(&[
                    ("select", "id".to_string()),
                    ("or", pair),
                    ("limit", "1".to_string()),
                ]),
        )
        .await?;
        if let Some(row) = existing.first() {
            return Ok(row.id);
        }

        let request = self
            .request(Method::POST, "/rest/v1/conversations")
            .await
            .query(&[("select", "id")])
            .header(PREFER, RETURN_REPRESENTATION)
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
            .json(&serde_json::json!({
                "participant_one": user_a,
                "participant_two": user_b,
            }));
        let created: IdRow = send_json(request).await?;
        tracing::debug!(conversation_id = %created.id, "Created conversation");
        Ok(created.id)
    }

    async fn get_conversations(&self, account_id: Uuid) -> BackendResult<Vec<Conversation>> {
        let mut conversations: Vec<Conversation> = send_json(
            self.request(Method::GET, "/rest/v1/conversations")
                .await
                .query(&[
                    ("select", "*".to_string()),
                    (
                        "or",
                        format!(
                            "(participant_one.eq.{id},participant_two.eq.{id})",
                            id = account_id
                        ),
                    ),
                    ("order", "updated_at.desc".to_string()),
                ]),
        )
        .await?;
        if conversations.is_empty() {
            return Ok(conversations);
        }

        let ids = conversations
            .iter()
            .map(|c| c.id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let unread: Vec<ConversationRef> = send_json(
            self.request(Method::GET, "/rest/v1/messages")
                .await
                .query(&[
                    ("select", "conversation_id".to_string()),
                    ("conversation_id", format!("in.({})", ids)),
                    ("sender_id", format!("neq.{}", account_id)),
                    ("is_read", "eq.false".to_string()),
                ]),
        )
        .await?;

        let mut counts: HashMap<Uuid, u32> = HashMap::new();
        for row in unread {
            *counts.entry(row.conversation_id).or_default() += 1;
        }
        for conversation in &mut conversations {
            conversation.unread_count = counts.get(&conversation.id).copied().unwrap_or(0);
        }
        Ok(conversations)
    }

    async fn get_messages(&self, conversation_id: Uuid) -> BackendResult<Vec<Message>> {
        let request = self.request(Method::GET, "/rest/v1/messages").await.query(&[
            ("conversation_id", eq(conversation_id)),
            ("order", "created_at.asc".to_string()),
        ]);
        send_json(request).await
    }

    async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> BackendResult<Message> {
        let request = self
            .request(Method::POST, "/rest/v1/messages")
            .await
            .header(PREFER, RETURN_REPRESENTATION)
            .header(reqwest::header::ACCEPT, SINGLE_OBJECT)
            .json(&serde_json::json!({
                "conversation_id": conversation_id,
                "sender_id": sender_id,
                "content": content,
            }));
        let message: Message = send_json(request).await?;

        let touch = self
            .request(Method::PATCH, "/rest/v1/conversations")
            .await
            .query(&[("id", eq(conversation_id))])
            .header(PREFER, RETURN_MINIMAL)
            .json(&serde_json::json!({
                "last_message": message.content,
                "updated_at": message.created_at,
            }));
        if let Err(err) = send(touch).await {
            tracing::warn!(
                conversation_id = %conversation_id,
                error = %err,
                "Failed to update conversation preview"
            );
        }
        Ok(message)
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> BackendResult<u32> {
        let request = self
            .request(Method::PATCH, "/rest/v1/messages")
            .await
            .query(&[
                ("conversation_id", eq(conversation_id)),
                ("sender_id", format!("neq.{}", reader_id)),
                ("is_read", "eq.false".to_string()),
                ("select", "id".to_string()),
            ])
            .header(PREFER, RETURN_REPRESENTATION)
            .json(&serde_json::json!({ "is_read": true }));
        let updated: Vec<IdRow> = send_json(request).await?;
        Ok(updated.len() as u32)
    }

    async fn subscribe_to_messages(
        &self,
        conversation_id: Uuid,
    ) -> BackendResult<MessageSubscription> {
        self.signed_in_account().await?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let backend = self.clone();

        tokio::spawn(async move {
            let mut since = Utc::now();
            let mut ticker = tokio::time::interval(backend.poll_interval);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match backend.messages_since(conversation_id, since).await {
                    Ok(messages) => {
                        for message in messages {
                            since = since.max(message.created_at);
                            if tx.send(message).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            conversation_id = %conversation_id,
                            error = %err,
                            "Message poll failed"
                        );
                    }
                }
            }
            tracing::debug!(conversation_id = %conversation_id, "Message subscription closed");
        });

        Ok(MessageSubscription::new(conversation_id, rx, cancel))
    }

    async fn get_notifications(&self, account_id: Uuid) -> BackendResult<Vec<Notification>> {
        let request = self
            .request(Method::GET, "/rest/v1/notifications")
            .await
            .query(&[
                ("user_id", eq(account_id)),
                ("order", "created_at.desc".to_string()),
            ]);
        send_json(request).await
    }

    async fn mark_notification_read(&self, notification_id: Uuid) -> BackendResult<()> {
        let request = self
            .request(Method::PATCH, "/rest/v1/notifications")
            .await
            .query(&[("id", eq(notification_id))])
            .header(PREFER, RETURN_MINIMAL)
            .json(&serde_json::json!({ "is_read": true }));
        send(request).await.map(|_| ())
    }

    async fn mark_all_notifications_read(&self, account_id: Uuid) -> BackendResult<()> {
        let request = self
            .request(Method::PATCH, "/rest/v1/notifications")
            .await
            .query(&[
                ("user_id", eq(account_id)),
                ("is_read", "eq.false".to_string()),
            ])
            .header(PREFER, RETURN_MINIMAL)
            .json(&serde_json::json!({ "is_read": true }));
        send(request).await.map(|_| ())
    }
}
