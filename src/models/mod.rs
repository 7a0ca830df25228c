// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod message;
pub mod notification;
pub mod post;
pub mod social;
pub mod user;

pub use message::{Conversation, Message};
pub use notification::Notification;
pub use post::{Comment, NewPost, Post};
pub use social::{ConnectionDecision, ConnectionRequest, ConnectionStatus};
pub use user::{
    AuthAccount, ProfileFields, ProfileRecord, ProfileStats, ProfileUpdate, Role, Session,
    SignupInput, SignupMetadata, UnreadCounters, UserSummary,
};
