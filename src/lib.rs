// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! SportSYNC: client core for an athlete, coach and team social network
//!
//! This crate holds the client-side session state (who is signed in, whom
//! they follow, unread counters), validates and sanitizes user input, applies
//! local abuse heuristics to the auth forms, and talks to the Supabase
//! backend that is the system of record.

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use error::{AppError, Result};
pub use services::{SessionManager, SessionSettings, SessionSnapshot};
