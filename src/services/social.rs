// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Social graph helpers.

use crate::models::UserSummary;
use std::collections::HashSet;
use uuid::Uuid;

/// Users present in both lists, in the order of `mine`, without duplicates.
pub fn mutual_connections(mine: &[UserSummary], theirs: &[UserSummary]) -> Vec<UserSummary> {
    let theirs: HashSet<Uuid> = theirs.iter().map(|u| u.id).collect();
    let mut seen = HashSet::new();
    mine.iter()
        .filter(|u| theirs.contains(&u.id) && seen.insert(u.id))
        .cloned()
        .collect()
}
