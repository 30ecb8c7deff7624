//! The social schema: users, posts, comments and follows.
//!
//! | Version | Creates    | References                         |
//! |---------|------------|------------------------------------|
//! | 1       | `users`    |                                    |
//! | 2       | `posts`    | `users` (cascade)                  |
//! | 3       | `comments` | `posts`, `users` (cascade)         |
//! | 4       | `follows`  | `users` twice (cascade), unique pair |

use strata_core::{DiscoveryError, MigrationSet};

const SOCIAL_SCHEMA: &[(&str, &str)] = &[
    (
        "V1__create_users_table.sql",
        include_str!("../migrations/V1__create_users_table.sql"),
    ),
    (
        "V2__create_posts_table.sql",
        include_str!("../migrations/V2__create_posts_table.sql"),
    ),
    (
        "V3__create_comments_table.sql",
        include_str!("../migrations/V3__create_comments_table.sql"),
    ),
    (
        "V4__create_follows_table.sql",
        include_str!("../migrations/V4__create_follows_table.sql"),
    ),
];

/// The embedded social schema migrations.
pub fn social_schema() -> Result<MigrationSet, DiscoveryError> {
    MigrationSet::from_embedded(SOCIAL_SCHEMA)
}
