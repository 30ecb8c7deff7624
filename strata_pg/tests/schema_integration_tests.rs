//! Constraint behavior of the social schema after V1..V4 are applied.

mod common;

use common::{FOREIGN_KEY_VIOLATION, UNIQUE_VIOLATION, sqlstate};
use serial_test::serial;
use sqlx::PgPool;
use strata_pg::{PgMigrator, PgMigratorConfig};

async fn setup() -> PgPool {
    let pool = common::get_pg_pool().await;
    common::teardown(&pool).await;
    let applied = PgMigrator::with_social_schema(pool.clone(), PgMigratorConfig::default())
        .expect("valid config")
        .run_pending_migrations()
        .await
        .expect("Should run migrations");
    assert_eq!(applied, 4);
    pool
}

async fn insert_user(pool: &PgPool, username: &str, email: &str) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "INSERT INTO users (username, email, password_hash) VALUES ($1, $2, 'hash') RETURNING id",
    )
    .bind(username)
    .bind(email)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

async fn insert_post(pool: &PgPool, user_id: i64, content: &str) -> Result<i64, sqlx::Error> {
    let row: (i64,) =
        sqlx::query_as("INSERT INTO posts (user_id, content) VALUES ($1, $2) RETURNING id")
            .bind(user_id)
            .bind(content)
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

async fn insert_comment(pool: &PgPool, post_id: i64, user_id: i64) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "INSERT INTO comments (post_id, user_id, content) VALUES ($1, $2, 'nice') RETURNING id",
    )
    .bind(post_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

async fn insert_follow(pool: &PgPool, follower: i64, following: i64) -> Result<i64, sqlx::Error> {
    let row: (i64,) = sqlx::query_as(
        "INSERT INTO follows (follower_id, following_id) VALUES ($1, $2) RETURNING id",
    )
    .bind(follower)
    .bind(following)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

async fn count(pool: &PgPool, table: &str) -> i64 {
    let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .expect("Failed to count rows");
    row.0
}

#[tokio::test]
#[serial]
async fn test_full_object_graph_can_be_inserted() {
    let pool = setup().await;

    let alice = insert_user(&pool, "alice", "a@x.com").await.unwrap();
    let bob = insert_user(&pool, "bob", "b@x.com").await.unwrap();
    let post = insert_post(&pool, alice, "hello world").await.unwrap();
    insert_comment(&pool, post, bob).await.unwrap();
    insert_follow(&pool, bob, alice).await.unwrap();

    let (likes, comments): (i32, i32) =
        sqlx::query_as("SELECT likes_count, comments_count FROM posts WHERE id = $1")
            .bind(post)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!((likes, comments), (0, 0), "Counters should default to zero");

    let (bio, image): (Option<String>, Option<String>) =
        sqlx::query_as("SELECT bio, profile_image_url FROM users WHERE id = $1")
            .bind(alice)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(bio.is_none() && image.is_none(), "Profile fields are optional");

    common::teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_duplicate_username_is_rejected() {
    let pool = setup().await;

    insert_user(&pool, "alice", "a@x.com").await.unwrap();
    let err = insert_user(&pool, "alice", "b@x.com").await.unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some(UNIQUE_VIOLATION));

    common::teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_duplicate_email_is_rejected() {
    let pool = setup().await;

    insert_user(&pool, "alice", "a@x.com").await.unwrap();
    let err = insert_user(&pool, "alicia", "a@x.com").await.unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some(UNIQUE_VIOLATION));

    common::teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_post_requires_existing_user() {
    let pool = setup().await;

    let err = insert_post(&pool, 424242, "orphan").await.unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some(FOREIGN_KEY_VIOLATION));

    common::teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_deleting_user_cascades_to_posts_comments_and_follows() {
    let pool = setup().await;

    let alice = insert_user(&pool, "alice", "a@x.com").await.unwrap();
    let bob = insert_user(&pool, "bob", "b@x.com").await.unwrap();
    let alice_post = insert_post(&pool, alice, "mine").await.unwrap();
    let bob_post = insert_post(&pool, bob, "bob's").await.unwrap();
    insert_comment(&pool, alice_post, bob).await.unwrap();
    insert_comment(&pool, bob_post, alice).await.unwrap();
    insert_follow(&pool, alice, bob).await.unwrap();
    insert_follow(&pool, bob, alice).await.unwrap();

    sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(alice)
        .execute(&pool)
        .await
        .unwrap();

    let remaining_posts: Vec<(i64,)> = sqlx::query_as("SELECT id FROM posts")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(remaining_posts, vec![(bob_post,)], "Alice's post should be gone");
    // Bob's comment sat on Alice's post, Alice's comment sat on Bob's post
    assert_eq!(count(&pool, "comments").await, 0);
    assert_eq!(count(&pool, "follows").await, 0);

    common::teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_deleting_post_cascades_to_comments() {
    let pool = setup().await;

    let alice = insert_user(&pool, "alice", "a@x.com").await.unwrap();
    let post = insert_post(&pool, alice, "short lived").await.unwrap();
    insert_comment(&pool, post, alice).await.unwrap();

    sqlx::query("DELETE FROM posts WHERE id = $1")
        .bind(post)
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(count(&pool, "comments").await, 0);
    assert_eq!(count(&pool, "users").await, 1);

    common::teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_follow_pair_is_unique() {
    let pool = setup().await;

    let u1 = insert_user(&pool, "u1", "u1@x.com").await.unwrap();
    let u2 = insert_user(&pool, "u2", "u2@x.com").await.unwrap();

    insert_follow(&pool, u1, u2).await.unwrap();
    let err = insert_follow(&pool, u1, u2).await.unwrap_err();
    assert_eq!(sqlstate(&err).as_deref(), Some(UNIQUE_VIOLATION));

    // The reverse direction is a different pair
    insert_follow(&pool, u2, u1).await.unwrap();

    common::teardown(&pool).await;
}

#[tokio::test]
#[serial]
async fn test_self_follow_is_permitted() {
    let pool = setup().await;

    let u1 = insert_user(&pool, "u1", "u1@x.com").await.unwrap();
    insert_follow(&pool, u1, u1)
        .await
        .expect("The schema does not forbid self-follows");

    common::teardown(&pool).await;
}
