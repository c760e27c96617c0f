//! PostgreSQL store integration tests.
//!
//! Require a database: set TEST_DATABASE_URL and run with `--ignored`.

mod common;

use chat_service::models::{NewChatMessage, Role};
use chat_service::services::store::{ProfileDirectory, SessionStore, UsageStore};
use chat_service::services::{ChatDb, PersistOutcome, SessionPersistenceCoordinator, TurnRecord, UsageGate, UsageDecision};
use std::sync::Arc;
use uuid::Uuid;

async fn connect() -> ChatDb {
    common::init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run database tests");

    let db = ChatDb::connect(&database_url, 2, 1)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");
    db
}

#[tokio::test]
#[ignore] // Requires database
async fn message_without_session_maps_to_missing_parent() {
    let db = connect().await;

    let err = db
        .insert_message(&NewChatMessage::new(
            Uuid::new_v4().to_string(),
            Role::User,
            "orphan",
        ))
        .await
        .unwrap_err();

    assert!(err.is_missing_session(), "unexpected error: {err}");
}

#[tokio::test]
#[ignore]
async fn coordinator_heals_missing_session() {
    let db = Arc::new(connect().await);
    let session_id = Uuid::new_v4().to_string();
    let coordinator = SessionPersistenceCoordinator::new(db.clone());

    let outcome = coordinator
        .persist_turn(&TurnRecord {
            session_id: session_id.clone(),
            owner_id: "user-db-1".to_string(),
            user_text: "hello".to_string(),
            model_text: "hi there".to_string(),
            locale: Some("en".to_string()),
            first_turn: true,
        })
        .await;
    assert_eq!(outcome, PersistOutcome::Persisted);

    let roles: Vec<String> =
        sqlx::query_scalar("SELECT role FROM chat_messages WHERE session_id = $1 ORDER BY id")
            .bind(&session_id)
            .fetch_all(db.pool())
            .await
            .unwrap();
    assert_eq!(roles, vec!["user".to_string(), "model".to_string()]);

    let title: String = sqlx::query_scalar("SELECT title FROM chat_sessions WHERE id = $1")
        .bind(&session_id)
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert!(title.starts_with("Chat · "));
}

#[tokio::test]
#[ignore]
async fn usage_gate_counts_in_postgres() {
    let db = Arc::new(connect().await);
    let user_id = format!("user-{}", Uuid::new_v4());
    let gate = UsageGate::new(db.clone(), 2);

    assert_eq!(gate.check_and_increment(&user_id, false).await.unwrap(), UsageDecision::Allowed);
    assert_eq!(gate.check_and_increment(&user_id, false).await.unwrap(), UsageDecision::Allowed);
    assert!(matches!(
        gate.check_and_increment(&user_id, false).await.unwrap(),
        UsageDecision::Denied(_)
    ));

    let record = db.fetch_usage(&user_id).await.unwrap().unwrap();
    assert_eq!(record.question_count, 2);
}

#[tokio::test]
#[ignore]
async fn profile_role_lookup() {
    let db = connect().await;
    let user_id = format!("user-{}", Uuid::new_v4());

    sqlx::query("INSERT INTO profiles (id, role) VALUES ($1, 'admin')")
        .bind(&user_id)
        .execute(db.pool())
        .await
        .unwrap();

    assert_eq!(db.fetch_profile_role(&user_id).await.unwrap().as_deref(), Some("admin"));
    assert_eq!(db.fetch_profile_role("nobody").await.unwrap(), None);
}

#[tokio::test]
#[ignore]
async fn title_update_ignores_foreign_owner() {
    let db = connect().await;
    let session_id = Uuid::new_v4().to_string();

    db.create_session(&chat_service::models::NewChatSession {
        id: session_id.clone(),
        owner_id: "owner-a".to_string(),
        title: "Private notes".to_string(),
        locale: None,
    })
    .await
    .unwrap();

    db.set_session_title(&session_id, "intruder-b", "Hijacked")
        .await
        .unwrap();

    assert_eq!(db.session_owner(&session_id).await.unwrap().as_deref(), Some("owner-a"));
    let title: String = sqlx::query_scalar("SELECT title FROM chat_sessions WHERE id = $1")
        .bind(&session_id)
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(title, "Private notes");
}
