#![cfg(feature = "inmem-store")]

use std::sync::Arc;

use actix_web::{test, web, App};
use chrono::{Duration, Utc};
use quill::audit::{self, Details, REDACTED};
use quill::auth::create_token;
use quill::models::*;
use quill::repo::{inmem::InMemRepo, AuditLogRepo, Repo, UserRepo};
use quill::storage::FsFileStore;
use quill::{config, AppState};
use serde_json::{json, Value};
use serial_test::serial;

fn setup_env() {
    std::env::set_var("JWT_SECRET", "0123456789abcdef0123456789abcdef");
    std::env::set_var("QUILL_DATA_DIR", tempfile::tempdir().unwrap().path());
}

fn state(repo: Arc<InMemRepo>) -> web::Data<AppState> {
    web::Data::new(AppState {
        repo,
        files: Arc::new(FsFileStore::with_root(tempfile::tempdir().unwrap().into_path())),
    })
}

async fn seed_admin(repo: &InMemRepo) -> (User, String) {
    let user = repo
        .create_user(NewUser {
            name: "Admin".into(),
            email: "admin@example.com".into(),
            role: Some(Role::Admin),
        })
        .await
        .unwrap();
    let token = create_token(&user.id, &user.name, &user.email, Role::Admin).unwrap();
    (user, token)
}

#[tokio::test]
#[serial]
async fn recorded_details_are_scrubbed_before_storage() {
    setup_env();
    let repo = InMemRepo::new();
    let details = Details::new()
        .before(&json!({ "password": "hunter2", "name": "ann" }))
        .metadata(json!({ "token": "abc", "note": "kept" }))
        .build();
    audit::record(
        &repo as &dyn Repo,
        Some("u1"),
        AuditAction::Update,
        AuditEntity::User,
        Some("u2".into()),
        details,
        None,
    )
    .await;

    let page = repo
        .list_audit_logs(&AuditLogFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(page.pagination.total, 1);
    let stored = &page.items[0].details.as_ref().unwrap();
    assert_eq!(stored["before"]["password"], REDACTED);
    assert_eq!(stored["before"]["name"], "ann");
    assert_eq!(stored["metadata"]["token"], REDACTED);
    assert_eq!(stored["metadata"]["note"], "kept");
}

#[tokio::test]
#[serial]
async fn filters_narrow_the_trail() {
    setup_env();
    let repo = InMemRepo::new();
    let r = &repo as &dyn Repo;
    audit::record(r, Some("u1"), AuditAction::Create, AuditEntity::Post, Some("1".into()), None, None).await;
    audit::record(r, Some("u1"), AuditAction::Delete, AuditEntity::Post, Some("1".into()), None, None).await;
    audit::record(r, Some("u2"), AuditAction::Create, AuditEntity::Tag, Some("5".into()), None, None).await;

    let by_actor = repo
        .list_audit_logs(
            &AuditLogFilter { actor_id: Some("u1".into()), ..Default::default() },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(by_actor.pagination.total, 2);

    let by_action = repo
        .list_audit_logs(
            &AuditLogFilter { action: Some(AuditAction::Delete), ..Default::default() },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(by_action.pagination.total, 1);

    let by_entity = repo
        .list_audit_logs(
            &AuditLogFilter { entity: Some(AuditEntity::Tag), ..Default::default() },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(by_entity.pagination.total, 1);
    assert_eq!(by_entity.items[0].actor_id.as_deref(), Some("u2"));

    // everything here was written just now, so a future window is empty
    let future = repo
        .list_audit_logs(
            &AuditLogFilter {
                start_date: Some(Utc::now() + Duration::hours(1)),
                ..Default::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(future.pagination.total, 0);
}

#[tokio::test]
#[serial]
async fn stats_count_by_action_entity_and_recency() {
    setup_env();
    let repo = InMemRepo::new();
    let r = &repo as &dyn Repo;
    audit::record(r, None, AuditAction::Create, AuditEntity::Post, None, None, None).await;
    audit::record(r, None, AuditAction::Create, AuditEntity::Comment, None, None, None).await;
    audit::record(r, None, AuditAction::Approve, AuditEntity::Comment, None, None, None).await;

    let stats = repo.audit_stats().await.unwrap();
    assert_eq!(stats.by_action.get("CREATE"), Some(&2));
    assert_eq!(stats.by_action.get("APPROVE"), Some(&1));
    assert_eq!(stats.by_entity.get("COMMENT"), Some(&2));
    assert_eq!(stats.recent_count, 3);
}

#[actix_web::test]
#[serial]
async fn post_mutations_leave_a_trail() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    let (admin, token) = seed_admin(&repo).await;
    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/posts")
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(json!({ "title": "Audited", "slug": "audited", "content": "x" }))
        .to_request();
    let created: Value = test::read_body_json(test::call_service(&app, req).await).await;

    let logs = repo
        .list_audit_logs(&AuditLogFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(logs.pagination.total, 1);
    let entry = &logs.items[0];
    assert_eq!(entry.action, AuditAction::Create);
    assert_eq!(entry.entity, AuditEntity::Post);
    assert_eq!(entry.actor_id.as_deref(), Some(admin.id.as_str()));
    assert_eq!(
        entry.entity_id.as_deref(),
        Some(created["id"].to_string().as_str())
    );
}

#[actix_web::test]
#[serial]
async fn role_changes_are_flagged_distinctly() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    let (_, token) = seed_admin(&repo).await;
    let target = repo
        .create_user(NewUser {
            name: "Reader".into(),
            email: "reader@example.com".into(),
            role: Some(Role::User),
        })
        .await
        .unwrap();
    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;

    let req = test::TestRequest::put()
        .uri(&format!("/api/users/{}", target.id))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(json!({ "role": "blogger" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let logs = repo
        .list_audit_logs(
            &AuditLogFilter { action: Some(AuditAction::RoleChange), ..Default::default() },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(logs.pagination.total, 1);
    assert_eq!(logs.items[0].entity_id.as_deref(), Some(target.id.as_str()));
}

#[tokio::test]
#[serial]
async fn deleting_an_actor_keeps_the_entry() {
    setup_env();
    let repo = InMemRepo::new();
    let actor = repo
        .create_user(NewUser {
            name: "Gone".into(),
            email: "gone@example.com".into(),
            role: Some(Role::Admin),
        })
        .await
        .unwrap();
    audit::record(
        &repo as &dyn Repo,
        Some(&actor.id),
        AuditAction::Delete,
        AuditEntity::Post,
        Some("9".into()),
        None,
        None,
    )
    .await;

    repo.delete_user(&actor.id).await.unwrap();
    let logs = repo
        .list_audit_logs(&AuditLogFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(logs.pagination.total, 1);
    assert_eq!(logs.items[0].actor_id, None);
}
