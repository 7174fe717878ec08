#![cfg(feature = "inmem-store")]

use std::sync::Arc;

use actix_web::{test, web, App};
use quill::auth::create_token;
use quill::models::*;
use quill::repo::{inmem::InMemRepo, AuditLogRepo, CommentRepo, PostRepo, SettingRepo, UserRepo};
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

async fn seed_published_post(repo: &InMemRepo, author_id: &str) -> Post {
    repo.create_post(
        author_id,
        NewPost {
            title: "A post".into(),
            slug: format!("post-{}", uuid::Uuid::new_v4()),
            content: Some("body".into()),
            excerpt: None,
            featured_image: None,
            category_id: None,
            status: Some(PostStatus::Published),
            featured: None,
            tag_ids: None,
        },
    )
    .await
    .unwrap()
}

async fn seed_blogger(repo: &InMemRepo, email: &str) -> (User, String) {
    let user = repo
        .create_user(NewUser {
            name: "Blogger".into(),
            email: email.into(),
            role: Some(Role::Blogger),
        })
        .await
        .unwrap();
    let token = create_token(&user.id, &user.name, &user.email, Role::Blogger).unwrap();
    (user, token)
}

#[actix_web::test]
#[serial]
async fn honeypot_submissions_are_rejected_without_a_trace() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    let post = seed_published_post(&repo, "u1").await;
    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;

    let req = test::TestRequest::post()
        .uri(&format!("/api/posts/{}/comments", post.id))
        .set_json(json!({
            "name": "bot",
            "content": "spam",
            "website": "http://spam.example"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    // nothing stored, nothing audited
    let comments = repo
        .list_comments(&CommentFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(comments.pagination.total, 0);
    let logs = repo
        .list_audit_logs(&AuditLogFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(logs.pagination.total, 0);
}

#[actix_web::test]
#[serial]
async fn anonymous_comments_wait_for_moderation() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    let post = seed_published_post(&repo, "u1").await;
    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;

    let req = test::TestRequest::post()
        .uri(&format!("/api/posts/{}/comments", post.id))
        .set_json(json!({"name": "ann", "content": "nice read"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(
        body["message"],
        "Comment submitted successfully. It will appear after moderation."
    );
    assert_eq!(body["comment"]["status"], "pending");

    // pending comments never show in the public tree
    let req = test::TestRequest::get()
        .uri(&format!("/api/posts/{}/comments", post.id))
        .to_request();
    let tree: Vec<Value> = test::read_body_json(test::call_service(&app, req).await).await;
    assert!(tree.is_empty());
}

#[actix_web::test]
#[serial]
async fn staff_comments_skip_moderation() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    let (_, token) = seed_blogger(&repo, "b@example.com").await;
    let post = seed_published_post(&repo, "u1").await;
    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;

    let req = test::TestRequest::post()
        .uri(&format!("/api/posts/{}/comments", post.id))
        .insert_header(("Authorization", format!("Bearer {token}")))
        .set_json(json!({"name": "staff", "content": "hello"}))
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["message"], "Comment posted successfully!");
    assert_eq!(body["comment"]["status"], "approved");
}

#[actix_web::test]
#[serial]
async fn auto_approve_setting_publishes_anonymous_comments() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    repo.upsert_setting("comments.autoApprove", "true").await.unwrap();
    let post = seed_published_post(&repo, "u1").await;
    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;

    let req = test::TestRequest::post()
        .uri(&format!("/api/posts/{}/comments", post.id))
        .set_json(json!({"name": "ann", "content": "nice"}))
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(body["comment"]["status"], "approved");
}

#[actix_web::test]
#[serial]
async fn replies_must_belong_to_the_same_post() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    let post_a = seed_published_post(&repo, "u1").await;
    let post_b = seed_published_post(&repo, "u1").await;
    let parent = repo
        .create_comment(NewComment {
            post_id: post_a.id,
            parent_id: None,
            name: "root".into(),
            email: None,
            content: "root".into(),
            image: None,
            status: CommentStatus::Approved,
            ip_address: None,
            user_agent: None,
        })
        .await
        .unwrap();
    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;

    // parent lives on post_a, reply targets post_b
    let req = test::TestRequest::post()
        .uri(&format!("/api/posts/{}/comments", post_b.id))
        .set_json(json!({"name": "x", "content": "y", "parent_id": parent.id}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    // unknown parent
    let req = test::TestRequest::post()
        .uri(&format!("/api/posts/{}/comments", post_a.id))
        .set_json(json!({"name": "x", "content": "y", "parent_id": 9999}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
}

#[actix_web::test]
#[serial]
async fn comments_on_drafts_are_not_accepted() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    let draft = repo
        .create_post(
            "u1",
            NewPost {
                title: "Draft".into(),
                slug: "draft".into(),
                content: None,
                excerpt: None,
                featured_image: None,
                category_id: None,
                status: None,
                featured: None,
                tag_ids: None,
            },
        )
        .await
        .unwrap();
    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;

    let req = test::TestRequest::post()
        .uri(&format!("/api/posts/{}/comments", draft.id))
        .set_json(json!({"name": "ann", "content": "hi"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn tree_nests_replies_and_promotes_orphans() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    let post = seed_published_post(&repo, "u1").await;
    let mk = |parent_id: Option<Id>, name: &str, status: CommentStatus| NewComment {
        post_id: post.id,
        parent_id,
        name: name.into(),
        email: None,
        content: name.into(),
        image: None,
        status,
        ip_address: None,
        user_agent: None,
    };
    let root = repo
        .create_comment(mk(None, "root", CommentStatus::Approved))
        .await
        .unwrap();
    repo.create_comment(mk(Some(root.id), "reply", CommentStatus::Approved))
        .await
        .unwrap();
    let pending = repo
        .create_comment(mk(None, "hidden", CommentStatus::Pending))
        .await
        .unwrap();
    // approved child of a pending parent surfaces as a root
    repo.create_comment(mk(Some(pending.id), "orphan", CommentStatus::Approved))
        .await
        .unwrap();

    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;
    let req = test::TestRequest::get()
        .uri(&format!("/api/posts/{}/comments", post.id))
        .to_request();
    let tree: Vec<Value> = test::read_body_json(test::call_service(&app, req).await).await;

    let names: Vec<&str> = tree.iter().map(|n| n["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"root"));
    assert!(names.contains(&"orphan"));
    assert!(!names.contains(&"hidden"));
    let root_node = tree.iter().find(|n| n["name"] == "root").unwrap();
    assert_eq!(root_node["replies"][0]["name"], "reply");
}

#[actix_web::test]
#[serial]
async fn bloggers_moderate_only_their_own_posts() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    let (owner, owner_token) = seed_blogger(&repo, "owner@example.com").await;
    let (_, other_token) = seed_blogger(&repo, "other@example.com").await;
    let post = seed_published_post(&repo, &owner.id).await;
    let comment = repo
        .create_comment(NewComment {
            post_id: post.id,
            parent_id: None,
            name: "ann".into(),
            email: None,
            content: "hi".into(),
            image: None,
            status: CommentStatus::Pending,
            ip_address: None,
            user_agent: None,
        })
        .await
        .unwrap();
    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;

    let uri = format!("/api/posts/{}/comments/{}/approve", post.id, comment.id);
    let req = test::TestRequest::post()
        .uri(&uri)
        .insert_header(("Authorization", format!("Bearer {other_token}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::post()
        .uri(&uri)
        .insert_header(("Authorization", format!("Bearer {owner_token}")))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let approved = repo.get_comment(comment.id).await.unwrap();
    assert_eq!(approved.status, CommentStatus::Approved);
    assert_eq!(approved.approved_by.as_deref(), Some(owner.id.as_str()));
}
