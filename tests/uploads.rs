#![cfg(feature = "inmem-store")]

use std::sync::Arc;

use actix_web::{test, web, App};
use quill::auth::create_token;
use quill::models::*;
use quill::repo::{inmem::InMemRepo, UploadRepo, UserRepo};
use quill::storage::FsFileStore;
use quill::{config, AppState};
use serde_json::Value;
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

async fn seed_user(repo: &InMemRepo, email: &str, role: Role) -> (User, String) {
    let user = repo
        .create_user(NewUser {
            name: "Someone".into(),
            email: email.into(),
            role: Some(role),
        })
        .await
        .unwrap();
    let token = create_token(&user.id, &user.name, &user.email, role).unwrap();
    (user, token)
}

// Multipart body with one "file" field.
fn build_multipart(file_name: &str, bytes: &[u8], boundary: &str) -> (String, Vec<u8>) {
    let mut body: Vec<u8> = Vec::new();
    let disp = format!("--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n", boundary, file_name);
    body.extend_from_slice(disp.as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    (format!("multipart/form-data; boundary={}", boundary), body)
}

// Minimal 1x1 PNG (transparent)
fn sample_png() -> Vec<u8> {
    vec![
        0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, // signature
        0x00, 0x00, 0x00, 0x0D, b'I', b'H', b'D', b'R', 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0A, b'I',
        b'D', b'A', b'T', 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A,
        0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, b'I', b'E', b'N', b'D', 0xAE, 0x42, 0x60, 0x82,
    ]
}

#[actix_web::test]
#[serial]
async fn png_uploads_round_trip_through_the_file_route() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    let (_, admin) = seed_user(&repo, "admin@example.com", Role::Admin).await;
    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;

    let (ctype, body) = build_multipart("My Photo.PNG", &sample_png(), "XBOUND");
    let req = test::TestRequest::post()
        .uri("/api/uploads")
        .insert_header(("Authorization", format!("Bearer {admin}")))
        .insert_header(("Content-Type", ctype))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let upload: Value = test::read_body_json(resp).await;
    assert_eq!(upload["mime_type"], "image/png");
    assert_eq!(upload["original_name"], "My Photo.PNG");
    let url = upload["url"].as_str().unwrap();
    assert!(url.starts_with("/files/"));

    let req = test::TestRequest::get().uri(url).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("Content-Type").unwrap(),
        "image/png"
    );
    let bytes = test::read_body(resp).await;
    assert_eq!(bytes.as_ref(), sample_png().as_slice());
}

#[actix_web::test]
#[serial]
async fn non_image_payloads_are_refused() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    let (_, admin) = seed_user(&repo, "admin@example.com", Role::Admin).await;
    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;

    let (ctype, body) = build_multipart("notes.txt", b"hello world", "XBOUND");
    let req = test::TestRequest::post()
        .uri("/api/uploads")
        .insert_header(("Authorization", format!("Bearer {admin}")))
        .insert_header(("Content-Type", ctype))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 415);

    let page = repo.list_uploads(1, 10).await.unwrap();
    assert_eq!(page.pagination.total, 0);
}

#[actix_web::test]
#[serial]
async fn uploads_are_gated_to_admins() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    let (_, blogger) = seed_user(&repo, "b@example.com", Role::Blogger).await;
    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;

    let (ctype, body) = build_multipart("pic.png", &sample_png(), "XBOUND");
    let req = test::TestRequest::post()
        .uri("/api/uploads")
        .insert_header(("Authorization", format!("Bearer {blogger}")))
        .insert_header(("Content-Type", ctype))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);
}

#[actix_web::test]
#[serial]
async fn deleting_an_upload_removes_the_file_too() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    let (_, admin) = seed_user(&repo, "admin@example.com", Role::Admin).await;
    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;

    let (ctype, body) = build_multipart("pic.png", &sample_png(), "XBOUND");
    let req = test::TestRequest::post()
        .uri("/api/uploads")
        .insert_header(("Authorization", format!("Bearer {admin}")))
        .insert_header(("Content-Type", ctype))
        .set_payload(body)
        .to_request();
    let upload: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let id = upload["id"].as_i64().unwrap();
    let url = upload["url"].as_str().unwrap().to_string();

    let req = test::TestRequest::delete()
        .uri(&format!("/api/uploads/{id}"))
        .insert_header(("Authorization", format!("Bearer {admin}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);

    let req = test::TestRequest::get().uri(&url).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
    assert_eq!(repo.list_uploads(1, 10).await.unwrap().pagination.total, 0);
}

#[actix_web::test]
#[serial]
async fn avatars_are_self_service_but_not_for_others() {
    setup_env();
    let repo = Arc::new(InMemRepo::new());
    let (me, my_token) = seed_user(&repo, "me@example.com", Role::User).await;
    let (other, _) = seed_user(&repo, "other@example.com", Role::User).await;
    let app =
        test::init_service(App::new().app_data(state(repo.clone())).configure(config)).await;

    let (ctype, body) = build_multipart("face.png", &sample_png(), "XBOUND");
    let req = test::TestRequest::put()
        .uri(&format!("/api/users/{}/avatar", me.id))
        .insert_header(("Authorization", format!("Bearer {my_token}")))
        .insert_header(("Content-Type", ctype.clone()))
        .set_payload(body.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let updated: Value = test::read_body_json(resp).await;
    assert!(updated["image"].as_str().unwrap().starts_with("/files/avatars/"));

    let req = test::TestRequest::put()
        .uri(&format!("/api/users/{}/avatar", other.id))
        .insert_header(("Authorization", format!("Bearer {my_token}")))
        .insert_header(("Content-Type", ctype))
        .set_payload(body)
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/users/{}/avatar", me.id))
        .insert_header(("Authorization", format!("Bearer {my_token}")))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert_eq!(
        repo.get_user(&me.id).await.unwrap().image,
        None
    );
}
