use std::collections::BTreeMap;
use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::TryStreamExt as _;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::audit::{self, Details};
use crate::auth::Auth;
use crate::error::ApiError;
use crate::models::*;
use crate::moderation::{self, CommentSubmission, SubmissionContext};
use crate::repo::Repo;
use crate::settings::{self, SettingsStore};
use crate::export;
use crate::storage::{self, FileStore, FileStoreError};

const UPLOAD_SIZE_LIMIT: usize = 5 * 1024 * 1024;
const AVATAR_SIZE_LIMIT: usize = 2 * 1024 * 1024;
const UPLOAD_MIME: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/svg+xml",
];
const AVATAR_MIME: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::resource("/posts")
                    .route(web::get().to(list_posts))
                    .route(web::post().to(create_post)),
            )
            .service(web::resource("/posts/bulk").route(web::post().to(bulk_posts)))
            .service(web::resource("/posts/id/{id}").route(web::get().to(get_post_by_id)))
            // one resource: GET resolves by slug, PUT/DELETE parse the
            // same segment as a numeric id
            .service(
                web::resource("/posts/{slug}")
                    .route(web::get().to(get_post_by_slug))
                    .route(web::put().to(update_post))
                    .route(web::delete().to(delete_post)),
            )
            .service(web::resource("/posts/{id}/view").route(web::post().to(record_view)))
            .service(
                web::resource("/posts/{id}/like")
                    .route(web::post().to(like_post))
                    .route(web::delete().to(unlike_post)),
            )
            .service(
                web::resource("/posts/{id}/comments")
                    .route(web::get().to(post_comment_tree))
                    .route(web::post().to(submit_comment)),
            )
            .service(
                web::resource("/posts/{post_id}/comments/{id}/approve")
                    .route(web::post().to(approve_own_post_comment)),
            )
            .service(web::resource("/comments").route(web::get().to(list_comments)))
            .service(web::resource("/comments/counts").route(web::get().to(comment_counts)))
            .service(web::resource("/comments/bulk").route(web::post().to(bulk_comments)))
            .service(
                web::resource("/comments/{id}/approve").route(web::post().to(approve_comment)),
            )
            .service(web::resource("/comments/{id}/spam").route(web::post().to(spam_comment)))
            .service(web::resource("/comments/{id}").route(web::delete().to(delete_comment)))
            .service(
                web::resource("/categories")
                    .route(web::get().to(list_categories))
                    .route(web::post().to(create_category)),
            )
            .service(
                web::resource("/categories/{slug}")
                    .route(web::get().to(get_category))
                    .route(web::put().to(update_category))
                    .route(web::delete().to(delete_category)),
            )
            .service(
                web::resource("/tags")
                    .route(web::get().to(list_tags))
                    .route(web::post().to(create_tag)),
            )
            .service(web::resource("/tags/search").route(web::get().to(search_tags)))
            .service(
                web::resource("/tags/{slug}")
                    .route(web::get().to(get_tag))
                    .route(web::delete().to(delete_tag)),
            )
            .service(web::resource("/newsletter/subscribe").route(web::post().to(subscribe)))
            .service(
                web::resource("/newsletter/unsubscribe").route(web::post().to(unsubscribe)),
            )
            .service(
                web::resource("/newsletter/subscribers").route(web::get().to(list_subscribers)),
            )
            .service(
                web::resource("/newsletter/subscribers/{id}")
                    .route(web::delete().to(delete_subscriber)),
            )
            .service(web::resource("/newsletter/stats").route(web::get().to(subscriber_stats)))
            .service(
                web::resource("/uploads")
                    .route(web::get().to(list_uploads))
                    .route(web::post().to(create_upload)),
            )
            .service(web::resource("/uploads/{id}").route(web::delete().to(delete_upload)))
            .service(
                web::resource("/users")
                    .route(web::get().to(list_users))
                    .route(web::post().to(create_user)),
            )
            .service(
                web::resource("/users/{id}")
                    .route(web::get().to(get_user))
                    .route(web::put().to(update_user))
                    .route(web::delete().to(delete_user)),
            )
            .service(
                web::resource("/users/{id}/avatar")
                    .route(web::put().to(set_avatar))
                    .route(web::delete().to(delete_avatar)),
            )
            .service(
                web::resource("/settings")
                    .route(web::get().to(get_settings))
                    .route(web::put().to(update_settings)),
            )
            .service(web::resource("/settings/public").route(web::get().to(public_settings)))
            .service(web::resource("/audit-logs").route(web::get().to(list_audit_logs)))
            .service(web::resource("/audit-logs/stats").route(web::get().to(audit_stats)))
            .service(web::resource("/audit-logs/{id}").route(web::get().to(get_audit_log)))
            .service(web::resource("/dashboard/stats").route(web::get().to(dashboard_stats)))
            .service(
                web::resource("/dashboard/recent-posts").route(web::get().to(recent_posts)),
            )
            .service(
                web::resource("/dashboard/recent-comments")
                    .route(web::get().to(recent_comments)),
            )
            .service(
                web::resource("/dashboard/popular-posts").route(web::get().to(popular_posts)),
            )
            .service(web::resource("/search").route(web::get().to(search)))
            .service(web::resource("/export/{kind}").route(web::get().to(export_table))),
    );
    cfg.route("/files/{path:.*}", web::get().to(serve_file));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub files: Arc<dyn FileStore>,
}

/// First X-Forwarded-For entry when present, else the peer address.
fn client_ip(req: &HttpRequest) -> Option<String> {
    if let Some(fwd) = req.headers().get("x-forwarded-for") {
        if let Ok(s) = fwd.to_str() {
            if let Some(first) = s.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return Some(first.to_string());
                }
            }
        }
    }
    req.peer_addr().map(|a| a.ip().to_string())
}

fn user_agent(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn with_tags(repo: &dyn Repo, post: Post) -> Result<PostWithTags, ApiError> {
    let tags = repo.tags_for_post(post.id).await?;
    Ok(PostWithTags { post, tags })
}

fn post_snapshot(p: &Post) -> serde_json::Value {
    json!({
        "title": p.title,
        "slug": p.slug,
        "status": p.status,
        "featured": p.featured,
        "excerpt": p.excerpt.as_deref().map(|e| audit::snippet(e, 100)),
    })
}

fn comment_snapshot(c: &Comment) -> serde_json::Value {
    json!({
        "status": c.status,
        "content": audit::snippet(&c.content, 200),
    })
}

fn joined_ids(ids: &[Id]) -> String {
    ids.iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

// --------------------------------------------------------------- posts

#[utoipa::path(
    get,
    path = "/api/posts",
    responses((status = 200, description = "Paginated posts"))
)]
pub async fn list_posts(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    page: web::Query<PageQuery>,
    filter: web::Query<PostFilter>,
) -> Result<HttpResponse, ApiError> {
    let staff = auth.as_ref().map(|a| a.0.is_staff()).unwrap_or(false);
    let mut filter = filter.into_inner();
    if !staff {
        filter.status = Some(PostStatus::Published);
    }
    let (p, limit) = page.normalize(10);
    let posts = data.repo.list_posts(&filter, p, limit, page.order()).await?;
    let mut items = Vec::with_capacity(posts.items.len());
    for post in posts.items {
        items.push(with_tags(data.repo.as_ref(), post).await?);
    }
    Ok(HttpResponse::Ok().json(json!({ "items": items, "pagination": posts.pagination })))
}

#[utoipa::path(
    get,
    path = "/api/posts/id/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post", body = PostWithTags),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Unknown post")
    )
)]
pub async fn get_post_by_id(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin, Role::Blogger])?;
    let post = data.repo.get_post(path.into_inner()).await?;
    if !auth.0.is_admin() && post.author_id.as_deref() != Some(auth.0.id.as_str()) {
        return Err(ApiError::Forbidden);
    }
    Ok(HttpResponse::Ok().json(with_tags(data.repo.as_ref(), post).await?))
}

#[utoipa::path(
    get,
    path = "/api/posts/{slug}",
    params(("slug" = String, Path, description = "Post slug")),
    responses(
        (status = 200, description = "Post", body = PostWithTags),
        (status = 404, description = "Unknown or unpublished post")
    )
)]
pub async fn get_post_by_slug(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let post = data.repo.get_post_by_slug(&path.into_inner()).await?;
    if post.status != PostStatus::Published {
        let allowed = auth
            .as_ref()
            .map(|a| a.0.is_admin() || post.author_id.as_deref() == Some(a.0.id.as_str()))
            .unwrap_or(false);
        if !allowed {
            return Err(ApiError::NotFound);
        }
    }
    Ok(HttpResponse::Ok().json(with_tags(data.repo.as_ref(), post).await?))
}

#[utoipa::path(
    post,
    path = "/api/posts",
    request_body = NewPost,
    responses(
        (status = 201, description = "Post created", body = PostWithTags),
        (status = 403, description = "Bloggers and admins only"),
        (status = 409, description = "Slug already in use")
    )
)]
pub async fn create_post(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewPost>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin, Role::Blogger])?;
    let mut new = payload.into_inner();
    if new.title.trim().is_empty() || new.slug.trim().is_empty() {
        return Err(ApiError::validation("title and slug are required"));
    }
    if !auth.0.is_admin() {
        // only admins can feature a post
        new.featured = Some(false);
    }
    let post = data.repo.create_post(&auth.0.id, new).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Create,
        AuditEntity::Post,
        Some(post.id.to_string()),
        Details::new().after(&post_snapshot(&post)).build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Created().json(with_tags(data.repo.as_ref(), post).await?))
}

#[utoipa::path(
    put,
    path = "/api/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    request_body = UpdatePost,
    responses(
        (status = 200, description = "Post updated", body = PostWithTags),
        (status = 403, description = "Not the author"),
        (status = 409, description = "Slug already in use")
    )
)]
pub async fn update_post(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdatePost>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let before = data.repo.get_post(id).await?;
    auth.0
        .require_owner_or_role(before.author_id.as_deref(), &[Role::Admin])?;
    let mut upd = payload.into_inner();
    if !auth.0.is_admin() {
        upd.featured = None;
    }
    let first_publish =
        before.published_at.is_none() && upd.status == Some(PostStatus::Published);
    let post = data.repo.update_post(id, upd).await?;
    let action = if first_publish {
        AuditAction::Publish
    } else {
        AuditAction::Update
    };
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        action,
        AuditEntity::Post,
        Some(post.id.to_string()),
        Details::new()
            .before(&post_snapshot(&before))
            .after(&post_snapshot(&post))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(with_tags(data.repo.as_ref(), post).await?))
}

#[utoipa::path(
    delete,
    path = "/api/posts/{id}",
    params(("id" = Id, Path, description = "Post id")),
    responses(
        (status = 200, description = "Post deleted"),
        (status = 403, description = "Not the author")
    )
)]
pub async fn delete_post(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let before = data.repo.get_post(id).await?;
    auth.0
        .require_owner_or_role(before.author_id.as_deref(), &[Role::Admin])?;
    let post = data.repo.delete_post(id).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Delete,
        AuditEntity::Post,
        Some(id.to_string()),
        Details::new()
            .before(&post_snapshot(&post))
            .metadata(json!({ "commentsRemoved": true }))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Post deleted" })))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkPostsRequest {
    pub ids: Vec<Id>,
    pub action: String,
}

#[utoipa::path(
    post,
    path = "/api/posts/bulk",
    request_body = BulkPostsRequest,
    responses(
        (status = 200, description = "Bulk action applied"),
        (status = 400, description = "Unknown action"),
        (status = 403, description = "Admins only")
    )
)]
pub async fn bulk_posts(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<BulkPostsRequest>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let BulkPostsRequest { ids, action } = payload.into_inner();
    if ids.is_empty() {
        return Err(ApiError::validation("ids must not be empty"));
    }
    let (count, audit_action) = match action.as_str() {
        "publish" => (
            data.repo
                .bulk_update_post_status(&ids, PostStatus::Published)
                .await?,
            AuditAction::Publish,
        ),
        "draft" => (
            data.repo
                .bulk_update_post_status(&ids, PostStatus::Draft)
                .await?,
            AuditAction::Update,
        ),
        "archive" => (
            data.repo
                .bulk_update_post_status(&ids, PostStatus::Archived)
                .await?,
            AuditAction::Archive,
        ),
        "delete" => (data.repo.bulk_delete_posts(&ids).await?, AuditAction::Delete),
        _ => return Err(ApiError::validation("unknown bulk action")),
    };
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        audit_action,
        AuditEntity::Post,
        Some(joined_ids(&ids)),
        Details::new()
            .metadata(json!({ "count": count, "action": action }))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "affected": count })))
}

async fn published_post(repo: &dyn Repo, id: Id) -> Result<Post, ApiError> {
    let post = repo.get_post(id).await?;
    if post.status != PostStatus::Published {
        return Err(ApiError::NotFound);
    }
    Ok(post)
}

#[utoipa::path(
    post,
    path = "/api/posts/{id}/view",
    params(("id" = Id, Path, description = "Post id")),
    responses((status = 200, description = "View recorded"))
)]
pub async fn record_view(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let post = published_post(data.repo.as_ref(), path.into_inner()).await?;
    data.repo.increment_view_count(post.id).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

#[utoipa::path(
    post,
    path = "/api/posts/{id}/like",
    params(("id" = Id, Path, description = "Post id")),
    responses((status = 200, description = "Like recorded"))
)]
pub async fn like_post(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let post = published_post(data.repo.as_ref(), path.into_inner()).await?;
    data.repo.increment_like_count(post.id).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

#[utoipa::path(
    delete,
    path = "/api/posts/{id}/like",
    params(("id" = Id, Path, description = "Post id")),
    responses((status = 200, description = "Like removed"))
)]
pub async fn unlike_post(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let post = published_post(data.repo.as_ref(), path.into_inner()).await?;
    data.repo.decrement_like_count(post.id).await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}

// ------------------------------------------------------------ comments

#[utoipa::path(
    get,
    path = "/api/posts/{id}/comments",
    params(("id" = Id, Path, description = "Post id")),
    responses((status = 200, description = "Approved comment tree", body = [CommentNode]))
)]
pub async fn post_comment_tree(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let post = published_post(data.repo.as_ref(), path.into_inner()).await?;
    let tree = data.repo.approved_comment_tree(post.id).await?;
    Ok(HttpResponse::Ok().json(tree))
}

#[utoipa::path(
    post,
    path = "/api/posts/{id}/comments",
    params(("id" = Id, Path, description = "Post id")),
    request_body = CommentSubmission,
    responses(
        (status = 201, description = "Comment accepted"),
        (status = 400, description = "Invalid submission"),
        (status = 404, description = "Unknown or unpublished post")
    )
)]
pub async fn submit_comment(
    req: HttpRequest,
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<CommentSubmission>,
) -> Result<HttpResponse, ApiError> {
    let ctx = SubmissionContext {
        identity: auth.map(|a| a.0),
        ip: client_ip(&req),
        user_agent: user_agent(&req),
    };
    let outcome = moderation::submit_comment(
        data.repo.as_ref(),
        path.into_inner(),
        payload.into_inner(),
        ctx,
    )
    .await?;
    Ok(HttpResponse::Created()
        .json(json!({ "message": outcome.message, "comment": outcome.comment })))
}

#[utoipa::path(
    post,
    path = "/api/posts/{post_id}/comments/{id}/approve",
    params(
        ("post_id" = Id, Path, description = "Post id"),
        ("id" = Id, Path, description = "Comment id")
    ),
    responses(
        (status = 200, description = "Comment approved", body = Comment),
        (status = 403, description = "Admin or post author only")
    )
)]
pub async fn approve_own_post_comment(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<(Id, Id)>,
) -> Result<HttpResponse, ApiError> {
    let (post_id, id) = path.into_inner();
    let post = data.repo.get_post(post_id).await?;
    auth.0
        .require_owner_or_role(post.author_id.as_deref(), &[Role::Admin])?;
    let before = data.repo.get_comment(id).await?;
    if before.post_id != post_id {
        return Err(ApiError::validation("comment does not belong to this post"));
    }
    let comment = data.repo.approve_comment(id, &auth.0.id).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Approve,
        AuditEntity::Comment,
        Some(id.to_string()),
        Details::new()
            .before(&comment_snapshot(&before))
            .after(&comment_snapshot(&comment))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(comment))
}

#[utoipa::path(
    get,
    path = "/api/comments",
    responses(
        (status = 200, description = "Paginated comments"),
        (status = 403, description = "Admins only")
    )
)]
pub async fn list_comments(
    auth: Auth,
    data: web::Data<AppState>,
    page: web::Query<PageQuery>,
    filter: web::Query<CommentFilter>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let (p, limit) = page.normalize(20);
    let comments = data.repo.list_comments(&filter, p, limit).await?;
    Ok(HttpResponse::Ok().json(comments))
}

#[utoipa::path(
    get,
    path = "/api/comments/counts",
    responses((status = 200, description = "Counts by status"))
)]
pub async fn comment_counts(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    Ok(HttpResponse::Ok().json(data.repo.comment_counts_by_status().await?))
}

#[utoipa::path(
    post,
    path = "/api/comments/{id}/approve",
    params(("id" = Id, Path, description = "Comment id")),
    responses((status = 200, description = "Comment approved", body = Comment))
)]
pub async fn approve_comment(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let id = path.into_inner();
    let before = data.repo.get_comment(id).await?;
    let comment = data.repo.approve_comment(id, &auth.0.id).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Approve,
        AuditEntity::Comment,
        Some(id.to_string()),
        Details::new()
            .before(&comment_snapshot(&before))
            .after(&comment_snapshot(&comment))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(comment))
}

#[utoipa::path(
    post,
    path = "/api/comments/{id}/spam",
    params(("id" = Id, Path, description = "Comment id")),
    responses((status = 200, description = "Comment marked as spam", body = Comment))
)]
pub async fn spam_comment(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let id = path.into_inner();
    let before = data.repo.get_comment(id).await?;
    let comment = data.repo.spam_comment(id).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Spam,
        AuditEntity::Comment,
        Some(id.to_string()),
        Details::new()
            .before(&comment_snapshot(&before))
            .after(&comment_snapshot(&comment))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(comment))
}

#[utoipa::path(
    delete,
    path = "/api/comments/{id}",
    params(("id" = Id, Path, description = "Comment id")),
    responses((status = 200, description = "Comment deleted"))
)]
pub async fn delete_comment(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let id = path.into_inner();
    let comment = data.repo.delete_comment(id).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Delete,
        AuditEntity::Comment,
        Some(id.to_string()),
        Details::new().before(&comment_snapshot(&comment)).build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Comment deleted" })))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkCommentsRequest {
    pub ids: Vec<Id>,
    pub action: String,
}

#[utoipa::path(
    post,
    path = "/api/comments/bulk",
    request_body = BulkCommentsRequest,
    responses(
        (status = 200, description = "Bulk action applied"),
        (status = 400, description = "Unknown action")
    )
)]
pub async fn bulk_comments(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<BulkCommentsRequest>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let BulkCommentsRequest { ids, action } = payload.into_inner();
    if ids.is_empty() {
        return Err(ApiError::validation("ids must not be empty"));
    }
    let (count, audit_action) = match action.as_str() {
        "approve" => (
            data.repo.bulk_approve_comments(&ids, &auth.0.id).await?,
            AuditAction::Approve,
        ),
        "delete" => (
            data.repo.bulk_delete_comments(&ids).await?,
            AuditAction::Delete,
        ),
        _ => return Err(ApiError::validation("unknown bulk action")),
    };
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        audit_action,
        AuditEntity::Comment,
        Some(joined_ids(&ids)),
        Details::new()
            .metadata(json!({ "count": count, "action": action }))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "affected": count })))
}

// ---------------------------------------------------------- categories

#[utoipa::path(
    get,
    path = "/api/categories",
    responses((status = 200, description = "Categories with post counts", body = [CategoryWithCount]))
)]
pub async fn list_categories(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.list_categories().await?))
}

#[utoipa::path(
    get,
    path = "/api/categories/{slug}",
    params(("slug" = String, Path, description = "Category slug")),
    responses((status = 200, description = "Category", body = Category))
)]
pub async fn get_category(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.get_category_by_slug(&path.into_inner()).await?))
}

#[utoipa::path(
    post,
    path = "/api/categories",
    request_body = NewCategory,
    responses(
        (status = 201, description = "Category created", body = Category),
        (status = 409, description = "Slug already in use")
    )
)]
pub async fn create_category(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewCategory>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let new = payload.into_inner();
    if new.name.trim().is_empty() || new.slug.trim().is_empty() {
        return Err(ApiError::validation("name and slug are required"));
    }
    let cat = data.repo.create_category(new).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Create,
        AuditEntity::Category,
        Some(cat.id.to_string()),
        Details::new()
            .after(&json!({ "name": cat.name, "slug": cat.slug }))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Created().json(cat))
}

#[utoipa::path(
    put,
    path = "/api/categories/{id}",
    params(("id" = Id, Path, description = "Category id")),
    request_body = UpdateCategory,
    responses((status = 200, description = "Category updated", body = Category))
)]
pub async fn update_category(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateCategory>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let id = path.into_inner();
    let before = data.repo.get_category(id).await?;
    let cat = data.repo.update_category(id, payload.into_inner()).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Update,
        AuditEntity::Category,
        Some(id.to_string()),
        Details::new()
            .before(&json!({ "name": before.name, "slug": before.slug }))
            .after(&json!({ "name": cat.name, "slug": cat.slug }))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(cat))
}

#[utoipa::path(
    delete,
    path = "/api/categories/{id}",
    params(("id" = Id, Path, description = "Category id")),
    responses((status = 200, description = "Category deleted"))
)]
pub async fn delete_category(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let id = path.into_inner();
    let cat = data.repo.delete_category(id).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Delete,
        AuditEntity::Category,
        Some(id.to_string()),
        Details::new()
            .before(&json!({ "name": cat.name, "slug": cat.slug }))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Category deleted" })))
}

// ---------------------------------------------------------------- tags

#[utoipa::path(
    get,
    path = "/api/tags",
    responses((status = 200, description = "Tags with usage counts", body = [TagWithCount]))
)]
pub async fn list_tags(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.list_tags().await?))
}

#[derive(Debug, Deserialize)]
pub struct TagSearchQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/api/tags/search",
    params(("q" = Option<String>, Query, description = "Name fragment")),
    responses((status = 200, description = "Matching tags", body = [Tag]))
)]
pub async fn search_tags(
    data: web::Data<AppState>,
    query: web::Query<TagSearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let q = query.q.clone().unwrap_or_default();
    if q.trim().is_empty() {
        return Ok(HttpResponse::Ok().json(Vec::<Tag>::new()));
    }
    let limit = query.limit.unwrap_or(10).clamp(1, MAX_PAGE_LIMIT);
    Ok(HttpResponse::Ok().json(data.repo.search_tags(q.trim(), limit).await?))
}

#[utoipa::path(
    get,
    path = "/api/tags/{slug}",
    params(("slug" = String, Path, description = "Tag slug")),
    responses((status = 200, description = "Tag", body = Tag))
)]
pub async fn get_tag(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(data.repo.get_tag_by_slug(&path.into_inner()).await?))
}

#[utoipa::path(
    post,
    path = "/api/tags",
    request_body = NewTag,
    responses(
        (status = 201, description = "Tag created", body = Tag),
        (status = 409, description = "Name or slug already in use")
    )
)]
pub async fn create_tag(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewTag>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let new = payload.into_inner();
    if new.name.trim().is_empty() || new.slug.trim().is_empty() {
        return Err(ApiError::validation("name and slug are required"));
    }
    let tag = data.repo.create_tag(new).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Create,
        AuditEntity::Tag,
        Some(tag.id.to_string()),
        Details::new()
            .after(&json!({ "name": tag.name, "slug": tag.slug }))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Created().json(tag))
}

#[utoipa::path(
    delete,
    path = "/api/tags/{id}",
    params(("id" = Id, Path, description = "Tag id")),
    responses((status = 200, description = "Tag deleted"))
)]
pub async fn delete_tag(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let id = path.into_inner();
    let tag = data.repo.delete_tag(id).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Delete,
        AuditEntity::Tag,
        Some(id.to_string()),
        Details::new()
            .before(&json!({ "name": tag.name, "slug": tag.slug }))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Tag deleted" })))
}

// ---------------------------------------------------------- newsletter

#[derive(Debug, Deserialize, ToSchema)]
pub struct NewsletterRequest {
    pub email: String,
}

#[utoipa::path(
    post,
    path = "/api/newsletter/subscribe",
    request_body = NewsletterRequest,
    responses(
        (status = 200, description = "Subscribed"),
        (status = 409, description = "Already subscribed")
    )
)]
pub async fn subscribe(
    data: web::Data<AppState>,
    payload: web::Json<NewsletterRequest>,
) -> Result<HttpResponse, ApiError> {
    let email = payload.email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::validation("a valid email address is required"));
    }
    let (sub, revived) = data.repo.subscribe(email).await?;
    let message = if revived {
        "Welcome back! Your subscription has been reactivated."
    } else {
        "Successfully subscribed!"
    };
    Ok(HttpResponse::Ok().json(json!({ "message": message, "subscriber": sub })))
}

#[utoipa::path(
    post,
    path = "/api/newsletter/unsubscribe",
    request_body = NewsletterRequest,
    responses(
        (status = 200, description = "Unsubscribed"),
        (status = 404, description = "Unknown email"),
        (status = 409, description = "Already unsubscribed")
    )
)]
pub async fn unsubscribe(
    data: web::Data<AppState>,
    payload: web::Json<NewsletterRequest>,
) -> Result<HttpResponse, ApiError> {
    let sub = data.repo.unsubscribe(payload.email.trim()).await?;
    Ok(HttpResponse::Ok()
        .json(json!({ "message": "Successfully unsubscribed.", "subscriber": sub })))
}

#[utoipa::path(
    get,
    path = "/api/newsletter/subscribers",
    responses((status = 200, description = "All subscribers", body = [Subscriber]))
)]
pub async fn list_subscribers(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    Ok(HttpResponse::Ok().json(data.repo.list_subscribers().await?))
}

#[utoipa::path(
    get,
    path = "/api/newsletter/stats",
    responses((status = 200, description = "Subscriber totals"))
)]
pub async fn subscriber_stats(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let (total, active) = data.repo.subscriber_counts().await?;
    Ok(HttpResponse::Ok().json(json!({ "total": total, "active": active })))
}

#[utoipa::path(
    delete,
    path = "/api/newsletter/subscribers/{id}",
    params(("id" = Id, Path, description = "Subscriber id")),
    responses((status = 200, description = "Subscriber removed"))
)]
pub async fn delete_subscriber(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let id = path.into_inner();
    let sub = data.repo.delete_subscriber(id).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Delete,
        AuditEntity::Subscriber,
        Some(id.to_string()),
        Details::new().before(&json!({ "email": sub.email })).build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Subscriber removed" })))
}

// ------------------------------------------------------------- uploads

enum FilePart {
    Data { name: String, bytes: Vec<u8> },
    TooLarge,
    Missing,
}

async fn read_file_part(payload: &mut Multipart, limit: usize) -> Result<FilePart, ApiError> {
    while let Some(field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        if field.content_disposition().get_name() != Some("file") {
            continue;
        }
        let name = field
            .content_disposition()
            .get_filename()
            .unwrap_or("file")
            .to_string();
        let mut field = field;
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > limit {
                return Ok(FilePart::TooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }
        return Ok(FilePart::Data { name, bytes });
    }
    Ok(FilePart::Missing)
}

/// Sniffed mime; svg is text so it never sniffs, fall back to a loose
/// content check when the filename says so.
fn detect_mime(name: &str, bytes: &[u8]) -> String {
    if let Some(t) = infer::get(bytes) {
        return t.mime_type().to_string();
    }
    if name.to_lowercase().ends_with(".svg") {
        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
        if head.contains("<svg") || head.trim_start().starts_with("<?xml") {
            return "image/svg+xml".to_string();
        }
    }
    "application/octet-stream".to_string()
}

#[utoipa::path(
    post,
    path = "/api/uploads",
    responses(
        (status = 201, description = "File stored", body = Upload),
        (status = 413, description = "Larger than 5 MiB"),
        (status = 415, description = "Not an allowed image type")
    )
)]
pub async fn create_upload(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let (original, bytes) = match read_file_part(&mut payload, UPLOAD_SIZE_LIMIT).await? {
        FilePart::Data { name, bytes } => (name, bytes),
        FilePart::TooLarge => {
            return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish())
        }
        FilePart::Missing => return Err(ApiError::validation("file field is required")),
    };
    let mime = detect_mime(&original, &bytes);
    if !UPLOAD_MIME.contains(&mime.as_str()) {
        return Ok(HttpResponse::UnsupportedMediaType().finish());
    }
    let filename = storage::unique_filename(&original);
    let rel = storage::dated_path(&filename);
    data.files.save(&rel, &bytes).await.map_err(|e| {
        log::error!("file store save error: {e}");
        ApiError::Internal
    })?;
    let upload = data
        .repo
        .create_upload(NewUpload {
            filename,
            original_name: original,
            mime_type: mime,
            size: bytes.len() as i64,
            url: format!("/files/{rel}"),
            uploaded_by: Some(auth.0.id.clone()),
        })
        .await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Create,
        AuditEntity::Upload,
        Some(upload.id.to_string()),
        Details::new()
            .after(&json!({
                "filename": upload.filename,
                "mimeType": upload.mime_type,
                "size": upload.size,
            }))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Created().json(upload))
}

#[utoipa::path(
    get,
    path = "/api/uploads",
    responses((status = 200, description = "Paginated uploads"))
)]
pub async fn list_uploads(
    auth: Auth,
    data: web::Data<AppState>,
    page: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let (p, limit) = page.normalize(50);
    Ok(HttpResponse::Ok().json(data.repo.list_uploads(p, limit).await?))
}

#[utoipa::path(
    delete,
    path = "/api/uploads/{id}",
    params(("id" = Id, Path, description = "Upload id")),
    responses((status = 200, description = "Upload deleted"))
)]
pub async fn delete_upload(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let id = path.into_inner();
    let upload = data.repo.delete_upload(id).await?;
    if let Some(rel) = upload.url.strip_prefix("/files/") {
        // row removal wins; a stranded file only wastes disk
        let _ = data.files.delete(rel).await;
    }
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Delete,
        AuditEntity::Upload,
        Some(id.to_string()),
        Details::new()
            .before(&json!({ "filename": upload.filename, "url": upload.url }))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "Upload deleted" })))
}

pub async fn serve_file(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    match data.files.load(&path.into_inner()).await {
        Ok((bytes, mime)) => Ok(HttpResponse::Ok()
            .insert_header(("Content-Type", mime))
            .body(bytes)),
        Err(FileStoreError::NotFound) | Err(FileStoreError::InvalidPath) => {
            Err(ApiError::NotFound)
        }
        Err(e) => {
            log::error!("file store load error: {e}");
            Err(ApiError::Internal)
        }
    }
}

// --------------------------------------------------------------- users

#[utoipa::path(
    get,
    path = "/api/users",
    responses((status = 200, description = "All users", body = [User]))
)]
pub async fn list_users(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    Ok(HttpResponse::Ok().json(data.repo.list_users().await?))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = String, Path, description = "User id")),
    responses((status = 200, description = "User", body = User))
)]
pub async fn get_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    Ok(HttpResponse::Ok().json(data.repo.get_user(&path.into_inner()).await?))
}

#[utoipa::path(
    post,
    path = "/api/users",
    request_body = NewUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn create_user(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewUser>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let new = payload.into_inner();
    if new.name.trim().is_empty() || !new.email.contains('@') {
        return Err(ApiError::validation("name and a valid email are required"));
    }
    let user = data.repo.create_user(new).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Create,
        AuditEntity::User,
        Some(user.id.clone()),
        Details::new()
            .after(&json!({ "name": user.name, "email": user.email, "role": user.role }))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Created().json(user))
}

#[utoipa::path(
    put,
    path = "/api/users/{id}",
    params(("id" = String, Path, description = "User id")),
    request_body = UpdateUser,
    responses((status = 200, description = "User updated", body = User))
)]
pub async fn update_user(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateUser>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let id = path.into_inner();
    let before = data.repo.get_user(&id).await?;
    let user = data.repo.update_user(&id, payload.into_inner()).await?;
    let action = if user.role != before.role {
        AuditAction::RoleChange
    } else {
        AuditAction::Update
    };
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        action,
        AuditEntity::User,
        Some(id),
        Details::new()
            .before(&json!({ "name": before.name, "email": before.email, "role": before.role }))
            .after(&json!({ "name": user.name, "email": user.email, "role": user.role }))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(user))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "User deleted"),
        (status = 400, description = "Attempted self-deletion")
    )
)]
pub async fn delete_user(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let id = path.into_inner();
    if id == auth.0.id {
        return Err(ApiError::validation("you cannot delete your own account"));
    }
    let user = data.repo.delete_user(&id).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Delete,
        AuditEntity::User,
        Some(id),
        Details::new()
            .before(&json!({ "name": user.name, "email": user.email, "role": user.role }))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(json!({ "message": "User deleted" })))
}

#[utoipa::path(
    put,
    path = "/api/users/{id}/avatar",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Avatar replaced", body = User),
        (status = 403, description = "Only the user themselves or an admin"),
        (status = 413, description = "Larger than 2 MiB"),
        (status = 415, description = "Not an image")
    )
)]
pub async fn set_avatar(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    auth.0.require_owner_or_role(Some(&id), &[Role::Admin])?;
    let user = data.repo.get_user(&id).await?;
    let (original, bytes) = match read_file_part(&mut payload, AVATAR_SIZE_LIMIT).await? {
        FilePart::Data { name, bytes } => (name, bytes),
        FilePart::TooLarge => {
            return Ok(HttpResponse::build(StatusCode::PAYLOAD_TOO_LARGE).finish())
        }
        FilePart::Missing => return Err(ApiError::validation("file field is required")),
    };
    let mime = detect_mime(&original, &bytes);
    if !AVATAR_MIME.contains(&mime.as_str()) {
        return Ok(HttpResponse::UnsupportedMediaType().finish());
    }
    let filename = storage::unique_filename(&original);
    let rel = format!("avatars/{filename}");
    data.files.save(&rel, &bytes).await.map_err(|e| {
        log::error!("file store save error: {e}");
        ApiError::Internal
    })?;
    if let Some(old) = user.image.as_deref().and_then(|u| u.strip_prefix("/files/")) {
        let _ = data.files.delete(old).await;
    }
    let updated = data
        .repo
        .set_user_image(&id, Some(format!("/files/{rel}")))
        .await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Update,
        AuditEntity::User,
        Some(id),
        Details::new()
            .metadata(json!({ "avatar": updated.image }))
            .build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(updated))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}/avatar",
    params(("id" = String, Path, description = "User id")),
    responses((status = 200, description = "Avatar removed", body = User))
)]
pub async fn delete_avatar(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    auth.0.require_owner_or_role(Some(&id), &[Role::Admin])?;
    let user = data.repo.get_user(&id).await?;
    if let Some(old) = user.image.as_deref().and_then(|u| u.strip_prefix("/files/")) {
        let _ = data.files.delete(old).await;
    }
    let updated = data.repo.set_user_image(&id, None).await?;
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Update,
        AuditEntity::User,
        Some(id),
        Details::new().metadata(json!({ "avatar": null })).build(),
        client_ip(&req),
    )
    .await;
    Ok(HttpResponse::Ok().json(updated))
}

// ------------------------------------------------------------ settings

#[utoipa::path(
    get,
    path = "/api/settings",
    responses((status = 200, description = "Grouped settings"))
)]
pub async fn get_settings(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let grouped = SettingsStore::new(data.repo.as_ref()).get_grouped().await?;
    Ok(HttpResponse::Ok().json(grouped))
}

#[utoipa::path(
    get,
    path = "/api/settings/public",
    responses((status = 200, description = "Public site settings"))
)]
pub async fn public_settings(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let view = SettingsStore::new(data.repo.as_ref()).public_view().await?;
    Ok(HttpResponse::Ok().json(view))
}

#[utoipa::path(
    put,
    path = "/api/settings",
    responses((status = 200, description = "Settings updated"))
)]
pub async fn update_settings(
    req: HttpRequest,
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<serde_json::Value>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let entries = settings::flatten(&payload);
    if entries.is_empty() {
        return Err(ApiError::validation("no settings provided"));
    }
    let store = SettingsStore::new(data.repo.as_ref());
    let mut before = BTreeMap::new();
    for key in entries.keys() {
        before.insert(key.clone(), store.get(key).await?);
    }
    store.update_many(&entries).await?;
    let changed: Vec<&String> = entries
        .iter()
        .filter(|(k, v)| before.get(*k) != Some(v))
        .map(|(k, _)| k)
        .collect();
    audit::record(
        data.repo.as_ref(),
        Some(&auth.0.id),
        AuditAction::Update,
        AuditEntity::Setting,
        None,
        Details::new()
            .before(&before)
            .after(&entries)
            .metadata(json!({ "changed": changed }))
            .build(),
        client_ip(&req),
    )
    .await;
    let grouped = store.get_grouped().await?;
    Ok(HttpResponse::Ok().json(grouped))
}

// ----------------------------------------------------------- audit log

#[utoipa::path(
    get,
    path = "/api/audit-logs",
    responses((status = 200, description = "Paginated audit entries"))
)]
pub async fn list_audit_logs(
    auth: Auth,
    data: web::Data<AppState>,
    page: web::Query<PageQuery>,
    filter: web::Query<AuditLogFilter>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let (p, limit) = page.normalize(20);
    Ok(HttpResponse::Ok().json(data.repo.list_audit_logs(&filter, p, limit).await?))
}

#[utoipa::path(
    get,
    path = "/api/audit-logs/stats",
    responses((status = 200, description = "Audit activity summary", body = AuditStats))
)]
pub async fn audit_stats(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    Ok(HttpResponse::Ok().json(data.repo.audit_stats().await?))
}

#[utoipa::path(
    get,
    path = "/api/audit-logs/{id}",
    params(("id" = String, Path, description = "Audit entry id")),
    responses((status = 200, description = "Audit entry", body = AuditLog))
)]
pub async fn get_audit_log(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    Ok(HttpResponse::Ok().json(data.repo.get_audit_log(&path.into_inner()).await?))
}

// ----------------------------------------------------------- dashboard

#[utoipa::path(
    get,
    path = "/api/dashboard/stats",
    responses((status = 200, description = "Site totals"))
)]
pub async fn dashboard_stats(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let posts = data.repo.post_counts_by_status().await?;
    let comments = data.repo.comment_counts_by_status().await?;
    let categories = data.repo.count_categories().await?;
    let views = data.repo.total_view_count().await?;
    let (total_subs, active_subs) = data.repo.subscriber_counts().await?;
    let post_total: i64 = posts.values().sum();
    Ok(HttpResponse::Ok().json(json!({
        "posts": {
            "total": post_total,
            "published": posts.get("published").copied().unwrap_or(0),
            "draft": posts.get("draft").copied().unwrap_or(0),
            "archived": posts.get("archived").copied().unwrap_or(0),
        },
        "comments": comments,
        "categories": categories,
        "views": views,
        "subscribers": { "total": total_subs, "active": active_subs },
    })))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/api/dashboard/recent-posts",
    responses((status = 200, description = "Latest posts", body = [Post]))
)]
pub async fn recent_posts(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let limit = query.limit.unwrap_or(5).clamp(1, MAX_PAGE_LIMIT);
    let page = data
        .repo
        .list_posts(&PostFilter::default(), 1, limit, OrderBy::Newest)
        .await?;
    Ok(HttpResponse::Ok().json(page.items))
}

#[utoipa::path(
    get,
    path = "/api/dashboard/recent-comments",
    responses((status = 200, description = "Latest comments", body = [Comment]))
)]
pub async fn recent_comments(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let limit = query.limit.unwrap_or(5).clamp(1, MAX_PAGE_LIMIT);
    let page = data
        .repo
        .list_comments(&CommentFilter::default(), 1, limit)
        .await?;
    Ok(HttpResponse::Ok().json(page.items))
}

#[utoipa::path(
    get,
    path = "/api/dashboard/popular-posts",
    responses((status = 200, description = "Most viewed published posts", body = [Post]))
)]
pub async fn popular_posts(
    auth: Auth,
    data: web::Data<AppState>,
    query: web::Query<LimitQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let limit = query.limit.unwrap_or(5).clamp(1, MAX_PAGE_LIMIT);
    let filter = PostFilter {
        status: Some(PostStatus::Published),
        ..Default::default()
    };
    let page = data
        .repo
        .list_posts(&filter, 1, limit, OrderBy::Popular)
        .await?;
    Ok(HttpResponse::Ok().json(page.items))
}

// -------------------------------------------------------------- search

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/search",
    params(("q" = Option<String>, Query, description = "Search term")),
    responses((status = 200, description = "Matching published posts"))
)]
pub async fn search(
    data: web::Data<AppState>,
    query: web::Query<SearchQuery>,
    page: web::Query<PageQuery>,
) -> Result<HttpResponse, ApiError> {
    let q = query.q.clone().unwrap_or_default();
    if q.trim().is_empty() {
        return Ok(HttpResponse::Ok().json(Page::<Post>::empty(1, 10)));
    }
    let filter = PostFilter {
        status: Some(PostStatus::Published),
        search: Some(q.trim().to_string()),
        ..Default::default()
    };
    let (p, limit) = page.normalize(10);
    let results = data.repo.list_posts(&filter, p, limit, page.order()).await?;
    Ok(HttpResponse::Ok().json(results))
}

// -------------------------------------------------------------- export

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub format: Option<String>,
}

fn csv_response(filename: &str, body: String) -> HttpResponse {
    HttpResponse::Ok()
        .insert_header(("Content-Type", "text/csv; charset=utf-8"))
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{filename}\""),
        ))
        .body(body)
}

#[utoipa::path(
    get,
    path = "/api/export/{kind}",
    params(
        ("kind" = String, Path, description = "posts, comments, users or audit-logs"),
        ("format" = Option<String>, Query, description = "json (default) or csv")
    ),
    responses(
        (status = 200, description = "Exported rows"),
        (status = 400, description = "Unknown table")
    )
)]
pub async fn export_table(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<ExportQuery>,
) -> Result<HttpResponse, ApiError> {
    auth.0.require_role(&[Role::Admin])?;
    let kind = path.into_inner();
    let csv = query.format.as_deref() == Some("csv");
    let repo = data.repo.as_ref();
    match kind.as_str() {
        "posts" => {
            let rows = export::post_rows(repo).await?;
            Ok(if csv {
                csv_response("posts-export.csv", export::to_csv(&rows))
            } else {
                HttpResponse::Ok().json(rows)
            })
        }
        "comments" => {
            let rows = export::comment_rows(repo).await?;
            Ok(if csv {
                csv_response("comments-export.csv", export::to_csv(&rows))
            } else {
                HttpResponse::Ok().json(rows)
            })
        }
        "users" => {
            let rows = export::user_rows(repo).await?;
            Ok(if csv {
                csv_response("users-export.csv", export::to_csv(&rows))
            } else {
                HttpResponse::Ok().json(rows)
            })
        }
        "audit-logs" => {
            let rows = export::audit_rows(repo).await?;
            Ok(if csv {
                csv_response("audit-logs-export.csv", export::to_csv(&rows))
            } else {
                HttpResponse::Ok().json(rows)
            })
        }
        _ => Err(ApiError::validation("unknown export table")),
    }
}
