use utoipa::OpenApi;

use crate::export::{AuditRow, CommentRow, PostRow, UserRow};
use crate::models::{
    AuditAction, AuditEntity, AuditLog, AuditStats, Category, CategoryWithCount, Comment,
    CommentNode, CommentStatus, NewCategory, NewPost, NewTag, NewUser, PageInfo, Post,
    PostStatus, PostWithTags, Role, Setting, Subscriber, Tag, TagWithCount, UpdateCategory,
    UpdatePost, UpdateUser, Upload, User,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::list_posts,
        crate::routes::get_post_by_id,
        crate::routes::get_post_by_slug,
        crate::routes::create_post,
        crate::routes::update_post,
        crate::routes::delete_post,
        crate::routes::bulk_posts,
        crate::routes::record_view,
        crate::routes::like_post,
        crate::routes::unlike_post,
        crate::routes::post_comment_tree,
        crate::routes::submit_comment,
        crate::routes::approve_own_post_comment,
        crate::routes::list_comments,
        crate::routes::comment_counts,
        crate::routes::approve_comment,
        crate::routes::spam_comment,
        crate::routes::delete_comment,
        crate::routes::bulk_comments,
        crate::routes::list_categories,
        crate::routes::get_category,
        crate::routes::create_category,
        crate::routes::update_category,
        crate::routes::delete_category,
        crate::routes::list_tags,
        crate::routes::search_tags,
        crate::routes::get_tag,
        crate::routes::create_tag,
        crate::routes::delete_tag,
        crate::routes::subscribe,
        crate::routes::unsubscribe,
        crate::routes::list_subscribers,
        crate::routes::subscriber_stats,
        crate::routes::delete_subscriber,
        crate::routes::create_upload,
        crate::routes::list_uploads,
        crate::routes::delete_upload,
        crate::routes::list_users,
        crate::routes::get_user,
        crate::routes::create_user,
        crate::routes::update_user,
        crate::routes::delete_user,
        crate::routes::set_avatar,
        crate::routes::delete_avatar,
        crate::routes::get_settings,
        crate::routes::public_settings,
        crate::routes::update_settings,
        crate::routes::list_audit_logs,
        crate::routes::audit_stats,
        crate::routes::get_audit_log,
        crate::routes::dashboard_stats,
        crate::routes::recent_posts,
        crate::routes::recent_comments,
        crate::routes::popular_posts,
        crate::routes::search,
        crate::routes::export_table,
    ),
    components(schemas(
        Post, NewPost, UpdatePost, PostWithTags, PostStatus,
        Category, NewCategory, UpdateCategory, CategoryWithCount,
        Tag, NewTag, TagWithCount,
        Comment, CommentNode, CommentStatus,
        User, NewUser, UpdateUser, Role,
        Subscriber, Upload, Setting,
        AuditLog, AuditStats, AuditAction, AuditEntity,
        PageInfo,
        PostRow, CommentRow, UserRow, AuditRow,
        crate::moderation::CommentSubmission,
        crate::routes::BulkPostsRequest,
        crate::routes::BulkCommentsRequest,
        crate::routes::NewsletterRequest,
    )),
    tags(
        (name = "posts", description = "Post management and public reads"),
        (name = "comments", description = "Comment submission and moderation"),
        (name = "taxonomy", description = "Categories and tags"),
        (name = "admin", description = "Users, settings, uploads, audit log"),
    )
)]
pub struct ApiDoc;
