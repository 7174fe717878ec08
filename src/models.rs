use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

pub type Id = i64;

/// Caller role carried on the session identity. Closed set; never a
/// free-form string lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    Admin,
    Blogger,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "post_status", rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "comment_status", rename_all = "lowercase")]
pub enum CommentStatus {
    Pending,
    Approved,
    Spam,
}

/// Closed action vocabulary of the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "audit_action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Login,
    Logout,
    Approve,
    Spam,
    Reject,
    Publish,
    Archive,
    Restore,
    Ban,
    Unban,
    RoleChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "audit_entity", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEntity {
    Post,
    Comment,
    User,
    Setting,
    Category,
    Tag,
    Upload,
    Subscriber,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::Approve => "APPROVE",
            AuditAction::Spam => "SPAM",
            AuditAction::Reject => "REJECT",
            AuditAction::Publish => "PUBLISH",
            AuditAction::Archive => "ARCHIVE",
            AuditAction::Restore => "RESTORE",
            AuditAction::Ban => "BAN",
            AuditAction::Unban => "UNBAN",
            AuditAction::RoleChange => "ROLE_CHANGE",
        }
    }
}

impl AuditEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEntity::Post => "POST",
            AuditEntity::Comment => "COMMENT",
            AuditEntity::User => "USER",
            AuditEntity::Setting => "SETTING",
            AuditEntity::Category => "CATEGORY",
            AuditEntity::Tag => "TAG",
            AuditEntity::Upload => "UPLOAD",
            AuditEntity::Subscriber => "SUBSCRIBER",
        }
    }
}

// ---------------------------------------------------------------- posts

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Post {
    pub id: Id,
    pub title: String,
    pub slug: String,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub featured_image: Option<String>,
    pub category_id: Option<Id>,
    pub author_id: Option<String>,
    pub status: PostStatus,
    pub view_count: i64,
    pub like_count: i64,
    pub featured: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPost {
    pub title: String,
    pub slug: String,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub featured_image: Option<String>,
    pub category_id: Option<Id>,
    pub status: Option<PostStatus>,
    pub featured: Option<bool>,
    pub tag_ids: Option<Vec<Id>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdatePost {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub featured_image: Option<String>,
    pub category_id: Option<Id>,
    pub status: Option<PostStatus>,
    pub featured: Option<bool>,
    pub tag_ids: Option<Vec<Id>>,
}

/// Post plus its joined tag set, as returned by single-post endpoints.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PostWithTags {
    #[serde(flatten)]
    pub post: Post,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostFilter {
    pub status: Option<PostStatus>,
    pub category_id: Option<Id>,
    pub search: Option<String>,
    pub featured: Option<bool>,
    pub author_id: Option<String>,
}

// ------------------------------------------------------------ taxonomy

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Category {
    pub id: Id,
    pub name: String,
    pub slug: String,
    pub icon: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCategory {
    pub name: String,
    pub slug: String,
    pub icon: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateCategory {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub icon: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema, sqlx::FromRow)]
pub struct CategoryWithCount {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub category: Category,
    pub post_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Tag {
    pub id: Id,
    pub name: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewTag {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, ToSchema, sqlx::FromRow)]
pub struct TagWithCount {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub tag: Tag,
    pub post_count: i64,
}

// ------------------------------------------------------------ comments

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Comment {
    pub id: Id,
    pub post_id: Id,
    pub parent_id: Option<Id>,
    pub name: String,
    pub email: Option<String>,
    pub content: String,
    pub image: Option<String>,
    pub status: CommentStatus,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub approved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Repo-level insert payload; status is decided by the moderation workflow
/// before this is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewComment {
    pub post_id: Id,
    pub parent_id: Option<Id>,
    pub name: String,
    pub email: Option<String>,
    pub content: String,
    pub image: Option<String>,
    pub status: CommentStatus,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Public reply-tree node. Only fields safe for anonymous readers.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CommentNode {
    pub id: Id,
    pub parent_id: Option<Id>,
    pub name: String,
    pub content: String,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub replies: Vec<CommentNode>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentFilter {
    pub status: Option<CommentStatus>,
    pub post_id: Option<Id>,
}

// --------------------------------------------------------------- users

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub email_verified: bool,
    pub image: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
}

// --------------------------------------------------------- subscribers

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Subscriber {
    pub id: Id,
    pub email: String,
    pub is_active: bool,
    pub subscribed_at: DateTime<Utc>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
}

// ------------------------------------------------------------- uploads

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Upload {
    pub id: Id,
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub url: String,
    pub uploaded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUpload {
    pub filename: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: i64,
    pub url: String,
    pub uploaded_by: Option<String>,
}

// ------------------------------------------------------------ settings

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

// ----------------------------------------------------------- audit log

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct AuditLog {
    pub id: String,
    pub actor_id: Option<String>,
    pub action: AuditAction,
    pub entity: AuditEntity,
    pub entity_id: Option<String>,
    #[schema(value_type = Object)]
    pub details: Option<Value>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub actor_id: Option<String>,
    pub action: AuditAction,
    pub entity: AuditEntity,
    pub entity_id: Option<String>,
    pub details: Option<Value>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditLogFilter {
    pub actor_id: Option<String>,
    pub action: Option<AuditAction>,
    pub entity: Option<AuditEntity>,
    pub entity_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditStats {
    pub by_action: std::collections::HashMap<String, i64>,
    pub by_entity: std::collections::HashMap<String, i64>,
    pub recent_count: i64,
}

// ---------------------------------------------------------- pagination

pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OrderBy {
    Newest,
    Oldest,
    Popular,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub order_by: Option<OrderBy>,
}

impl PageQuery {
    /// Clamp to `page >= 1`, `0 < limit <= 100`, falling back to the
    /// entity's default page size.
    pub fn normalize(&self, default_limit: i64) -> (i64, i64) {
        let page = self.page.filter(|p| *p >= 1).unwrap_or(1);
        let limit = self
            .limit
            .filter(|l| *l > 0)
            .unwrap_or(default_limit)
            .min(MAX_PAGE_LIMIT);
        (page, limit)
    }

    pub fn order(&self) -> OrderBy {
        self.order_by.unwrap_or(OrderBy::Newest)
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PageInfo {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub total_pages: i64,
}

impl PageInfo {
    pub fn new(page: i64, limit: i64, total: i64) -> Self {
        let total_pages = if total == 0 { 0 } else { (total + limit - 1) / limit };
        Self { page, limit, total, total_pages }
    }
}

/// List-endpoint envelope: `{ items, pagination }`.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub pagination: PageInfo,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: i64, limit: i64, total: i64) -> Self {
        Self { items, pagination: PageInfo::new(page, limit, total) }
    }

    pub fn empty(page: i64, limit: i64) -> Self {
        Self::new(Vec::new(), page, limit, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(PageInfo::new(1, 20, 45).total_pages, 3);
        assert_eq!(PageInfo::new(1, 10, 10).total_pages, 1);
        assert_eq!(PageInfo::new(1, 10, 11).total_pages, 2);
    }

    #[test]
    fn empty_result_has_zero_pages() {
        let p: Page<Post> = Page::empty(1, 20);
        assert!(p.items.is_empty());
        assert_eq!(p.pagination.total_pages, 0);
    }

    #[test]
    fn page_query_clamps_limit() {
        let q = PageQuery { page: Some(0), limit: Some(500), order_by: None };
        assert_eq!(q.normalize(10), (1, 100));
        let q = PageQuery::default();
        assert_eq!(q.normalize(20), (1, 20));
    }

    #[test]
    fn audit_action_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&AuditAction::RoleChange).unwrap(),
            "\"ROLE_CHANGE\""
        );
        assert_eq!(serde_json::to_string(&AuditEntity::Post).unwrap(), "\"POST\"");
    }
}
