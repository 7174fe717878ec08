use std::collections::HashMap;

use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{Id, PostFilter};
use crate::repo::{Repo, RepoResult};

// Large enough for a full-table export in one page.
const EXPORT_LIMIT: i64 = 1_000_000;

/// One exportable table. Each row type carries its CSV header row and
/// knows how to render itself as flat strings.
pub trait CsvRow {
    fn headers() -> &'static [&'static str];
    fn fields(&self) -> Vec<String>;
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PostRow {
    pub id: Id,
    pub title: String,
    pub slug: String,
    pub status: String,
    pub category: Option<String>,
    pub author: Option<String>,
    pub view_count: i64,
    pub like_count: i64,
    pub featured: bool,
    pub published_at: Option<String>,
    pub created_at: String,
}

impl CsvRow for PostRow {
    fn headers() -> &'static [&'static str] {
        &[
            "id", "title", "slug", "status", "category", "author", "viewCount",
            "likeCount", "featured", "publishedAt", "createdAt",
        ]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.title.clone(),
            self.slug.clone(),
            self.status.clone(),
            self.category.clone().unwrap_or_default(),
            self.author.clone().unwrap_or_default(),
            self.view_count.to_string(),
            self.like_count.to_string(),
            self.featured.to_string(),
            self.published_at.clone().unwrap_or_default(),
            self.created_at.clone(),
        ]
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CommentRow {
    pub id: Id,
    pub post_id: Id,
    pub post_title: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub content: String,
    pub status: String,
    pub created_at: String,
}

impl CsvRow for CommentRow {
    fn headers() -> &'static [&'static str] {
        &["id", "postId", "postTitle", "name", "email", "content", "status", "createdAt"]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.id.to_string(),
            self.post_id.to_string(),
            self.post_title.clone().unwrap_or_default(),
            self.name.clone(),
            self.email.clone().unwrap_or_default(),
            self.content.clone(),
            self.status.clone(),
            self.created_at.clone(),
        ]
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub email_verified: bool,
    pub created_at: String,
}

impl CsvRow for UserRow {
    fn headers() -> &'static [&'static str] {
        &["id", "name", "email", "role", "emailVerified", "createdAt"]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.name.clone(),
            self.email.clone(),
            self.role.clone(),
            self.email_verified.to_string(),
            self.created_at.clone(),
        ]
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuditRow {
    pub id: String,
    pub actor: Option<String>,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<String>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: String,
}

impl CsvRow for AuditRow {
    fn headers() -> &'static [&'static str] {
        &["id", "actor", "action", "entity", "entityId", "details", "ipAddress", "createdAt"]
    }

    fn fields(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.actor.clone().unwrap_or_default(),
            self.action.clone(),
            self.entity.clone(),
            self.entity_id.clone().unwrap_or_default(),
            self.details.clone().unwrap_or_default(),
            self.ip_address.clone().unwrap_or_default(),
            self.created_at.clone(),
        ]
    }
}

fn enum_text<T: Serialize>(v: &T) -> String {
    serde_json::to_value(v)
        .ok()
        .and_then(|x| x.as_str().map(str::to_string))
        .unwrap_or_default()
}

pub async fn post_rows(repo: &dyn Repo) -> RepoResult<Vec<PostRow>> {
    let posts = repo
        .list_posts(&PostFilter::default(), 1, EXPORT_LIMIT, crate::models::OrderBy::Newest)
        .await?
        .items;
    let categories: HashMap<Id, String> = repo
        .list_categories()
        .await?
        .into_iter()
        .map(|c| (c.category.id, c.category.name))
        .collect();
    let users: HashMap<String, String> = repo
        .list_users()
        .await?
        .into_iter()
        .map(|u| (u.id, u.name))
        .collect();
    Ok(posts
        .into_iter()
        .map(|p| PostRow {
            id: p.id,
            title: p.title,
            slug: p.slug,
            status: enum_text(&p.status),
            category: p.category_id.and_then(|c| categories.get(&c).cloned()),
            author: p.author_id.and_then(|a| users.get(&a).cloned()),
            view_count: p.view_count,
            like_count: p.like_count,
            featured: p.featured,
            published_at: p.published_at.map(|d| d.to_rfc3339()),
            created_at: p.created_at.to_rfc3339(),
        })
        .collect())
}

pub async fn comment_rows(repo: &dyn Repo) -> RepoResult<Vec<CommentRow>> {
    let comments = repo
        .list_comments(&crate::models::CommentFilter::default(), 1, EXPORT_LIMIT)
        .await?
        .items;
    let posts: HashMap<Id, String> = repo
        .list_posts(&PostFilter::default(), 1, EXPORT_LIMIT, crate::models::OrderBy::Newest)
        .await?
        .items
        .into_iter()
        .map(|p| (p.id, p.title))
        .collect();
    Ok(comments
        .into_iter()
        .map(|c| CommentRow {
            id: c.id,
            post_id: c.post_id,
            post_title: posts.get(&c.post_id).cloned(),
            name: c.name,
            email: c.email,
            content: c.content,
            status: enum_text(&c.status),
            created_at: c.created_at.to_rfc3339(),
        })
        .collect())
}

pub async fn user_rows(repo: &dyn Repo) -> RepoResult<Vec<UserRow>> {
    Ok(repo
        .list_users()
        .await?
        .into_iter()
        .map(|u| UserRow {
            id: u.id,
            name: u.name,
            email: u.email,
            role: enum_text(&u.role),
            email_verified: u.email_verified,
            created_at: u.created_at.to_rfc3339(),
        })
        .collect())
}

pub async fn audit_rows(repo: &dyn Repo) -> RepoResult<Vec<AuditRow>> {
    let logs = repo
        .list_audit_logs(&crate::models::AuditLogFilter::default(), 1, EXPORT_LIMIT)
        .await?
        .items;
    let users: HashMap<String, String> = repo
        .list_users()
        .await?
        .into_iter()
        .map(|u| (u.id, u.name))
        .collect();
    Ok(logs
        .into_iter()
        .map(|l| AuditRow {
            id: l.id,
            actor: l.actor_id.and_then(|a| users.get(&a).cloned()),
            action: l.action.as_str().to_string(),
            entity: l.entity.as_str().to_string(),
            entity_id: l.entity_id,
            details: l.details.map(|d| d.to_string()),
            ip_address: l.ip_address,
            created_at: l.created_at.to_rfc3339(),
        })
        .collect())
}

/// Quotes a field when it contains a comma, quote or newline; embedded
/// quotes are doubled.
fn escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn to_csv<R: CsvRow>(rows: &[R]) -> String {
    let mut out = String::new();
    out.push_str(&R::headers().join(","));
    out.push('\n');
    for row in rows {
        let line: Vec<String> = row.fields().iter().map(|f| escape(f)).collect();
        out.push_str(&line.join(","));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe(Vec<String>);

    impl CsvRow for Probe {
        fn headers() -> &'static [&'static str] {
            &["a", "b", "c"]
        }
        fn fields(&self) -> Vec<String> {
            self.0.clone()
        }
    }

    #[test]
    fn commas_quotes_and_newlines_are_quoted() {
        let csv = to_csv(&[Probe(vec![
            "plain".into(),
            "has, comma".into(),
            "say \"hi\"\nbye".into(),
        ])]);
        let mut lines = csv.split_inclusive('\n');
        assert_eq!(lines.next().unwrap(), "a,b,c\n");
        assert_eq!(
            csv,
            "a,b,c\nplain,\"has, comma\",\"say \"\"hi\"\"\nbye\"\n"
        );
    }

    #[test]
    fn empty_fields_stay_empty() {
        let csv = to_csv(&[Probe(vec!["".into(), "x".into(), "".into()])]);
        assert!(csv.ends_with("\n,x,\n"));
    }
}
