use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{Duration, Utc};

use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("invalid reference")]
    Referential,
    #[error("internal: {0}")]
    Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

/// Lower-case + trim; all subscriber emails are stored normalized.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn list_posts(
        &self,
        filter: &PostFilter,
        page: i64,
        limit: i64,
        order: OrderBy,
    ) -> RepoResult<Page<Post>>;
    async fn get_post(&self, id: Id) -> RepoResult<Post>;
    async fn get_post_by_slug(&self, slug: &str) -> RepoResult<Post>;
    async fn create_post(&self, author_id: &str, new: NewPost) -> RepoResult<Post>;
    async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post>;
    async fn delete_post(&self, id: Id) -> RepoResult<Post>;
    async fn bulk_update_post_status(&self, ids: &[Id], status: PostStatus) -> RepoResult<u64>;
    async fn bulk_delete_posts(&self, ids: &[Id]) -> RepoResult<u64>;
    async fn increment_view_count(&self, id: Id) -> RepoResult<()>;
    async fn increment_like_count(&self, id: Id) -> RepoResult<()>;
    /// Floors at zero; a post can never have a negative like count.
    async fn decrement_like_count(&self, id: Id) -> RepoResult<()>;
    async fn post_counts_by_status(&self) -> RepoResult<HashMap<String, i64>>;
    async fn total_view_count(&self) -> RepoResult<i64>;
    /// Replaces the whole tag set of a post.
    async fn set_post_tags(&self, id: Id, tag_ids: &[Id]) -> RepoResult<()>;
    async fn tags_for_post(&self, id: Id) -> RepoResult<Vec<Tag>>;
}

#[async_trait]
pub trait CategoryRepo: Send + Sync {
    async fn list_categories(&self) -> RepoResult<Vec<CategoryWithCount>>;
    async fn get_category(&self, id: Id) -> RepoResult<Category>;
    async fn get_category_by_slug(&self, slug: &str) -> RepoResult<Category>;
    async fn create_category(&self, new: NewCategory) -> RepoResult<Category>;
    async fn update_category(&self, id: Id, upd: UpdateCategory) -> RepoResult<Category>;
    /// Referencing posts keep existing but lose their category (set-null).
    async fn delete_category(&self, id: Id) -> RepoResult<Category>;
    async fn count_categories(&self) -> RepoResult<i64>;
}

#[async_trait]
pub trait TagRepo: Send + Sync {
    async fn list_tags(&self) -> RepoResult<Vec<TagWithCount>>;
    async fn search_tags(&self, query: &str, limit: i64) -> RepoResult<Vec<Tag>>;
    async fn get_tag_by_slug(&self, slug: &str) -> RepoResult<Tag>;
    async fn create_tag(&self, new: NewTag) -> RepoResult<Tag>;
    async fn delete_tag(&self, id: Id) -> RepoResult<Tag>;
}

#[async_trait]
pub trait CommentRepo: Send + Sync {
    async fn list_comments(
        &self,
        filter: &CommentFilter,
        page: i64,
        limit: i64,
    ) -> RepoResult<Page<Comment>>;
    async fn get_comment(&self, id: Id) -> RepoResult<Comment>;
    async fn create_comment(&self, new: NewComment) -> RepoResult<Comment>;
    async fn approve_comment(&self, id: Id, approved_by: &str) -> RepoResult<Comment>;
    async fn spam_comment(&self, id: Id) -> RepoResult<Comment>;
    async fn delete_comment(&self, id: Id) -> RepoResult<Comment>;
    async fn bulk_approve_comments(&self, ids: &[Id], approved_by: &str) -> RepoResult<u64>;
    async fn bulk_delete_comments(&self, ids: &[Id]) -> RepoResult<u64>;
    async fn comment_counts_by_status(&self) -> RepoResult<HashMap<String, i64>>;
    /// Approved comments of one post, newest first. Pending/spam never leak.
    async fn approved_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>>;

    /// Public reply tree for a post. Replies whose parent is missing from
    /// the approved set are promoted to roots; that is the intended
    /// fallback, not an error.
    async fn approved_comment_tree(&self, post_id: Id) -> RepoResult<Vec<CommentNode>> {
        Ok(crate::moderation::build_reply_tree(
            self.approved_comments(post_id).await?,
        ))
    }
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn list_users(&self) -> RepoResult<Vec<User>>;
    async fn get_user(&self, id: &str) -> RepoResult<User>;
    async fn create_user(&self, new: NewUser) -> RepoResult<User>;
    async fn update_user(&self, id: &str, upd: UpdateUser) -> RepoResult<User>;
    /// References from posts, uploads, comments and audit rows are nulled,
    /// mirroring the FK set-null actions of the schema.
    async fn delete_user(&self, id: &str) -> RepoResult<User>;
    async fn set_user_image(&self, id: &str, image: Option<String>) -> RepoResult<User>;
}

#[async_trait]
pub trait SubscriberRepo: Send + Sync {
    async fn list_subscribers(&self) -> RepoResult<Vec<Subscriber>>;
    /// Returns the row plus whether an inactive subscription was revived.
    /// An already-active email is a Conflict.
    async fn subscribe(&self, email: &str) -> RepoResult<(Subscriber, bool)>;
    async fn unsubscribe(&self, email: &str) -> RepoResult<Subscriber>;
    async fn subscriber_counts(&self) -> RepoResult<(i64, i64)>;
    async fn delete_subscriber(&self, id: Id) -> RepoResult<Subscriber>;
}

#[async_trait]
pub trait UploadRepo: Send + Sync {
    async fn list_uploads(&self, page: i64, limit: i64) -> RepoResult<Page<Upload>>;
    async fn get_upload(&self, id: Id) -> RepoResult<Upload>;
    async fn create_upload(&self, new: NewUpload) -> RepoResult<Upload>;
    async fn delete_upload(&self, id: Id) -> RepoResult<Upload>;
}

#[async_trait]
pub trait SettingRepo: Send + Sync {
    async fn all_settings(&self) -> RepoResult<Vec<Setting>>;
    async fn get_setting(&self, key: &str) -> RepoResult<Option<Setting>>;
    async fn upsert_setting(&self, key: &str, value: &str) -> RepoResult<()>;
    async fn delete_setting(&self, key: &str) -> RepoResult<()>;
}

#[async_trait]
pub trait AuditLogRepo: Send + Sync {
    /// Append-only; no update or delete exists anywhere in this crate.
    async fn insert_audit_log(&self, new: NewAuditLog) -> RepoResult<AuditLog>;
    async fn list_audit_logs(
        &self,
        filter: &AuditLogFilter,
        page: i64,
        limit: i64,
    ) -> RepoResult<Page<AuditLog>>;
    async fn get_audit_log(&self, id: &str) -> RepoResult<AuditLog>;
    async fn audit_stats(&self) -> RepoResult<AuditStats>;
}

pub trait Repo:
    PostRepo
    + CategoryRepo
    + TagRepo
    + CommentRepo
    + UserRepo
    + SubscriberRepo
    + UploadRepo
    + SettingRepo
    + AuditLogRepo
{
}

impl<T> Repo for T where
    T: PostRepo
        + CategoryRepo
        + TagRepo
        + CommentRepo
        + UserRepo
        + SubscriberRepo
        + UploadRepo
        + SettingRepo
        + AuditLogRepo
{
}

fn page_slice<T: Clone>(items: Vec<T>, page: i64, limit: i64) -> Page<T> {
    let total = items.len() as i64;
    let offset = ((page - 1) * limit) as usize;
    let sliced: Vec<T> = items.into_iter().skip(offset).take(limit as usize).collect();
    Page::new(sliced, page, limit, total)
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::path::{Path, PathBuf};

    const SNAPSHOT_PATH: &str = "data/state.json";

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        posts: HashMap<Id, Post>,
        post_tags: Vec<(Id, Id)>, // (post_id, tag_id)
        categories: HashMap<Id, Category>,
        tags: HashMap<Id, Tag>,
        comments: HashMap<Id, Comment>,
        users: HashMap<String, User>,
        subscribers: HashMap<Id, Subscriber>,
        uploads: HashMap<Id, Upload>,
        settings: HashMap<String, Setting>,
        audit_logs: Vec<AuditLog>,
        next_id: Id,
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn snapshot_path() -> PathBuf {
            match std::env::var("QUILL_DATA_DIR") {
                Ok(dir) => {
                    let mut p = PathBuf::from(dir);
                    p.push("state.json");
                    p
                }
                Err(_) => PathBuf::from(SNAPSHOT_PATH),
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        log::info!("inmem: loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        log::warn!(
                            "inmem: failed to parse snapshot '{}': {e}; starting empty",
                            path.display()
                        );
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    log::warn!("inmem: failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }

        fn next_id(state: &mut State) -> Id {
            state.next_id += 1;
            state.next_id
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    fn matches_search(haystacks: &[Option<&str>], needle: &str) -> bool {
        let needle = needle.to_lowercase();
        haystacks
            .iter()
            .flatten()
            .any(|h| h.to_lowercase().contains(&needle))
    }

    fn sort_posts(v: &mut [Post], order: OrderBy) {
        match order {
            OrderBy::Newest => {
                v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)))
            }
            OrderBy::Oldest => {
                v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
            }
            OrderBy::Popular => {
                v.sort_by(|a, b| b.view_count.cmp(&a.view_count).then(b.id.cmp(&a.id)))
            }
        }
    }

    #[async_trait]
    impl PostRepo for InMemRepo {
        async fn list_posts(
            &self,
            filter: &PostFilter,
            page: i64,
            limit: i64,
            order: OrderBy,
        ) -> RepoResult<Page<Post>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Post> = s
                .posts
                .values()
                .filter(|p| filter.status.map_or(true, |st| p.status == st))
                .filter(|p| filter.category_id.map_or(true, |c| p.category_id == Some(c)))
                .filter(|p| filter.featured.map_or(true, |f| p.featured == f))
                .filter(|p| {
                    filter
                        .author_id
                        .as_deref()
                        .map_or(true, |a| p.author_id.as_deref() == Some(a))
                })
                .filter(|p| {
                    filter.search.as_deref().map_or(true, |q| {
                        matches_search(&[Some(p.title.as_str()), p.excerpt.as_deref()], q)
                    })
                })
                .cloned()
                .collect();
            sort_posts(&mut v, order);
            Ok(page_slice(v, page, limit))
        }

        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            let s = self.state.read().unwrap();
            s.posts.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn get_post_by_slug(&self, slug: &str) -> RepoResult<Post> {
            let s = self.state.read().unwrap();
            s.posts
                .values()
                .find(|p| p.slug == slug)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn create_post(&self, author_id: &str, new: NewPost) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            if s.posts.values().any(|p| p.slug == new.slug) {
                return Err(RepoError::Conflict);
            }
            if let Some(cid) = new.category_id {
                if !s.categories.contains_key(&cid) {
                    return Err(RepoError::Referential);
                }
            }
            if let Some(ref tag_ids) = new.tag_ids {
                if tag_ids.iter().any(|t| !s.tags.contains_key(t)) {
                    return Err(RepoError::Referential);
                }
            }
            let now = Utc::now();
            let status = new.status.unwrap_or(PostStatus::Draft);
            let id = Self::next_id(&mut s);
            let post = Post {
                id,
                title: new.title,
                slug: new.slug,
                content: new.content,
                excerpt: new.excerpt,
                featured_image: new.featured_image,
                category_id: new.category_id,
                author_id: Some(author_id.to_string()),
                status,
                view_count: 0,
                like_count: 0,
                featured: new.featured.unwrap_or(false),
                published_at: (status == PostStatus::Published).then_some(now),
                created_at: now,
                updated_at: now,
            };
            s.posts.insert(id, post.clone());
            if let Some(tag_ids) = new.tag_ids {
                for tid in tag_ids {
                    s.post_tags.push((id, tid));
                }
            }
            drop(s);
            self.persist();
            Ok(post)
        }

        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            if let Some(ref slug) = upd.slug {
                if s.posts.values().any(|p| p.slug == *slug && p.id != id) {
                    return Err(RepoError::Conflict);
                }
            }
            if let Some(cid) = upd.category_id {
                if !s.categories.contains_key(&cid) {
                    return Err(RepoError::Referential);
                }
            }
            if let Some(ref tag_ids) = upd.tag_ids {
                if tag_ids.iter().any(|t| !s.tags.contains_key(t)) {
                    return Err(RepoError::Referential);
                }
            }
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(title) = upd.title {
                post.title = title;
            }
            if let Some(slug) = upd.slug {
                post.slug = slug;
            }
            if let Some(content) = upd.content {
                post.content = Some(content);
            }
            if let Some(excerpt) = upd.excerpt {
                post.excerpt = Some(excerpt);
            }
            if let Some(img) = upd.featured_image {
                post.featured_image = Some(img);
            }
            if let Some(cid) = upd.category_id {
                post.category_id = Some(cid);
            }
            if let Some(featured) = upd.featured {
                post.featured = featured;
            }
            if let Some(status) = upd.status {
                // published_at is assigned exactly once, on the first
                // transition into published; later status moves leave it.
                if status == PostStatus::Published && post.published_at.is_none() {
                    post.published_at = Some(Utc::now());
                }
                post.status = status;
            }
            post.updated_at = Utc::now();
            let updated = post.clone();
            if let Some(tag_ids) = upd.tag_ids {
                s.post_tags.retain(|(pid, _)| *pid != id);
                for tid in tag_ids {
                    s.post_tags.push((id, tid));
                }
            }
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_post(&self, id: Id) -> RepoResult<Post> {
            let mut s = self.state.write().unwrap();
            let post = s.posts.remove(&id).ok_or(RepoError::NotFound)?;
            // comments cascade with their post
            s.comments.retain(|_, c| c.post_id != id);
            s.post_tags.retain(|(pid, _)| *pid != id);
            drop(s);
            self.persist();
            Ok(post)
        }

        async fn bulk_update_post_status(
            &self,
            ids: &[Id],
            status: PostStatus,
        ) -> RepoResult<u64> {
            let mut s = self.state.write().unwrap();
            let now = Utc::now();
            let mut n = 0u64;
            for id in ids {
                if let Some(post) = s.posts.get_mut(id) {
                    if status == PostStatus::Published && post.published_at.is_none() {
                        post.published_at = Some(now);
                    }
                    post.status = status;
                    post.updated_at = now;
                    n += 1;
                }
            }
            drop(s);
            self.persist();
            Ok(n)
        }

        async fn bulk_delete_posts(&self, ids: &[Id]) -> RepoResult<u64> {
            let mut s = self.state.write().unwrap();
            let mut n = 0u64;
            for id in ids {
                if s.posts.remove(id).is_some() {
                    s.comments.retain(|_, c| c.post_id != *id);
                    s.post_tags.retain(|(pid, _)| pid != id);
                    n += 1;
                }
            }
            drop(s);
            self.persist();
            Ok(n)
        }

        async fn increment_view_count(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            post.view_count += 1;
            drop(s);
            self.persist();
            Ok(())
        }

        async fn increment_like_count(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            post.like_count += 1;
            drop(s);
            self.persist();
            Ok(())
        }

        async fn decrement_like_count(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let post = s.posts.get_mut(&id).ok_or(RepoError::NotFound)?;
            post.like_count = (post.like_count - 1).max(0);
            drop(s);
            self.persist();
            Ok(())
        }

        async fn post_counts_by_status(&self) -> RepoResult<HashMap<String, i64>> {
            let s = self.state.read().unwrap();
            let mut counts = HashMap::new();
            for p in s.posts.values() {
                let key = match p.status {
                    PostStatus::Draft => "draft",
                    PostStatus::Published => "published",
                    PostStatus::Archived => "archived",
                };
                *counts.entry(key.to_string()).or_insert(0) += 1;
            }
            Ok(counts)
        }

        async fn total_view_count(&self) -> RepoResult<i64> {
            let s = self.state.read().unwrap();
            Ok(s.posts.values().map(|p| p.view_count).sum())
        }

        async fn set_post_tags(&self, id: Id, tag_ids: &[Id]) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&id) {
                return Err(RepoError::NotFound);
            }
            if tag_ids.iter().any(|t| !s.tags.contains_key(t)) {
                return Err(RepoError::Referential);
            }
            s.post_tags.retain(|(pid, _)| *pid != id);
            for tid in tag_ids {
                s.post_tags.push((id, *tid));
            }
            drop(s);
            self.persist();
            Ok(())
        }

        async fn tags_for_post(&self, id: Id) -> RepoResult<Vec<Tag>> {
            let s = self.state.read().unwrap();
            let mut tags: Vec<Tag> = s
                .post_tags
                .iter()
                .filter(|(pid, _)| *pid == id)
                .filter_map(|(_, tid)| s.tags.get(tid).cloned())
                .collect();
            tags.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(tags)
        }
    }

    #[async_trait]
    impl CategoryRepo for InMemRepo {
        async fn list_categories(&self) -> RepoResult<Vec<CategoryWithCount>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<CategoryWithCount> = s
                .categories
                .values()
                .map(|c| CategoryWithCount {
                    category: c.clone(),
                    post_count: s
                        .posts
                        .values()
                        .filter(|p| p.category_id == Some(c.id))
                        .count() as i64,
                })
                .collect();
            v.sort_by(|a, b| b.category.created_at.cmp(&a.category.created_at).then(b.category.id.cmp(&a.category.id)));
            Ok(v)
        }

        async fn get_category(&self, id: Id) -> RepoResult<Category> {
            let s = self.state.read().unwrap();
            s.categories.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn get_category_by_slug(&self, slug: &str) -> RepoResult<Category> {
            let s = self.state.read().unwrap();
            s.categories
                .values()
                .find(|c| c.slug == slug)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn create_category(&self, new: NewCategory) -> RepoResult<Category> {
            let mut s = self.state.write().unwrap();
            if s.categories.values().any(|c| c.slug == new.slug) {
                return Err(RepoError::Conflict);
            }
            let now = Utc::now();
            let id = Self::next_id(&mut s);
            let cat = Category {
                id,
                name: new.name,
                slug: new.slug,
                icon: new.icon,
                description: new.description,
                created_at: now,
                updated_at: now,
            };
            s.categories.insert(id, cat.clone());
            drop(s);
            self.persist();
            Ok(cat)
        }

        async fn update_category(&self, id: Id, upd: UpdateCategory) -> RepoResult<Category> {
            let mut s = self.state.write().unwrap();
            if let Some(ref slug) = upd.slug {
                if s.categories.values().any(|c| c.slug == *slug && c.id != id) {
                    return Err(RepoError::Conflict);
                }
            }
            let cat = s.categories.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(name) = upd.name {
                cat.name = name;
            }
            if let Some(slug) = upd.slug {
                cat.slug = slug;
            }
            if let Some(icon) = upd.icon {
                cat.icon = Some(icon);
            }
            if let Some(desc) = upd.description {
                cat.description = Some(desc);
            }
            cat.updated_at = Utc::now();
            let updated = cat.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_category(&self, id: Id) -> RepoResult<Category> {
            let mut s = self.state.write().unwrap();
            let cat = s.categories.remove(&id).ok_or(RepoError::NotFound)?;
            for p in s.posts.values_mut() {
                if p.category_id == Some(id) {
                    p.category_id = None;
                }
            }
            drop(s);
            self.persist();
            Ok(cat)
        }

        async fn count_categories(&self) -> RepoResult<i64> {
            let s = self.state.read().unwrap();
            Ok(s.categories.len() as i64)
        }
    }

    #[async_trait]
    impl TagRepo for InMemRepo {
        async fn list_tags(&self) -> RepoResult<Vec<TagWithCount>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<TagWithCount> = s
                .tags
                .values()
                .map(|t| TagWithCount {
                    tag: t.clone(),
                    post_count: s.post_tags.iter().filter(|(_, tid)| *tid == t.id).count()
                        as i64,
                })
                .collect();
            v.sort_by(|a, b| b.post_count.cmp(&a.post_count).then(a.tag.id.cmp(&b.tag.id)));
            Ok(v)
        }

        async fn search_tags(&self, query: &str, limit: i64) -> RepoResult<Vec<Tag>> {
            let s = self.state.read().unwrap();
            let q = query.to_lowercase();
            let mut v: Vec<Tag> = s
                .tags
                .values()
                .filter(|t| t.name.to_lowercase().contains(&q))
                .cloned()
                .collect();
            v.sort_by(|a, b| a.id.cmp(&b.id));
            v.truncate(limit as usize);
            Ok(v)
        }

        async fn get_tag_by_slug(&self, slug: &str) -> RepoResult<Tag> {
            let s = self.state.read().unwrap();
            s.tags
                .values()
                .find(|t| t.slug == slug)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn create_tag(&self, new: NewTag) -> RepoResult<Tag> {
            let mut s = self.state.write().unwrap();
            if s.tags.values().any(|t| t.slug == new.slug || t.name == new.name) {
                return Err(RepoError::Conflict);
            }
            let id = Self::next_id(&mut s);
            let tag = Tag {
                id,
                name: new.name,
                slug: new.slug,
                created_at: Utc::now(),
            };
            s.tags.insert(id, tag.clone());
            drop(s);
            self.persist();
            Ok(tag)
        }

        async fn delete_tag(&self, id: Id) -> RepoResult<Tag> {
            let mut s = self.state.write().unwrap();
            let tag = s.tags.remove(&id).ok_or(RepoError::NotFound)?;
            s.post_tags.retain(|(_, tid)| *tid != id);
            drop(s);
            self.persist();
            Ok(tag)
        }
    }

    #[async_trait]
    impl CommentRepo for InMemRepo {
        async fn list_comments(
            &self,
            filter: &CommentFilter,
            page: i64,
            limit: i64,
        ) -> RepoResult<Page<Comment>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Comment> = s
                .comments
                .values()
                .filter(|c| filter.status.map_or(true, |st| c.status == st))
                .filter(|c| filter.post_id.map_or(true, |p| c.post_id == p))
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(page_slice(v, page, limit))
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            let s = self.state.read().unwrap();
            s.comments.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            if !s.posts.contains_key(&new.post_id) {
                return Err(RepoError::Referential);
            }
            let now = Utc::now();
            let id = Self::next_id(&mut s);
            let comment = Comment {
                id,
                post_id: new.post_id,
                parent_id: new.parent_id,
                name: new.name,
                email: new.email,
                content: new.content,
                image: new.image,
                status: new.status,
                ip_address: new.ip_address,
                user_agent: new.user_agent,
                approved_by: None,
                created_at: now,
                updated_at: now,
            };
            s.comments.insert(id, comment.clone());
            drop(s);
            self.persist();
            Ok(comment)
        }

        async fn approve_comment(&self, id: Id, approved_by: &str) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            let c = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            c.status = CommentStatus::Approved;
            c.approved_by = Some(approved_by.to_string());
            c.updated_at = Utc::now();
            let updated = c.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn spam_comment(&self, id: Id) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            let c = s.comments.get_mut(&id).ok_or(RepoError::NotFound)?;
            c.status = CommentStatus::Spam;
            c.updated_at = Utc::now();
            let updated = c.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_comment(&self, id: Id) -> RepoResult<Comment> {
            let mut s = self.state.write().unwrap();
            let c = s.comments.remove(&id).ok_or(RepoError::NotFound)?;
            drop(s);
            self.persist();
            Ok(c)
        }

        async fn bulk_approve_comments(&self, ids: &[Id], approved_by: &str) -> RepoResult<u64> {
            let mut s = self.state.write().unwrap();
            let now = Utc::now();
            let mut n = 0u64;
            for id in ids {
                if let Some(c) = s.comments.get_mut(id) {
                    c.status = CommentStatus::Approved;
                    c.approved_by = Some(approved_by.to_string());
                    c.updated_at = now;
                    n += 1;
                }
            }
            drop(s);
            self.persist();
            Ok(n)
        }

        async fn bulk_delete_comments(&self, ids: &[Id]) -> RepoResult<u64> {
            let mut s = self.state.write().unwrap();
            let mut n = 0u64;
            for id in ids {
                if s.comments.remove(id).is_some() {
                    n += 1;
                }
            }
            drop(s);
            self.persist();
            Ok(n)
        }

        async fn comment_counts_by_status(&self) -> RepoResult<HashMap<String, i64>> {
            let s = self.state.read().unwrap();
            let mut counts: HashMap<String, i64> = HashMap::from([
                ("pending".to_string(), 0),
                ("approved".to_string(), 0),
                ("spam".to_string(), 0),
            ]);
            for c in s.comments.values() {
                let key = match c.status {
                    CommentStatus::Pending => "pending",
                    CommentStatus::Approved => "approved",
                    CommentStatus::Spam => "spam",
                };
                *counts.get_mut(key).unwrap() += 1;
            }
            Ok(counts)
        }

        async fn approved_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Comment> = s
                .comments
                .values()
                .filter(|c| c.post_id == post_id && c.status == CommentStatus::Approved)
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(v)
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn list_users(&self) -> RepoResult<Vec<User>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<User> = s.users.values().cloned().collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
            Ok(v)
        }

        async fn get_user(&self, id: &str) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users.get(id).cloned().ok_or(RepoError::NotFound)
        }

        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            if s.users.values().any(|u| u.email == new.email) {
                return Err(RepoError::Conflict);
            }
            let now = Utc::now();
            let user = User {
                id: uuid::Uuid::new_v4().to_string(),
                name: new.name,
                email: new.email,
                role: new.role.unwrap_or(Role::User),
                email_verified: true, // admin-created accounts are verified
                image: None,
                created_at: now,
                updated_at: now,
            };
            s.users.insert(user.id.clone(), user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn update_user(&self, id: &str, upd: UpdateUser) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            if let Some(ref email) = upd.email {
                if s.users.values().any(|u| u.email == *email && u.id != id) {
                    return Err(RepoError::Conflict);
                }
            }
            let user = s.users.get_mut(id).ok_or(RepoError::NotFound)?;
            if let Some(name) = upd.name {
                user.name = name;
            }
            if let Some(email) = upd.email {
                user.email = email;
            }
            if let Some(role) = upd.role {
                user.role = role;
            }
            user.updated_at = Utc::now();
            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn delete_user(&self, id: &str) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            let user = s.users.remove(id).ok_or(RepoError::NotFound)?;
            for p in s.posts.values_mut() {
                if p.author_id.as_deref() == Some(id) {
                    p.author_id = None;
                }
            }
            for u in s.uploads.values_mut() {
                if u.uploaded_by.as_deref() == Some(id) {
                    u.uploaded_by = None;
                }
            }
            for c in s.comments.values_mut() {
                if c.approved_by.as_deref() == Some(id) {
                    c.approved_by = None;
                }
            }
            for l in s.audit_logs.iter_mut() {
                if l.actor_id.as_deref() == Some(id) {
                    l.actor_id = None;
                }
            }
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn set_user_image(&self, id: &str, image: Option<String>) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            let user = s.users.get_mut(id).ok_or(RepoError::NotFound)?;
            user.image = image;
            user.updated_at = Utc::now();
            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }

    #[async_trait]
    impl SubscriberRepo for InMemRepo {
        async fn list_subscribers(&self) -> RepoResult<Vec<Subscriber>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Subscriber> = s.subscribers.values().cloned().collect();
            v.sort_by(|a, b| b.subscribed_at.cmp(&a.subscribed_at).then(b.id.cmp(&a.id)));
            Ok(v)
        }

        async fn subscribe(&self, email: &str) -> RepoResult<(Subscriber, bool)> {
            let email = normalize_email(email);
            let mut s = self.state.write().unwrap();
            if let Some(existing) = s.subscribers.values_mut().find(|sub| sub.email == email) {
                if existing.is_active {
                    return Err(RepoError::Conflict);
                }
                existing.is_active = true;
                existing.unsubscribed_at = None;
                let revived = existing.clone();
                drop(s);
                self.persist();
                return Ok((revived, true));
            }
            let id = Self::next_id(&mut s);
            let sub = Subscriber {
                id,
                email,
                is_active: true,
                subscribed_at: Utc::now(),
                unsubscribed_at: None,
            };
            s.subscribers.insert(id, sub.clone());
            drop(s);
            self.persist();
            Ok((sub, false))
        }

        async fn unsubscribe(&self, email: &str) -> RepoResult<Subscriber> {
            let email = normalize_email(email);
            let mut s = self.state.write().unwrap();
            let sub = s
                .subscribers
                .values_mut()
                .find(|sub| sub.email == email)
                .ok_or(RepoError::NotFound)?;
            if !sub.is_active {
                return Err(RepoError::Conflict);
            }
            sub.is_active = false;
            sub.unsubscribed_at = Some(Utc::now());
            let updated = sub.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn subscriber_counts(&self) -> RepoResult<(i64, i64)> {
            let s = self.state.read().unwrap();
            let total = s.subscribers.len() as i64;
            let active = s.subscribers.values().filter(|sub| sub.is_active).count() as i64;
            Ok((total, active))
        }

        async fn delete_subscriber(&self, id: Id) -> RepoResult<Subscriber> {
            let mut s = self.state.write().unwrap();
            let sub = s.subscribers.remove(&id).ok_or(RepoError::NotFound)?;
            drop(s);
            self.persist();
            Ok(sub)
        }
    }

    #[async_trait]
    impl UploadRepo for InMemRepo {
        async fn list_uploads(&self, page: i64, limit: i64) -> RepoResult<Page<Upload>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Upload> = s.uploads.values().cloned().collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(page_slice(v, page, limit))
        }

        async fn get_upload(&self, id: Id) -> RepoResult<Upload> {
            let s = self.state.read().unwrap();
            s.uploads.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn create_upload(&self, new: NewUpload) -> RepoResult<Upload> {
            let mut s = self.state.write().unwrap();
            let id = Self::next_id(&mut s);
            let upload = Upload {
                id,
                filename: new.filename,
                original_name: new.original_name,
                mime_type: new.mime_type,
                size: new.size,
                url: new.url,
                uploaded_by: new.uploaded_by,
                created_at: Utc::now(),
            };
            s.uploads.insert(id, upload.clone());
            drop(s);
            self.persist();
            Ok(upload)
        }

        async fn delete_upload(&self, id: Id) -> RepoResult<Upload> {
            let mut s = self.state.write().unwrap();
            let upload = s.uploads.remove(&id).ok_or(RepoError::NotFound)?;
            drop(s);
            self.persist();
            Ok(upload)
        }
    }

    #[async_trait]
    impl SettingRepo for InMemRepo {
        async fn all_settings(&self) -> RepoResult<Vec<Setting>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<Setting> = s.settings.values().cloned().collect();
            v.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(v)
        }

        async fn get_setting(&self, key: &str) -> RepoResult<Option<Setting>> {
            let s = self.state.read().unwrap();
            Ok(s.settings.get(key).cloned())
        }

        async fn upsert_setting(&self, key: &str, value: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.settings.insert(
                key.to_string(),
                Setting {
                    key: key.to_string(),
                    value: value.to_string(),
                    updated_at: Utc::now(),
                },
            );
            drop(s);
            self.persist();
            Ok(())
        }

        async fn delete_setting(&self, key: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.settings.remove(key);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl AuditLogRepo for InMemRepo {
        async fn insert_audit_log(&self, new: NewAuditLog) -> RepoResult<AuditLog> {
            let mut s = self.state.write().unwrap();
            let log = AuditLog {
                id: uuid::Uuid::new_v4().to_string(),
                actor_id: new.actor_id,
                action: new.action,
                entity: new.entity,
                entity_id: new.entity_id,
                details: new.details,
                ip_address: new.ip_address,
                created_at: Utc::now(),
            };
            s.audit_logs.push(log.clone());
            drop(s);
            self.persist();
            Ok(log)
        }

        async fn list_audit_logs(
            &self,
            filter: &AuditLogFilter,
            page: i64,
            limit: i64,
        ) -> RepoResult<Page<AuditLog>> {
            let s = self.state.read().unwrap();
            // append-only vec is chronological; reverse for newest-first
            let v: Vec<AuditLog> = s
                .audit_logs
                .iter()
                .rev()
                .filter(|l| {
                    filter
                        .actor_id
                        .as_deref()
                        .map_or(true, |a| l.actor_id.as_deref() == Some(a))
                })
                .filter(|l| filter.action.map_or(true, |a| l.action == a))
                .filter(|l| filter.entity.map_or(true, |e| l.entity == e))
                .filter(|l| {
                    filter
                        .entity_id
                        .as_deref()
                        .map_or(true, |e| l.entity_id.as_deref() == Some(e))
                })
                .filter(|l| filter.start_date.map_or(true, |d| l.created_at >= d))
                .filter(|l| filter.end_date.map_or(true, |d| l.created_at <= d))
                .cloned()
                .collect();
            Ok(page_slice(v, page, limit))
        }

        async fn get_audit_log(&self, id: &str) -> RepoResult<AuditLog> {
            let s = self.state.read().unwrap();
            s.audit_logs
                .iter()
                .find(|l| l.id == id)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn audit_stats(&self) -> RepoResult<AuditStats> {
            let s = self.state.read().unwrap();
            let mut by_action = HashMap::new();
            let mut by_entity = HashMap::new();
            let cutoff = Utc::now() - Duration::hours(24);
            let mut recent_count = 0;
            for l in s.audit_logs.iter() {
                *by_action.entry(l.action.as_str().to_string()).or_insert(0) += 1;
                *by_entity.entry(l.entity.as_str().to_string()).or_insert(0) += 1;
                if l.created_at >= cutoff {
                    recent_count += 1;
                }
            }
            Ok(AuditStats { by_action, by_entity, recent_count })
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{postgres::PgRow, FromRow, Pool, Postgres, QueryBuilder, Row};

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }
    }

    fn map_db_err(e: sqlx::Error) -> RepoError {
        if let sqlx::Error::RowNotFound = e {
            return RepoError::NotFound;
        }
        if let Some(db) = e.as_database_error() {
            // unique_violation / foreign_key_violation safety net
            match db.code().as_deref() {
                Some("23505") => return RepoError::Conflict,
                Some("23503") => return RepoError::Referential,
                _ => {}
            }
        }
        RepoError::Internal(e.to_string())
    }

    fn push_post_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &PostFilter) {
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status);
        }
        if let Some(cid) = filter.category_id {
            qb.push(" AND category_id = ").push_bind(cid);
        }
        if let Some(featured) = filter.featured {
            qb.push(" AND featured = ").push_bind(featured);
        }
        if let Some(author) = filter.author_id.clone() {
            qb.push(" AND author_id = ").push_bind(author);
        }
        if let Some(search) = filter.search.clone() {
            let like = format!("%{search}%");
            qb.push(" AND (title ILIKE ")
                .push_bind(like.clone())
                .push(" OR excerpt ILIKE ")
                .push_bind(like)
                .push(")");
        }
    }

    async fn fetch_page<T>(
        pool: &Pool<Postgres>,
        mut list_qb: QueryBuilder<'_, Postgres>,
        mut count_qb: QueryBuilder<'_, Postgres>,
        page: i64,
        limit: i64,
    ) -> RepoResult<Page<T>>
    where
        T: for<'r> FromRow<'r, PgRow> + Send + Unpin,
    {
        list_qb
            .push(" LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind((page - 1) * limit);
        let items: Vec<T> = list_qb
            .build_query_as()
            .fetch_all(pool)
            .await
            .map_err(map_db_err)?;
        let total: i64 = count_qb
            .build()
            .fetch_one(pool)
            .await
            .map_err(map_db_err)?
            .get(0);
        Ok(Page::new(items, page, limit, total))
    }

    #[async_trait]
    impl PostRepo for PgRepo {
        async fn list_posts(
            &self,
            filter: &PostFilter,
            page: i64,
            limit: i64,
            order: OrderBy,
        ) -> RepoResult<Page<Post>> {
            let mut qb = QueryBuilder::new("SELECT * FROM post WHERE TRUE");
            push_post_filters(&mut qb, filter);
            qb.push(match order {
                OrderBy::Newest => " ORDER BY created_at DESC, id DESC",
                OrderBy::Oldest => " ORDER BY created_at ASC, id ASC",
                OrderBy::Popular => " ORDER BY view_count DESC, id DESC",
            });
            let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM post WHERE TRUE");
            push_post_filters(&mut count_qb, filter);
            fetch_page(&self.pool, qb, count_qb, page, limit).await
        }

        async fn get_post(&self, id: Id) -> RepoResult<Post> {
            sqlx::query_as::<_, Post>("SELECT * FROM post WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn get_post_by_slug(&self, slug: &str) -> RepoResult<Post> {
            sqlx::query_as::<_, Post>("SELECT * FROM post WHERE slug = $1")
                .bind(slug)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn create_post(&self, author_id: &str, new: NewPost) -> RepoResult<Post> {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM post WHERE slug = $1)")
                    .bind(&new.slug)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_db_err)?;
            if exists {
                return Err(RepoError::Conflict);
            }
            let status = new.status.unwrap_or(PostStatus::Draft);
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            let post = sqlx::query_as::<_, Post>(
                "INSERT INTO post (title, slug, content, excerpt, featured_image, category_id, author_id, status, featured, published_at) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9, CASE WHEN $8 = 'published'::post_status THEN now() END) \
                 RETURNING *",
            )
            .bind(&new.title)
            .bind(&new.slug)
            .bind(&new.content)
            .bind(&new.excerpt)
            .bind(&new.featured_image)
            .bind(new.category_id)
            .bind(author_id)
            .bind(status)
            .bind(new.featured.unwrap_or(false))
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_err)?;
            if let Some(tag_ids) = new.tag_ids {
                for tid in tag_ids {
                    sqlx::query("INSERT INTO post_tag (post_id, tag_id) VALUES ($1,$2)")
                        .bind(post.id)
                        .bind(tid)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_db_err)?;
                }
            }
            tx.commit().await.map_err(map_db_err)?;
            Ok(post)
        }

        async fn update_post(&self, id: Id, upd: UpdatePost) -> RepoResult<Post> {
            if let Some(ref slug) = upd.slug {
                let taken: bool = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM post WHERE slug = $1 AND id <> $2)",
                )
                .bind(slug)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)?;
                if taken {
                    return Err(RepoError::Conflict);
                }
            }
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            let post = sqlx::query_as::<_, Post>(
                "UPDATE post SET \
                   title = COALESCE($2, title), \
                   slug = COALESCE($3, slug), \
                   content = COALESCE($4, content), \
                   excerpt = COALESCE($5, excerpt), \
                   featured_image = COALESCE($6, featured_image), \
                   category_id = COALESCE($7, category_id), \
                   featured = COALESCE($8, featured), \
                   status = COALESCE($9, status), \
                   published_at = CASE WHEN $9 = 'published'::post_status AND published_at IS NULL THEN now() ELSE published_at END, \
                   updated_at = now() \
                 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .bind(&upd.title)
            .bind(&upd.slug)
            .bind(&upd.content)
            .bind(&upd.excerpt)
            .bind(&upd.featured_image)
            .bind(upd.category_id)
            .bind(upd.featured)
            .bind(upd.status)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_db_err)?;
            if let Some(tag_ids) = upd.tag_ids {
                sqlx::query("DELETE FROM post_tag WHERE post_id = $1")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_db_err)?;
                for tid in tag_ids {
                    sqlx::query("INSERT INTO post_tag (post_id, tag_id) VALUES ($1,$2)")
                        .bind(id)
                        .bind(tid)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_db_err)?;
                }
            }
            tx.commit().await.map_err(map_db_err)?;
            Ok(post)
        }

        async fn delete_post(&self, id: Id) -> RepoResult<Post> {
            sqlx::query_as::<_, Post>("DELETE FROM post WHERE id = $1 RETURNING *")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn bulk_update_post_status(
            &self,
            ids: &[Id],
            status: PostStatus,
        ) -> RepoResult<u64> {
            let res = sqlx::query(
                "UPDATE post SET status = $2, \
                   published_at = CASE WHEN $2 = 'published'::post_status AND published_at IS NULL THEN now() ELSE published_at END, \
                   updated_at = now() \
                 WHERE id = ANY($1)",
            )
            .bind(ids)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(res.rows_affected())
        }

        async fn bulk_delete_posts(&self, ids: &[Id]) -> RepoResult<u64> {
            let res = sqlx::query("DELETE FROM post WHERE id = ANY($1)")
                .bind(ids)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
            Ok(res.rows_affected())
        }

        async fn increment_view_count(&self, id: Id) -> RepoResult<()> {
            sqlx::query("UPDATE post SET view_count = view_count + 1 WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
            Ok(())
        }

        async fn increment_like_count(&self, id: Id) -> RepoResult<()> {
            sqlx::query("UPDATE post SET like_count = like_count + 1 WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
            Ok(())
        }

        async fn decrement_like_count(&self, id: Id) -> RepoResult<()> {
            sqlx::query("UPDATE post SET like_count = GREATEST(like_count - 1, 0) WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
            Ok(())
        }

        async fn post_counts_by_status(&self) -> RepoResult<HashMap<String, i64>> {
            let rows = sqlx::query("SELECT status::text AS status, COUNT(*) AS n FROM post GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(map_db_err)?;
            Ok(rows
                .into_iter()
                .map(|r| (r.get::<String, _>("status"), r.get::<i64, _>("n")))
                .collect())
        }

        async fn total_view_count(&self) -> RepoResult<i64> {
            let total: Option<i64> =
                sqlx::query_scalar("SELECT SUM(view_count)::bigint FROM post")
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_db_err)?;
            Ok(total.unwrap_or(0))
        }

        async fn set_post_tags(&self, id: Id, tag_ids: &[Id]) -> RepoResult<()> {
            let mut tx = self.pool.begin().await.map_err(map_db_err)?;
            sqlx::query("DELETE FROM post_tag WHERE post_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(map_db_err)?;
            for tid in tag_ids {
                sqlx::query("INSERT INTO post_tag (post_id, tag_id) VALUES ($1,$2)")
                    .bind(id)
                    .bind(tid)
                    .execute(&mut *tx)
                    .await
                    .map_err(map_db_err)?;
            }
            tx.commit().await.map_err(map_db_err)?;
            Ok(())
        }

        async fn tags_for_post(&self, id: Id) -> RepoResult<Vec<Tag>> {
            sqlx::query_as::<_, Tag>(
                "SELECT t.* FROM tag t INNER JOIN post_tag pt ON pt.tag_id = t.id \
                 WHERE pt.post_id = $1 ORDER BY t.id",
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
        }
    }

    #[async_trait]
    impl CategoryRepo for PgRepo {
        async fn list_categories(&self) -> RepoResult<Vec<CategoryWithCount>> {
            sqlx::query_as::<_, CategoryWithCount>(
                "SELECT c.*, COUNT(p.id) AS post_count FROM category c \
                 LEFT JOIN post p ON p.category_id = c.id \
                 GROUP BY c.id ORDER BY c.created_at DESC, c.id DESC",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn get_category(&self, id: Id) -> RepoResult<Category> {
            sqlx::query_as::<_, Category>("SELECT * FROM category WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn get_category_by_slug(&self, slug: &str) -> RepoResult<Category> {
            sqlx::query_as::<_, Category>("SELECT * FROM category WHERE slug = $1")
                .bind(slug)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn create_category(&self, new: NewCategory) -> RepoResult<Category> {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM category WHERE slug = $1)")
                    .bind(&new.slug)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_db_err)?;
            if exists {
                return Err(RepoError::Conflict);
            }
            sqlx::query_as::<_, Category>(
                "INSERT INTO category (name, slug, icon, description) VALUES ($1,$2,$3,$4) RETURNING *",
            )
            .bind(&new.name)
            .bind(&new.slug)
            .bind(&new.icon)
            .bind(&new.description)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn update_category(&self, id: Id, upd: UpdateCategory) -> RepoResult<Category> {
            if let Some(ref slug) = upd.slug {
                let taken: bool = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM category WHERE slug = $1 AND id <> $2)",
                )
                .bind(slug)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)?;
                if taken {
                    return Err(RepoError::Conflict);
                }
            }
            sqlx::query_as::<_, Category>(
                "UPDATE category SET \
                   name = COALESCE($2, name), slug = COALESCE($3, slug), \
                   icon = COALESCE($4, icon), description = COALESCE($5, description), \
                   updated_at = now() \
                 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .bind(&upd.name)
            .bind(&upd.slug)
            .bind(&upd.icon)
            .bind(&upd.description)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn delete_category(&self, id: Id) -> RepoResult<Category> {
            // post.category_id has ON DELETE SET NULL
            sqlx::query_as::<_, Category>("DELETE FROM category WHERE id = $1 RETURNING *")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn count_categories(&self) -> RepoResult<i64> {
            sqlx::query_scalar("SELECT COUNT(*) FROM category")
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }
    }

    #[async_trait]
    impl TagRepo for PgRepo {
        async fn list_tags(&self) -> RepoResult<Vec<TagWithCount>> {
            sqlx::query_as::<_, TagWithCount>(
                "SELECT t.*, COUNT(pt.post_id) AS post_count FROM tag t \
                 LEFT JOIN post_tag pt ON pt.tag_id = t.id \
                 GROUP BY t.id ORDER BY post_count DESC, t.id ASC",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn search_tags(&self, query: &str, limit: i64) -> RepoResult<Vec<Tag>> {
            sqlx::query_as::<_, Tag>(
                "SELECT * FROM tag WHERE name ILIKE $1 ORDER BY id LIMIT $2",
            )
            .bind(format!("%{query}%"))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn get_tag_by_slug(&self, slug: &str) -> RepoResult<Tag> {
            sqlx::query_as::<_, Tag>("SELECT * FROM tag WHERE slug = $1")
                .bind(slug)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn create_tag(&self, new: NewTag) -> RepoResult<Tag> {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM tag WHERE slug = $1 OR name = $2)",
            )
            .bind(&new.slug)
            .bind(&new.name)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;
            if exists {
                return Err(RepoError::Conflict);
            }
            sqlx::query_as::<_, Tag>("INSERT INTO tag (name, slug) VALUES ($1,$2) RETURNING *")
                .bind(&new.name)
                .bind(&new.slug)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn delete_tag(&self, id: Id) -> RepoResult<Tag> {
            sqlx::query_as::<_, Tag>("DELETE FROM tag WHERE id = $1 RETURNING *")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }
    }

    fn push_comment_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &CommentFilter) {
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status);
        }
        if let Some(pid) = filter.post_id {
            qb.push(" AND post_id = ").push_bind(pid);
        }
    }

    #[async_trait]
    impl CommentRepo for PgRepo {
        async fn list_comments(
            &self,
            filter: &CommentFilter,
            page: i64,
            limit: i64,
        ) -> RepoResult<Page<Comment>> {
            let mut qb = QueryBuilder::new("SELECT * FROM comment WHERE TRUE");
            push_comment_filters(&mut qb, filter);
            qb.push(" ORDER BY created_at DESC, id DESC");
            let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM comment WHERE TRUE");
            push_comment_filters(&mut count_qb, filter);
            fetch_page(&self.pool, qb, count_qb, page, limit).await
        }

        async fn get_comment(&self, id: Id) -> RepoResult<Comment> {
            sqlx::query_as::<_, Comment>("SELECT * FROM comment WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn create_comment(&self, new: NewComment) -> RepoResult<Comment> {
            sqlx::query_as::<_, Comment>(
                "INSERT INTO comment (post_id, parent_id, name, email, content, image, status, ip_address, user_agent) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) RETURNING *",
            )
            .bind(new.post_id)
            .bind(new.parent_id)
            .bind(&new.name)
            .bind(&new.email)
            .bind(&new.content)
            .bind(&new.image)
            .bind(new.status)
            .bind(&new.ip_address)
            .bind(&new.user_agent)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn approve_comment(&self, id: Id, approved_by: &str) -> RepoResult<Comment> {
            sqlx::query_as::<_, Comment>(
                "UPDATE comment SET status = 'approved', approved_by = $2, updated_at = now() \
                 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .bind(approved_by)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn spam_comment(&self, id: Id) -> RepoResult<Comment> {
            sqlx::query_as::<_, Comment>(
                "UPDATE comment SET status = 'spam', updated_at = now() WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn delete_comment(&self, id: Id) -> RepoResult<Comment> {
            sqlx::query_as::<_, Comment>("DELETE FROM comment WHERE id = $1 RETURNING *")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn bulk_approve_comments(&self, ids: &[Id], approved_by: &str) -> RepoResult<u64> {
            let res = sqlx::query(
                "UPDATE comment SET status = 'approved', approved_by = $2, updated_at = now() \
                 WHERE id = ANY($1)",
            )
            .bind(ids)
            .bind(approved_by)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(res.rows_affected())
        }

        async fn bulk_delete_comments(&self, ids: &[Id]) -> RepoResult<u64> {
            let res = sqlx::query("DELETE FROM comment WHERE id = ANY($1)")
                .bind(ids)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
            Ok(res.rows_affected())
        }

        async fn comment_counts_by_status(&self) -> RepoResult<HashMap<String, i64>> {
            let rows =
                sqlx::query("SELECT status::text AS status, COUNT(*) AS n FROM comment GROUP BY status")
                    .fetch_all(&self.pool)
                    .await
                    .map_err(map_db_err)?;
            let mut counts: HashMap<String, i64> = HashMap::from([
                ("pending".to_string(), 0),
                ("approved".to_string(), 0),
                ("spam".to_string(), 0),
            ]);
            for r in rows {
                counts.insert(r.get::<String, _>("status"), r.get::<i64, _>("n"));
            }
            Ok(counts)
        }

        async fn approved_comments(&self, post_id: Id) -> RepoResult<Vec<Comment>> {
            sqlx::query_as::<_, Comment>(
                "SELECT * FROM comment WHERE post_id = $1 AND status = 'approved' \
                 ORDER BY created_at DESC, id DESC",
            )
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn list_users(&self) -> RepoResult<Vec<User>> {
            sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY created_at DESC, id ASC")
                .fetch_all(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn get_user(&self, id: &str) -> RepoResult<User> {
            sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn create_user(&self, new: NewUser) -> RepoResult<User> {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
                    .bind(&new.email)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_db_err)?;
            if exists {
                return Err(RepoError::Conflict);
            }
            sqlx::query_as::<_, User>(
                "INSERT INTO users (id, name, email, role, email_verified) \
                 VALUES ($1,$2,$3,$4,TRUE) RETURNING *",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&new.name)
            .bind(&new.email)
            .bind(new.role.unwrap_or(Role::User))
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn update_user(&self, id: &str, upd: UpdateUser) -> RepoResult<User> {
            if let Some(ref email) = upd.email {
                let taken: bool = sqlx::query_scalar(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 AND id <> $2)",
                )
                .bind(email)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)?;
                if taken {
                    return Err(RepoError::Conflict);
                }
            }
            sqlx::query_as::<_, User>(
                "UPDATE users SET \
                   name = COALESCE($2, name), email = COALESCE($3, email), \
                   role = COALESCE($4, role), updated_at = now() \
                 WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .bind(&upd.name)
            .bind(&upd.email)
            .bind(upd.role)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn delete_user(&self, id: &str) -> RepoResult<User> {
            // FK actions null out post.author_id, upload.uploaded_by,
            // comment.approved_by and audit_log.actor_id
            sqlx::query_as::<_, User>("DELETE FROM users WHERE id = $1 RETURNING *")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn set_user_image(&self, id: &str, image: Option<String>) -> RepoResult<User> {
            sqlx::query_as::<_, User>(
                "UPDATE users SET image = $2, updated_at = now() WHERE id = $1 RETURNING *",
            )
            .bind(id)
            .bind(image)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
        }
    }

    #[async_trait]
    impl SubscriberRepo for PgRepo {
        async fn list_subscribers(&self) -> RepoResult<Vec<Subscriber>> {
            sqlx::query_as::<_, Subscriber>(
                "SELECT * FROM subscriber ORDER BY subscribed_at DESC, id DESC",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn subscribe(&self, email: &str) -> RepoResult<(Subscriber, bool)> {
            let email = normalize_email(email);
            let existing = sqlx::query_as::<_, Subscriber>(
                "SELECT * FROM subscriber WHERE email = $1",
            )
            .bind(&email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?;
            match existing {
                Some(sub) if sub.is_active => Err(RepoError::Conflict),
                Some(sub) => {
                    let revived = sqlx::query_as::<_, Subscriber>(
                        "UPDATE subscriber SET is_active = TRUE, unsubscribed_at = NULL \
                         WHERE id = $1 RETURNING *",
                    )
                    .bind(sub.id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_db_err)?;
                    Ok((revived, true))
                }
                None => {
                    let sub = sqlx::query_as::<_, Subscriber>(
                        "INSERT INTO subscriber (email) VALUES ($1) RETURNING *",
                    )
                    .bind(&email)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(map_db_err)?;
                    Ok((sub, false))
                }
            }
        }

        async fn unsubscribe(&self, email: &str) -> RepoResult<Subscriber> {
            let email = normalize_email(email);
            let existing = sqlx::query_as::<_, Subscriber>(
                "SELECT * FROM subscriber WHERE email = $1",
            )
            .bind(&email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_db_err)?
            .ok_or(RepoError::NotFound)?;
            if !existing.is_active {
                return Err(RepoError::Conflict);
            }
            sqlx::query_as::<_, Subscriber>(
                "UPDATE subscriber SET is_active = FALSE, unsubscribed_at = now() \
                 WHERE id = $1 RETURNING *",
            )
            .bind(existing.id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn subscriber_counts(&self) -> RepoResult<(i64, i64)> {
            let row = sqlx::query(
                "SELECT COUNT(*) AS total, COUNT(*) FILTER (WHERE is_active) AS active FROM subscriber",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok((row.get::<i64, _>("total"), row.get::<i64, _>("active")))
        }

        async fn delete_subscriber(&self, id: Id) -> RepoResult<Subscriber> {
            sqlx::query_as::<_, Subscriber>("DELETE FROM subscriber WHERE id = $1 RETURNING *")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }
    }

    #[async_trait]
    impl UploadRepo for PgRepo {
        async fn list_uploads(&self, page: i64, limit: i64) -> RepoResult<Page<Upload>> {
            let qb = QueryBuilder::new(
                "SELECT * FROM upload WHERE TRUE ORDER BY created_at DESC, id DESC",
            );
            let count_qb = QueryBuilder::new("SELECT COUNT(*) FROM upload WHERE TRUE");
            fetch_page(&self.pool, qb, count_qb, page, limit).await
        }

        async fn get_upload(&self, id: Id) -> RepoResult<Upload> {
            sqlx::query_as::<_, Upload>("SELECT * FROM upload WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn create_upload(&self, new: NewUpload) -> RepoResult<Upload> {
            sqlx::query_as::<_, Upload>(
                "INSERT INTO upload (filename, original_name, mime_type, size, url, uploaded_by) \
                 VALUES ($1,$2,$3,$4,$5,$6) RETURNING *",
            )
            .bind(&new.filename)
            .bind(&new.original_name)
            .bind(&new.mime_type)
            .bind(new.size)
            .bind(&new.url)
            .bind(&new.uploaded_by)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn delete_upload(&self, id: Id) -> RepoResult<Upload> {
            sqlx::query_as::<_, Upload>("DELETE FROM upload WHERE id = $1 RETURNING *")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }
    }

    #[async_trait]
    impl SettingRepo for PgRepo {
        async fn all_settings(&self) -> RepoResult<Vec<Setting>> {
            sqlx::query_as::<_, Setting>("SELECT * FROM setting ORDER BY key")
                .fetch_all(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn get_setting(&self, key: &str) -> RepoResult<Option<Setting>> {
            sqlx::query_as::<_, Setting>("SELECT * FROM setting WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn upsert_setting(&self, key: &str, value: &str) -> RepoResult<()> {
            sqlx::query(
                "INSERT INTO setting (key, value) VALUES ($1,$2) \
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
            )
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(())
        }

        async fn delete_setting(&self, key: &str) -> RepoResult<()> {
            sqlx::query("DELETE FROM setting WHERE key = $1")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(map_db_err)?;
            Ok(())
        }
    }

    fn push_audit_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &AuditLogFilter) {
        if let Some(actor) = filter.actor_id.clone() {
            qb.push(" AND actor_id = ").push_bind(actor);
        }
        if let Some(action) = filter.action {
            qb.push(" AND action = ").push_bind(action);
        }
        if let Some(entity) = filter.entity {
            qb.push(" AND entity = ").push_bind(entity);
        }
        if let Some(eid) = filter.entity_id.clone() {
            qb.push(" AND entity_id = ").push_bind(eid);
        }
        if let Some(start) = filter.start_date {
            qb.push(" AND created_at >= ").push_bind(start);
        }
        if let Some(end) = filter.end_date {
            qb.push(" AND created_at <= ").push_bind(end);
        }
    }

    #[async_trait]
    impl AuditLogRepo for PgRepo {
        async fn insert_audit_log(&self, new: NewAuditLog) -> RepoResult<AuditLog> {
            sqlx::query_as::<_, AuditLog>(
                "INSERT INTO audit_log (id, actor_id, action, entity, entity_id, details, ip_address) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7) RETURNING *",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&new.actor_id)
            .bind(new.action)
            .bind(new.entity)
            .bind(&new.entity_id)
            .bind(&new.details)
            .bind(&new.ip_address)
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)
        }

        async fn list_audit_logs(
            &self,
            filter: &AuditLogFilter,
            page: i64,
            limit: i64,
        ) -> RepoResult<Page<AuditLog>> {
            let mut qb = QueryBuilder::new("SELECT * FROM audit_log WHERE TRUE");
            push_audit_filters(&mut qb, filter);
            qb.push(" ORDER BY created_at DESC, id DESC");
            let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM audit_log WHERE TRUE");
            push_audit_filters(&mut count_qb, filter);
            fetch_page(&self.pool, qb, count_qb, page, limit).await
        }

        async fn get_audit_log(&self, id: &str) -> RepoResult<AuditLog> {
            sqlx::query_as::<_, AuditLog>("SELECT * FROM audit_log WHERE id = $1")
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(map_db_err)
        }

        async fn audit_stats(&self) -> RepoResult<AuditStats> {
            let by_action = sqlx::query(
                "SELECT action::text AS k, COUNT(*) AS n FROM audit_log GROUP BY action",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?
            .into_iter()
            .map(|r| (r.get::<String, _>("k"), r.get::<i64, _>("n")))
            .collect();
            let by_entity = sqlx::query(
                "SELECT entity::text AS k, COUNT(*) AS n FROM audit_log GROUP BY entity",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(map_db_err)?
            .into_iter()
            .map(|r| (r.get::<String, _>("k"), r.get::<i64, _>("n")))
            .collect();
            let recent_count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM audit_log WHERE created_at >= now() - interval '24 hours'",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(map_db_err)?;
            Ok(AuditStats { by_action, by_entity, recent_count })
        }
    }
}
