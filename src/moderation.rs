use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use utoipa::ToSchema;

use crate::auth::Identity;
use crate::error::ApiError;
use crate::models::{Comment, CommentNode, CommentStatus, Id, NewComment, PostStatus, Role};
use crate::repo::Repo;
use crate::settings::SettingsStore;

pub const MSG_POSTED: &str = "Comment posted successfully!";
pub const MSG_PENDING: &str =
    "Comment submitted successfully. It will appear after moderation.";

/// Public comment form payload. `website` is the honeypot field; humans
/// never see it, bots fill it.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CommentSubmission {
    pub name: Option<String>,
    pub email: Option<String>,
    pub content: Option<String>,
    pub image: Option<String>,
    pub parent_id: Option<Id>,
    #[serde(default)]
    pub website: Option<String>,
}

pub struct SubmissionContext {
    pub identity: Option<Identity>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

pub struct SubmissionOutcome {
    pub comment: Comment,
    pub message: &'static str,
}

/// Runs the public submission workflow for one post. The honeypot check
/// happens before anything touches storage, so a tripped submission leaves
/// no trace at all.
pub async fn submit_comment(
    repo: &dyn Repo,
    post_id: Id,
    submission: CommentSubmission,
    ctx: SubmissionContext,
) -> Result<SubmissionOutcome, ApiError> {
    if submission.website.as_deref().is_some_and(|w| !w.trim().is_empty()) {
        // deliberately indistinguishable from an ordinary rejection
        return Err(ApiError::validation("invalid submission"));
    }

    let name = submission
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation("name and content are required"))?
        .to_string();
    let content = submission
        .content
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::validation("name and content are required"))?
        .to_string();

    let post = repo.get_post(post_id).await?;
    if post.status != PostStatus::Published {
        return Err(ApiError::NotFound);
    }

    if let Some(parent_id) = submission.parent_id {
        let parent = repo
            .get_comment(parent_id)
            .await
            .map_err(|_| ApiError::validation("invalid parent comment"))?;
        if parent.post_id != post_id {
            return Err(ApiError::validation("invalid parent comment"));
        }
    }

    let staff = ctx
        .identity
        .as_ref()
        .map(|i| matches!(i.role, Role::Admin | Role::Blogger))
        .unwrap_or(false);
    let auto_approve = staff
        || SettingsStore::new(repo).get("comments.autoApprove").await? == "true";
    let status = if auto_approve {
        CommentStatus::Approved
    } else {
        CommentStatus::Pending
    };

    let comment = repo
        .create_comment(NewComment {
            post_id,
            parent_id: submission.parent_id,
            name,
            email: submission.email,
            content,
            image: submission.image,
            status,
            ip_address: ctx.ip,
            user_agent: ctx.user_agent,
        })
        .await?;

    let message = if status == CommentStatus::Approved {
        MSG_POSTED
    } else {
        MSG_PENDING
    };
    Ok(SubmissionOutcome { comment, message })
}

/// Assembles the public reply tree from a post's approved comments.
/// A reply whose parent is missing from the set (deleted, or still
/// pending) is promoted to a root rather than dropped.
pub fn build_reply_tree(comments: Vec<Comment>) -> Vec<CommentNode> {
    let present: HashSet<Id> = comments.iter().map(|c| c.id).collect();
    let mut by_parent: HashMap<Option<Id>, Vec<Comment>> = HashMap::new();
    for c in comments {
        let key = c.parent_id.filter(|p| present.contains(p));
        by_parent.entry(key).or_default().push(c);
    }

    fn attach(parent: Option<Id>, by_parent: &mut HashMap<Option<Id>, Vec<Comment>>) -> Vec<CommentNode> {
        let Some(children) = by_parent.remove(&parent) else {
            return Vec::new();
        };
        children
            .into_iter()
            .map(|c| {
                let replies = attach(Some(c.id), by_parent);
                CommentNode {
                    id: c.id,
                    parent_id: c.parent_id,
                    name: c.name,
                    content: c.content,
                    image: c.image,
                    created_at: c.created_at,
                    replies,
                }
            })
            .collect()
    }

    attach(None, &mut by_parent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn comment(id: Id, parent_id: Option<Id>) -> Comment {
        let now = Utc::now();
        Comment {
            id,
            post_id: 1,
            parent_id,
            name: format!("c{id}"),
            email: None,
            content: "hi".into(),
            image: None,
            status: CommentStatus::Approved,
            ip_address: None,
            user_agent: None,
            approved_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn replies_nest_under_their_parent() {
        let tree = build_reply_tree(vec![comment(1, None), comment(2, Some(1)), comment(3, Some(2))]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].replies.len(), 1);
        assert_eq!(tree[0].replies[0].replies[0].id, 3);
    }

    #[test]
    fn orphaned_reply_becomes_a_root() {
        // parent 9 is not in the approved set
        let tree = build_reply_tree(vec![comment(1, None), comment(2, Some(9))]);
        let ids: Vec<Id> = tree.iter().map(|n| n.id).collect();
        assert!(ids.contains(&1));
        assert!(ids.contains(&2));
    }
}
