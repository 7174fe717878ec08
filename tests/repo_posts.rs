#![cfg(feature = "inmem-store")]

use quill::models::*;
use quill::repo::{
    inmem::InMemRepo, CategoryRepo, CommentRepo, PostRepo, RepoError, SubscriberRepo, TagRepo,
    UserRepo,
};
use serial_test::serial;

/// Fresh, empty repository with state isolated to a throwaway dir.
fn repo() -> InMemRepo {
    std::env::set_var("QUILL_DATA_DIR", tempfile::tempdir().unwrap().path());
    InMemRepo::new()
}

fn new_post(slug: &str) -> NewPost {
    NewPost {
        title: format!("Post {slug}"),
        slug: slug.into(),
        content: Some("body".into()),
        excerpt: None,
        featured_image: None,
        category_id: None,
        status: None,
        featured: None,
        tag_ids: None,
    }
}

#[tokio::test]
#[serial]
async fn duplicate_slug_is_a_conflict() {
    let r = repo();
    r.create_post("u1", new_post("hello")).await.unwrap();
    let err = r.create_post("u1", new_post("hello")).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict));

    let other = r.create_post("u1", new_post("other")).await.unwrap();
    let err = r
        .update_post(
            other.id,
            UpdatePost {
                slug: Some("hello".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
}

#[tokio::test]
#[serial]
async fn published_at_is_stamped_exactly_once() {
    let r = repo();
    let post = r.create_post("u1", new_post("once")).await.unwrap();
    assert!(post.published_at.is_none());

    let published = r
        .update_post(
            post.id,
            UpdatePost {
                status: Some(PostStatus::Published),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let first = published.published_at.expect("stamped on first publish");

    // unpublish and publish again; the timestamp must not move
    r.update_post(
        post.id,
        UpdatePost {
            status: Some(PostStatus::Draft),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let again = r
        .update_post(
            post.id,
            UpdatePost {
                status: Some(PostStatus::Published),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(again.published_at, Some(first));
}

#[tokio::test]
#[serial]
async fn bulk_publish_preserves_existing_timestamps() {
    let r = repo();
    let a = r
        .create_post(
            "u1",
            NewPost {
                status: Some(PostStatus::Published),
                ..new_post("a")
            },
        )
        .await
        .unwrap();
    let b = r.create_post("u1", new_post("b")).await.unwrap();
    assert!(b.published_at.is_none());

    let n = r
        .bulk_update_post_status(&[a.id, b.id], PostStatus::Published)
        .await
        .unwrap();
    assert_eq!(n, 2);
    assert_eq!(
        r.get_post(a.id).await.unwrap().published_at,
        a.published_at
    );
    assert!(r.get_post(b.id).await.unwrap().published_at.is_some());
}

#[tokio::test]
#[serial]
async fn like_count_never_goes_negative() {
    let r = repo();
    let post = r.create_post("u1", new_post("likes")).await.unwrap();
    r.decrement_like_count(post.id).await.unwrap();
    assert_eq!(r.get_post(post.id).await.unwrap().like_count, 0);
    r.increment_like_count(post.id).await.unwrap();
    r.increment_like_count(post.id).await.unwrap();
    r.decrement_like_count(post.id).await.unwrap();
    assert_eq!(r.get_post(post.id).await.unwrap().like_count, 1);
}

#[tokio::test]
#[serial]
async fn pagination_math_holds_for_partial_last_page() {
    let r = repo();
    for i in 0..45 {
        r.create_post("u1", new_post(&format!("p{i}"))).await.unwrap();
    }
    let page = r
        .list_posts(&PostFilter::default(), 3, 20, OrderBy::Newest)
        .await
        .unwrap();
    assert_eq!(page.pagination.total, 45);
    assert_eq!(page.pagination.total_pages, 3);
    assert_eq!(page.items.len(), 5);

    let empty = r
        .list_posts(
            &PostFilter {
                status: Some(PostStatus::Archived),
                ..Default::default()
            },
            1,
            20,
            OrderBy::Newest,
        )
        .await
        .unwrap();
    assert_eq!(empty.pagination.total_pages, 0);
    assert!(empty.items.is_empty());
}

#[tokio::test]
#[serial]
async fn search_matches_title_and_excerpt_case_insensitively() {
    let r = repo();
    r.create_post(
        "u1",
        NewPost {
            title: "Rust Patterns".into(),
            ..new_post("rust")
        },
    )
    .await
    .unwrap();
    r.create_post(
        "u1",
        NewPost {
            excerpt: Some("all about RUST tooling".into()),
            ..new_post("tools")
        },
    )
    .await
    .unwrap();
    r.create_post("u1", new_post("unrelated")).await.unwrap();

    let found = r
        .list_posts(
            &PostFilter {
                search: Some("rust".into()),
                ..Default::default()
            },
            1,
            10,
            OrderBy::Newest,
        )
        .await
        .unwrap();
    assert_eq!(found.pagination.total, 2);
}

#[tokio::test]
#[serial]
async fn deleting_a_category_detaches_its_posts() {
    let r = repo();
    let cat = r
        .create_category(NewCategory {
            name: "News".into(),
            slug: "news".into(),
            icon: None,
            description: None,
        })
        .await
        .unwrap();
    let post = r
        .create_post(
            "u1",
            NewPost {
                category_id: Some(cat.id),
                ..new_post("in-news")
            },
        )
        .await
        .unwrap();

    r.delete_category(cat.id).await.unwrap();
    assert_eq!(r.get_post(post.id).await.unwrap().category_id, None);
}

#[tokio::test]
#[serial]
async fn tag_set_is_replaced_wholesale() {
    let r = repo();
    let t1 = r
        .create_tag(NewTag { name: "one".into(), slug: "one".into() })
        .await
        .unwrap();
    let t2 = r
        .create_tag(NewTag { name: "two".into(), slug: "two".into() })
        .await
        .unwrap();
    let post = r
        .create_post(
            "u1",
            NewPost {
                tag_ids: Some(vec![t1.id]),
                ..new_post("tagged")
            },
        )
        .await
        .unwrap();
    assert_eq!(r.tags_for_post(post.id).await.unwrap().len(), 1);

    r.set_post_tags(post.id, &[t2.id]).await.unwrap();
    let tags = r.tags_for_post(post.id).await.unwrap();
    assert_eq!(tags.len(), 1);
    assert_eq!(tags[0].id, t2.id);

    // unknown tag is a referential error
    let err = r.set_post_tags(post.id, &[999]).await.unwrap_err();
    assert!(matches!(err, RepoError::Referential));

    r.delete_tag(t2.id).await.unwrap();
    assert!(r.tags_for_post(post.id).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn comments_are_removed_with_their_post() {
    let r = repo();
    let post = r
        .create_post(
            "u1",
            NewPost {
                status: Some(PostStatus::Published),
                ..new_post("commented")
            },
        )
        .await
        .unwrap();
    r.create_comment(NewComment {
        post_id: post.id,
        parent_id: None,
        name: "ann".into(),
        email: None,
        content: "hi".into(),
        image: None,
        status: CommentStatus::Approved,
        ip_address: None,
        user_agent: None,
    })
    .await
    .unwrap();

    r.delete_post(post.id).await.unwrap();
    let left = r
        .list_comments(&CommentFilter::default(), 1, 10)
        .await
        .unwrap();
    assert_eq!(left.pagination.total, 0);
}

#[tokio::test]
#[serial]
async fn deleting_a_user_nulls_out_authored_posts() {
    let r = repo();
    let user = r
        .create_user(NewUser {
            name: "Ann".into(),
            email: "ann@example.com".into(),
            role: Some(Role::Blogger),
        })
        .await
        .unwrap();
    let post = r.create_post(&user.id, new_post("orphan")).await.unwrap();
    assert_eq!(post.author_id.as_deref(), Some(user.id.as_str()));

    r.delete_user(&user.id).await.unwrap();
    assert_eq!(r.get_post(post.id).await.unwrap().author_id, None);
}

#[tokio::test]
#[serial]
async fn duplicate_user_email_is_a_conflict() {
    let r = repo();
    r.create_user(NewUser {
        name: "Ann".into(),
        email: "ann@example.com".into(),
        role: None,
    })
    .await
    .unwrap();
    let err = r
        .create_user(NewUser {
            name: "Other Ann".into(),
            email: "ann@example.com".into(),
            role: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
}

#[tokio::test]
#[serial]
async fn subscriptions_normalize_and_reactivate() {
    let r = repo();
    let (sub, revived) = r.subscribe("  Ann@Example.COM ").await.unwrap();
    assert_eq!(sub.email, "ann@example.com");
    assert!(!revived);
    assert!(sub.is_active);

    // already active
    let err = r.subscribe("ann@example.com").await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict));

    let off = r.unsubscribe("ANN@example.com").await.unwrap();
    assert!(!off.is_active);
    assert!(off.unsubscribed_at.is_some());

    let err = r.unsubscribe("ann@example.com").await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict));

    let (back, revived) = r.subscribe("ann@example.com").await.unwrap();
    assert!(revived);
    assert!(back.is_active);
    assert_eq!(back.unsubscribed_at, None);
    assert_eq!(back.id, sub.id);

    assert_eq!(r.subscriber_counts().await.unwrap(), (1, 1));
}

#[tokio::test]
#[serial]
async fn state_survives_a_reload() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("QUILL_DATA_DIR", dir.path());
    let r = InMemRepo::new();
    let post = r.create_post("u1", new_post("durable")).await.unwrap();
    drop(r);

    let r2 = InMemRepo::new();
    assert_eq!(r2.get_post(post.id).await.unwrap().slug, "durable");
}
