//! Integration tests for batched relation loading
//!
//! Test relationships (see `common`):
//! - users has_many posts (one-to-many)
//! - posts belongs_to users as "author" (many-to-one)
//! - posts tags through posts_tags (many-to-many)

mod common;

use common::{blog, column};
use pretty_assertions::assert_eq;
use tideline::{row, Condition, Entity, RelationTrait, Statement, TideError, Value};

fn texts(values: &[&str]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}

// ============================================================================
// Two-hop loading
// ============================================================================

#[test]
fn test_posts_then_tags_for_every_user() {
    let (db, registry) = blog();
    let mut users = registry.find("users", &row! {}).unwrap();
    db.clear_history();

    users.load_path("posts.tags").unwrap();
    // one query for posts, then join rows and tags
    assert_eq!(db.query_count(), 3);

    let ann = &users[0];
    assert_eq!(column(ann.related("posts"), "post_id"), vec![Value::Int(1)]);
    assert_eq!(
        column(ann.related("posts")[0].related("tags"), "tag_id"),
        texts(&["test", "tag"])
    );

    let ben = &users[1];
    let posts = ben.related("posts");
    assert_eq!(column(posts, "post_id"), vec![Value::Int(2), Value::Int(3)]);
    assert_eq!(column(posts[0].related("tags"), "tag_id"), texts(&["blog"]));
    assert_eq!(column(posts[1].related("tags"), "tag_id"), texts(&["post"]));

    let cid = &users[2];
    assert_eq!(cid.related("posts").len(), 1);
    assert!(cid.related("posts")[0].related("tags").is_empty());
}

#[test]
fn test_relate_then_load_tags() {
    let (db, registry) = blog();
    let mut users = registry
        .find("users", &row! { "id" => serde_json::json!([1, 2]) })
        .unwrap();

    let mut posts = users.relate("posts").unwrap();
    assert_eq!(posts.column("post_id"), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);

    db.clear_history();
    posts.load("tags").unwrap();
    assert_eq!(db.query_count(), 2);
    let tags: Vec<Vec<Value>> = posts.map(|post| column(post.related("tags"), "tag_id"));
    assert_eq!(tags, vec![texts(&["test", "tag"]), texts(&["blog"]), texts(&["post"])]);
}

// ============================================================================
// Batched vs. per-entity resolution
// ============================================================================

#[test]
fn test_batched_matches_per_entity_queries() {
    let (_db, registry) = blog();
    let mut users = registry.find("users", &row! {}).unwrap();
    users.load("posts").unwrap();

    let relation = registry.relation("users", "posts").unwrap();
    for user in &users {
        let single = relation.with_entity(user).find(&row! {}).unwrap();
        assert_eq!(user.related("posts"), single.as_slice());
    }

    let mut posts = registry.find("posts", &row! {}).unwrap();
    posts.load("tags").unwrap();
    let tags = registry.relation("posts", "tags").unwrap();
    for post in &posts {
        let single = tags.with_entity(post).find(&row! {}).unwrap();
        assert_eq!(post.related("tags"), single.as_slice());
    }
}

#[test]
fn test_belongs_to_collapses_duplicate_keys() {
    let (db, registry) = blog();
    let mut posts = registry.find("posts", &row! {}).unwrap();
    db.clear_history();

    posts.load("author").unwrap();
    assert_eq!(
        db.statements(),
        vec![Statement::Select {
            table: "users".into(),
            condition: Condition::is_in("id", vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        }]
    );
    let authors: Vec<Vec<Value>> = posts.map(|post| column(post.related("author"), "name"));
    assert_eq!(
        authors,
        vec![texts(&["Ann"]), texts(&["Ben"]), texts(&["Ben"]), texts(&["Cid"])]
    );
}

#[test]
fn test_empty_list_issues_no_query() {
    let (db, registry) = blog();
    let mut users = registry.list("users", Vec::new()).unwrap();
    db.clear_history();

    users.load_path("posts.tags").unwrap();
    assert!(users.is_empty());
    assert_eq!(db.query_count(), 0);
}

#[test]
fn test_loading_twice_uses_the_cached_collector() {
    let (db, registry) = blog();
    let mut users = registry.find("users", &row! {}).unwrap();
    db.clear_history();

    users.load("posts").unwrap().load("posts").unwrap();
    assert_eq!(db.query_count(), 1);
    assert_eq!(users[1].related("posts").len(), 2);
}

#[test]
fn test_unknown_relation() {
    let (_db, registry) = blog();
    let mut users = registry.find("users", &row! {}).unwrap();
    assert!(matches!(
        users.load("comments"),
        Err(TideError::UnknownRelation { ref table, ref name }) if table == "users" && name == "comments"
    ));
}

// ============================================================================
// Relation-bound lists
// ============================================================================

fn find(registry: &tideline::Registry, table: &str, key: impl Into<tideline::KeyInput>) -> Entity {
    registry
        .repository(table)
        .unwrap()
        .find_by_key(key)
        .unwrap()
        .unwrap()
}

#[test]
fn test_join_list_add_and_delete() {
    let (db, registry) = blog();
    let post = find(&registry, "posts", 4);
    let mut tags = registry.related_list("tags", &post).unwrap();
    assert!(tags.is_empty());

    let blog_tag = find(&registry, "tags", "blog");
    tags.add(blog_tag.clone()).unwrap();
    assert_eq!(tags.len(), 1);
    assert!(db
        .rows("posts_tags")
        .contains(&row! { "post_id" => 4, "tag_id" => "blog" }));

    assert!(tags.delete(&blog_tag).unwrap());
    assert!(tags.is_empty());
    assert_eq!(db.rows("posts_tags").len(), 4);
}

#[test]
fn test_has_many_add_sets_the_foreign_key() {
    let (db, registry) = blog();
    let cid = find(&registry, "users", 3);
    let mut posts = registry.related_list("posts", &cid).unwrap();
    assert_eq!(posts.len(), 1);

    let draft = registry
        .repository("posts")
        .unwrap()
        .create(row! { "title" => "fifth" });
    posts.add(draft).unwrap();

    assert_eq!(posts.len(), 2);
    assert_eq!(posts[1].get("post_id"), Value::Int(5));
    assert_eq!(posts[1].get("user_id"), Value::Int(3));
    assert!(posts[1].is_fetched());
    assert_eq!(
        db.rows("posts").last(),
        Some(&row! { "title" => "fifth", "user_id" => 3, "post_id" => 5 })
    );
}

#[test]
fn test_belongs_to_add_updates_the_source() {
    let (db, registry) = blog();
    let post = find(&registry, "posts", 4);
    let mut author = registry.related_list("author", &post).unwrap();
    assert_eq!(author.column("name"), texts(&["Cid"]));

    let dee = registry
        .repository("users")
        .unwrap()
        .create(row! { "name" => "Dee", "age" => 28 });
    author.add(dee).unwrap();

    assert_eq!(author[1].get("id"), Value::Int(4));
    let stored = db.rows("posts");
    let fourth = stored
        .iter()
        .find(|row| row.get("post_id") == Some(&Value::Int(4)))
        .unwrap();
    assert_eq!(fourth.get("user_id"), Some(&Value::Int(4)));
}

#[test]
fn test_belongs_to_delete_keeps_the_parent() {
    let (db, registry) = blog();
    let post = find(&registry, "posts", 4);
    let mut author = registry.related_list("author", &post).unwrap();
    let cid = author[0].clone();

    assert!(author.delete(&cid).unwrap());
    assert!(author.is_empty());
    assert_eq!(db.rows("users").len(), 3);
    let stored = db.rows("posts");
    let fourth = stored
        .iter()
        .find(|row| row.get("post_id") == Some(&Value::Int(4)))
        .unwrap();
    assert_eq!(fourth.get("user_id"), Some(&Value::Null));
}

#[test]
fn test_unbound_list_refuses_membership_changes() {
    let (_db, registry) = blog();
    let mut users = registry.find("users", &row! {}).unwrap();
    let ann = users[0].clone();
    assert!(matches!(users.add(ann.clone()), Err(TideError::InvalidArgument(_))));
    assert!(matches!(users.delete(&ann), Err(TideError::InvalidArgument(_))));
}

#[test]
fn test_join_clear_requires_a_source() {
    let (db, registry) = blog();
    let tags = registry.relation("posts", "tags").unwrap();
    let tideline::AnyRelation::Join(mut unbound) = tags else {
        panic!("tags is a join relation");
    };
    assert!(matches!(unbound.clear(), Err(TideError::IllegalState(_))));

    let post = find(&registry, "posts", 1);
    let mut bound = unbound.with_entity(&post);
    assert_eq!(bound.clear().unwrap(), 2);
    assert_eq!(db.rows("posts_tags").len(), 2);
}
