//! Shared fixtures for the integration tests.
//!
//! The blog schema: users have many posts, posts belong to a user and carry
//! tags through the `posts_tags` join table.

#![allow(dead_code)]

use std::sync::Arc;
use tideline::{row, MemoryExecutor, Registry, RegistryBuilder, RelationSpec, RepositoryDef};

pub fn blog_db() -> Arc<MemoryExecutor> {
    let db = Arc::new(MemoryExecutor::new());
    db.seed(
        "users",
        vec![
            row! { "id" => 1, "name" => "Ann", "age" => 31 },
            row! { "id" => 2, "name" => "Ben", "age" => 17 },
            row! { "id" => 3, "name" => "Cid", "age" => 45 },
        ],
    );
    db.seed(
        "posts",
        vec![
            row! { "post_id" => 1, "user_id" => 1, "title" => "hello" },
            row! { "post_id" => 2, "user_id" => 2, "title" => "second" },
            row! { "post_id" => 3, "user_id" => 2, "title" => "third" },
            row! { "post_id" => 4, "user_id" => 3, "title" => "fourth" },
        ],
    );
    db.seed(
        "tags",
        vec![
            row! { "tag_id" => "test" },
            row! { "tag_id" => "tag" },
            row! { "tag_id" => "blog" },
            row! { "tag_id" => "post" },
        ],
    );
    db.seed(
        "posts_tags",
        vec![
            row! { "post_id" => 1, "tag_id" => "test" },
            row! { "post_id" => 1, "tag_id" => "tag" },
            row! { "post_id" => 2, "tag_id" => "blog" },
            row! { "post_id" => 3, "tag_id" => "post" },
        ],
    );
    db.create_table("users", Some("id"));
    db.create_table("posts", Some("post_id"));
    db
}

pub fn blog_builder(db: Arc<MemoryExecutor>) -> RegistryBuilder {
    RegistryBuilder::new(db)
        .repository(
            RepositoryDef::new("users")
                .auto_increment(true)
                .relation("posts", RelationSpec::has_many("posts").with_convert(&[("id", "user_id")])),
        )
        .repository(
            RepositoryDef::new("posts")
                .primary_keys(&["post_id"])
                .auto_increment(true)
                .relation("author", RelationSpec::belongs_to("users").with_convert(&[("user_id", "id")]))
                .relation("tags", RelationSpec::join("posts_tags", "tags")),
        )
        .repository(RepositoryDef::new("tags").primary_keys(&["tag_id"]))
        .repository(RepositoryDef::new("posts_tags").primary_keys(&["post_id", "tag_id"]))
}

pub fn blog() -> (Arc<MemoryExecutor>, Registry) {
    let db = blog_db();
    let registry = blog_builder(db.clone()).build().expect("blog registry builds");
    (db, registry)
}

/// Values of `column` across `entities`
pub fn column(entities: &[tideline::Entity], column: &str) -> Vec<tideline::Value> {
    entities.iter().map(|e| e.get(column)).collect()
}
