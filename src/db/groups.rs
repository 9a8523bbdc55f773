//! User group hierarchy repository
//!
//! Groups nest through `group_hierarchy` (parent -> child edges). Visibility
//! resolution lives in [`crate::services::group_scope`]; this module only
//! stores the edges and hands them out as an adjacency map.

use std::collections::HashMap;

use anyhow::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::sqlite_helpers::{str_to_uuid, uuid_to_str};

/// Group id -> ids of its direct children
pub type GroupAdjacency = HashMap<Uuid, Vec<Uuid>>;

pub struct GroupRepository {
    pool: SqlitePool,
}

impl GroupRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a group and return its id
    pub async fn add_group(&self, name: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO user_groups (id, name) VALUES (?, ?)")
            .bind(uuid_to_str(id))
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    /// Record `child` as a direct child of `parent`. Re-adding an edge is a no-op.
    pub async fn add_child(&self, parent: Uuid, child: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO group_hierarchy (parent_group_id, child_group_id)
            VALUES (?, ?)
            ON CONFLICT(parent_group_id, child_group_id) DO NOTHING
            "#,
        )
        .bind(uuid_to_str(parent))
        .bind(uuid_to_str(child))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load the whole hierarchy as an adjacency map
    pub async fn adjacency(&self) -> Result<GroupAdjacency> {
        let edges: Vec<(String, String)> =
            sqlx::query_as("SELECT parent_group_id, child_group_id FROM group_hierarchy")
                .fetch_all(&self.pool)
                .await?;

        let mut adjacency: GroupAdjacency = HashMap::new();
        for (parent, child) in edges {
            adjacency
                .entry(str_to_uuid(&parent)?)
                .or_default()
                .push(str_to_uuid(&child)?);
        }
        Ok(adjacency)
    }
}
