use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{Error, Result};
use crate::models::{Group, NewNode, NewSubscription, Node, Subscription};

use super::schema::SCHEMA;

/// SQLite-backed store for subscriptions, nodes, and groups. The single
/// connection serializes all writes.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    /// In-memory store, used by tests.
    pub async fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    // Subscription operations

    pub async fn insert_subscription(&self, new: NewSubscription) -> Result<Subscription> {
        if new.name.is_empty() || new.url.is_empty() {
            return Err(Error::InvalidArgument(
                "subscription name and url must not be empty".into(),
            ));
        }
        let new = new.with_defaults();
        let id = self
            .conn
            .call(move |conn| {
                let taken: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM subscriptions WHERE name = ?1 OR url = ?2",
                    params![new.name, new.url],
                    |row| row.get(0),
                )?;
                if taken > 0 {
                    return Ok(None);
                }
                conn.execute(
                    "INSERT INTO subscriptions (name, url, enabled, update_interval, group_name, user_agent)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        new.name,
                        new.url,
                        new.enabled,
                        new.update_interval,
                        new.group_name,
                        new.user_agent
                    ],
                )?;
                Ok(Some(conn.last_insert_rowid()))
            })
            .await?;
        match id {
            Some(id) => self.get_subscription(id).await,
            None => Err(Error::DuplicateName(
                "subscription name or url already in use".into(),
            )),
        }
    }

    pub async fn update_subscription(&self, id: i64, new: NewSubscription) -> Result<()> {
        if new.name.is_empty() || new.url.is_empty() {
            return Err(Error::InvalidArgument(
                "subscription name and url must not be empty".into(),
            ));
        }
        let new = new.with_defaults();
        let outcome = self
            .conn
            .call(move |conn| {
                let taken: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM subscriptions WHERE (name = ?1 OR url = ?2) AND id != ?3",
                    params![new.name, new.url, id],
                    |row| row.get(0),
                )?;
                if taken > 0 {
                    return Ok(UpdateOutcome::Duplicate);
                }
                let changed = conn.execute(
                    "UPDATE subscriptions
                     SET name = ?1, url = ?2, enabled = ?3, update_interval = ?4,
                         group_name = ?5, user_agent = ?6
                     WHERE id = ?7",
                    params![
                        new.name,
                        new.url,
                        new.enabled,
                        new.update_interval,
                        new.group_name,
                        new.user_agent,
                        id
                    ],
                )?;
                if changed == 0 {
                    Ok(UpdateOutcome::Missing)
                } else {
                    Ok(UpdateOutcome::Done)
                }
            })
            .await?;
        match outcome {
            UpdateOutcome::Done => Ok(()),
            UpdateOutcome::Duplicate => Err(Error::DuplicateName(
                "subscription name or url already in use".into(),
            )),
            UpdateOutcome::Missing => Err(Error::NotFound(format!("subscription {id}"))),
        }
    }

    /// Deletes a subscription and every node it owns through the
    /// membership table. The node list is materialized first, then each
    /// membership and node row is removed explicitly.
    pub async fn delete_subscription(&self, id: i64) -> Result<()> {
        self.get_subscription(id).await?;
        self.clear_subscription_nodes(id).await?;
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM subscriptions WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_subscription(&self, id: i64) -> Result<Subscription> {
        let sub = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, url, enabled, update_interval, last_update, node_count, group_name, user_agent
                     FROM subscriptions WHERE id = ?1",
                )?;
                let sub = stmt
                    .query_row(params![id], |row| Ok(subscription_from_row(row)))
                    .optional()?;
                Ok(sub)
            })
            .await?;
        sub.ok_or_else(|| Error::NotFound(format!("subscription {id}")))
    }

    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.select_subscriptions("SELECT id, name, url, enabled, update_interval, last_update, node_count, group_name, user_agent FROM subscriptions ORDER BY name")
            .await
    }

    pub async fn list_enabled_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.select_subscriptions("SELECT id, name, url, enabled, update_interval, last_update, node_count, group_name, user_agent FROM subscriptions WHERE enabled = 1 ORDER BY name")
            .await
    }

    async fn select_subscriptions(&self, sql: &'static str) -> Result<Vec<Subscription>> {
        let subs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(sql)?;
                let subs = stmt
                    .query_map([], |row| Ok(subscription_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(subs)
            })
            .await?;
        Ok(subs)
    }

    pub async fn set_subscription_status(
        &self,
        id: i64,
        last_update: DateTime<Utc>,
        node_count: i64,
    ) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE subscriptions SET last_update = ?1, node_count = ?2 WHERE id = ?3",
                    params![last_update.to_rfc3339(), node_count, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Detaches and deletes every node owned by the subscription.
    pub async fn clear_subscription_nodes(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT node_id FROM subscription_nodes WHERE subscription_id = ?1",
                )?;
                let node_ids = stmt
                    .query_map(params![id], |row| row.get::<_, i64>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                conn.execute(
                    "DELETE FROM subscription_nodes WHERE subscription_id = ?1",
                    params![id],
                )?;
                for node_id in node_ids {
                    conn.execute("DELETE FROM group_nodes WHERE node_id = ?1", params![node_id])?;
                    conn.execute("DELETE FROM nodes WHERE id = ?1", params![node_id])?;
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn associate_nodes(&self, id: i64, node_ids: &[i64]) -> Result<()> {
        if node_ids.is_empty() {
            return Ok(());
        }
        let node_ids = node_ids.to_vec();
        self.conn
            .call(move |conn| {
                for node_id in node_ids {
                    conn.execute(
                        "INSERT OR IGNORE INTO subscription_nodes (subscription_id, node_id) VALUES (?1, ?2)",
                        params![id, node_id],
                    )?;
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn nodes_for_subscription(&self, id: i64) -> Result<Vec<Node>> {
        let nodes = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT n.id, n.name, n.link, n.config
                     FROM nodes n
                     JOIN subscription_nodes sn ON sn.node_id = n.id
                     WHERE sn.subscription_id = ?1
                     ORDER BY n.id",
                )?;
                let nodes = stmt
                    .query_map(params![id], |row| Ok(node_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(nodes)
            })
            .await?;
        Ok(nodes)
    }

    // Node operations

    pub async fn insert_node(&self, node: NewNode) -> Result<i64> {
        if node.name.is_empty() {
            return Err(Error::InvalidArgument("node name must not be empty".into()));
        }
        let id = self
            .conn
            .call(move |conn| {
                let taken: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM nodes WHERE name = ?1",
                    params![node.name],
                    |row| row.get(0),
                )?;
                if taken > 0 {
                    return Ok(None);
                }
                conn.execute(
                    "INSERT INTO nodes (name, link, config) VALUES (?1, ?2, ?3)",
                    params![node.name, node.link, node.config],
                )?;
                Ok(Some(conn.last_insert_rowid()))
            })
            .await?;
        id.ok_or_else(|| Error::DuplicateName("node name already in use".into()))
    }

    pub async fn update_node(&self, id: i64, name: String, link: String) -> Result<()> {
        if name.is_empty() || link.is_empty() {
            return Err(Error::InvalidArgument(
                "node name and link must not be empty".into(),
            ));
        }
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE nodes SET name = ?1, link = ?2 WHERE id = ?3",
                    params![name, link, id],
                )?;
                Ok(changed)
            })
            .await?;
        if changed == 0 {
            return Err(Error::NotFound(format!("node {id}")));
        }
        Ok(())
    }

    pub async fn delete_node(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM subscription_nodes WHERE node_id = ?1", params![id])?;
                conn.execute("DELETE FROM group_nodes WHERE node_id = ?1", params![id])?;
                conn.execute("DELETE FROM nodes WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_node_by_name(&self, name: &str) -> Result<Option<Node>> {
        let name = name.to_string();
        let node = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name, link, config FROM nodes WHERE name = ?1")?;
                let node = stmt
                    .query_row(params![name], |row| Ok(node_from_row(row)))
                    .optional()?;
                Ok(node)
            })
            .await?;
        Ok(node)
    }

    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        let nodes = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name, link, config FROM nodes ORDER BY id")?;
                let nodes = stmt
                    .query_map([], |row| Ok(node_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(nodes)
            })
            .await?;
        Ok(nodes)
    }

    // Group operations

    /// Creates the group if missing and returns its id.
    pub async fn ensure_group(&self, name: &str) -> Result<i64> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("group name must not be empty".into()));
        }
        let name = name.to_string();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute("INSERT OR IGNORE INTO groups (name) VALUES (?1)", params![name])?;
                let id: i64 = conn.query_row(
                    "SELECT id FROM groups WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )?;
                Ok(id)
            })
            .await?;
        Ok(id)
    }

    pub async fn associate_group_node(&self, group_id: i64, node_id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO group_nodes (group_id, node_id) VALUES (?1, ?2)",
                    params![group_id, node_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Replaces a node's group memberships with the given group names,
    /// creating groups on demand.
    pub async fn set_node_groups(&self, node_id: i64, group_names: &[String]) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM group_nodes WHERE node_id = ?1", params![node_id])?;
                Ok(())
            })
            .await?;
        for name in group_names.iter().filter(|n| !n.trim().is_empty()) {
            let group_id = self.ensure_group(name.trim()).await?;
            self.associate_group_node(group_id, node_id).await?;
        }
        Ok(())
    }

    pub async fn rename_group(&self, id: i64, name: String) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("group name must not be empty".into()));
        }
        let outcome = self
            .conn
            .call(move |conn| {
                let taken: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM groups WHERE name = ?1 AND id != ?2",
                    params![name, id],
                    |row| row.get(0),
                )?;
                if taken > 0 {
                    return Ok(UpdateOutcome::Duplicate);
                }
                let changed =
                    conn.execute("UPDATE groups SET name = ?1 WHERE id = ?2", params![name, id])?;
                if changed == 0 {
                    Ok(UpdateOutcome::Missing)
                } else {
                    Ok(UpdateOutcome::Done)
                }
            })
            .await?;
        match outcome {
            UpdateOutcome::Done => Ok(()),
            UpdateOutcome::Duplicate => Err(Error::DuplicateName("group name already in use".into())),
            UpdateOutcome::Missing => Err(Error::NotFound(format!("group {id}"))),
        }
    }

    pub async fn delete_group(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM group_nodes WHERE group_id = ?1", params![id])?;
                conn.execute("DELETE FROM groups WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_groups(&self) -> Result<Vec<Group>> {
        let groups = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, name FROM groups ORDER BY name")?;
                let groups = stmt
                    .query_map([], |row| {
                        Ok(Group {
                            id: row.get(0)?,
                            name: row.get(1)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(groups)
            })
            .await?;
        Ok(groups)
    }

    pub async fn nodes_in_group(&self, group_name: &str) -> Result<Vec<Node>> {
        let group_name = group_name.to_string();
        let nodes = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT n.id, n.name, n.link, n.config
                     FROM nodes n
                     JOIN group_nodes gn ON gn.node_id = n.id
                     JOIN groups g ON g.id = gn.group_id
                     WHERE g.name = ?1
                     ORDER BY n.id",
                )?;
                let nodes = stmt
                    .query_map(params![group_name], |row| Ok(node_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(nodes)
            })
            .await?;
        Ok(nodes)
    }
}

enum UpdateOutcome {
    Done,
    Duplicate,
    Missing,
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn subscription_from_row(row: &Row) -> Subscription {
    Subscription {
        id: row.get(0).unwrap(),
        name: row.get(1).unwrap(),
        url: row.get(2).unwrap(),
        enabled: row.get::<_, i64>(3).unwrap() != 0,
        update_interval: row.get(4).unwrap(),
        last_update: row
            .get::<_, Option<String>>(5)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        node_count: row.get(6).unwrap(),
        group_name: row.get(7).unwrap(),
        user_agent: row.get(8).unwrap(),
    }
}

fn node_from_row(row: &Row) -> Node {
    Node {
        id: row.get(0).unwrap(),
        name: row.get(1).unwrap(),
        link: row.get(2).unwrap(),
        config: row.get(3).unwrap(),
    }
}
