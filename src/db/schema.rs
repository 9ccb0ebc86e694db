pub const SCHEMA: &str = r#"
-- subscription sources
CREATE TABLE IF NOT EXISTS subscriptions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL UNIQUE,
    enabled INTEGER NOT NULL DEFAULT 1,
    update_interval INTEGER NOT NULL DEFAULT 3600,
    last_update TEXT,
    node_count INTEGER NOT NULL DEFAULT 0,
    group_name TEXT,
    user_agent TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_enabled ON subscriptions(enabled);

-- proxy nodes
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    link TEXT NOT NULL,
    config TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- node groups
CREATE TABLE IF NOT EXISTS groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

-- subscription ownership membership
CREATE TABLE IF NOT EXISTS subscription_nodes (
    subscription_id INTEGER NOT NULL REFERENCES subscriptions(id) ON DELETE CASCADE,
    node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    PRIMARY KEY (subscription_id, node_id)
);

CREATE INDEX IF NOT EXISTS idx_subscription_nodes_node ON subscription_nodes(node_id);

-- group membership
CREATE TABLE IF NOT EXISTS group_nodes (
    group_id INTEGER NOT NULL REFERENCES groups(id) ON DELETE CASCADE,
    node_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    PRIMARY KEY (group_id, node_id)
);

CREATE INDEX IF NOT EXISTS idx_group_nodes_node ON group_nodes(node_id);
"#;
