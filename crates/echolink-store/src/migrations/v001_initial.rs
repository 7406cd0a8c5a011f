//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `invitations`, `connection_edges`,
//! `chat_messages`, and `call_history`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Invitations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS invitations (
    id             TEXT PRIMARY KEY NOT NULL,  -- UUID v4 (the shareable token)
    sender_email   TEXT NOT NULL,
    receiver_email TEXT,                       -- NULL until accepted
    status         TEXT NOT NULL,              -- pending | accepted
    link_type      TEXT NOT NULL,              -- ephemeral | permanent
    created_at     TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    expires_at     TEXT                        -- NULL iff permanent
);

CREATE INDEX IF NOT EXISTS idx_invitations_expiry
    ON invitations(link_type, expires_at);

-- ----------------------------------------------------------------
-- Connection edges (symmetric; user_a/user_b stored in sorted order)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS connection_edges (
    id         TEXT PRIMARY KEY NOT NULL,      -- UUID v4 (the connection id)
    user_a     TEXT NOT NULL,
    user_b     TEXT NOT NULL,
    link_type  TEXT NOT NULL,
    status     TEXT NOT NULL,                  -- active | removed
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_edges_user_a ON connection_edges(user_a, status);
CREATE INDEX IF NOT EXISTS idx_edges_user_b ON connection_edges(user_b, status);

-- ----------------------------------------------------------------
-- Chat messages (immutable except the soft-delete flag)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_messages (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    connection_id TEXT NOT NULL,               -- FK -> connection_edges(id)
    sender_email  TEXT NOT NULL,
    body          TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    deleted       INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1

    FOREIGN KEY (connection_id) REFERENCES connection_edges(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_connection_ts
    ON chat_messages(connection_id, created_at);

-- ----------------------------------------------------------------
-- Call history (terminal call sessions only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS call_history (
    id            TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    caller        TEXT NOT NULL,
    callee        TEXT NOT NULL,
    call_type     TEXT NOT NULL,               -- voice | video
    state         TEXT NOT NULL,               -- ended | rejected
    started_at    TEXT NOT NULL,
    answered_at   TEXT,
    ended_at      TEXT,
    duration_secs INTEGER,
    ended_by      TEXT                         -- email or 'system'
);

CREATE INDEX IF NOT EXISTS idx_calls_caller ON call_history(caller, started_at DESC);
CREATE INDEX IF NOT EXISTS idx_calls_callee ON call_history(callee, started_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
