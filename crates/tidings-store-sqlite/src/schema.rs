//! SQL schema for the Tidings SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS subscriptions (
    subscription_id   TEXT PRIMARY KEY,
    resource_type     TEXT NOT NULL,   -- 'TASK' | 'BUILD' | 'VERSION'
    trigger_name      TEXT NOT NULL,
    selectors         TEXT NOT NULL,   -- JSON [{type, data}]
    subscriber_type   TEXT NOT NULL,
    subscriber_target TEXT NOT NULL,   -- JSON, shape fixed by subscriber_type
    owner             TEXT NOT NULL,
    trigger_data      TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS subscriptions_resource_idx ON subscriptions(resource_type);
CREATE INDEX IF NOT EXISTS subscriptions_owner_idx    ON subscriptions(owner);

-- Append-only. dedup_key is the suppression gate: a conflicting insert means
-- the alert already fired.
CREATE TABLE IF NOT EXISTS alert_records (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id        TEXT NOT NULL UNIQUE,
    dedup_key       TEXT NOT NULL UNIQUE,
    subscription_id TEXT NOT NULL,
    trigger_name    TEXT NOT NULL,
    task_id         TEXT,
    execution       INTEGER,
    project         TEXT,
    build_variant   TEXT,
    display_name    TEXT,
    revision_order  INTEGER,
    task_status     TEXT,
    failing_tests   TEXT NOT NULL DEFAULT '[]',
    alerted_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS alert_records_history_idx
    ON alert_records(subscription_id, trigger_name, project, build_variant, display_name);

-- Append-only apart from the delivery outcome columns.
CREATE TABLE IF NOT EXISTS notifications (
    notification_id   TEXT PRIMARY KEY,
    event_id          TEXT NOT NULL,
    subscription_id   TEXT NOT NULL,
    subscriber_type   TEXT NOT NULL,
    subscriber_target TEXT NOT NULL,
    payload           TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    sent_at           TEXT,
    error             TEXT
);

CREATE INDEX IF NOT EXISTS notifications_unsent_idx ON notifications(sent_at, created_at);

CREATE TABLE IF NOT EXISTS events (
    seq           INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id      TEXT NOT NULL UNIQUE,
    event_type    TEXT NOT NULL,
    resource_type TEXT NOT NULL,
    resource_id   TEXT NOT NULL,
    timestamp     TEXT NOT NULL,
    data          TEXT NOT NULL,   -- JSON EventData
    processed_at  TEXT
);

CREATE INDEX IF NOT EXISTS events_processed_idx ON events(processed_at);

-- Read models owned by upstream state machines.
CREATE TABLE IF NOT EXISTS tasks (
    task_id        TEXT NOT NULL,
    execution      INTEGER NOT NULL,
    display_name   TEXT NOT NULL,
    project        TEXT NOT NULL,
    version        TEXT NOT NULL,
    build_id       TEXT NOT NULL,
    build_variant  TEXT NOT NULL,
    requester      TEXT NOT NULL,
    status         TEXT NOT NULL,
    start_time     TEXT,
    finish_time    TEXT,
    revision_order INTEGER NOT NULL,
    PRIMARY KEY (task_id, execution)
);

CREATE INDEX IF NOT EXISTS tasks_history_idx
    ON tasks(project, build_variant, display_name, revision_order);

CREATE TABLE IF NOT EXISTS test_results (
    seq       INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id   TEXT NOT NULL,
    execution INTEGER NOT NULL,
    test_file TEXT NOT NULL,
    status    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS test_results_task_idx ON test_results(task_id, execution);

CREATE TABLE IF NOT EXISTS builds (
    build_id      TEXT PRIMARY KEY,
    version       TEXT NOT NULL,
    project       TEXT NOT NULL,
    build_variant TEXT NOT NULL,
    display_name  TEXT NOT NULL,
    requester     TEXT NOT NULL,
    status        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS versions (
    version_id TEXT PRIMARY KEY,
    project    TEXT NOT NULL,
    revision   TEXT NOT NULL,
    author     TEXT NOT NULL,
    requester  TEXT NOT NULL,
    status     TEXT NOT NULL
);

-- Single row of degraded-mode switches.
CREATE TABLE IF NOT EXISTS service_flags (
    id    INTEGER PRIMARY KEY CHECK (id = 1),
    flags TEXT NOT NULL
);

PRAGMA user_version = 1;
";
