pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS agents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL DEFAULT 'idle',
    type TEXT NOT NULL DEFAULT 'custom',
    last_run TEXT,
    next_run TEXT,
    config_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS agent_logs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    timestamp TEXT NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    details_json TEXT
);

CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    agent_id TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    start_time TEXT NOT NULL,
    end_time TEXT,
    status TEXT NOT NULL,
    actions_json TEXT NOT NULL,
    output TEXT,
    error TEXT,
    annotations_json TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_agent_logs_agent ON agent_logs(agent_id, seq);
CREATE INDEX IF NOT EXISTS idx_runs_agent ON runs(agent_id, start_time);
CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
";
