//! SQLite schema definition
//!
//! Table and column names match the results database layout used by earlier
//! releases, so existing `results.db` files open unchanged.
//! - Procedure_type is seeded reference data
//! - One result table and one chat table per procedure
//! - Deleting a call cascades to its results, their chats and recommendations

pub const SCHEMA: &str = r#"
-- ============================================
-- REFERENCE DATA
-- ============================================

CREATE TABLE IF NOT EXISTS Procedure_type (
    p_id INTEGER PRIMARY KEY,
    display_name TEXT NOT NULL,
    procedure_name TEXT NOT NULL UNIQUE
);

-- ============================================
-- CONNECTIONS
-- ============================================

-- Target SQL Server instances
CREATE TABLE IF NOT EXISTS Database_connection (
    db_id INTEGER PRIMARY KEY AUTOINCREMENT,
    db_name TEXT NOT NULL,
    db_user TEXT NOT NULL,
    db_password TEXT NOT NULL,
    db_host TEXT NOT NULL,
    db_port INTEGER NOT NULL CHECK (db_port BETWEEN 1 AND 65535),
    version TEXT,                          -- @@VERSION, refreshed on demand
    instance_memory_mb INTEGER
);

-- ============================================
-- CALLS
-- ============================================

-- One row per procedure run
CREATE TABLE IF NOT EXISTS Procedure_call (
    pc_id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
    p_id INTEGER NOT NULL,
    db_id INTEGER NOT NULL,
    FOREIGN KEY(p_id) REFERENCES Procedure_type(p_id),
    FOREIGN KEY(db_id) REFERENCES Database_connection(db_id) ON DELETE CASCADE
);

-- ============================================
-- RESULTS
-- ============================================

CREATE TABLE IF NOT EXISTS Procedure_blitz (
    pb_id INTEGER PRIMARY KEY AUTOINCREMENT,
    finding TEXT,
    details TEXT,
    priority INTEGER,
    raw_record TEXT,                       -- original row as JSON
    procedure_order INTEGER NOT NULL,      -- position in the call's output
    pc_id INTEGER NOT NULL,
    UNIQUE(pc_id, procedure_order),
    FOREIGN KEY(pc_id) REFERENCES Procedure_call(pc_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS Procedure_blitzindex (
    pbi_id INTEGER PRIMARY KEY AUTOINCREMENT,
    finding TEXT,
    details_schema_table_index_indexid TEXT,
    priority INTEGER,
    more_info TEXT,                        -- follow-up EXEC statement
    raw_record TEXT,
    procedure_order INTEGER NOT NULL,
    pc_id INTEGER NOT NULL,
    UNIQUE(pc_id, procedure_order),
    FOREIGN KEY(pc_id) REFERENCES Procedure_call(pc_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS Procedure_blitzcache (
    pbc_id INTEGER PRIMARY KEY AUTOINCREMENT,
    query_text TEXT,
    avg_cpu_ms REAL,
    total_cpu_ms REAL,
    executions INTEGER,
    total_reads INTEGER,
    last_execution TEXT,
    warnings TEXT,
    raw_record TEXT,
    procedure_order INTEGER NOT NULL,
    pc_id INTEGER NOT NULL,
    UNIQUE(pc_id, procedure_order),
    FOREIGN KEY(pc_id) REFERENCES Procedure_call(pc_id) ON DELETE CASCADE
);

-- ============================================
-- CHATS
-- ============================================

CREATE TABLE IF NOT EXISTS Chat_blitz (
    ch_id INTEGER PRIMARY KEY AUTOINCREMENT,
    response TEXT NOT NULL,
    type TEXT NOT NULL,                    -- 'user', 'assistant', 'system'
    chat_order INTEGER NOT NULL,           -- sort key, gaps allowed
    pb_id INTEGER NOT NULL,
    FOREIGN KEY(pb_id) REFERENCES Procedure_blitz(pb_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS Chat_blitzindex (
    ch_id INTEGER PRIMARY KEY AUTOINCREMENT,
    response TEXT NOT NULL,
    type TEXT NOT NULL,
    chat_order INTEGER NOT NULL,
    pbi_id INTEGER NOT NULL,
    FOREIGN KEY(pbi_id) REFERENCES Procedure_blitzindex(pbi_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS Chat_blitzcache (
    ch_id INTEGER PRIMARY KEY AUTOINCREMENT,
    response TEXT NOT NULL,
    type TEXT NOT NULL,
    chat_order INTEGER NOT NULL,
    pbc_id INTEGER NOT NULL,
    FOREIGN KEY(pbc_id) REFERENCES Procedure_blitzcache(pbc_id) ON DELETE CASCADE
);

-- ============================================
-- RECOMMENDATIONS
-- ============================================

-- Exactly one of pb_id / pbi_id / pbc_id is set
CREATE TABLE IF NOT EXISTS Recommendation (
    id_recom INTEGER PRIMARY KEY AUTOINCREMENT,
    description TEXT NOT NULL,
    sql_command TEXT,
    pb_id INTEGER,
    pbi_id INTEGER,
    pbc_id INTEGER,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    CHECK ((pb_id IS NOT NULL) + (pbi_id IS NOT NULL) + (pbc_id IS NOT NULL) = 1),
    FOREIGN KEY(pb_id) REFERENCES Procedure_blitz(pb_id) ON DELETE CASCADE,
    FOREIGN KEY(pbi_id) REFERENCES Procedure_blitzindex(pbi_id) ON DELETE CASCADE,
    FOREIGN KEY(pbc_id) REFERENCES Procedure_blitzcache(pbc_id) ON DELETE CASCADE
);

-- ============================================
-- INDEXES
-- ============================================

CREATE INDEX IF NOT EXISTS idx_call_db ON Procedure_call(db_id, p_id);
CREATE INDEX IF NOT EXISTS idx_blitz_call ON Procedure_blitz(pc_id, procedure_order);
CREATE INDEX IF NOT EXISTS idx_blitzindex_call ON Procedure_blitzindex(pc_id, procedure_order);
CREATE INDEX IF NOT EXISTS idx_blitzcache_call ON Procedure_blitzcache(pc_id, procedure_order);
CREATE INDEX IF NOT EXISTS idx_chat_blitz_result ON Chat_blitz(pb_id, chat_order);
CREATE INDEX IF NOT EXISTS idx_chat_blitzindex_result ON Chat_blitzindex(pbi_id, chat_order);
CREATE INDEX IF NOT EXISTS idx_chat_blitzcache_result ON Chat_blitzcache(pbc_id, chat_order);
CREATE INDEX IF NOT EXISTS idx_recom_blitz ON Recommendation(pb_id);
CREATE INDEX IF NOT EXISTS idx_recom_blitzindex ON Recommendation(pbi_id);
CREATE INDEX IF NOT EXISTS idx_recom_blitzcache ON Recommendation(pbc_id);
"#;

/// Reference rows for `Procedure_type`
pub const SEED: &str = r#"
INSERT OR IGNORE INTO Procedure_type (p_id, display_name, procedure_name) VALUES
    (1, 'Blitz', 'sp_Blitz'),
    (2, 'Blitz Index', 'sp_BlitzIndex'),
    (3, 'Blitz Cache', 'sp_BlitzCache');
"#;
