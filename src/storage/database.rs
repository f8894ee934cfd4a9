use rusqlite::{Connection, Result};
use std::sync::Arc;
use tokio::sync::Mutex;

/// SQLite-backed implementation of every store trait.
///
/// Constructed explicitly with [`Database::open`] and handed to whoever needs it;
/// all access goes through one connection guarded by an async mutex, which also
/// serializes multi-statement transactions.
#[derive(Clone)]
pub struct Database {
    pub(crate) connection: Arc<Mutex<Connection>>,
}

impl Database {
    pub async fn open(database_path: &str) -> Result<Self> {
        if database_path == ":memory:" {
            return Self::open_in_memory().await;
        }
        // 确保数据库文件的目录存在
        if let Some(parent) = std::path::Path::new(database_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    return Err(rusqlite::Error::SqliteFailure(
                        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
                        Some(format!("Failed to create directory: {}", e)),
                    ));
                }
                tracing::info!("Created database directory: {}", parent.display());
            }
        }

        let conn = Connection::open(database_path)?;
        tracing::info!("Database initialized at: {}", database_path);
        Self::from_connection(conn)
    }

    pub async fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        create_schema(&conn)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// Closes the connection if this is the last handle; otherwise just drops this one.
    pub async fn close(self) -> Result<()> {
        match Arc::try_unwrap(self.connection) {
            Ok(mutex) => mutex.into_inner().close().map_err(|(_, e)| e),
            Err(_) => {
                tracing::debug!("database still shared, close deferred to last handle");
                Ok(())
            }
        }
    }
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            token_hash TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS prompt_groups (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            order_id INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS prompt_subgroups (
            id TEXT PRIMARY KEY,
            group_id TEXT NOT NULL REFERENCES prompt_groups(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            order_id INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS prompts (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            notes TEXT,
            created_by TEXT REFERENCES users(id) ON DELETE SET NULL,
            subgroup_id TEXT NOT NULL REFERENCES prompt_subgroups(id),
            group_id TEXT NOT NULL REFERENCES prompt_groups(id),
            favorites_count INTEGER NOT NULL DEFAULT 0,
            documents TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_prompts_subgroup ON prompts(subgroup_id);
        CREATE INDEX IF NOT EXISTS idx_prompts_created_by ON prompts(created_by);

        CREATE TABLE IF NOT EXISTS favorites (
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            prompt_id TEXT NOT NULL REFERENCES prompts(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            PRIMARY KEY (user_id, prompt_id)
        );

        CREATE TABLE IF NOT EXISTS llm_configs (
            id TEXT PRIMARY KEY,
            config_name TEXT NOT NULL,
            api_type TEXT NOT NULL,
            api_base_url TEXT,
            api_key_env_var TEXT NOT NULL,
            model_name TEXT NOT NULL,
            default_parameters TEXT,
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        -- at most one active configuration
        CREATE UNIQUE INDEX IF NOT EXISTS idx_llm_configs_single_active
            ON llm_configs(is_active) WHERE is_active = 1;

        -- append-only; prompt_id has no foreign key so entries outlive their prompt
        CREATE TABLE IF NOT EXISTS run_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            prompt_id TEXT,
            prompt_name TEXT NOT NULL,
            user_id TEXT,
            config_id TEXT,
            input TEXT NOT NULL,
            output TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            duration_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_run_logs_user ON run_logs(user_id, id);",
    )
}
