//! SurrealDB connection setup
//!
//! Supports in-memory (`mem://`), local file (`surrealkv://`) and remote
//! (WebSocket) connections. Every connection runs schema initialization.

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::info;

use crate::error::StateError;
use crate::migrations;
use crate::Result;

const DEFAULT_NAMESPACE: &str = "stackgate";
const DEFAULT_DATABASE: &str = "main";
const DEFAULT_LOCAL_PATH: &str = ".stackgate/db";

/// Configuration for a remote SurrealDB connection
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint URL (e.g., "wss://db.example.net")
    pub endpoint: String,
    /// Database username
    pub username: String,
    /// Database password
    pub password: String,
    /// Namespace (default: "stackgate")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    pub is_root: bool,
}

impl CloudConfig {
    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "stackgate")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_ROOT (optional, default: "false")
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;
        let namespace = std::env::var("SURREALDB_NAMESPACE")
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());
        let database =
            std::env::var("SURREALDB_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.to_string());
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

/// Connect to an unauthenticated endpoint (`mem://`, `surrealkv://path`, ...).
pub async fn connect_url(url: &str) -> Result<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(url)
        .await
        .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

    db.use_ns(DEFAULT_NAMESPACE)
        .use_db(DEFAULT_DATABASE)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

    migrations::init_schema(&db).await?;
    Ok(db)
}

/// Connect to a remote instance with credentials.
pub async fn connect_cloud(config: &CloudConfig) -> Result<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(&config.endpoint)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

    if config.is_root {
        db.signin(Root {
            username: &config.username,
            password: &config.password,
        })
        .await
        .map_err(|e| StateError::Connection(format!("Root auth failed: {e}")))?;
    } else {
        db.signin(Database {
            namespace: &config.namespace,
            database: &config.database,
            username: &config.username,
            password: &config.password,
        })
        .await
        .map_err(|e| StateError::Connection(format!("DB auth failed: {e}")))?;
    }

    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await
        .map_err(|e| StateError::Connection(e.to_string()))?;

    migrations::init_schema(&db).await?;
    Ok(db)
}

/// Connect using the environment-variable chain.
///
/// 1. `SURREALDB_ENDPOINT` + credentials (remote)
/// 2. `SURREALDB_URL` (any unauthenticated engine)
/// 3. local persistence under `.stackgate/db`
pub async fn connect_from_env() -> Result<Surreal<Any>> {
    if let Ok(config) = CloudConfig::from_env() {
        let db = connect_cloud(&config).await?;
        info!(endpoint = %config.endpoint, "connected to remote SurrealDB");
        return Ok(db);
    }

    if let Ok(url) = std::env::var("SURREALDB_URL") {
        let db = connect_url(&url).await?;
        info!(url = %url, "connected to SurrealDB");
        return Ok(db);
    }

    std::fs::create_dir_all(DEFAULT_LOCAL_PATH).map_err(|e| {
        StateError::Connection(format!(
            "Failed to create database directory {}: {}",
            DEFAULT_LOCAL_PATH, e
        ))
    })?;
    let url = format!("surrealkv://{}", DEFAULT_LOCAL_PATH);
    info!(
        "No remote config or SURREALDB_URL found, using local persistence: {}",
        url
    );
    connect_url(&url).await
}
