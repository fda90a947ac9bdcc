//! Context settings file (`mongo-context.toml`).
//!
//! ```toml
//! [connection]
//! uri = "${MONGO_URI}"
//! database = "shop"
//! max_pool_size = 20
//!
//! [collections.orders]
//! read_preference = "secondaryPreferred"
//! write_concern = "majority"
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::{CollectionSettings, MongoConfig, ReadPreference, WriteConcern};
use crate::error::{MongoError, MongoResult};
use crate::mongo::MongoStore;

/// Parsed settings file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ContextSettings {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// Per-collection overrides, keyed by collection name.
    #[serde(default)]
    pub collections: IndexMap<String, CollectionSettings>,
}

/// The `[connection]` table.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionSettings {
    /// Connection URI (supports `${ENV_VAR}` interpolation).
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Database name.
    pub database: Option<String>,

    /// Application name.
    pub app_name: Option<String>,

    /// Maximum connection pool size.
    pub max_pool_size: Option<u32>,

    /// Minimum connection pool size.
    pub min_pool_size: Option<u32>,

    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: Option<u64>,

    /// Bypass replica set discovery.
    pub direct_connection: Option<bool>,

    /// Default read preference.
    pub read_preference: Option<ReadPreference>,

    /// Default write concern.
    pub write_concern: Option<WriteConcern>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            database: None,
            app_name: None,
            max_pool_size: None,
            min_pool_size: None,
            connect_timeout_ms: None,
            direct_connection: None,
            read_preference: None,
            write_concern: None,
        }
    }
}

fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

impl ContextSettings {
    /// Load settings from a file.
    pub fn from_file(path: impl AsRef<Path>) -> MongoResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MongoError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        content.parse()
    }

    /// Connection configuration. A database name is required.
    pub fn to_mongo_config(&self) -> MongoResult<MongoConfig> {
        let connection = &self.connection;
        let database = connection
            .database
            .as_deref()
            .ok_or_else(|| MongoError::config("[connection] database is required"))?;

        let mut builder = MongoConfig::builder()
            .uri(connection.uri.clone())
            .database(database);
        if let Some(app_name) = &connection.app_name {
            builder = builder.app_name(app_name.clone());
        }
        if let Some(size) = connection.max_pool_size {
            builder = builder.max_pool_size(size);
        }
        if let Some(size) = connection.min_pool_size {
            builder = builder.min_pool_size(size);
        }
        if let Some(ms) = connection.connect_timeout_ms {
            builder = builder.connect_timeout(Duration::from_millis(ms));
        }
        if let Some(direct) = connection.direct_connection {
            builder = builder.direct_connection(direct);
        }
        if let Some(preference) = connection.read_preference {
            builder = builder.read_preference(preference);
        }
        if let Some(concern) = &connection.write_concern {
            builder = builder.write_concern(concern.clone());
        }
        builder.build()
    }

    /// Overrides for a collection.
    pub fn collection(&self, name: &str) -> Option<&CollectionSettings> {
        self.collections.get(name)
    }

    /// Connect a [`MongoStore`] with these settings.
    pub async fn connect(&self) -> MongoResult<MongoStore> {
        let mut store = MongoStore::connect(self.to_mongo_config()?).await?;
        for (name, settings) in &self.collections {
            store = store.with_collection_settings(name.clone(), settings.clone());
        }
        Ok(store)
    }
}

impl FromStr for ContextSettings {
    type Err = MongoError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let expanded = expand_env_vars(content)?;
        toml::from_str(&expanded).map_err(|e| MongoError::config(format!("invalid settings: {}", e)))
    }
}

/// Expand environment variables in the format `${VAR_NAME}`.
///
/// Unset variables are left as written.
fn expand_env_vars(content: &str) -> MongoResult<String> {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| MongoError::internal(format!("invalid expansion pattern: {}", e)))?;

    let mut result = content.to_string();
    for cap in re.captures_iter(content) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }
    Ok(result)
}
