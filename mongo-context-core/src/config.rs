//! Connection and per-collection configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use mongodb::options::{
    Acknowledgment, ClientOptions, CollectionOptions, SelectionCriteria,
    WriteConcern as DriverWriteConcern,
};
use serde::{Deserialize, Serialize};

use crate::error::{MongoError, MongoResult};

const DEFAULT_URI: &str = "mongodb://localhost:27017";
const DEFAULT_APP_NAME: &str = "mongo-context";

/// Connection settings for [`crate::MongoStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct MongoConfig {
    /// Connection URI.
    pub uri: String,
    /// Database name.
    pub database: String,
    /// Application name (shown in server logs).
    pub app_name: Option<String>,
    /// Minimum connection pool size.
    pub min_pool_size: Option<u32>,
    /// Maximum connection pool size.
    pub max_pool_size: Option<u32>,
    /// Connection timeout.
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout.
    pub server_selection_timeout: Option<Duration>,
    /// Default read preference.
    pub read_preference: Option<ReadPreference>,
    /// Default write concern.
    pub write_concern: Option<WriteConcern>,
    /// Direct connection (bypass replica set discovery).
    pub direct_connection: Option<bool>,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_URI.to_string(),
            database: String::new(),
            app_name: Some(DEFAULT_APP_NAME.to_string()),
            min_pool_size: None,
            max_pool_size: Some(10),
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            read_preference: None,
            write_concern: None,
            direct_connection: None,
        }
    }
}

impl MongoConfig {
    /// Configuration for a connection string and database name.
    pub fn from_uri(uri: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            database: database.into(),
            ..Self::default()
        }
    }

    /// Create a builder.
    pub fn builder() -> MongoConfigBuilder {
        MongoConfigBuilder::default()
    }

    /// Convert to driver client options.
    pub async fn to_client_options(&self) -> MongoResult<ClientOptions> {
        let mut options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| MongoError::config(format!("failed to parse URI: {}", e)))?;

        if let Some(app_name) = &self.app_name {
            options.app_name = Some(app_name.clone());
        }
        if let Some(size) = self.min_pool_size {
            options.min_pool_size = Some(size);
        }
        if let Some(size) = self.max_pool_size {
            options.max_pool_size = Some(size);
        }
        if let Some(timeout) = self.connect_timeout {
            options.connect_timeout = Some(timeout);
        }
        if let Some(timeout) = self.server_selection_timeout {
            options.server_selection_timeout = Some(timeout);
        }
        if let Some(read_preference) = self.read_preference {
            options.selection_criteria = Some(read_preference.to_selection_criteria());
        }
        if let Some(write_concern) = &self.write_concern {
            options.write_concern = Some(write_concern.to_driver());
        }
        if let Some(direct) = self.direct_connection {
            options.direct_connection = Some(direct);
        }

        Ok(options)
    }
}

/// Builder for [`MongoConfig`].
#[derive(Debug, Default)]
pub struct MongoConfigBuilder {
    config: MongoConfig,
    database_set: bool,
}

impl MongoConfigBuilder {
    /// Set the connection URI.
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.config.uri = uri.into();
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = database.into();
        self.database_set = true;
        self
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.config.app_name = Some(name.into());
        self
    }

    /// Set the minimum pool size.
    pub fn min_pool_size(mut self, size: u32) -> Self {
        self.config.min_pool_size = Some(size);
        self
    }

    /// Set the maximum pool size.
    pub fn max_pool_size(mut self, size: u32) -> Self {
        self.config.max_pool_size = Some(size);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Set the server selection timeout.
    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.config.server_selection_timeout = Some(timeout);
        self
    }

    /// Set the default read preference.
    pub fn read_preference(mut self, preference: ReadPreference) -> Self {
        self.config.read_preference = Some(preference);
        self
    }

    /// Set the default write concern.
    pub fn write_concern(mut self, concern: WriteConcern) -> Self {
        self.config.write_concern = Some(concern);
        self
    }

    /// Enable direct connection.
    pub fn direct_connection(mut self, enabled: bool) -> Self {
        self.config.direct_connection = Some(enabled);
        self
    }

    /// Build the configuration. A database name is required.
    pub fn build(self) -> MongoResult<MongoConfig> {
        if !self.database_set || self.config.database.is_empty() {
            return Err(MongoError::config("database name is required"));
        }
        Ok(self.config)
    }
}

/// Read preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReadPreference {
    /// Primary only.
    #[default]
    Primary,
    /// Primary, falling back to a secondary.
    PrimaryPreferred,
    /// Secondaries only.
    Secondary,
    /// A secondary, falling back to the primary.
    SecondaryPreferred,
    /// Lowest latency member.
    Nearest,
}

impl ReadPreference {
    /// Driver selection criteria.
    pub fn to_selection_criteria(self) -> SelectionCriteria {
        use mongodb::options::ReadPreference as Driver;

        let preference = match self {
            Self::Primary => Driver::Primary,
            Self::PrimaryPreferred => Driver::PrimaryPreferred {
                options: Default::default(),
            },
            Self::Secondary => Driver::Secondary {
                options: Default::default(),
            },
            Self::SecondaryPreferred => Driver::SecondaryPreferred {
                options: Default::default(),
            },
            Self::Nearest => Driver::Nearest {
                options: Default::default(),
            },
        };
        SelectionCriteria::ReadPreference(preference)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::PrimaryPreferred => "primaryPreferred",
            Self::Secondary => "secondary",
            Self::SecondaryPreferred => "secondaryPreferred",
            Self::Nearest => "nearest",
        }
    }
}

impl FromStr for ReadPreference {
    type Err = MongoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "primary" => Ok(Self::Primary),
            "primarypreferred" => Ok(Self::PrimaryPreferred),
            "secondary" => Ok(Self::Secondary),
            "secondarypreferred" => Ok(Self::SecondaryPreferred),
            "nearest" => Ok(Self::Nearest),
            _ => Err(MongoError::config(format!("unknown read preference '{}'", s))),
        }
    }
}

impl TryFrom<String> for ReadPreference {
    type Error = MongoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReadPreference> for String {
    fn from(value: ReadPreference) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write concern.
///
/// Parsed from `"majority"`, a node count such as `"2"`, or a tag set name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WriteConcern {
    /// Acknowledged by the given number of nodes.
    W(u32),
    /// Acknowledged by a majority of nodes.
    Majority,
    /// Acknowledged according to a custom tag set.
    Custom(String),
}

impl WriteConcern {
    /// Driver write concern.
    pub fn to_driver(&self) -> DriverWriteConcern {
        let acknowledgment = match self {
            Self::W(n) => Acknowledgment::Nodes(*n),
            Self::Majority => Acknowledgment::Majority,
            Self::Custom(tag) => Acknowledgment::Custom(tag.clone()),
        };
        DriverWriteConcern::builder().w(acknowledgment).build()
    }
}

impl FromStr for WriteConcern {
    type Err = MongoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MongoError::config("write concern is empty"));
        }
        if s.eq_ignore_ascii_case("majority") {
            return Ok(Self::Majority);
        }
        match s.parse::<u32>() {
            Ok(n) => Ok(Self::W(n)),
            Err(_) => Ok(Self::Custom(s.to_string())),
        }
    }
}

impl TryFrom<String> for WriteConcern {
    type Error = MongoError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WriteConcern> for String {
    fn from(value: WriteConcern) -> Self {
        value.to_string()
    }
}

impl fmt::Display for WriteConcern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::W(n) => write!(f, "{}", n),
            Self::Majority => f.write_str("majority"),
            Self::Custom(tag) => f.write_str(tag),
        }
    }
}

/// Per-collection overrides applied when a collection is resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectionSettings {
    /// Read preference for this collection.
    #[serde(default)]
    pub read_preference: Option<ReadPreference>,
    /// Write concern for this collection.
    #[serde(default)]
    pub write_concern: Option<WriteConcern>,
}

impl CollectionSettings {
    /// Settings with no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the read preference.
    pub fn with_read_preference(mut self, preference: ReadPreference) -> Self {
        self.read_preference = Some(preference);
        self
    }

    /// Override the write concern.
    pub fn with_write_concern(mut self, concern: WriteConcern) -> Self {
        self.write_concern = Some(concern);
        self
    }

    /// Check if nothing is overridden.
    pub fn is_empty(&self) -> bool {
        self.read_preference.is_none() && self.write_concern.is_none()
    }

    /// Convert to driver collection options.
    pub fn to_collection_options(&self) -> CollectionOptions {
        let mut options = CollectionOptions::default();
        options.selection_criteria = self
            .read_preference
            .map(ReadPreference::to_selection_criteria);
        options.write_concern = self.write_concern.as_ref().map(WriteConcern::to_driver);
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_uri() {
        let config = MongoConfig::from_uri("mongodb://db:27017", "shop");
        assert_eq!(config.uri, "mongodb://db:27017");
        assert_eq!(config.database, "shop");
        assert_eq!(config.app_name.as_deref(), Some("mongo-context"));
    }

    #[test]
    fn test_config_builder() {
        let config = MongoConfig::builder()
            .database("shop")
            .app_name("orders-api")
            .max_pool_size(20)
            .read_preference(ReadPreference::Nearest)
            .build()
            .unwrap();

        assert_eq!(config.uri, "mongodb://localhost:27017");
        assert_eq!(config.app_name.as_deref(), Some("orders-api"));
        assert_eq!(config.max_pool_size, Some(20));
        assert_eq!(config.read_preference, Some(ReadPreference::Nearest));
    }

    #[test]
    fn test_config_builder_requires_database() {
        let err = MongoConfig::builder().uri("mongodb://db").build().unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_parse_read_preference() {
        assert_eq!(
            "secondaryPreferred".parse::<ReadPreference>().unwrap(),
            ReadPreference::SecondaryPreferred
        );
        assert_eq!(
            "primary_preferred".parse::<ReadPreference>().unwrap(),
            ReadPreference::PrimaryPreferred
        );
        assert!("closest".parse::<ReadPreference>().is_err());
        assert_eq!(ReadPreference::Nearest.to_string(), "nearest");
    }

    #[test]
    fn test_parse_write_concern() {
        assert_eq!("majority".parse::<WriteConcern>().unwrap(), WriteConcern::Majority);
        assert_eq!("2".parse::<WriteConcern>().unwrap(), WriteConcern::W(2));
        assert_eq!(
            "dc-east".parse::<WriteConcern>().unwrap(),
            WriteConcern::Custom("dc-east".into())
        );
        assert!("".parse::<WriteConcern>().is_err());
    }

    #[test]
    fn test_collection_settings_to_options() {
        let settings = CollectionSettings::new()
            .with_read_preference(ReadPreference::Secondary)
            .with_write_concern(WriteConcern::Majority);
        let options = settings.to_collection_options();

        assert!(matches!(
            options.selection_criteria,
            Some(SelectionCriteria::ReadPreference(
                mongodb::options::ReadPreference::Secondary { .. }
            ))
        ));
        assert_eq!(
            options.write_concern.and_then(|wc| wc.w),
            Some(Acknowledgment::Majority)
        );
        assert!(CollectionSettings::new().is_empty());
    }
}
