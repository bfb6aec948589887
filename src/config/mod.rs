use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub campus: CampusConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    #[serde(default)]
    pub enabled: bool,
    pub base_url: String,
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub currency: String,
    pub timeout_secs: u64,
    pub session_ttl_minutes: i64,
    pub payment_method_types: Vec<String>,
    /// Price of one meal; a donation buys `amount / meal_price` meals.
    pub meal_price_centavos: i64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.paymongo.com/v1".to_string(),
            secret_key: None,
            webhook_secret: None,
            currency: "PHP".to_string(),
            timeout_secs: 30,
            session_ttl_minutes: 60,
            payment_method_types: vec![
                "gcash".to_string(),
                "paymaya".to_string(),
                "card".to_string(),
            ],
            meal_price_centavos: 6500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CampusConfig {
    /// Offset of campus local time from UTC, in minutes (Manila is +480).
    pub utc_offset_minutes: i32,
    /// Donated meals not reserved within this many days expire.
    pub meal_unit_ttl_days: Option<i64>,
}

impl Default for CampusConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 480,
            meal_unit_ttl_days: None,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.base_url", "http://localhost:8080")?
            .set_default("database.url", "sqlite://bitebank.db?mode=rwc")?
            .set_default("database.max_connections", 10)?
            .set_default("payments.enabled", false)?
            .set_default("payments.base_url", "https://api.paymongo.com/v1")?
            .set_default("payments.currency", "PHP")?
            .set_default("payments.timeout_secs", 30)?
            .set_default("payments.session_ttl_minutes", 60)?
            .set_default("payments.payment_method_types", vec!["gcash", "paymaya", "card"])?
            .set_default("payments.meal_price_centavos", 6500)?
            .set_default("campus.utc_offset_minutes", 480)?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with BITEBANK__ prefix, double underscore separates levels)
            .add_source(
                Environment::with_prefix("BITEBANK")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("payments.payment_method_types")
                    .try_parsing(true),
            )

            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                base_url: "http://localhost:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite://bitebank.db?mode=rwc".to_string(),
                max_connections: 10,
            },
            payments: PaymentsConfig::default(),
            campus: CampusConfig::default(),
        }
    }
}
