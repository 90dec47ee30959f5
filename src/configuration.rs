use config::Config;
use config::ConfigError;
use config::FileFormat;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::postgres::PgConnectOptions;
use sqlx::postgres::PgSslMode;

/// Server + pipeline configuration
#[derive(Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub admin: AdminSettings,
    pub database: DatabaseSettings,
    pub webhooks: WebhookSettings,
    pub extractor: ExtractorSettings,
    pub email_client: EmailClientSettings,
    pub chat_client: ChatClientSettings,
    pub pipeline: PipelineSettings,
}

#[derive(Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    /// Ingress (webhook) bind port
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    /// Admin read/retry surface; bound separately so it can stay internal
    /// while the webhook port faces the providers
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub admin_port: u16,
}

/// Credentials for the `/admin` read/retry surface. There is no user store
/// behind these; they come straight from config.
#[derive(Deserialize, Clone)]
pub struct AdminSettings {
    pub username: String,
    pub password: Secret<String>,
}

/// Database configuration
#[derive(Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub require_ssl: bool,
}

impl DatabaseSettings {
    /// Connection options for the configured database
    pub fn connection(&self) -> PgConnectOptions {
        let ssl_mode = match self.require_ssl {
            true => PgSslMode::Require,
            false => PgSslMode::Prefer,
        };
        self.connection_without_db().database(&self.database_name)
            .ssl_mode(ssl_mode)
    }

    /// Connection options for the postgres instance, without selecting a
    /// database; used by tests to create a throwaway one
    pub fn connection_without_db(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(self.password.expose_secret())
    }
}

/// Per-channel webhook verification. An empty secret disables verification
/// for that channel; this is deliberate dev-mode behaviour, not an oversight.
#[derive(Deserialize, Clone)]
pub struct WebhookSettings {
    pub email_secret: Secret<String>,
    pub chat_app_secret: Secret<String>,
    pub chat_verify_token: String,
}

/// The language-model service that turns free text into a structured task
/// (and drafts replies on request)
#[derive(Deserialize, Clone)]
pub struct ExtractorSettings {
    pub base_url: String,
    pub api_key: Secret<String>,
    pub timeout_milliseconds: u64,
}

impl ExtractorSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_milliseconds)
    }
}

#[derive(Deserialize, Clone)]
pub struct EmailClientSettings {
    pub base_url: String,
    pub sender_email: String,
    pub authorization_token: Secret<String>,
    pub timeout_milliseconds: u64,
}

impl EmailClientSettings {
    pub fn sender(&self) -> Result<crate::domain::EmailAddress, String> {
        crate::domain::EmailAddress::parse(self.sender_email.clone())
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_milliseconds)
    }
}

#[derive(Deserialize, Clone)]
pub struct ChatClientSettings {
    pub base_url: String,
    pub phone_number_id: String,
    pub access_token: Secret<String>,
    pub timeout_milliseconds: u64,
}

impl ChatClientSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_milliseconds)
    }
}

/// Knobs for the background roles. Defaults (see configuration.yaml):
/// scheduler ticks every 60 s claiming up to 100 tasks, outbox polls every
/// 5 s claiming up to 20 rows and gives up after 5 attempts, workers run 5
/// concurrent handlers, inbound text is blanked after 60 days.
#[derive(Deserialize, Clone)]
pub struct PipelineSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub scheduler_tick_seconds: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub scheduler_batch_size: i64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub outbox_poll_interval_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub outbox_batch_size: i64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub outbox_max_attempts: i32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub worker_concurrency: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retention_days: i64,
}

/// Loads configuration.yaml from the working directory, then applies
/// `APP__`-prefixed environment overrides (e.g.
/// `APP__DATABASE__HOST=db.internal`). All fields must resolve, otherwise
/// initialisation fails immediately and the server will not start.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = Config::builder()
        .add_source(config::File::new("configuration.yaml", FileFormat::Yaml))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;
    settings.try_deserialize()
}
