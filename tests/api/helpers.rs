use chrono::DateTime;
use chrono::Utc;
use nudge::configuration::get_configuration;
use nudge::configuration::DatabaseSettings;
use nudge::configuration::Settings;
use nudge::extraction::ExtractionClient;
use nudge::signature::sign;
use nudge::startup::get_connection_pool;
use nudge::startup::Application;
use nudge::telemetry::get_subscriber;
use nudge::telemetry::init_subscriber;
use nudge::workers::outbox::SenderClients;
use once_cell::sync::Lazy;
use secrecy::Secret;
use sqlx::Connection;
use sqlx::Executor;
use sqlx::PgConnection;
use sqlx::PgPool;
use uuid::Uuid;
use wiremock::MockServer;

pub const EMAIL_SECRET: &str = "test-email-secret";
pub const CHAT_SECRET: &str = "test-chat-secret";

/// Init a static subscriber once per test binary. To opt in to verbose
/// logging:
///
/// ```sh
///      TEST_LOG=true cargo test [test_name] | bunyan
/// ```
static TRACING: Lazy<()> = Lazy::new(|| {
    match std::env::var("TEST_LOG") {
        Ok(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::stdout);
            init_subscriber(subscriber);
        }
        Err(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::sink);
            init_subscriber(subscriber);
        }
    };
});

pub struct TestApp {
    /// ingress (webhook) listener
    pub addr: String,
    /// admin listener; a separate bind, mirroring production
    pub admin_addr: String,
    pub pool: PgPool,
    pub settings: Settings,
    /// simulated language-model service (`/v1/extract`, `/v1/draft`)
    pub extractor_server: MockServer,
    /// simulated email send API
    pub email_server: MockServer,
    /// simulated chat send API
    pub chat_server: MockServer,
}

/// A provisioned user the pipeline can resolve; mirrors what the external
/// account system would have written.
pub struct TestAccount {
    pub user_id: Uuid,
    pub email: String,
    pub chat_number: String,
}

impl TestAccount {
    pub fn generate() -> Self {
        Self {
            user_id: Uuid::new_v4(),
            email: format!("{}@example.com", Uuid::new_v4().simple()),
            // 11 random digits
            chat_number: format!(
                "1{:010}",
                u64::from_le_bytes(Uuid::new_v4().as_bytes()[..8].try_into().unwrap())
                    % 10_000_000_000
            ),
        }
    }

    pub async fn store(
        &self,
        pool: &PgPool,
        timezone: &str,
        fallback_channel: &str,
    ) {
        sqlx::query(
            "INSERT INTO users (user_id, primary_email, chat_number, display_name, status)
             VALUES ($1, $2, $3, 'Ada', 'active')",
        )
        .bind(self.user_id)
        .bind(&self.email)
        .bind(&self.chat_number)
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO preferences (user_id, timezone, tone, default_action, fallback_channel)
             VALUES ($1, $2, 'friendly', 'remind', $3)",
        )
        .bind(self.user_id)
        .bind(timezone)
        .bind(fallback_channel)
        .execute(pool)
        .await
        .unwrap();
    }
}

impl TestApp {
    /// `POST /webhook/email`, signed the way the provider would sign it
    pub async fn post_email_webhook(
        &self,
        body: &serde_json::Value,
    ) -> reqwest::Response {
        let raw = body.to_string();
        reqwest::Client::new()
            .post(format!("{}/webhook/email", self.addr))
            .header("X-Webhook-Signature", sign(EMAIL_SECRET, raw.as_bytes()))
            .header("Content-Type", "application/json")
            .body(raw)
            .send()
            .await
            .unwrap()
    }

    /// `POST /webhook/chat`, with the provider's `sha256=` header dressing
    pub async fn post_chat_webhook(
        &self,
        body: &serde_json::Value,
    ) -> reqwest::Response {
        let raw = body.to_string();
        reqwest::Client::new()
            .post(format!("{}/webhook/chat", self.addr))
            .header(
                "X-Hub-Signature-256",
                format!("sha256={}", sign(CHAT_SECRET, raw.as_bytes())),
            )
            .header("Content-Type", "application/json")
            .body(raw)
            .send()
            .await
            .unwrap()
    }

    pub async fn admin_get(
        &self,
        path: &str,
    ) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("{}{}", self.admin_addr, path))
            .basic_auth("admin", Some("everythinghastostartsomewhere"))
            .send()
            .await
            .unwrap()
    }

    pub async fn admin_post(
        &self,
        path: &str,
    ) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}{}", self.admin_addr, path))
            .basic_auth("admin", Some("everythinghastostartsomewhere"))
            .send()
            .await
            .unwrap()
    }

    /// Client pointed at the mock extractor; hands the worker step functions
    /// the same thing production wiring would
    pub fn extraction_client(&self) -> ExtractionClient {
        ExtractionClient::new(
            self.settings.extractor.base_url.clone(),
            self.settings.extractor.api_key.clone(),
            self.settings.extractor.timeout(),
        )
    }

    pub fn sender_clients(&self) -> SenderClients { SenderClients::from_settings(&self.settings) }

    // -- direct-to-store seeding, standing in for earlier pipeline stages --

    pub async fn seed_inbound(
        &self,
        user_id: Uuid,
        channel: &str,
        provider_message_id: &str,
        text: &str,
    ) -> Uuid {
        let inbound_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO inbound_messages
                (inbound_id, user_id, channel, provider_message_id, idempotency_key,
                 raw_text_redacted, status)
             VALUES ($1, $2, $3, $4, $5, $6, 'received')",
        )
        .bind(inbound_id)
        .bind(user_id)
        .bind(channel)
        .bind(provider_message_id)
        .bind(format!("{user_id}:{provider_message_id}"))
        .bind(text)
        .execute(&self.pool)
        .await
        .unwrap();
        inbound_id
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn seed_task(
        &self,
        user_id: Uuid,
        source_inbound_id: Option<Uuid>,
        due_at: Option<DateTime<Utc>>,
        action_type: &str,
        contact_hint: &str,
        context: &str,
        status: &str,
    ) -> Uuid {
        let task_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO tasks
                (task_id, user_id, source_inbound_id, due_at, action_type,
                 contact_hint, context, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(task_id)
        .bind(user_id)
        .bind(source_inbound_id)
        .bind(due_at)
        .bind(action_type)
        .bind(contact_hint)
        .bind(context)
        .bind(status)
        .execute(&self.pool)
        .await
        .unwrap();
        task_id
    }

    pub async fn seed_outbox(
        &self,
        task_id: Option<Uuid>,
        user_id: Uuid,
        channel: &str,
        to: &str,
        status: &str,
    ) -> Uuid {
        let outbox_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO outbox_messages
                (outbox_id, task_id, user_id, channel, payload, status)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(outbox_id)
        .bind(task_id)
        .bind(user_id)
        .bind(channel)
        .bind(serde_json::json!({ "to": to, "subject": "s", "body": "b" }))
        .bind(status)
        .execute(&self.pool)
        .await
        .unwrap();
        outbox_id
    }

    pub async fn enqueue_job(
        &self,
        kind: &str,
        job_key: &str,
        payload: serde_json::Value,
    ) {
        sqlx::query("INSERT INTO jobs (job_id, kind, job_key, payload) VALUES ($1, $2, $3, $4)")
            .bind(Uuid::new_v4())
            .bind(kind)
            .bind(job_key)
            .bind(payload)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn job_count(
        &self,
        kind: &str,
    ) -> i64 {
        use sqlx::Row;
        sqlx::query("SELECT count(*) AS n FROM jobs WHERE kind = $1")
            .bind(kind)
            .fetch_one(&self.pool)
            .await
            .unwrap()
            .get("n")
    }

    pub async fn event_types_for(
        &self,
        task_id: Uuid,
    ) -> Vec<String> {
        use sqlx::Row;
        sqlx::query(
            "SELECT event_type FROM task_events WHERE task_id = $1 ORDER BY created_at, event_id",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.get("event_type"))
        .collect()
    }
}

/// Read `DatabaseSettings` and create a db with a randomised name (but with
/// the same migrations/tables). The connection to this db can then be used to
/// run a single test.
async fn configure_database(cfg: &DatabaseSettings) -> PgPool {
    // connect to the top-level db
    let mut conn = PgConnection::connect_with(&cfg.connection_without_db())
        .await
        .expect("postgres must be running; run scripts/init_db.sh");

    conn.execute(format!(r#"CREATE DATABASE "{}";"#, cfg.database_name).as_str())
        .await
        .unwrap();

    let pool = PgPool::connect_with(cfg.connection()).await.unwrap();
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("failed to migrate");
    pool
}

pub async fn spawn_app() -> TestApp { spawn_app_with(|_| {}).await }

/// Spawn a `TestApp` with a randomised database and every external
/// collaborator mocked; `customize` gets the last word on settings.
pub async fn spawn_app_with(customize: impl FnOnce(&mut Settings)) -> TestApp {
    // init the tracing subscriber once only
    Lazy::force(&TRACING);

    let extractor_server = MockServer::start().await;
    let email_server = MockServer::start().await;
    let chat_server = MockServer::start().await;

    let cfg = {
        let mut rand_cfg = get_configuration().unwrap();

        // random db name, so a fresh db is spawned per test
        rand_cfg.database.database_name = Uuid::new_v4().to_string();
        // port 0: the OS assigns a free one (to each listener)
        rand_cfg.application.port = 0;
        rand_cfg.application.admin_port = 0;

        rand_cfg.extractor.base_url = extractor_server.uri();
        rand_cfg.email_client.base_url = email_server.uri();
        rand_cfg.chat_client.base_url = chat_server.uri();
        rand_cfg.webhooks.email_secret = Secret::new(EMAIL_SECRET.to_string());
        rand_cfg.webhooks.chat_app_secret = Secret::new(CHAT_SECRET.to_string());

        customize(&mut rand_cfg);
        rand_cfg
    };

    let _pool = configure_database(&cfg.database).await;

    let app = Application::build(cfg.clone()).await.unwrap();
    let addr = format!("http://localhost:{}", app.get_port());
    let admin_addr = format!("http://localhost:{}", app.get_admin_port());

    let pool = get_connection_pool(&cfg.database);
    tokio::spawn(app.run_until_stopped());

    TestApp {
        addr,
        admin_addr,
        pool,
        settings: cfg,
        extractor_server,
        email_server,
        chat_server,
    }
}
