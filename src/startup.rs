use std::net::TcpListener;

use actix_web::dev::Server;
use actix_web::web;
use actix_web::web::Data;
use actix_web::App;
use actix_web::HttpServer;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing_actix_web::TracingLogger;

use crate::configuration::AdminSettings;
use crate::configuration::DatabaseSettings;
use crate::configuration::PipelineSettings;
use crate::configuration::Settings;
use crate::configuration::WebhookSettings;
use crate::routes::admin;
use crate::routes::chat_verify;
use crate::routes::chat_webhook;
use crate::routes::email_webhook;
use crate::routes::health_check;

/// The two HTTP surfaces of the process. Ingress (webhooks) and admin
/// (read/retry) bind separately so an operator can expose the former to
/// providers and keep the latter internal; tests bind both to port 0 and ask
/// for the assigned ports.
pub struct Application {
    /// Left private; use `get_port` / `get_admin_port` to access
    port: u16,
    admin_port: u16,
    ingress: Server,
    admin: Server,
}

impl Application {
    /// Bind both listeners, build the connection pool, and assemble the two
    /// apps. The worker loops are spawned separately (see `main.rs`); this is
    /// only the HTTP surface.
    pub async fn build(cfg: Settings) -> Result<Self, anyhow::Error> {
        let host = &cfg.application.host;
        let ingress_listener = TcpListener::bind(format!("{host}:{}", cfg.application.port))?;
        let admin_listener = TcpListener::bind(format!("{host}:{}", cfg.application.admin_port))?;
        let port = ingress_listener.local_addr().unwrap().port();
        let admin_port = admin_listener.local_addr().unwrap().port();

        let pool = get_connection_pool(&cfg.database);
        let ingress = run_ingress(ingress_listener, pool.clone(), cfg.webhooks)?;
        let admin = run_admin(admin_listener, pool, cfg.admin, cfg.pipeline)?;

        Ok(Self {
            port,
            admin_port,
            ingress,
            admin,
        })
    }

    pub fn get_port(&self) -> u16 { self.port }

    pub fn get_admin_port(&self) -> u16 { self.admin_port }

    /// Because this consumes `self`, this should be the final function call
    /// (or passed to `tokio::spawn`)
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        tokio::try_join!(self.ingress, self.admin)?;
        Ok(())
    }
}

/// `connect_lazy` so db-free requests (health_check) never touch the pool
pub fn get_connection_pool(db_cfg: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new().connect_lazy_with(db_cfg.connection())
}

/// The provider-facing endpoints. The server is not responsible for binding
/// to an address, it only listens to an already bound one.
pub fn run_ingress(
    listener: TcpListener,
    pool: PgPool,
    webhooks: WebhookSettings,
) -> Result<Server, anyhow::Error> {
    let pool = Data::new(pool);
    let webhooks = Data::new(webhooks);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default()) // wrap the whole app in tracing middleware
            .route("/health_check", web::get().to(health_check))
            .route("/webhook/email", web::post().to(email_webhook))
            .route("/webhook/chat", web::get().to(chat_verify))
            .route("/webhook/chat", web::post().to(chat_webhook))
            .app_data(pool.clone())
            .app_data(webhooks.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}

/// The operator-facing endpoints, on their own listener.
pub fn run_admin(
    listener: TcpListener,
    pool: PgPool,
    admin_settings: AdminSettings,
    pipeline: PipelineSettings,
) -> Result<Server, anyhow::Error> {
    let pool = Data::new(pool);
    let admin_settings = Data::new(admin_settings);
    let pipeline = Data::new(pipeline);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/admin")
                    .route("/tasks/failed", web::get().to(admin::list_failed_tasks))
                    .route("/outbox/failed", web::get().to(admin::list_failed_outbox))
                    .route("/tasks/{task_id}/retry", web::post().to(admin::retry_task))
                    .route(
                        "/tasks/{task_id}/events",
                        web::get().to(admin::list_task_events),
                    )
                    .route(
                        "/outbox/{outbox_id}/retry",
                        web::post().to(admin::retry_outbox),
                    )
                    .route("/retention/run", web::post().to(admin::run_retention)),
            )
            .app_data(pool.clone())
            .app_data(admin_settings.clone())
            .app_data(pipeline.clone())
    })
    .listen(listener)?
    .run();

    Ok(server)
}
