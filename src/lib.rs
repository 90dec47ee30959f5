pub mod audit;
pub mod authentication;
pub mod chat_client;
pub mod configuration;
pub mod domain;
pub mod email_client;
pub mod extraction;
pub mod ingress;
pub mod queue;
pub mod routes;
pub mod signature;
pub mod startup;
pub mod telemetry;
pub mod users;
pub mod utils;
pub mod workers;
