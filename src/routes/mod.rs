pub mod admin;
mod health_check;
mod webhook_chat;
mod webhook_email;

pub use health_check::health_check;
pub use webhook_chat::chat_verify;
pub use webhook_chat::chat_webhook;
pub use webhook_email::email_webhook;
