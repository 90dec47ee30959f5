use sqlx::FromRow;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::Channel;

/// A provisioned account, as resolved from an inbound sender address. The
/// pipeline never writes this table.
#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub user_id: Uuid,
    pub primary_email: String,
    pub chat_number: Option<String>,
    pub display_name: String,
    pub status: String,
}

impl UserRecord {
    /// The address an outbound message for `channel` should go to, if the
    /// user has one there
    pub fn address_on(
        &self,
        channel: Channel,
    ) -> Option<&str> {
        match channel {
            Channel::Email => Some(self.primary_email.as_str()),
            Channel::Chat => self.chat_number.as_deref(),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PreferencesRecord {
    pub user_id: Uuid,
    pub timezone: String,
    pub tone: String,
    pub default_action: String,
    pub fallback_channel: String,
}

impl PreferencesRecord {
    /// Missing or unparseable rows fall back to these; an unprovisioned
    /// preference must never stall the pipeline
    pub fn default_for(user_id: Uuid) -> Self {
        Self {
            user_id,
            timezone: "UTC".to_string(),
            tone: "friendly".to_string(),
            default_action: "remind".to_string(),
            fallback_channel: "email".to_string(),
        }
    }
}

/// Resolve an active user by the identifying column of `channel`. Unknown or
/// non-active senders resolve to `None` (and the webhook reports `ignored`).
#[tracing::instrument(skip(pool))]
pub async fn resolve_active_user(
    pool: &PgPool,
    channel: Channel,
    sender_address: &str,
) -> Result<Option<UserRecord>, sqlx::Error> {
    let query = match channel {
        Channel::Email => {
            r#"
            SELECT user_id, primary_email, chat_number, display_name, status
            FROM users
            WHERE lower(primary_email) = lower($1) AND status = 'active'
        "#
        }
        Channel::Chat => {
            r#"
            SELECT user_id, primary_email, chat_number, display_name, status
            FROM users
            WHERE chat_number = $1 AND status = 'active'
        "#
        }
    };
    sqlx::query_as::<_, UserRecord>(query)
        .bind(sender_address)
        .fetch_optional(pool)
        .await
}

pub async fn get_user(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Option<UserRecord>, sqlx::Error> {
    sqlx::query_as::<_, UserRecord>(
        r#"
        SELECT user_id, primary_email, chat_number, display_name, status
        FROM users
        WHERE user_id = $1
    "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn get_preferences(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<PreferencesRecord, sqlx::Error> {
    let prefs = sqlx::query_as::<_, PreferencesRecord>(
        r#"
        SELECT user_id, timezone, tone, default_action, fallback_channel
        FROM preferences
        WHERE user_id = $1
    "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    Ok(prefs.unwrap_or_else(|| PreferencesRecord::default_for(user_id)))
}
