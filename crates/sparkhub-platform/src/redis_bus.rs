use anyhow::Result;
use redis::{AsyncCommands, Client, aio::PubSub};
use serde::Serialize;

/// Channel carrying `LedgerPostedEvent` payloads, one per committed
/// balance-moving transaction.
pub const LEDGER_POSTED: &str = "ledger.posted";

/// Channel carrying `TopUpSubmittedEvent` payloads for new claims.
pub const TOPUPS_SUBMITTED: &str = "topups.submitted";

/// Redis pub/sub handle shared by the services. Publishing is always
/// post-commit and fire-and-forget; callers log failures and move on.
#[derive(Clone)]
pub struct RedisBus {
    client: Client,
}

impl RedisBus {
    pub fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub async fn publish_json<T: Serialize>(&self, channel: &str, payload: &T) -> Result<()> {
        let mut connection = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(payload)?;
        let _: i64 = connection.publish(channel, serialized).await?;
        Ok(())
    }

    /// Dedicated pub/sub connection already subscribed to `channel`.
    pub async fn subscribe(&self, channel: &str) -> Result<PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(pubsub)
    }
}
