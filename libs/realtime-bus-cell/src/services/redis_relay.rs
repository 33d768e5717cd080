use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use futures::StreamExt;
use redis::AsyncCommands;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{BusError, ChangeNotification, EventBus, EventRelay, Topic};

const CHANNEL_PREFIX: &str = "front_desk_events";

/// Redis channel carrying notifications for `topic`.
pub fn channel_for(topic: &Topic) -> String {
    format!("{}:{}", CHANNEL_PREFIX, topic)
}

/// Fans bus notifications out across API instances through Redis pub/sub.
pub struct RedisRelay {
    pool: Pool,
    redis_url: String,
}

impl RedisRelay {
    pub async fn connect(redis_url: &str) -> Result<Self, BusError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            BusError::RedisError(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "Failed to create Redis pool",
                format!("Pool creation error: {}", e),
            )))
        })?;

        let relay = Self {
            pool,
            redis_url: redis_url.to_string(),
        };

        let mut conn = relay.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis event relay connected");

        Ok(relay)
    }

    /// Pattern-subscribes to every front-desk channel and re-delivers remote
    /// notifications into `bus`. Runs until the Redis connection drops.
    pub async fn spawn_listener(&self, bus: EventBus) -> Result<JoinHandle<()>, BusError> {
        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut pubsub = client.get_async_connection().await?.into_pubsub();
        pubsub.psubscribe(format!("{}:*", CHANNEL_PREFIX)).await?;

        info!("Redis event relay listening on {}:*", CHANNEL_PREFIX);

        Ok(tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(message) = messages.next().await {
                let payload: String = match message.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("Unreadable relay payload: {}", e);
                        continue;
                    }
                };

                match serde_json::from_str::<ChangeNotification>(&payload) {
                    Ok(notification) => {
                        let delivered = bus.deliver_remote(notification).await;
                        debug!("Relayed remote notification to {} subscribers", delivered);
                    }
                    Err(e) => warn!("Discarding malformed relay payload: {}", e),
                }

                if !bus.is_open() {
                    break;
                }
            }
            error!("Redis event relay listener stopped");
        }))
    }

    async fn get_connection(&self) -> Result<Connection, BusError> {
        self.pool.get().await.map_err(|e| {
            BusError::RedisError(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "Failed to get Redis connection",
                e.to_string(),
            )))
        })
    }
}

#[async_trait]
impl EventRelay for RedisRelay {
    async fn relay(&self, notification: &ChangeNotification) -> Result<(), BusError> {
        let payload = serde_json::to_string(notification)?;
        let mut conn = self.get_connection().await?;

        let receivers: i64 = conn.publish(channel_for(&notification.topic), payload).await?;
        debug!("Relayed {} to {} Redis subscribers", notification.topic, receivers);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    #[test]
    fn channels_are_namespaced_by_topic() {
        let id = Uuid::nil();
        assert_eq!(
            channel_for(&Topic::Appointment(id)),
            "front_desk_events:appointment:00000000-0000-0000-0000-000000000000"
        );
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(channel_for(&Topic::DailyQueue(day)), "front_desk_events:day:2024-01-02");
    }
}
