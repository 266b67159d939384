//! Redis pub/sub subscription feeding an [`InvalidationListener`]

use futures::StreamExt;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::InvalidationListener;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300); // 5 minutes

/// Background task subscribed to the invalidation channel.
///
/// Reconnects with exponential backoff when the connection drops. Messages
/// published while disconnected are lost, so after every reconnect the
/// listener's local caches are cleared before processing resumes.
pub struct RedisInvalidationSubscriber;

impl RedisInvalidationSubscriber {
    pub fn spawn(
        redis_client: redis::Client,
        channel: String,
        listener: Arc<InvalidationListener>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut backoff = Backoff::default();
            let mut subscribed_before = false;

            loop {
                let delay =
                    match listen(&redis_client, &channel, &listener, &mut subscribed_before).await
                    {
                        Ok(()) => {
                            warn!(channel = %channel, "Invalidation subscription closed, reconnecting");
                            backoff.reset();
                            INITIAL_BACKOFF
                        }
                        Err(e) => {
                            let delay = backoff.next_delay();
                            error!(
                                channel = %channel,
                                error = %e,
                                backoff_secs = delay.as_secs(),
                                "Invalidation subscriber error, reconnecting"
                            );
                            delay
                        }
                    };
                tokio::time::sleep(delay).await;
            }
        })
    }
}

/// Reconnect delays: 1s, 2s, 4s, ... capped at [`MAX_BACKOFF`]
struct Backoff {
    current: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            current: INITIAL_BACKOFF,
        }
    }
}

impl Backoff {
    /// Delay to wait now; the following one is doubled.
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(MAX_BACKOFF);
        delay
    }

    fn reset(&mut self) {
        self.current = INITIAL_BACKOFF;
    }
}

async fn listen(
    redis_client: &redis::Client,
    channel: &str,
    listener: &InvalidationListener,
    subscribed_before: &mut bool,
) -> Result<(), redis::RedisError> {
    let mut pubsub = redis_client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;
    info!(channel, "Subscribed to invalidation channel");

    if *subscribed_before {
        listener.resync().await;
    }
    *subscribed_before = true;

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        match msg.get_payload::<String>() {
            Ok(payload) => {
                listener.on_message(&payload).await;
            }
            Err(e) => {
                warn!(channel, error = %e, "Failed to decode invalidation payload");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_starts_at_initial_and_caps() {
        let mut backoff = Backoff::default();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));

        for _ in 0..20 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), MAX_BACKOFF);

        backoff.reset();
        assert_eq!(backoff.next_delay(), INITIAL_BACKOFF);
    }
}
