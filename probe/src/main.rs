//! rtlink probe binary.
//!
//! Holds a gateway connection (and, when `RTLINK_SUBSCRIPTION_URL` is set,
//! the standing subscriptions) open until Ctrl-C, logging everything it sees.

use std::env;

use rtlink_client::{actions, ConnectionManager};
use rtlink_subscriptions::{SubscriptionConfig, SubscriptionRegistry, Topic};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,rtlink_client=debug,rtlink_subscriptions=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let manager = ConnectionManager::from_env()?;
    let user_id = env::var("RTLINK_USER_ID").ok();

    tracing::info!("Starting rtlink probe");
    tracing::info!("Gateway URL: {}", manager.client().config().url);
    tracing::info!("User: {}", user_id.as_deref().unwrap_or("<anonymous>"));

    manager.set_user_id(user_id.clone());

    let _state = manager.on_connection_state_change(|state| {
        tracing::info!(
            status = %state.status,
            connection_id = ?state.connection_id,
            attempts = state.reconnect_attempts,
            "connection state changed"
        );
    });
    let _pong = manager.on_message(actions::PONG, |msg| {
        tracing::debug!(data = ?msg.data, "pong");
        Ok(())
    });
    let _inbound = manager.client().on_message(|msg| {
        tracing::debug!(action = %msg.action, "inbound message");
    });
    let _failed = manager.client().on_reconnect_failed(|| {
        tracing::error!("gateway unreachable; giving up");
    });

    let registry = match (env::var("RTLINK_SUBSCRIPTION_URL"), &user_id) {
        (Ok(_), Some(user_id)) => {
            let registry = SubscriptionRegistry::with_config(SubscriptionConfig::from_env()?)?;
            let mut handles = Vec::new();
            for topic in Topic::STANDING {
                handles.push(registry.on_event(topic, move |event| {
                    tracing::info!(
                        %topic,
                        action = ?event.action(),
                        status = ?event.status(),
                        payload = %serde_json::Value::to_string(&event.payload),
                        "subscription event"
                    );
                }));
            }
            registry.start(user_id);
            Some((registry, handles))
        }
        (Ok(_), None) => {
            tracing::warn!("RTLINK_USER_ID not set; skipping subscriptions");
            None
        }
        (Err(_), _) => None,
    };

    if let Err(err) = manager.connect().await {
        tracing::warn!(error = %err, "initial connect failed");
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down rtlink probe");

    if let Some((registry, handles)) = registry {
        for handle in handles {
            handle.unsubscribe();
        }
        registry.shutdown();
    }
    manager.shutdown();

    let metrics = manager.metrics();
    tracing::info!(
        sent = metrics.messages_sent(),
        received = metrics.frames_received(),
        reconnects = metrics.reconnect_attempts(),
        "final metrics"
    );

    Ok(())
}
