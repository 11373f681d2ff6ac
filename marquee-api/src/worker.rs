use marquee_shared::EventHandler;
use marquee_store::{Config, EventConsumer};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::bootstrap::{Backends, Services};

/// Starts the sweeper and one consumer per saga side.
pub fn spawn_workers(config: &Config, backends: &Backends, services: &Services) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::new();

    // 1. Expiration sweeper
    handles.push(tokio::spawn(services.sweeper.clone().run(config.reservation.sweep_interval())));

    // 2. Saga consumers
    let handlers: [Arc<dyn EventHandler>; 2] = [services.showtime_handler.clone(), services.booking_handler.clone()];
    for handler in handlers {
        info!(consumer = handler.name(), "Starting event consumer");
        match &backends.channel {
            Some(channel) => handles.push(channel.spawn_consumer(handler, backends.dedup.clone())),
            None => {
                let consumer = EventConsumer::new(
                    &config.kafka.brokers,
                    &config.kafka.group_id,
                    handler,
                    backends.dedup.clone(),
                )?;
                handles.push(tokio::spawn(consumer.run()));
            }
        }
    }

    Ok(handles)
}
