use std::pin::Pin;

use anyhow::Context as _;
use bridge_domain::EventStream;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tracing::debug;

pub type JsonEventStream<T> = Pin<Box<dyn Stream<Item = anyhow::Result<T>> + Send>>;

/// Decodes the data of every event as `T`. Empty events and the `[DONE]`
/// marker are dropped.
pub fn json_events<T>(source: EventStream) -> JsonEventStream<T>
where
    T: DeserializeOwned + Send + 'static,
{
    Box::pin(source.filter_map(|event| {
        futures::future::ready(match event {
            Ok(event) if ["[DONE]", ""].contains(&event.data.trim()) => {
                debug!("Received completion from Upstream");
                None
            }
            Ok(event) => Some(
                serde_json::from_str::<T>(&event.data)
                    .with_context(|| format!("Failed to parse stream event: {}", event.data)),
            ),
            Err(error) => Some(Err(error)),
        })
    }))
}
