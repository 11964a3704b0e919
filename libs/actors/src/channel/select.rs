//! Fan-in of several receivers into one

use super::{channel_in, Receiver, Sender};
use crate::error::{Result, SpindleError};
use crate::registry::Registry;
use futures::future::join_all;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

/// Merge `sources` into a single receiver that ends after all of them do
///
/// One forwarding task per source pumps items into a shared sender, each
/// waiting for its previous item to be taken before forwarding the next.
/// Arrival order across sources is whatever the scheduler produces. The
/// merged channel marshals with the first source's registry.
pub fn select(sources: Vec<Receiver>) -> Result<Receiver> {
    let runtime = Handle::try_current().map_err(|_| SpindleError::NoRuntime {
        operation: "selecting over channels",
    })?;
    let registry = sources
        .first()
        .map(|source| Arc::clone(source.registry()))
        .unwrap_or_else(Registry::current);
    let (sink, merged) = channel_in(registry);
    let count = sources.len();

    let forwards: Vec<_> = sources
        .into_iter()
        .enumerate()
        .map(|(index, source)| runtime.spawn(forward(index, source, sink.clone())))
        .collect();

    runtime.spawn(async move {
        for (index, joined) in join_all(forwards).await.into_iter().enumerate() {
            match joined {
                Ok(Ok(forwarded)) => trace!(source = index, forwarded, "Select source exhausted"),
                Ok(Err(err)) => warn!(source = index, error = %err, "Select source failed"),
                Err(err) => warn!(source = index, error = %err, "Select forwarder aborted"),
            }
        }
        match sink.end() {
            Ok(delivery) => {
                if let Err(err) = delivery.await {
                    debug!(error = %err, "Merged receiver gone before end of stream");
                }
            }
            Err(err) => warn!(error = %err, "Could not end merged channel"),
        }
    });

    debug!(sources = count, merged = %merged.id(), "Selecting over channels");
    Ok(merged)
}

async fn forward(index: usize, mut source: Receiver, sink: Sender) -> Result<u64> {
    let mut forwarded = 0;
    while let Some(item) = source.receive().await? {
        trace!(source = index, "Forwarding selected item");
        sink.send(item)?.await?;
        forwarded += 1;
    }
    Ok(forwarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;
    use spindle_codec::Value;
    use std::time::Duration;

    #[tokio::test]
    async fn test_merges_every_item_then_ends() {
        let mut sources = Vec::new();
        let mut producers = Vec::new();
        for base in [0i64, 100, 200] {
            let (sender, receiver) = channel();
            sources.push(receiver);
            producers.push(tokio::spawn(async move {
                for offset in 0..3 {
                    sender.send(base + offset)?.await?;
                }
                sender.end()?.await
            }));
        }

        let mut merged = select(sources).unwrap();
        let mut items = Vec::new();
        while let Some(item) = merged.receive_as::<i64>().await.unwrap() {
            items.push(item);
        }
        items.sort_unstable();
        assert_eq!(items, vec![0, 1, 2, 100, 101, 102, 200, 201, 202]);

        for producer in producers {
            producer.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_ends_only_after_every_source_ends() {
        let (first, first_rx) = channel();
        let (second, second_rx) = channel();
        let (third, third_rx) = channel();
        let mut merged = select(vec![first_rx, second_rx, third_rx]).unwrap();

        let early = tokio::spawn(async move {
            first.send(1)?.await?;
            first.send(2)?.await?;
            first.end()?.await?;
            third.end()?.await
        });
        let mut items = Vec::new();
        for _ in 0..2 {
            items.push(merged.receive_as::<i64>().await.unwrap().unwrap());
        }
        early.await.unwrap().unwrap();

        // Two sources are done, the second is still open.
        let open = tokio::time::timeout(Duration::from_millis(100), merged.receive()).await;
        assert!(open.is_err(), "merged stream ended while a source was open");
        assert!(!merged.is_finished());

        let late = tokio::spawn(async move {
            second.send(10)?.await?;
            second.end()?.await
        });
        items.push(merged.receive_as::<i64>().await.unwrap().unwrap());
        assert_eq!(merged.receive().await.unwrap(), None::<Value>);
        assert!(merged.is_finished());
        late.await.unwrap().unwrap();

        items.sort_unstable();
        assert_eq!(items, vec![1, 2, 10]);
    }

    #[tokio::test]
    async fn test_no_sources_ends_immediately() {
        let mut merged = select(Vec::new()).unwrap();
        assert_eq!(merged.receive().await.unwrap(), None::<Value>);
    }

    #[test]
    fn test_requires_runtime() {
        let (_sender, receiver) = channel();
        assert!(matches!(
            select(vec![receiver]),
            Err(SpindleError::NoRuntime { .. })
        ));
    }
}
