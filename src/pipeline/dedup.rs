//! Per-destination duplicate suppression.

use super::{status_channel, StatusReceiver, StatusSender, CHANNEL_CAPACITY};
use feedroom_core::{BoundedCache, CacheError, StatusId};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const SEEN_BUCKETS: usize = 8;
const SEEN_BUCKET_CAPACITY: usize = 3;

/// Start a duplicate suppressor for one destination.
///
/// Returns the status input and a side channel for marking IDs as seen
/// without forwarding anything. Each status is first forwarded to `mirror`,
/// then to `pass` unless its ID was already seen.
pub fn attach(
    name: impl Into<String>,
    pass: StatusSender,
    mirror: Option<StatusSender>,
) -> Result<(StatusSender, mpsc::Sender<StatusId>), CacheError> {
    let seen = BoundedCache::new(SEEN_BUCKETS, SEEN_BUCKET_CAPACITY)?;
    let (input, input_rx) = status_channel();
    let (mark_seen, mark_seen_rx) = mpsc::channel(CHANNEL_CAPACITY);

    tokio::spawn(run(name.into(), seen, input_rx, mark_seen_rx, pass, mirror));
    Ok((input, mark_seen))
}

async fn run(
    name: String,
    mut seen: BoundedCache<()>,
    mut input: StatusReceiver,
    mut mark_seen: mpsc::Receiver<StatusId>,
    pass: StatusSender,
    mut mirror: Option<StatusSender>,
) {
    info!("dedup {name}: started");
    loop {
        tokio::select! {
            next = input.recv() => {
                let Some(status) = next else { break };

                if let Some(tx) = &mirror {
                    if tx.send(status.clone()).await.is_err() {
                        warn!("dedup {name}: mirror closed, detaching");
                        mirror = None;
                    }
                }

                if seen.contains(status.id.as_str()) {
                    debug!("dedup {name}: {} already seen", status.id);
                    continue;
                }
                seen.set(status.id.as_str(), ());

                if pass.send(status).await.is_err() {
                    warn!("dedup {name}: output closed, stopping");
                    break;
                }
            }
            Some(id) = mark_seen.recv() => {
                debug!("dedup {name}: marking {id} seen");
                seen.set(id.0, ());
            }
        }
    }
    info!("dedup {name}: input closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::status;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn same_id_passes_once_but_mirrors_twice() {
        let (pass_tx, mut pass_rx) = status_channel();
        let (mirror_tx, mut mirror_rx) = status_channel();
        let (input, _mark) = attach("room", pass_tx, Some(mirror_tx)).unwrap();

        input.send(Arc::new(status("5", "me"))).await.unwrap();
        input.send(Arc::new(status("5", "me"))).await.unwrap();
        drop(input);

        assert_eq!(pass_rx.recv().await.unwrap().id.as_str(), "5");
        assert!(pass_rx.recv().await.is_none());

        assert_eq!(mirror_rx.recv().await.unwrap().id.as_str(), "5");
        assert_eq!(mirror_rx.recv().await.unwrap().id.as_str(), "5");
        assert!(mirror_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn marked_status_is_dropped_but_still_mirrored() {
        let (pass_tx, mut pass_rx) = status_channel();
        let (mirror_tx, mut mirror_rx) = status_channel();
        let (input, mark) = attach("control", pass_tx, Some(mirror_tx)).unwrap();

        mark.send(StatusId::from("9")).await.unwrap();
        // select! picks randomly among ready branches; let the mark land first.
        while mark.capacity() < CHANNEL_CAPACITY {
            tokio::task::yield_now().await;
        }

        input.send(Arc::new(status("9", "me"))).await.unwrap();
        input.send(Arc::new(status("10", "me"))).await.unwrap();

        assert_eq!(mirror_rx.recv().await.unwrap().id.as_str(), "9");
        assert_eq!(mirror_rx.recv().await.unwrap().id.as_str(), "10");
        assert_eq!(pass_rx.recv().await.unwrap().id.as_str(), "10");
        assert!(timeout(Duration::from_millis(100), pass_rx.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn closing_input_closes_pass() {
        let (pass_tx, mut pass_rx) = status_channel();
        let (input, mark) = attach("room", pass_tx, None).unwrap();
        drop(input);
        assert!(timeout(Duration::from_secs(1), pass_rx.recv())
            .await
            .unwrap()
            .is_none());
        drop(mark);
    }
}
