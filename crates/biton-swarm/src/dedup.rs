//! Candidate-address deduplication.

use std::collections::HashSet;
use std::pin::Pin;
use std::task::{Context, Poll};

use biton_core::PeerAddress;
use futures::Stream;

/// Port the DHT uses for placeholder entries that must never be dialed.
pub const SENTINEL_PORT: u16 = 1;

/// Re-emits the first occurrence of each address, in arrival order.
///
/// Sentinel-port entries and addresses without a valid port are dropped. The
/// seen set lives as long as the stream, one discovery run.
pub struct Dedup<S> {
    inner: S,
    seen: HashSet<PeerAddress>,
}

impl<S> Dedup<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            seen: HashSet::new(),
        }
    }
}

pub fn dedup<S>(addresses: S) -> Dedup<S>
where
    S: Stream<Item = PeerAddress> + Unpin,
{
    Dedup::new(addresses)
}

impl<S> Stream for Dedup<S>
where
    S: Stream<Item = PeerAddress> + Unpin,
{
    type Item = PeerAddress;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(address)) => {
                    match address.port() {
                        Some(SENTINEL_PORT) | None => {
                            tracing::trace!(%address, "dropping non-connectable address");
                            continue;
                        }
                        Some(_) => {}
                    }
                    if this.seen.insert(address.clone()) {
                        return Poll::Ready(Some(address));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
