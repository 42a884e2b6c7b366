use crate::connection::{SubscriberId, SubscriberReceiver};
use crate::key::BroadcasterKey;
use crate::message::Event;
use crate::session::BroadcasterSession;
use futures::Stream;
use log::*;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A live attachment to one broadcaster's feed.
///
/// Yields the confirmation frame first, then every chat frame fanned out to
/// this subscriber. Dropping it detaches the subscriber from its session, so
/// stream closure downstream is all it takes to unsubscribe.
pub struct Subscription {
    key: BroadcasterKey,
    subscriber_id: SubscriberId,
    receiver: SubscriberReceiver,
    _detach: DetachOnDrop,
}

impl Subscription {
    pub(crate) fn new(
        session: Arc<BroadcasterSession>,
        subscriber_id: SubscriberId,
        receiver: SubscriberReceiver,
    ) -> Self {
        Self {
            key: session.key().clone(),
            subscriber_id: subscriber_id.clone(),
            receiver,
            _detach: DetachOnDrop {
                session,
                subscriber_id,
            },
        }
    }

    pub fn key(&self) -> &BroadcasterKey {
        &self.key
    }

    pub fn subscriber_id(&self) -> &SubscriberId {
        &self.subscriber_id
    }

    /// Waits for the next frame. `None` once the session closed the stream.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

struct DetachOnDrop {
    session: Arc<BroadcasterSession>,
    subscriber_id: SubscriberId,
}

impl Drop for DetachOnDrop {
    fn drop(&mut self) {
        let session = Arc::clone(&self.session);
        let subscriber_id = self.subscriber_id.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    session.detach(&subscriber_id).await;
                });
            }
            Err(_) => warn!(
                "No runtime to detach subscriber {} from @{}",
                subscriber_id.as_str(),
                session.key()
            ),
        }
    }
}
