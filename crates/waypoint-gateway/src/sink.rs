use futures::future::BoxFuture;
use tokio::sync::mpsc;

use waypoint_core::error::{Result, WaypointError};

use crate::protocol::DomainEvent;

/// Destination for translated events, usually one client connection.
pub trait EventSink: Send {
    /// Push one event. Fails with [`WaypointError::SinkClosed`] once the
    /// remote side is gone.
    fn send(&mut self, event: DomainEvent) -> BoxFuture<'_, Result<()>>;

    /// Resolves when the remote side disconnects.
    fn closed(&self) -> BoxFuture<'_, ()>;
}

/// Sink backed by a bounded channel; the receiving half feeds the transport.
pub struct ChannelSink {
    tx: mpsc::Sender<DomainEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DomainEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn send(&mut self, event: DomainEvent) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.tx
                .send(event)
                .await
                .map_err(|_| WaypointError::SinkClosed)
        })
    }

    fn closed(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.tx.closed())
    }
}
