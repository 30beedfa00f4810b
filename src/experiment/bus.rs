//! Per-experiment event queue
//!
//! The bridge between background work and the async streaming layer is one
//! single-producer-ish/single-consumer queue per experiment: any thread may
//! post (the send never blocks), and exactly one relay task drains. Events
//! posted before a client connects are retained; the relay sees the full
//! history in production order.

use tokio::sync::mpsc;

use crate::types::StreamFrame;

pub(crate) struct EventQueue {
    tx: mpsc::UnboundedSender<StreamFrame>,
    rx: Option<mpsc::UnboundedReceiver<StreamFrame>>,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }

    /// A cloneable posting handle, safe to call from any thread
    pub(crate) fn sender(&self) -> mpsc::UnboundedSender<StreamFrame> {
        self.tx.clone()
    }

    /// Post an event; never blocks. Returns false if the consumer side is gone.
    pub(crate) fn post(&self, frame: StreamFrame) -> bool {
        self.tx.send(frame).is_ok()
    }

    /// Hand the receiver to the single consumer; subsequent calls get None
    pub(crate) fn take_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<StreamFrame>> {
        self.rx.take()
    }
}
