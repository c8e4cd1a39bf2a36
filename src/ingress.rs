//! Ingress - routes wire frames onto per-instrument inbound channels.
//!
//! Sits on the transport side of the channel. Malformed input (short
//! frames, unknown instrument indices) is logged and dropped here so it
//! never reaches a book. Each transport thread owns its own `Ingress`
//! (clone one per producer); the senders behind it are shared.

use crossbeam::channel::{Sender, TrySendError};
use serde::Serialize;

use crate::codec::{DecodeError, MAX_INSTRUMENT_INDEX, ORDER_REQUEST_SIZE};
use crate::command::OrderRequest;
use crate::config::ConfigError;

/// What a producer does when an instrument's inbound channel is full.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    /// Wait for space (back-pressure onto the transport)
    #[default]
    Block,
    /// Drop the request and count it
    Drop,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngressError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("No book registered for instrument {0}")]
    UnknownInstrument(u16),
    #[error("Inbound channel for instrument {0} is full")]
    Full(u16),
    #[error("Inbound channel for instrument {0} is closed")]
    Closed(u16),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngressStats {
    pub published: u64,
    pub malformed: u64,
    pub unknown_instrument: u64,
    pub dropped_full: u64,
    pub closed: u64,
}

#[derive(Clone)]
pub struct Ingress {
    /// Indexed by instrument index
    routes: Vec<Option<Sender<OrderRequest>>>,
    overflow: Overflow,
    stats: IngressStats,
}

impl Ingress {
    pub fn new(overflow: Overflow) -> Self {
        Self {
            routes: Vec::new(),
            overflow,
            stats: IngressStats::default(),
        }
    }

    /// Route requests for `index` to `sender`, replacing any earlier route.
    pub fn register(&mut self, index: u16, sender: Sender<OrderRequest>) -> Result<(), ConfigError> {
        if index > MAX_INSTRUMENT_INDEX {
            return Err(ConfigError::IndexOutOfRange(index));
        }
        let slot = index as usize;
        if self.routes.len() <= slot {
            self.routes.resize(slot + 1, None);
        }
        self.routes[slot] = Some(sender);
        Ok(())
    }

    /// Publish an already-decoded request.
    pub fn publish(&mut self, request: OrderRequest) -> Result<(), IngressError> {
        let index = request.instrument_index;
        let Some(sender) = self.routes.get(index as usize).and_then(Option::as_ref) else {
            self.stats.unknown_instrument += 1;
            return Err(IngressError::UnknownInstrument(index));
        };

        let sent = match self.overflow {
            Overflow::Block => sender.send(request).map_err(|_| IngressError::Closed(index)),
            Overflow::Drop => sender.try_send(request).map_err(|e| match e {
                TrySendError::Full(_) => IngressError::Full(index),
                TrySendError::Disconnected(_) => IngressError::Closed(index),
            }),
        };

        match sent {
            Ok(()) => self.stats.published += 1,
            Err(IngressError::Full(_)) => self.stats.dropped_full += 1,
            Err(_) => self.stats.closed += 1,
        }
        sent
    }

    /// Decode one frame and publish it.
    pub fn publish_frame(&mut self, frame: &[u8]) -> Result<(), IngressError> {
        let request = OrderRequest::from_bytes(frame).map_err(|e| {
            self.stats.malformed += 1;
            IngressError::from(e)
        })?;
        self.publish(request)
    }

    /// Walk a buffer of back-to-back 11-byte frames, publishing each.
    ///
    /// Frames that cannot be delivered are logged and dropped; a trailing
    /// partial frame is dropped too. Returns the number published.
    pub fn publish_stream(&mut self, bytes: &[u8]) -> usize {
        let mut published = 0;
        for frame in bytes.chunks(ORDER_REQUEST_SIZE) {
            match self.publish_frame(frame) {
                Ok(()) => published += 1,
                Err(IngressError::Full(index)) => {
                    tracing::debug!(instrument = index, "inbound channel full, request dropped");
                }
                Err(err) => {
                    tracing::warn!(error = %err, bytes = frame.len(), "dropping inbound frame");
                }
            }
        }
        published
    }

    pub fn stats(&self) -> IngressStats {
        self.stats
    }

    pub fn overflow(&self) -> Overflow {
        self.overflow
    }
}
