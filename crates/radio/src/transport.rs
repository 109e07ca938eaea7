//! Fire-and-forget datagram service used by the DRAND driver.

use async_trait::async_trait;
use bytes::Bytes;
use drand_tdma_core::{Destination, LinkAddr};

use crate::RadioError;

/// Broadcast and unicast primitive of the link layer.
///
/// Delivery and ordering are not guaranteed. A successful `send` only means
/// the frame was handed to the radio.
#[async_trait]
pub trait Transport: Send + Sync {
    fn local_addr(&self) -> LinkAddr;

    async fn send(&self, dest: Destination, payload: Bytes) -> Result<(), RadioError>;

    /// Waits for the next frame addressed to this node or broadcast.
    async fn receive(&self) -> Result<(LinkAddr, Bytes), RadioError>;
}
