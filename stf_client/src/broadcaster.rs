use crate::client::BufferClient;
use log::debug;
use std::sync::Arc;
use stf_clock::RobotClock;
use stf_traits::{StampedTransform, TfResult, Transform};

/// Maximum number of transforms sent in a single publish request.
pub const MAX_TRANSFORMS_PER_PUBLISH: usize = 1024;

/// Publishes transforms into a remote buffer.
pub struct TransformBroadcaster {
    client: Arc<BufferClient>,
    authority: String,
    clock: RobotClock,
}

impl TransformBroadcaster {
    /// `authority` names the publisher in the server diagnostics.
    pub fn new(client: Arc<BufferClient>, authority: impl Into<String>, clock: RobotClock) -> Self {
        Self {
            client,
            authority: authority.into(),
            clock,
        }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Stamps a transform with the current time of the broadcaster clock.
    pub fn stamp_now(
        &self,
        parent_frame: &str,
        child_frame: &str,
        transform: Transform,
    ) -> StampedTransform {
        StampedTransform::new(parent_frame, child_frame, self.clock.now(), transform)
    }

    pub fn send_transform(&self, transform: StampedTransform) -> TfResult<()> {
        self.client
            .publish(vec![transform], &self.authority, false)
            .map(|_| ())
    }

    /// Sends a batch, split in requests of at most [`MAX_TRANSFORMS_PER_PUBLISH`] transforms.
    /// Returns how many the server accepted.
    pub fn send_transforms(&self, transforms: &[StampedTransform]) -> TfResult<u32> {
        self.send_batches(transforms, false)
    }

    /// Static transforms are valid at any time and are never evicted.
    pub fn send_static_transform(&self, transform: StampedTransform) -> TfResult<()> {
        self.client
            .publish(vec![transform], &self.authority, true)
            .map(|_| ())
    }

    pub fn send_static_transforms(&self, transforms: &[StampedTransform]) -> TfResult<u32> {
        self.send_batches(transforms, true)
    }

    fn send_batches(&self, transforms: &[StampedTransform], is_static: bool) -> TfResult<u32> {
        let mut accepted = 0;
        for batch in transforms.chunks(MAX_TRANSFORMS_PER_PUBLISH) {
            accepted += self
                .client
                .publish(batch.to_vec(), &self.authority, is_static)?;
        }
        if accepted as usize != transforms.len() {
            debug!(
                "{}: the server accepted {accepted} of {} transforms",
                self.authority,
                transforms.len()
            );
        }
        Ok(accepted)
    }
}
