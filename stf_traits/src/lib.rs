//! Shared vocabulary of the simple tf buffer: the transform types, the error taxonomy and the
//! [`TransformLookup`] capability implemented both in-process and over the wire.

pub mod error;
pub mod frame;
pub mod transform;

pub use error::{
    stf_error_map, ExtrapolationDirection, StfError, StfResult, TfError, TfResult,
};
pub use frame::normalize_frame_id;
pub use transform::{StampedTransform, Transform};

use std::time::Duration;
use stf_clock::TfStamp;

/// Outcome of a can-transform query. It never carries an error, only a reason.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CanTransform {
    pub possible: bool,
    /// Human readable reason when the transform is not possible.
    pub diagnostic: Option<String>,
}

impl CanTransform {
    pub fn yes() -> Self {
        Self {
            possible: true,
            diagnostic: None,
        }
    }

    pub fn no(diagnostic: impl Into<String>) -> Self {
        Self {
            possible: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

impl<T> From<TfResult<T>> for CanTransform {
    fn from(result: TfResult<T>) -> Self {
        match result {
            Ok(_) => CanTransform::yes(),
            Err(e) => CanTransform::no(e.to_string()),
        }
    }
}

impl From<CanTransform> for bool {
    fn from(c: CanTransform) -> bool {
        c.possible
    }
}

/// The transform lookup capability.
///
/// Implemented once against the in-process buffer and once against a remote server, so callers
/// can be written without knowing where the transforms live.
///
/// `timeout` is how long to wait for the requested data to become available. A zero timeout
/// answers from the current state immediately. A remote implementation may block a little longer
/// than `timeout` to receive the answer: the in-flight allowance is added on top of it (see
/// `ClientConfig::response_grace` in `stf-client`).
pub trait TransformLookup: Send + Sync {
    /// Blocks until the backing buffer is ready to answer requests.
    /// `None` waits forever. Returns false if the deadline passed first.
    fn wait_for_server(&self, timeout: Option<Duration>) -> bool;

    /// Transform mapping points from `source_frame` into `target_frame` at `time`.
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: TfStamp,
        timeout: Duration,
    ) -> TfResult<StampedTransform>;

    /// Transform from `source_frame` at `source_time` to `target_frame` at `target_time`,
    /// going through `fixed_frame` which is assumed not to move in between.
    fn lookup_transform_full(
        &self,
        target_frame: &str,
        target_time: TfStamp,
        source_frame: &str,
        source_time: TfStamp,
        fixed_frame: &str,
        timeout: Duration,
    ) -> TfResult<StampedTransform>;

    fn can_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: TfStamp,
        timeout: Duration,
    ) -> CanTransform {
        self.lookup_transform(target_frame, source_frame, time, timeout)
            .into()
    }

    fn can_transform_full(
        &self,
        target_frame: &str,
        target_time: TfStamp,
        source_frame: &str,
        source_time: TfStamp,
        fixed_frame: &str,
        timeout: Duration,
    ) -> CanTransform {
        self.lookup_transform_full(
            target_frame,
            target_time,
            source_frame,
            source_time,
            fixed_frame,
            timeout,
        )
        .into()
    }
}
