use stf_clock::TfTime;
use stf_traits::Transform;

/// A sample of one edge: the transform of the child in its parent at `stamp`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimedTransform {
    pub stamp: TfTime,
    pub transform: Transform,
}

impl TimedTransform {
    pub fn new(stamp: impl Into<TfTime>, transform: Transform) -> Self {
        Self {
            stamp: stamp.into(),
            transform,
        }
    }
}

/// Interpolate between two samples of the same edge at a specific time point.
///
/// Translation is linearly interpolated, rotation is spherically interpolated. `time` may lie
/// after `after.stamp`, in which case the motion between the two samples is extrapolated.
/// Two samples with the same stamp yield `before` unchanged.
pub fn interpolate_transforms(
    before: &TimedTransform,
    after: &TimedTransform,
    time: TfTime,
) -> Transform {
    let before_nanos = before.stamp.as_nanos() as f64;
    let after_nanos = after.stamp.as_nanos() as f64;
    let span = after_nanos - before_nanos;
    if span <= 0.0 {
        return before.transform;
    }
    let ratio = (time.as_nanos() as f64 - before_nanos) / span;
    before.transform.interpolate(&after.transform, ratio)
}
