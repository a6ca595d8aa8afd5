use crate::interpolation::{interpolate_transforms, TimedTransform};
use crate::FrameIdString;
use std::collections::VecDeque;
use stf_clock::{TfDuration, TfStamp, TfTime};
use stf_traits::Transform;

/// Why an edge could not produce a sample for a given time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeTimeError {
    /// The edge holds no data.
    Empty,
    /// The requested time is older than the oldest retained sample.
    Past { requested: TfTime, earliest: TfTime },
    /// The requested time is newer than the newest sample, beyond the allowed extrapolation.
    Future { requested: TfTime, latest: TfTime },
}

/// The sample an edge produced for a lookup.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeSample {
    /// Stamp the sample is valid at. `None` for static edges, which are valid at any time.
    pub stamp: Option<TfTime>,
    pub transform: Transform,
}

/// The ordered history of one `parent -> child` edge.
#[derive(Clone, Debug)]
pub struct TransformBuffer {
    parent: FrameIdString,
    authority: String,
    is_static: bool,
    transforms: VecDeque<TimedTransform>,
    cache_duration: TfDuration,
}

impl TransformBuffer {
    pub fn new(
        parent: FrameIdString,
        authority: impl Into<String>,
        is_static: bool,
        cache_duration: TfDuration,
    ) -> Self {
        Self {
            parent,
            authority: authority.into(),
            is_static,
            transforms: VecDeque::new(),
            cache_duration,
        }
    }

    pub fn parent(&self) -> &FrameIdString {
        &self.parent
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// Adds a sample at its sorted position.
    ///
    /// A sample with the same stamp as a stored one replaces it. A sample older than the retained
    /// window is refused and the oldest stamp still accepted is returned as the error.
    pub fn add_transform(&mut self, sample: TimedTransform, authority: &str) -> Result<(), TfTime> {
        authority.clone_into(&mut self.authority);

        if self.is_static {
            self.transforms.clear();
            self.transforms.push_back(sample);
            return Ok(());
        }

        if let Some(latest) = self.transforms.back() {
            let oldest_allowed = latest.stamp.saturating_sub(self.cache_duration);
            if sample.stamp < oldest_allowed {
                return Err(oldest_allowed);
            }
        }

        let pos = self
            .transforms
            .partition_point(|t| t.stamp < sample.stamp);
        match self.transforms.get_mut(pos) {
            Some(existing) if existing.stamp == sample.stamp => *existing = sample,
            _ => self.transforms.insert(pos, sample),
        }

        self.prune();
        Ok(())
    }

    fn prune(&mut self) {
        let Some(latest) = self.transforms.back().map(|t| t.stamp) else {
            return;
        };
        let oldest_allowed = latest.saturating_sub(self.cache_duration);
        while self
            .transforms
            .front()
            .is_some_and(|t| t.stamp < oldest_allowed)
        {
            self.transforms.pop_front();
        }
    }

    pub fn get_latest_transform(&self) -> Option<&TimedTransform> {
        self.transforms.back()
    }

    /// (oldest, newest) stamps currently retained.
    pub fn get_time_range(&self) -> Option<(TfTime, TfTime)> {
        match (self.transforms.front(), self.transforms.back()) {
            (Some(first), Some(last)) => Some((first.stamp, last.stamp)),
            _ => None,
        }
    }

    /// Resolves the edge at `time`.
    ///
    /// `future_limit` is how far past the newest sample a lookup may extrapolate.
    pub fn sample_at(
        &self,
        time: TfStamp,
        future_limit: Option<TfDuration>,
    ) -> Result<EdgeSample, EdgeTimeError> {
        let (first, last) = match (self.transforms.front(), self.transforms.back()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(EdgeTimeError::Empty),
        };

        if self.is_static {
            return Ok(EdgeSample {
                stamp: None,
                transform: last.transform,
            });
        }

        let time = match time {
            TfStamp::Latest => {
                return Ok(EdgeSample {
                    stamp: Some(last.stamp),
                    transform: last.transform,
                })
            }
            TfStamp::At(time) => time,
        };

        if time < first.stamp {
            return Err(EdgeTimeError::Past {
                requested: time,
                earliest: first.stamp,
            });
        }

        if time > last.stamp {
            let within_limit =
                future_limit.is_some_and(|limit| time.saturating_sub(last.stamp) <= limit);
            if !within_limit {
                return Err(EdgeTimeError::Future {
                    requested: time,
                    latest: last.stamp,
                });
            }
            let transform = match self.transforms.len() {
                1 => last.transform,
                n => interpolate_transforms(&self.transforms[n - 2], last, time),
            };
            return Ok(EdgeSample {
                stamp: Some(time),
                transform,
            });
        }

        let pos = self.transforms.partition_point(|t| t.stamp < time);
        let after = &self.transforms[pos];
        let transform = if after.stamp == time {
            after.transform
        } else {
            interpolate_transforms(&self.transforms[pos - 1], after, time)
        };
        Ok(EdgeSample {
            stamp: Some(time),
            transform,
        })
    }
}
