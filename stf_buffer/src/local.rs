use crate::config::BufferConfig;
use crate::tree::TransformTree;
use log::debug;
use std::sync::{Condvar, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use stf_clock::TfStamp;
use stf_traits::{StampedTransform, TfError, TfResult, TransformLookup};

/// The transform buffer shared between publishers and lookups of one process.
///
/// Lookups run concurrently under a read lock, insertions take the write lock. A lookup with a
/// non zero timeout that cannot be answered yet waits for new insertions until its deadline.
#[derive(Debug)]
pub struct LocalBuffer {
    tree: RwLock<TransformTree>,
    generation: Mutex<u64>,
    inserted: Condvar,
}

impl Default for LocalBuffer {
    fn default() -> Self {
        Self::new(BufferConfig::default())
    }
}

impl LocalBuffer {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            tree: RwLock::new(TransformTree::new(config)),
            generation: Mutex::new(0),
            inserted: Condvar::new(),
        }
    }

    /// Read access to the underlying frame tree, for introspection.
    pub fn read(&self) -> RwLockReadGuard<'_, TransformTree> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, TransformTree> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify_inserted(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        self.inserted.notify_all();
    }

    pub fn set_transform(
        &self,
        observation: &StampedTransform,
        authority: &str,
        is_static: bool,
    ) -> TfResult<()> {
        self.write().set_transform(observation, authority, is_static)?;
        self.notify_inserted();
        Ok(())
    }

    /// Inserts a batch under a single write lock. Returns how many observations were accepted
    /// and the first refusal, if any.
    pub fn set_transforms(
        &self,
        observations: &[StampedTransform],
        authority: &str,
        is_static: bool,
    ) -> (usize, Option<TfError>) {
        let mut accepted = 0;
        let mut first_error = None;
        {
            let mut tree = self.write();
            for observation in observations {
                match tree.set_transform(observation, authority, is_static) {
                    Ok(()) => accepted += 1,
                    Err(e) => {
                        debug!("refused transform from {authority}: {e}");
                        first_error.get_or_insert(e);
                    }
                }
            }
        }
        if accepted > 0 {
            self.notify_inserted();
        }
        (accepted, first_error)
    }

    pub fn clear(&self) {
        self.write().clear();
        self.notify_inserted();
    }

    /// Evaluates `query` against the tree, retrying after each insertion until it succeeds or
    /// `timeout` runs out. Only data availability errors are retried.
    fn wait_for<T>(
        &self,
        timeout: Duration,
        query: impl Fn(&TransformTree) -> TfResult<T>,
    ) -> TfResult<T> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            // read the generation before querying so an insertion in between is not missed
            let seen = *self.generation.lock().unwrap_or_else(PoisonError::into_inner);
            let error = match query(&self.read()) {
                Ok(value) => return Ok(value),
                Err(e @ (TfError::Lookup(_) | TfError::Extrapolation { .. })) => e,
                Err(e) => return Err(e),
            };

            let mut generation = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
            while *generation == seen {
                let remaining = match deadline {
                    Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                    None => Duration::MAX,
                };
                if remaining.is_zero() {
                    return Err(error);
                }
                generation = self
                    .inserted
                    .wait_timeout(generation, remaining)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        }
    }
}

impl TransformLookup for LocalBuffer {
    /// The local buffer is always ready.
    fn wait_for_server(&self, _timeout: Option<Duration>) -> bool {
        true
    }

    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: TfStamp,
        timeout: Duration,
    ) -> TfResult<StampedTransform> {
        self.wait_for(timeout, |tree| {
            tree.lookup_transform(target_frame, source_frame, time)
        })
    }

    fn lookup_transform_full(
        &self,
        target_frame: &str,
        target_time: TfStamp,
        source_frame: &str,
        source_time: TfStamp,
        fixed_frame: &str,
        timeout: Duration,
    ) -> TfResult<StampedTransform> {
        self.wait_for(timeout, |tree| {
            tree.lookup_transform_full(
                target_frame,
                target_time,
                source_frame,
                source_time,
                fixed_frame,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use stf_clock::TfDuration;
    use stf_traits::Transform;

    fn observation(parent: &str, child: &str, stamp_s: u64, x: f64) -> StampedTransform {
        StampedTransform::new(
            parent,
            child,
            TfDuration::from_secs(stamp_s),
            Transform::from_translation([x, 0.0, 0.0]),
        )
    }

    #[test]
    fn test_zero_timeout_answers_immediately() {
        let buffer = LocalBuffer::default();
        let start = Instant::now();
        let result = buffer.lookup_transform("map", "base", TfStamp::Latest, Duration::ZERO);
        assert!(matches!(result, Err(TfError::Lookup(_))));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_waits_for_data() {
        let buffer = Arc::new(LocalBuffer::default());
        let publisher = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                buffer
                    .set_transform(&observation("map", "base", 1, 2.0), "publisher", false)
                    .unwrap();
            })
        };
        let t = buffer
            .lookup_transform("map", "base", TfStamp::Latest, Duration::from_secs(5))
            .unwrap();
        assert_eq!(t.transform.translation[0], 2.0);
        publisher.join().unwrap();
    }

    #[test]
    fn test_wait_gives_up_with_last_error() {
        let buffer = LocalBuffer::default();
        buffer
            .set_transform(&observation("map", "base", 1, 0.0), "test", false)
            .unwrap();
        let start = Instant::now();
        let result = buffer.lookup_transform(
            "map",
            "base",
            TfStamp::At(TfDuration::from_secs(5)),
            Duration::from_millis(100),
        );
        assert!(matches!(result, Err(TfError::Extrapolation { .. })));
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_invalid_argument_is_not_retried() {
        let buffer = LocalBuffer::default();
        let start = Instant::now();
        let result =
            buffer.lookup_transform("", "base", TfStamp::Latest, Duration::from_secs(10));
        assert!(matches!(result, Err(TfError::InvalidArgument(_))));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_batch_insert() {
        let buffer = LocalBuffer::default();
        let (accepted, error) = buffer.set_transforms(
            &[
                observation("map", "odom", 1, 1.0),
                observation("odom", "odom", 1, 1.0),
                observation("odom", "base", 1, 1.0),
            ],
            "batch",
            false,
        );
        assert_eq!(accepted, 2);
        assert!(matches!(error, Some(TfError::InvalidArgument(_))));
        assert!(buffer.read().frame_exists("base"));
        assert!(buffer.wait_for_server(Some(Duration::ZERO)));
        assert!(
            buffer
                .can_transform("map", "base", TfStamp::Latest, Duration::ZERO)
                .possible
        );
    }
}
