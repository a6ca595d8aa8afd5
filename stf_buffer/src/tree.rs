use crate::config::BufferConfig;
use crate::interpolation::TimedTransform;
use crate::transform::{EdgeTimeError, TransformBuffer};
use crate::FrameIdString;
use log::{debug, warn};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write;
use stf_clock::{TfStamp, TfTime};
use stf_traits::{
    normalize_frame_id, CanTransform, StampedTransform, TfError, TfResult, Transform,
};

/// The frame graph: every child frame has at most one parent edge, each edge keeps its own
/// time indexed history.
#[derive(Debug, Default)]
pub struct TransformTree {
    config: BufferConfig,
    /// Edges keyed by their child frame.
    edges: HashMap<FrameIdString, TransformBuffer>,
    frames: BTreeSet<FrameIdString>,
}

/// The resolved composition of one half path, from an ancestor down to a frame.
struct HalfPath {
    transform: Transform,
    oldest_stamp: Option<TfTime>,
}

impl TransformTree {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            config,
            edges: HashMap::new(),
            frames: BTreeSet::new(),
        }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Inserts one observation of the edge between `parent_frame` and `child_frame`.
    ///
    /// The observation maps points of the child frame into the parent frame, so
    /// `lookup_transform(parent, child, ..)` returns it as stored.
    ///
    /// Re-parenting a child drops its previous history. An edge that would close a loop is
    /// refused.
    pub fn set_transform(
        &mut self,
        observation: &StampedTransform,
        authority: &str,
        is_static: bool,
    ) -> TfResult<()> {
        let parent = normalize_frame_id(&observation.parent_frame)?;
        let child = normalize_frame_id(&observation.child_frame)?;

        if parent == child {
            return Err(TfError::InvalidArgument(format!(
                "TF_SELF_TRANSFORM: Ignoring transform from authority \"{authority}\" with frame_id and child_frame_id \"{child}\" because they are the same"
            )));
        }

        let transform = observation.transform.normalized().ok_or_else(|| {
            TfError::InvalidArgument(format!(
                "TF_DENORMALIZED_QUATERNION: Ignoring transform for child_frame_id \"{child}\" from authority \"{authority}\" because of an invalid quaternion or a non finite value: {}",
                observation.transform
            ))
        })?;

        if self.ancestors(parent).iter().any(|f| f == child) {
            return Err(TfError::InvalidArgument(format!(
                "Ignoring transform from \"{parent}\" to \"{child}\" from authority \"{authority}\": it would create a loop in the frame tree"
            )));
        }

        let parent_id = FrameIdString::from(parent);
        let child_id = FrameIdString::from(child);
        let cache_window = self.config.cache_window();

        let replace = match self.edges.get(&child_id) {
            None => true,
            Some(edge) if edge.parent() != &parent_id => {
                warn!(
                    "Frame \"{child}\" re-parented from \"{}\" to \"{parent}\" by authority \"{authority}\", dropping its history",
                    edge.parent()
                );
                true
            }
            Some(edge) => edge.is_static() != is_static,
        };
        if replace {
            self.edges.insert(
                child_id.clone(),
                TransformBuffer::new(parent_id.clone(), authority, is_static, cache_window),
            );
        }

        let edge = self.edges.get_mut(&child_id).ok_or_else(|| {
            TfError::Lookup(format!("edge for \"{child}\" vanished during insertion"))
        })?;
        edge.add_transform(TimedTransform::new(observation.stamp, transform), authority)
            .map_err(|oldest_allowed| {
                TfError::past(format!(
                    "TF_OLD_DATA ignoring data from the past for frame \"{child}\" at time {:.9} according to authority \"{authority}\". Data must be newer than {:.9}",
                    observation.stamp.as_secs_f64(),
                    oldest_allowed.as_secs_f64()
                ))
            })?;

        self.frames.insert(parent_id);
        self.frames.insert(child_id);
        Ok(())
    }

    /// The frame itself followed by its ancestors up to the root of its tree.
    fn ancestors(&self, frame: &str) -> Vec<FrameIdString> {
        let mut chain = vec![FrameIdString::from(frame)];
        let mut current = FrameIdString::from(frame);
        while let Some(edge) = self.edges.get(&current) {
            current = edge.parent().clone();
            // the tree refuses loops at insertion, this only bounds a corrupted graph
            if chain.len() > self.edges.len() {
                break;
            }
            chain.push(current.clone());
        }
        chain
    }

    fn check_frame<'a>(&self, frame: &'a str, argument: &str) -> TfResult<&'a str> {
        let frame = normalize_frame_id(frame)?;
        if !self.frames.contains(frame) {
            return Err(TfError::Lookup(format!(
                "\"{frame}\" passed to lookup_transform argument {argument} does not exist."
            )));
        }
        Ok(frame)
    }

    /// Composes the edges from `chain[0]` up to but excluding `chain[len]`, giving the transform
    /// of `chain[0]` in `chain[len]`.
    fn resolve_half(&self, chain: &[FrameIdString], len: usize, time: TfStamp) -> TfResult<HalfPath> {
        let mut transform = Transform::identity();
        let mut oldest_stamp: Option<TfTime> = None;
        for child in &chain[..len] {
            let edge = self.edges.get(child).ok_or_else(|| {
                TfError::Lookup(format!("frame \"{child}\" has no parent edge"))
            })?;
            let sample = edge
                .sample_at(time, self.config.future_limit())
                .map_err(|e| edge_error(e, edge.parent(), child))?;
            transform = sample.transform * transform;
            if let Some(stamp) = sample.stamp {
                oldest_stamp = Some(oldest_stamp.map_or(stamp, |s| s.min(stamp)));
            }
        }
        Ok(HalfPath {
            transform,
            oldest_stamp,
        })
    }

    /// Transform mapping points from `source_frame` into `target_frame` at `time`.
    pub fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: TfStamp,
    ) -> TfResult<StampedTransform> {
        let target = self.check_frame(target_frame, "target_frame")?;
        let source = self.check_frame(source_frame, "source_frame")?;

        if target == source {
            return Ok(StampedTransform::new(
                target,
                source,
                time.time().unwrap_or_default(),
                Transform::identity(),
            ));
        }

        let source_chain = self.ancestors(source);
        let target_chain = self.ancestors(target);

        let (source_len, target_len) = source_chain
            .iter()
            .enumerate()
            .find_map(|(i, frame)| {
                target_chain
                    .iter()
                    .position(|f| f == frame)
                    .map(|j| (i, j))
            })
            .ok_or_else(|| {
                TfError::Lookup(format!(
                    "Could not find a connection between \"{target}\" and \"{source}\" because they are not part of the same tree. Tf has two or more unconnected trees."
                ))
            })?;

        debug!(
            "lookup {target} <- {source} at {time} through {}",
            source_chain[source_len]
        );

        let lca_source = self.resolve_half(&source_chain, source_len, time)?;
        let lca_target = self.resolve_half(&target_chain, target_len, time)?;

        let stamp = match time {
            TfStamp::At(t) => t,
            TfStamp::Latest => match (lca_source.oldest_stamp, lca_target.oldest_stamp) {
                (Some(a), Some(b)) => a.min(b),
                (Some(a), None) | (None, Some(a)) => a,
                (None, None) => TfTime::default(),
            },
        };

        Ok(StampedTransform::new(
            target,
            source,
            stamp,
            lca_target.transform.inverse() * lca_source.transform,
        ))
    }

    /// Transform from `source_frame` at `source_time` to `target_frame` at `target_time`,
    /// assuming `fixed_frame` does not move in between.
    pub fn lookup_transform_full(
        &self,
        target_frame: &str,
        target_time: TfStamp,
        source_frame: &str,
        source_time: TfStamp,
        fixed_frame: &str,
    ) -> TfResult<StampedTransform> {
        self.check_frame(fixed_frame, "fixed_frame")?;
        let fixed_source = self.lookup_transform(fixed_frame, source_frame, source_time)?;
        let target_fixed = self.lookup_transform(target_frame, fixed_frame, target_time)?;
        Ok(StampedTransform::new(
            target_fixed.parent_frame,
            fixed_source.child_frame,
            target_fixed.stamp,
            target_fixed.transform * fixed_source.transform,
        ))
    }

    pub fn can_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: TfStamp,
    ) -> CanTransform {
        self.lookup_transform(target_frame, source_frame, time).into()
    }

    pub fn can_transform_full(
        &self,
        target_frame: &str,
        target_time: TfStamp,
        source_frame: &str,
        source_time: TfStamp,
        fixed_frame: &str,
    ) -> CanTransform {
        self.lookup_transform_full(
            target_frame,
            target_time,
            source_frame,
            source_time,
            fixed_frame,
        )
        .into()
    }

    pub fn frame_exists(&self, frame: &str) -> bool {
        normalize_frame_id(frame).is_ok_and(|f| self.frames.contains(f))
    }

    /// All known frames, sorted.
    pub fn frames(&self) -> Vec<String> {
        self.frames.iter().map(|f| f.to_string()).collect()
    }

    /// One line per edge: `Frame <child> exists with parent <parent>.`
    pub fn all_frames_as_string(&self) -> String {
        let mut out = String::new();
        for frame in &self.frames {
            if let Some(edge) = self.edges.get(frame) {
                let _ = writeln!(out, "Frame {frame} exists with parent {}.", edge.parent());
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.edges.clear();
        self.frames.clear();
    }
}

fn edge_error(error: EdgeTimeError, parent: &str, child: &str) -> TfError {
    match error {
        EdgeTimeError::Empty => TfError::Lookup(format!(
            "No data for the edge between \"{parent}\" and \"{child}\""
        )),
        EdgeTimeError::Past {
            requested,
            earliest,
        } => TfError::past(format!(
            "Lookup would require extrapolation into the past. Requested time {:.9} but the earliest data is at time {:.9}, when looking up transform from frame \"{child}\" to frame \"{parent}\"",
            requested.as_secs_f64(),
            earliest.as_secs_f64()
        )),
        EdgeTimeError::Future { requested, latest } => TfError::future(format!(
            "Lookup would require extrapolation into the future. Requested time {:.9} but the latest data is at time {:.9}, when looking up transform from frame \"{child}\" to frame \"{parent}\"",
            requested.as_secs_f64(),
            latest.as_secs_f64()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;
    use std::time::Duration;
    use stf_clock::TfDuration;
    use stf_traits::ExtrapolationDirection;

    fn secs(s: f64) -> TfTime {
        TfDuration::from_secs_f64(s)
    }

    fn translation(parent: &str, child: &str, t: f64, x: f64) -> StampedTransform {
        StampedTransform::new(parent, child, secs(t), Transform::from_translation([x, 0.0, 0.0]))
    }

    fn tree() -> TransformTree {
        TransformTree::new(BufferConfig::default())
    }

    #[test]
    fn test_interpolated_lookup() {
        let mut tree = tree();
        tree.set_transform(&translation("A", "B", 1.0, 0.0), "test", false)
            .unwrap();
        tree.set_transform(&translation("A", "B", 2.0, 2.0), "test", false)
            .unwrap();

        // points of A expressed in B: the inverse of the stored B-in-A edge
        let t = tree
            .lookup_transform("B", "A", TfStamp::At(secs(1.5)))
            .unwrap();
        assert_relative_eq!(t.transform.translation[0], -1.0, epsilon = 1e-9);
        assert_eq!(t.parent_frame, "B");
        assert_eq!(t.child_frame, "A");
        assert_eq!(t.stamp, secs(1.5));

        let t = tree
            .lookup_transform("A", "B", TfStamp::At(secs(1.5)))
            .unwrap();
        assert_relative_eq!(t.transform.translation[0], 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_lookup_from_child_into_parent_interpolates() {
        // A expressed in B, sampled at 1.0 and 2.0
        let mut tree = tree();
        tree.set_transform(&translation("B", "A", 1.0, 0.0), "test", false)
            .unwrap();
        tree.set_transform(&translation("B", "A", 2.0, 2.0), "test", false)
            .unwrap();

        let t = tree
            .lookup_transform("B", "A", TfStamp::At(secs(1.5)))
            .unwrap();
        assert_relative_eq!(t.transform.translation[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(t.transform.translation[1], 0.0, epsilon = 1e-9);
        assert_relative_eq!(t.transform.translation[2], 0.0, epsilon = 1e-9);
        assert_eq!(t.stamp, secs(1.5));
    }

    #[test]
    fn test_exact_stamp_returns_stored_sample() {
        let mut tree = tree();
        let stored = Transform::from_rpy([1.0, 2.0, 3.0], 0.1, 0.2, 0.3);
        tree.set_transform(
            &StampedTransform::new("world", "robot", secs(1.0), stored),
            "test",
            false,
        )
        .unwrap();
        let t = tree
            .lookup_transform("world", "robot", TfStamp::At(secs(1.0)))
            .unwrap();
        for i in 0..3 {
            assert_relative_eq!(t.transform.translation[i], stored.translation[i], epsilon = 1e-12);
        }
        for i in 0..4 {
            assert_relative_eq!(t.transform.rotation[i], stored.rotation[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_extrapolation_errors() {
        let mut tree = tree();
        tree.set_transform(&translation("A", "B", 1.0, 0.0), "test", false)
            .unwrap();
        tree.set_transform(&translation("A", "B", 2.0, 2.0), "test", false)
            .unwrap();

        match tree.lookup_transform("A", "B", TfStamp::At(secs(0.5))) {
            Err(TfError::Extrapolation { direction, .. }) => {
                assert_eq!(direction, ExtrapolationDirection::Past)
            }
            other => panic!("unexpected {other:?}"),
        }
        match tree.lookup_transform("A", "B", TfStamp::At(secs(3.0))) {
            Err(TfError::Extrapolation { direction, .. }) => {
                assert_eq!(direction, ExtrapolationDirection::Future)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_future_extrapolation_when_enabled() {
        let mut tree = TransformTree::new(
            BufferConfig::default().with_future_extrapolation(Duration::from_secs(1)),
        );
        tree.set_transform(&translation("A", "B", 1.0, 0.0), "test", false)
            .unwrap();
        tree.set_transform(&translation("A", "B", 2.0, 2.0), "test", false)
            .unwrap();
        let t = tree
            .lookup_transform("A", "B", TfStamp::At(secs(2.5)))
            .unwrap();
        assert_relative_eq!(t.transform.translation[0], 3.0, epsilon = 1e-9);
        assert!(tree
            .lookup_transform("A", "B", TfStamp::At(secs(3.5)))
            .is_err());
    }

    #[test]
    fn test_unknown_frame_and_disconnected_trees() {
        let mut tree = tree();
        tree.set_transform(&translation("A", "B", 1.0, 0.0), "test", false)
            .unwrap();
        tree.set_transform(&translation("C", "D", 1.0, 0.0), "test", false)
            .unwrap();

        assert!(matches!(
            tree.lookup_transform("A", "nope", TfStamp::Latest),
            Err(TfError::Lookup(_))
        ));
        match tree.lookup_transform("B", "D", TfStamp::Latest) {
            Err(TfError::Lookup(msg)) => assert!(msg.contains("not part of the same tree")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_lookup_through_common_ancestor() {
        let mut tree = tree();
        // map <- odom <- base_link <- laser, and base_link <- camera rotated 90 degrees
        tree.set_transform(&translation("map", "odom", 1.0, 10.0), "test", false)
            .unwrap();
        tree.set_transform(&translation("odom", "base_link", 1.0, 1.0), "test", false)
            .unwrap();
        tree.set_transform(&translation("base_link", "laser", 1.0, 0.5), "test", true)
            .unwrap();
        tree.set_transform(
            &StampedTransform::new(
                "base_link",
                "camera",
                secs(1.0),
                Transform::from_rpy([0.0, 1.0, 0.0], 0.0, 0.0, FRAC_PI_2),
            ),
            "test",
            true,
        )
        .unwrap();

        let map_laser = tree
            .lookup_transform("map", "laser", TfStamp::At(secs(1.0)))
            .unwrap();
        assert_relative_eq!(map_laser.transform.translation[0], 11.5, epsilon = 1e-9);

        // laser origin seen from the camera: base_link (0.5, 0) minus camera (0, 1), rotated -90
        let camera_laser = tree
            .lookup_transform("camera", "laser", TfStamp::Latest)
            .unwrap();
        let p = camera_laser.transform.transform_point([0.0, 0.0, 0.0]);
        assert_relative_eq!(p[0], -1.0, epsilon = 1e-9);
        assert_relative_eq!(p[1], -0.5, epsilon = 1e-9);

        // only static edges involved
        assert_eq!(camera_laser.stamp, TfTime::default());
    }

    #[test]
    fn test_latest_uses_each_edge_newest_sample() {
        let mut tree = tree();
        tree.set_transform(&translation("map", "odom", 1.0, 1.0), "test", false)
            .unwrap();
        tree.set_transform(&translation("map", "odom", 3.0, 3.0), "test", false)
            .unwrap();
        tree.set_transform(&translation("odom", "base", 2.0, 5.0), "test", false)
            .unwrap();

        let t = tree
            .lookup_transform("map", "base", TfStamp::Latest)
            .unwrap();
        assert_relative_eq!(t.transform.translation[0], 8.0, epsilon = 1e-9);
        assert_eq!(t.stamp, secs(2.0));
    }

    #[test]
    fn test_zero_stamp_is_a_real_time() {
        let mut tree = tree();
        tree.set_transform(&translation("A", "B", 0.0, 1.0), "test", false)
            .unwrap();
        tree.set_transform(&translation("A", "B", 1.0, 2.0), "test", false)
            .unwrap();
        let at_zero = tree
            .lookup_transform("A", "B", TfStamp::At(TfTime::default()))
            .unwrap();
        assert_relative_eq!(at_zero.transform.translation[0], 1.0);
        let latest = tree.lookup_transform("A", "B", TfStamp::Latest).unwrap();
        assert_relative_eq!(latest.transform.translation[0], 2.0);
    }

    #[test]
    fn test_lookup_full_through_fixed_frame() {
        let mut tree = tree();
        // the robot drives along x in the odom frame
        tree.set_transform(&translation("odom", "base", 1.0, 0.0), "test", false)
            .unwrap();
        tree.set_transform(&translation("odom", "base", 2.0, 1.0), "test", false)
            .unwrap();

        // where the robot was at t=1, seen from the robot at t=2
        let t = tree
            .lookup_transform_full(
                "base",
                TfStamp::At(secs(2.0)),
                "base",
                TfStamp::At(secs(1.0)),
                "odom",
            )
            .unwrap();
        assert_relative_eq!(t.transform.translation[0], -1.0, epsilon = 1e-9);
        assert_eq!(t.stamp, secs(2.0));

        assert!(matches!(
            tree.lookup_transform_full(
                "base",
                TfStamp::Latest,
                "base",
                TfStamp::Latest,
                "missing"
            ),
            Err(TfError::Lookup(_))
        ));
    }

    #[test]
    fn test_same_frame_is_identity() {
        let mut tree = tree();
        tree.set_transform(&translation("A", "B", 1.0, 3.0), "test", false)
            .unwrap();
        let t = tree
            .lookup_transform("B", "/B", TfStamp::At(secs(7.0)))
            .unwrap();
        assert_eq!(t.transform, Transform::identity());
        assert!(tree.lookup_transform("X", "X", TfStamp::Latest).is_err());
    }

    #[test]
    fn test_cycles_and_bad_input_are_refused() {
        let mut tree = tree();
        tree.set_transform(&translation("world", "robot", 1.0, 0.0), "test", false)
            .unwrap();
        tree.set_transform(&translation("robot", "sensor", 1.0, 0.0), "test", false)
            .unwrap();
        assert!(matches!(
            tree.set_transform(&translation("sensor", "world", 1.0, 0.0), "test", false),
            Err(TfError::InvalidArgument(_))
        ));
        assert!(matches!(
            tree.set_transform(&translation("a", "a", 1.0, 0.0), "test", false),
            Err(TfError::InvalidArgument(_))
        ));
        assert!(matches!(
            tree.set_transform(&translation("", "a", 1.0, 0.0), "test", false),
            Err(TfError::InvalidArgument(_))
        ));
        let bad_quat = StampedTransform::new(
            "world",
            "other",
            secs(1.0),
            Transform::new([0.0; 3], [0.0; 4]),
        );
        assert!(matches!(
            tree.set_transform(&bad_quat, "test", false),
            Err(TfError::InvalidArgument(_))
        ));
        assert!(!tree.frame_exists("other"));
    }

    #[test]
    fn test_reparenting_drops_history() {
        let mut tree = tree();
        tree.set_transform(&translation("map", "base", 1.0, 1.0), "test", false)
            .unwrap();
        tree.set_transform(&translation("odom", "base", 2.0, 2.0), "test", false)
            .unwrap();
        assert!(tree.lookup_transform("map", "base", TfStamp::Latest).is_err());
        let t = tree.lookup_transform("odom", "base", TfStamp::Latest).unwrap();
        assert_relative_eq!(t.transform.translation[0], 2.0);
    }

    #[test]
    fn test_old_data_is_refused() {
        let mut tree = TransformTree::new(
            BufferConfig::default().with_cache_duration(Duration::from_secs(1)),
        );
        tree.set_transform(&translation("A", "B", 5.0, 0.0), "test", false)
            .unwrap();
        match tree.set_transform(&translation("A", "B", 1.0, 0.0), "late_node", false) {
            Err(TfError::Extrapolation { direction, message }) => {
                assert_eq!(direction, ExtrapolationDirection::Past);
                assert!(message.contains("TF_OLD_DATA"));
                assert!(message.contains("late_node"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_can_transform_never_fails() {
        let mut tree = tree();
        tree.set_transform(&translation("A", "B", 1.0, 0.0), "test", false)
            .unwrap();
        assert!(tree.can_transform("A", "B", TfStamp::Latest).possible);
        let no = tree.can_transform("A", "C", TfStamp::Latest);
        assert!(!no.possible);
        assert!(no.diagnostic.unwrap().contains("\"C\""));
        let bad = tree.can_transform("A", "with space", TfStamp::Latest);
        assert!(!bad.possible);
        assert!(
            !tree
                .can_transform_full("A", TfStamp::Latest, "B", TfStamp::At(secs(9.0)), "A")
                .possible
        );
    }

    #[test]
    fn test_introspection() {
        let mut tree = tree();
        tree.set_transform(&translation("/map", "odom", 1.0, 0.0), "test", false)
            .unwrap();
        tree.set_transform(&translation("odom", "base", 1.0, 0.0), "test", false)
            .unwrap();
        assert!(tree.frame_exists("map"));
        assert!(tree.frame_exists("/base"));
        assert!(!tree.frame_exists("laser"));
        assert_eq!(tree.frames(), vec!["base", "map", "odom"]);
        assert_eq!(
            tree.all_frames_as_string(),
            "Frame base exists with parent odom.\nFrame odom exists with parent map.\n"
        );
        tree.clear();
        assert!(tree.frames().is_empty());
    }
}
