//! Time indexed transform buffer.
//!
//! Each `parent -> child` edge keeps a short history of observations. Lookups walk the frame tree
//! through the lowest common ancestor of the two frames and interpolate every edge on the way at
//! the requested time.
//!
//! ```
//! use stf_buffer::LocalBuffer;
//! use stf_clock::{TfDuration, TfStamp};
//! use stf_traits::{StampedTransform, Transform, TransformLookup};
//! use std::time::Duration;
//!
//! let buffer = LocalBuffer::default();
//! let odom = Transform::from_translation([1.0, 0.0, 0.0]);
//! buffer
//!     .set_transform(&StampedTransform::new("map", "odom", TfDuration::from_secs(1), odom), "doc", false)
//!     .unwrap();
//! let t = buffer
//!     .lookup_transform("map", "odom", TfStamp::Latest, Duration::ZERO)
//!     .unwrap();
//! assert_eq!(t.transform.translation, [1.0, 0.0, 0.0]);
//! ```

mod config;
mod interpolation;
mod local;
mod transform;
mod tree;

pub use config::{BufferConfig, DEFAULT_CACHE_DURATION};
pub use interpolation::{interpolate_transforms, TimedTransform};
pub use local::LocalBuffer;
pub use transform::{EdgeSample, EdgeTimeError, TransformBuffer};
pub use tree::TransformTree;

/// Name of a coordinate frame as stored in the tree.
pub type FrameIdString = compact_str::CompactString;
