use ron::extensions::Extensions;
use ron::Options;
use serde::{Deserialize, Serialize};
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;
use stf_buffer::BufferConfig;
use stf_clock::TfTime;
use stf_protocol::ServerName;
use stf_traits::{StampedTransform, StfError, StfResult, Transform};

pub const DEFAULT_NUM_THREADS: usize = 10;
pub const DEFAULT_MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A transform that never changes, loaded at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticTransformConfig {
    pub parent_frame: String,
    pub child_frame: String,
    #[serde(default)]
    pub translation: [f64; 3],
    /// Quaternion (x, y, z, w).
    #[serde(default = "identity_rotation")]
    pub rotation: [f64; 4],
}

fn identity_rotation() -> [f64; 4] {
    [0.0, 0.0, 0.0, 1.0]
}

impl StaticTransformConfig {
    pub fn to_observation(&self) -> StampedTransform {
        StampedTransform::new(
            self.parent_frame.as_str(),
            self.child_frame.as_str(),
            TfTime::default(),
            Transform::new(self.translation, self.rotation),
        )
    }
}

/// Server configuration, usually read from a RON file.
///
/// ```ron
/// (
///     name: "/robot1/tf_server",
///     num_threads: 4,
///     buffer: (cache_duration: (secs: 20, nanos: 0)),
///     static_transforms: [
///         (parent_frame: "base_link", child_frame: "laser", translation: (0.2, 0.0, 0.1)),
///     ],
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: ServerName,
    /// Handler threads. 0 means one per CPU core.
    pub num_threads: usize,
    /// Upper bound on how long a request may hold a handler waiting for data.
    pub max_request_timeout: Duration,
    pub buffer: BufferConfig,
    pub static_transforms: Vec<StaticTransformConfig>,
    /// Overrides the directory the server socket is created in.
    pub runtime_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: ServerName::default(),
            num_threads: DEFAULT_NUM_THREADS,
            max_request_timeout: DEFAULT_MAX_REQUEST_TIMEOUT,
            buffer: BufferConfig::default(),
            static_transforms: Vec::new(),
            runtime_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn socket_path(&self) -> PathBuf {
        match &self.runtime_dir {
            Some(dir) => self.name.socket_path_in(dir),
            None => self.name.socket_path(),
        }
    }

    fn get_options() -> Options {
        Options::default().with_default_extension(Extensions::IMPLICIT_SOME)
    }

    pub fn serialize_ron(&self) -> StfResult<String> {
        Self::get_options()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| StfError::new_with_cause("Failed to serialize the server configuration", e))
    }
}

/// Read a server configuration from a RON string.
pub fn read_configuration_str(content: &str) -> StfResult<ServerConfig> {
    ServerConfig::get_options()
        .from_str(content)
        .map_err(|e| StfError::new_with_cause("Syntax error in the server configuration", e))
}

/// Read a server configuration from a RON file.
pub fn read_configuration(path: &Path) -> StfResult<ServerConfig> {
    let content = read_to_string(path).map_err(|e| {
        StfError::from(format!(
            "Failed to read configuration file: {}",
            path.display()
        ))
        .add_cause(e)
    })?;
    read_configuration_str(&content)
}
