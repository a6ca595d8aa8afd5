use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use stf_traits::{StfError, StfResult};

/// Environment variable overriding where server sockets live.
pub const RUNTIME_DIR_ENV: &str = "STF_RUNTIME_DIR";

pub const DEFAULT_SERVER_NAME: &str = "/simple_tf_buffer_server";

/// Directory holding the server sockets: `$STF_RUNTIME_DIR` or `<tmp>/stf`.
pub fn runtime_dir() -> PathBuf {
    std::env::var_os(RUNTIME_DIR_ENV)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("stf"))
}

fn normalize_chunk(chunk: &str) -> StfResult<String> {
    let chunk = chunk.trim();
    if chunk == "." || chunk == ".." {
        return Err(format!("\"{chunk}\" is not allowed in a server name").into());
    }
    if chunk.chars().any(|c| c.is_whitespace() || c == '\\' || c == '\0') {
        return Err(format!("invalid character in server name chunk \"{chunk}\"").into());
    }
    Ok(chunk.to_string())
}

/// The name a server is reachable under, like `/robot1/tf_server`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServerName {
    namespace: Vec<String>,
    name: String,
}

impl ServerName {
    pub fn namespace(&self) -> &[String] {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Socket path of this server under [`runtime_dir`].
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path_in(&runtime_dir())
    }

    pub fn socket_path_in(&self, dir: &Path) -> PathBuf {
        let mut path = dir.to_path_buf();
        for chunk in &self.namespace {
            path.push(chunk);
        }
        path.push(format!("{}.sock", self.name));
        path
    }
}

impl Default for ServerName {
    fn default() -> Self {
        ServerName {
            namespace: Vec::new(),
            name: DEFAULT_SERVER_NAME.trim_start_matches('/').to_string(),
        }
    }
}

impl FromStr for ServerName {
    type Err = StfError;

    fn from_str(s: &str) -> StfResult<Self> {
        let mut chunks = s
            .split('/')
            .filter(|c| !c.trim().is_empty())
            .map(normalize_chunk)
            .collect::<StfResult<Vec<_>>>()?;
        let name = chunks
            .pop()
            .ok_or_else(|| StfError::from(format!("invalid server name \"{s}\": it is empty")))?;
        Ok(ServerName {
            namespace: chunks,
            name,
        })
    }
}

impl TryFrom<String> for ServerName {
    type Error = StfError;

    fn try_from(s: String) -> StfResult<Self> {
        s.parse()
    }
}

impl From<ServerName> for String {
    fn from(name: ServerName) -> String {
        name.to_string()
    }
}

impl Display for ServerName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for chunk in &self.namespace {
            write!(f, "/{chunk}")?;
        }
        write!(f, "/{}", self.name)
    }
}
