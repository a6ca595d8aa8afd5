use crate::connection::Connection;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use stf_clock::{TfDuration, TfStamp};
use stf_protocol::{
    LookupFullRequest, LookupRequest, PublishRequest, Request, Response, ServerName,
};
use stf_traits::{CanTransform, StampedTransform, TfError, TfResult, TransformLookup};

pub const DEFAULT_RESPONSE_GRACE: Duration = Duration::from_millis(500);
pub const DEFAULT_CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    /// Added to every request timeout to cover the round trip: the server may legitimately spend
    /// the whole timeout waiting for data before it answers.
    pub response_grace: Duration,
    /// Delay between two connection attempts while waiting for the server.
    pub connect_retry_interval: Duration,
    /// Overrides the directory the server socket is looked up in.
    pub runtime_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            response_grace: DEFAULT_RESPONSE_GRACE,
            connect_retry_interval: DEFAULT_CONNECT_RETRY_INTERVAL,
            runtime_dir: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Ready,
}

/// Remote access to a transform server.
///
/// The client starts disconnected; [`BufferClient::connect`] (or `wait_for_server`) brings it to
/// ready. A lost connection is not re-established behind the caller's back: requests fail with a
/// connection error until the next `connect`.
pub struct BufferClient {
    server_name: ServerName,
    socket_path: PathBuf,
    config: ClientConfig,
    state: Mutex<ClientState>,
    connection: Mutex<Option<Arc<Connection>>>,
    connecting: Mutex<()>,
}

impl BufferClient {
    pub fn new(server_name: ServerName) -> Self {
        Self::with_config(server_name, ClientConfig::default())
    }

    pub fn with_config(server_name: ServerName, config: ClientConfig) -> Self {
        let socket_path = match &config.runtime_dir {
            Some(dir) => server_name.socket_path_in(dir),
            None => server_name.socket_path(),
        };
        Self {
            server_name,
            socket_path,
            config,
            state: Mutex::new(ClientState::Disconnected),
            connection: Mutex::new(None),
            connecting: Mutex::new(()),
        }
    }

    pub fn server_name(&self) -> &ServerName {
        &self.server_name
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn set_state(&self, state: ClientState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn state(&self) -> ClientState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == ClientState::Ready && self.current_connection().is_none() {
            *state = ClientState::Disconnected;
        }
        *state
    }

    /// The live connection, if any. A dead one is forgotten.
    fn current_connection(&self) -> Option<Arc<Connection>> {
        let mut connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if connection.as_ref().is_some_and(|c| !c.is_alive()) {
            *connection = None;
        }
        connection.clone()
    }

    /// Establishes or re-establishes the connection to the server.
    ///
    /// Retries until the server answers a ping. `None` waits forever. Never blocks past the
    /// deadline and returns whether the client is ready. A zero timeout cannot await a ping: it
    /// only reports whether a live connection is already established.
    pub fn connect(&self, timeout: Option<Duration>) -> bool {
        let _connecting = self
            .connecting
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let remaining = || match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        };

        if remaining().is_zero() {
            return self.current_connection().is_some();
        }

        if let Some(connection) = self.current_connection() {
            if matches!(connection.call(&Request::Ping, remaining()), Ok(Response::Pong)) {
                return true;
            }
        }

        self.disconnect();
        self.set_state(ClientState::Connecting);
        debug!(
            "connecting to {} at {}",
            self.server_name,
            self.socket_path.display()
        );

        loop {
            match Connection::open(&self.socket_path) {
                Ok(connection) => match connection.call(&Request::Ping, remaining()) {
                    Ok(Response::Pong) => {
                        *self
                            .connection
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(connection));
                        self.set_state(ClientState::Ready);
                        info!("connected to transform server {}", self.server_name);
                        return true;
                    }
                    other => debug!("{} did not answer the ping: {other:?}", self.server_name),
                },
                Err(e) => debug!("{} not reachable yet: {e}", self.server_name),
            }

            let left = remaining();
            if left.is_zero() {
                self.set_state(ClientState::Disconnected);
                return false;
            }
            thread::sleep(left.min(self.config.connect_retry_interval));
        }
    }

    /// Drops the connection. Outstanding requests fail with a connection error.
    pub fn disconnect(&self) {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(connection) = connection {
            connection.shutdown();
        }
        self.set_state(ClientState::Disconnected);
    }

    /// Sends a request whose server side wait is `timeout`, and waits for its response a little
    /// longer than that.
    fn request(&self, request: &Request, timeout: Duration) -> TfResult<Response> {
        let connection = self.current_connection().ok_or_else(|| {
            TfError::Connection(format!(
                "not connected to the transform server {}",
                self.server_name
            ))
        })?;
        connection.call(request, timeout.saturating_add(self.config.response_grace))
    }

    /// Inserts transforms in the server buffer. Returns how many were accepted.
    pub fn publish(
        &self,
        transforms: Vec<StampedTransform>,
        authority: &str,
        is_static: bool,
    ) -> TfResult<u32> {
        let request = Request::Publish(PublishRequest {
            authority: authority.to_string(),
            is_static,
            transforms,
        });
        self.request(&request, Duration::ZERO)?.into_published()
    }

    fn lookup_request(
        target_frame: &str,
        source_frame: &str,
        time: TfStamp,
        timeout: Duration,
    ) -> LookupRequest {
        LookupRequest {
            target_frame: target_frame.to_string(),
            source_frame: source_frame.to_string(),
            time,
            timeout: TfDuration::from(timeout),
        }
    }

    fn lookup_full_request(
        target_frame: &str,
        target_time: TfStamp,
        source_frame: &str,
        source_time: TfStamp,
        fixed_frame: &str,
        timeout: Duration,
    ) -> LookupFullRequest {
        LookupFullRequest {
            target_frame: target_frame.to_string(),
            target_time,
            source_frame: source_frame.to_string(),
            source_time,
            fixed_frame: fixed_frame.to_string(),
            timeout: TfDuration::from(timeout),
        }
    }
}

impl TransformLookup for BufferClient {
    fn wait_for_server(&self, timeout: Option<Duration>) -> bool {
        self.connect(timeout)
    }

    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: TfStamp,
        timeout: Duration,
    ) -> TfResult<StampedTransform> {
        let request = Request::Lookup(Self::lookup_request(
            target_frame,
            source_frame,
            time,
            timeout,
        ));
        self.request(&request, timeout)?.into_transform()
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
        let request = Request::LookupFull(Self::lookup_full_request(
            target_frame,
            target_time,
            source_frame,
            source_time,
            fixed_frame,
            timeout,
        ));
        self.request(&request, timeout)?.into_transform()
    }

    fn can_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        time: TfStamp,
        timeout: Duration,
    ) -> CanTransform {
        let request = Request::CanTransform(Self::lookup_request(
            target_frame,
            source_frame,
            time,
            timeout,
        ));
        match self.request(&request, timeout) {
            Ok(response) => response.into_can_transform(),
            Err(e) => CanTransform::no(e.to_string()),
        }
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
        let request = Request::CanTransformFull(Self::lookup_full_request(
            target_frame,
            target_time,
            source_frame,
            source_time,
            fixed_frame,
            timeout,
        ));
        match self.request(&request, timeout) {
            Ok(response) => response.into_can_transform(),
            Err(e) => CanTransform::no(e.to_string()),
        }
    }
}
