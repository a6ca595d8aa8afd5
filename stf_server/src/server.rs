use crate::config::ServerConfig;
use log::{debug, error, info, warn};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use stf_buffer::LocalBuffer;
use stf_protocol::{read_frame, write_message, Request, Response, ServerName};
use stf_traits::{stf_error_map, StfError, StfResult, TfError, TransformLookup};

const STATIC_AUTHORITY: &str = "server_config";

/// Answers decoded requests against the buffer. Shared by every handler thread.
#[derive(Debug)]
pub struct Dispatcher {
    buffer: Arc<LocalBuffer>,
    max_request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(buffer: Arc<LocalBuffer>, max_request_timeout: Duration) -> Self {
        Self {
            buffer,
            max_request_timeout,
        }
    }

    /// How long `request` may wait for data, once capped.
    pub fn wait_budget(&self, request: &Request) -> Duration {
        Duration::from(request.timeout()).min(self.max_request_timeout)
    }

    pub fn handle(&self, request: Request) -> Response {
        let timeout = self.wait_budget(&request);
        match request {
            Request::Ping => Response::Pong,
            Request::Lookup(r) => self
                .buffer
                .lookup_transform(&r.target_frame, &r.source_frame, r.time, timeout)
                .into(),
            Request::LookupFull(r) => self
                .buffer
                .lookup_transform_full(
                    &r.target_frame,
                    r.target_time,
                    &r.source_frame,
                    r.source_time,
                    &r.fixed_frame,
                    timeout,
                )
                .into(),
            Request::CanTransform(r) => self
                .buffer
                .can_transform(&r.target_frame, &r.source_frame, r.time, timeout)
                .into(),
            Request::CanTransformFull(r) => self
                .buffer
                .can_transform_full(
                    &r.target_frame,
                    r.target_time,
                    &r.source_frame,
                    r.source_time,
                    &r.fixed_frame,
                    timeout,
                )
                .into(),
            Request::Publish(p) => {
                let (accepted, refused) =
                    self.buffer
                        .set_transforms(&p.transforms, &p.authority, p.is_static);
                match refused {
                    Some(e) if accepted == 0 => Response::error(&e),
                    _ => Response::Published {
                        accepted: accepted as u32,
                    },
                }
            }
        }
    }
}

type SharedWriter = Arc<Mutex<UnixStream>>;

fn send_response(writer: &SharedWriter, request_id: u64, response: &Response) {
    let mut stream = writer.lock().unwrap_or_else(PoisonError::into_inner);
    if let Err(e) = write_message(&mut *stream, request_id, response) {
        // the client went away, nobody is waiting for this answer anymore
        debug!("dropping response to request {request_id}: {e}");
    }
}

/// State shared between the handle, the accept thread and the connection readers.
struct ServerShared {
    name: ServerName,
    dispatcher: Arc<Dispatcher>,
    pool: ThreadPool,
    running: AtomicBool,
    next_connection_id: AtomicU64,
    connections: Mutex<HashMap<u64, UnixStream>>,
}

impl ServerShared {
    fn serve_connection(self: &Arc<Self>, stream: UnixStream) -> StfResult<()> {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let writer: SharedWriter = Arc::new(Mutex::new(
            stream
                .try_clone()
                .map_err(stf_error_map("failed to clone the client stream"))?,
        ));
        let registered = stream
            .try_clone()
            .map_err(stf_error_map("failed to clone the client stream"))?;
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection_id, registered);

        let shared = Arc::clone(self);
        thread::Builder::new()
            .name(format!("stf-conn-{connection_id}"))
            .spawn(move || {
                let mut reader = stream;
                shared.read_requests(connection_id, &mut reader, &writer);
                shared
                    .connections
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&connection_id);
                debug!("connection {connection_id} closed");
            })
            .map_err(stf_error_map("failed to spawn a connection thread"))?;
        Ok(())
    }

    fn read_requests(&self, connection_id: u64, reader: &mut UnixStream, writer: &SharedWriter) {
        loop {
            let frame = match read_frame(reader) {
                Ok(Some(frame)) => frame,
                Ok(None) => return,
                Err(e) => {
                    if self.running.load(Ordering::Acquire) {
                        warn!("connection {connection_id}: {e}, closing it");
                    }
                    return;
                }
            };

            let request_id = frame.request_id;
            let request = match frame.decode::<Request>() {
                Ok(request) => request,
                Err(e) => {
                    warn!("connection {connection_id}: malformed request {request_id}: {e}");
                    let error = TfError::InvalidArgument(format!("malformed request: {e}"));
                    send_response(writer, request_id, &Response::error(&error));
                    continue;
                }
            };

            debug!(
                "connection {connection_id}: request {request_id} {}",
                request.operation()
            );
            // pings, publishes and immediate lookups never hold a handler thread, so they
            // cannot queue behind lookups waiting for data
            if self.dispatcher.wait_budget(&request).is_zero() {
                let response = self.dispatcher.handle(request);
                send_response(writer, request_id, &response);
                continue;
            }
            let dispatcher = Arc::clone(&self.dispatcher);
            let writer = Arc::clone(writer);
            self.pool.spawn(move || {
                let response = dispatcher.handle(request);
                send_response(&writer, request_id, &response);
            });
        }
    }

    fn accept_loop(self: Arc<Self>, listener: UnixListener) {
        for stream in listener.incoming() {
            if !self.running.load(Ordering::Acquire) {
                break;
            }
            match stream {
                Ok(stream) => {
                    if let Err(e) = self.serve_connection(stream) {
                        error!("{}: {e}", self.name);
                    }
                }
                Err(e) => warn!("{}: failed to accept a connection: {e}", self.name),
            }
        }
        debug!("{}: accept loop stopped", self.name);
    }
}

/// The transform server.
pub struct TransformServer;

impl TransformServer {
    /// Binds the server socket with a fresh buffer and starts serving.
    pub fn bind(config: ServerConfig) -> StfResult<ServerHandle> {
        let buffer = Arc::new(LocalBuffer::new(config.buffer.clone()));
        Self::bind_with_buffer(config, buffer)
    }

    /// Binds the server socket and serves lookups from `buffer`, which the caller may keep
    /// publishing into.
    pub fn bind_with_buffer(
        config: ServerConfig,
        buffer: Arc<LocalBuffer>,
    ) -> StfResult<ServerHandle> {
        let socket_path = config.socket_path();

        for static_transform in &config.static_transforms {
            buffer
                .set_transform(&static_transform.to_observation(), STATIC_AUTHORITY, true)
                .map_err(|e| {
                    StfError::new_with_cause(
                        &format!(
                            "invalid static transform {} -> {}",
                            static_transform.parent_frame, static_transform.child_frame
                        ),
                        e,
                    )
                })?;
        }

        let listener = bind_socket(&socket_path)?;

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("stf-handler-{i}"))
            .build()
            .map_err(stf_error_map("failed to build the handler pool"))?;
        let num_threads = pool.current_num_threads();

        let shared = Arc::new(ServerShared {
            name: config.name.clone(),
            dispatcher: Arc::new(Dispatcher::new(
                Arc::clone(&buffer),
                config.max_request_timeout,
            )),
            pool,
            running: AtomicBool::new(true),
            next_connection_id: AtomicU64::new(0),
            connections: Mutex::new(HashMap::new()),
        });

        let accept_thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("stf-accept".to_string())
                .spawn(move || shared.accept_loop(listener))
                .map_err(stf_error_map("failed to spawn the accept thread"))?
        };

        info!(
            "Transform server {} listening on {} with {num_threads} handler threads",
            config.name,
            socket_path.display()
        );

        Ok(ServerHandle {
            socket_path,
            buffer,
            shared,
            num_threads,
            accept_thread: Some(accept_thread),
        })
    }
}

fn bind_socket(socket_path: &Path) -> StfResult<UnixListener> {
    if let Some(dir) = socket_path.parent() {
        fs::create_dir_all(dir).map_err(|e| {
            StfError::from(format!("failed to create {}", dir.display())).add_cause(e)
        })?;
    }

    if socket_path.exists() {
        if UnixStream::connect(socket_path).is_ok() {
            return Err(format!(
                "a server is already running at {}",
                socket_path.display()
            )
            .into());
        }
        warn!("removing stale socket {}", socket_path.display());
        fs::remove_file(socket_path).map_err(|e| {
            StfError::from(format!(
                "failed to remove stale socket {}",
                socket_path.display()
            ))
            .add_cause(e)
        })?;
    }

    UnixListener::bind(socket_path).map_err(|e| {
        StfError::from(format!("failed to bind {}", socket_path.display())).add_cause(e)
    })
}

/// A running server. Dropping it shuts the server down.
pub struct ServerHandle {
    socket_path: PathBuf,
    buffer: Arc<LocalBuffer>,
    shared: Arc<ServerShared>,
    num_threads: usize,
    accept_thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn name(&self) -> &ServerName {
        &self.shared.name
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn buffer(&self) -> &Arc<LocalBuffer> {
        &self.buffer
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Stops accepting, closes every client connection and removes the socket file.
    pub fn shutdown(&mut self) {
        let Some(accept_thread) = self.accept_thread.take() else {
            return;
        };
        self.shared.running.store(false, Ordering::Release);

        // wake up the accept loop so it notices the flag
        let _ = UnixStream::connect(&self.socket_path);
        if accept_thread.join().is_err() {
            error!("{}: the accept thread panicked", self.shared.name);
        }

        for (_, stream) in self
            .shared
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
        {
            let _ = stream.shutdown(Shutdown::Both);
        }

        match fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove {}: {e}", self.socket_path.display()),
        }
        info!("Transform server {} stopped", self.shared.name);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stf_clock::{TfDuration, TfStamp};
    use stf_protocol::{LookupRequest, PublishRequest};
    use stf_traits::{StampedTransform, Transform};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(LocalBuffer::default()), Duration::from_millis(50))
    }

    fn lookup(target: &str, source: &str, timeout: TfDuration) -> Request {
        Request::Lookup(LookupRequest {
            target_frame: target.into(),
            source_frame: source.into(),
            time: TfStamp::Latest,
            timeout,
        })
    }

    #[test]
    fn test_publish_then_lookup() {
        let dispatcher = dispatcher();
        let published = dispatcher.handle(Request::Publish(PublishRequest {
            authority: "test".into(),
            is_static: false,
            transforms: vec![StampedTransform::new(
                "map",
                "base",
                TfDuration::from_secs(1),
                Transform::from_translation([1.0, 2.0, 3.0]),
            )],
        }));
        assert_eq!(published, Response::Published { accepted: 1 });

        let t = dispatcher
            .handle(lookup("map", "base", TfDuration::ZERO))
            .into_transform()
            .unwrap();
        assert_eq!(t.transform.translation, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_request_timeout_is_capped() {
        let dispatcher = dispatcher();
        let start = std::time::Instant::now();
        let response = dispatcher.handle(lookup("map", "base", TfDuration::from_secs(60)));
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(matches!(
            response.into_transform(),
            Err(TfError::Lookup(_))
        ));
    }

    #[test]
    fn test_refused_publish_reports_the_error() {
        let dispatcher = dispatcher();
        let response = dispatcher.handle(Request::Publish(PublishRequest {
            authority: "test".into(),
            is_static: true,
            transforms: vec![StampedTransform::new(
                "a",
                "a",
                TfDuration::ZERO,
                Transform::identity(),
            )],
        }));
        assert!(matches!(
            response.into_published(),
            Err(TfError::InvalidArgument(_))
        ));
        assert_eq!(dispatcher.handle(Request::Ping), Response::Pong);
    }
}
