use log::{debug, warn};
use std::collections::HashMap;
use std::io;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use stf_protocol::{read_frame, write_message, Request, Response};
use stf_traits::{TfError, TfResult};

/// Requests waiting for their response, by request id.
struct Pending {
    waiters: Mutex<HashMap<u64, SyncSender<Response>>>,
    alive: AtomicBool,
}

impl Pending {
    fn register(&self, request_id: u64, waiter: SyncSender<Response>) {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id, waiter);
    }

    fn take(&self, request_id: u64) -> Option<SyncSender<Response>> {
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&request_id)
    }

    /// Marks the connection dead. Dropping the waiters wakes every outstanding caller.
    fn close(&self) {
        self.alive.store(false, Ordering::Release);
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// One stream to a server, multiplexing concurrent requests by request id.
pub(crate) struct Connection {
    writer: Mutex<UnixStream>,
    pending: Arc<Pending>,
    next_request_id: AtomicU64,
}

impl Connection {
    pub(crate) fn open(socket_path: &Path) -> io::Result<Connection> {
        let stream = UnixStream::connect(socket_path)?;
        let mut reader = stream.try_clone()?;
        let pending = Arc::new(Pending {
            waiters: Mutex::new(HashMap::new()),
            alive: AtomicBool::new(true),
        });

        let routing = Arc::clone(&pending);
        thread::Builder::new()
            .name("stf-client-reader".to_string())
            .spawn(move || {
                route_responses(&mut reader, &routing);
                routing.close();
            })?;

        Ok(Connection {
            writer: Mutex::new(stream),
            pending,
            next_request_id: AtomicU64::new(1),
        })
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.pending.alive.load(Ordering::Acquire)
    }

    /// Sends `request` and blocks until its response arrives or `wait` elapses.
    pub(crate) fn call(&self, request: &Request, wait: Duration) -> TfResult<Response> {
        if !self.is_alive() {
            return Err(TfError::Connection("not connected to the server".into()));
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (waiter, response) = mpsc::sync_channel(1);
        self.pending.register(request_id, waiter);
        if !self.is_alive() {
            self.pending.take(request_id);
            return Err(TfError::Connection("not connected to the server".into()));
        }

        let sent = {
            let mut stream = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
            write_message(&mut *stream, request_id, request)
        };
        if let Err(e) = sent {
            self.pending.take(request_id);
            self.shutdown();
            return Err(TfError::Connection(format!(
                "failed to send the {} request: {e}",
                request.operation()
            )));
        }

        match response.recv_timeout(wait) {
            Ok(response) => Ok(response),
            Err(RecvTimeoutError::Timeout) => {
                // from now on a late response finds no waiter and is dropped
                self.pending.take(request_id);
                Err(TfError::Timeout(format!(
                    "no response to the {} request {request_id} within {wait:?}",
                    request.operation()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(TfError::Connection(format!(
                "connection lost while waiting for the {} request {request_id}",
                request.operation()
            ))),
        }
    }

    pub(crate) fn shutdown(&self) {
        let stream = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = stream.shutdown(Shutdown::Both);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn route_responses(reader: &mut UnixStream, pending: &Pending) {
    loop {
        let frame = match read_frame(reader) {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("server closed the connection");
                return;
            }
            Err(e) => {
                debug!("connection to the server lost: {e}");
                return;
            }
        };

        let Some(waiter) = pending.take(frame.request_id) else {
            debug!(
                "discarding the response to request {}, nobody waits for it anymore",
                frame.request_id
            );
            continue;
        };

        let response = frame.decode::<Response>().unwrap_or_else(|e| {
            warn!("malformed response to request {}: {e}", frame.request_id);
            Response::error(&TfError::Connection(format!("malformed response: {e}")))
        });
        // the waiter may have timed out in between, it is fine to lose the response then
        let _ = waiter.try_send(response);
    }
}
