//! TCP capture server for the network transport.
//!
//! The producer connects as a client, writes zero or more newline-terminated
//! records, then closes. One listener thread accepts connections and spawns one
//! handler thread per connection. Handlers append to a shared [`CaptureBuffer`];
//! the verifier drains it with a bounded wait.
//!
//! The buffer (a `parking_lot::Mutex` paired with a `Condvar`) is the only
//! state shared across threads. Handlers only append; draining takes and clears
//! under the same lock.

use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::error::CaptureError;
use crate::record::{LogRecord, parse_lines};

/// Endpoint the reference producer connects to when given a bare `-n`.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:6024";
/// Upper bound for a single socket read.
pub const RECV_CHUNK: usize = 64 * 1024;
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(5);
const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_millis(100);

/// Ordered text chunks received from every connection.
///
/// Each chunk holds whole lines only and ends with `\n`. Order is preserved
/// within one connection; chunks of concurrent connections interleave.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    chunks: Mutex<Vec<String>>,
    ready: Condvar,
}

impl CaptureBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, chunk: String) {
        if chunk.is_empty() {
            return;
        }
        self.chunks.lock().push(chunk);
    }

    /// Wake waiting drainers if anything has been captured.
    pub fn signal_if_ready(&self) {
        let chunks = self.chunks.lock();
        if !chunks.is_empty() {
            self.ready.notify_all();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.lock().is_empty()
    }

    /// Wait up to `timeout` for at least one chunk, then take everything.
    /// Returns an empty vector if nothing arrived in time.
    pub fn drain_raw_or_empty(&self, timeout: Duration) -> Vec<String> {
        let mut chunks = self.chunks.lock();
        if chunks.is_empty() {
            let _ = self
                .ready
                .wait_while_for(&mut chunks, |c| c.is_empty(), timeout);
        }
        std::mem::take(&mut *chunks)
    }

    /// Like [`Self::drain_raw_or_empty`], then parse every captured line.
    /// The buffer is cleared even when parsing fails.
    pub fn drain_or_empty(&self, timeout: Duration) -> Result<Vec<LogRecord>, CaptureError> {
        let chunks = self.drain_raw_or_empty(timeout);
        parse_lines(&chunks.concat())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ServerOptions {
    /// Socket receive timeout per connection. `None` blocks until the peer closes.
    pub recv_timeout: Option<Duration>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            recv_timeout: Some(DEFAULT_RECV_TIMEOUT),
        }
    }
}

/// Counters returned by [`NetworkCaptureServer::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    pub connections: u64,
    pub handler_errors: u64,
    pub accept_errors: u64,
}

pub struct NetworkCaptureServer {
    local_addr: SocketAddr,
    buffer: Arc<CaptureBuffer>,
    stop: Arc<StopSignal>,
    listener: Option<JoinHandle<ServerStats>>,
}

/// Shutdown request shared with the accept thread. `wake_from` is the local
/// address of the connection used to unblock `accept()`; it is held locked
/// while that connection is made so the accept thread can tell it apart.
#[derive(Debug, Default)]
struct StopSignal {
    requested: AtomicBool,
    wake_from: Mutex<Option<SocketAddr>>,
}

impl NetworkCaptureServer {
    /// Bind the listener and start accepting. Port 0 picks an ephemeral port.
    pub fn bind(addr: impl ToSocketAddrs, options: ServerOptions) -> Result<Self, CaptureError> {
        // std sets SO_REUSEADDR on Unix listeners.
        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let buffer = Arc::new(CaptureBuffer::new());
        let stop = Arc::new(StopSignal::default());

        let thread_buffer = Arc::clone(&buffer);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("microlog-accept".to_string())
            .spawn(move || accept_loop(listener, thread_buffer, &thread_stop, options))?;

        Ok(Self {
            local_addr,
            buffer,
            stop,
            listener: Some(handle),
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn buffer(&self) -> &Arc<CaptureBuffer> {
        &self.buffer
    }

    pub fn drain_or_empty(&self, timeout: Duration) -> Result<Vec<LogRecord>, CaptureError> {
        self.buffer.drain_or_empty(timeout)
    }

    pub fn drain_raw_or_empty(&self, timeout: Duration) -> Vec<String> {
        self.buffer.drain_raw_or_empty(timeout)
    }

    /// Stop accepting, close the listener, and join every handler thread.
    /// Connections already queued when shutdown starts are still served.
    pub fn shutdown(mut self) -> ServerStats {
        self.stop_and_join()
    }

    fn stop_and_join(&mut self) -> ServerStats {
        let Some(handle) = self.listener.take() else {
            return ServerStats::default();
        };
        {
            let mut wake_from = self.stop.wake_from.lock();
            self.stop.requested.store(true, Ordering::SeqCst);
            if let Ok(wake) =
                TcpStream::connect_timeout(&wake_addr(self.local_addr), Duration::from_secs(1))
            {
                *wake_from = wake.local_addr().ok();
            }
        }
        handle.join().unwrap_or_default()
    }
}

impl Drop for NetworkCaptureServer {
    fn drop(&mut self) {
        let _ = self.stop_and_join();
    }
}

fn wake_addr(local: SocketAddr) -> SocketAddr {
    if local.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local.port())
    } else {
        local
    }
}

type Handler = JoinHandle<io::Result<()>>;

/// Pause after the `consecutive`-th failed accept in a row (EMFILE and the like
/// persist until a descriptor frees up). Doubles from the base up to the cap.
fn accept_backoff(consecutive: u32) -> Duration {
    let shift = consecutive.saturating_sub(1).min(8);
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1 << shift)
        .min(ACCEPT_BACKOFF_MAX)
}

fn accept_loop(
    listener: TcpListener,
    buffer: Arc<CaptureBuffer>,
    stop: &StopSignal,
    options: ServerOptions,
) -> ServerStats {
    let mut stats = ServerStats::default();
    let mut handlers: Vec<Handler> = Vec::new();
    let mut queued: Vec<TcpStream> = Vec::new();
    let mut failed_accepts = 0u32;

    for incoming in listener.incoming() {
        let stopping = stop.requested.load(Ordering::SeqCst);
        match incoming {
            Ok(stream) if stopping => {
                queued.push(stream);
                break;
            }
            Ok(stream) => {
                failed_accepts = 0;
                spawn_handler(stream, &buffer, options, &mut handlers, &mut stats);
            }
            Err(_) if stopping => break,
            Err(_) => {
                stats.accept_errors += 1;
                failed_accepts = failed_accepts.saturating_add(1);
                thread::sleep(accept_backoff(failed_accepts));
            }
        }
        reap_finished(&mut handlers, &mut stats);
    }

    // Pick up whatever is still in the backlog, then close the listener.
    if listener.set_nonblocking(true).is_ok() {
        while let Ok((stream, _)) = listener.accept() {
            queued.push(stream);
        }
    }
    drop(listener);

    let wake_from = *stop.wake_from.lock();
    for stream in queued {
        if wake_from.is_some() && stream.peer_addr().ok() == wake_from {
            continue;
        }
        spawn_handler(stream, &buffer, options, &mut handlers, &mut stats);
    }

    for handle in handlers {
        record_outcome(handle, &mut stats);
    }
    stats
}

fn spawn_handler(
    stream: TcpStream,
    buffer: &Arc<CaptureBuffer>,
    options: ServerOptions,
    handlers: &mut Vec<Handler>,
    stats: &mut ServerStats,
) {
    stats.connections += 1;
    let buffer = Arc::clone(buffer);
    let spawned = thread::Builder::new()
        .name(format!("microlog-conn-{}", stats.connections))
        .spawn(move || handle_connection(stream, &buffer, options.recv_timeout));
    match spawned {
        Ok(handle) => handlers.push(handle),
        Err(_) => stats.handler_errors += 1,
    }
}

fn reap_finished(handlers: &mut Vec<Handler>, stats: &mut ServerStats) {
    let mut idx = 0;
    while idx < handlers.len() {
        if handlers[idx].is_finished() {
            record_outcome(handlers.swap_remove(idx), stats);
        } else {
            idx += 1;
        }
    }
}

fn record_outcome(handle: Handler, stats: &mut ServerStats) {
    match handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(_)) | Err(_) => stats.handler_errors += 1,
    }
}

/// Read until the peer closes. Only complete lines are published while the
/// connection is open; a trailing fragment is published, newline-terminated,
/// when it ends.
fn handle_connection(
    mut stream: TcpStream,
    buffer: &CaptureBuffer,
    recv_timeout: Option<Duration>,
) -> io::Result<()> {
    let result = pump(&mut stream, buffer, recv_timeout);
    buffer.signal_if_ready();
    result
}

fn pump(
    stream: &mut TcpStream,
    buffer: &CaptureBuffer,
    recv_timeout: Option<Duration>,
) -> io::Result<()> {
    // Streams taken from the backlog after shutdown may inherit non-blocking mode.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(recv_timeout)?;
    let mut chunk = vec![0u8; RECV_CHUNK];
    let mut pending: Vec<u8> = Vec::new();

    let outcome = loop {
        match stream.read(&mut chunk) {
            Ok(0) => break Ok(()),
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                if let Some(last_newline) = pending.iter().rposition(|&b| b == b'\n') {
                    let complete: Vec<u8> = pending.drain(..=last_newline).collect();
                    buffer.append(String::from_utf8_lossy(&complete).into_owned());
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => break Err(err),
        }
    };

    if !pending.is_empty() {
        let mut tail = String::from_utf8_lossy(&pending).into_owned();
        tail.push('\n');
        buffer.append(tail);
    }
    outcome
}
