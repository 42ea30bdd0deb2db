// Connection handling module
// Accepts a single TCP connection and serves HTTP/1 on it

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::cell::Cell;
use std::net::SocketAddr;
use std::pin::pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::AppState;
use crate::handler;
use crate::logger;

/// Accept a connection, enforcing `performance.max_connections`.
///
/// Returns `false` when the connection was rejected.
pub fn accept_connection(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    state: &Arc<AppState>,
    conn_counter: &Arc<AtomicUsize>,
) -> bool {
    // Increment first, then check, so concurrent accepts can't both slip under the limit
    let prev_count = conn_counter.fetch_add(1, Ordering::SeqCst);

    if let Some(max_conn) = state.config.performance.max_connections {
        if prev_count >= usize::try_from(max_conn).unwrap_or(usize::MAX) {
            conn_counter.fetch_sub(1, Ordering::SeqCst);
            logger::log_warning(&format!(
                "Max connections reached: {prev_count}/{max_conn}. Connection rejected."
            ));
            drop(stream);
            return false;
        }
    }

    if state.access_log_enabled() {
        logger::log_connection_accepted(&peer_addr);
    }

    handle_connection(stream, peer_addr, Arc::clone(state), Arc::clone(conn_counter));
    true
}

/// Serve one connection in a local task.
///
/// `read_timeout` bounds how long a client may take to send request headers.
/// A connection with no request in flight for `keep_alive_timeout` is closed
/// gracefully, and a closing connection gets `write_timeout` to finish writing.
/// Handler time is not bounded here; `run.deadline_secs` covers that.
fn handle_connection(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    state: Arc<AppState>,
    conn_counter: Arc<AtomicUsize>,
) {
    tokio::task::spawn_local(async move {
        let io = TokioIo::new(stream);
        let perf = &state.config.performance;
        let read_timeout = Duration::from_secs(perf.read_timeout);
        let keep_alive = Duration::from_secs(perf.keep_alive_timeout);
        let write_timeout = Duration::from_secs(perf.write_timeout);
        // without keep-alive, a client that never sends anything is dropped after read_timeout
        let idle_limit = (if keep_alive.is_zero() { read_timeout } else { keep_alive })
            .max(Duration::from_secs(1));

        let mut builder = http1::Builder::new();
        builder.timer(TokioTimer::new()).keep_alive(!keep_alive.is_zero());
        if !read_timeout.is_zero() {
            builder.header_read_timeout(read_timeout);
        }

        let activity = Rc::new(Activity::new());
        let service = {
            let activity = Rc::clone(&activity);
            let state = Arc::clone(&state);
            service_fn(move |req| {
                let in_flight = activity.begin();
                let state = Arc::clone(&state);
                async move {
                    let response = handler::handle_request(req, state, peer_addr).await;
                    drop(in_flight);
                    response
                }
            })
        };

        let mut conn = pin!(builder.serve_connection(io, service));
        let mut closing_since: Option<Instant> = None;

        let result = loop {
            let wake_at = match closing_since {
                Some(since) => since + write_timeout,
                None => activity.idle_deadline(idle_limit),
            };
            tokio::select! {
                res = conn.as_mut() => break Some(res),
                () = tokio::time::sleep_until(wake_at) => {
                    if closing_since.is_some() {
                        break None;
                    }
                    if activity.idle_for(idle_limit) {
                        conn.as_mut().graceful_shutdown();
                        closing_since = Some(Instant::now());
                    }
                }
            }
        };

        match result {
            Some(Ok(())) => {}
            Some(Err(err)) => logger::log_connection_error(&err),
            None => logger::log_warning(&format!(
                "Connection from {peer_addr} did not close within {} seconds",
                write_timeout.as_secs()
            )),
        }

        conn_counter.fetch_sub(1, Ordering::SeqCst);
    });
}

/// Requests in flight on one connection and when the last one finished
struct Activity {
    in_flight: Cell<usize>,
    last_active: Cell<Instant>,
}

impl Activity {
    fn new() -> Self {
        Self {
            in_flight: Cell::new(0),
            last_active: Cell::new(Instant::now()),
        }
    }

    fn begin(self: &Rc<Self>) -> InFlight {
        self.in_flight.set(self.in_flight.get() + 1);
        InFlight(Rc::clone(self))
    }

    fn idle_deadline(&self, limit: Duration) -> Instant {
        if self.in_flight.get() > 0 {
            Instant::now() + limit
        } else {
            self.last_active.get() + limit
        }
    }

    fn idle_for(&self, limit: Duration) -> bool {
        self.in_flight.get() == 0 && self.last_active.get().elapsed() >= limit
    }
}

struct InFlight(Rc<Activity>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.set(self.0.in_flight.get() - 1);
        self.0.last_active.set(Instant::now());
    }
}
