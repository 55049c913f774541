//! Listener, routing, connection timeouts and graceful shutdown.

use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, bail};
use axum::{Router, extract::ConnectInfo, routing::any};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::{TokioIo, TokioTimer};
use tokio::{
    net::{TcpListener, TcpStream},
    signal,
    time::Instant,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower::ServiceExt;
use tracing::{debug, error, info, warn};
use weather_core::{Config, provider_from_config};

use crate::handler::{self, AppState};

/// Connection-level limits applied by the host.
#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    /// Time allowed to receive a request's headers.
    pub read_timeout: Duration,
    /// Time allowed to produce a response once headers are read.
    pub write_timeout: Duration,
    /// Keep-alive connections with nothing in flight are closed after this.
    pub idle_timeout: Duration,
    /// Drain window for in-flight requests after a shutdown signal.
    pub shutdown_timeout: Duration,
}

impl From<&Config> for ServerSettings {
    fn from(config: &Config) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            idle_timeout: config.idle_timeout(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/weather", any(handler::get_weather))
        .route("/health", any(handler::health))
        .with_state(state)
}

/// Runs the server until an interrupt or termination signal has been handled.
pub async fn run(config: Config) -> Result<()> {
    // The provider's own timeout is 3x the per-request deadline, as a safety net.
    let provider = provider_from_config(&config)?;
    let app = router(AppState::new(provider, config.client_timeout()));

    let listener = bind_listener(&config.port).await?;
    if let Ok(local) = listener.local_addr() {
        debug!(%local, "Listening");
    }

    info!("Starting server on port {}", config.port);
    serve(listener, app, ServerSettings::from(&config), shutdown_signal()).await?;
    info!("Server exited");

    Ok(())
}

/// Binds every interface. The IPv6 wildcard also accepts IPv4 clients where the
/// host allows dual-stack sockets; hosts without IPv6 get the IPv4 wildcard.
async fn bind_listener(port: &str) -> Result<TcpListener> {
    match TcpListener::bind(format!("[::]:{port}")).await {
        Ok(listener) => Ok(listener),
        Err(err) => {
            debug!(error = %err, "IPv6 listen failed, falling back to IPv4");
            let addr = format!("0.0.0.0:{port}");
            TcpListener::bind(&addr)
                .await
                .with_context(|| format!("Server failed to start: cannot listen on {addr}"))
        }
    }
}

/// Accepts connections until `shutdown` resolves, then drains.
///
/// After `shutdown` the listener is dropped, so new connections are refused.
/// Every open connection finishes its in-flight request and closes. If that
/// takes longer than `shutdown_timeout` an error is returned.
pub async fn serve<F>(
    listener: TcpListener,
    app: Router,
    settings: ServerSettings,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    let mut http = http1::Builder::new();
    http.timer(TokioTimer::new())
        .header_read_timeout(settings.read_timeout)
        .keep_alive(true);

    let draining = CancellationToken::new();
    let connections = TaskTracker::new();
    tokio::pin!(shutdown);

    loop {
        let (stream, remote) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    continue;
                }
            },
            () = &mut shutdown => break,
        };

        connections.spawn(serve_connection(
            http.clone(),
            stream,
            remote,
            app.clone(),
            settings,
            draining.clone(),
        ));
    }

    drop(listener);
    info!("Shutting down server...");

    draining.cancel();
    connections.close();

    if tokio::time::timeout(settings.shutdown_timeout, connections.wait()).await.is_err() {
        error!(
            remaining = connections.len(),
            "Server forced to shutdown: in-flight requests did not finish in time"
        );
        bail!(
            "Server forced to shutdown after {:?} with {} connection(s) still open",
            settings.shutdown_timeout,
            connections.len()
        );
    }

    Ok(())
}

async fn serve_connection(
    http: http1::Builder,
    stream: TcpStream,
    remote: SocketAddr,
    app: Router,
    settings: ServerSettings,
    draining: CancellationToken,
) {
    let activity = Arc::new(Activity::new());

    let service = {
        let activity = activity.clone();
        service_fn(move |mut request: hyper::Request<Incoming>| {
            let app = app.clone();
            let busy = activity.begin();
            async move {
                request.extensions_mut().insert(ConnectInfo(remote));
                let response =
                    tokio::time::timeout(settings.write_timeout, app.oneshot(request)).await;
                drop(busy);

                match response {
                    Ok(Ok(response)) => Ok(response),
                    Ok(Err(never)) => match never {},
                    Err(elapsed) => {
                        warn!(%remote, "Write timeout elapsed, closing connection");
                        Err(elapsed)
                    }
                }
            }
        })
    };

    let connection = http.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    // A connection with nothing in flight is simply dropped; one serving a
    // request is asked to close once the response is written.
    let mut closing = false;
    loop {
        let idle_deadline = activity.idle_deadline(settings.idle_timeout);
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(err) = result {
                    debug!(%remote, error = %err, "Connection closed with error");
                }
                break;
            }
            () = draining.cancelled(), if !closing => {
                if activity.in_flight() == 0 {
                    break;
                }
                connection.as_mut().graceful_shutdown();
                closing = true;
            }
            () = tokio::time::sleep_until(idle_deadline), if !closing => {
                if activity.is_idle(settings.idle_timeout) {
                    debug!(%remote, "Closing idle keep-alive connection");
                    break;
                }
            }
        }
    }
}

/// Request bookkeeping for one connection, used for the idle timeout.
#[derive(Debug)]
struct Activity {
    opened: Instant,
    in_flight: AtomicUsize,
    /// Milliseconds after `opened` when the last request finished.
    last_done_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            opened: Instant::now(),
            in_flight: AtomicUsize::new(0),
            last_done_ms: AtomicU64::new(0),
        }
    }

    fn begin(self: &Arc<Self>) -> Busy {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Busy(self.clone())
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn last_done(&self) -> Instant {
        self.opened + Duration::from_millis(self.last_done_ms.load(Ordering::SeqCst))
    }

    fn idle_deadline(&self, idle: Duration) -> Instant {
        if self.in_flight() > 0 {
            Instant::now() + idle
        } else {
            self.last_done() + idle
        }
    }

    fn is_idle(&self, idle: Duration) -> bool {
        self.in_flight() == 0 && self.last_done().elapsed() >= idle
    }
}

struct Busy(Arc<Activity>);

impl Drop for Busy {
    fn drop(&mut self) {
        let elapsed = u64::try_from(self.0.opened.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.0.last_done_ms.store(elapsed, Ordering::SeqCst);
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
