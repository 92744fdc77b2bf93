/*!
 * KM service
 *
 * HTTP front of the key store: status, key creation (POST and GET
 * fallback), metadata lookup, sequential consume, non-consuming material
 * reads and the intrusion-simulation toggle.
 */

mod handlers;
mod logging;
mod state;

pub use handlers::ApiError;
pub use state::KmState;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::error::{QkdError, QkdResult};
use crate::protocol::{INTRUSION_PATH, KEYS_NEW_PATH, KEYS_PATH, STATUS_PATH};
use handlers::{
    handle_consume, handle_create_key, handle_create_key_get, handle_get_intrusion,
    handle_get_key, handle_material, handle_set_intrusion, handle_status,
};

pub fn build_router(state: Arc<KmState>) -> Router {
    Router::new()
        .route(STATUS_PATH, get(handle_status))
        .route(KEYS_PATH, post(handle_create_key))
        .route(KEYS_NEW_PATH, get(handle_create_key_get))
        .route("/api/v1/keys/:key_id", get(handle_get_key))
        .route("/api/v1/consume/:key_id", post(handle_consume))
        .route("/api/v1/consume/:key_id/", post(handle_consume))
        .route("/api/v1/material/:key_id", get(handle_material))
        .route(
            INTRUSION_PATH,
            get(handle_get_intrusion).post(handle_set_intrusion),
        )
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(axum::middleware::from_fn(logging::logging_middleware))
        .with_state(state)
}

/// Serves the KM routes on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<KmState>, shutdown: F) -> QkdResult<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    let app = build_router(state);
    log::info!("KM server ready and accepting connections addr={}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|err| {
        log::error!("KM server terminated unexpectedly addr={} error={}", addr, err);
        QkdError::IoError(err.to_string())
    })
}

/// Binds `addr` and serves until Ctrl-C.
pub async fn run_km_server(addr: SocketAddr, state: Arc<KmState>) -> QkdResult<()> {
    log::info!("binding KM server addr={}", addr);
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("shutdown signal received");
        }
    })
    .await
}

/// A KM server running on its own runtime thread.
///
/// Lets synchronous code (tests, embedding applications) host a KM without
/// owning an async runtime. The server stops when the handle is dropped.
#[derive(Debug)]
pub struct BackgroundServer {
    addr: SocketAddr,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl BackgroundServer {
    pub fn spawn(addr: SocketAddr, state: Arc<KmState>) -> QkdResult<Self> {
        let std_listener = std::net::TcpListener::bind(addr)?;
        std_listener.set_nonblocking(true)?;
        let addr = std_listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("km-server")
            .enable_all()
            .build()?;
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("km-server-main".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match TcpListener::from_std(std_listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            log::error!("KM server could not adopt listener: {}", e);
                            return;
                        }
                    };
                    let shutdown = async move {
                        let _ = rx.await;
                    };
                    if let Err(e) = serve(listener, state, shutdown).await {
                        log::error!("KM background server stopped: {}", e);
                    }
                });
            })?;

        Ok(Self {
            addr,
            shutdown: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for BackgroundServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
