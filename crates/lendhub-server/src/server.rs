use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use lendhub_cache::{CacheService, ConnectionManager, LimitClass, RateLimiter};
use lendhub_jobs::{
    EXPECTED_JOB_TYPES, HandlerDeps, JobQueue, QueueName, RecurringScheduler, WorkerPool,
    default_registry,
};
use serde_json::json;

use crate::config::AppConfig;
use crate::handlers::{self, BookSource, DemoBookSource};
use crate::middleware as app_middleware;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheService>,
    pub limiter: Arc<RateLimiter>,
    pub jobs: Arc<JobQueue>,
    pub books: Arc<dyn BookSource>,
}

pub fn build_app(state: AppState) -> Router {
    let search_limit = app_middleware::RateLimitState::new(state.limiter.clone(), LimitClass::Search);

    let search_routes = Router::new()
        .route("/api/books/search", get(handlers::search_books))
        .route_layer(middleware::from_fn_with_state(
            search_limit,
            app_middleware::rate_limit,
        ));

    Router::new()
        // Health and info endpoints
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/api/health/cache", get(handlers::cache_health))
        .route("/api/health/queues", get(handlers::queue_health))
        .merge(search_routes)
        .with_state(state)
        // Middleware stack (order: request id -> cors -> trace)
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %method,
                        http.target = %uri,
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
}

pub struct ServerBuilder {
    config: AppConfig,
    handler_deps: HandlerDeps,
    books: Arc<dyn BookSource>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            handler_deps: HandlerDeps::logging(),
            books: Arc::new(DemoBookSource),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Swap in real side-effect collaborators for the job handlers.
    pub fn with_handler_deps(mut self, deps: HandlerDeps) -> Self {
        self.handler_deps = deps;
        self
    }

    pub fn with_book_source(mut self, books: Arc<dyn BookSource>) -> Self {
        self.books = books;
        self
    }

    pub async fn build(self) -> anyhow::Result<LendhubServer> {
        let cfg = self.config;
        let cm = Arc::new(ConnectionManager::connect(&cfg.redis).await);

        let cache = Arc::new(CacheService::new(cm.clone()));
        let limiter = Arc::new(RateLimiter::new(cm.clone()));
        let jobs = Arc::new(JobQueue::new(cm.clone()));

        let (workers, scheduler_shutdown) = if cfg.jobs.enabled {
            let registry = default_registry(&self.handler_deps)?;
            let workers = WorkerPool::start_checked(
                jobs.clone(),
                registry,
                cfg.jobs.worker_config(),
                &EXPECTED_JOB_TYPES,
            )?;

            let mut scheduler = RecurringScheduler::new(jobs.clone(), cfg.jobs.scheduler_config());
            scheduler.add(
                QueueName::Cleanup,
                "comprehensive-cleanup",
                json!({}),
                &cfg.jobs.cleanup_cron,
            )?;
            let scheduler_shutdown = scheduler.start();

            (Some(workers), Some(scheduler_shutdown))
        } else {
            tracing::info!("background jobs disabled, serving without workers");
            (None, None)
        };

        let state = AppState {
            cache,
            limiter,
            jobs,
            books: self.books,
        };

        Ok(LendhubServer {
            addr: cfg.addr(),
            app: build_app(state),
            cm,
            workers,
            scheduler_shutdown,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LendhubServer {
    addr: SocketAddr,
    app: Router,
    cm: Arc<ConnectionManager>,
    workers: Option<WorkerPool>,
    scheduler_shutdown: Option<watch::Sender<bool>>,
}

impl LendhubServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        // HTTP is down; drain the background machinery before exit.
        if let Some(shutdown) = self.scheduler_shutdown {
            let _ = shutdown.send(true);
        }
        if let Some(workers) = self.workers {
            workers.shutdown().await;
        }
        self.cm.shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
