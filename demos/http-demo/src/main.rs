//! Runnable demo wiring `interceptor-kit`'s chain to `axum` and `sqlx`
//! against Postgres, in the shape of the teacher's own `examples/actixsqlx`
//! and `examples/axummetrics`: one `AppState` holding a built chain per
//! operation, routes that extract a `RequestContext` from the incoming
//! request and hand it to the already-wrapped handler.

mod handlers;
mod subject;

use axum::routing::{get, post};
use axum::Router;
use interceptor_kit::audit::postgres::PostgresAuditSink;
use interceptor_kit::audit::AuditSpec;
use interceptor_kit::backend::InMemoryBackend;
use interceptor_kit::cache::{CacheManager, CacheScope, CacheSpec};
use interceptor_kit::chain::{ChainSpec, InterceptorChain, Runtime};
use interceptor_kit::config::Config;
use interceptor_kit::idempotency::postgres::PostgresIdempotencyStore;
use interceptor_kit::idempotency::{cleanup, IdempotencySpec};
use interceptor_kit::observability::NoOpMetrics;
use interceptor_kit::policy::{CachingPolicyStore, InMemoryPolicyStore};
use interceptor_kit::ratelimit::{RateLimitSpec, RateLimiterRegistry};
use interceptor_kit::retry::RetrySpec;
use interceptor_kit::HandlerFn;
use std::sync::Arc;
use std::time::Duration;

type DemoRuntime = Runtime<InMemoryBackend, CachingPolicyStore<InMemoryPolicyStore>, PostgresIdempotencyStore, PostgresAuditSink>;
type DemoChain = InterceptorChain<InMemoryBackend, CachingPolicyStore<InMemoryPolicyStore>, PostgresIdempotencyStore, PostgresAuditSink>;

/// Application state: the built, ready-to-call handler for each registered
/// operation, plus the subject resolver shared across routes.
#[derive(Clone)]
pub struct AppState {
    pub get_invoice: HandlerFn,
    pub capture_payment: HandlerFn,
    pub generate_report: HandlerFn,
    pub resolver: Arc<subject::AxumSubjectResolver>,
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .ok();

    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("failed to connect to Postgres");

    let config = Arc::new(Config::default());

    let idempotency_store = Arc::new(PostgresIdempotencyStore::new(pool.clone()));
    cleanup::spawn_cleanup_task(idempotency_store.clone(), config.idempotency_cleanup_interval);

    let runtime: Arc<DemoRuntime> = Arc::new(Runtime {
        policy_store: Arc::new(CachingPolicyStore::new(Arc::new(InMemoryPolicyStore::new()), config.policy_cache_ttl)),
        idempotency_store,
        audit_sink: Arc::new(PostgresAuditSink::new(pool.clone())),
        cache_manager: Arc::new(CacheManager::new(InMemoryBackend::new, config.clone())),
        rate_limiters: Arc::new(RateLimiterRegistry::new()),
        metrics: Arc::new(NoOpMetrics),
        config,
    });

    let chain = DemoChain::new(runtime);

    let state = AppState {
        get_invoice: build_get_invoice(&chain),
        capture_payment: build_capture_payment(&chain),
        generate_report: build_generate_report(&chain),
        resolver: Arc::new(subject::AxumSubjectResolver::new(std::env::var("API_KEY_PEPPER").ok())),
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .route("/invoices/{id}", get(handlers::get_invoice))
        .route("/payments/capture", post(handlers::capture_payment))
        .route("/reports/generate", post(handlers::generate_report))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .expect("failed to bind port 3000");

    println!("Server running on http://127.0.0.1:3000");
    println!("GET  /invoices/{{id}}        - cached read, demonstrates the cache stage");
    println!("POST /payments/capture      - idempotent write, requires Idempotency-Key header");
    println!("POST /reports/generate      - rate-limited + retried operation");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .await
        .expect("server error");
}

/// `invoice.read`: audit + cache, no idempotency (it's a read), no rate limit
/// or retry declared for this demo operation.
fn build_get_invoice(chain: &DemoChain) -> HandlerFn {
    let spec = ChainSpec {
        audit: Some(AuditSpec { capture_result: true, ..Default::default() }),
        cache: Some(CacheSpec { enabled: true, cache_name: "invoices:ttl=30".into(), ttl: None, scope: CacheScope::Global }),
        ..Default::default()
    };
    chain.build(spec, Arc::new(handlers::fetch_invoice))
}

/// `payment.capture`: audit + idempotency + retry on transient failure. No
/// cache — capturing a payment is a write.
fn build_capture_payment(chain: &DemoChain) -> HandlerFn {
    let spec = ChainSpec {
        audit: Some(AuditSpec { capture_args: true, capture_result: true, ..Default::default() }),
        idempotency: Some(IdempotencySpec { enabled: true, require_key: true, ttl: Duration::from_secs(24 * 3600), ..Default::default() }),
        retry: Some(RetrySpec { max_attempts: 3, base_delay: Duration::from_millis(50), ..Default::default() }),
        ..Default::default()
    };
    chain.build(spec, Arc::new(handlers::capture_payment_handler))
}

/// `report.generate`: audit + rate limit + retry, no cache or idempotency —
/// every call regenerates the report, but callers are bounded to 5 per second
/// per subject type.
fn build_generate_report(chain: &DemoChain) -> HandlerFn {
    let spec = ChainSpec {
        audit: Some(AuditSpec::default()),
        rate_limit: Some(RateLimitSpec { enabled: true, limit_for_period: 5 }),
        retry: Some(RetrySpec { max_attempts: 2, base_delay: Duration::from_millis(100), ..Default::default() }),
        ..Default::default()
    };
    chain.build(spec, Arc::new(handlers::generate_report_handler))
}
