// Taskforge API server

mod config;
mod health;
mod state;
mod tasks;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use config::AppConfig;
use state::AppState;
use taskforge_core::handlers::{ExternalSyncHandler, GenerateClustersHandler};
use taskforge_core::{
    CircuitBreakerRegistry, Clock, HandlerRegistry, InMemoryTaskStore, PostgresTaskStore,
    RunnerConfig, SystemClock, TaskRunner, TaskStore,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        tasks::list_tasks,
        tasks::create_task,
        tasks::get_task,
        tasks::cancel_task,
        tasks::retry_task,
        tasks::accept_task,
        tasks::revert_task,
        health::health,
        health::list_circuits,
        health::reset_circuit,
    ),
    components(schemas(
        tasks::CreateTaskRequest,
        tasks::ListTasksResponse,
        tasks::TaskDetailResponse,
        tasks::RevertResponse,
        health::HealthResponse,
        health::CircuitsResponse,
    )),
    tags(
        (name = "tasks", description = "Task queue and artifact log endpoints"),
        (name = "health", description = "Liveness and circuit-breaker admin endpoints"),
    ),
    info(
        title = "Taskforge API",
        version = "0.1.0",
        description = "Durable background task execution engine",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

async fn build_store(config: &AppConfig) -> Result<Arc<dyn TaskStore>> {
    match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("failed to connect to database")?;
            let store = PostgresTaskStore::new(pool);
            store.run_migrations().await.context("failed to run migrations")?;
            tracing::info!("connected to Postgres task store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::info!("DATABASE_URL not set or not postgres://; using in-memory task store");
            Ok(Arc::new(InMemoryTaskStore::new()))
        }
    }
}

fn register_handlers(registry: &mut HandlerRegistry, breakers: Arc<CircuitBreakerRegistry>) {
    let content = Arc::new(taskforge_core::InMemoryContentRepository::new());
    registry.register("generate_clusters", Arc::new(GenerateClustersHandler::new(content)));

    struct StubExternalService;
    #[async_trait::async_trait]
    impl taskforge_core::handlers::ExternalService for StubExternalService {
        async fn sync(&self, _entity_id: &str) -> Result<(), taskforge_core::handlers::ExternalServiceError> {
            Ok(())
        }
    }
    registry.register(
        "external_sync",
        Arc::new(ExternalSyncHandler::new(Arc::new(StubExternalService), breakers, "external_sync")),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env();

    let default_filter = if config.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("taskforge_api={default_filter},taskforge_core={default_filter},tower_http=info").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("taskforge-api starting...");

    let store = build_store(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let breakers = Arc::new(CircuitBreakerRegistry::new(clock.clone()));
    let state_clock = clock.clone();

    let mut handler_registry = HandlerRegistry::new();
    register_handlers(&mut handler_registry, breakers.clone());
    let handlers = Arc::new(handler_registry);

    let runner = Arc::new(TaskRunner::new(
        store.clone(),
        handlers.clone(),
        clock,
        RunnerConfig::default(),
    ));

    let poll_runner = runner.clone();
    let poll_task = tokio::spawn(async move { poll_runner.run_poll_loop().await });
    let reaper_runner = runner.clone();
    let reaper_task = tokio::spawn(async move { reaper_runner.run_reaper_loop().await });

    let state = AppState {
        store,
        handlers,
        breakers,
        runner: runner.clone(),
        clock: state_clock,
        started_at: chrono::Utc::now(),
    };

    let cors = if config.cors_origins.is_empty() {
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    let app = Router::new()
        .merge(tasks::routes(state.clone()))
        .merge(health::routes(state.clone()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("failed to bind to address")?;
    tracing::info!(%addr, "listening");

    let shutdown_signal = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("server error")?;

    runner.shutdown();
    let grace = Duration::from_secs(10);
    if tokio::time::timeout(grace, async {
        let _ = poll_task.await;
        let _ = reaper_task.await;
    })
    .await
    .is_err()
    {
        tracing::warn!("runner loops did not exit within the shutdown grace period; abandoning them");
    }

    Ok(())
}
