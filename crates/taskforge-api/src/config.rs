//! Environment-sourced process configuration

/// Recognised environment variables. Runner timing constants are not
/// configurable this way by design — they are an engine invariant, tests
/// override them by constructing a non-default `RunnerConfig` directly.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub cors_origins: Vec<String>,
    pub port: u16,
    pub debug: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| url.starts_with("postgres://") || url.starts_with("postgresql://"));

        let cors_origins = std::env::var("CORS_ORIGINS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let debug = std::env::var("DEBUG").is_ok();

        Self {
            database_url,
            cors_origins,
            port,
            debug,
        }
    }
}
