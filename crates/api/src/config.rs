//! Server configuration loaded from the environment

/// Runtime configuration for the API server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string
    pub database_url: String,
    /// Address the HTTP listener binds to
    pub bind_address: String,
    /// Comma-separated origin allowlist for CORS
    pub allowed_origins: String,
    /// Whether checkout and webhook endpoints should be wired up
    pub enable_billing: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// `DATABASE_URL` is required; everything else has a development
    /// default. Stripe credentials are read separately by the billing
    /// crate so the server can come up without them.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string());

        let enable_billing = std::env::var("ENABLE_BILLING")
            .map(|v| v != "false")
            .unwrap_or(true);

        Ok(Self {
            database_url,
            bind_address,
            allowed_origins,
            enable_billing,
        })
    }
}
