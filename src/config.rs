use zeroize::Zeroizing;

const PLACEHOLDER_SECRET: &str = "CHANGE_ME_LOCATION_TOKEN_SECRET";

pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// HS256 secret for location claim tokens.
    pub token_secret: Zeroizing<String>,
    /// Used when an issue request omits its expiration.
    pub default_ttl_days: i64,
    pub admin_key: Option<String>,
    pub environment: String,
    /// Unbound shops younger than this survive the orphan sweep.
    pub orphan_grace_minutes: i64,
}

impl Config {
    /// Development defaults around an explicit secret. Used by tests and
    /// `serve --in-memory`.
    pub fn with_secret(secret: &str) -> Self {
        Self {
            port: 3000,
            database_url: String::new(),
            token_secret: Zeroizing::new(secret.to_string()),
            default_ttl_days: 30,
            admin_key: None,
            environment: "development".into(),
            orphan_grace_minutes: 15,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn orphan_grace(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.orphan_grace_minutes)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("database_url", &"****")
            .field("token_secret", &"****")
            .field("default_ttl_days", &self.default_ttl_days)
            .field("admin_key", &self.admin_key.as_ref().map(|_| "****"))
            .field("environment", &self.environment)
            .field("orphan_grace_minutes", &self.orphan_grace_minutes)
            .finish()
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let environment = std::env::var("FOREX_ENV")
        .or_else(|_| std::env::var("RUST_ENV"))
        .unwrap_or_else(|_| "development".into());

    let token_secret = std::env::var("LOCATION_TOKEN_SECRET")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| PLACEHOLDER_SECRET.into());

    if token_secret == PLACEHOLDER_SECRET {
        if environment == "production" {
            anyhow::bail!(
                "LOCATION_TOKEN_SECRET is not set. \
                 Set a long random secret before running in production."
            );
        }
        eprintln!("⚠️  LOCATION_TOKEN_SECRET is not set; using insecure placeholder. Set a random secret for production.");
    }

    let default_ttl_days = std::env::var("LOCATION_TOKEN_DEFAULT_EXPIRATION_DAYS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30);
    if !(1..=365).contains(&default_ttl_days) {
        anyhow::bail!(
            "LOCATION_TOKEN_DEFAULT_EXPIRATION_DAYS must be between 1 and 365, got {}",
            default_ttl_days
        );
    }

    Ok(Config {
        port: std::env::var("FOREX_PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .unwrap_or(3000),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/forexfinder".into()),
        token_secret: Zeroizing::new(token_secret),
        default_ttl_days,
        admin_key: std::env::var("FOREX_ADMIN_KEY").ok().filter(|k| !k.is_empty()),
        environment,
        orphan_grace_minutes: std::env::var("FOREX_ORPHAN_GRACE_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(15),
    })
}
