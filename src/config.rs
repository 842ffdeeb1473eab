// Application configuration, loaded from environment variables and CLI flags.

/// Settings for the external tournament-hosting provider OAuth bridge.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Authorization endpoint the user's browser is sent to.
    pub authorize_url: String,
    /// Token endpoint used for code exchange and refresh.
    pub token_url: String,
    /// Base URL of the provider's REST API.
    pub api_base: String,
    /// Redirect URI registered with the provider.
    pub redirect_uri: String,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database URL (SQLite connection string by default).
    pub database_url: String,
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Whether to run in local mode (no rate limiting).
    pub local_mode: bool,
    /// Tournament provider bridge settings.
    pub provider: ProviderConfig,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables:
    /// - `DATABASE_URL` - connection string (default: `sqlite:ladder.db?mode=rwc`)
    /// - `PORT` - HTTP server port (default: 3000)
    /// - `LADDER_LOCAL_MODE` - set to `true` to enable local mode
    /// - `PROVIDER_CLIENT_ID` / `PROVIDER_CLIENT_SECRET` - OAuth credentials
    /// - `PROVIDER_AUTHORIZE_URL` / `PROVIDER_TOKEN_URL` / `PROVIDER_API_BASE`
    /// - `PROVIDER_REDIRECT_URI` - callback URL registered with the provider
    ///
    /// CLI flags:
    /// - `--local` - enable local mode (same as `LADDER_LOCAL_MODE=true`)
    /// - `--port <PORT>` - override the port
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:ladder.db?mode=rwc".to_string());

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = Self::parse_cli_value(&args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let local_mode = args.contains(&"--local".to_string())
            || std::env::var("LADDER_LOCAL_MODE")
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false);

        let provider = ProviderConfig {
            client_id: env_or("PROVIDER_CLIENT_ID", "ladder-dev-client"),
            client_secret: env_or("PROVIDER_CLIENT_SECRET", "ladder-dev-secret"),
            authorize_url: env_or(
                "PROVIDER_AUTHORIZE_URL",
                "https://tournaments.example.com/oauth/authorize",
            ),
            token_url: env_or(
                "PROVIDER_TOKEN_URL",
                "https://tournaments.example.com/oauth/token",
            ),
            api_base: env_or("PROVIDER_API_BASE", "https://tournaments.example.com/api/v1"),
            redirect_uri: env_or(
                "PROVIDER_REDIRECT_URI",
                "http://localhost:3000/api/provider/callback",
            ),
        };

        Config {
            database_url,
            port,
            local_mode,
            provider,
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Global flag indicating local mode is active.
/// This is set once at startup and read by the rate limiter.
static LOCAL_MODE: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

/// Set the local mode flag (called once at startup).
pub fn set_local_mode(enabled: bool) {
    LOCAL_MODE.store(enabled, std::sync::atomic::Ordering::Relaxed);
}

/// Check if local mode is active.
pub fn is_local_mode() -> bool {
    LOCAL_MODE.load(std::sync::atomic::Ordering::Relaxed)
}
