use crate::auth::AuthConfig;
use crate::content::{ChallengePlan, ContentError};
use crate::types::MatchConfig;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_PORT: u16 = 7878;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("Failed to load challenges: {0}")]
    Content(#[from] ContentError),
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: IpAddr,
    pub port: u16,
    pub game: MatchConfig,
    /// JSON challenge list; a placeholder plan is used when unset
    pub challenges_path: Option<PathBuf>,
    /// Credentials for the operator routes
    pub auth: AuthConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            game: MatchConfig::default(),
            challenges_path: None,
            auth: AuthConfig::default(),
        }
    }
}

/// Parse an env var, warning and falling back to `default` on garbage
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!("Ignoring invalid {}={:?}, using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let game = MatchConfig {
            max_players: env_or("MAX_PLAYERS", defaults.game.max_players),
            total_rounds: env_or("TOTAL_ROUNDS", defaults.game.total_rounds),
            round_seconds: env_or("ROUND_SECONDS", defaults.game.round_seconds),
            countdown_seconds: env_or("COUNTDOWN_SECONDS", defaults.game.countdown_seconds),
        };

        let config = Self {
            host: env_or("ROUNDTABLE_HOST", defaults.host),
            port: env_or("ROUNDTABLE_PORT", defaults.port),
            game,
            challenges_path: std::env::var("CHALLENGES_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            auth: AuthConfig::from_env(),
        };

        tracing::info!(
            max_players = config.game.max_players,
            total_rounds = config.game.total_rounds,
            round_seconds = config.game.round_seconds,
            countdown_seconds = config.game.countdown_seconds,
            "Match config loaded"
        );

        config
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Load the challenge plan, checking it covers every round
    pub fn load_content(&self) -> Result<ChallengePlan, ConfigError> {
        let plan = match &self.challenges_path {
            Some(path) => ChallengePlan::from_file(path)?,
            None => {
                tracing::info!("CHALLENGES_PATH not set, using placeholder challenges");
                ChallengePlan::placeholder(self.game.total_rounds)
            }
        };
        plan.ensure_covers(self.game.total_rounds)?;
        Ok(plan)
    }
}

impl MatchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_players == 0 {
            return Err(ConfigError::Zero("MAX_PLAYERS"));
        }
        if self.total_rounds == 0 {
            return Err(ConfigError::Zero("TOTAL_ROUNDS"));
        }
        if self.round_seconds == 0 {
            return Err(ConfigError::Zero("ROUND_SECONDS"));
        }
        if self.countdown_seconds == 0 {
            return Err(ConfigError::Zero("COUNTDOWN_SECONDS"));
        }
        Ok(())
    }
}
