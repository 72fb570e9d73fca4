use clap::Parser;
use secrecy::SecretString;
use std::net::{IpAddr, SocketAddr};

use super::types::LogLevel;

// -----------------------------------------------------------------------------
// ----- Args ------------------------------------------------------------------

/// Environment-style configuration. Every knob is settable as a flag or a
/// `TGBIN_*` variable; credentials are required and checked at startup.
#[derive(Parser, Debug)]
#[command(name = "tgbin", version, about = "Pooled remote-object gateway")]
pub struct Args {
    // IPv4 or IPv6 literal for the HTTP front (e.g., 0.0.0.0, ::1).
    #[arg(long = "host", short = 'H', env = "TGBIN_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    #[arg(long = "port", short = 'p', env = "TGBIN_PORT", default_value_t = 8080)]
    pub port: u16,

    // Backing-store application credentials. Required via CLI or ENV.
    #[arg(long = "api-id", env = "TGBIN_API_ID")]
    pub api_id: i32,

    #[arg(long = "api-hash", env = "TGBIN_API_HASH")]
    pub api_hash: String,

    // Service (bot) token used to sign every session in.
    #[arg(long = "bot-token", env = "TGBIN_BOT_TOKEN")]
    pub bot_token: String,

    // The one remote channel all objects live in.
    #[arg(long = "bin-channel", env = "TGBIN_BIN_CHANNEL")]
    pub bin_channel: i64,

    #[arg(long = "pool-size", env = "TGBIN_POOL_SIZE", default_value_t = 4)]
    pub pool_size: usize,

    // Discover and route through a relay before falling back to direct.
    #[arg(long = "proxy", env = "TGBIN_PROXY", default_value_t = false)]
    pub proxy_enabled: bool,

    // Override the primary relay-directory base URL (mostly for tests).
    #[arg(long = "proxy-source", env = "TGBIN_PROXY_SOURCE")]
    pub proxy_source: Option<String>,

    #[arg(long = "log", default_value = "info")]
    pub log_level: LogLevel,
}

// -----------------------------------------------------------------------------
// ----- CliConfig -------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct CliConfig {
    pub listen_addr: SocketAddr,
    pub api_id: i32,
    pub api_hash: SecretString,
    pub bot_token: SecretString,
    pub bin_channel: i64,
    pub pool_size: usize,
    pub proxy_enabled: bool,
    pub proxy_source: Option<String>,
    pub log_level: LogLevel,
}

impl CliConfig {
    pub fn from_args() -> Self {
        let args = Args::try_parse().unwrap_or_else(|e| panic!("Invalid CLI/ENV: {e}"));
        Self::from_parsed(args)
    }

    pub fn from_parsed(args: Args) -> Self {
        let cfg = Self {
            listen_addr: SocketAddr::from((args.host, args.port)),
            api_id: args.api_id,
            api_hash: SecretString::new(args.api_hash.into_boxed_str()),
            bot_token: SecretString::new(args.bot_token.into_boxed_str()),
            bin_channel: args.bin_channel,
            pool_size: args.pool_size,
            proxy_enabled: args.proxy_enabled,
            proxy_source: args.proxy_source,
            log_level: args.log_level,
        };
        cfg.validate();
        cfg
    }

    fn validate(&self) {
        use secrecy::ExposeSecret;

        if self.api_id == 0 {
            panic!("invalid configuration: TGBIN_API_ID must be non-zero");
        }
        if self.api_hash.expose_secret().is_empty() {
            panic!("invalid configuration: TGBIN_API_HASH is empty");
        }
        if self.bot_token.expose_secret().is_empty() {
            panic!("invalid configuration: TGBIN_BOT_TOKEN is empty");
        }
        if self.bin_channel == 0 {
            panic!("invalid configuration: TGBIN_BIN_CHANNEL must be set");
        }
        if self.pool_size == 0 {
            panic!("invalid configuration: TGBIN_POOL_SIZE must be at least 1");
        }
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
