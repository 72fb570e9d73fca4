pub mod cli;
pub mod types;

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::sync::Arc;

use cli::CliConfig;

// -----------------------------------------------------------------------------
// ----- Global Singleton ------------------------------------------------------

static ROOT_CONFIG: OnceCell<Arc<RwLock<CliConfig>>> = OnceCell::new();

// -----------------------------------------------------------------------------
// ----- Config ----------------------------------------------------------------

pub struct Config;

impl Config {
    /// Parses CLI/ENV once and validates. Panics on missing credentials;
    /// the process has nothing useful to do without them.
    pub fn init() {
        ROOT_CONFIG.get_or_init(|| Arc::new(RwLock::new(CliConfig::from_args())));
    }

    pub fn snapshot() -> CliConfig {
        ROOT_CONFIG
            .get()
            .expect("Config not initialized; call Config::init() first")
            .read()
            .clone()
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
