pub mod config;
pub mod fast;
pub mod history;

use std::error::Error;
use std::sync::Arc;

use fastline_core::storage::open_local_store;
use fastline_core::{
    Config, Connectivity, EngineDeps, ForegroundOnlyBridge, SessionEngine, StoreHistory,
    SystemClock,
};

/// Everything a command needs, wired against the local session file.
pub struct Context {
    pub config: Config,
    pub engine: SessionEngine,
    pub history: Arc<StoreHistory>,
    // Keeps the engine's connectivity receiver alive.
    _connectivity: Connectivity,
}

impl Context {
    pub fn open(user: Option<String>) -> Result<Self, Box<dyn Error>> {
        let config = Config::load()?;
        let user_id = user.unwrap_or_else(|| config.user.id.clone());
        let store = open_local_store()?;
        let connectivity = Connectivity::new(true);
        let history = Arc::new(StoreHistory::new(store.clone()));

        let engine = SessionEngine::new(
            user_id,
            EngineDeps {
                store: Arc::new(store.clone()),
                bridge: Arc::new(ForegroundOnlyBridge),
                history: history.clone(),
                clock: Arc::new(SystemClock),
                connectivity: connectivity.subscribe(),
            },
            config.engine_settings(),
        );
        engine.attach()?;

        Ok(Self {
            config,
            engine,
            history,
            _connectivity: connectivity,
        })
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
