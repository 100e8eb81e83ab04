use fastline_core::storage::open_local_store;
use fastline_core::{Config, StoreHistory};

use super::print_json;

pub fn run(user: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let user_id = user.unwrap_or(config.user.id);
    let history = StoreHistory::new(open_local_store()?);
    print_json(&history.summary(&user_id))
}
