use std::path::PathBuf;

use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::settings::{save_settings, Settings};

pub fn run(settings: &Settings) -> Result<()> {
    let data_dir = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&data_dir)?;

    let conn = get_connection(&settings.db_path())?;
    init_db(&conn)?;
    save_settings(settings)?;

    tracing::info!(data_dir = %data_dir.display(), "ledger initialized");
    println!("Initialized ledger at {}", settings.db_path().display());
    Ok(())
}
