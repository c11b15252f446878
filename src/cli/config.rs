use crate::error::{LedgerError, Result};
use crate::settings::{load_settings, save_settings, settings_path, Settings};

pub fn show(settings: &Settings) -> Result<()> {
    println!("# {}", settings_path().display());
    println!("{}", serde_json::to_string_pretty(settings)?);
    Ok(())
}

/// Apply `key=value` pairs to the stored settings, all or nothing.
pub fn set(pairs: &[String]) -> Result<()> {
    let mut updates = Vec::with_capacity(pairs.len());
    let mut malformed = Vec::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                updates.push((key.trim().to_string(), value.to_string()))
            }
            _ => malformed.push(format!("'{pair}': expected key=value")),
        }
    }
    if !malformed.is_empty() {
        return Err(LedgerError::Config(malformed));
    }

    let updated = load_settings().with_updates(&updates)?;
    save_settings(&updated)?;
    for (key, _) in &updates {
        println!("Updated {key}");
    }
    Ok(())
}
