use comfy_table::{Cell, Table};

use crate::categorizer::{add_rule, list_rules};
use crate::error::Result;
use crate::settings::Settings;

use super::open_ledger;

pub fn add(settings: &Settings, pattern: &str, category: &str, match_type: &str, priority: i64) -> Result<()> {
    let conn = open_ledger(settings)?;
    let id = add_rule(&conn, pattern, category, match_type, priority)?;
    println!("Added rule {id}: '{pattern}' \u{2192} {category}");
    Ok(())
}

pub fn list(settings: &Settings) -> Result<()> {
    let conn = open_ledger(settings)?;
    let rules = list_rules(&conn)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Pattern", "Type", "Category", "Priority", "Hits"]);
    for rule in rules {
        table.add_row(vec![
            Cell::new(rule.id),
            Cell::new(rule.pattern),
            Cell::new(rule.match_type),
            Cell::new(rule.category),
            Cell::new(rule.priority),
            Cell::new(rule.hit_count),
        ]);
    }
    println!("Rules\n{table}");
    Ok(())
}
