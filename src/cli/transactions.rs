use colored::Colorize;
use comfy_table::{Cell, CellAlignment, Table};

use crate::error::Result;
use crate::fmt::{clip, money};
use crate::importer::materializer::{category_name, list_transactions};
use crate::settings::Settings;

use super::open_ledger;

pub fn list(settings: &Settings, user: &str, import_id: Option<i64>) -> Result<()> {
    let conn = open_ledger(settings)?;
    let txns = list_transactions(&conn, user, import_id)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Description", "Amount", "Category", "Tags", "Import"]);
    for txn in &txns {
        let category = match txn.category_id {
            Some(id) => category_name(&conn, id)?.unwrap_or_default(),
            None => String::new(),
        };
        let amount = if txn.amount.is_sign_negative() {
            money(txn.amount).red().to_string()
        } else {
            money(txn.amount).green().to_string()
        };
        table.add_row(vec![
            Cell::new(txn.id),
            Cell::new(txn.transaction_date),
            Cell::new(clip(&txn.description, 40)),
            Cell::new(amount).set_alignment(CellAlignment::Right),
            Cell::new(category),
            Cell::new(txn.tags.join(", ")),
            Cell::new(txn.import_id.map(|id| id.to_string()).unwrap_or_default()),
        ]);
    }
    println!("Transactions for {user}\n{table}");
    println!("{} transactions", txns.len());
    Ok(())
}
