use std::str::FromStr;

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;

use crate::error::{LedgerError, Result};
use crate::models::{NormalizedRow, Transaction, TransactionType};

pub fn get_or_create_account(conn: &Connection, owner: &str, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO accounts (owner, name) VALUES (?1, ?2)",
        rusqlite::params![owner, name],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM accounts WHERE owner = ?1 AND name = ?2",
        rusqlite::params![owner, name],
        |r| r.get(0),
    )?)
}

/// New categories get the default color and icon.
pub fn get_or_create_category(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute("INSERT OR IGNORE INTO categories (name) VALUES (?1)", [name])?;
    Ok(conn.query_row("SELECT id FROM categories WHERE name = ?1", [name], |r| r.get(0))?)
}

pub fn get_or_create_tag(conn: &Connection, name: &str, created_by: &str) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO tags (name, created_by) VALUES (?1, ?2)",
        rusqlite::params![name, created_by],
    )?;
    Ok(conn.query_row("SELECT id FROM tags WHERE name = ?1", [name], |r| r.get(0))?)
}

pub fn account_balance(conn: &Connection, account_id: i64) -> Result<Decimal> {
    let raw: String = conn.query_row("SELECT balance FROM accounts WHERE id = ?1", [account_id], |r| {
        r.get(0)
    })?;
    Decimal::from_str(&raw)
        .map_err(|e| LedgerError::Other(format!("Account {account_id} has corrupt balance '{raw}': {e}")))
}

fn adjust_balance(conn: &Connection, account_id: i64, delta: Decimal) -> Result<()> {
    let balance = account_balance(conn, account_id)? + delta;
    conn.execute(
        "UPDATE accounts SET balance = ?1 WHERE id = ?2",
        rusqlite::params![balance.to_string(), account_id],
    )?;
    Ok(())
}

/// Turns normalized rows into stored transactions for one owner.
pub struct TransactionMaterializer<'a> {
    conn: &'a Connection,
    owner: String,
    account_name: String,
    import_id: Option<i64>,
}

impl<'a> TransactionMaterializer<'a> {
    pub fn new(conn: &'a Connection, owner: &str, account_name: &str) -> Self {
        Self {
            conn,
            owner: owner.to_string(),
            account_name: account_name.to_string(),
            import_id: None,
        }
    }

    pub fn for_import(mut self, import_id: i64) -> Self {
        self.import_id = Some(import_id);
        self
    }

    /// Store one row atomically: account, category and tags are resolved,
    /// the transaction inserted and the account balance moved. Nothing is
    /// kept if any step fails.
    pub fn materialize(&self, row: &NormalizedRow) -> Result<i64> {
        let tx = rusqlite::Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let account_id = get_or_create_account(&tx, &self.owner, &self.account_name)?;
        let category_id = row
            .category
            .as_deref()
            .map(|name| get_or_create_category(&tx, name))
            .transpose()?;

        let kind = TransactionType::from_amount(row.amount);
        tx.execute(
            "INSERT INTO transactions (account_id, category_id, amount, transaction_type, \
             transaction_date, posted_date, description, reference, check_number, notes, \
             is_reconciled, import_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11)",
            rusqlite::params![
                account_id,
                category_id,
                row.amount.to_string(),
                kind.as_str(),
                row.transaction_date.format("%Y-%m-%d").to_string(),
                row.posted_date.map(|d| d.format("%Y-%m-%d").to_string()),
                row.description,
                row.reference,
                row.check_number,
                row.notes,
                self.import_id,
            ],
        )?;
        let txn_id = tx.last_insert_rowid();

        for tag in &row.tags {
            let tag_id = get_or_create_tag(&tx, tag, &self.owner)?;
            tx.execute(
                "INSERT OR IGNORE INTO transaction_tags (transaction_id, tag_id) VALUES (?1, ?2)",
                rusqlite::params![txn_id, tag_id],
            )?;
        }

        adjust_balance(&tx, account_id, row.amount)?;
        tx.commit()?;
        Ok(txn_id)
    }
}

fn tags_for(conn: &Connection, txn_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT g.name FROM tags g JOIN transaction_tags tt ON tt.tag_id = g.id \
         WHERE tt.transaction_id = ?1 ORDER BY g.name",
    )?;
    let names = stmt
        .query_map([txn_id], |r| r.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(names)
}

/// Transactions for an owner, optionally limited to one import.
pub fn list_transactions(conn: &Connection, owner: &str, import_id: Option<i64>) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(
        "SELECT t.id, t.account_id, t.category_id, t.amount, t.transaction_type, \
         t.transaction_date, t.description, t.is_reconciled, t.import_id \
         FROM transactions t JOIN accounts a ON t.account_id = a.id \
         WHERE a.owner = ?1 AND (?2 IS NULL OR t.import_id = ?2) \
         ORDER BY t.transaction_date, t.id",
    )?;
    let rows: Vec<(i64, i64, Option<i64>, String, String, String, String, bool, Option<i64>)> = stmt
        .query_map(rusqlite::params![owner, import_id], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
                r.get(7)?,
                r.get(8)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, account_id, category_id, amount, kind, date, description, is_reconciled, import_id)| {
            let amount = Decimal::from_str(&amount)
                .map_err(|e| LedgerError::Other(format!("Transaction {id} has corrupt amount: {e}")))?;
            let transaction_date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| LedgerError::Other(format!("Transaction {id} has corrupt date: {e}")))?;
            Ok(Transaction {
                id,
                account_id,
                category_id,
                amount,
                transaction_type: if kind == "expense" {
                    TransactionType::Expense
                } else {
                    TransactionType::Income
                },
                transaction_date,
                description,
                is_reconciled,
                import_id,
                tags: tags_for(conn, id)?,
            })
        })
        .collect()
}

pub fn category_name(conn: &Connection, category_id: i64) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT name FROM categories WHERE id = ?1", [category_id], |r| r.get(0))
        .optional()?)
}
