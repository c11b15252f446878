use regex::Regex;
use rusqlite::Connection;

use crate::error::{LedgerError, Result};
use crate::importer::materializer::get_or_create_category;

pub const MATCH_TYPES: &[&str] = &["contains", "starts_with", "regex"];

fn matches(description: &str, pattern: &str, match_type: &str) -> bool {
    let desc_upper = description.to_uppercase();
    let pat_upper = pattern.to_uppercase();
    match match_type {
        "contains" => desc_upper.contains(&pat_upper),
        "starts_with" => desc_upper.starts_with(&pat_upper),
        "regex" => Regex::new(pattern)
            .map(|re| re.is_match(description))
            .unwrap_or(false),
        _ => false,
    }
}

pub struct Rule {
    pub id: i64,
    pub pattern: String,
    pub match_type: String,
    pub category: String,
    pub priority: i64,
    pub hit_count: i64,
}

pub fn add_rule(conn: &Connection, pattern: &str, category: &str, match_type: &str, priority: i64) -> Result<i64> {
    if !MATCH_TYPES.contains(&match_type) {
        return Err(LedgerError::Config(vec![format!(
            "match_type: expected one of {}, got '{match_type}'",
            MATCH_TYPES.join(", ")
        )]));
    }
    if match_type == "regex" {
        Regex::new(pattern)
            .map_err(|e| LedgerError::Config(vec![format!("pattern: invalid regex: {e}")]))?;
    }
    let category_id = get_or_create_category(conn, category)?;
    conn.execute(
        "INSERT INTO rules (pattern, match_type, category_id, priority) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![pattern, match_type, category_id, priority],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_rules(conn: &Connection) -> Result<Vec<Rule>> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.pattern, r.match_type, c.name, r.priority, r.hit_count \
         FROM rules r JOIN categories c ON r.category_id = c.id \
         WHERE r.is_active = 1 ORDER BY r.priority DESC, r.id",
    )?;
    let rules = stmt
        .query_map([], |row| {
            Ok(Rule {
                id: row.get(0)?,
                pattern: row.get(1)?,
                match_type: row.get(2)?,
                category: row.get(3)?,
                priority: row.get(4)?,
                hit_count: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rules)
}

pub struct CategorizeResult {
    pub categorized: usize,
    pub uncategorized: usize,
}

/// Assign categories to uncategorized transactions (optionally only those
/// from one import) using the highest-priority matching rule.
pub fn categorize_transactions(conn: &Connection, import_id: Option<i64>) -> Result<CategorizeResult> {
    let mut rule_stmt = conn.prepare(
        "SELECT id, pattern, match_type, category_id FROM rules \
         WHERE is_active = 1 ORDER BY priority DESC, id",
    )?;
    let rules: Vec<(i64, String, String, i64)> = rule_stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut txn_stmt = conn.prepare(
        "SELECT id, description FROM transactions \
         WHERE category_id IS NULL AND (?1 IS NULL OR import_id = ?1)",
    )?;
    let pending: Vec<(i64, String)> = txn_stmt
        .query_map([import_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut categorized = 0usize;
    let mut uncategorized = 0usize;

    for (txn_id, description) in &pending {
        let hit = rules
            .iter()
            .find(|(_, pattern, match_type, _)| matches(description, pattern, match_type));
        match hit {
            Some((rule_id, _, _, category_id)) => {
                conn.execute(
                    "UPDATE transactions SET category_id = ?1 WHERE id = ?2",
                    rusqlite::params![category_id, txn_id],
                )?;
                conn.execute("UPDATE rules SET hit_count = hit_count + 1 WHERE id = ?1", [rule_id])?;
                categorized += 1;
            }
            None => uncategorized += 1,
        }
    }

    tracing::debug!(categorized, uncategorized, "categorization pass finished");
    Ok(CategorizeResult {
        categorized,
        uncategorized,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;
    use crate::importer::materializer::get_or_create_account;

    fn setup_txns(conn: &Connection, descriptions: &[&str]) {
        let account_id = get_or_create_account(conn, "alice", "Default Account").unwrap();
        for desc in descriptions {
            conn.execute(
                "INSERT INTO transactions (account_id, amount, transaction_type, transaction_date, description) \
                 VALUES (?1, '-50.00', 'expense', '2025-01-15', ?2)",
                rusqlite::params![account_id, desc],
            )
            .unwrap();
        }
    }

    fn category_of(conn: &Connection, description: &str) -> Option<String> {
        conn.query_row(
            "SELECT c.name FROM transactions t LEFT JOIN categories c ON t.category_id = c.id \
             WHERE t.description = ?1",
            [description],
            |r| r.get(0),
        )
        .unwrap()
    }

    #[test]
    fn test_contains_rule() {
        let (_dir, conn) = test_db();
        setup_txns(&conn, &["ADOBE CREATIVE CLOUD"]);
        add_rule(&conn, "adobe", "Software", "contains", 0).unwrap();
        let result = categorize_transactions(&conn, None).unwrap();
        assert_eq!(result.categorized, 1);
        assert_eq!(result.uncategorized, 0);
        assert_eq!(category_of(&conn, "ADOBE CREATIVE CLOUD").as_deref(), Some("Software"));
    }

    #[test]
    fn test_starts_with_rule() {
        let (_dir, conn) = test_db();
        setup_txns(&conn, &["STRIPE PAYMENT", "PAY STRIPE FEE"]);
        add_rule(&conn, "STRIPE", "Fees", "starts_with", 0).unwrap();
        let result = categorize_transactions(&conn, None).unwrap();
        assert_eq!(result.categorized, 1);
        assert_eq!(result.uncategorized, 1);
    }

    #[test]
    fn test_regex_rule() {
        let (_dir, conn) = test_db();
        setup_txns(&conn, &["AWS Services 12345"]);
        add_rule(&conn, r"^AWS.*\d+$", "Hosting", "regex", 0).unwrap();
        assert_eq!(categorize_transactions(&conn, None).unwrap().categorized, 1);
    }

    #[test]
    fn test_higher_priority_wins() {
        let (_dir, conn) = test_db();
        setup_txns(&conn, &["PAYMENT RECEIVED"]);
        add_rule(&conn, "PAYMENT", "Client Services", "contains", 10).unwrap();
        add_rule(&conn, "PAYMENT", "Fees", "contains", 5).unwrap();
        categorize_transactions(&conn, None).unwrap();
        assert_eq!(category_of(&conn, "PAYMENT RECEIVED").as_deref(), Some("Client Services"));
    }

    #[test]
    fn test_hit_count_incremented() {
        let (_dir, conn) = test_db();
        setup_txns(&conn, &["ADOBE PHOTOSHOP", "ADOBE ILLUSTRATOR"]);
        add_rule(&conn, "ADOBE", "Software", "contains", 0).unwrap();
        categorize_transactions(&conn, None).unwrap();
        let rules = list_rules(&conn).unwrap();
        assert_eq!(rules[0].hit_count, 2);
    }

    #[test]
    fn test_rejects_unknown_match_type_and_bad_regex() {
        let (_dir, conn) = test_db();
        assert!(matches!(
            add_rule(&conn, "x", "Misc", "fuzzy", 0),
            Err(LedgerError::Config(_))
        ));
        assert!(matches!(
            add_rule(&conn, "(unclosed", "Misc", "regex", 0),
            Err(LedgerError::Config(_))
        ));
        assert!(list_rules(&conn).unwrap().is_empty());
    }
}
