//! Safe, tokenizer-free but word-boundary-safe SQL rewriting helpers.
//!
//! The source this engine is grounded on rewrites table names with a bare
//! `str::replace`, which is unsafe when the table name is a substring of
//! another identifier (`orders` vs `orders_archive`) or appears more than
//! once. Both helpers here anchor on `\b` word boundaries instead, so a
//! rewrite only ever touches whole identifiers.

use regex::Regex;

/// Replace every whole-identifier occurrence of `target` in `sql` with
/// `replacement`. Used by the Planner to retarget a query at a sample
/// table: every qualified and unqualified reference to the base table is
/// rewritten, not just the one after `FROM`.
pub fn replace_whole_identifier(sql: &str, target: &str, replacement: &str) -> String {
    let re = Regex::new(&format!(r"\b{}\b", regex::escape(target))).unwrap();
    re.replace_all(sql, replacement).into_owned()
}

/// Replace the first `FROM <target>` occurrence with `new_from` (which is
/// expected to itself start with `FROM`). Used by the MLOptimizer, which
/// only ever rewrites the table reference immediately following `FROM`
/// (to append an inline sampling predicate or swap in a sample table),
/// leaving any other qualified references to the base table untouched.
pub fn rewrite_from_clause(sql: &str, target: &str, new_from: &str) -> String {
    let re = Regex::new(&format!(r"(?i)\bFROM\s+{}\b", regex::escape(target))).unwrap();
    re.replacen(sql, 1, regex::NoExpand(new_from)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_whole_identifier_skips_substrings() {
        let sql = "SELECT * FROM orders_archive WHERE 1=1";
        let out = replace_whole_identifier(sql, "orders", "orders__sample_0_1");
        assert_eq!(out, sql, "orders_archive must not be touched");
    }

    #[test]
    fn replace_whole_identifier_rewrites_every_occurrence() {
        let sql = "SELECT orders.id FROM orders WHERE orders.amount > 10";
        let out = replace_whole_identifier(sql, "orders", "orders__sample_0_1");
        assert_eq!(
            out,
            "SELECT orders__sample_0_1.id FROM orders__sample_0_1 WHERE orders__sample_0_1.amount > 10"
        );
    }

    #[test]
    fn rewrite_from_clause_only_touches_the_from_table() {
        let sql = "SELECT orders.id FROM orders WHERE orders.amount > 10";
        let out = rewrite_from_clause(sql, "orders", "FROM orders WHERE (ROWID % 20) = 0");
        assert_eq!(
            out,
            "SELECT orders.id FROM orders WHERE (ROWID % 20) = 0 WHERE orders.amount > 10"
        );
    }

    #[test]
    fn rewrite_from_clause_is_case_insensitive_on_from() {
        let sql = "select * from Purchases";
        let out = rewrite_from_clause(sql, "Purchases", "FROM purchases__sample_0_01");
        assert_eq!(out, "select * FROM purchases__sample_0_01");
    }
}
