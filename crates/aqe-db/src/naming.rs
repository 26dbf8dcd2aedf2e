//! Canonical sample-table naming.
//!
//! The Sampler and the Planner's sample-table detector must agree
//! bit-for-bit on how a fraction renders into a table name, or the
//! planner fails to recognize a pre-built sample. A single routine here
//! is shared by both sides instead of each re-deriving the string with
//! its own precision, which is what let `0.001` and `0.0010` diverge in
//! the source this was distilled from.

const UNIFORM_MARKER: &str = "__sample_";
const STRATIFIED_MARKER: &str = "__strat_sample_";

/// Render a fraction in `(0,1)` the way sample table names encode it:
/// `.` becomes `_`, trailing zeros are stripped, and the result always
/// starts with `0_`.
pub fn fraction_name(f: f64) -> String {
    if f <= 0.0 {
        return "0_000".to_string();
    }

    let mut s = format!("{:.6}", f);
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.push('0');
    }
    s.replace('.', "_")
}

pub fn uniform_sample_table_name(table: &str, fraction: f64) -> String {
    format!("{table}{UNIFORM_MARKER}{}", fraction_name(fraction))
}

pub fn stratified_sample_table_name(table: &str, strata_column: &str, fraction: f64) -> String {
    format!(
        "{table}{STRATIFIED_MARKER}{strata_column}_{}",
        fraction_name(fraction)
    )
}

/// A parsed reference to a sample table: the base table it was drawn
/// from, the fraction it was built at, and (for stratified samples)
/// the stratification column.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleTableRef {
    pub base_table: String,
    pub fraction: f64,
    pub strata_column: Option<String>,
}

/// Parse a table name to see if it matches one of the sample naming
/// patterns. Returns `None` for ordinary tables.
pub fn parse_sample_table_name(name: &str) -> Option<SampleTableRef> {
    if let Some(idx) = name.find(STRATIFIED_MARKER) {
        let base_table = name[..idx].to_string();
        let rest = &name[idx + STRATIFIED_MARKER.len()..];
        let parts: Vec<&str> = rest.split('_').collect();
        if parts.len() < 3 {
            return None;
        }
        let fraction_str = format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1]);
        let fraction: f64 = fraction_str.parse().ok()?;
        let strata_column = parts[..parts.len() - 2].join("_");
        return Some(SampleTableRef {
            base_table,
            fraction,
            strata_column: Some(strata_column),
        });
    }

    if let Some(idx) = name.find(UNIFORM_MARKER) {
        let base_table = name[..idx].to_string();
        let fraction_part = &name[idx + UNIFORM_MARKER.len()..];
        let fraction_str = fraction_part.replace('_', ".");
        let fraction: f64 = fraction_str.parse().ok()?;
        return Some(SampleTableRef {
            base_table,
            fraction,
            strata_column: None,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_name_matches_spec_examples() {
        assert_eq!(fraction_name(0.05), "0_05");
        assert_eq!(fraction_name(0.001), "0_001");
    }

    #[test]
    fn fraction_name_is_scale_invariant() {
        // These render identically regardless of how many leading/trailing
        // zeros the caller happened to type the literal with.
        assert_eq!(fraction_name(0.001), fraction_name(0.0010));
    }

    #[test]
    fn uniform_round_trips() {
        let name = uniform_sample_table_name("purchases", 0.01);
        assert_eq!(name, "purchases__sample_0_01");

        let parsed = parse_sample_table_name(&name).unwrap();
        assert_eq!(parsed.base_table, "purchases");
        assert!((parsed.fraction - 0.01).abs() < 1e-9);
        assert!(parsed.strata_column.is_none());
    }

    #[test]
    fn stratified_round_trips() {
        let name = stratified_sample_table_name("orders", "region", 0.05);
        assert_eq!(name, "orders__strat_sample_region_0_05");

        let parsed = parse_sample_table_name(&name).unwrap();
        assert_eq!(parsed.base_table, "orders");
        assert_eq!(parsed.strata_column.as_deref(), Some("region"));
        assert!((parsed.fraction - 0.05).abs() < 1e-9);
    }

    #[test]
    fn ordinary_table_is_not_a_sample() {
        assert!(parse_sample_table_name("purchases").is_none());
        assert!(parse_sample_table_name("users_sample_export").is_none());
    }
}
