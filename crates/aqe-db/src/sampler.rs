use sqlx::SqlitePool;

use crate::discovery::quote_identifier;
use crate::error::{AqeError, AqeResult};
use crate::metadata::MetadataStore;
use crate::naming::{stratified_sample_table_name, uniform_sample_table_name};
use crate::types::StratumRecord;

/// Allocation rule for splitting a total sampling fraction across strata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Allocation {
    /// Same fraction in every stratum.
    Proportional,
    /// Weight each stratum's sample size by `pop_size * stddev(variance_col)`,
    /// concentrating samples where the variance is highest.
    NeymanOptimal,
}

/// One stratum's planned allocation, before the sample is materialized.
#[derive(Debug, Clone)]
struct StratumPlan {
    strata_value: String,
    pop_size: i64,
    variance: f64,
    sample_size: i64,
    fraction: f64,
    weight: f64,
}

/// Builds uniform and stratified samples against the backing store and
/// records their metadata. Holds no connection state itself; every method
/// takes the pool it should run against.
#[derive(Debug, Clone, Default)]
pub struct Sampler;

impl Sampler {
    /// Create a uniform random sample of `table` at the given `fraction`
    /// (exclusive of 0 and 1). Drops and recreates the sample table if one
    /// already exists at that fraction.
    pub async fn create_uniform_sample(
        &self,
        pool: &SqlitePool,
        table: &str,
        fraction: f64,
    ) -> AqeResult<(String, i64)> {
        if !(0.0 < fraction && fraction < 1.0) {
            return Err(AqeError::InvalidArgument(format!(
                "sampling fraction must be in (0, 1), got {fraction}"
            )));
        }

        let sample_name = uniform_sample_table_name(table, fraction);
        let table_quoted = quote_identifier(table);
        let sample_quoted = quote_identifier(&sample_name);

        sqlx::query(&format!("DROP TABLE IF EXISTS {sample_quoted}"))
            .execute(pool)
            .await?;

        sqlx::query(&format!(
            "CREATE TABLE {sample_quoted} AS SELECT * FROM {table_quoted} \
             WHERE (abs(random()) / 9223372036854775807.0) < {fraction}"
        ))
        .execute(pool)
        .await?;

        let count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {sample_quoted}"))
                .fetch_one(pool)
                .await?;

        let base_count: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table_quoted}"))
                .fetch_one(pool)
                .await?;

        MetadataStore::upsert_table_stats(pool, table, base_count).await?;
        MetadataStore::insert_sample_descriptor(pool, table, &sample_name, fraction, None)
            .await?;

        Ok((sample_name, count))
    }

    /// Create a stratified sample of `table`, split over the distinct
    /// values of `strata_column`. When `variance_column` is given, strata
    /// are allocated with Neyman-optimal weighting on that column's
    /// in-stratum variance; otherwise each stratum gets the same fraction.
    pub async fn create_stratified_sample(
        &self,
        pool: &SqlitePool,
        table: &str,
        strata_column: &str,
        total_fraction: f64,
        variance_column: Option<&str>,
    ) -> AqeResult<(String, Vec<StratumRecord>)> {
        if !(0.0 < total_fraction && total_fraction < 1.0) {
            return Err(AqeError::InvalidArgument(format!(
                "sampling fraction must be in (0, 1), got {total_fraction}"
            )));
        }

        let mut strata = self
            .analyze_strata(pool, table, strata_column, variance_column)
            .await?;

        if strata.is_empty() {
            return Err(AqeError::InvariantViolation(format!(
                "table {table} has no non-null values in strata column {strata_column}"
            )));
        }

        let allocation = if variance_column.is_some() {
            Allocation::NeymanOptimal
        } else {
            Allocation::Proportional
        };
        allocate(&mut strata, total_fraction, allocation);

        let sample_name = stratified_sample_table_name(table, strata_column, total_fraction);
        let sample_quoted = quote_identifier(&sample_name);
        let table_quoted = quote_identifier(table);
        let strata_col_quoted = quote_identifier(strata_column);

        sqlx::query(&format!("DROP TABLE IF EXISTS {sample_quoted}"))
            .execute(pool)
            .await?;

        let union_parts: Vec<String> = strata
            .iter()
            .filter(|s| s.sample_size > 0)
            .map(|s| {
                format!(
                    "SELECT * FROM {table_quoted} WHERE {strata_col_quoted} = '{}' \
                     AND (abs(random()) / 9223372036854775807.0) < {}",
                    s.strata_value.replace('\'', "''"),
                    s.fraction
                )
            })
            .collect();

        let create_sql = if union_parts.is_empty() {
            format!("CREATE TABLE {sample_quoted} AS SELECT * FROM {table_quoted} WHERE 1 = 0")
        } else {
            format!(
                "CREATE TABLE {sample_quoted} AS {}",
                union_parts.join(" UNION ALL ")
            )
        };
        sqlx::query(&create_sql).execute(pool).await?;

        self.reconcile_actual_sizes(pool, &sample_name, strata_column, &mut strata)
            .await?;

        MetadataStore::insert_sample_descriptor(
            pool,
            table,
            &sample_name,
            total_fraction,
            Some(strata_column),
        )
        .await?;

        let records: Vec<StratumRecord> = strata
            .iter()
            .map(|s| StratumRecord {
                sample_table: sample_name.clone(),
                strata_key: strata_column.to_string(),
                strata_value: s.strata_value.clone(),
                pop_size: s.pop_size,
                sample_size: s.sample_size,
                fraction: s.fraction,
                weight: s.weight,
                variance: s.variance,
            })
            .collect();
        MetadataStore::insert_stratum_records(pool, &sample_name, &records).await?;

        Ok((sample_name, records))
    }

    async fn analyze_strata(
        &self,
        pool: &SqlitePool,
        table: &str,
        strata_column: &str,
        variance_column: Option<&str>,
    ) -> AqeResult<Vec<StratumPlan>> {
        let table_quoted = quote_identifier(table);
        let strata_col_quoted = quote_identifier(strata_column);

        let rows: Vec<(String, i64, f64)> = if let Some(variance_col) = variance_column {
            let variance_col_quoted = quote_identifier(variance_col);
            sqlx::query_as(&format!(
                r#"
                SELECT {strata_col_quoted} as strata_value,
                       COUNT(*) as pop_size,
                       COALESCE(
                           (SUM(({variance_col_quoted} - sub.mean_val) * ({variance_col_quoted} - sub.mean_val))
                            / NULLIF(COUNT(*) - 1, 0)),
                           0.0
                       ) as variance
                FROM {table_quoted} t
                JOIN (
                    SELECT {strata_col_quoted} as sv, AVG({variance_col_quoted}) as mean_val
                    FROM {table_quoted}
                    WHERE {strata_col_quoted} IS NOT NULL AND {variance_col_quoted} IS NOT NULL
                    GROUP BY {strata_col_quoted}
                ) sub ON sub.sv = t.{strata_col_quoted}
                WHERE t.{strata_col_quoted} IS NOT NULL AND t.{variance_col_quoted} IS NOT NULL
                GROUP BY t.{strata_col_quoted}
                ORDER BY pop_size DESC
                "#
            ))
            .fetch_all(pool)
            .await?
        } else {
            sqlx::query_as(&format!(
                r#"
                SELECT {strata_col_quoted} as strata_value, COUNT(*) as pop_size, 0.0 as variance
                FROM {table_quoted}
                WHERE {strata_col_quoted} IS NOT NULL
                GROUP BY {strata_col_quoted}
                ORDER BY pop_size DESC
                "#
            ))
            .fetch_all(pool)
            .await?
        };

        Ok(rows
            .into_iter()
            .map(|(strata_value, pop_size, variance)| StratumPlan {
                strata_value,
                pop_size,
                variance,
                sample_size: 0,
                fraction: 0.0,
                weight: 0.0,
            })
            .collect())
    }

    async fn reconcile_actual_sizes(
        &self,
        pool: &SqlitePool,
        sample_name: &str,
        strata_column: &str,
        strata: &mut [StratumPlan],
    ) -> AqeResult<()> {
        let sample_quoted = quote_identifier(sample_name);
        let strata_col_quoted = quote_identifier(strata_column);

        let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT {strata_col_quoted} as strata_value, COUNT(*) as actual FROM {sample_quoted} GROUP BY {strata_col_quoted}"
        ))
        .fetch_all(pool)
        .await?;

        let actual: std::collections::HashMap<String, i64> = rows.into_iter().collect();

        for s in strata.iter_mut() {
            if let Some(&count) = actual.get(&s.strata_value) {
                s.sample_size = count;
                if s.pop_size > 0 {
                    s.fraction = count as f64 / s.pop_size as f64;
                }
            }
        }

        Ok(())
    }
}

/// Split `total_fraction` across strata in place, per the chosen
/// allocation rule. Never lets a stratum's fraction exceed 1.0.
fn allocate(strata: &mut [StratumPlan], total_fraction: f64, allocation: Allocation) {
    match allocation {
        Allocation::Proportional => {
            for s in strata.iter_mut() {
                s.fraction = total_fraction;
                s.sample_size = (s.pop_size as f64 * total_fraction) as i64;
                s.weight = s.pop_size as f64;
            }
        }
        Allocation::NeymanOptimal => {
            let total_pop: i64 = strata.iter().map(|s| s.pop_size).sum();
            let mut total_weight = 0.0;
            for s in strata.iter_mut() {
                let std_dev = s.variance.max(0.0).sqrt();
                s.weight = s.pop_size as f64 * std_dev;
                total_weight += s.weight;
            }

            let total_sample_size = total_pop as f64 * total_fraction;

            for s in strata.iter_mut() {
                if total_weight > 0.0 {
                    s.sample_size = (total_sample_size * s.weight / total_weight) as i64;
                    s.fraction = if s.pop_size > 0 {
                        s.sample_size as f64 / s.pop_size as f64
                    } else {
                        0.0
                    };
                } else {
                    s.fraction = total_fraction;
                    s.sample_size = (s.pop_size as f64 * total_fraction) as i64;
                }

                if s.fraction > 1.0 {
                    s.fraction = 1.0;
                    s.sample_size = s.pop_size;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stratum(pop_size: i64, variance: f64) -> StratumPlan {
        StratumPlan {
            strata_value: "x".to_string(),
            pop_size,
            variance,
            sample_size: 0,
            fraction: 0.0,
            weight: 0.0,
        }
    }

    #[test]
    fn proportional_allocation_gives_every_stratum_the_same_fraction() {
        let mut strata = vec![stratum(1000, 0.0), stratum(500, 0.0)];
        allocate(&mut strata, 0.1, Allocation::Proportional);

        assert_eq!(strata[0].sample_size, 100);
        assert_eq!(strata[1].sample_size, 50);
        assert!((strata[0].fraction - 0.1).abs() < 1e-9);
    }

    #[test]
    fn neyman_allocation_favors_high_variance_strata() {
        let mut strata = vec![stratum(1000, 100.0), stratum(1000, 1.0)];
        allocate(&mut strata, 0.1, Allocation::NeymanOptimal);

        assert!(strata[0].sample_size > strata[1].sample_size);
    }

    #[test]
    fn neyman_allocation_caps_fraction_at_one() {
        let mut strata = vec![stratum(10, 10000.0), stratum(1_000_000, 0.0001)];
        allocate(&mut strata, 0.5, Allocation::NeymanOptimal);

        assert!(strata[0].fraction <= 1.0);
        assert!(strata[1].fraction <= 1.0);
    }

    #[test]
    fn zero_variance_everywhere_falls_back_to_total_fraction() {
        let mut strata = vec![stratum(100, 0.0), stratum(200, 0.0)];
        allocate(&mut strata, 0.2, Allocation::NeymanOptimal);

        assert_eq!(strata[0].sample_size, 20);
        assert_eq!(strata[1].sample_size, 40);
    }
}
