use sqlx::SqlitePool;

/// Create an `orders` table with 10,000 rows spread across 4 regions, with
/// a `revenue` column whose variance differs sharply by region (useful for
/// exercising Neyman-optimal stratified allocation).
pub async fn create_orders_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            region TEXT NOT NULL,
            customer_id INTEGER NOT NULL,
            revenue REAL NOT NULL,
            status TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    let regions = ["north", "south", "east", "west"];
    let statuses = ["completed", "refunded", "pending"];

    for i in 0..10_000i64 {
        let region = regions[(i % regions.len() as i64) as usize];
        let status = statuses[(i % statuses.len() as i64) as usize];
        // east/west see much wider revenue swings than north/south.
        let revenue = match region {
            "east" | "west" => 10.0 + ((i * 37) % 5000) as f64,
            _ => 50.0 + ((i * 7) % 100) as f64,
        };

        sqlx::query(
            "INSERT INTO orders (region, customer_id, revenue, status) VALUES (?, ?, ?, ?)",
        )
        .bind(region)
        .bind(i % 2_000)
        .bind(revenue)
        .bind(status)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Create a smaller `purchases` table (500 rows) good for fast uniform
/// sampling tests.
pub async fn create_purchases_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS purchases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            sku TEXT NOT NULL,
            amount REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    for i in 0..500i64 {
        sqlx::query("INSERT INTO purchases (sku, amount) VALUES (?, ?)")
            .bind(format!("sku-{}", i % 50))
            .bind(5.0 + (i % 200) as f64)
            .execute(pool)
            .await?;
    }

    Ok(())
}

/// Drop all fixture tables and anything derived from them (samples included).
pub async fn cleanup(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let tables: Vec<(String,)> = sqlx::query_as(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(pool)
    .await?;

    for (name,) in tables {
        sqlx::query(&format!("DROP TABLE IF EXISTS \"{}\"", name.replace('"', "\"\"")))
            .execute(pool)
            .await?;
    }

    Ok(())
}
