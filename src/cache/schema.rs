//! Forward-only migrations for the local cache database (§6: "migrations
//! applied forward-only on startup").

use rusqlite::Connection;

const MIGRATIONS: &[&str] = &[
    // migration 1: base schema
    "CREATE TABLE IF NOT EXISTS assets (
        isin TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        asset_class TEXT NOT NULL,
        base_currency TEXT NOT NULL,
        sector TEXT,
        geography TEXT,
        enrichment_status TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS listings (
        ticker TEXT NOT NULL,
        exchange TEXT NOT NULL,
        isin TEXT NOT NULL REFERENCES assets(isin),
        currency TEXT NOT NULL,
        UNIQUE(ticker, exchange)
    );
    CREATE INDEX IF NOT EXISTS idx_listings_ticker ON listings(ticker);
    CREATE TABLE IF NOT EXISTS aliases (
        alias TEXT NOT NULL,
        isin TEXT NOT NULL REFERENCES assets(isin),
        alias_type TEXT NOT NULL,
        language TEXT,
        source TEXT NOT NULL,
        confidence REAL NOT NULL,
        currency TEXT,
        exchange TEXT,
        currency_source TEXT,
        contributor_hash TEXT,
        contributor_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        UNIQUE(alias, isin)
    );
    CREATE INDEX IF NOT EXISTS idx_aliases_alias ON aliases(alias);
    CREATE TABLE IF NOT EXISTS etf_holdings (
        etf_isin TEXT NOT NULL,
        holding_isin TEXT NOT NULL,
        weight REAL NOT NULL,
        confidence REAL NOT NULL,
        last_updated TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_etf_holdings_etf ON etf_holdings(etf_isin);
    CREATE TABLE IF NOT EXISTS isin_cache (
        alias TEXT NOT NULL,
        alias_type TEXT NOT NULL,
        isin TEXT,
        confidence REAL NOT NULL,
        source TEXT NOT NULL,
        resolution_status TEXT NOT NULL,
        expires_at TEXT,
        updated_at TEXT NOT NULL,
        UNIQUE(alias, alias_type)
    );
    CREATE TABLE IF NOT EXISTS format_logs (
        alias_example TEXT NOT NULL,
        format_type TEXT NOT NULL,
        api_source TEXT NOT NULL,
        success INTEGER NOT NULL,
        attempted_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS contributions (
        alias TEXT NOT NULL,
        isin TEXT NOT NULL,
        source TEXT NOT NULL,
        confidence REAL NOT NULL,
        contributor_hash TEXT,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS sync_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        last_sync TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    );",
];

pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;
    let current: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))?;

    for (idx, migration) in MIGRATIONS.iter().enumerate() {
        let version = idx as i64 + 1;
        if version <= current {
            continue;
        }
        conn.execute_batch(migration)?;
        conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    }
    Ok(())
}
