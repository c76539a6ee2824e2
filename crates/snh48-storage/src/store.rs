use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Number, Value};
use snh48_core::{create_table_sql, MemberRecord, Snapshot, MEMBERS_TABLE, MEMBER_FIELDS};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("only SELECT statements are allowed")]
    Validation,
    #[error("sql error: {0}")]
    Query(#[source] rusqlite::Error),
    #[error("failed to build member table: {0}")]
    Build(#[from] rusqlite::Error),
}

pub type QueryRow = Map<String, Value>;

/// In-memory SQLite copy of one member snapshot.
///
/// The table is filled once in [`MemberStore::build`] and the connection is
/// then switched to `query_only`, so a store never changes after
/// construction. Replacing the data means building a new store.
pub struct MemberStore {
    conn: Connection,
    record_count: usize,
}

impl MemberStore {
    pub fn build(records: &[MemberRecord]) -> Result<Self, StoreError> {
        let mut conn = Connection::open_in_memory()?;
        conn.execute_batch(&create_table_sql())?;

        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare(&insert_sql())?;
            for record in records {
                insert.execute(params_from_iter(record.values()))?;
            }
        }
        tx.commit()?;

        let record_count: i64 =
            conn.query_row(&format!("SELECT COUNT(*) FROM {MEMBERS_TABLE}"), [], |row| {
                row.get(0)
            })?;
        conn.execute_batch("PRAGMA query_only = ON")?;

        debug!(
            event = "member_store_built",
            input_rows = records.len(),
            record_count
        );
        Ok(Self {
            conn,
            record_count: record_count as usize,
        })
    }

    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, StoreError> {
        Self::build(&snapshot.records())
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Runs one read-only statement and returns a map per row, keyed by the
    /// statement's own column names in their order.
    ///
    /// The gate is a prefix check on the first keyword, not a parser: it
    /// does not stop stacked statements or side-effecting functions hidden
    /// behind a `SELECT`. Writes that get past it still hit `query_only`.
    pub fn query(&self, sql: &str) -> Result<Vec<QueryRow>, StoreError> {
        ensure_select(sql)?;

        let mut stmt = self.conn.prepare(sql).map_err(StoreError::Query)?;
        let columns: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut rows = stmt.query([]).map_err(StoreError::Query)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().map_err(StoreError::Query)? {
            let mut mapped = Map::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                let value = row.get_ref(idx).map_err(StoreError::Query)?;
                mapped.insert(name.clone(), json_value(value));
            }
            results.push(mapped);
        }
        Ok(results)
    }
}

pub fn ensure_select(sql: &str) -> Result<(), StoreError> {
    let keyword = sql.trim().get(..6);
    if keyword.is_some_and(|keyword| keyword.eq_ignore_ascii_case("select")) {
        Ok(())
    } else {
        Err(StoreError::Validation)
    }
}

fn insert_sql() -> String {
    let placeholders = vec!["?"; MEMBER_FIELDS.len()].join(", ");
    format!("INSERT OR REPLACE INTO {MEMBERS_TABLE} VALUES ({placeholders})")
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(int) => Value::from(int),
        ValueRef::Real(real) => Number::from_f64(real)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
