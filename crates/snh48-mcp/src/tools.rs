use serde::Serialize;
use serde_json::{json, Map, Value};
use snh48_roster::{Roster, RosterError, StoreError, MEMBERS_TABLE, MEMBER_SCHEMA};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{info, warn};

pub const QUERY_TOOL: &str = "query_members_sql";
pub const REFRESH_TOOL: &str = "refresh_member_data";

const EXAMPLE_QUERIES: &[(&str, &str)] = &[
    (
        "fuzzy search by name",
        "SELECT sid, sname, pinyin, gname, tname, pname FROM members WHERE sname LIKE '%段艺璇%'",
    ),
    (
        "all members of SNH48 Team SII",
        "SELECT sname, pinyin, birth_place, height FROM members WHERE gname='SNH' AND tname='SII'",
    ),
    (
        "head count per team",
        "SELECT gname, tname, COUNT(*) AS cnt FROM members GROUP BY gname, tname ORDER BY gname, cnt DESC",
    ),
    (
        "members born in Sichuan",
        "SELECT sname, gname, tname, birth_place FROM members WHERE birth_place LIKE '%四川%'",
    ),
    (
        "ten tallest members",
        "SELECT sname, gname, tname, CAST(height AS INTEGER) AS h FROM members WHERE height != '' ORDER BY h DESC LIMIT 10",
    ),
    (
        "members with a pocket48 account",
        "SELECT sname, tname, pocket_id FROM members WHERE pocket_id != '0' ORDER BY tname",
    ),
    (
        "top ten of the latest annual election",
        "SELECT sname, gname, tname, CAST(ranking AS INTEGER) AS r FROM members WHERE ranking != '0' ORDER BY r LIMIT 10",
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub success: bool,
    pub member_count: usize,
    pub message: String,
}

/// Backs `query_members_sql`. Failures come back as `[{"error": ...}]`,
/// including a failed stale refresh.
pub fn query_members(roster: &Roster, ttl: Duration, sql: &str) -> Vec<Map<String, Value>> {
    let result = roster
        .refresh_if_stale(ttl)
        .and_then(|_| roster.query(sql));
    match result {
        Ok(rows) => {
            info!(event = "query_served", rows = rows.len());
            rows
        }
        Err(err) => {
            warn!(event = "query_failed", error = %err);
            vec![error_row(query_error_message(&err))]
        }
    }
}

/// Backs `refresh_member_data`.
pub fn refresh_members(roster: &Roster) -> RefreshReport {
    match roster.force_refresh() {
        Ok(member_count) => RefreshReport {
            success: true,
            member_count,
            message: format!("Refreshed from the member API, {member_count} members loaded."),
        },
        Err(err) => RefreshReport {
            success: false,
            member_count: roster.record_count(),
            message: format!("Refresh failed: {err}"),
        },
    }
}

pub fn error_row(message: impl Into<String>) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert("error".to_string(), Value::String(message.into()));
    row
}

fn query_error_message(err: &RosterError) -> String {
    match err {
        RosterError::Store(StoreError::Validation) => StoreError::Validation.to_string(),
        RosterError::Store(StoreError::Query(source)) => format!("SQL execution error: {source}"),
        other => format!("SQL execution error: {other}"),
    }
}

pub fn tool_definitions() -> Value {
    json!([
        {
            "name": QUERY_TOOL,
            "description": query_tool_description(),
            "inputSchema": {
                "type": "object",
                "properties": {
                    "sql": {
                        "type": "string",
                        "description": "The SELECT statement to run"
                    }
                },
                "required": ["sql"]
            }
        },
        {
            "name": REFRESH_TOOL,
            "description": "Force a fresh pull of the member list from the official SNH48 API and \
                rebuild the in-memory database. Use it after roster changes such as new members \
                or transfers. Overwrites the local JSON cache. Returns \
                {\"success\": bool, \"member_count\": int, \"message\": str}.",
            "inputSchema": {
                "type": "object",
                "properties": {}
            }
        }
    ])
}

fn query_tool_description() -> String {
    let mut text = format!(
        "Run a SQL query against the SNH48 member database and return the matching rows as a \
         list of objects (column name -> value).\n\
         Only SELECT statements are accepted; INSERT / UPDATE / DELETE / DROP are rejected.\n\n\
         Table: {MEMBERS_TABLE} (members of SNH48, GNZ48, BEJ48, CKG48 and CGT48). \
         Every column is TEXT; CAST when comparing numbers. Unknown values use sentinel \
         strings such as \"0\", \"-\" or \"\" instead of NULL.\n\nColumns:\n"
    );
    for spec in MEMBER_SCHEMA.iter() {
        let _ = writeln!(text, "  {:<13} {}", spec.name, spec.description);
    }
    text.push_str("\nExamples:\n");
    for (title, sql) in EXAMPLE_QUERIES {
        let _ = writeln!(text, "  -- {title}\n  {sql}");
    }
    text
}
