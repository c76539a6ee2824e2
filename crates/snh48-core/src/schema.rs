use serde_json::{Map, Value};
use std::fmt::Write as _;

pub const MEMBERS_TABLE: &str = "members";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub description: &'static str,
}

const fn field(name: &'static str, description: &'static str) -> FieldSpec {
    FieldSpec { name, description }
}

/// Column layout of the `members` table. Order matters: it is the insert
/// order and the `SELECT *` order.
pub const MEMBER_SCHEMA: [FieldSpec; 31] = [
    field("sid", "member id (primary key), e.g. \"10125\""),
    field("gid", "group id: SNH48=10, GNZ48=20, BEJ48=30, CKG48=50, CGT48=60"),
    field("gname", "group short name: SNH | GNZ | BEJ | CKG | CGT"),
    field("sname", "display name in Chinese, e.g. \"刘增艳\""),
    field("fname", "name split into family/given parts, e.g. \"刘 增艳\""),
    field("pinyin", "pinyin name, e.g. \"Liu ZengYan\""),
    field("abbr", "name abbreviation, e.g. \"LZY\""),
    field("tid", "team id: SII=101, NII=102, HII=103, X=104"),
    field("tname", "team short name: SII | NII | HII | X"),
    field("pid", "cohort id"),
    field("pname", "cohort name, e.g. \"SNH48 五期生\""),
    field("nickname", "nicknames separated by 、"),
    field("company", "management company"),
    field("join_day", "join date, YYYY-MM-DD"),
    field("height", "height in cm, e.g. \"157\""),
    field("birth_day", "birthday, MM.DD"),
    field("star_sign_12", "zodiac sign"),
    field("star_sign_48", "group-specific star sign"),
    field("birth_place", "birthplace, \"中国 <province> \""),
    field("speciality", "speciality"),
    field("hobby", "hobbies"),
    field("experience", "career history, contains <br> line breaks"),
    field("catch_phrase", "catch phrase / self introduction"),
    field("weibo_uid", "weibo uid (\"0\" = none)"),
    field("blood_type", "blood type: A | B | O | AB | - (\"-\" = unknown)"),
    field("status", "status code (\"99\" = active)"),
    field("ranking", "latest annual election rank (\"0\" = unranked)"),
    field("pocket_id", "pocket48 app user id (\"0\" = no account)"),
    field("is_group_new", "new member flag: \"1\" yes, \"0\" no"),
    field("tcolor", "team color hex without #, e.g. \"91cdeb\""),
    field("gcolor", "group color hex without #, e.g. \"8ed2f5\""),
];

pub const MEMBER_FIELDS: [&str; 31] = {
    let mut names = [""; 31];
    let mut idx = 0;
    while idx < MEMBER_SCHEMA.len() {
        names[idx] = MEMBER_SCHEMA[idx].name;
        idx += 1;
    }
    names
};

pub fn field_index(name: &str) -> Option<usize> {
    MEMBER_FIELDS.iter().position(|candidate| *candidate == name)
}

/// DDL for the `members` table. Every column is TEXT and `sid` is the key.
pub fn create_table_sql() -> String {
    let mut sql = format!("CREATE TABLE {MEMBERS_TABLE} (\n");
    for (idx, spec) in MEMBER_SCHEMA.iter().enumerate() {
        let key = if idx == 0 { " PRIMARY KEY" } else { "" };
        let sep = if idx + 1 < MEMBER_SCHEMA.len() { "," } else { "" };
        let _ = writeln!(
            sql,
            "    {} TEXT{key}{sep} -- {}",
            spec.name, spec.description
        );
    }
    sql.push(')');
    sql
}

/// One member row with every schema field rendered as text.
///
/// Unknown values keep the provider's sentinel strings (`"0"`, `"-"`, `""`)
/// instead of being mapped to an absent value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRecord {
    values: Vec<String>,
}

impl MemberRecord {
    pub fn from_row(row: &Map<String, Value>) -> Self {
        let values = MEMBER_FIELDS
            .iter()
            .map(|name| row.get(*name).map(field_text).unwrap_or_default())
            .collect();
        Self { values }
    }

    pub fn sid(&self) -> &str {
        &self.values[0]
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        field_index(field).map(|idx| self.values[idx].as_str())
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn to_row(&self) -> Map<String, Value> {
        MEMBER_FIELDS
            .iter()
            .zip(&self.values)
            .map(|(name, value)| (name.to_string(), Value::String(value.clone())))
            .collect()
    }
}

/// Renders a JSON value the way a TEXT column would store it.
fn field_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => String::from(if *flag { "1" } else { "0" }),
        Value::Number(number) => number.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
