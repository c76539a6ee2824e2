pub mod schema;
pub mod snapshot;

pub use schema::{
    create_table_sql, field_index, FieldSpec, MemberRecord, MEMBERS_TABLE, MEMBER_FIELDS,
    MEMBER_SCHEMA,
};
pub use snapshot::{Snapshot, SnapshotError};
