/// Database row types. These map directly to SQLite rows.
/// Distinct from stride-types wire models to keep the DB layer independent.

pub struct MessageRow {
    pub seq: i64,
    pub content_topic: String,
    pub payload: Vec<u8>,
    pub received_at: String,
}
