use crate::models::MessageRow;
use crate::Database;
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Messages --

    /// Store a published payload. Returns the stored row with its sequence number.
    pub fn insert_message(&self, content_topic: &str, payload: &[u8]) -> Result<MessageRow> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                "INSERT INTO messages (content_topic, payload) VALUES (?1, ?2)
                 RETURNING seq, content_topic, payload, received_at",
                rusqlite::params![content_topic, payload],
                map_message_row,
            )?;
            Ok(row)
        })
    }

    /// Newest-first page of messages on a topic, optionally strictly older than `before`.
    pub fn get_messages(
        &self,
        content_topic: &str,
        limit: u32,
        before: Option<i64>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, content_topic, limit, before))
    }
}

fn query_messages(
    conn: &Connection,
    content_topic: &str,
    limit: u32,
    before: Option<i64>,
) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT seq, content_topic, payload, received_at
         FROM messages
         WHERE content_topic = ?1 AND (?2 IS NULL OR seq < ?2)
         ORDER BY seq DESC
         LIMIT ?3",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![content_topic, before, limit], map_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        seq: row.get(0)?,
        content_topic: row.get(1)?,
        payload: row.get(2)?,
        received_at: row.get(3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_assigns_increasing_sequence() {
        let db = Database::open_in_memory().unwrap();
        let a = db.insert_message("/t", b"one").unwrap();
        let b = db.insert_message("/t", b"two").unwrap();
        assert!(b.seq > a.seq);
        assert_eq!(b.payload, b"two");
        assert!(!b.received_at.is_empty());
    }

    #[test]
    fn pages_newest_first_with_cursor() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..5u8 {
            db.insert_message("/t", &[i]).unwrap();
        }
        db.insert_message("/other", b"x").unwrap();

        let first = db.get_messages("/t", 2, None).unwrap();
        assert_eq!(first.iter().map(|r| r.payload[0]).collect::<Vec<_>>(), vec![4, 3]);

        let cursor = first.last().map(|r| r.seq);
        let second = db.get_messages("/t", 2, cursor).unwrap();
        assert_eq!(second.iter().map(|r| r.payload[0]).collect::<Vec<_>>(), vec![2, 1]);

        let cursor = second.last().map(|r| r.seq);
        let third = db.get_messages("/t", 2, cursor).unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].payload, vec![0]);

        assert_eq!(db.get_messages("/other", 10, None).unwrap().len(), 1);
    }
}
