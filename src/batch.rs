//! Keyset iteration over table rows.
//!
//! A batch run walks rows in id order, one chunk at a time. The cursor is
//! the last id handed out, so a run can stop anywhere and pick up again
//! from a [`Checkpoint`]. Loaders that filter on "not yet done" rows make
//! the database itself the checkpoint across restarts.

use anyhow::Result;
use rusqlite::Connection;

/// Rows that carry their own position in the table.
pub trait Keyed {
    fn key(&self) -> i64;
}

/// Loads up to `limit` rows with an id greater than `after`, in id order.
pub type Loader<T> = fn(&Connection, i64, usize) -> Result<Vec<T>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub after: i64,
}

pub struct Batches<'c, T> {
    conn: &'c Connection,
    load: Loader<T>,
    cursor: Checkpoint,
    chunk: usize,
    remaining: Option<usize>,
    done: bool,
}

impl<'c, T: Keyed> Batches<'c, T> {
    pub fn new(conn: &'c Connection, load: Loader<T>, chunk: usize) -> Self {
        Self::resume(conn, load, chunk, Checkpoint::default())
    }

    pub fn resume(conn: &'c Connection, load: Loader<T>, chunk: usize, from: Checkpoint) -> Self {
        Self {
            conn,
            load,
            cursor: from,
            chunk: chunk.max(1),
            remaining: None,
            done: false,
        }
    }

    /// Stop after `limit` rows in total.
    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.remaining = limit;
        self
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.cursor
    }
}

impl<T: Keyed> Iterator for Batches<'_, T> {
    type Item = Result<Vec<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let want = match self.remaining {
            Some(0) => {
                self.done = true;
                return None;
            }
            Some(n) => n.min(self.chunk),
            None => self.chunk,
        };

        match (self.load)(self.conn, self.cursor.after, want) {
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
            Ok(rows) if rows.is_empty() => {
                self.done = true;
                None
            }
            Ok(rows) => {
                if let Some(last) = rows.last() {
                    self.cursor.after = last.key();
                }
                if let Some(n) = self.remaining.as_mut() {
                    *n = n.saturating_sub(rows.len());
                }
                Some(Ok(rows))
            }
        }
    }
}
