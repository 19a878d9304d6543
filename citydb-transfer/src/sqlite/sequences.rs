//! Counter-table sequence source.

use camino::Utf8Path;
use citydb_core::{AdapterError, Sequence, SequenceSource};
use log::trace;
use parking_lot::Mutex;
use rusqlite::{Connection, TransactionBehavior};

use super::pool::{PoolError, open_connection};

/// Sequence source backed by the `sequences` table.
///
/// Requests are serialized on a dedicated connection and each batch is
/// reserved inside one immediate transaction, so concurrent sessions on the
/// same file never receive overlapping values.
#[derive(Debug)]
pub struct SqliteSequences {
    connection: Mutex<Connection>,
}

impl SqliteSequences {
    /// Open a dedicated connection to the database at `path`.
    ///
    /// # Errors
    /// Returns a pool error when the connection cannot be opened.
    pub fn open(path: &Utf8Path) -> Result<Self, PoolError> {
        Ok(Self {
            connection: Mutex::new(open_connection(path)?),
        })
    }

    /// Last value handed out for `sequence`.
    ///
    /// # Errors
    /// Returns the `rusqlite` error when the counter cannot be read.
    pub fn current(&self, sequence: Sequence) -> Result<i64, rusqlite::Error> {
        self.connection.lock().query_row(
            "SELECT value FROM sequences WHERE name = ?1",
            [sequence.name()],
            |row| row.get(0),
        )
    }
}

impl SequenceSource for SqliteSequences {
    fn next_values(&self, sequence: Sequence, count: usize) -> Result<Vec<i64>, AdapterError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let step = i64::try_from(count)?;
        let mut connection = self.connection.lock();
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let last: i64 = transaction.query_row(
            "SELECT value FROM sequences WHERE name = ?1",
            [sequence.name()],
            |row| row.get(0),
        )?;
        transaction.execute(
            "UPDATE sequences SET value = ?1 WHERE name = ?2",
            (last + step, sequence.name()),
        )?;
        transaction.commit()?;
        trace!("reserved {count} value(s) of {sequence} after {last}");
        Ok((last + 1..=last + step).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteAdapter;
    use camino::Utf8PathBuf;
    use rstest::rstest;
    use tempfile::TempDir;

    fn adapter(dir: &TempDir) -> SqliteAdapter {
        let path = Utf8PathBuf::from_path_buf(dir.path().join("city.db")).expect("utf-8 path");
        SqliteAdapter::create(&path, 25832).expect("create database")
    }

    #[rstest]
    fn batches_are_consecutive_and_disjoint() {
        let dir = TempDir::new().expect("create temp dir");
        let adapter = adapter(&dir);
        let sequences = adapter.sequences();
        let first = sequences
            .next_values(Sequence::Feature, 3)
            .expect("first batch");
        let second = sequences
            .next_values(Sequence::Feature, 2)
            .expect("second batch");
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, vec![4, 5]);
        assert_eq!(sequences.current(Sequence::Feature).expect("read"), 5);
    }

    #[rstest]
    fn sequences_are_independent() {
        let dir = TempDir::new().expect("create temp dir");
        let adapter = adapter(&dir);
        let sequences = adapter.sequences();
        sequences
            .next_values(Sequence::Feature, 4)
            .expect("feature batch");
        let addresses = sequences
            .next_values(Sequence::Address, 1)
            .expect("address batch");
        assert_eq!(addresses, vec![1]);
    }

    #[rstest]
    fn empty_requests_do_not_touch_the_counter() {
        let dir = TempDir::new().expect("create temp dir");
        let adapter = adapter(&dir);
        let sequences = adapter.sequences();
        assert!(
            sequences
                .next_values(Sequence::Property, 0)
                .expect("empty batch")
                .is_empty()
        );
        assert_eq!(sequences.current(Sequence::Property).expect("read"), 0);
    }
}
