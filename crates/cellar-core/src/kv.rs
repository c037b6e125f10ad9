//! Ordered KV adapter
//!
//! A thin, namespace-agnostic layer over the embedded ordered store.
//! Keys are raw byte strings ordered lexicographically; callers that
//! need namespacing compose prefixes on top (see [`crate::namespace`]).
//!
//! Scans are served as bounded batches resuming strictly after the last
//! delivered key, so no live storage iterator is ever parked across a
//! suspension point.

use async_trait::async_trait;
use cellar_common::{Error, Result};
use cellar_proto::{ScanEntry, ScanRange};
use redb::{Database, Durability, ReadableTable, TableDefinition};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

/// Directory under the metadata path holding the store's files.
pub const ROOT_DB_DIR: &str = "rootDB";

const ROOT_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("root");

/// Default number of records pulled per scan batch.
pub const SCAN_BATCH: usize = 128;

fn st(e: impl std::fmt::Display) -> Error {
    Error::Storage(e.to_string())
}

/// Lazy sequence of `(key, value)` pairs produced by a range scan.
///
/// A handle is not restartable; closing it guarantees no further items
/// are delivered and releases all backing resources.
#[async_trait]
pub trait Scan: Send {
    async fn next(&mut self) -> Result<Option<ScanEntry>>;
    async fn close(&mut self) -> Result<()>;
}

/// One namespace of the shared ordered store.
///
/// The master sees a namespace directly through [`LocalNamespace`];
/// workers see the same contract through their RPC handle.
///
/// [`LocalNamespace`]: crate::namespace::LocalNamespace
#[async_trait]
pub trait Namespace: Send + Sync {
    fn name(&self) -> &str;
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    async fn put(&self, key: &[u8], value: &[u8], sync: bool) -> Result<()>;
    async fn del(&self, key: &[u8], sync: bool) -> Result<()>;
    async fn scan(&self, range: ScanRange) -> Result<Box<dyn Scan>>;
}

/// Resolved scan bounds: at most one lower and one upper bound, each
/// with an exclusivity flag.
#[derive(Clone, Debug, Default)]
pub(crate) struct ResolvedRange {
    pub lower: Option<(Vec<u8>, bool)>,
    pub upper: Option<(Vec<u8>, bool)>,
    pub limit: Option<u64>,
    pub reverse: bool,
}

impl ResolvedRange {
    /// Collapse the raw range parameters into a single pair of bounds.
    pub fn from_range(range: &ScanRange) -> Self {
        let mut lower: Option<(Vec<u8>, bool)> = None;
        for (bound, exclusive) in [
            (&range.gt, true),
            (&range.gte, false),
            (&range.start, false),
        ] {
            if let Some(key) = bound {
                let tighter = match &lower {
                    None => true,
                    Some((cur, cur_excl)) => {
                        key > cur || (key == cur && exclusive && !cur_excl)
                    }
                };
                if tighter {
                    lower = Some((key.clone(), exclusive));
                }
            }
        }

        let mut upper: Option<(Vec<u8>, bool)> = None;
        for (bound, exclusive) in [(&range.lt, true), (&range.lte, false)] {
            if let Some(key) = bound {
                let tighter = match &upper {
                    None => true,
                    Some((cur, cur_excl)) => {
                        key < cur || (key == cur && exclusive && !cur_excl)
                    }
                };
                if tighter {
                    upper = Some((key.clone(), exclusive));
                }
            }
        }

        Self {
            lower,
            upper,
            limit: range.limit,
            reverse: range.reverse,
        }
    }

    /// True when no key can satisfy the bounds.
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Some((lo, lo_excl)), Some((hi, hi_excl))) => {
                lo > hi || (lo == hi && (*lo_excl || *hi_excl))
            }
            _ => false,
        }
    }

    /// Tighten the range so the next batch starts strictly after (or,
    /// reversed, strictly before) the given key.
    pub fn resume_after(&mut self, key: &[u8]) {
        if self.reverse {
            self.upper = Some((key.to_vec(), true));
        } else {
            self.lower = Some((key.to_vec(), true));
        }
    }
}

/// The shared ordered store owned by the master process.
pub struct RootDb {
    db: Database,
}

impl RootDb {
    /// Open (or create) the store under `<metadata_path>/rootDB/`.
    pub fn open(metadata_path: &Path) -> Result<Self> {
        let dir = metadata_path.join(ROOT_DB_DIR);
        std::fs::create_dir_all(&dir)?;
        let db = Database::create(dir.join("root.redb")).map_err(st)?;

        // Make sure the table exists so read transactions never race
        // its creation.
        let wtx = db.begin_write().map_err(st)?;
        wtx.open_table(ROOT_TABLE).map_err(st)?;
        wtx.commit().map_err(st)?;

        Ok(Self { db })
    }

    /// Read a single key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let rtx = self.db.begin_read().map_err(st)?;
        let table = rtx.open_table(ROOT_TABLE).map_err(st)?;
        Ok(table.get(key).map_err(st)?.map(|guard| guard.value().to_vec()))
    }

    /// Write a single key. `sync` commits durably before returning.
    pub fn put(&self, key: &[u8], value: &[u8], sync: bool) -> Result<()> {
        let mut wtx = self.db.begin_write().map_err(st)?;
        wtx.set_durability(durability(sync));
        wtx.open_table(ROOT_TABLE)
            .map_err(st)?
            .insert(key, value)
            .map_err(st)?;
        wtx.commit().map_err(st)?;
        Ok(())
    }

    /// Delete a single key. Deleting an absent key succeeds.
    pub fn del(&self, key: &[u8], sync: bool) -> Result<()> {
        let mut wtx = self.db.begin_write().map_err(st)?;
        wtx.set_durability(durability(sync));
        wtx.open_table(ROOT_TABLE)
            .map_err(st)?
            .remove(key)
            .map_err(st)?;
        wtx.commit().map_err(st)?;
        Ok(())
    }

    /// Read up to `max` records inside the bounds, in scan order.
    ///
    /// Returns the batch and whether the range is exhausted. Each call
    /// reads from a fresh snapshot; resumable cursors layer on top via
    /// [`ResolvedRange::resume_after`].
    pub(crate) fn read_batch(
        &self,
        range: &ResolvedRange,
        max: usize,
    ) -> Result<(Vec<ScanEntry>, bool)> {
        if max == 0 {
            return Ok((Vec::new(), false));
        }
        if range.is_empty() {
            return Ok((Vec::new(), true));
        }

        let rtx = self.db.begin_read().map_err(st)?;
        let table = rtx.open_table(ROOT_TABLE).map_err(st)?;

        let lower: std::ops::Bound<&[u8]> = match &range.lower {
            Some((key, true)) => std::ops::Bound::Excluded(key.as_slice()),
            Some((key, false)) => std::ops::Bound::Included(key.as_slice()),
            None => std::ops::Bound::Unbounded,
        };
        let upper: std::ops::Bound<&[u8]> = match &range.upper {
            Some((key, true)) => std::ops::Bound::Excluded(key.as_slice()),
            Some((key, false)) => std::ops::Bound::Included(key.as_slice()),
            None => std::ops::Bound::Unbounded,
        };

        let iter = table.range::<&[u8]>((lower, upper)).map_err(st)?;
        let mut out = Vec::new();
        let mut end = true;

        if range.reverse {
            for item in iter.rev() {
                if out.len() == max {
                    end = false;
                    break;
                }
                let (key, value) = item.map_err(st)?;
                out.push(ScanEntry {
                    key: key.value().to_vec(),
                    value: value.value().to_vec(),
                });
            }
        } else {
            for item in iter {
                if out.len() == max {
                    end = false;
                    break;
                }
                let (key, value) = item.map_err(st)?;
                out.push(ScanEntry {
                    key: key.value().to_vec(),
                    value: value.value().to_vec(),
                });
            }
        }

        Ok((out, end))
    }
}

fn durability(sync: bool) -> Durability {
    if sync {
        Durability::Immediate
    } else {
        Durability::Eventual
    }
}

/// Server-side resumable cursor over the raw store.
///
/// Owns no storage resources between pulls; dropping it is always safe.
pub(crate) struct BatchCursor {
    range: ResolvedRange,
    remaining: Option<u64>,
    done: bool,
}

impl BatchCursor {
    pub fn new(range: ResolvedRange) -> Self {
        let remaining = range.limit;
        Self {
            range,
            remaining,
            done: false,
        }
    }

    /// Pull the next batch of at most `max` records.
    pub fn pull(&mut self, db: &RootDb, max: usize) -> Result<(Vec<ScanEntry>, bool)> {
        if self.done {
            return Ok((Vec::new(), true));
        }
        let max = match self.remaining {
            Some(rem) => max.min(rem as usize),
            None => max,
        };
        let (entries, mut end) = db.read_batch(&self.range, max)?;

        if let Some(rem) = &mut self.remaining {
            *rem -= entries.len() as u64;
            if *rem == 0 {
                end = true;
            }
        }
        if let Some(last) = entries.last() {
            self.range.resume_after(&last.key);
        }
        if max == 0 {
            end = true;
        }
        self.done = end;
        Ok((entries, end))
    }
}

/// In-process [`Scan`] over a [`BatchCursor`], used on the master side.
pub(crate) struct LocalScan {
    db: Arc<RootDb>,
    cursor: BatchCursor,
    buf: VecDeque<ScanEntry>,
    end: bool,
    /// Bytes stripped from the front of every yielded key.
    strip: usize,
}

impl LocalScan {
    pub fn new(db: Arc<RootDb>, range: ResolvedRange, strip: usize) -> Self {
        Self {
            db,
            cursor: BatchCursor::new(range),
            buf: VecDeque::new(),
            end: false,
            strip,
        }
    }
}

#[async_trait]
impl Scan for LocalScan {
    async fn next(&mut self) -> Result<Option<ScanEntry>> {
        if self.buf.is_empty() && !self.end {
            let (entries, end) = self.cursor.pull(&self.db, SCAN_BATCH)?;
            self.buf.extend(entries);
            self.end = end;
        }
        Ok(self.buf.pop_front().map(|mut entry| {
            entry.key.drain(..self.strip);
            entry
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.buf.clear();
        self.end = true;
        self.cursor.done = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_db(dir: &Path) -> RootDb {
        RootDb::open(dir).unwrap()
    }

    #[test]
    fn test_put_get_del() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());

        assert_eq!(db.get(b"k").unwrap(), None);
        db.put(b"k", b"v", true).unwrap();
        assert_eq!(db.get(b"k").unwrap(), Some(b"v".to_vec()));
        db.del(b"k", true).unwrap();
        assert_eq!(db.get(b"k").unwrap(), None);
        // deleting an absent key succeeds
        db.del(b"k", false).unwrap();
    }

    #[test]
    fn test_reopen_preserves_synced_writes() {
        let dir = tempdir().unwrap();
        {
            let db = open_db(dir.path());
            db.put(b"durable", b"yes", true).unwrap();
        }
        let db = open_db(dir.path());
        assert_eq!(db.get(b"durable").unwrap(), Some(b"yes".to_vec()));
    }

    fn seed(db: &RootDb) {
        for key in ["a/1", "a/2", "b/1", "b/2", "c/1"] {
            db.put(key.as_bytes(), b"{}", false).unwrap();
        }
    }

    fn range(gt: Option<&str>, gte: Option<&str>, lt: Option<&str>) -> ResolvedRange {
        ResolvedRange::from_range(&ScanRange {
            gt: gt.map(|s| s.as_bytes().to_vec()),
            gte: gte.map(|s| s.as_bytes().to_vec()),
            lt: lt.map(|s| s.as_bytes().to_vec()),
            ..Default::default()
        })
    }

    fn keys(entries: &[ScanEntry]) -> Vec<String> {
        entries
            .iter()
            .map(|e| String::from_utf8(e.key.clone()).unwrap())
            .collect()
    }

    #[test]
    fn test_read_batch_bounds() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        seed(&db);

        let (entries, end) = db.read_batch(&range(None, Some("a/2"), Some("c/1")), 10).unwrap();
        assert_eq!(keys(&entries), vec!["a/2", "b/1", "b/2"]);
        assert!(end);

        let (entries, _) = db.read_batch(&range(Some("a/2"), None, Some("c/1")), 10).unwrap();
        assert_eq!(keys(&entries), vec!["b/1", "b/2"]);
    }

    #[test]
    fn test_read_batch_reverse() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        seed(&db);

        let mut r = range(None, Some("a/1"), Some("c/1"));
        r.reverse = true;
        let (entries, end) = db.read_batch(&r, 10).unwrap();
        assert_eq!(keys(&entries), vec!["b/2", "b/1", "a/2", "a/1"]);
        assert!(end);
    }

    #[test]
    fn test_read_batch_inverted_range_is_empty() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        seed(&db);

        let (entries, end) = db.read_batch(&range(None, Some("c"), Some("a")), 10).unwrap();
        assert!(entries.is_empty());
        assert!(end);
    }

    #[test]
    fn test_batch_cursor_resumes_and_limits() {
        let dir = tempdir().unwrap();
        let db = open_db(dir.path());
        seed(&db);

        let mut cursor = BatchCursor::new(range(None, None, None));
        let (first, end) = cursor.pull(&db, 2).unwrap();
        assert_eq!(keys(&first), vec!["a/1", "a/2"]);
        assert!(!end);
        let (second, end) = cursor.pull(&db, 2).unwrap();
        assert_eq!(keys(&second), vec!["b/1", "b/2"]);
        assert!(!end);
        let (third, end) = cursor.pull(&db, 2).unwrap();
        assert_eq!(keys(&third), vec!["c/1"]);
        assert!(end);
        // pulls after end keep reporting end
        let (rest, end) = cursor.pull(&db, 2).unwrap();
        assert!(rest.is_empty());
        assert!(end);

        let limited = ResolvedRange::from_range(&ScanRange {
            limit: Some(3),
            ..Default::default()
        });
        let mut cursor = BatchCursor::new(limited);
        let (batch, end) = cursor.pull(&db, 10).unwrap();
        assert_eq!(batch.len(), 3);
        assert!(end);
    }

    #[test]
    fn test_resolved_range_tightest_bound_wins() {
        let r = ResolvedRange::from_range(&ScanRange {
            gt: Some(b"b".to_vec()),
            start: Some(b"a".to_vec()),
            lt: Some(b"z".to_vec()),
            lte: Some(b"y".to_vec()),
            ..Default::default()
        });
        assert_eq!(r.lower, Some((b"b".to_vec(), true)));
        assert_eq!(r.upper, Some((b"y".to_vec(), false)));
    }
}
