use std::{
    fmt,
    path::PathBuf,
    sync::{
        Arc,
        RwLock,
        atomic::{AtomicU64, AtomicUsize, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    time::Duration,
};

use redb::{
    Database,
    ReadTransaction,
    ReadableDatabase,
    WriteTransaction,
    backends::InMemoryBackend,
};

use crate::error::{Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a connection string points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    File(PathBuf),
    Memory,
}

impl StoreLocation {
    /// Parse a connection string.
    ///
    /// Accepted forms: `memory:` / `memory://`, `redb://<path>`,
    /// `file://<path>`, or a bare filesystem path.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let trimmed = connection_string.trim();
        if trimmed.is_empty() {
            return Err(Error::Config("connection string is empty".into()));
        }

        if trimmed == "memory:" || trimmed == "memory://" {
            return Ok(Self::Memory);
        }

        for scheme in ["redb://", "file://"] {
            if let Some(path) = trimmed.strip_prefix(scheme) {
                if path.is_empty() {
                    return Err(Error::Config(format!(
                        "connection string '{trimmed}' has no path"
                    )));
                }
                return Ok(Self::File(PathBuf::from(path)));
            }
        }

        if let Some((scheme, _)) = trimmed.split_once("://") {
            return Err(Error::Config(format!(
                "unsupported store scheme '{scheme}'"
            )));
        }

        Ok(Self::File(PathBuf::from(trimmed)))
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreLocation::File(path) => write!(f, "redb://{}", path.display()),
            StoreLocation::Memory => f.write_str("memory://"),
        }
    }
}

/// Owns the database handle shared by every collection in the process.
///
/// Components never hold the database directly: they [`acquire`] a
/// [`Connection`] for the duration of an operation and drop it on the way
/// out, whichever way that is.
///
/// [`acquire`]: Store::acquire
pub struct Store {
    db: RwLock<Option<Arc<Database>>>,
    location: StoreLocation,
    timeout: Duration,
    active: Arc<AtomicUsize>,
    round_trips: Arc<AtomicU64>,
}

impl Store {
    /// Open the store and probe it with a read transaction.
    ///
    /// Both steps are bounded by `timeout`; any failure is reported as a
    /// configuration error so a bad connection string never yields a
    /// half-built store.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use litvec::Store;
    ///
    /// let store = Store::open("memory://", Duration::from_secs(5)).unwrap();
    /// assert!(!store.is_closed());
    /// store.close();
    /// store.close();
    /// assert!(store.is_closed());
    /// ```
    pub fn open(connection_string: &str, timeout: Duration) -> Result<Self> {
        let location = StoreLocation::parse(connection_string)?;
        if timeout.is_zero() {
            return Err(Error::Config("store timeout must be non-zero".into()));
        }

        let target = location.clone();
        let db = run_bounded("store connect", timeout, move || {
            let db = match &target {
                StoreLocation::File(path) => Database::create(path)?,
                StoreLocation::Memory => Database::builder()
                    .create_with_backend(InMemoryBackend::new())?,
            };
            drop(db.begin_read()?);
            Ok(db)
        })
        .map_err(|err| match err {
            Error::Timeout { operation, after } => {
                Error::Timeout { operation, after }
            }
            other => Error::Config(format!(
                "cannot open store at {location}: {other}"
            )),
        })?;

        tracing::debug!(%location, "opened store");

        Ok(Self {
            db: RwLock::new(Some(Arc::new(db))),
            location,
            timeout,
            active: Arc::new(AtomicUsize::new(0)),
            round_trips: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn location(&self) -> &StoreLocation {
        &self.location
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Borrow the database for one operation.
    pub fn acquire(&self) -> Result<Connection> {
        let guard = self
            .db
            .read()
            .map_err(|_| Error::Store("store lock poisoned".into()))?;
        let db = guard.as_ref().ok_or(Error::Closed)?;

        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Connection {
            db: Arc::clone(db),
            timeout: self.timeout,
            active: Arc::clone(&self.active),
            round_trips: Arc::clone(&self.round_trips),
        })
    }

    /// Number of connections currently handed out.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Total transactions executed through this store.
    pub fn round_trips(&self) -> u64 {
        self.round_trips.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.db.read().map(|db| db.is_none()).unwrap_or(true)
    }

    /// Release the database. Safe to call more than once; connections that
    /// are still out keep working until they are dropped.
    pub fn close(&self) {
        if let Ok(mut db) = self.db.write()
            && db.take().is_some()
        {
            tracing::debug!(location = %self.location, "closed store");
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("location", &self.location)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A scoped handle on the store. Dropping it releases the acquisition.
pub struct Connection {
    db: Arc<Database>,
    timeout: Duration,
    active: Arc<AtomicUsize>,
    round_trips: Arc<AtomicU64>,
}

impl Connection {
    /// Run `op` inside a read transaction, bounded by the store timeout.
    pub fn read<T, F>(&self, operation: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ReadTransaction) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        run_bounded(operation, self.timeout, move || {
            let txn = db.begin_read()?;
            op(&txn)
        })
    }

    /// Run `op` inside a write transaction, bounded by the store timeout.
    ///
    /// The transaction commits only when `op` returns `Ok`; an error drops
    /// it, which aborts every change made inside.
    pub fn write<T, F>(&self, operation: &'static str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&WriteTransaction) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        run_bounded(operation, self.timeout, move || {
            let txn = db.begin_write()?;
            let value = op(&txn)?;
            txn.commit()?;
            Ok(value)
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Run `op` on a short-lived worker and wait at most `timeout` for it.
///
/// On timeout the worker is abandoned; whatever it was doing is not assumed
/// to have committed.
pub(crate) fn run_bounded<T, F>(
    operation: &'static str,
    timeout: Duration,
    op: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel(1);
    std::thread::Builder::new()
        .name(format!("litvec-{}", operation.replace(' ', "-")))
        .spawn(move || {
            let _ = tx.send(op());
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(Error::Timeout {
            operation,
            after: timeout,
        }),
        Err(RecvTimeoutError::Disconnected) => Err(Error::Store(format!(
            "{operation} worker exited without a result"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use redb::{ReadableTable, TableDefinition};

    use super::*;

    const PROBE: TableDefinition<&str, u64> = TableDefinition::new("probe");

    fn memory_store() -> Store {
        Store::open("memory://", DEFAULT_TIMEOUT).unwrap()
    }

    #[test]
    fn parse_connection_strings() {
        assert_eq!(
            StoreLocation::parse("memory:").unwrap(),
            StoreLocation::Memory
        );
        assert_eq!(
            StoreLocation::parse("redb:///tmp/a.redb").unwrap(),
            StoreLocation::File(PathBuf::from("/tmp/a.redb"))
        );
        assert_eq!(
            StoreLocation::parse("file://data/x.redb").unwrap(),
            StoreLocation::File(PathBuf::from("data/x.redb"))
        );
        assert_eq!(
            StoreLocation::parse("/var/lib/litvec.redb").unwrap(),
            StoreLocation::File(PathBuf::from("/var/lib/litvec.redb"))
        );
    }

    #[test]
    fn rejects_bad_connection_strings() {
        for bad in ["", "   ", "redb://", "postgresql://user@host/db"] {
            let err = StoreLocation::parse(bad).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn unreachable_path_fails_at_open() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("no/such/dir/store.redb");
        let path = missing.to_str().unwrap();
        let err = Store::open(path, DEFAULT_TIMEOUT).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{err}");
    }

    #[test]
    fn zero_timeout_is_a_config_error() {
        let err = Store::open("memory://", Duration::ZERO).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn write_then_read() {
        let store = memory_store();
        let conn = store.acquire().unwrap();

        conn.write("seed", |txn| {
            let mut table = txn.open_table(PROBE)?;
            table.insert("answer", 42)?;
            Ok(())
        })
        .unwrap();

        let value = conn
            .read("probe", |txn| {
                let table = txn.open_table(PROBE)?;
                Ok(table.get("answer")?.map(|v| v.value()))
            })
            .unwrap();
        assert_eq!(value, Some(42));
        assert_eq!(store.round_trips(), 2);
    }

    #[test]
    fn failed_write_does_not_commit() {
        let store = memory_store();
        let conn = store.acquire().unwrap();

        conn.write("seed", |txn| {
            txn.open_table(PROBE)?;
            Ok(())
        })
        .unwrap();

        let err = conn
            .write("partial", |txn| {
                let mut table = txn.open_table(PROBE)?;
                table.insert("half", 1)?;
                Err::<(), _>(Error::Validation("abort".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let value = conn
            .read("probe", |txn| {
                let table = txn.open_table(PROBE)?;
                Ok(table.get("half")?.map(|v| v.value()))
            })
            .unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn connections_are_released_on_every_path() {
        let store = memory_store();
        {
            let _a = store.acquire().unwrap();
            let _b = store.acquire().unwrap();
            assert_eq!(store.active_connections(), 2);
        }
        assert_eq!(store.active_connections(), 0);

        let result: Result<()> = (|| {
            let conn = store.acquire()?;
            conn.read("missing", |txn| {
                txn.open_table(PROBE)?;
                Ok(())
            })
        })();
        assert!(result.is_err());
        assert_eq!(store.active_connections(), 0);
    }

    #[test]
    fn close_is_idempotent_and_blocks_new_acquisitions() {
        let store = memory_store();
        store.close();
        store.close();
        assert!(store.is_closed());
        assert!(matches!(store.acquire().unwrap_err(), Error::Closed));
    }

    #[test]
    fn slow_operation_times_out() {
        let err = run_bounded("sleepy", Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { operation: "sleepy", .. }));
    }

    #[test]
    fn reopen_file_store_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("store.redb");
        let url = format!("redb://{}", path.display());

        {
            let store = Store::open(&url, DEFAULT_TIMEOUT).unwrap();
            store
                .acquire()
                .unwrap()
                .write("seed", |txn| {
                    let mut table = txn.open_table(PROBE)?;
                    table.insert("kept", 7)?;
                    Ok(())
                })
                .unwrap();
        }

        let store = Store::open(&url, DEFAULT_TIMEOUT).unwrap();
        let value = store
            .acquire()
            .unwrap()
            .read("probe", |txn| {
                let table = txn.open_table(PROBE)?;
                Ok(table.get("kept")?.map(|v| v.value()))
            })
            .unwrap();
        assert_eq!(value, Some(7));
    }
}
