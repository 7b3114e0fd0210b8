// Position Store
// Whole-snapshot persistence for tracked option positions
//
// The store is the single source of truth for duplicate suppression. Every
// access loads the full collection and every mutation writes the full result
// back atomically, so a restart resumes from the last committed snapshot.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::types::{parse_timestamp, OrderSide, Position};

// =============================================================================
// Persistence Backends
// =============================================================================

/// Durable, key-free list of positions
pub trait PositionRepository: Send + Sync {
    fn load(&self) -> Result<Vec<Position>>;

    /// Replace the stored collection with `positions` in one atomic step
    fn save(&self, positions: &[Position]) -> Result<()>;
}

impl<T: PositionRepository + ?Sized> PositionRepository for Arc<T> {
    fn load(&self) -> Result<Vec<Position>> {
        (**self).load()
    }

    fn save(&self, positions: &[Position]) -> Result<()> {
        (**self).save(positions)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    Json,
    Sqlite,
}

/// JSON array on disk, rewritten through a temp file + rename
pub struct JsonFileRepository {
    path: PathBuf,
}

impl JsonFileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create state dir: {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Flush the directory entry so the rename itself survives a crash
    #[cfg(unix)]
    fn sync_dir(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        File::open(dir)
            .and_then(|d| d.sync_all())
            .with_context(|| format!("Failed to sync state dir: {}", dir.display()))
    }

    #[cfg(not(unix))]
    fn sync_dir(&self) -> Result<()> {
        Ok(())
    }
}

impl PositionRepository for JsonFileRepository {
    fn load(&self) -> Result<Vec<Position>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read positions: {}", self.path.display()))?;
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&contents)
            .with_context(|| format!("Corrupt positions file: {}", self.path.display()))
    }

    fn save(&self, positions: &[Position]) -> Result<()> {
        let tmp = self.temp_path();
        let body = serde_json::to_string_pretty(positions)?;

        {
            let mut file = File::create(&tmp)
                .with_context(|| format!("Failed to create {}", tmp.display()))?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&tmp, &self.path).with_context(|| {
            format!("Failed to replace positions file: {}", self.path.display())
        })?;
        self.sync_dir()?;

        debug!("Positions saved: {} -> {}", positions.len(), self.path.display());
        Ok(())
    }
}

/// SQLite table replaced wholesale inside a single transaction
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS positions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                opened_at TEXT NOT NULL
            )",
            [],
        )?;
        debug!("Position schema created/verified");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("position database lock poisoned"))
    }
}

impl PositionRepository for SqliteRepository {
    fn load(&self) -> Result<Vec<Position>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT symbol, side, opened_at FROM positions ORDER BY id")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(symbol, side, opened_at)| {
                let side: OrderSide = side.parse().map_err(|e: String| anyhow!(e))?;
                let opened_at = parse_timestamp(&opened_at)
                    .ok_or_else(|| anyhow!("Bad timestamp for {}: {}", symbol, opened_at))?;
                Ok(Position::new(symbol, side, opened_at))
            })
            .collect()
    }

    fn save(&self, positions: &[Position]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM positions", [])?;
        for pos in positions {
            tx.execute(
                "INSERT INTO positions (symbol, side, opened_at) VALUES (?1, ?2, ?3)",
                params![
                    pos.contract_symbol,
                    pos.side.as_str(),
                    pos.opened_at.to_rfc3339()
                ],
            )?;
        }
        tx.commit()?;

        debug!("Positions saved: {} rows", positions.len());
        Ok(())
    }
}

/// Volatile backend for tests and dry runs
#[derive(Default)]
pub struct MemoryRepository {
    positions: Mutex<Vec<Position>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positions(positions: Vec<Position>) -> Self {
        Self {
            positions: Mutex::new(positions),
        }
    }
}

impl PositionRepository for MemoryRepository {
    fn load(&self) -> Result<Vec<Position>> {
        self.positions
            .lock()
            .map(|p| p.clone())
            .map_err(|_| anyhow!("position lock poisoned"))
    }

    fn save(&self, positions: &[Position]) -> Result<()> {
        let mut guard = self
            .positions
            .lock()
            .map_err(|_| anyhow!("position lock poisoned"))?;
        *guard = positions.to_vec();
        Ok(())
    }
}

// =============================================================================
// Factory Function
// =============================================================================

pub fn create_repository<P: AsRef<Path>>(
    state_dir: P,
    backend: StateBackend,
) -> Result<Box<dyn PositionRepository>> {
    let state_dir = state_dir.as_ref();
    fs::create_dir_all(state_dir)
        .with_context(|| format!("Failed to create state dir: {}", state_dir.display()))?;

    let repo: Box<dyn PositionRepository> = match backend {
        StateBackend::Json => Box::new(JsonFileRepository::new(state_dir.join("open_positions.json"))?),
        StateBackend::Sqlite => Box::new(SqliteRepository::new(state_dir.join("positions.db"))?),
    };

    info!("Position store initialized ({:?}) in {}", backend, state_dir.display());
    Ok(repo)
}

// =============================================================================
// Position Store
// =============================================================================

pub struct PositionStore {
    repo: Box<dyn PositionRepository>,
}

impl PositionStore {
    pub fn new(repo: Box<dyn PositionRepository>) -> Self {
        Self { repo }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryRepository::new()))
    }

    /// Current snapshot, in insertion order
    pub fn positions(&self) -> Result<Vec<Position>> {
        self.repo.load()
    }

    pub fn is_duplicate(&self, contract_symbol: &str) -> Result<bool> {
        Ok(self
            .repo
            .load()?
            .iter()
            .any(|p| p.contract_symbol == contract_symbol))
    }

    /// Append a position. Callers check `is_duplicate` first.
    pub fn track(
        &mut self,
        contract_symbol: &str,
        side: OrderSide,
        opened_at: DateTime<Utc>,
    ) -> Result<Position> {
        let mut positions = self.repo.load()?;
        let position = Position::new(contract_symbol, side, opened_at);
        positions.push(position.clone());
        self.repo.save(&positions)?;

        info!("Tracking position: {} ({})", contract_symbol, side);
        Ok(position)
    }

    /// Check and append in one read-modify-write; returns false if already tracked
    pub fn track_if_absent(
        &mut self,
        contract_symbol: &str,
        side: OrderSide,
        opened_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut positions = self.repo.load()?;
        if positions.iter().any(|p| p.contract_symbol == contract_symbol) {
            return Ok(false);
        }

        positions.push(Position::new(contract_symbol, side, opened_at));
        self.repo.save(&positions)?;

        info!("Tracking position: {} ({})", contract_symbol, side);
        Ok(true)
    }

    /// Positions held for at least `threshold_hours`, in insertion order.
    ///
    /// Nothing is removed; pair with `release` once each one is closed.
    pub fn due_for_close(&self, threshold_hours: f64, now: DateTime<Utc>) -> Result<Vec<Position>> {
        Ok(self
            .repo
            .load()?
            .into_iter()
            .filter(|p| p.hours_held(now) >= threshold_hours)
            .collect())
    }

    /// Drop exactly the given positions; returns how many were removed.
    ///
    /// Positions tracked since `closed` was read are left alone.
    pub fn release(&mut self, closed: &[Position]) -> Result<usize> {
        let positions = self.repo.load()?;
        let before = positions.len();
        let retained: Vec<Position> = positions
            .into_iter()
            .filter(|p| !closed.contains(p))
            .collect();

        let removed = before - retained.len();
        if removed > 0 {
            self.repo.save(&retained)?;
            debug!("Released {} positions, {} still open", removed, retained.len());
        }
        Ok(removed)
    }

    /// Remove and return every position held for at least `threshold_hours`.
    ///
    /// Retained positions keep their relative order.
    pub fn expire_older_than(
        &mut self,
        threshold_hours: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<Position>> {
        let expired = self.due_for_close(threshold_hours, now)?;
        if !expired.is_empty() {
            self.release(&expired)?;
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_track_then_duplicate() {
        let mut store = PositionStore::in_memory();
        let now = Utc::now();

        assert!(!store.is_duplicate("SOFI_C8").unwrap());
        store.track("SOFI_C8", OrderSide::BuyToOpen, now).unwrap();
        assert!(store.is_duplicate("SOFI_C8").unwrap());
        assert!(!store.is_duplicate("SOFI_P8").unwrap());
    }

    #[test]
    fn test_track_does_not_dedup() {
        let mut store = PositionStore::in_memory();
        let now = Utc::now();

        store.track("X", OrderSide::BuyToOpen, now).unwrap();
        store.track("X", OrderSide::BuyToOpen, now).unwrap();
        assert_eq!(store.positions().unwrap().len(), 2);
    }

    #[test]
    fn test_track_if_absent() {
        let mut store = PositionStore::in_memory();
        let now = Utc::now();

        assert!(store.track_if_absent("X", OrderSide::BuyToOpen, now).unwrap());
        assert!(!store.track_if_absent("X", OrderSide::BuyToOpen, now).unwrap());
        assert_eq!(store.positions().unwrap().len(), 1);
    }

    #[test]
    fn test_expire_older_than_threshold() {
        let now = Utc::now();
        let repo = MemoryRepository::with_positions(vec![
            Position::new("OLD", OrderSide::BuyToOpen, now - Duration::hours(5)),
            Position::new("FRESH", OrderSide::BuyToOpen, now - Duration::hours(1)),
        ]);
        let mut store = PositionStore::new(Box::new(repo));

        let expired = store.expire_older_than(4.0, now).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].contract_symbol, "OLD");

        assert!(!store.is_duplicate("OLD").unwrap());
        assert!(store.is_duplicate("FRESH").unwrap());
    }

    #[test]
    fn test_expire_at_exact_threshold() {
        let now = Utc::now();
        let repo = MemoryRepository::with_positions(vec![Position::new(
            "EDGE",
            OrderSide::BuyToOpen,
            now - Duration::hours(4),
        )]);
        let mut store = PositionStore::new(Box::new(repo));

        assert_eq!(store.expire_older_than(4.0, now).unwrap().len(), 1);
        assert!(store.positions().unwrap().is_empty());
    }

    #[test]
    fn test_expire_preserves_order_of_retained() {
        let now = Utc::now();
        let repo = MemoryRepository::with_positions(vec![
            Position::new("A", OrderSide::BuyToOpen, now - Duration::minutes(30)),
            Position::new("B", OrderSide::BuyToOpen, now - Duration::hours(6)),
            Position::new("C", OrderSide::BuyToOpen, now - Duration::minutes(10)),
            Position::new("D", OrderSide::BuyToOpen, now - Duration::hours(9)),
            Position::new("E", OrderSide::BuyToOpen, now - Duration::minutes(50)),
        ]);
        let mut store = PositionStore::new(Box::new(repo));

        let expired: Vec<String> = store
            .expire_older_than(4.0, now)
            .unwrap()
            .into_iter()
            .map(|p| p.contract_symbol)
            .collect();
        assert_eq!(expired, vec!["B", "D"]);

        let retained: Vec<String> = store
            .positions()
            .unwrap()
            .into_iter()
            .map(|p| p.contract_symbol)
            .collect();
        assert_eq!(retained, vec!["A", "C", "E"]);
    }

    #[test]
    fn test_due_for_close_leaves_store_untouched() {
        let now = Utc::now();
        let repo = MemoryRepository::with_positions(vec![
            Position::new("OLD", OrderSide::BuyToOpen, now - Duration::hours(5)),
            Position::new("FRESH", OrderSide::BuyToOpen, now - Duration::hours(1)),
        ]);
        let mut store = PositionStore::new(Box::new(repo));

        let due = store.due_for_close(4.0, now).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(store.positions().unwrap().len(), 2);

        assert_eq!(store.release(&due).unwrap(), 1);
        assert!(!store.is_duplicate("OLD").unwrap());
        assert!(store.is_duplicate("FRESH").unwrap());

        // a second release finds nothing to drop
        assert_eq!(store.release(&due).unwrap(), 0);
    }

    #[test]
    fn test_json_save_in_nested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("open_positions.json");
        let repo = JsonFileRepository::new(&path).unwrap();
        let positions = vec![Position::new("X", OrderSide::BuyToOpen, Utc::now())];

        repo.save(&positions).unwrap();
        repo.save(&positions).unwrap();

        assert_eq!(repo.load().unwrap(), positions);
        assert!(!path.with_file_name("open_positions.json.tmp").exists());
    }

    #[test]
    fn test_sqlite_round_trip() {
        let repo = SqliteRepository::in_memory().unwrap();
        let opened = "2024-05-03T15:45:10Z".parse::<DateTime<Utc>>().unwrap();
        let positions = vec![
            Position::new("SOFI240510C00007000", OrderSide::BuyToOpen, opened),
            Position::new("SOFI240510P00007000", OrderSide::BuyToOpen, opened + Duration::minutes(5)),
        ];

        repo.save(&positions).unwrap();
        assert_eq!(repo.load().unwrap(), positions);

        repo.save(&positions[1..]).unwrap();
        assert_eq!(repo.load().unwrap(), positions[1..].to_vec());
    }
}
