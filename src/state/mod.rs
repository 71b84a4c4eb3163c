// State module - Persistent application state across restarts

pub mod capture;

use crate::config::{GuardianConfig, StateConfig};
use crate::error::{GuardianError, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

pub use capture::{ContextProvider, StateSource};

const CURRENT_PLAIN: &str = "current_state.json";
const CURRENT_GZ: &str = "current_state.json.gz";
const TEMP_FILE: &str = ".current_state.tmp";
const BACKUP_PREFIX: &str = "state_";

/// Opaque application state. Only the bookkeeping fields are interpreted here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompleteState(Map<String, Value>);

impl CompleteState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a JSON value; anything other than an object is rejected
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn state_id(&self) -> Option<&str> {
        self.0.get("state_id").and_then(Value::as_str)
    }

    pub fn total_restarts(&self) -> Option<u64> {
        self.0.get("total_restarts").and_then(Value::as_u64)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for CompleteState {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Which canonical file is on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalFile {
    None,
    Plain,
    Compressed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub state_dir: PathBuf,
    pub backup_count: usize,
    pub total_size_mb: f64,
    pub current: CanonicalFile,
    pub total_restarts: u64,
}

/// Owns every file under the state directory
pub struct StateManager {
    dir: PathBuf,
    config: StateConfig,
    total_restarts: u64,
    last_capture: Option<Instant>,
    last_captured: Option<CompleteState>,
}

impl StateManager {
    pub fn new<P: AsRef<Path>>(dir: P, config: StateConfig) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            config,
            total_restarts: 0,
            last_capture: None,
            last_captured: None,
        }
    }

    pub fn from_config(config: &GuardianConfig) -> Self {
        Self::new(config.state_dir(), config.state.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn compress_by_default(&self) -> bool {
        self.config.compress
    }

    pub fn total_restarts(&self) -> u64 {
        self.total_restarts
    }

    pub fn increment_restarts(&mut self) -> u64 {
        self.total_restarts += 1;
        self.total_restarts
    }

    /// Most recent successful capture
    pub fn last_captured(&self) -> Option<&CompleteState> {
        self.last_captured.as_ref()
    }

    /// Create the state directory if it is missing
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            GuardianError::StateError(format!(
                "Failed to create state directory {}: {}",
                self.dir.display(),
                e
            ))
        })
    }

    /// Persist `state` as the canonical current state plus a timestamped backup
    pub fn persist_state(&self, state: &CompleteState, compress: bool) -> bool {
        match self.write_state(state, compress) {
            Ok(path) => {
                debug!(path = %path.display(), compress, "state persisted");
                true
            }
            Err(e) => {
                error!("Failed to persist state: {}", e);
                false
            }
        }
    }

    fn write_state(&self, state: &CompleteState, compress: bool) -> Result<PathBuf> {
        self.ensure_dir()?;

        let now = Utc::now();
        let state_id = format_state_id(&now);

        let mut stamped = state.clone();
        stamped.insert("state_id", Value::String(state_id.clone()));
        stamped.insert("persisted_at", Value::String(now.to_rfc3339()));
        stamped.insert("total_restarts", Value::from(self.total_restarts));

        let bytes = encode(&stamped, compress)?;

        let (canonical, stale) = if compress {
            (CURRENT_GZ, CURRENT_PLAIN)
        } else {
            (CURRENT_PLAIN, CURRENT_GZ)
        };
        let canonical_path = self.dir.join(canonical);
        self.write_atomic(&canonical_path, &bytes)?;

        let stale_path = self.dir.join(stale);
        if stale_path.exists() {
            if let Err(e) = fs::remove_file(&stale_path) {
                warn!("Failed to remove stale state file {}: {}", stale_path.display(), e);
            }
        }

        let backup_path = self.backup_path(&state_id, compress);
        self.write_atomic(&backup_path, &bytes)?;

        Ok(canonical_path)
    }

    /// The canonical file to restore from. A crash between writing one
    /// variant and removing the other can leave both; the newer one wins.
    fn current_file(&self) -> Option<(PathBuf, CanonicalFile)> {
        [
            (CURRENT_GZ, CanonicalFile::Compressed),
            (CURRENT_PLAIN, CanonicalFile::Plain),
        ]
        .into_iter()
        .filter_map(|(name, kind)| {
            let path = self.dir.join(name);
            let modified = fs::metadata(&path)
                .ok()?
                .modified()
                .unwrap_or(SystemTime::UNIX_EPOCH);
            Some((path, kind, modified))
        })
        .reduce(|best, next| if next.2 > best.2 { next } else { best })
        .map(|(path, kind, _)| (path, kind))
    }

    /// Write through the temp file and rename over the target
    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<()> {
        let temp_path = self.dir.join(TEMP_FILE);

        {
            let mut file = File::create(&temp_path).map_err(|e| {
                GuardianError::StateSaveError(format!("Failed to create temp state file: {}", e))
            })?;
            file.write_all(bytes).map_err(|e| {
                GuardianError::StateSaveError(format!("Failed to write temp state file: {}", e))
            })?;
            file.sync_all().map_err(|e| {
                GuardianError::StateSaveError(format!("Failed to sync temp state file: {}", e))
            })?;
        }

        fs::rename(&temp_path, target).map_err(|e| {
            GuardianError::StateSaveError(format!(
                "Failed to rename temp state file to {}: {}",
                target.display(),
                e
            ))
        })
    }

    fn backup_path(&self, state_id: &str, compress: bool) -> PathBuf {
        let extension = if compress { "json.gz" } else { "json" };
        let mut path = self
            .dir
            .join(format!("{}{}.{}", BACKUP_PREFIX, state_id, extension));

        let mut suffix = 1;
        while path.exists() {
            path = self.dir.join(format!(
                "{}{}_{}.{}",
                BACKUP_PREFIX, state_id, suffix, extension
            ));
            suffix += 1;
        }

        path
    }

    /// Load an explicit file, or the canonical state (compressed first).
    /// Returns `None` when nothing is on disk or the file cannot be parsed.
    pub fn restore_state(&mut self, path: Option<&Path>) -> Option<CompleteState> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match self.current_file() {
                Some((path, _)) => path,
                None => {
                    debug!(dir = %self.dir.display(), "no persisted state found");
                    return None;
                }
            },
        };

        let state = match read_state(&path) {
            Ok(state) => state,
            Err(e) => {
                error!("Failed to restore state from {}: {}", path.display(), e);
                return None;
            }
        };

        for issue in validate_state(&state) {
            warn!(path = %path.display(), "state validation issue: {}", issue);
        }

        if let Some(restarts) = state.total_restarts() {
            self.total_restarts = self.total_restarts.max(restarts);
        }

        info!(
            path = %path.display(),
            state_id = state.state_id().unwrap_or("unknown"),
            "state restored"
        );

        Some(state)
    }

    /// Remove backups past the retention window, then the oldest beyond the count cap
    pub fn cleanup_old_states(&self) -> usize {
        let mut backups = match self.list_backups() {
            Ok(backups) => backups,
            Err(e) => {
                warn!("Failed to list state backups: {}", e);
                return 0;
            }
        };

        let retention = Duration::from_secs(self.config.retention_days.saturating_mul(86_400));
        let now = SystemTime::now();
        let mut removed = 0;

        backups.retain(|(path, modified)| {
            let age = now.duration_since(*modified).unwrap_or_default();
            if age > retention {
                match fs::remove_file(path) {
                    Ok(()) => {
                        removed += 1;
                        false
                    }
                    Err(e) => {
                        warn!("Failed to remove expired state {}: {}", path.display(), e);
                        true
                    }
                }
            } else {
                true
            }
        });

        if backups.len() > self.config.max_state_files {
            backups.sort_by_key(|(_, modified)| *modified);
            let excess = backups.len() - self.config.max_state_files;
            for (path, _) in backups.iter().take(excess) {
                match fs::remove_file(path) {
                    Ok(()) => removed += 1,
                    Err(e) => warn!("Failed to remove state {}: {}", path.display(), e),
                }
            }
        }

        if removed > 0 {
            info!(removed, "cleaned up old state files");
        }

        removed
    }

    fn list_backups(&self) -> Result<Vec<(PathBuf, SystemTime)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !is_backup_name(&name) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            backups.push((entry.path(), modified));
        }

        Ok(backups)
    }

    pub fn storage_stats(&self) -> StorageStats {
        let backups = self.list_backups().unwrap_or_default();
        let mut total_bytes: u64 = backups
            .iter()
            .filter_map(|(path, _)| fs::metadata(path).ok())
            .map(|m| m.len())
            .sum();

        for name in [CURRENT_PLAIN, CURRENT_GZ] {
            if let Ok(metadata) = fs::metadata(self.dir.join(name)) {
                total_bytes += metadata.len();
            }
        }
        let current = self
            .current_file()
            .map_or(CanonicalFile::None, |(_, kind)| kind);

        StorageStats {
            state_dir: self.dir.clone(),
            backup_count: backups.len(),
            total_size_mb: total_bytes as f64 / 1024.0 / 1024.0,
            current,
            total_restarts: self.total_restarts,
        }
    }

    /// Compose a snapshot from `source`. Returns `None` inside the capture cooldown.
    pub fn capture_state(&mut self, reason: &str, source: &dyn StateSource) -> Option<CompleteState> {
        self.capture_state_at(reason, source, Instant::now())
    }

    pub fn capture_state_at(
        &mut self,
        reason: &str,
        source: &dyn StateSource,
        now: Instant,
    ) -> Option<CompleteState> {
        if let Some(last) = self.last_capture {
            if now.saturating_duration_since(last) < self.config.capture_cooldown() {
                debug!(reason, "state capture skipped, cooldown active");
                return None;
            }
        }

        let state = capture::compose(reason, self.total_restarts, source);
        self.last_capture = Some(now);
        self.last_captured = Some(state.clone());
        Some(state)
    }
}

fn format_state_id(now: &DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%S_%6f").to_string()
}

fn is_backup_name(name: &str) -> bool {
    name.starts_with(BACKUP_PREFIX) && (name.ends_with(".json") || name.ends_with(".json.gz"))
}

fn encode(state: &CompleteState, compress: bool) -> Result<Vec<u8>> {
    let json = serde_json::to_vec_pretty(state)
        .map_err(|e| GuardianError::SerializationError(format!("Failed to serialize state: {}", e)))?;

    if !compress {
        return Ok(json);
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

fn read_state(path: &Path) -> Result<CompleteState> {
    let raw = fs::read(path)
        .map_err(|e| GuardianError::StateLoadError(format!("Failed to read state file: {}", e)))?;

    let compressed = path
        .file_name()
        .map(|n| n.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false);

    let json = if compressed {
        let mut decoder = GzDecoder::new(raw.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|e| {
            GuardianError::StateCorruption(format!("Failed to decompress state file: {}", e))
        })?;
        out
    } else {
        raw
    };

    let value: Value = serde_json::from_slice(&json)
        .map_err(|e| GuardianError::DeserializationError(format!("Failed to parse state: {}", e)))?;

    CompleteState::from_value(value)
        .ok_or_else(|| GuardianError::StateCorruption("state is not a JSON object".to_string()))
}

/// Structural issues that are worth logging but do not reject the state
fn validate_state(state: &CompleteState) -> Vec<String> {
    let mut issues = Vec::new();

    if state.state_id().is_none() {
        issues.push("missing state_id".to_string());
    }

    match state.get("total_restarts") {
        Some(v) if v.as_u64().is_some() => {}
        Some(v) => issues.push(format!("total_restarts is not an unsigned integer: {}", v)),
        None => issues.push("missing total_restarts".to_string()),
    }

    if let Some(persisted_at) = state.get("persisted_at") {
        let valid = persisted_at
            .as_str()
            .map(|s| DateTime::parse_from_rfc3339(s).is_ok())
            .unwrap_or(false);
        if !valid {
            issues.push(format!("persisted_at is not ISO-8601: {}", persisted_at));
        }
    }

    issues
}
