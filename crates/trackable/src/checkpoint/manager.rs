//! Checkpoint file manager for rotation and latest-generation discovery.

use std::fs;
use std::path::{Path, PathBuf};

use super::graph::ObjectGraph;
use crate::Result;

const FILE_PREFIX: &str = "checkpoint_gen_";
const FILE_SUFFIX: &str = ".json";

/// Configuration for checkpoint file management.
#[derive(Clone, Debug)]
pub struct CheckpointConfig {
    /// Directory to store checkpoints
    pub checkpoint_dir: PathBuf,
    /// Keep only the last N checkpoints (0 = keep all)
    pub keep_last: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("checkpoints"),
            keep_last: 5,
        }
    }
}

impl CheckpointConfig {
    /// Create a new config with the given directory.
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            ..Default::default()
        }
    }

    /// Set number of checkpoints to keep.
    pub fn keep_last(mut self, n: usize) -> Self {
        self.keep_last = n;
        self
    }
}

/// Manages the on-disk lifecycle of saved object graphs.
///
/// Handles saving with generation-numbered filenames, rotation, and
/// latest-generation discovery.
///
/// # Example
///
/// ```ignore
/// let config = CheckpointConfig::new("./checkpoints").keep_last(3);
/// let mut manager = CheckpointManager::new(config);
///
/// let graph = export_object_graph(&root, SaveType::Checkpoint)?;
/// let path = manager.save(&graph)?;
///
/// // To resume:
/// if let Some(saved) = manager.load_latest()? {
///     CheckpointRestore::new(saved, &uids).restore(&root)?;
/// }
/// ```
pub struct CheckpointManager {
    config: CheckpointConfig,
    next_generation: u64,
}

impl CheckpointManager {
    /// Create a new checkpoint manager, resuming generation numbering from
    /// any files already in the directory.
    pub fn new(config: CheckpointConfig) -> Self {
        if let Err(e) = fs::create_dir_all(&config.checkpoint_dir) {
            tracing::warn!("Failed to create checkpoint directory: {}", e);
        }
        let next_generation = Self::existing_generations(&config.checkpoint_dir)
            .last()
            .map(|&generation| generation + 1)
            .unwrap_or(0);

        Self {
            config,
            next_generation,
        }
    }

    /// Get the checkpoint directory path.
    pub fn checkpoint_dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }

    /// Write `graph` as the next generation file.
    pub fn save(&mut self, graph: &ObjectGraph) -> Result<PathBuf> {
        let generation = self.next_generation;
        self.next_generation += 1;

        let filename = format!("{FILE_PREFIX}{generation:06}{FILE_SUFFIX}");
        let path = self.config.checkpoint_dir.join(&filename);
        fs::write(&path, serde_json::to_vec_pretty(graph)?)?;
        tracing::info!(path = %path.display(), generation, "saved checkpoint");

        if self.config.keep_last > 0 {
            self.cleanup_old_checkpoints()?;
        }

        Ok(path)
    }

    /// Load the newest checkpoint file.
    ///
    /// Returns `None` if no checkpoints exist.
    pub fn load_latest(&self) -> Result<Option<ObjectGraph>> {
        let Some(path) = self.list_checkpoints()?.pop() else {
            return Ok(None);
        };
        let graph = self.load_from_path(&path)?;
        Ok(Some(graph))
    }

    /// Load a specific checkpoint file.
    pub fn load_from_path(&self, path: impl AsRef<Path>) -> Result<ObjectGraph> {
        let data = fs::read(path.as_ref())?;
        let graph = serde_json::from_slice(&data)?;
        tracing::info!(path = %path.as_ref().display(), "loaded checkpoint");
        Ok(graph)
    }

    /// List all checkpoint files in generation order.
    pub fn list_checkpoints(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.config.checkpoint_dir) {
            Ok(e) => e,
            Err(_) => return Ok(Vec::new()),
        };

        let mut checkpoints: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(FILE_PREFIX) && n.ends_with(FILE_SUFFIX))
                    .unwrap_or(false)
            })
            .collect();

        checkpoints.sort();
        Ok(checkpoints)
    }

    /// Remove old checkpoints, keeping only the last N.
    fn cleanup_old_checkpoints(&self) -> Result<()> {
        let mut checkpoints = self.list_checkpoints()?;

        while checkpoints.len() > self.config.keep_last {
            let old = checkpoints.remove(0);
            if let Err(e) = fs::remove_file(&old) {
                tracing::warn!(path = %old.display(), "Failed to remove old checkpoint: {}", e);
            } else {
                tracing::debug!(path = %old.display(), "Removed old checkpoint");
            }
        }

        Ok(())
    }

    fn existing_generations(dir: &Path) -> Vec<u64> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut generations: Vec<u64> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.path()
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.strip_prefix(FILE_PREFIX))
                    .and_then(|s| s.parse().ok())
            })
            .collect();
        generations.sort_unstable();
        generations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::ObjectNode;
    use tempfile::tempdir;

    /// A graph whose root payload carries a recognizable marker.
    fn marked_graph(marker: u64) -> ObjectGraph {
        ObjectGraph {
            nodes: vec![ObjectNode {
                payload: Some(serde_json::json!({ "marker": marker })),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_config_builder() {
        let config = CheckpointConfig::new("./test").keep_last(10);
        assert_eq!(config.checkpoint_dir, PathBuf::from("./test"));
        assert_eq!(config.keep_last, 10);
    }

    #[test]
    fn test_save_and_load_latest() {
        let dir = tempdir().unwrap();
        let mut manager = CheckpointManager::new(CheckpointConfig::new(dir.path()));

        manager.save(&marked_graph(1)).unwrap();
        manager.save(&marked_graph(2)).unwrap();

        let latest = manager.load_latest().unwrap().expect("checkpoint exists");
        assert_eq!(
            latest.root().unwrap().payload,
            Some(serde_json::json!({ "marker": 2 }))
        );
    }

    #[test]
    fn test_load_latest_on_empty_dir() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(CheckpointConfig::new(dir.path()));
        assert!(manager.load_latest().unwrap().is_none());
    }

    #[test]
    fn test_cleanup_old_checkpoints() {
        let dir = tempdir().unwrap();
        let config = CheckpointConfig::new(dir.path()).keep_last(2);
        let mut manager = CheckpointManager::new(config);

        for marker in 0..5 {
            manager.save(&marked_graph(marker)).unwrap();
        }

        let checkpoints = manager.list_checkpoints().unwrap();
        assert_eq!(checkpoints.len(), 2);
        assert!(checkpoints[0]
            .to_string_lossy()
            .contains("checkpoint_gen_000003"));
        assert!(checkpoints[1]
            .to_string_lossy()
            .contains("checkpoint_gen_000004"));
    }

    #[test]
    fn test_generation_numbering_resumes() {
        let dir = tempdir().unwrap();
        {
            let mut manager = CheckpointManager::new(CheckpointConfig::new(dir.path()));
            manager.save(&marked_graph(1)).unwrap();
        }
        let mut manager = CheckpointManager::new(CheckpointConfig::new(dir.path()));
        let path = manager.save(&marked_graph(2)).unwrap();
        assert!(path.to_string_lossy().contains("checkpoint_gen_000001"));
    }
}
