//! Persisted vector index: an [`AngularForest`] paired with an id map.
//!
//! Position `i` in the forest is the record named by `id_map[i]`. The pair
//! is persisted as two files (binary forest blob and JSON id map) written
//! through temp files and renamed into place; the blob header carries the
//! id map's digest so a torn pair is detected on load. Each repair bumps a
//! counter in a `.repairs` sidecar so a recurrence escalates even when it is
//! detected by a later process.

use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

use super::forest::{AngularForest, ForestParams};
use crate::config::KbConfig;
use crate::error::{Error, Result};
use crate::sync::{
    atomic_write, commit_temp, digest_bytes, file_size, remove_if_exists, write_temp,
};

/// One nearest-neighbour result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: String,
    /// Angular distance, `sqrt(2 - 2 cos)`.
    pub distance: f32,
}

/// Result of [`rebuild`].
#[derive(Debug)]
pub struct Rebuilt {
    pub forest: AngularForest,
    pub id_map: Vec<String>,
    /// Position of the inserted or replaced id.
    pub position: usize,
    /// True when the id already existed and its vector was substituted.
    pub replaced: bool,
}

/// What [`VectorIndex::load`] found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadOutcome {
    /// Neither file exists.
    Missing,
    /// A consistent pair was loaded.
    Loaded { items: usize },
    /// The pair disagreed; the smaller side was kept.
    Reconciled {
        forest_items: usize,
        ids: usize,
        kept: usize,
    },
}

impl LoadOutcome {
    /// Whether the index should be rebuilt from the record store.
    #[must_use]
    pub fn needs_rebuild(&self) -> bool {
        !matches!(self, Self::Loaded { .. })
    }
}

/// Snapshot for `fkb index status`.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub items: usize,
    pub dimension: usize,
    pub n_trees: usize,
    pub leaf_size: usize,
    pub index_path: PathBuf,
    pub index_bytes: u64,
    pub id_map_path: PathBuf,
    pub id_map_bytes: u64,
    pub inconsistencies: usize,
}

/// Rebuild-and-swap step as a pure function.
///
/// Substitutes `vector` at the position of `id` if present, otherwise
/// appends both, then builds a brand-new forest over every position.
///
/// # Errors
///
/// Returns `IndexInconsistent` if the inputs disagree in length, or a
/// build error for malformed vectors.
pub fn rebuild(
    old_ids: &[String],
    old_vectors: &[Vec<f32>],
    id: &str,
    vector: &[f32],
    params: &ForestParams,
) -> Result<Rebuilt> {
    if old_ids.len() != old_vectors.len() {
        return Err(Error::IndexInconsistent {
            items: old_vectors.len(),
            ids: old_ids.len(),
        });
    }

    let mut id_map = old_ids.to_vec();
    let mut vectors = old_vectors.to_vec();

    let (position, replaced) = match id_map.iter().position(|existing| existing == id) {
        Some(position) => {
            vectors[position] = vector.to_vec();
            (position, true)
        }
        None => {
            id_map.push(id.to_string());
            vectors.push(vector.to_vec());
            (id_map.len() - 1, false)
        }
    };

    let forest = AngularForest::build(&vectors, vector.len(), params)?;
    Ok(Rebuilt {
        forest,
        id_map,
        position,
        replaced,
    })
}

struct IndexState {
    forest: AngularForest,
    id_map: Vec<String>,
    positions: HashMap<String, usize>,
}

impl IndexState {
    fn new(forest: AngularForest, id_map: Vec<String>) -> Self {
        let positions = id_map
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
        Self {
            forest,
            id_map,
            positions,
        }
    }

    fn empty(dimension: usize, params: &ForestParams) -> Self {
        Self::new(AngularForest::empty(dimension, params), Vec::new())
    }
}

/// Thread-safe vector index with rebuild-and-swap updates.
///
/// Searches take the read side of the state lock and run concurrently.
/// Mutations hold the writer mutex and the write side until the new pair is
/// persisted and swapped in.
pub struct VectorIndex {
    dimension: usize,
    params: ForestParams,
    index_path: PathBuf,
    id_map_path: PathBuf,
    repairs_path: PathBuf,
    state: RwLock<IndexState>,
    writer: Mutex<()>,
    inconsistencies: AtomicUsize,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimension", &self.dimension)
            .field("items", &self.len())
            .field("index_path", &self.index_path)
            .finish_non_exhaustive()
    }
}

impl VectorIndex {
    /// An empty, unloaded index persisting to the given paths.
    #[must_use]
    pub fn new(
        dimension: usize,
        params: ForestParams,
        index_path: impl Into<PathBuf>,
        id_map_path: impl Into<PathBuf>,
    ) -> Self {
        let index_path = index_path.into();
        let repairs_path = repairs_path_for(&index_path);
        let repairs = read_repairs(&repairs_path);
        Self {
            dimension,
            state: RwLock::new(IndexState::empty(dimension, &params)),
            params,
            index_path,
            id_map_path: id_map_path.into(),
            repairs_path,
            writer: Mutex::new(()),
            inconsistencies: AtomicUsize::new(repairs),
        }
    }

    /// An empty index at the configured paths.
    #[must_use]
    pub fn for_config(config: &KbConfig) -> Self {
        Self::new(
            config.dimension,
            config.index,
            config.index_path(),
            config.id_map_path(),
        )
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    #[must_use]
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    #[must_use]
    pub fn id_map_path(&self) -> &Path {
        &self.id_map_path
    }

    /// Number of indexed items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_state().id_map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.read_state().positions.contains_key(id)
    }

    /// The id map, in position order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.read_state().id_map.clone()
    }

    /// How many inconsistent pairs have been repaired at these paths.
    ///
    /// Read from the `.repairs` sidecar when the index is constructed, so
    /// the count survives restarts until [`Self::clear`].
    #[must_use]
    pub fn inconsistency_count(&self) -> usize {
        self.inconsistencies.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn status(&self) -> IndexStatus {
        IndexStatus {
            items: self.len(),
            dimension: self.dimension,
            n_trees: self.params.n_trees,
            leaf_size: self.params.leaf_size,
            index_path: self.index_path.clone(),
            index_bytes: file_size(&self.index_path),
            id_map_path: self.id_map_path.clone(),
            id_map_bytes: file_size(&self.id_map_path),
            inconsistencies: self.inconsistency_count(),
        }
    }

    /// Approximate k nearest neighbours of `query`, closest first.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the query length is not the index
    /// dimension. An empty index yields an empty list.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let state = self.read_state();
        let hits = state.forest.search(query, k, self.params.search_k)?;
        Ok(hits
            .into_iter()
            .filter_map(|(position, distance)| {
                state.id_map.get(position).map(|id| Neighbor {
                    id: id.clone(),
                    distance,
                })
            })
            .collect())
    }

    /// Insert or replace one vector, rebuilding the whole forest.
    ///
    /// Returns true when `id` was already indexed.
    ///
    /// # Scaling
    ///
    /// Every call reads all n stored vectors, builds a new forest over them
    /// and rewrites both files: O(n log n) time and O(n * D) I/O per
    /// update. This suits a curated corpus of a few thousand records
    /// updated occasionally. For bulk ingestion, upsert into the store
    /// and run [`super::build_from_store`] once instead.
    ///
    /// # Errors
    ///
    /// Returns an error for a blank id or wrong-dimension vector, or if
    /// the build or persistence fails. On error the in-memory index is
    /// unchanged.
    pub fn add_or_update(&self, id: &str, vector: &[f32]) -> Result<bool> {
        if id.trim().is_empty() {
            return Err(Error::InvalidArgument("index id must not be empty".into()));
        }
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let _writer = self.lock_writer();
        let mut state = self.write_state();

        let rebuilt = rebuild(
            &state.id_map,
            &state.forest.vectors(),
            id,
            vector,
            &self.params,
        )?;
        self.persist(&rebuilt.forest, &rebuilt.id_map)?;

        debug!(
            reaction = %id,
            position = rebuilt.position,
            replaced = rebuilt.replaced,
            items = rebuilt.id_map.len(),
            "Rebuilt vector index"
        );
        let replaced = rebuilt.replaced;
        *state = IndexState::new(rebuilt.forest, rebuilt.id_map);
        Ok(replaced)
    }

    /// Persist and swap in a freshly built pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the pair disagrees in length or dimension, or
    /// persistence fails.
    pub fn install(&self, forest: AngularForest, id_map: Vec<String>) -> Result<()> {
        if forest.len() != id_map.len() {
            return Err(Error::IndexInconsistent {
                items: forest.len(),
                ids: id_map.len(),
            });
        }
        if forest.dimension() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: forest.dimension(),
            });
        }

        let _writer = self.lock_writer();
        let mut state = self.write_state();
        self.persist(&forest, &id_map)?;
        *state = IndexState::new(forest, id_map);
        Ok(())
    }

    /// Empty the index and remove both files.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed.
    pub fn clear(&self) -> Result<()> {
        let _writer = self.lock_writer();
        let mut state = self.write_state();
        remove_if_exists(&self.index_path)?;
        remove_if_exists(&self.id_map_path)?;
        remove_if_exists(&self.repairs_path)?;
        self.inconsistencies.store(0, Ordering::Relaxed);
        *state = IndexState::empty(self.dimension, &self.params);
        Ok(())
    }

    /// Write the current pair to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be written.
    pub fn save(&self) -> Result<()> {
        let _writer = self.lock_writer();
        let state = self.read_state();
        self.persist(&state.forest, &state.id_map)
    }

    /// Load the persisted pair, reconciling a mismatch to the smaller side.
    ///
    /// Unreadable files count as empty. A reconciled pair is written back
    /// so the files agree again. The repair is recorded in the `.repairs`
    /// sidecar; any repair after the first, in this process or an earlier
    /// one, is logged at error severity.
    ///
    /// # Errors
    ///
    /// Returns an error only if the reconciled forest cannot be built.
    pub fn load(&self) -> Result<LoadOutcome> {
        let _writer = self.lock_writer();
        let mut state = self.write_state();

        let index_exists = self.index_path.exists();
        let ids_exists = self.id_map_path.exists();
        if !index_exists && !ids_exists {
            *state = IndexState::empty(self.dimension, &self.params);
            return Ok(LoadOutcome::Missing);
        }

        let forest = if index_exists {
            self.read_forest()
        } else {
            None
        };
        let ids = if ids_exists { self.read_id_map() } else { None };

        if let (Some((forest, stored_digest)), Some((ids, ids_digest))) = (&forest, &ids) {
            if forest.len() == ids.len() && stored_digest == ids_digest {
                let items = ids.len();
                *state = IndexState::new(forest.clone(), ids.clone());
                info!(items, "Loaded vector index");
                return Ok(LoadOutcome::Loaded { items });
            }
        }

        let forest_items = forest.as_ref().map_or(0, |(f, _)| f.len());
        let id_count = ids.as_ref().map_or(0, |(i, _)| i.len());
        let kept = forest_items.min(id_count);

        let mut id_map = ids.map(|(i, _)| i).unwrap_or_default();
        id_map.truncate(kept);
        let forest = match forest {
            Some((f, _)) if f.len() == kept => f,
            Some((f, _)) => f.truncated(kept)?,
            None => AngularForest::empty(self.dimension, &self.params),
        };

        let seen = self.inconsistencies.fetch_add(1, Ordering::Relaxed) + 1;
        if seen > 1 {
            error!(
                forest_items,
                ids = id_count,
                kept,
                occurrences = seen,
                "Vector index inconsistent again; run `fkb index build`"
            );
        } else {
            warn!(
                forest_items,
                ids = id_count,
                kept,
                "Vector index and id map disagree; keeping the smaller side"
            );
        }

        if let Err(e) = self.persist(&forest, &id_map) {
            warn!(error = %e, "Failed to persist reconciled vector index");
        }
        if let Err(e) = atomic_write(&self.repairs_path, seen.to_string().as_bytes()) {
            warn!(error = %e, "Failed to record vector index repair");
        }
        *state = IndexState::new(forest, id_map);

        Ok(LoadOutcome::Reconciled {
            forest_items,
            ids: id_count,
            kept,
        })
    }

    fn read_forest(&self) -> Option<(AngularForest, [u8; 32])> {
        let loaded = File::open(&self.index_path)
            .map_err(Error::from)
            .and_then(|file| AngularForest::read_from(&mut BufReader::new(file)));
        match loaded {
            Ok((forest, _)) if forest.dimension() != self.dimension => {
                warn!(
                    expected = self.dimension,
                    actual = forest.dimension(),
                    "Persisted vector index has a different dimension; ignoring it"
                );
                None
            }
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!(path = %self.index_path.display(), error = %e, "Unreadable vector index blob");
                None
            }
        }
    }

    fn read_id_map(&self) -> Option<(Vec<String>, [u8; 32])> {
        let parsed = std::fs::read(&self.id_map_path)
            .map_err(Error::from)
            .and_then(|bytes| {
                let ids: Vec<String> = serde_json::from_slice(&bytes)?;
                Ok((ids, digest_bytes(&bytes)))
            });
        match parsed {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!(path = %self.id_map_path.display(), error = %e, "Unreadable id map");
                None
            }
        }
    }

    /// Both files go to temp siblings first; renames happen only after both
    /// are on disk. An empty pair removes the files.
    fn persist(&self, forest: &AngularForest, id_map: &[String]) -> Result<()> {
        if id_map.is_empty() {
            remove_if_exists(&self.index_path)?;
            remove_if_exists(&self.id_map_path)?;
            return Ok(());
        }

        let id_json = serde_json::to_vec(id_map)?;
        let digest = digest_bytes(&id_json);

        let index_temp = write_temp(&self.index_path, |w| forest.write_to(w, &digest))?;
        let ids_temp = write_temp(&self.id_map_path, |w| {
            w.write_all(&id_json)?;
            Ok(())
        })?;
        commit_temp(&index_temp, &self.index_path)?;
        commit_temp(&ids_temp, &self.id_map_path)?;
        Ok(())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn repairs_path_for(index_path: &Path) -> PathBuf {
    let mut path = index_path.as_os_str().to_owned();
    path.push(".repairs");
    PathBuf::from(path)
}

fn read_repairs(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| text.trim().parse().ok())
        .unwrap_or(0)
}
