//! Angular random-projection forest.
//!
//! A build-once, query-many ANN structure in the style of Annoy: each tree
//! recursively splits the items by a hyperplane through the origin whose
//! normal is the difference of two randomly chosen unit vectors, until a
//! node holds at most `leaf_size` items. Queries walk all trees best-first
//! (by smallest margin seen on the path) until `search_k` candidates are
//! collected, then rank those exactly by angular distance.
//!
//! The structure is immutable once built. Changing it means building a new
//! one (see [`super::vector_index::rebuild`]).
//!
//! # Blob format
//!
//! All integers little-endian:
//!
//! ```text
//! magic "FKBFORST" | version u32 | dimension u32 | n_items u64
//! n_trees u32 | leaf_size u32 | seed u64 | id_digest [u8; 32]
//! items: n_items * dimension f32
//! n_nodes u64 | nodes: tag u8 (0 = leaf, 1 = split)
//!   leaf:  len u32, then len * u32 item positions
//!   split: dimension * f32 normal, left u32, right u32
//! roots: n_trees * u32
//! ```
//!
//! `id_digest` is the SHA-256 of the companion id map file. It lets a
//! loader detect a blob paired with the wrong id map.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::{Read, Write};

use crate::error::{Error, Result};

const FOREST_MAGIC: &[u8; 8] = b"FKBFORST";
const FOREST_VERSION: u32 = 1;
const SPLIT_ATTEMPTS: usize = 8;

/// Forest construction and query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForestParams {
    /// Number of trees. More trees, better recall, bigger blob.
    pub n_trees: usize,
    /// Maximum items per leaf.
    pub leaf_size: usize,
    /// RNG seed; the same items and seed give the same forest.
    pub seed: u64,
    /// Candidates examined per query; `n_trees * k` when unset.
    pub search_k: Option<usize>,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 10,
            leaf_size: 16,
            seed: 42,
            search_k: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(Vec<u32>),
    Split {
        normal: Vec<f32>,
        left: u32,
        right: u32,
    },
}

/// Immutable angular ANN forest over `f32` vectors.
#[derive(Debug, Clone)]
pub struct AngularForest {
    dimension: usize,
    n_trees: usize,
    leaf_size: usize,
    seed: u64,
    /// Item vectors as given, row-major.
    items: Vec<f32>,
    /// Unit-normalized copies used for splitting and scoring.
    units: Vec<f32>,
    nodes: Vec<Node>,
    roots: Vec<u32>,
}

/// Node waiting in the best-first queue.
#[derive(Debug, PartialEq)]
struct Pending {
    priority: f32,
    node: u32,
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl AngularForest {
    /// Build a forest over `vectors`; position `i` is `vectors[i]`.
    ///
    /// # Errors
    ///
    /// Returns an error if the dimension is zero, a vector has the wrong
    /// length or a non-finite component, or there are more than
    /// `u32::MAX` items.
    pub fn build(vectors: &[Vec<f32>], dimension: usize, params: &ForestParams) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Index("dimension must be positive".into()));
        }
        let n = u32::try_from(vectors.len())
            .map_err(|_| Error::Index(format!("too many items: {}", vectors.len())))?;

        let mut items = Vec::with_capacity(vectors.len() * dimension);
        for (position, vector) in vectors.iter().enumerate() {
            if vector.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            if vector.iter().any(|x| !x.is_finite()) {
                return Err(Error::Index(format!(
                    "vector at position {position} has non-finite components"
                )));
            }
            items.extend_from_slice(vector);
        }

        let mut forest = Self {
            dimension,
            n_trees: params.n_trees.max(1),
            leaf_size: params.leaf_size.max(1),
            seed: params.seed,
            units: normalize_rows(&items, dimension),
            items,
            nodes: Vec::new(),
            roots: Vec::new(),
        };

        if n > 0 {
            let mut rng = StdRng::seed_from_u64(params.seed);
            for _ in 0..forest.n_trees {
                let root = forest.build_node((0..n).collect(), &mut rng);
                forest.roots.push(root);
            }
        }

        Ok(forest)
    }

    /// An empty forest of the given dimension.
    #[must_use]
    pub fn empty(dimension: usize, params: &ForestParams) -> Self {
        Self {
            dimension,
            n_trees: params.n_trees.max(1),
            leaf_size: params.leaf_size.max(1),
            seed: params.seed,
            items: Vec::new(),
            units: Vec::new(),
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len() / self.dimension
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Construction parameters this forest was built with.
    #[must_use]
    pub fn params(&self) -> ForestParams {
        ForestParams {
            n_trees: self.n_trees,
            leaf_size: self.leaf_size,
            seed: self.seed,
            search_k: None,
        }
    }

    /// The stored vector at `position`.
    ///
    /// # Panics
    ///
    /// Panics if `position >= self.len()`.
    #[must_use]
    pub fn vector(&self, position: usize) -> &[f32] {
        &self.items[position * self.dimension..(position + 1) * self.dimension]
    }

    /// Every stored vector, in position order.
    #[must_use]
    pub fn vectors(&self) -> Vec<Vec<f32>> {
        self.items
            .chunks_exact(self.dimension)
            .map(<[f32]>::to_vec)
            .collect()
    }

    /// A new forest over the first `n` items, built with the same parameters.
    ///
    /// # Errors
    ///
    /// Propagates build errors.
    pub fn truncated(&self, n: usize) -> Result<Self> {
        let vectors: Vec<Vec<f32>> = self.vectors().into_iter().take(n).collect();
        Self::build(&vectors, self.dimension, &self.params())
    }

    /// Approximate k nearest neighbours of `query` as `(position, distance)`,
    /// closest first.
    ///
    /// Distance is `sqrt(2 - 2 cos)`, in `[0, 2]`. Returns every item when
    /// there are fewer than `k`, and nothing for an empty forest.
    ///
    /// # Errors
    ///
    /// Returns `DimensionMismatch` if the query has the wrong length.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        search_k: Option<usize>,
    ) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let q = normalized(query);
        let budget = search_k
            .unwrap_or_else(|| self.n_trees.saturating_mul(k))
            .max(k);

        let mut heap: BinaryHeap<Pending> = self
            .roots
            .iter()
            .map(|&node| Pending {
                priority: f32::INFINITY,
                node,
            })
            .collect();
        let mut seen = vec![false; self.len()];
        let mut candidates = Vec::new();

        while candidates.len() < budget {
            let Some(Pending { priority, node }) = heap.pop() else {
                break;
            };
            match &self.nodes[node as usize] {
                Node::Leaf(members) => {
                    for &item in members {
                        let item = item as usize;
                        if !seen[item] {
                            seen[item] = true;
                            candidates.push(item);
                        }
                    }
                }
                Node::Split {
                    normal,
                    left,
                    right,
                } => {
                    let margin = dot(normal, &q);
                    heap.push(Pending {
                        priority: priority.min(margin),
                        node: *right,
                    });
                    heap.push(Pending {
                        priority: priority.min(-margin),
                        node: *left,
                    });
                }
            }
        }

        let mut scored: Vec<(usize, f32)> = candidates
            .into_iter()
            .map(|item| (item, angular_distance(&q, self.unit(item))))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    fn unit(&self, position: usize) -> &[f32] {
        &self.units[position * self.dimension..(position + 1) * self.dimension]
    }

    #[allow(clippy::cast_possible_truncation)]
    fn push_node(&mut self, node: Node) -> u32 {
        self.nodes.push(node);
        (self.nodes.len() - 1) as u32
    }

    fn build_node(&mut self, members: Vec<u32>, rng: &mut StdRng) -> u32 {
        if members.len() <= self.leaf_size {
            return self.push_node(Node::Leaf(members));
        }

        let normal = self.split_normal(&members, rng);
        let (left, right): (Vec<u32>, Vec<u32>) = members
            .into_iter()
            .partition(|&item| dot(&normal, self.unit(item as usize)) <= 0.0);

        // Identical or collinear points: fall back to a random halving.
        let (left, right) = if left.is_empty() || right.is_empty() {
            let mut all = left;
            all.extend(right);
            all.shuffle(rng);
            let right = all.split_off(all.len() / 2);
            (all, right)
        } else {
            (left, right)
        };

        let slot = self.push_node(Node::Leaf(Vec::new()));
        let left = self.build_node(left, rng);
        let right = self.build_node(right, rng);
        self.nodes[slot as usize] = Node::Split {
            normal,
            left,
            right,
        };
        slot
    }

    fn split_normal(&self, members: &[u32], rng: &mut StdRng) -> Vec<f32> {
        for _ in 0..SPLIT_ATTEMPTS {
            let a = members[rng.gen_range(0..members.len())] as usize;
            let b = members[rng.gen_range(0..members.len())] as usize;
            if a == b {
                continue;
            }
            let normal: Vec<f32> = self
                .unit(a)
                .iter()
                .zip(self.unit(b))
                .map(|(x, y)| x - y)
                .collect();
            if norm(&normal) > 1e-6 {
                return normalized(&normal);
            }
        }

        let random: Vec<f32> = (0..self.dimension)
            .map(|_| rng.gen_range(-1.0f32..1.0))
            .collect();
        normalized(&random)
    }

    // ======================
    // Persistence
    // ======================

    /// Serialize the forest, tagging it with the id map's digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the writer fails.
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_to<W: Write>(&self, w: &mut W, id_digest: &[u8; 32]) -> Result<()> {
        w.write_all(FOREST_MAGIC)?;
        w.write_u32::<LittleEndian>(FOREST_VERSION)?;
        w.write_u32::<LittleEndian>(self.dimension as u32)?;
        w.write_u64::<LittleEndian>(self.len() as u64)?;
        w.write_u32::<LittleEndian>(self.n_trees as u32)?;
        w.write_u32::<LittleEndian>(self.leaf_size as u32)?;
        w.write_u64::<LittleEndian>(self.seed)?;
        w.write_all(id_digest)?;

        for &v in &self.items {
            w.write_f32::<LittleEndian>(v)?;
        }

        w.write_u64::<LittleEndian>(self.nodes.len() as u64)?;
        for node in &self.nodes {
            match node {
                Node::Leaf(members) => {
                    w.write_u8(0)?;
                    w.write_u32::<LittleEndian>(members.len() as u32)?;
                    for &m in members {
                        w.write_u32::<LittleEndian>(m)?;
                    }
                }
                Node::Split {
                    normal,
                    left,
                    right,
                } => {
                    w.write_u8(1)?;
                    for &v in normal {
                        w.write_f32::<LittleEndian>(v)?;
                    }
                    w.write_u32::<LittleEndian>(*left)?;
                    w.write_u32::<LittleEndian>(*right)?;
                }
            }
        }

        for &root in &self.roots {
            w.write_u32::<LittleEndian>(root)?;
        }
        Ok(())
    }

    /// Deserialize a forest and the id map digest it was saved with.
    ///
    /// # Errors
    ///
    /// Returns an error for a bad magic or version, a truncated blob, or
    /// node references that point outside the blob.
    pub fn read_from<R: Read>(r: &mut R) -> Result<(Self, [u8; 32])> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != FOREST_MAGIC {
            return Err(Error::Index("invalid index blob magic".into()));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != FOREST_VERSION {
            return Err(Error::Index(format!("unsupported index blob version: {version}")));
        }

        let dimension = r.read_u32::<LittleEndian>()? as usize;
        let n_items = read_len(r.read_u64::<LittleEndian>()?)?;
        let n_trees = r.read_u32::<LittleEndian>()? as usize;
        let leaf_size = r.read_u32::<LittleEndian>()? as usize;
        let seed = r.read_u64::<LittleEndian>()?;
        let mut digest = [0u8; 32];
        r.read_exact(&mut digest)?;

        if dimension == 0 || n_trees == 0 || leaf_size == 0 {
            return Err(Error::Index("index blob header has zero fields".into()));
        }

        // Sizes come from the file: grow as data arrives rather than
        // trusting them for allocation.
        let mut items = Vec::new();
        for _ in 0..n_items.saturating_mul(dimension) {
            items.push(r.read_f32::<LittleEndian>()?);
        }

        let n_nodes = read_len(r.read_u64::<LittleEndian>()?)?;
        let mut nodes = Vec::new();
        for idx in 0..n_nodes {
            let node = match r.read_u8()? {
                0 => {
                    let len = r.read_u32::<LittleEndian>()? as usize;
                    let mut members = Vec::new();
                    for _ in 0..len {
                        let m = r.read_u32::<LittleEndian>()?;
                        if m as usize >= n_items {
                            return Err(Error::Index("leaf references a missing item".into()));
                        }
                        members.push(m);
                    }
                    Node::Leaf(members)
                }
                1 => {
                    let mut normal = Vec::new();
                    for _ in 0..dimension {
                        normal.push(r.read_f32::<LittleEndian>()?);
                    }
                    let left = r.read_u32::<LittleEndian>()?;
                    let right = r.read_u32::<LittleEndian>()?;
                    // Children always follow their parent.
                    let valid = |child: u32| (child as usize) > idx && (child as usize) < n_nodes;
                    if !valid(left) || !valid(right) {
                        return Err(Error::Index("split references an invalid node".into()));
                    }
                    Node::Split {
                        normal,
                        left,
                        right,
                    }
                }
                tag => return Err(Error::Index(format!("unknown node tag {tag}"))),
            };
            nodes.push(node);
        }

        let mut roots = Vec::new();
        if n_items > 0 {
            for _ in 0..n_trees {
                let root = r.read_u32::<LittleEndian>()?;
                if root as usize >= n_nodes {
                    return Err(Error::Index("root references a missing node".into()));
                }
                roots.push(root);
            }
        }

        let forest = Self {
            dimension,
            n_trees,
            leaf_size,
            seed,
            units: normalize_rows(&items, dimension),
            items,
            nodes,
            roots,
        };
        Ok((forest, digest))
    }
}

fn read_len(raw: u64) -> Result<usize> {
    usize::try_from(raw).map_err(|_| Error::Index(format!("length {raw} out of range")))
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Unit vector in the direction of `v`; the zero vector stays zero.
fn normalized(v: &[f32]) -> Vec<f32> {
    let n = norm(v);
    if n > 0.0 {
        v.iter().map(|x| x / n).collect()
    } else {
        v.to_vec()
    }
}

fn normalize_rows(items: &[f32], dimension: usize) -> Vec<f32> {
    items.chunks_exact(dimension).flat_map(normalized).collect()
}

/// `sqrt(2 - 2 cos(a, b))` for unit vectors `a` and `b`.
fn angular_distance(a: &[f32], b: &[f32]) -> f32 {
    let cos = dot(a, b).clamp(-1.0, 1.0);
    (2.0 - 2.0 * cos).max(0.0).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(hits: &[(usize, f32)]) -> Vec<usize> {
        hits.iter().map(|(p, _)| *p).collect()
    }

    /// Deterministic pseudo-random vectors.
    fn cloud(n: usize, dimension: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dimension).map(|_| rng.gen_range(-1.0f32..1.0)).collect())
            .collect()
    }

    #[test]
    fn test_toy_space_ranking() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.9, 0.1]];
        let forest = AngularForest::build(&vectors, 2, &ForestParams::default()).unwrap();

        let hits = forest.search(&[1.0, 0.0], 2, None).unwrap();
        assert_eq!(positions(&hits), vec![0, 2]);
        assert!(hits[0].1.abs() < 1e-6);
        assert!(hits[0].1 <= hits[1].1);
    }

    #[test]
    fn test_returns_all_when_fewer_than_k() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let forest = AngularForest::build(&vectors, 2, &ForestParams::default()).unwrap();
        let hits = forest.search(&[0.0, 1.0], 10, None).unwrap();
        assert_eq!(positions(&hits), vec![1, 0]);
    }

    #[test]
    fn test_empty_forest_search() {
        let forest = AngularForest::build(&[], 3, &ForestParams::default()).unwrap();
        assert!(forest.is_empty());
        assert!(forest.search(&[1.0, 0.0, 0.0], 5, None).unwrap().is_empty());
    }

    #[test]
    fn test_query_dimension_is_checked() {
        let forest =
            AngularForest::build(&[vec![1.0, 0.0]], 2, &ForestParams::default()).unwrap();
        assert!(matches!(
            forest.search(&[1.0, 0.0, 0.0], 1, None),
            Err(Error::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_build_rejects_bad_vectors() {
        let params = ForestParams::default();
        assert!(AngularForest::build(&[vec![1.0]], 2, &params).is_err());
        assert!(AngularForest::build(&[vec![f32::NAN, 0.0]], 2, &params).is_err());
        assert!(AngularForest::build(&[], 0, &params).is_err());
    }

    #[test]
    fn test_multi_level_trees_find_exact_neighbour() {
        let params = ForestParams {
            leaf_size: 4,
            ..ForestParams::default()
        };
        let vectors = cloud(300, 8, 7);
        let forest = AngularForest::build(&vectors, 8, &params).unwrap();
        assert_eq!(forest.len(), 300);

        // An item is its own nearest neighbour at distance ~0.
        for probe in [0, 57, 299] {
            let hits = forest.search(&vectors[probe], 1, Some(64)).unwrap();
            assert_eq!(hits[0].0, probe);
            assert!(hits[0].1 < 1e-3);
        }
    }

    #[test]
    fn test_results_sorted_by_distance() {
        let vectors = cloud(100, 5, 3);
        let forest = AngularForest::build(&vectors, 5, &ForestParams::default()).unwrap();
        let hits = forest.search(&vectors[10], 10, None).unwrap();
        assert_eq!(hits.len(), 10);
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_identical_vectors_terminate() {
        let vectors = vec![vec![1.0, 1.0]; 100];
        let params = ForestParams {
            leaf_size: 2,
            n_trees: 3,
            ..ForestParams::default()
        };
        let forest = AngularForest::build(&vectors, 2, &params).unwrap();
        assert_eq!(forest.search(&[1.0, 1.0], 5, None).unwrap().len(), 5);
    }

    #[test]
    fn test_build_is_deterministic() {
        let vectors = cloud(50, 4, 11);
        let params = ForestParams {
            leaf_size: 3,
            ..ForestParams::default()
        };
        let a = AngularForest::build(&vectors, 4, &params).unwrap();
        let b = AngularForest::build(&vectors, 4, &params).unwrap();
        assert_eq!(a.nodes, b.nodes);
        assert_eq!(a.roots, b.roots);
    }

    #[test]
    fn test_blob_round_trip() {
        let vectors = cloud(40, 3, 5);
        let params = ForestParams {
            leaf_size: 4,
            n_trees: 3,
            ..ForestParams::default()
        };
        let forest = AngularForest::build(&vectors, 3, &params).unwrap();

        let digest = [7u8; 32];
        let mut blob = Vec::new();
        forest.write_to(&mut blob, &digest).unwrap();
        let (loaded, loaded_digest) = AngularForest::read_from(&mut blob.as_slice()).unwrap();

        assert_eq!(loaded_digest, digest);
        assert_eq!(loaded.len(), 40);
        assert_eq!(loaded.params(), forest.params());
        assert_eq!(loaded.vectors(), vectors);
        assert_eq!(
            loaded.search(&vectors[3], 5, None).unwrap(),
            forest.search(&vectors[3], 5, None).unwrap()
        );
    }

    #[test]
    fn test_truncated_blob_is_error() {
        let forest = AngularForest::build(&cloud(10, 3, 1), 3, &ForestParams::default()).unwrap();
        let mut blob = Vec::new();
        forest.write_to(&mut blob, &[0u8; 32]).unwrap();
        blob.truncate(blob.len() - 3);
        assert!(AngularForest::read_from(&mut blob.as_slice()).is_err());

        assert!(AngularForest::read_from(&mut &b"NOTAFOREST"[..]).is_err());
    }

    #[test]
    fn test_truncated_keeps_prefix() {
        let vectors = cloud(10, 3, 2);
        let forest = AngularForest::build(&vectors, 3, &ForestParams::default()).unwrap();
        let smaller = forest.truncated(4).unwrap();
        assert_eq!(smaller.len(), 4);
        assert_eq!(smaller.vectors(), vectors[..4].to_vec());
    }
}
