use nalgebra::Vector2;

pub const INITIAL_CAPACITY: usize = 64;

/// Growable storage reused across refinement passes.
///
/// When full, the buffer grows to at least twice its capacity (or the required
/// size when larger). Capacity never shrinks and [`clear`](Self::clear) keeps
/// the allocation.
#[derive(Debug, Clone)]
pub struct MatchBuffer<T> {
    entries: Vec<T>,
    grow_events: usize,
}

impl<T> Default for MatchBuffer<T> {
    fn default() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }
}

impl<T> MatchBuffer<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            grow_events: 0,
        }
    }

    /// Make room for `additional` more entries.
    pub fn reserve(&mut self, additional: usize) {
        let required = self.entries.len() + additional;
        let capacity = self.entries.capacity();
        if required <= capacity {
            return;
        }

        let target = required.max(capacity * 2);
        self.entries.reserve_exact(target - self.entries.len());
        self.grow_events += 1;
    }

    pub fn push(&mut self, entry: T) {
        self.reserve(1);
        self.entries.push(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    pub fn grow_events(&self) -> usize {
        self.grow_events
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.entries.get(index)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entries.iter()
    }
}

/// Right-image positions selected for one pyramid level during a refinement
/// pass, and which of them were accepted.
#[derive(Debug, Clone, Default)]
pub struct LevelMatches {
    right_keypoints: MatchBuffer<Vector2<f64>>,
    legal: MatchBuffer<usize>,
}

impl LevelMatches {
    pub fn clear(&mut self) {
        self.right_keypoints.clear();
        self.legal.clear();
    }

    /// Record a selected position, returning its index.
    pub fn push(&mut self, right_uv: Vector2<f64>) -> usize {
        self.right_keypoints.push(right_uv);
        self.right_keypoints.len() - 1
    }

    pub fn mark_legal(&mut self, index: usize) {
        if index < self.right_keypoints.len() {
            self.legal.push(index);
        }
    }

    /// Number of positions the level can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.right_keypoints.capacity()
    }

    pub fn right_keypoints(&self) -> &[Vector2<f64>] {
        self.right_keypoints.as_slice()
    }

    pub fn legal_indices(&self) -> &[usize] {
        self.legal.as_slice()
    }

    /// Positions that passed the epipolar, displacement and mutuality checks.
    pub fn legal_matches(&self) -> impl Iterator<Item = &Vector2<f64>> + '_ {
        self.legal
            .iter()
            .filter_map(|&i| self.right_keypoints.get(i))
    }
}
