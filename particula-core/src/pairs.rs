//! Explicit pair bonds between particles
//!
//! Pairs are stored as parallel `first`/`second` arrays with `first < second`,
//! plus named per-pair scalar series and a per-particle adjacency list of
//! pair positions. Additions are incremental; deletions are batched: bonds are
//! marked first and removed together by one compaction pass.

use crate::symbol::Field;
use crate::tensor::Tensor;
use thiserror::Error;

/// Errors raised by pair bookkeeping
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PairError {
    #[error("particle {0} cannot be paired with itself")]
    SelfPair(usize),
    #[error("particle {index} out of range for {count} particles")]
    ParticleOutOfRange { index: usize, count: usize },
    #[error("pair list '{pairs}' has no series '{series}'")]
    UnknownSeries { pairs: String, series: String },
    #[error("pair list '{pairs}' already has a series '{series}'")]
    DuplicateSeries { pairs: String, series: String },
    #[error("expected {expected} series value(s), got {got}")]
    SeriesData { expected: usize, got: usize },
    #[error("pair position {0} out of range")]
    PairOutOfRange(usize),
}

/// A named list of bonds
#[derive(Debug, Clone)]
pub struct Pairs {
    name: String,
    particle_count: usize,
    first: Vec<usize>,
    second: Vec<usize>,
    series: Vec<Field>,
    adjacency: Vec<Vec<usize>>,
    marked: Vec<bool>,
}

impl Pairs {
    pub fn new(name: impl Into<String>, particle_count: usize) -> Self {
        Self {
            name: name.into(),
            particle_count,
            first: Vec::new(),
            second: Vec::new(),
            series: Vec::new(),
            adjacency: vec![Vec::new(); particle_count],
            marked: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.first.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_empty()
    }

    pub fn particle_count(&self) -> usize {
        self.particle_count
    }

    pub fn get_first(&self) -> &[usize] {
        &self.first
    }

    pub fn get_second(&self) -> &[usize] {
        &self.second
    }

    /// Pair positions touching particle `i`
    pub fn adjacency(&self, i: usize) -> &[usize] {
        self.adjacency.get(i).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The partner of `i` in pair `k`
    pub fn other(&self, k: usize, i: usize) -> usize {
        if self.first[k] == i {
            self.second[k]
        } else {
            self.first[k]
        }
    }

    pub fn contains(&self, i: usize, j: usize) -> bool {
        let (a, b) = if i < j { (i, j) } else { (j, i) };
        self.adjacency(a).iter().any(|&k| self.second[k] == b)
    }

    /// Register a new scalar series; existing pairs start at zero
    pub fn add_series(&mut self, name: &str, symmetric: bool) -> Result<usize, PairError> {
        if self.series_index(name).is_some() {
            return Err(PairError::DuplicateSeries {
                pairs: self.name.clone(),
                series: name.to_string(),
            });
        }
        let mut field = Field::new(name, self.len(), Tensor::scalar(0.0), 1);
        field.symmetric = symmetric;
        self.series.push(field);
        Ok(self.series.len() - 1)
    }

    pub fn series_index(&self, name: &str) -> Option<usize> {
        self.series.iter().position(|s| s.name == name)
    }

    pub fn series(&self, name: &str) -> Result<&Field, PairError> {
        self.series_index(name)
            .map(|k| &self.series[k])
            .ok_or_else(|| PairError::UnknownSeries {
                pairs: self.name.clone(),
                series: name.to_string(),
            })
    }

    /// Series value of pair `k` as seen from particle `i`: non-symmetric
    /// series flip sign when read from the second particle
    pub fn series_value(&self, series: usize, k: usize, i: usize) -> Option<f64> {
        let field = self.series.get(series)?;
        let value = field.get(k, 0)?.value();
        if !field.symmetric && self.second.get(k) == Some(&i) {
            Some(-value)
        } else {
            Some(value)
        }
    }

    /// Append the bond `(i, j)` with one initial value per registered
    /// series, returning its position
    pub fn add_pair(&mut self, i: usize, j: usize, data: &[f64]) -> Result<usize, PairError> {
        if i == j {
            return Err(PairError::SelfPair(i));
        }
        for index in [i, j] {
            if index >= self.particle_count {
                return Err(PairError::ParticleOutOfRange {
                    index,
                    count: self.particle_count,
                });
            }
        }
        if data.len() != self.series.len() {
            return Err(PairError::SeriesData {
                expected: self.series.len(),
                got: data.len(),
            });
        }

        let (a, b) = if i < j { (i, j) } else { (j, i) };
        let k = self.first.len();
        self.first.push(a);
        self.second.push(b);
        self.marked.push(false);
        for (field, value) in self.series.iter_mut().zip(data) {
            field.push(Tensor::scalar(*value));
        }
        self.adjacency[a].push(k);
        self.adjacency[b].push(k);
        Ok(k)
    }

    pub fn mark_to_delete(&mut self, k: usize) -> Result<(), PairError> {
        let slot = self.marked.get_mut(k).ok_or(PairError::PairOutOfRange(k))?;
        *slot = true;
        Ok(())
    }

    pub fn is_marked(&self, k: usize) -> bool {
        self.marked.get(k).copied().unwrap_or(false)
    }

    pub fn marked_count(&self) -> usize {
        self.marked.iter().filter(|m| **m).count()
    }

    /// Remove every marked pair in one pass and rebuild the adjacency
    /// lists; returns how many pairs were removed
    pub fn delete_marked_pairs(&mut self) -> usize {
        let removed = self.marked_count();
        if removed == 0 {
            return 0;
        }
        let keep: Vec<bool> = self.marked.iter().map(|m| !m).collect();
        compact(&mut self.first, &keep);
        compact(&mut self.second, &keep);
        for field in self.series.iter_mut() {
            field.retain(&keep);
        }
        self.marked = vec![false; self.first.len()];
        self.rebuild_adjacency();
        removed
    }

    /// Recompute every adjacency list from `first`/`second`
    pub fn rebuild_adjacency(&mut self) {
        self.adjacency = vec![Vec::new(); self.particle_count];
        for (k, (&a, &b)) in self.first.iter().zip(&self.second).enumerate() {
            self.adjacency[a].push(k);
            self.adjacency[b].push(k);
        }
    }

    /// Follow a particle-count change: particles with `keep[i] == false`
    /// disappear, bonds touching them are dropped and the survivors are
    /// renumbered
    pub fn remove_particles(&mut self, keep: &[bool]) {
        let mut remap = vec![usize::MAX; keep.len()];
        let mut next = 0;
        for (i, kept) in keep.iter().enumerate() {
            if *kept {
                remap[i] = next;
                next += 1;
            }
        }
        for k in 0..self.len() {
            if !keep[self.first[k]] || !keep[self.second[k]] {
                self.marked[k] = true;
            }
        }
        self.particle_count = next;
        let keep_pairs: Vec<bool> = self.marked.iter().map(|m| !m).collect();
        compact(&mut self.first, &keep_pairs);
        compact(&mut self.second, &keep_pairs);
        for field in self.series.iter_mut() {
            field.retain(&keep_pairs);
        }
        for k in 0..self.first.len() {
            self.first[k] = remap[self.first[k]];
            self.second[k] = remap[self.second[k]];
        }
        self.marked = vec![false; self.first.len()];
        self.rebuild_adjacency();
    }

    /// Follow appended particles; they start without bonds
    pub fn grow_particles(&mut self, count: usize) {
        self.particle_count = count;
        self.adjacency.resize(count, Vec::new());
    }
}

fn compact(values: &mut Vec<usize>, keep: &[bool]) {
    let mut k = 0;
    values.retain(|_| {
        let kept = keep[k];
        k += 1;
        kept
    });
}
