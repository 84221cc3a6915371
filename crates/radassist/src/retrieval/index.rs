use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Exhaustive inner-product index over fixed-dimension vectors.
///
/// Vectors are stored row-major in one buffer. With L2-normalized inputs the
/// inner product is the cosine similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatIpIndex {
  dimension: usize,
  vectors: Vec<f32>,
}

/// A search hit: row position in the index and its inner product
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
  pub position: usize,
  pub score: f32,
}

impl FlatIpIndex {
  pub fn new(dimension: usize) -> Self {
    Self { dimension, vectors: Vec::new() }
  }

  pub fn len(&self) -> usize {
    if self.dimension == 0 {
      0
    } else {
      self.vectors.len() / self.dimension
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn add(&mut self, vector: &[f32]) -> Result<()> {
    if vector.len() != self.dimension {
      return Err(Error::model(
        "embedder",
        format!("embedding has dimension {}, index expects {}", vector.len(), self.dimension),
      ));
    }
    self.vectors.extend_from_slice(vector);
    Ok(())
  }

  fn row(&self, position: usize) -> &[f32] {
    let start = position * self.dimension;
    &self.vectors[start..start + self.dimension]
  }

  /// The `k` rows with the largest inner product against `query`, best first
  pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Hit>> {
    if query.len() != self.dimension {
      return Err(Error::model(
        "embedder",
        format!("query has dimension {}, index expects {}", query.len(), self.dimension),
      ));
    }

    let mut hits: Vec<Hit> = (0..self.len())
      .map(|position| Hit { position, score: inner_product(self.row(position), query) })
      .collect();

    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.position.cmp(&b.position)));
    hits.truncate(k);
    Ok(hits)
  }

  /// Check a deserialized index is internally consistent
  pub fn validate(&self) -> Result<()> {
    if self.dimension == 0 && !self.vectors.is_empty() {
      return Err(Error::corrupt_index("index has vectors but no dimension"));
    }
    if self.dimension != 0 && self.vectors.len() % self.dimension != 0 {
      return Err(Error::corrupt_index(format!(
        "{} values do not divide into vectors of dimension {}",
        self.vectors.len(),
        self.dimension
      )));
    }
    Ok(())
  }
}

fn inner_product(a: &[f32], b: &[f32]) -> f32 {
  a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale a vector to unit length in place; zero vectors are left as they are
pub fn normalize_l2(vector: &mut [f32]) {
  let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
  if magnitude > 0.0 {
    vector.iter_mut().for_each(|x| *x /= magnitude);
  }
}
