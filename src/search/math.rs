//! Batch vector math shared by the cache and the index backends.
//!
//! Vectors are stored L2-normalized, so cosine similarity is a plain dot
//! product and a whole candidate set is scored with one matrix–vector
//! multiplication.

use std::cmp::Ordering;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use crate::error::SearchError;

/// L2-normalize a vector. Returns a zero vector if the input norm is zero.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

/// Row-stacked vectors with the record id of each row.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatrix {
    ids: Vec<String>,
    vectors: Array2<f32>,
}

impl VectorMatrix {
    pub fn empty(dimension: usize) -> Self {
        Self {
            ids: Vec::new(),
            vectors: Array2::zeros((0, dimension)),
        }
    }

    /// Stack rows into a matrix. Every row must have exactly `dimension` values.
    pub fn from_rows<I>(dimension: usize, rows: I) -> Result<Self, SearchError>
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        let mut ids = Vec::new();
        let mut flat = Vec::new();
        for (id, vector) in rows {
            if vector.len() != dimension {
                return Err(SearchError::dimension_mismatch(
                    format!("record {id}"),
                    dimension,
                    vector.len(),
                ));
            }
            flat.extend_from_slice(&vector);
            ids.push(id);
        }

        let vectors = Array2::from_shape_vec((ids.len(), dimension), flat)
            .map_err(|e| anyhow::anyhow!("failed to stack vectors: {e}"))?;
        Ok(Self { ids, vectors })
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn vectors(&self) -> ArrayView2<'_, f32> {
        self.vectors.view()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.vectors.ncols()
    }

    /// Cosine similarity of `query` against every row, as one batched product.
    pub fn scores(&self, query: &[f32]) -> Result<Array1<f32>, SearchError> {
        if query.len() != self.dimension() {
            return Err(SearchError::dimension_mismatch(
                "query vector",
                self.dimension(),
                query.len(),
            ));
        }
        Ok(self.vectors.dot(&ArrayView1::from(query)))
    }
}

/// Indices of the `k` best rows: highest score first, ties broken by the
/// most recent modification, then by id for a total order.
///
/// Uses a partial selection so only the winning `k` rows are fully sorted.
pub fn top_k<R>(scores: &[f32], ids: &[String], k: usize, recency: R) -> Vec<usize>
where
    R: Fn(usize) -> i64,
{
    let n = scores.len();
    if k == 0 || n == 0 {
        return Vec::new();
    }

    let cmp = |a: &usize, b: &usize| -> Ordering {
        scores[*b]
            .total_cmp(&scores[*a])
            .then_with(|| recency(*b).cmp(&recency(*a)))
            .then_with(|| ids[*a].cmp(&ids[*b]))
    };

    let mut order: Vec<usize> = (0..n).collect();
    if k < n {
        order.select_nth_unstable_by(k - 1, cmp);
        order.truncate(k);
    }
    order.sort_unstable_by(cmp);
    order
}
