//! Seeded k-means (k-means++ initialisation, Lloyd iterations).
//!
//! Every random draw comes from one `StdRng` seeded by the caller, so equal
//! inputs, seed and `k` always give equal labels.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use issuelens_common::{euclidean_distance, IssueLensError};

const N_INIT: usize = 10;
const MAX_ITER: usize = 300;
const TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    /// Sum of squared distances of points to their centroid.
    pub inertia: f64,
}

/// Fit `k` clusters. Runs `N_INIT` initialisations and keeps the lowest
/// inertia (earliest on ties).
pub fn fit(data: &[Vec<f64>], k: usize, seed: u64) -> Result<KMeansFit, IssueLensError> {
    if k == 0 || k > data.len() {
        return Err(IssueLensError::Clustering(format!(
            "cannot fit {k} clusters to {} points",
            data.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut best: Option<KMeansFit> = None;
    for _ in 0..N_INIT {
        let centroids = init_plus_plus(data, k, &mut rng);
        let candidate = lloyd(data, centroids);
        if best.as_ref().map_or(true, |b| candidate.inertia < b.inertia) {
            best = Some(candidate);
        }
    }
    best.ok_or_else(|| IssueLensError::Clustering("no k-means run completed".to_string()))
}

fn init_plus_plus(data: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(data[rng.random_range(0..data.len())].clone());

    let mut nearest_sq: Vec<f64> = data
        .iter()
        .map(|p| squared(euclidean_distance(p, &centroids[0])))
        .collect();

    while centroids.len() < k {
        let total: f64 = nearest_sq.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            let mut chosen = data.len() - 1;
            for (idx, weight) in nearest_sq.iter().enumerate() {
                if target < *weight {
                    chosen = idx;
                    break;
                }
                target -= weight;
            }
            chosen
        } else {
            // All points coincide with existing centroids.
            rng.random_range(0..data.len())
        };

        let centroid = data[next].clone();
        for (idx, point) in data.iter().enumerate() {
            let d = squared(euclidean_distance(point, &centroid));
            if d < nearest_sq[idx] {
                nearest_sq[idx] = d;
            }
        }
        centroids.push(centroid);
    }
    centroids
}

fn lloyd(data: &[Vec<f64>], mut centroids: Vec<Vec<f64>>) -> KMeansFit {
    let mut labels = assign(data, &centroids);
    for _ in 0..MAX_ITER {
        let updated = recompute(data, &labels, &centroids);
        let shift: f64 = centroids
            .iter()
            .zip(&updated)
            .map(|(old, new)| squared(euclidean_distance(old, new)))
            .sum();
        centroids = updated;
        let next_labels = assign(data, &centroids);
        let converged = next_labels == labels || shift <= TOLERANCE * TOLERANCE;
        labels = next_labels;
        if converged {
            break;
        }
    }

    let inertia = data
        .iter()
        .zip(&labels)
        .map(|(point, &label)| squared(euclidean_distance(point, &centroids[label])))
        .sum();
    KMeansFit {
        labels,
        centroids,
        inertia,
    }
}

/// Nearest centroid per point; ties go to the lower index.
pub fn assign(data: &[Vec<f64>], centroids: &[Vec<f64>]) -> Vec<usize> {
    data.iter()
        .map(|point| {
            let mut best = 0;
            let mut best_distance = f64::INFINITY;
            for (idx, centroid) in centroids.iter().enumerate() {
                let d = euclidean_distance(point, centroid);
                if d < best_distance {
                    best = idx;
                    best_distance = d;
                }
            }
            best
        })
        .collect()
}

/// Mean of each cluster's members. An emptied cluster keeps its old centroid.
fn recompute(data: &[Vec<f64>], labels: &[usize], previous: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let dim = previous.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0; dim]; previous.len()];
    let mut counts = vec![0usize; previous.len()];
    for (point, &label) in data.iter().zip(labels) {
        counts[label] += 1;
        for (sum, value) in sums[label].iter_mut().zip(point) {
            *sum += value;
        }
    }
    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), old)| {
            if count == 0 {
                old.clone()
            } else {
                sum.into_iter().map(|s| s / count as f64).collect()
            }
        })
        .collect()
}

fn squared(x: f64) -> f64 {
    x * x
}
