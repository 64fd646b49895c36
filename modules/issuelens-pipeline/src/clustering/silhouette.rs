use issuelens_common::euclidean_distance;

/// Mean silhouette coefficient over all points.
///
/// `None` when the labelling has fewer than two clusters or one cluster per
/// point, where the score is undefined. Points alone in their cluster score 0.
pub fn silhouette_score(data: &[Vec<f64>], labels: &[usize]) -> Option<f64> {
    let n = data.len();
    if n == 0 || labels.len() != n {
        return None;
    }
    let cluster_count = labels.iter().max().map_or(0, |m| m + 1);
    let mut sizes = vec![0usize; cluster_count];
    for &label in labels {
        sizes[label] += 1;
    }
    let populated = sizes.iter().filter(|&&s| s > 0).count();
    if populated < 2 || populated >= n {
        return None;
    }

    let mut total = 0.0;
    for i in 0..n {
        let own = labels[i];
        if sizes[own] <= 1 {
            continue;
        }
        let mut sums = vec![0.0; cluster_count];
        for j in 0..n {
            if i != j {
                sums[labels[j]] += euclidean_distance(&data[i], &data[j]);
            }
        }
        let a = sums[own] / (sizes[own] - 1) as f64;
        let b = (0..cluster_count)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }
    Some(total / n as f64)
}
