//! Weighted k-means over distinct colors.
//!
//! Inputs are histograms (distinct color + sample count) sorted by color, so
//! the cost of a run depends on how many distinct colors were sampled rather
//! than on the pixel count. The engine itself works on any weighted points,
//! which is how luminance groups are formed as well.
//!
//! The RGB backend is a seeded k-means++ initialisation followed by Lloyd
//! iterations and a Hartigan transfer pass. The Lab backend hands the samples
//! to `kmeans_colors`.

use kmeans_colors::get_kmeans;
use palette::{IntoColor, Lab, LinSrgb, Srgb};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::sample::ColorCount;

/// A position in the working color space.
pub type Point = [f64; 3];

/// Above this many distinct colors, [`suggest_k`] scores only the most
/// frequent ones; the silhouette is quadratic in the point count.
pub const SILHOUETTE_LIMIT: usize = 1_500;

/// Relative gain a Hartigan transfer must achieve to be applied.
const TRANSFER_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KmeansParams {
    pub k: usize,
    pub max_iterations: usize,
    pub convergence_threshold: f64,
    pub restarts: usize,
    pub seed: u64,
}

/// Outcome of one clustering call, centroids expressed in 8-bit RGB units.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    pub centroids: Vec<Point>,
    /// Samples per cluster.
    pub weights: Vec<usize>,
    /// Cluster of each histogram entry.
    pub assignments: Vec<usize>,
    /// Weighted sum of squared distances to the assigned centroid.
    pub inertia: f64,
    /// Lloyd iterations run; `None` when the backend does not report it.
    pub iterations: Option<usize>,
    pub converged: bool,
    /// Largest centroid movement of the last iteration.
    pub final_shift: f64,
}

/// Cluster `histogram` into `params.k` groups in RGB space.
///
/// `params.k` must be in `1..=histogram.len()`.
pub fn cluster_rgb(histogram: &[ColorCount], params: &KmeansParams) -> Clustering {
    let points: Vec<Point> = histogram.iter().map(|c| rgb_point(c.color)).collect();
    let weights: Vec<f64> = histogram.iter().map(|c| c.count as f64).collect();
    cluster_points(&points, &weights, params)
}

/// Cluster distinct weighted `points`; weights are sample counts.
///
/// `params.k` must be in `1..=points.len()`.
pub fn cluster_points(points: &[Point], weights: &[f64], params: &KmeansParams) -> Clustering {
    let mut rng = StdRng::seed_from_u64(params.seed);

    let seeds = plus_plus_init(points, weights, params.k, &mut rng);
    let mut best = refine(points, weights, seeds, params);
    tracing::trace!(run = 0, inertia = best.inertia, "k-means run finished");

    for run in 1..params.restarts {
        let seeds = plus_plus_init(points, weights, params.k, &mut rng);
        let candidate = refine(points, weights, seeds, params);
        tracing::trace!(run, inertia = candidate.inertia, "k-means run finished");
        if candidate.inertia < best.inertia {
            best = candidate;
        }
    }
    best
}

/// Cluster `histogram` in CIE L*a*b* with `kmeans_colors`.
///
/// Each restart reseeds with `seed + run`; the lowest Lab inertia wins.
/// Convergence is checked afterwards by recomputing the cluster means once.
pub fn cluster_lab(histogram: &[ColorCount], params: &KmeansParams) -> Clustering {
    let labs: Vec<Lab> = histogram.iter().map(|c| to_lab(c.color)).collect();
    let weights: Vec<f64> = histogram.iter().map(|c| c.count as f64).collect();

    let mut buffer: Vec<Lab> = Vec::with_capacity(histogram.iter().map(|c| c.count).sum());
    let mut offsets = Vec::with_capacity(histogram.len());
    for (entry, lab) in histogram.iter().zip(&labs) {
        offsets.push(buffer.len());
        buffer.extend(std::iter::repeat(*lab).take(entry.count));
    }

    let lab_points: Vec<Point> = labs.iter().map(lab_point).collect();
    let mut best: Option<(f64, Vec<Point>, Vec<usize>)> = None;

    for run in 0..params.restarts.max(1) {
        let result = get_kmeans(
            params.k,
            params.max_iterations,
            params.convergence_threshold as f32,
            false,
            &buffer,
            params.seed.wrapping_add(run as u64),
        );
        // Identical samples always land in the same cluster, so the first
        // sample of each histogram entry speaks for all of them.
        let assignments: Vec<usize> = offsets
            .iter()
            .map(|&offset| result.indices[offset] as usize)
            .collect();
        let centroids: Vec<Point> = result.centroids.iter().map(lab_point).collect();
        let inertia = inertia(&lab_points, &weights, &assignments, &centroids);
        tracing::trace!(run, inertia, "lab k-means run finished");

        if best.as_ref().is_none_or(|(score, _, _)| inertia < *score) {
            best = Some((inertia, centroids, assignments));
        }
    }

    let (lab_inertia, lab_centroids, assignments) = best.unwrap_or_default();
    let settled = means(&lab_points, &weights, &assignments, &lab_centroids);
    let final_shift = max_shift(&lab_centroids, &settled);

    let centroids: Vec<Point> = lab_centroids
        .iter()
        .map(|&[l, a, b]| {
            let rgb = from_lab(Lab::new(l as f32, a as f32, b as f32));
            rgb_point([rgb.red, rgb.green, rgb.blue])
        })
        .collect();

    Clustering {
        weights: cluster_weights(histogram, &assignments, params.k),
        centroids,
        assignments,
        inertia: lab_inertia,
        iterations: None,
        converged: final_shift <= params.convergence_threshold,
        final_shift,
    }
}

/// Pick K in `2..=min(max_k, n - 1)` by the mean silhouette of the `n`
/// distinct colors.
///
/// Every distinct color counts once, as in an unweighted silhouette over the
/// image's palette; singleton clusters score zero. Fewer than three distinct
/// colors returns the distinct count.
pub fn suggest_k(histogram: &[ColorCount], max_k: usize, params: &KmeansParams) -> usize {
    let points: Vec<Point> = histogram.iter().map(|c| rgb_point(c.color)).collect();
    let weights: Vec<f64> = histogram.iter().map(|c| c.count as f64).collect();
    suggest_k_points(&points, &weights, max_k, params)
}

/// [`suggest_k`] over arbitrary distinct weighted points.
pub fn suggest_k_points(
    points: &[Point],
    weights: &[f64],
    max_k: usize,
    params: &KmeansParams,
) -> usize {
    if points.len() < 3 {
        return points.len();
    }

    let kept = most_frequent(weights, SILHOUETTE_LIMIT);
    let points: Vec<Point> = kept.iter().map(|&i| points[i]).collect();
    let weights: Vec<f64> = kept.iter().map(|&i| weights[i]).collect();
    let upper = max_k.min(points.len() - 1).max(2);

    let mut best_k = 2;
    let mut best_score = f64::NEG_INFINITY;
    for k in 2..=upper {
        let clustering = cluster_points(&points, &weights, &KmeansParams { k, ..*params });
        let score = silhouette(&points, &clustering.assignments, k);
        tracing::debug!(k, score, "silhouette computed");
        if score > best_score {
            best_score = score;
            best_k = k;
        }
    }
    best_k
}

/// Index of the centroid closest to `point`; ties go to the lower index.
pub fn nearest(point: Point, centroids: &[Point]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (index, &centroid) in centroids.iter().enumerate() {
        let distance = squared_distance(point, centroid);
        if distance < best_distance {
            best = index;
            best_distance = distance;
        }
    }
    best
}

pub fn squared_distance(a: Point, b: Point) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2) + (a[2] - b[2]).powi(2)
}

pub fn rgb_point([r, g, b]: [u8; 3]) -> Point {
    [r as f64, g as f64, b as f64]
}

/// Round a centroid back to 8-bit channels.
pub fn to_rgb8(point: Point) -> [u8; 3] {
    point.map(|c| c.round().clamp(0.0, 255.0) as u8)
}

fn to_lab([r, g, b]: [u8; 3]) -> Lab {
    let linear: LinSrgb<f32> = Srgb::new(r, g, b).into_linear();
    linear.into_color()
}

fn from_lab(lab: Lab) -> Srgb<u8> {
    let rgb: Srgb<f32> = Srgb::from_linear(lab.into_color());
    Srgb::new(
        rgb.red.clamp(0.0, 1.0),
        rgb.green.clamp(0.0, 1.0),
        rgb.blue.clamp(0.0, 1.0),
    )
    .into_format::<u8>()
}

fn lab_point(lab: &Lab) -> Point {
    [lab.l as f64, lab.a as f64, lab.b as f64]
}

/// Weighted k-means++: the first seed is drawn proportionally to weight, each
/// next one proportionally to weight times squared distance to the closest
/// seed so far.
fn plus_plus_init(points: &[Point], weights: &[f64], k: usize, rng: &mut StdRng) -> Vec<Point> {
    let first = pick_weighted(weights, rng);
    let mut seeds = Vec::with_capacity(k);
    seeds.push(points[first]);

    let mut closest: Vec<f64> = points
        .iter()
        .map(|&p| squared_distance(p, points[first]))
        .collect();

    while seeds.len() < k {
        let scores: Vec<f64> = weights.iter().zip(&closest).map(|(w, d)| w * d).collect();
        let next = points[pick_weighted(&scores, rng)];
        seeds.push(next);
        for (distance, &point) in closest.iter_mut().zip(points) {
            *distance = distance.min(squared_distance(point, next));
        }
    }
    seeds
}

/// Roulette-wheel pick; returns 0 when every weight is zero.
fn pick_weighted(weights: &[f64], rng: &mut impl Rng) -> usize {
    let total: f64 = weights.iter().sum();
    let mut target = rng.random::<f64>() * total;
    let mut last = 0;
    for (index, &weight) in weights.iter().enumerate() {
        if weight <= 0.0 {
            continue;
        }
        if target < weight {
            return index;
        }
        target -= weight;
        last = index;
    }
    last
}

fn refine(
    points: &[Point],
    weights: &[f64],
    seeds: Vec<Point>,
    params: &KmeansParams,
) -> Clustering {
    let k = seeds.len();
    let mut centroids = seeds;
    let mut assignments = vec![0; points.len()];
    let mut iterations = 0;
    let mut converged = false;
    let mut final_shift = f64::INFINITY;

    while iterations < params.max_iterations {
        iterations += 1;
        assign(points, &centroids, &mut assignments);
        let updated = means(points, weights, &assignments, &centroids);
        final_shift = max_shift(&centroids, &updated);
        centroids = updated;
        if final_shift <= params.convergence_threshold {
            converged = true;
            break;
        }
    }

    assign(points, &centroids, &mut assignments);
    if repair_empty(points, weights, &centroids, &mut assignments) {
        centroids = means(points, weights, &assignments, &centroids);
    }
    hartigan(points, weights, &mut centroids, &mut assignments, params.max_iterations);
    let centroids = means(points, weights, &assignments, &centroids);

    let counts: Vec<usize> = weights.iter().map(|&w| w as usize).collect();
    let mut cluster_sizes = vec![0; k];
    for (&cluster, &count) in assignments.iter().zip(&counts) {
        cluster_sizes[cluster] += count;
    }

    Clustering {
        inertia: inertia(points, weights, &assignments, &centroids),
        centroids,
        weights: cluster_sizes,
        assignments,
        iterations: Some(iterations),
        converged,
        final_shift,
    }
}

fn assign(points: &[Point], centroids: &[Point], assignments: &mut [usize]) {
    for (slot, &point) in assignments.iter_mut().zip(points) {
        *slot = nearest(point, centroids);
    }
}

/// Weighted cluster means; a cluster with no members keeps its old centroid.
fn means(
    points: &[Point],
    weights: &[f64],
    assignments: &[usize],
    previous: &[Point],
) -> Vec<Point> {
    let mut sums = vec![[0.0; 3]; previous.len()];
    let mut totals = vec![0.0; previous.len()];
    for ((point, &weight), &cluster) in points.iter().zip(weights).zip(assignments) {
        for channel in 0..3 {
            sums[cluster][channel] += weight * point[channel];
        }
        totals[cluster] += weight;
    }
    sums.iter()
        .zip(&totals)
        .zip(previous)
        .map(|((sum, &total), &old)| {
            if total > 0.0 {
                sum.map(|s| s / total)
            } else {
                old
            }
        })
        .collect()
}

fn max_shift(before: &[Point], after: &[Point]) -> f64 {
    before
        .iter()
        .zip(after)
        .map(|(&a, &b)| squared_distance(a, b).sqrt())
        .fold(0.0, f64::max)
}

/// Give every empty cluster the point that is worst served by its own
/// cluster, taken from clusters with at least two members. Returns whether
/// anything moved.
fn repair_empty(
    points: &[Point],
    weights: &[f64],
    centroids: &[Point],
    assignments: &mut [usize],
) -> bool {
    let mut members = vec![0usize; centroids.len()];
    for &cluster in assignments.iter() {
        members[cluster] += 1;
    }

    let mut moved = false;
    for empty in 0..centroids.len() {
        if members[empty] > 0 {
            continue;
        }
        let cost =
            |i: usize| weights[i] * squared_distance(points[i], centroids[assignments[i]]);
        let donor = (0..points.len())
            .filter(|&i| members[assignments[i]] > 1)
            .max_by(|&i, &j| cost(i).total_cmp(&cost(j)).then(j.cmp(&i)));
        let Some(donor) = donor else {
            break;
        };
        members[assignments[donor]] -= 1;
        assignments[donor] = empty;
        members[empty] = 1;
        moved = true;
    }
    moved
}

/// Hartigan single-point transfers: move a color to another cluster whenever
/// that strictly lowers the within-cluster squared error, updating both means
/// in place. Never empties a cluster.
fn hartigan(
    points: &[Point],
    weights: &[f64],
    centroids: &mut [Point],
    assignments: &mut [usize],
    max_passes: usize,
) {
    let mut sizes = vec![0.0; centroids.len()];
    for (&cluster, &weight) in assignments.iter().zip(weights) {
        sizes[cluster] += weight;
    }

    for _ in 0..max_passes {
        let mut moved = false;
        for (index, &point) in points.iter().enumerate() {
            let from = assignments[index];
            let weight = weights[index];
            let remaining = sizes[from] - weight;
            if remaining <= 0.0 {
                continue;
            }

            let gain = weight * sizes[from] / remaining * squared_distance(point, centroids[from]);
            let mut target = None;
            let mut best_cost = f64::INFINITY;
            for (to, &centroid) in centroids.iter().enumerate() {
                if to == from {
                    continue;
                }
                let cost =
                    weight * sizes[to] / (sizes[to] + weight) * squared_distance(point, centroid);
                if cost < best_cost {
                    best_cost = cost;
                    target = Some(to);
                }
            }

            let Some(to) = target else {
                continue;
            };
            if best_cost >= gain * (1.0 - TRANSFER_TOLERANCE) {
                continue;
            }

            for channel in 0..3 {
                centroids[from][channel] =
                    (centroids[from][channel] * sizes[from] - point[channel] * weight) / remaining;
                centroids[to][channel] = (centroids[to][channel] * sizes[to]
                    + point[channel] * weight)
                    / (sizes[to] + weight);
            }
            sizes[from] = remaining;
            sizes[to] += weight;
            assignments[index] = to;
            moved = true;
        }
        if !moved {
            break;
        }
    }
}

fn inertia(
    points: &[Point],
    weights: &[f64],
    assignments: &[usize],
    centroids: &[Point],
) -> f64 {
    points
        .iter()
        .zip(weights)
        .zip(assignments)
        .map(|((&point, &weight), &cluster)| {
            weight * squared_distance(point, centroids[cluster])
        })
        .sum()
}

fn cluster_weights(histogram: &[ColorCount], assignments: &[usize], k: usize) -> Vec<usize> {
    let mut weights = vec![0; k];
    for (entry, &cluster) in histogram.iter().zip(assignments) {
        weights[cluster] += entry.count;
    }
    weights
}

/// Indices of the `limit` heaviest points, in their original order.
fn most_frequent(weights: &[f64], limit: usize) -> Vec<usize> {
    let mut ranked: Vec<usize> = (0..weights.len()).collect();
    if weights.len() > limit {
        ranked.sort_by(|&a, &b| weights[b].total_cmp(&weights[a]).then(a.cmp(&b)));
        ranked.truncate(limit);
        ranked.sort_unstable();
    }
    ranked
}

fn silhouette(points: &[Point], assignments: &[usize], k: usize) -> f64 {
    let mut sizes = vec![0usize; k];
    for &cluster in assignments {
        sizes[cluster] += 1;
    }

    let mut total = 0.0;
    let mut sums = vec![0.0; k];
    for (i, &point) in points.iter().enumerate() {
        let own = assignments[i];
        if sizes[own] <= 1 {
            continue;
        }
        sums.iter_mut().for_each(|s| *s = 0.0);
        for (j, &other) in points.iter().enumerate() {
            if i != j {
                sums[assignments[j]] += squared_distance(point, other).sqrt();
            }
        }
        let a = sums[own] / (sizes[own] - 1) as f64;
        let b = (0..k)
            .filter(|&c| c != own && sizes[c] > 0)
            .map(|c| sums[c] / sizes[c] as f64)
            .fold(f64::INFINITY, f64::min);
        let scale = a.max(b);
        if b.is_finite() && scale > 0.0 {
            total += (b - a) / scale;
        }
    }
    total / points.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(k: usize) -> KmeansParams {
        KmeansParams {
            k,
            max_iterations: 100,
            convergence_threshold: 0.01,
            restarts: 4,
            seed: 42,
        }
    }

    fn counts(entries: &[([u8; 3], usize)]) -> Vec<ColorCount> {
        let mut histogram: Vec<ColorCount> = entries
            .iter()
            .map(|&(color, count)| ColorCount::opaque(color, count))
            .collect();
        histogram.sort_unstable_by_key(|c| c.color);
        histogram
    }

    #[test]
    fn hartigan_pulls_a_color_out_of_an_overloaded_cluster() {
        // {red x2, green} + {blue} is a Lloyd fixed point; the transfer pass
        // must still move green over to blue.
        let points = [[255.0, 0.0, 0.0], [0.0, 255.0, 0.0], [0.0, 0.0, 255.0]];
        let weights = [2.0, 1.0, 1.0];
        let mut assignments = [0, 0, 1];
        let mut centroids = means(&points, &weights, &assignments, &[[0.0; 3]; 2]);

        hartigan(&points, &weights, &mut centroids, &mut assignments, 10);

        assert_eq!(assignments, [0, 1, 1]);
        assert_eq!(centroids[0], [255.0, 0.0, 0.0]);
        assert_eq!(centroids[1], [0.0, 127.5, 127.5]);
    }

    #[test]
    fn every_cluster_is_populated_when_k_equals_distinct_count() {
        let histogram = counts(&[
            ([0, 0, 0], 5),
            ([10, 0, 0], 1),
            ([200, 200, 200], 3),
            ([255, 255, 0], 2),
        ]);
        let clustering = cluster_rgb(&histogram, &params(4));
        assert!(clustering.weights.iter().all(|&w| w > 0));
        assert_eq!(clustering.weights.iter().sum::<usize>(), 11);
        assert_eq!(clustering.inertia, 0.0);
    }

    #[test]
    fn separated_groups_are_recovered() {
        let histogram = counts(&[
            ([250, 5, 5], 10),
            ([255, 0, 0], 10),
            ([5, 250, 5], 10),
            ([0, 255, 0], 10),
        ]);
        let clustering = cluster_rgb(&histogram, &params(2));
        let red = clustering.assignments[2];
        let green = clustering.assignments[0];
        assert_ne!(red, green);
        // histogram order: [0,255,0], [5,250,5], [250,5,5], [255,0,0]
        assert_eq!(clustering.assignments, vec![green, green, red, red]);
        assert!(clustering.converged);
    }

    #[test]
    fn same_seed_same_result() {
        let histogram = counts(&[
            ([12, 40, 200], 3),
            ([30, 30, 30], 7),
            ([90, 10, 10], 2),
            ([200, 180, 20], 4),
            ([220, 220, 220], 1),
        ]);
        assert_eq!(cluster_rgb(&histogram, &params(3)), cluster_rgb(&histogram, &params(3)));
    }

    #[test]
    fn iteration_cap_is_reported() {
        let histogram = counts(&[
            ([0, 0, 0], 1),
            ([60, 0, 0], 1),
            ([90, 0, 0], 1),
            ([250, 0, 0], 1),
        ]);
        let capped = KmeansParams {
            max_iterations: 1,
            convergence_threshold: 0.0,
            ..params(1)
        };
        // The seed is a sample and the mean (100, 0, 0) is not, so the only
        // iteration always moves the centroid.
        let clustering = cluster_rgb(&histogram, &capped);
        assert_eq!(clustering.iterations, Some(1));
        assert!(!clustering.converged);
        assert!(clustering.final_shift > 0.0);
        assert_eq!(to_rgb8(clustering.centroids[0]), [100, 0, 0]);
    }

    #[test]
    fn lab_backend_returns_k_clusters() {
        let histogram = counts(&[
            ([255, 0, 0], 6),
            ([250, 10, 10], 4),
            ([0, 0, 255], 5),
            ([10, 10, 250], 5),
        ]);
        let clustering = cluster_lab(&histogram, &params(2));
        assert_eq!(clustering.centroids.len(), 2);
        assert_eq!(clustering.weights.iter().sum::<usize>(), 20);
        assert!(clustering.iterations.is_none());
    }

    #[test]
    fn suggest_k_finds_three_groups() {
        let histogram = counts(&[
            ([255, 0, 0], 20),
            ([245, 10, 0], 20),
            ([0, 255, 0], 20),
            ([10, 245, 0], 20),
            ([0, 0, 255], 20),
            ([0, 10, 245], 20),
        ]);
        assert_eq!(suggest_k(&histogram, 5, &params(2)), 3);
    }

    #[test]
    fn suggest_k_with_few_colors_returns_the_distinct_count() {
        let histogram = counts(&[([1, 2, 3], 4), ([9, 9, 9], 1)]);
        assert_eq!(suggest_k(&histogram, 8, &params(2)), 2);
    }

    #[test]
    fn one_dimensional_points_split_at_the_largest_gap() {
        let points = [[10.0, 0.0, 0.0], [12.0, 0.0, 0.0], [200.0, 0.0, 0.0], [205.0, 0.0, 0.0]];
        let weights = [1.0, 1.0, 1.0, 1.0];
        let clustering = cluster_points(&points, &weights, &params(2));
        assert_eq!(clustering.assignments[0], clustering.assignments[1]);
        assert_eq!(clustering.assignments[2], clustering.assignments[3]);
        assert_ne!(clustering.assignments[0], clustering.assignments[2]);
    }

    #[test]
    fn heaviest_points_keep_their_order() {
        assert_eq!(most_frequent(&[1.0, 5.0, 3.0, 5.0], 3), vec![1, 2, 3]);
        assert_eq!(most_frequent(&[1.0, 2.0], 3), vec![0, 1]);
    }

    #[test]
    fn to_rgb8_rounds_and_clamps() {
        assert_eq!(to_rgb8([127.5, -3.0, 300.0]), [128, 0, 255]);
    }

    #[test]
    fn nearest_prefers_lower_index_on_ties() {
        let centroids = [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0]];
        assert_eq!(nearest([1.0, 0.0, 0.0], &centroids), 0);
    }
}
