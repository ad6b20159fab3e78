//! 2D projection of embedding samples for visualization.
//!
//! Principal component analysis by power iteration: the vectors are
//! mean-centered, the top two eigenvectors of the covariance matrix are
//! found one at a time (with deflation), and each vector is projected onto
//! them. The start vector is fixed, so the same sample always yields the
//! same coordinates.

use serde::Serialize;

const ITERATIONS: usize = 100;

/// One projected sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedPoint {
    pub chunk_id: String,
    pub label: String,
    pub x: f64,
    pub y: f64,
}

/// Project `(chunk_id, label, vector)` samples to 2D.
///
/// Vectors whose dimension differs from the first sample's are skipped.
pub fn project_2d(samples: &[(String, String, Vec<f32>)]) -> Vec<ProjectedPoint> {
    let Some(dims) = samples.first().map(|(_, _, v)| v.len()) else {
        return Vec::new();
    };
    let rows: Vec<(&String, &String, Vec<f64>)> = samples
        .iter()
        .filter(|(_, _, v)| v.len() == dims)
        .map(|(id, label, v)| (id, label, v.iter().map(|x| *x as f64).collect()))
        .collect();
    if dims == 0 || rows.is_empty() {
        return Vec::new();
    }

    let n = rows.len() as f64;
    let mut mean = vec![0.0; dims];
    for (_, _, v) in &rows {
        for (m, x) in mean.iter_mut().zip(v) {
            *m += x / n;
        }
    }
    let centered: Vec<Vec<f64>> = rows
        .iter()
        .map(|(_, _, v)| v.iter().zip(&mean).map(|(x, m)| x - m).collect())
        .collect();

    let first = principal_component(&centered, None);
    let second = principal_component(&centered, Some(&first));

    rows.iter()
        .zip(&centered)
        .map(|((id, label, _), c)| ProjectedPoint {
            chunk_id: (*id).clone(),
            label: (*label).clone(),
            x: dot(c, &first),
            y: dot(c, &second),
        })
        .collect()
}

/// Dominant direction of `data`, orthogonal to `exclude` when given.
fn principal_component(data: &[Vec<f64>], exclude: Option<&[f64]>) -> Vec<f64> {
    let dims = data[0].len();
    let mut v: Vec<f64> = (0..dims).map(|i| 1.0 / (i as f64 + 1.0)).collect();
    if let Some(e) = exclude {
        remove_component(&mut v, e);
    }
    if !normalize(&mut v) {
        return vec![0.0; dims];
    }

    for _ in 0..ITERATIONS {
        // w = Xᵀ X v, without materializing the covariance matrix.
        let mut w = vec![0.0; dims];
        for row in data {
            let p = dot(row, &v);
            for (wi, ri) in w.iter_mut().zip(row) {
                *wi += p * ri;
            }
        }
        if let Some(e) = exclude {
            remove_component(&mut w, e);
        }
        if !normalize(&mut w) {
            return vec![0.0; dims];
        }
        v = w;
    }
    v
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn remove_component(v: &mut [f64], direction: &[f64]) {
    let p = dot(v, direction);
    for (vi, di) in v.iter_mut().zip(direction) {
        *vi -= p * di;
    }
}

fn normalize(v: &mut [f64]) -> bool {
    let norm = dot(v, v).sqrt();
    if norm < 1e-12 {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, v: Vec<f32>) -> (String, String, Vec<f32>) {
        (id.to_string(), format!("label-{}", id), v)
    }

    #[test]
    fn test_empty_sample() {
        assert!(project_2d(&[]).is_empty());
    }

    #[test]
    fn test_projection_separates_clusters() {
        let samples = vec![
            sample("a", vec![1.0, 0.0, 0.0]),
            sample("b", vec![0.9, 0.1, 0.0]),
            sample("c", vec![-1.0, 0.0, 0.1]),
            sample("d", vec![-0.9, 0.0, 0.0]),
        ];
        let points = project_2d(&samples);
        assert_eq!(points.len(), 4);
        // a/b and c/d land on opposite sides of the first component.
        assert!(points[0].x * points[2].x < 0.0);
        assert!(points[0].x * points[1].x > 0.0);
        assert_eq!(points[0].label, "label-a");
    }

    #[test]
    fn test_projection_is_deterministic() {
        let samples = vec![
            sample("a", vec![0.3, 0.1, 0.5]),
            sample("b", vec![0.2, 0.7, 0.1]),
            sample("c", vec![0.9, 0.4, 0.2]),
        ];
        assert_eq!(project_2d(&samples), project_2d(&samples));
    }

    #[test]
    fn test_mismatched_dimensions_skipped() {
        let samples = vec![sample("a", vec![1.0, 2.0]), sample("b", vec![1.0])];
        assert_eq!(project_2d(&samples).len(), 1);
    }
}
