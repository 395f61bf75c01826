//! Dense layer kernels used by the classification head.

/// Linear layer: `y = x * W^T + b`.
///
/// Shapes:
/// - `input`: `[n_rows, in_dim]`
/// - `weight`: `[out_dim, in_dim]`
/// - output: `[n_rows, out_dim]`
pub fn linear(
    input: &[f32],
    n_rows: usize,
    in_dim: usize,
    weight: &[f32],
    out_dim: usize,
    bias: Option<&[f32]>,
) -> Vec<f32> {
    debug_assert_eq!(input.len(), n_rows * in_dim);
    debug_assert_eq!(weight.len(), out_dim * in_dim);
    if let Some(b) = bias {
        debug_assert_eq!(b.len(), out_dim);
    }

    let mut out = vec![0.0f32; n_rows * out_dim];
    if in_dim == 0 || out_dim == 0 {
        return out;
    }
    for (x, y) in input.chunks_exact(in_dim).zip(out.chunks_exact_mut(out_dim)) {
        for (o, w) in weight.chunks_exact(in_dim).enumerate() {
            let mut sum = bias.map_or(0.0, |b| b[o]);
            for (xi, wi) in x.iter().zip(w) {
                sum += xi * wi;
            }
            y[o] = sum;
        }
    }
    out
}

/// Inverted dropout: zero each element with probability `p`, scale survivors by `1/(1-p)`.
///
/// `uniform` is called once per element and returns a uniform draw in `[0, 1)`.
pub fn dropout_inplace(x: &mut [f32], p: f32, mut uniform: impl FnMut() -> f32) {
    if p <= 0.0 {
        return;
    }
    if p >= 1.0 {
        x.fill(0.0);
        return;
    }
    let scale = 1.0 / (1.0 - p);
    for v in x {
        if uniform() < p {
            *v = 0.0;
        } else {
            *v *= scale;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{dropout_inplace, linear};

    #[test]
    fn linear_smoke() {
        // x: [2,3], W: [2,3]
        let x = [1.0f32, 2.0, 3.0, -1.0, 0.0, 1.0];
        let w = [1.0f32, 0.0, -1.0, 2.0, 1.0, 0.0];
        let b = [0.5f32, -1.0];
        let y = linear(&x, 2, 3, &w, 2, Some(&b));
        // row0: [1-3+0.5, 2+2-1] = [-1.5, 3.0]
        // row1: [-1-1+0.5, -2+0-1] = [-1.5, -3.0]
        assert!((y[0] + 1.5).abs() < 1e-6);
        assert!((y[1] - 3.0).abs() < 1e-6);
        assert!((y[2] + 1.5).abs() < 1e-6);
        assert!((y[3] + 3.0).abs() < 1e-6);
    }

    #[test]
    fn dropout_scales_survivors() {
        let mut draws = [0.1f32, 0.9, 0.3, 0.7].into_iter();
        let mut x = [1.0f32, 1.0, 1.0, 1.0];
        dropout_inplace(&mut x, 0.5, || draws.next().unwrap_or(1.0));
        assert_eq!(x, [0.0, 2.0, 0.0, 2.0]);

        let mut y = [3.0f32; 3];
        dropout_inplace(&mut y, 0.0, || 0.0);
        assert_eq!(y, [3.0; 3]);
    }
}
