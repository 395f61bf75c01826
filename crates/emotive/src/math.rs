//! Scalar kernels shared by the head, the losses and the metrics.

#[inline]
pub fn tanh_inplace(x: &mut [f32]) {
    for v in x {
        *v = v.tanh();
    }
}

pub fn softmax_inplace(x: &mut [f32]) {
    if x.is_empty() {
        return;
    }
    let max_v = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    let mut sum = 0.0f32;
    for v in x.iter_mut() {
        *v = (*v - max_v).exp();
        sum += *v;
    }
    if sum > 0.0 {
        for v in x {
            *v /= sum;
        }
    }
}

/// `log(sum(exp(x)))`, shifted by the max for stability.
pub fn log_sum_exp(x: &[f32]) -> f32 {
    let max_v = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max_v.is_finite() {
        return max_v;
    }
    let sum: f32 = x.iter().map(|&v| (v - max_v).exp()).sum();
    max_v + sum.ln()
}

/// `log(1 + exp(x))` without overflow.
#[inline]
pub fn softplus(x: f32) -> f32 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// Index of the largest element; first wins on ties.
pub fn argmax(x: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in x.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
