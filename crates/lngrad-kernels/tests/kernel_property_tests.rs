//! Property tests for the CPU layer-norm backward provider.
//!
//! 1. Gradients agree with central finite differences of the forward pass.
//! 2. Stage-one partial buffers sum to the final scale/bias gradients.
//! 3. `part_size` changes only the summation order.
//! 4. Input-gradient rows sum to zero.
//! 5. Scratch contents on entry do not affect the result.
//! 6. The `(f16, f32)` pair tracks the `(f32, f32)` pair.

use half::f16;
use lngrad_common::{DeviceProperties, GradElement, StatElement};
use lngrad_kernels::{
    CpuLayerNormGrad, GradArgs, KernelElement, LayerNormGradArgs, LayerNormGradProvider,
    layer_norm_forward_cpu,
};
use proptest::prelude::*;

const EPS: f64 = 1e-5;

struct Outputs<T, U> {
    dx: Vec<T>,
    dscale: Vec<T>,
    dbias: Vec<T>,
    part_gamma: Vec<U>,
    part_beta: Vec<U>,
}

#[allow(clippy::too_many_arguments)]
fn backward<T: KernelElement<U>, U: StatElement>(
    dy: &[T],
    y: &[T],
    scale: &[T],
    bias: &[T],
    inv_std: &[U],
    n2: usize,
    part_size: usize,
    scratch_fill: U,
) -> Outputs<T, U> {
    let n1 = inv_std.len();
    let mut out = Outputs {
        dx: vec![T::default(); n1 * n2],
        dscale: vec![T::default(); n2],
        dbias: vec![T::default(); n2],
        part_gamma: vec![scratch_fill; part_size * n2],
        part_beta: vec![scratch_fill; part_size * n2],
    };
    let args = LayerNormGradArgs {
        y_grad: dy,
        y,
        scale,
        bias,
        inv_std_var: inv_std,
        n1,
        n2,
        x_grad: &mut out.dx,
        scale_grad: &mut out.dscale,
        bias_grad: &mut out.dbias,
        part_grad_gamma: &mut out.part_gamma,
        part_grad_beta: &mut out.part_beta,
        part_size,
    };
    CpuLayerNormGrad.layer_norm_grad(&DeviceProperties::host(), T::erase(args)).unwrap();
    out
}

/// Inputs with a guaranteed spread per row so the variance stays well away from zero.
fn problem() -> impl Strategy<Value = (usize, usize, Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>)> {
    (1usize..6, 2usize..9).prop_flat_map(|(n1, n2)| {
        (
            Just(n1),
            Just(n2),
            prop::collection::vec(-1.0f64..1.0, n1 * n2),
            prop::collection::vec(0.5f64..1.5, n2),
            prop::collection::vec(-0.5f64..0.5, n2),
            prop::collection::vec(-1.0f64..1.0, n1 * n2),
        )
    })
}

fn spread(x: &[f64], n2: usize) -> Vec<f64> {
    x.iter().enumerate().map(|(i, v)| v * 0.1 + (i % n2) as f64 * 0.5).collect()
}

fn loss(x: &[f64], gamma: &[f64], beta: &[f64], dy: &[f64], n2: usize) -> f64 {
    let fwd = layer_norm_forward_cpu::<f64, f64>(x, gamma, beta, n2, EPS).unwrap();
    fwd.y.iter().zip(dy).map(|(y, d)| y * d).sum()
}

proptest! {
    #[test]
    fn prop_backward_matches_finite_differences((n1, n2, x, gamma, beta, dy) in problem()) {
        let x = spread(&x, n2);
        let fwd = layer_norm_forward_cpu::<f64, f64>(&x, &gamma, &beta, n2, EPS).unwrap();
        let out = backward(&dy, &fwd.y, &gamma, &beta, &fwd.inv_std_var, n2, 16, 0.0);
        let h = 1e-6;

        for i in 0..n1 * n2 {
            let mut plus = x.clone();
            let mut minus = x.clone();
            plus[i] += h;
            minus[i] -= h;
            let numeric = (loss(&plus, &gamma, &beta, &dy, n2) - loss(&minus, &gamma, &beta, &dy, n2)) / (2.0 * h);
            prop_assert!(
                (out.dx[i] - numeric).abs() < 1e-4 * (1.0 + numeric.abs()),
                "dx[{}] = {} vs finite difference {}", i, out.dx[i], numeric
            );
        }

        for j in 0..n2 {
            let mut plus = gamma.clone();
            let mut minus = gamma.clone();
            plus[j] += h;
            minus[j] -= h;
            let numeric = (loss(&x, &plus, &beta, &dy, n2) - loss(&x, &minus, &beta, &dy, n2)) / (2.0 * h);
            prop_assert!(
                (out.dscale[j] - numeric).abs() < 1e-4 * (1.0 + numeric.abs()),
                "dscale[{}] = {} vs finite difference {}", j, out.dscale[j], numeric
            );
            let dbias: f64 = (0..n1).map(|r| dy[r * n2 + j]).sum();
            prop_assert!((out.dbias[j] - dbias).abs() < 1e-12);
        }
    }

    #[test]
    fn prop_partial_buffers_sum_to_final(
        (n1, n2, x, gamma, beta, dy) in problem(),
        part_size in 1usize..20,
    ) {
        let x: Vec<f32> = spread(&x, n2).iter().map(|&v| v as f32).collect();
        let gamma: Vec<f32> = gamma.iter().map(|&v| v as f32).collect();
        let beta: Vec<f32> = beta.iter().map(|&v| v as f32).collect();
        let dy: Vec<f32> = dy.iter().map(|&v| v as f32).collect();
        let fwd = layer_norm_forward_cpu::<f32, f32>(&x, &gamma, &beta, n2, EPS).unwrap();
        let out = backward(&dy, &fwd.y, &gamma, &beta, &fwd.inv_std_var, n2, part_size, 0.0_f32);

        prop_assert_eq!(out.dx.len(), n1 * n2);
        for j in 0..n2 {
            let mut g = 0.0_f32;
            let mut b = 0.0_f32;
            for p in 0..part_size {
                g += out.part_gamma[p * n2 + j];
                b += out.part_beta[p * n2 + j];
            }
            prop_assert_eq!(g, out.dscale[j]);
            prop_assert_eq!(b, out.dbias[j]);
        }
    }

    #[test]
    fn prop_part_size_does_not_change_result(
        (_n1, n2, x, gamma, beta, dy) in problem(),
        part_size in 1usize..40,
    ) {
        let x = spread(&x, n2);
        let fwd = layer_norm_forward_cpu::<f64, f64>(&x, &gamma, &beta, n2, EPS).unwrap();
        let reference = backward(&dy, &fwd.y, &gamma, &beta, &fwd.inv_std_var, n2, 1, 0.0);
        let split = backward(&dy, &fwd.y, &gamma, &beta, &fwd.inv_std_var, n2, part_size, 0.0);

        prop_assert_eq!(&reference.dx, &split.dx);
        for j in 0..n2 {
            prop_assert!((reference.dscale[j] - split.dscale[j]).abs() < 1e-9);
            prop_assert!((reference.dbias[j] - split.dbias[j]).abs() < 1e-9);
        }
    }

    #[test]
    fn prop_input_grad_rows_sum_to_zero((n1, n2, x, gamma, beta, dy) in problem()) {
        let x = spread(&x, n2);
        let fwd = layer_norm_forward_cpu::<f64, f64>(&x, &gamma, &beta, n2, EPS).unwrap();
        let out = backward(&dy, &fwd.y, &gamma, &beta, &fwd.inv_std_var, n2, 16, 0.0);
        for r in 0..n1 {
            let row_sum: f64 = out.dx[r * n2..(r + 1) * n2].iter().sum();
            prop_assert!(row_sum.abs() < 1e-8, "row {} sums to {}", r, row_sum);
        }
    }

    #[test]
    fn prop_scratch_contents_are_ignored((_n1, n2, x, gamma, beta, dy) in problem()) {
        let x = spread(&x, n2);
        let fwd = layer_norm_forward_cpu::<f64, f64>(&x, &gamma, &beta, n2, EPS).unwrap();
        let clean = backward(&dy, &fwd.y, &gamma, &beta, &fwd.inv_std_var, n2, 16, 0.0);
        let dirty = backward(&dy, &fwd.y, &gamma, &beta, &fwd.inv_std_var, n2, 16, f64::NAN);
        prop_assert_eq!(clean.dx, dirty.dx);
        prop_assert_eq!(clean.dscale, dirty.dscale);
        prop_assert_eq!(clean.dbias, dirty.dbias);
    }
}

#[test]
fn half_pair_tracks_single_precision() {
    let (n1, n2) = (8usize, 16usize);
    let x: Vec<f32> = (0..n1 * n2).map(|i| ((i * 37 % 17) as f32 - 8.0) * 0.125).collect();
    let gamma: Vec<f32> = (0..n2).map(|j| 0.75 + j as f32 * 0.03125).collect();
    let beta: Vec<f32> = (0..n2).map(|j| j as f32 * 0.0625 - 0.5).collect();
    let dy: Vec<f32> = (0..n1 * n2).map(|i| ((i * 11 % 7) as f32 - 3.0) * 0.25).collect();

    let to_half = |v: &[f32]| v.iter().map(|&a| f16::from_f32(a)).collect::<Vec<_>>();
    let (xh, gh, bh, dyh) = (to_half(&x), to_half(&gamma), to_half(&beta), to_half(&dy));
    let fwd_h = layer_norm_forward_cpu::<f16, f32>(&xh, &gh, &bh, n2, EPS).unwrap();
    let half = backward(&dyh, &fwd_h.y, &gh, &bh, &fwd_h.inv_std_var, n2, 16, 0.0);

    let widen = |v: &[f16]| v.iter().map(|&a| GradElement::<f32>::widen(a)).collect::<Vec<f32>>();
    let fwd_s = layer_norm_forward_cpu::<f32, f32>(&widen(&xh), &widen(&gh), &widen(&bh), n2, EPS).unwrap();
    let single = backward(&widen(&dyh), &fwd_s.y, &widen(&gh), &widen(&bh), &fwd_s.inv_std_var, n2, 16, 0.0);

    for (h, s) in half.dx.iter().zip(&single.dx) {
        assert!((h.to_f32() - s).abs() < 0.05 * (1.0 + s.abs()), "{h} vs {s}");
    }
    for (h, s) in half.dscale.iter().zip(&single.dscale) {
        assert!((h.to_f32() - s).abs() < 0.05 * (1.0 + s.abs()), "{h} vs {s}");
    }
    for (h, s) in half.dbias.iter().zip(&single.dbias) {
        assert!((h.to_f32() - s).abs() < 0.05 * (1.0 + s.abs()), "{h} vs {s}");
    }
}

#[test]
fn erased_dispatch_reports_pair() {
    let dy = [0.0_f64; 4];
    let mut buf = ([0.0_f64; 4], [0.0_f64; 2], [0.0_f64; 2], [0.0_f64; 2], [0.0_f64; 2]);
    let args = LayerNormGradArgs {
        y_grad: &dy,
        y: &dy,
        scale: &[1.0, 1.0],
        bias: &[0.0, 0.0],
        inv_std_var: &[1.0, 1.0],
        n1: 2,
        n2: 2,
        x_grad: &mut buf.0,
        scale_grad: &mut buf.1,
        bias_grad: &mut buf.2,
        part_grad_gamma: &mut buf.3,
        part_grad_beta: &mut buf.4,
        part_size: 1,
    };
    let erased = f64::erase(args);
    assert!(matches!(erased, GradArgs::F64F64(_)));
    CpuLayerNormGrad.layer_norm_grad(&DeviceProperties::host(), erased).unwrap();
    assert_eq!(buf.2, [0.0, 0.0]);
}
