//! Criterion benchmarks for the layer-norm backward providers

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use half::f16;
use lngrad_common::{DeviceProperties, GradKernelConfig};
use lngrad_kernels::{GradArgs, KernelManager, LayerNormGradArgs};

struct BenchmarkData {
    dy: Vec<f32>,
    y: Vec<f32>,
    scale: Vec<f32>,
    bias: Vec<f32>,
    inv_std: Vec<f32>,
}

impl BenchmarkData {
    fn new(n1: usize, n2: usize) -> Self {
        Self {
            dy: (0..n1 * n2).map(|i| ((i % 13) as f32 - 6.0) * 0.05).collect(),
            y: (0..n1 * n2).map(|i| ((i % 17) as f32 - 8.0) * 0.1).collect(),
            scale: (0..n2).map(|j| 0.5 + (j % 7) as f32 * 0.1).collect(),
            bias: (0..n2).map(|j| (j % 5) as f32 * 0.01).collect(),
            inv_std: vec![1.25; n1],
        }
    }
}

const SHAPES: [(usize, usize); 4] = [(64, 256), (256, 768), (1024, 1024), (4096, 4096)];

fn bench_f32(c: &mut Criterion) {
    let manager = KernelManager::from_config(&GradKernelConfig::default());
    let provider = manager.select_best().expect("Should have a provider");
    let device = DeviceProperties::host();
    let part_size = GradKernelConfig::default().part_size;

    let mut group = c.benchmark_group("layer_norm_grad_f32");
    for (n1, n2) in SHAPES {
        let data = BenchmarkData::new(n1, n2);
        let mut dx = vec![0.0_f32; n1 * n2];
        let mut dscale = vec![0.0_f32; n2];
        let mut dbias = vec![0.0_f32; n2];
        let mut pg = vec![0.0_f32; part_size * n2];
        let mut pb = vec![0.0_f32; part_size * n2];

        group.throughput(Throughput::Elements((n1 * n2) as u64));
        group.bench_with_input(
            BenchmarkId::new(provider.name(), format!("{n1}x{n2}")),
            &(n1, n2),
            |b, &(n1, n2)| {
                b.iter(|| {
                    provider
                        .layer_norm_grad(
                            &device,
                            GradArgs::F32F32(LayerNormGradArgs {
                                y_grad: black_box(&data.dy),
                                y: black_box(&data.y),
                                scale: &data.scale,
                                bias: &data.bias,
                                inv_std_var: &data.inv_std,
                                n1,
                                n2,
                                x_grad: &mut dx,
                                scale_grad: &mut dscale,
                                bias_grad: &mut dbias,
                                part_grad_gamma: &mut pg,
                                part_grad_beta: &mut pb,
                                part_size,
                            }),
                        )
                        .unwrap();
                });
            },
        );
    }
    group.finish();
}

fn bench_f16(c: &mut Criterion) {
    let manager = KernelManager::from_config(&GradKernelConfig::default());
    let provider = manager.select_best().expect("Should have a provider");
    let device = DeviceProperties::host();
    let part_size = GradKernelConfig::default().part_size;

    let mut group = c.benchmark_group("layer_norm_grad_f16");
    for (n1, n2) in SHAPES.into_iter().take(3) {
        let data = BenchmarkData::new(n1, n2);
        let half = |v: &[f32]| v.iter().map(|&x| f16::from_f32(x)).collect::<Vec<_>>();
        let (dy, y, scale, bias) = (half(&data.dy), half(&data.y), half(&data.scale), half(&data.bias));
        let mut dx = vec![f16::ZERO; n1 * n2];
        let mut dscale = vec![f16::ZERO; n2];
        let mut dbias = vec![f16::ZERO; n2];
        let mut pg = vec![0.0_f32; part_size * n2];
        let mut pb = vec![0.0_f32; part_size * n2];

        group.throughput(Throughput::Elements((n1 * n2) as u64));
        group.bench_with_input(
            BenchmarkId::new(provider.name(), format!("{n1}x{n2}")),
            &(n1, n2),
            |b, &(n1, n2)| {
                b.iter(|| {
                    provider
                        .layer_norm_grad(
                            &device,
                            GradArgs::F16F32(LayerNormGradArgs {
                                y_grad: black_box(&dy),
                                y: black_box(&y),
                                scale: &scale,
                                bias: &bias,
                                inv_std_var: &data.inv_std,
                                n1,
                                n2,
                                x_grad: &mut dx,
                                scale_grad: &mut dscale,
                                bias_grad: &mut dbias,
                                part_grad_gamma: &mut pg,
                                part_grad_beta: &mut pb,
                                part_size,
                            }),
                        )
                        .unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark provider selection overhead
fn bench_provider_selection(c: &mut Criterion) {
    c.bench_function("provider_selection", |b| {
        b.iter(|| {
            let manager = KernelManager::with_providers(vec![Box::new(lngrad_kernels::CpuLayerNormGrad)]);
            black_box(manager.select_best().unwrap().name());
        });
    });
}

criterion_group!(benches, bench_f32, bench_f16, bench_provider_selection);
criterion_main!(benches);
