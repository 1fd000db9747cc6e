//! Benchmarks for the particle swarm optimizer.
//!
//! Measures the swarm on cheap analytic test functions, where the
//! bookkeeping dominates, and on an image likelihood, where the parallel
//! evaluation does.

use std::f64::consts::PI;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lensfit_rs::data::{Exposure, ImageData};
use lensfit_rs::fitting::{NelderMead, ParticleSwarm};
use lensfit_rs::grid::PixelGrid;
use lensfit_rs::image_model::{ImageModel, ModelComponents, NumericsConfig};
use lensfit_rs::likelihood::{LikelihoodConfig, LikelihoodModule};
use lensfit_rs::lens_model::LensModel;
use lensfit_rs::light_model::LightModel;
use lensfit_rs::parameters::{Bounds, Kwargs, ModelKwargs, Param};
use lensfit_rs::problem::FnProblem;
use lensfit_rs::profiles::{Gaussian, Sis};
use lensfit_rs::psf::Psf;
use ndarray::Array1;

/// Rastrigin function as a log-likelihood: maximum 0 at the origin.
fn rastrigin(x: &Array1<f64>) -> f64 {
    -(10.0 * x.len() as f64
        + x.iter()
            .map(|v| v * v - 10.0 * (2.0 * PI * v).cos())
            .sum::<f64>())
}

fn bench_rastrigin(c: &mut Criterion) {
    let mut group = c.benchmark_group("Rastrigin");
    group.sample_size(20);

    for dim in [2, 5, 10] {
        let problem = FnProblem::new(dim, rastrigin).with_bounds(vec![Bounds::new(-5.12, 5.12).expect("valid bounds"); dim]);
        let init = Array1::from_elem(dim, 2.0);
        let sigma = Array1::from_elem(dim, 2.0);
        let pso = ParticleSwarm::new().with_particles(40).with_max_iterations(50);

        group.bench_with_input(BenchmarkId::from_parameter(dim), &dim, |b, _| {
            b.iter(|| pso.optimize(&problem, black_box(&init), black_box(&sigma)))
        });
    }

    group.finish();
}

fn bench_swarm_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("Swarm size");
    group.sample_size(20);
    let problem = FnProblem::new(4, |x: &Array1<f64>| -x.mapv(|v| v * v).sum());
    let init = Array1::from_elem(4, 1.0);
    let sigma = Array1::from_elem(4, 1.0);

    for n in [10, 50, 200] {
        let pso = ParticleSwarm::new().with_particles(n).with_max_iterations(30);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| pso.optimize(&problem, black_box(&init), black_box(&sigma)))
        });
    }

    group.finish();
}

fn lens_likelihood() -> (LikelihoodModule, Array1<f64>, Array1<f64>) {
    let grid = PixelGrid::centered(40, 0.05).expect("valid grid");
    let components = ModelComponents {
        lens_model: LensModel::new(vec![Arc::new(Sis)]),
        source_light: LightModel::new(vec![Arc::new(Gaussian)]),
        ..ModelComponents::default()
    };
    let psf = Psf::gaussian(0.1, 0.05, 3.0).expect("valid PSF");
    let model = ImageModel::new(grid, psf, NumericsConfig::default(), components).expect("valid image model");

    let truth = ModelKwargs {
        lens: vec![Kwargs::from([("theta_E", 0.6), ("center_x", 0.0), ("center_y", 0.0)])],
        source_light: vec![Kwargs::from([("amp", 10.0), ("sigma", 0.06), ("center_x", 0.05), ("center_y", 0.0)])],
        ..ModelKwargs::default()
    };
    let image = model.image(&truth).expect("rendered image");
    let data = ImageData::new(model.grid().clone(), image, 0.01, Exposure::Uniform(1000.0)).expect("valid data");
    let param = Param::free(model.schema(Vec::new()), true).expect("valid layout");
    let (x, _) = param.to_vector(&truth).expect("complete kwargs");

    let likelihood = LikelihoodModule::new(model, param, LikelihoodConfig::default())
        .expect("valid likelihood")
        .with_data(data)
        .expect("matching data");
    let sigma = Array1::from_elem(x.len(), 0.05);
    (likelihood, x + 0.05, sigma)
}

fn bench_lens_likelihood(c: &mut Criterion) {
    let mut group = c.benchmark_group("Lens likelihood");
    group.sample_size(10);
    let (likelihood, init, sigma) = lens_likelihood();

    group.bench_function("single_evaluation", |b| {
        b.iter(|| likelihood.log_likelihood(black_box(&init)))
    });

    group.bench_function("pso", |b| {
        let pso = ParticleSwarm::new().with_particles(20).with_max_iterations(5);
        b.iter(|| pso.optimize(&likelihood, black_box(&init), black_box(&sigma)))
    });

    group.bench_function("simplex", |b| {
        let simplex = NelderMead::new().with_max_iterations(50);
        b.iter(|| simplex.optimize(&likelihood, black_box(&init), black_box(&sigma)))
    });

    group.finish();
}

criterion_group!(benches, bench_rastrigin, bench_swarm_size, bench_lens_likelihood);
criterion_main!(benches);
