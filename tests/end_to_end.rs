//! Simulate a lens, then recover it from the noisy image.

use std::sync::Arc;

use approx::assert_relative_eq;
use lensfit_rs::config::FitConfig;
use lensfit_rs::fitting::{FitStep, FittingSequence, ParticleSwarm};
use lensfit_rs::grid::PixelGrid;
use lensfit_rs::image_model::{ImageModel, ModelComponents, NumericsConfig};
use lensfit_rs::lens_equation::LensEquationSolver;
use lensfit_rs::lens_model::LensModel;
use lensfit_rs::linear_solver::LinearSolver;
use lensfit_rs::parameters::{Kwargs, ModelKwargs};
use lensfit_rs::point_source::{PointSourceModel, PointSourceSpec};
use lensfit_rs::profiles::{ProfileRegistry, Sis};
use lensfit_rs::psf::Psf;
use lensfit_rs::simulation::MockObservation;

const CONFIG: &str = r#"{
    "model": {
        "lens_models": ["SIS"],
        "source_light": ["GAUSSIAN"],
        "lens_light": ["SERSIC"]
    },
    "imaging": {
        "grid": {"nx": 40, "ny": 40, "transform_pix2angle": [[-0.05, 0.0], [0.0, 0.05]],
                 "ra_at_xy_0": 0.975, "dec_at_xy_0": -0.975},
        "psf": {"psf_type": "GAUSSIAN", "fwhm": 0.1}
    },
    "params": {
        "init": {
            "lens": [{"theta_E": 0.65}],
            "source_light": [{"sigma": 0.08, "center_x": 0.0, "center_y": 0.0}]
        },
        "sigma": {
            "lens": [{"theta_E": 0.1}],
            "source_light": [{"sigma": 0.03, "center_x": 0.1, "center_y": 0.1}]
        },
        "fixed": {
            "lens": [{"center_x": 0.0, "center_y": 0.0}],
            "lens_light": [{"R_sersic": 0.4, "n_sersic": 2.0, "center_x": 0.0, "center_y": 0.0}]
        },
        "lower": {
            "lens": [{"theta_E": 0.3}],
            "source_light": [{"sigma": 0.01, "center_x": -0.4, "center_y": -0.4}]
        },
        "upper": {
            "lens": [{"theta_E": 1.2}],
            "source_light": [{"sigma": 0.3, "center_x": 0.4, "center_y": 0.4}]
        }
    },
    "steps": [
        {"method": "pso", "n_particles": 30, "max_iterations": 60, "seed": 7},
        {"method": "simplex", "max_iterations": 800}
    ]
}"#;

fn truth() -> ModelKwargs {
    ModelKwargs {
        lens: vec![Kwargs::from([("theta_E", 0.6), ("center_x", 0.0), ("center_y", 0.0)])],
        source_light: vec![Kwargs::from([
            ("amp", 10.0),
            ("sigma", 0.06),
            ("center_x", 0.05),
            ("center_y", 0.03),
        ])],
        lens_light: vec![Kwargs::from([
            ("amp", 50.0),
            ("R_sersic", 0.4),
            ("n_sersic", 2.0),
            ("center_x", 0.0),
            ("center_y", 0.0),
        ])],
        ..ModelKwargs::default()
    }
}

#[test]
fn test_fit_recovers_simulated_lens() {
    let _ = env_logger::builder().is_test(true).try_init();

    let registry = ProfileRegistry::default();
    let config = FitConfig::from_json(CONFIG).unwrap();
    let image_model = config.build_image_model(&registry).unwrap();
    let data = MockObservation::new(0.01, 1000.0)
        .with_seed(11)
        .observe(&image_model, &truth())
        .unwrap();

    let likelihood = config.build_likelihood(&registry, Some(data)).unwrap();
    assert_eq!(
        likelihood.param().param_names(),
        &["theta_E_lens0", "sigma_source_light0", "center_x_source_light0", "center_y_source_light0"]
    );

    let (truth_vector, _) = likelihood.param().to_vector(&truth()).unwrap();
    let truth_log_l = likelihood.log_likelihood(&truth_vector);
    assert!(truth_log_l.is_finite());

    let sequence = FittingSequence::new(&likelihood, &config.params.init, &config.params.sigma).unwrap();
    let result = sequence.run(&config.steps).unwrap();

    assert_eq!(result.steps.len(), 2);
    assert!(result.steps[1].log_likelihood >= result.steps[0].log_likelihood);
    assert!(result.log_likelihood >= truth_log_l - 1.0);

    let fit = &result.kwargs;
    assert_relative_eq!(fit.lens[0].scalar("theta_E").unwrap(), 0.6, epsilon = 0.01);
    assert_relative_eq!(fit.source_light[0].scalar("sigma").unwrap(), 0.06, epsilon = 0.01);
    assert_relative_eq!(fit.source_light[0].scalar("center_x").unwrap(), 0.05, epsilon = 0.01);
    assert_relative_eq!(fit.source_light[0].scalar("center_y").unwrap(), 0.03, epsilon = 0.01);

    // Amplitudes come from the linear solver
    assert_relative_eq!(fit.source_light[0].scalar("amp").unwrap(), 10.0, max_relative = 0.05);
    assert_relative_eq!(fit.lens_light[0].scalar("amp").unwrap(), 50.0, max_relative = 0.05);
    assert_eq!(fit.lens[0].scalar("center_x").unwrap(), 0.0);
}

#[test]
fn test_fit_is_reproducible() {
    let registry = ProfileRegistry::default();
    let config = FitConfig::from_json(CONFIG).unwrap();
    let steps = [FitStep::Pso(ParticleSwarm::new().with_particles(10).with_max_iterations(5).with_seed(3))];
    let image_model = config.build_image_model(&registry).unwrap();
    let data = MockObservation::default().observe(&image_model, &truth()).unwrap();
    let likelihood = config.build_likelihood(&registry, Some(data)).unwrap();

    let sequence = FittingSequence::new(&likelihood, &config.params.init, &config.params.sigma).unwrap();
    let a = sequence.run(&steps).unwrap();
    let b = sequence.run(&steps).unwrap();
    assert_eq!(a.params, b.params);
    assert_eq!(a.log_likelihood, b.log_likelihood);
}

#[test]
fn test_point_source_amplitude_from_noisy_image() {
    let grid = PixelGrid::centered(50, 0.05).unwrap();
    let point_source = PointSourceModel::new(vec![PointSourceSpec::source_position()], LensEquationSolver::default()).unwrap();
    let components = ModelComponents {
        lens_model: LensModel::new(vec![Arc::new(Sis)]),
        point_source,
        ..ModelComponents::default()
    };
    let psf = Psf::gaussian(0.1, 0.05, 3.0).unwrap();
    let model = ImageModel::new(grid, psf, NumericsConfig::default(), components).unwrap();

    let mut kwargs = ModelKwargs {
        lens: vec![Kwargs::from([("theta_E", 0.8), ("center_x", 0.0), ("center_y", 0.0)])],
        point_source: vec![Kwargs::from([("ra_source", 0.1), ("dec_source", 0.05), ("source_amp", 100.0)])],
        ..ModelKwargs::default()
    };
    let data = MockObservation::new(0.05, 500.0).observe(&model, &kwargs).unwrap();

    kwargs.point_source[0].remove("source_amp");
    let solution = LinearSolver::default().solve(&model, &kwargs, &data).unwrap();
    assert_eq!(solution.amplitudes.len(), 1);

    let sigma = solution.covariance.as_ref().unwrap()[[0, 0]].sqrt();
    assert!((solution.amplitudes[0] - 100.0).abs() < 5.0 * sigma);
    assert_relative_eq!(solution.amplitudes[0], 100.0, max_relative = 0.02);
    assert_eq!(
        solution.kwargs.point_source[0].scalar("source_amp").unwrap(),
        solution.amplitudes[0]
    );
}
