//! Tests for the kwargs ↔ flat-vector marshaling.

use approx::assert_relative_eq;
use lensfit_rs::error::LensFitError;
use lensfit_rs::parameters::{
    Bounds, JointConstraint, Kwargs, ModelGroup, ModelKwargs, ModelSchema, Param, ParamRef, ParamSpec,
};
use lensfit_rs::point_source::PointSourceSpec;
use lensfit_rs::profiles::{LensProfile, LightProfile, Sersic, SersicEllipse, Shear, Sie};
use ndarray::Array1;

fn schema() -> ModelSchema {
    ModelSchema::new(
        vec![Sie.param_specs().to_vec(), Shear.param_specs().to_vec()],
        vec![SersicEllipse.param_specs().to_vec()],
        vec![Sersic.param_specs().to_vec()],
        vec![PointSourceSpec::lensed_position(4).param_specs()],
        vec![ParamSpec::nonlinear("D_dt")],
    )
}

fn kwargs() -> ModelKwargs {
    ModelKwargs {
        lens: vec![
            Kwargs::from([
                ("theta_E", 1.1),
                ("e1", 0.05),
                ("e2", -0.03),
                ("center_x", 0.01),
                ("center_y", -0.02),
            ]),
            Kwargs::from([("gamma1", 0.02), ("gamma2", 0.01), ("ra_0", 0.0), ("dec_0", 0.0)]),
        ],
        source_light: vec![Kwargs::from([
            ("amp", 16.0),
            ("R_sersic", 0.2),
            ("n_sersic", 1.5),
            ("e1", 0.1),
            ("e2", 0.0),
            ("center_x", 0.05),
            ("center_y", 0.02),
        ])],
        lens_light: vec![Kwargs::from([
            ("amp", 30.0),
            ("R_sersic", 0.8),
            ("n_sersic", 3.5),
            ("center_x", 0.01),
            ("center_y", -0.02),
        ])],
        point_source: vec![Kwargs::new()
            .with("ra_image", vec![1.0, -1.0, 0.1, -0.2])
            .with("dec_image", vec![0.2, -0.1, 1.1, -0.9])
            .with("point_amp", vec![5.0, 4.0, 3.0, 2.0])],
        special: Kwargs::from([("D_dt", 4000.0)]),
    }
}

#[test]
fn test_round_trip_with_sampled_amplitudes() {
    let param = Param::free(schema(), false).unwrap();
    let (x, names) = param.to_vector(&kwargs()).unwrap();

    // 5 + 4 lens, 7 source, 5 lens light, 3 × 4 point source, 1 special
    assert_eq!(param.num_params(), 34);
    assert_eq!(x.len(), 34);
    assert_eq!(names[0], "theta_E_lens0");
    assert_eq!(names[5], "gamma1_lens1");
    assert_eq!(names[9], "amp_source_light0");
    assert_eq!(names[16], "amp_lens_light0");
    assert_eq!(names[21], "ra_image_ps0[0]");
    assert_eq!(names[24], "ra_image_ps0[3]");
    assert_eq!(names[33], "D_dt");

    let back = param.from_vector(&x).unwrap();
    assert_eq!(back, kwargs());
}

#[test]
fn test_linear_amplitudes_are_left_out() {
    let param = Param::free(schema(), true).unwrap();
    let (x, names) = param.to_vector(&kwargs()).unwrap();
    assert_eq!(x.len(), 34 - 1 - 1 - 4);
    assert!(names.iter().all(|n| !n.starts_with("amp") && !n.starts_with("point_amp")));

    let back = param.from_vector(&x).unwrap();
    assert_eq!(back, param.strip_linear(&kwargs()));
    assert!(back.source_light[0].get("amp").is_none());
    assert!(back.point_source[0].get("point_amp").is_none());
}

#[test]
fn test_fixed_parameters() {
    let mut fixed = ModelKwargs::with_counts(2, 1, 1, 1);
    fixed.lens[1] = Kwargs::from([("ra_0", 0.0), ("dec_0", 0.0)]);
    fixed.source_light[0] = Kwargs::from([("n_sersic", 1.0)]);
    let param = Param::new(schema(), fixed, Vec::new(), true).unwrap();

    let names = param.param_names();
    assert!(!names.iter().any(|n| n == "ra_0_lens1" || n == "n_sersic_source_light0"));

    // The value given for a fixed parameter is ignored
    let (x, _) = param.to_vector(&kwargs()).unwrap();
    let back = param.from_vector(&x).unwrap();
    assert_eq!(back.source_light[0].scalar("n_sersic").unwrap(), 1.0);
    assert_eq!(back.lens[1].scalar("dec_0").unwrap(), 0.0);
    assert_eq!(back.lens[0], kwargs().lens[0]);
}

#[test]
fn test_joint_parameters_are_populated_identically() {
    let joints = vec![
        JointConstraint::new(
            ParamRef::new(ModelGroup::Lens, 0, "center_x"),
            ParamRef::new(ModelGroup::LensLight, 0, "center_x"),
        ),
        JointConstraint::new(
            ParamRef::new(ModelGroup::Lens, 0, "center_y"),
            ParamRef::new(ModelGroup::LensLight, 0, "center_y"),
        ),
    ];
    let param = Param::new(schema(), ModelKwargs::default(), joints, true).unwrap();
    assert!(!param.param_names().iter().any(|n| n.ends_with("lens_light0") && n.starts_with("center")));

    let (mut x, names) = param.to_vector(&kwargs()).unwrap();
    let i = names.iter().position(|n| n == "center_x_lens0").unwrap();
    x[i] = 0.3;
    let back = param.from_vector(&x).unwrap();
    assert_eq!(back.lens[0].scalar("center_x").unwrap(), 0.3);
    assert_eq!(back.lens_light[0].scalar("center_x").unwrap(), 0.3);
    assert_eq!(
        back.lens_light[0].scalar("center_y").unwrap(),
        back.lens[0].scalar("center_y").unwrap()
    );
}

#[test]
fn test_wrong_length_is_rejected() {
    let param = Param::free(schema(), true).unwrap();
    match param.from_vector(&Array1::zeros(3)) {
        Err(LensFitError::ParameterCountMismatch { expected, got }) => {
            assert_eq!(expected, param.num_params());
            assert_eq!(got, 3);
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_invalid_layouts() {
    // Unknown fixed parameter
    let mut fixed = ModelKwargs::with_counts(1, 0, 0, 0);
    fixed.lens[0] = Kwargs::from([("gamma", 2.0)]);
    assert!(Param::new(schema(), fixed, Vec::new(), true).is_err());

    // Fixed array parameter with a scalar value
    let mut fixed = ModelKwargs::with_counts(0, 0, 0, 1);
    fixed.point_source[0] = Kwargs::from([("ra_image", 1.0)]);
    assert!(Param::new(schema(), fixed, Vec::new(), true).is_err());

    // Joints on arrays or linear amplitudes
    let array_joint = JointConstraint::new(
        ParamRef::new(ModelGroup::Lens, 0, "center_x"),
        ParamRef::new(ModelGroup::PointSource, 0, "ra_image"),
    );
    assert!(Param::new(schema(), ModelKwargs::default(), vec![array_joint], true).is_err());
    let amp_joint = JointConstraint::new(
        ParamRef::new(ModelGroup::SourceLight, 0, "amp"),
        ParamRef::new(ModelGroup::LensLight, 0, "amp"),
    );
    assert!(Param::new(schema(), ModelKwargs::default(), vec![amp_joint], true).is_err());

    // A follower that is also fixed
    let mut fixed = ModelKwargs::with_counts(0, 0, 1, 0);
    fixed.lens_light[0] = Kwargs::from([("center_x", 0.0)]);
    let joint = JointConstraint::new(
        ParamRef::new(ModelGroup::Lens, 0, "center_x"),
        ParamRef::new(ModelGroup::LensLight, 0, "center_x"),
    );
    assert!(Param::new(schema(), fixed, vec![joint], true).is_err());
}

#[test]
fn test_missing_free_parameter() {
    let param = Param::free(schema(), true).unwrap();
    let mut incomplete = kwargs();
    incomplete.lens[0].remove("e1");
    assert!(param.to_vector(&incomplete).is_err());
}

#[test]
fn test_bounds_follow_vector_order() {
    let param = Param::free(schema(), true).unwrap();
    let (x, _) = param.to_vector(&kwargs()).unwrap();
    let lower = param.from_vector(&(&x - 1.0)).unwrap();
    let upper = param.from_vector(&(&x + 2.0)).unwrap();
    let bounds = param.bounds(&lower, &upper).unwrap();
    assert_eq!(bounds.len(), x.len());
    for (b, v) in bounds.iter().zip(x.iter()) {
        assert!(b.contains(*v));
        assert_relative_eq!(b.width(), 3.0, epsilon = 1e-12);
    }

    // Inverted limits
    assert!(param.bounds(&upper, &lower).is_err());
    assert!(matches!(Bounds::new(1.0, 0.0), Err(_)));
}
