//! Lens deflection: single-plane superposition and multi-plane ray tracing.
//!
//! A [`LensModel`] is the static description (profiles, redshifts,
//! cosmology). Binding it to parameter values with [`LensModel::bind`]
//! validates the kwargs once and yields a [`BoundLensModel`] whose per-point
//! evaluations cannot fail.

use std::sync::Arc;

use crate::cosmology::{arrival_time_days, Cosmology};
use crate::error::{LensFitError, Result};
use crate::parameters::{Kwargs, ParamSpec};
use crate::profiles::LensProfile;
use crate::utils::finite_difference::jacobian_2d;

/// `|det A|` below which the magnification is treated as infinite.
pub const DEGENERATE_DETERMINANT: f64 = 1e-12;

/// Hessian of the lensing potential.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Hessian {
    pub f_xx: f64,
    pub f_xy: f64,
    pub f_yx: f64,
    pub f_yy: f64,
}

impl Hessian {
    pub fn from_array(h: [f64; 4]) -> Self {
        Self {
            f_xx: h[0],
            f_xy: h[1],
            f_yx: h[2],
            f_yy: h[3],
        }
    }

    /// Determinant of the lens mapping Jacobian `A = I − H`.
    pub fn det_a(&self) -> f64 {
        (1.0 - self.f_xx) * (1.0 - self.f_yy) - self.f_xy * self.f_yx
    }

    /// Convergence κ.
    pub fn kappa(&self) -> f64 {
        0.5 * (self.f_xx + self.f_yy)
    }

    /// Shear components `(γ1, γ2)`.
    pub fn gamma(&self) -> (f64, f64) {
        (0.5 * (self.f_xx - self.f_yy), 0.5 * (self.f_xy + self.f_yx))
    }
}

impl std::ops::Add for Hessian {
    type Output = Hessian;

    fn add(self, rhs: Hessian) -> Hessian {
        Hessian {
            f_xx: self.f_xx + rhs.f_xx,
            f_xy: self.f_xy + rhs.f_xy,
            f_yx: self.f_yx + rhs.f_yx,
            f_yy: self.f_yy + rhs.f_yy,
        }
    }
}

/// One lens plane of a multi-plane model.
#[derive(Debug, Clone)]
struct Plane {
    /// Profile indices on this plane
    members: Vec<usize>,
    /// Comoving distance from the previous plane (or the observer)
    step: f64,
    /// Comoving distance from the observer
    comoving: f64,
    /// `D_s / D_ds`, reduced to physical deflection
    reduced_to_physical: f64,
}

#[derive(Debug, Clone)]
struct MultiPlane {
    planes: Vec<Plane>,
    /// Comoving distance from the last plane to the source
    last_step: f64,
    /// Comoving distance from the observer to the source
    source_comoving: f64,
}

/// Time-delay geometry of a single-plane model.
#[derive(Debug, Clone)]
struct TimeDelaySetup {
    z_lens: f64,
    z_source: f64,
    cosmology: Arc<dyn Cosmology>,
}

/// Static lens model description.
#[derive(Debug, Clone, Default)]
pub struct LensModel {
    profiles: Vec<Arc<dyn LensProfile>>,
    multi_plane: Option<MultiPlane>,
    time_delay: Option<TimeDelaySetup>,
}

impl LensModel {
    /// Single-plane model: deflections add up.
    pub fn new(profiles: Vec<Arc<dyn LensProfile>>) -> Self {
        Self {
            profiles,
            multi_plane: None,
            time_delay: None,
        }
    }

    /// Attach lens and source redshifts so arrival times can be computed.
    pub fn with_cosmology(
        mut self,
        z_lens: f64,
        z_source: f64,
        cosmology: Arc<dyn Cosmology>,
    ) -> Result<Self> {
        if !(z_lens > 0.0 && z_source > z_lens) {
            return Err(LensFitError::config(format!(
                "lens redshift {} must lie between 0 and the source redshift {}",
                z_lens, z_source
            )));
        }
        self.time_delay = Some(TimeDelaySetup {
            z_lens,
            z_source,
            cosmology,
        });
        Ok(self)
    }

    /// Multi-plane model: rays are traced through planes ordered by redshift.
    ///
    /// # Arguments
    ///
    /// * `profiles` - Deflectors
    /// * `redshifts` - Redshift of each deflector; equal redshifts share a plane
    /// * `z_source` - Source redshift
    /// * `cosmology` - Distance provider
    ///
    /// # Errors
    ///
    /// `ConfigError` when the lengths differ or a redshift is not strictly
    /// between 0 and `z_source`.
    pub fn multi_plane(
        profiles: Vec<Arc<dyn LensProfile>>,
        redshifts: Vec<f64>,
        z_source: f64,
        cosmology: &dyn Cosmology,
    ) -> Result<Self> {
        if redshifts.len() != profiles.len() {
            return Err(LensFitError::config(format!(
                "{} redshifts given for {} lens profiles",
                redshifts.len(),
                profiles.len()
            )));
        }
        if let Some(&z) = redshifts.iter().find(|&&z| !(z > 0.0 && z < z_source)) {
            return Err(LensFitError::config(format!(
                "deflector redshift {} must lie between 0 and the source redshift {}",
                z, z_source
            )));
        }

        let mut order: Vec<usize> = (0..profiles.len()).collect();
        order.sort_by(|&a, &b| redshifts[a].total_cmp(&redshifts[b]));

        let d_s = cosmology.angular_diameter_distance(0.0, z_source);
        let mut planes: Vec<(f64, Vec<usize>)> = Vec::new();
        for index in order {
            let z = redshifts[index];
            match planes.last_mut() {
                Some((z_plane, members)) if *z_plane == z => members.push(index),
                _ => planes.push((z, vec![index])),
            }
        }

        let mut z_prev = 0.0;
        let planes = planes
            .into_iter()
            .map(|(z, members)| {
                let plane = Plane {
                    members,
                    step: cosmology.comoving_distance(z_prev, z),
                    comoving: cosmology.comoving_distance(0.0, z),
                    reduced_to_physical: d_s / cosmology.angular_diameter_distance(z, z_source),
                };
                z_prev = z;
                plane
            })
            .collect();

        Ok(Self {
            profiles,
            multi_plane: Some(MultiPlane {
                planes,
                last_step: cosmology.comoving_distance(z_prev, z_source),
                source_comoving: cosmology.comoving_distance(0.0, z_source),
            }),
            time_delay: None,
        })
    }

    pub fn profiles(&self) -> &[Arc<dyn LensProfile>] {
        &self.profiles
    }

    pub fn is_multi_plane(&self) -> bool {
        self.multi_plane.is_some()
    }

    /// Parameter declarations of every profile, in order.
    pub fn param_specs(&self) -> Vec<Vec<ParamSpec>> {
        self.profiles.iter().map(|p| p.param_specs().to_vec()).collect()
    }

    /// Validate parameter values and bind them to the model.
    ///
    /// # Errors
    ///
    /// `ConfigError` when the number of kwargs differs from the number of
    /// profiles or a profile's keys do not match its schema exactly.
    pub fn bind(&self, kwargs: &[Kwargs]) -> Result<BoundLensModel<'_>> {
        if kwargs.len() != self.profiles.len() {
            return Err(LensFitError::config(format!(
                "{} lens kwargs given for {} lens profiles",
                kwargs.len(),
                self.profiles.len()
            )));
        }
        let params = self
            .profiles
            .iter()
            .zip(kwargs)
            .map(|(profile, kw)| kw.ordered_values(profile.param_specs(), profile.name(), None))
            .collect::<Result<Vec<_>>>()?;

        let time_delay_distance = self
            .time_delay
            .as_ref()
            .map(|td| td.cosmology.time_delay_distance(td.z_lens, td.z_source));

        Ok(BoundLensModel {
            model: self,
            params,
            time_delay_distance,
        })
    }
}

/// A lens model with validated parameter values.
#[derive(Debug, Clone)]
pub struct BoundLensModel<'a> {
    model: &'a LensModel,
    params: Vec<Vec<f64>>,
    time_delay_distance: Option<f64>,
}

impl<'a> BoundLensModel<'a> {
    /// Override the time-delay distance (Mpc), e.g. from a sampled `D_dt`.
    pub fn with_time_delay_distance(mut self, d_dt: f64) -> Self {
        self.time_delay_distance = Some(d_dt);
        self
    }

    pub fn is_multi_plane(&self) -> bool {
        self.model.is_multi_plane()
    }

    /// Sum of the reduced deflections of all profiles, as if on one plane.
    fn single_plane_alpha(&self, members: impl Iterator<Item = usize>, x: f64, y: f64) -> (f64, f64) {
        members.fold((0.0, 0.0), |(ax, ay), i| {
            let (dx, dy) = self.model.profiles[i].derivatives(x, y, &self.params[i]);
            (ax + dx, ay + dy)
        })
    }

    /// Effective deflection `θ − β(θ)`.
    pub fn alpha(&self, x: f64, y: f64) -> (f64, f64) {
        match &self.model.multi_plane {
            None => self.single_plane_alpha(0..self.params.len(), x, y),
            Some(_) => {
                let (bx, by) = self.ray_shoot(x, y);
                (x - bx, y - by)
            }
        }
    }

    /// Map an image-plane position to the source plane.
    pub fn ray_shoot(&self, x: f64, y: f64) -> (f64, f64) {
        let multi = match &self.model.multi_plane {
            None => {
                let (ax, ay) = self.alpha(x, y);
                return (x - ax, y - ay);
            }
            Some(multi) => multi,
        };

        // Comoving transverse position (Mpc·arcsec) and current ray angle
        let (mut px, mut py) = (0.0, 0.0);
        let (mut tx, mut ty) = (x, y);
        for plane in &multi.planes {
            px += tx * plane.step;
            py += ty * plane.step;
            let (ax, ay) = self.single_plane_alpha(
                plane.members.iter().copied(),
                px / plane.comoving,
                py / plane.comoving,
            );
            tx -= ax * plane.reduced_to_physical;
            ty -= ay * plane.reduced_to_physical;
        }
        px += tx * multi.last_step;
        py += ty * multi.last_step;
        (px / multi.source_comoving, py / multi.source_comoving)
    }

    /// Hessian of the lensing potential.
    ///
    /// Multi-plane models use finite differences of the ray-shooting map.
    pub fn hessian(&self, x: f64, y: f64) -> Hessian {
        match &self.model.multi_plane {
            None => self
                .model
                .profiles
                .iter()
                .zip(&self.params)
                .map(|(profile, p)| Hessian::from_array(profile.hessian(x, y, p)))
                .fold(Hessian::default(), |acc, h| acc + h),
            Some(_) => {
                let a = jacobian_2d(|x, y| self.ray_shoot(x, y), x, y, None);
                Hessian {
                    f_xx: 1.0 - a[0][0],
                    f_xy: -a[0][1],
                    f_yx: -a[1][0],
                    f_yy: 1.0 - a[1][1],
                }
            }
        }
    }

    /// Magnification `1 / det(I − H)`.
    ///
    /// # Errors
    ///
    /// `DegenerateMagnification` on a critical curve.
    pub fn magnification(&self, x: f64, y: f64) -> Result<f64> {
        let det = self.hessian(x, y).det_a();
        if det.abs() < DEGENERATE_DETERMINANT {
            return Err(LensFitError::DegenerateMagnification { ra: x, dec: y, det });
        }
        Ok(1.0 / det)
    }

    /// Lensing potential ψ (single-plane only).
    pub fn potential(&self, x: f64, y: f64) -> Result<f64> {
        if self.is_multi_plane() {
            return Err(LensFitError::config(
                "lensing potential is not defined for multi-plane models",
            ));
        }
        Ok(self
            .model
            .profiles
            .iter()
            .zip(&self.params)
            .map(|(profile, p)| profile.function(x, y, p))
            .sum())
    }

    /// Fermat potential `½|θ − β|² − ψ(θ)` in arcsec².
    pub fn fermat_potential(&self, x: f64, y: f64, source_x: f64, source_y: f64) -> Result<f64> {
        let psi = self.potential(x, y)?;
        let (dx, dy) = (x - source_x, y - source_y);
        Ok(0.5 * (dx * dx + dy * dy) - psi)
    }

    /// Arrival time in days, up to a constant offset.
    ///
    /// # Errors
    ///
    /// `ConfigError` for multi-plane models or when no time-delay distance is
    /// known (neither a cosmology nor an explicit `D_dt`).
    pub fn arrival_time(&self, x: f64, y: f64, source_x: f64, source_y: f64) -> Result<f64> {
        let d_dt = self.time_delay_distance.ok_or_else(|| {
            LensFitError::config("arrival times need a cosmology or a time-delay distance D_dt")
        })?;
        let phi = self.fermat_potential(x, y, source_x, source_y)?;
        Ok(arrival_time_days(phi, d_dt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cosmology::HubbleLawCosmology;
    use crate::profiles::{Shear, Sis};
    use approx::assert_relative_eq;

    fn sis_kwargs(theta_e: f64, cx: f64, cy: f64) -> Kwargs {
        Kwargs::from([("theta_E", theta_e), ("center_x", cx), ("center_y", cy)])
    }

    #[test]
    fn test_bind_validates_kwargs() {
        let model = LensModel::new(vec![Arc::new(Sis)]);
        assert!(model.bind(&[]).is_err());
        assert!(model.bind(&[Kwargs::from([("theta_E", 1.0)])]).is_err());
        assert!(model.bind(&[sis_kwargs(1.0, 0.0, 0.0)]).is_ok());
    }

    #[test]
    fn test_sis_magnification() {
        // μ = 1 / (1 − θ_E / r) for an SIS
        let model = LensModel::new(vec![Arc::new(Sis)]);
        let bound = model.bind(&[sis_kwargs(1.0, 0.0, 0.0)]).unwrap();
        let mu = bound.magnification(2.0, 0.0).unwrap();
        assert_relative_eq!(mu, 2.0, epsilon = 1e-10);

        let err = bound.magnification(1.0, 0.0).unwrap_err();
        assert!(matches!(err, LensFitError::DegenerateMagnification { .. }));
    }

    #[test]
    fn test_fermat_potential_stationary_at_images() {
        // SIS with a source at (0.2, 0): images at x = 1.2 and x = −0.8
        let model = LensModel::new(vec![Arc::new(Sis)]);
        let bound = model.bind(&[sis_kwargs(1.0, 0.0, 0.0)]).unwrap();
        for &x in &[1.2, -0.8] {
            let (bx, by) = bound.ray_shoot(x, 0.0);
            assert_relative_eq!(bx, 0.2, epsilon = 1e-12);
            assert_relative_eq!(by, 0.0, epsilon = 1e-12);

            let h = 1e-5;
            let d = (bound.fermat_potential(x + h, 0.0, 0.2, 0.0).unwrap()
                - bound.fermat_potential(x - h, 0.0, 0.2, 0.0).unwrap())
                / (2.0 * h);
            assert!(d.abs() < 1e-8);
        }
    }

    #[test]
    fn test_arrival_time_needs_distance() {
        let model = LensModel::new(vec![Arc::new(Sis)]);
        let bound = model.bind(&[sis_kwargs(1.0, 0.0, 0.0)]).unwrap();
        assert!(bound.arrival_time(1.2, 0.0, 0.2, 0.0).is_err());

        let bound = bound.with_time_delay_distance(3000.0);
        let t1 = bound.arrival_time(1.2, 0.0, 0.2, 0.0).unwrap();
        let t2 = bound.arrival_time(-0.8, 0.0, 0.2, 0.0).unwrap();
        // The minimum image arrives first
        assert!(t1 < t2);

        let cosmo: Arc<dyn Cosmology> = Arc::new(HubbleLawCosmology::default());
        let model = LensModel::new(vec![Arc::new(Sis)])
            .with_cosmology(0.5, 1.5, cosmo)
            .unwrap();
        let bound = model.bind(&[sis_kwargs(1.0, 0.0, 0.0)]).unwrap();
        assert!(bound.arrival_time(1.2, 0.0, 0.2, 0.0).is_ok());
    }

    #[test]
    fn test_single_plane_equivalence() {
        let cosmo = HubbleLawCosmology::default();
        let profiles: Vec<Arc<dyn LensProfile>> = vec![Arc::new(Sis), Arc::new(Shear)];
        let kwargs = [
            sis_kwargs(1.1, 0.05, -0.02),
            Kwargs::from([("gamma1", 0.04), ("gamma2", -0.02), ("ra_0", 0.0), ("dec_0", 0.0)]),
        ];
        let single = LensModel::new(profiles.clone());
        let multi = LensModel::multi_plane(profiles, vec![0.5, 0.5], 2.0, &cosmo).unwrap();
        let single = single.bind(&kwargs).unwrap();
        let multi = multi.bind(&kwargs).unwrap();
        assert!(multi.arrival_time(0.3, 0.2, 0.0, 0.0).is_err());

        for &(x, y) in &[(0.3, 0.2), (-1.2, 0.7), (0.9, -1.4)] {
            let a = single.ray_shoot(x, y);
            let b = multi.ray_shoot(x, y);
            assert_relative_eq!(a.0, b.0, epsilon = 1e-10);
            assert_relative_eq!(a.1, b.1, epsilon = 1e-10);

            let ha = single.hessian(x, y);
            let hb = multi.hessian(x, y);
            assert_relative_eq!(ha.f_xx, hb.f_xx, epsilon = 1e-6);
            assert_relative_eq!(ha.f_xy, hb.f_xy, epsilon = 1e-6);
            assert_relative_eq!(ha.f_yy, hb.f_yy, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_multi_plane_redshift_validation() {
        let cosmo = HubbleLawCosmology::default();
        let profiles: Vec<Arc<dyn LensProfile>> = vec![Arc::new(Sis)];
        assert!(LensModel::multi_plane(profiles.clone(), vec![2.5], 2.0, &cosmo).is_err());
        assert!(LensModel::multi_plane(profiles.clone(), vec![0.0], 2.0, &cosmo).is_err());
        assert!(LensModel::multi_plane(profiles, vec![0.5, 0.7], 2.0, &cosmo).is_err());
    }

    #[test]
    fn test_hessian_components() {
        let h = Hessian::from_array([0.3, 0.1, 0.1, 0.5]);
        assert_relative_eq!(h.kappa(), 0.4);
        assert_relative_eq!(h.gamma().0, -0.1);
        assert_relative_eq!(h.det_a(), 0.7 * 0.5 - 0.01);
    }
}
