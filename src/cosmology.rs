//! Cosmological distances.
//!
//! The lens model only needs angular-diameter and comoving distances between
//! two redshifts. Any provider implementing [`Cosmology`] can be plugged in;
//! [`HubbleLawCosmology`] is a linear low-redshift approximation.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::error::{LensFitError, Result};

/// Speed of light in km/s.
pub const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;

/// Speed of light in m/s.
pub const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;

/// One megaparsec in meters.
pub const MPC_IN_M: f64 = 3.085_677_581_491_367_3e22;

/// One arcsecond in radians.
pub const ARCSEC_IN_RAD: f64 = std::f64::consts::PI / 648_000.0;

/// Seconds per day.
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Distance provider, all distances in Mpc.
pub trait Cosmology: Send + Sync + Debug {
    /// Angular-diameter distance from redshift `z1` to `z2 > z1`.
    fn angular_diameter_distance(&self, z1: f64, z2: f64) -> f64;

    /// Transverse comoving distance from redshift `z1` to `z2 > z1`.
    fn comoving_distance(&self, z1: f64, z2: f64) -> f64;

    /// Time-delay distance `(1 + z_d) D_d D_s / D_ds`.
    fn time_delay_distance(&self, z_lens: f64, z_source: f64) -> f64 {
        let d_d = self.angular_diameter_distance(0.0, z_lens);
        let d_s = self.angular_diameter_distance(0.0, z_source);
        let d_ds = self.angular_diameter_distance(z_lens, z_source);
        (1.0 + z_lens) * d_d * d_s / d_ds
    }
}

/// Linear Hubble-law distances, accurate for `z ≪ 1`.
///
/// `D_c(z1, z2) = c (z2 − z1) / H0` and `D_A(z1, z2) = D_c(z1, z2) / (1 + z2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HubbleLawCosmology {
    /// Hubble constant in km/s/Mpc
    pub h0: f64,
}

impl HubbleLawCosmology {
    pub fn new(h0: f64) -> Result<Self> {
        if !(h0.is_finite() && h0 > 0.0) {
            return Err(LensFitError::config(format!(
                "Hubble constant must be positive, got {}",
                h0
            )));
        }
        Ok(Self { h0 })
    }
}

impl Default for HubbleLawCosmology {
    fn default() -> Self {
        Self { h0: 70.0 }
    }
}

impl Cosmology for HubbleLawCosmology {
    fn angular_diameter_distance(&self, z1: f64, z2: f64) -> f64 {
        self.comoving_distance(z1, z2) / (1.0 + z2)
    }

    fn comoving_distance(&self, z1: f64, z2: f64) -> f64 {
        SPEED_OF_LIGHT_KM_S * (z2 - z1) / self.h0
    }
}

/// Convert a Fermat potential difference (arcsec²) to a time delay in days.
///
/// # Arguments
///
/// * `fermat_potential` - Fermat potential in arcsec²
/// * `time_delay_distance` - `D_dt` in Mpc
pub fn arrival_time_days(fermat_potential: f64, time_delay_distance: f64) -> f64 {
    time_delay_distance * MPC_IN_M / SPEED_OF_LIGHT_M_S * ARCSEC_IN_RAD * ARCSEC_IN_RAD
        * fermat_potential
        / SECONDS_PER_DAY
}
