//! Mock observations with Poisson and background noise.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Poisson};

use crate::data::{Exposure, ImageData};
use crate::error::{LensFitError, Result};
use crate::image_model::ImageModel;
use crate::parameters::ModelKwargs;

/// Settings of a simulated exposure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MockObservation {
    /// Gaussian background noise per pixel (counts/s)
    pub background_rms: f64,

    /// Exposure time (s)
    pub exposure_time: f64,

    /// Random number generator seed
    pub seed: u64,
}

impl Default for MockObservation {
    fn default() -> Self {
        Self {
            background_rms: 0.01,
            exposure_time: 1000.0,
            seed: 42,
        }
    }
}

impl MockObservation {
    pub fn new(background_rms: f64, exposure_time: f64) -> Self {
        Self {
            background_rms,
            exposure_time,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Add noise to a noiseless image of count rates.
    ///
    /// Positive pixels receive Poisson noise on `image · t_exp` counts; every
    /// pixel receives Gaussian background noise.
    ///
    /// # Errors
    ///
    /// `ConfigError` for a negative background or non-positive exposure time,
    /// `NonFiniteValue` for a non-finite input pixel.
    pub fn add_noise(&self, image: &Array2<f64>) -> Result<Array2<f64>> {
        if !(self.exposure_time > 0.0 && self.exposure_time.is_finite()) {
            return Err(LensFitError::config("exposure time must be positive"));
        }
        let background = Normal::new(0.0, self.background_rms)
            .map_err(|e| LensFitError::config(format!("invalid background rms: {}", e)))?;
        if image.iter().any(|v| !v.is_finite()) {
            return Err(LensFitError::NonFiniteValue("noiseless image".into()));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let t = self.exposure_time;
        let mut noisy = image.clone();
        for value in noisy.iter_mut() {
            let counts = *value * t;
            let shot = if counts > 0.0 {
                let poisson = Poisson::new(counts)
                    .map_err(|e| LensFitError::config(format!("invalid Poisson mean {}: {}", counts, e)))?;
                poisson.sample(&mut rng) / t
            } else {
                *value
            };
            *value = shot + background.sample(&mut rng);
        }
        Ok(noisy)
    }

    /// Render `kwargs`, add noise and wrap the result as image data.
    pub fn observe(&self, model: &ImageModel, kwargs: &ModelKwargs) -> Result<ImageData> {
        let image = model.image(kwargs)?;
        let noisy = self.add_noise(&image)?;
        ImageData::new(
            model.grid().clone(),
            noisy,
            self.background_rms,
            Exposure::Uniform(self.exposure_time),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_noise_statistics() {
        let image = Array2::from_elem((100, 100), 2.0);
        let noisy = MockObservation::new(0.5, 10.0).with_seed(3).add_noise(&image).unwrap();

        let n = noisy.len() as f64;
        let mean = noisy.sum() / n;
        let var = noisy.mapv(|v| (v - mean).powi(2)).sum() / (n - 1.0);
        // Expected variance: 0.25 + 2 / 10
        assert_relative_eq!(mean, 2.0, epsilon = 0.02);
        assert_relative_eq!(var, 0.45, max_relative = 0.05);
    }

    #[test]
    fn test_seeded_and_validated() {
        let image = Array2::from_elem((5, 5), 1.0);
        let obs = MockObservation::default();
        assert_eq!(obs.add_noise(&image).unwrap(), obs.add_noise(&image).unwrap());
        assert_ne!(
            obs.add_noise(&image).unwrap(),
            obs.with_seed(7).add_noise(&image).unwrap()
        );

        assert!(MockObservation::new(-1.0, 1.0).add_noise(&image).is_err());
        assert!(MockObservation::new(1.0, 0.0).add_noise(&image).is_err());

        // Zero background and negative pixels pass through unchanged
        let negative = Array2::from_elem((2, 2), -1.0);
        let out = MockObservation::new(0.0, 1.0).add_noise(&negative).unwrap();
        assert_eq!(out, negative);
    }
}
