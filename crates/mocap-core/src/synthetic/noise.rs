//! Seeded Gaussian noise and occlusion.

use crate::{MarkerSequence, Real, Vec3};
use anyhow::{Context, Result};
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Add isotropic Gaussian noise with standard deviation `sigma` to every
/// observed marker position. Deterministic for a given `seed`.
pub fn add_gaussian_noise(
    frames: &MarkerSequence,
    sigma: Real,
    seed: u64,
) -> Result<MarkerSequence> {
    let normal = Normal::new(0.0, sigma).context("invalid noise sigma")?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(frames
        .iter()
        .map(|frame| {
            frame
                .iter()
                .map(|(name, p)| {
                    let n = Vec3::new(
                        normal.sample(&mut rng),
                        normal.sample(&mut rng),
                        normal.sample(&mut rng),
                    );
                    (name.clone(), p + n)
                })
                .collect()
        })
        .collect())
}

/// Remove `names` from frame `frame`.
pub fn occlude(frames: &mut MarkerSequence, frame: usize, names: &[&str]) {
    if let Some(f) = frames.get_mut(frame) {
        for name in names {
            f.remove(*name);
        }
    }
}
