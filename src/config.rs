//! Run configuration: compile-time defaults plus the serde-loadable `RunConfig`.

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{GsError, Result};
use crate::spectral::SpectralOptions;

// --- Spectral defaults ---
pub const DEFAULT_TOLERANCE: f64 = 1e-10; // L1 change between power-iteration steps
pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

// --- EP defaults ---
pub const DEFAULT_EP_NUM: i64 = 0; // EP is off unless asked for
pub const EP_BATCH_MEMORY_BUDGET: usize = 512 << 20; // bytes of perturbed matrices held per batch

/// Settings for one run. Every field has a default, so a config file only needs
/// the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Number of EP trials. Signed so that negative values coming from a file
    /// or the command line can be rejected with a proper error.
    pub ep_num: i64,
    /// RNG seed; `0` draws a seed from the operating system.
    pub seed: u64,
    /// Perturbed matrices clustered concurrently per EP batch; defaults to the
    /// rayon thread count.
    pub batch_size: Option<usize>,
    pub spectral: SpectralOptions,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            ep_num: DEFAULT_EP_NUM,
            seed: 0,
            batch_size: None,
            spectral: SpectralOptions::default(),
        }
    }
}

impl RunConfig {
    /// Loads a JSON config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| GsError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| GsError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Checks every field and returns the trial count as `usize`.
    pub fn validate(&self) -> Result<usize> {
        let trials = trial_count(self.ep_num)?;
        if self.batch_size == Some(0) {
            return Err(GsError::Config("batch_size must be at least 1".into()));
        }
        if !(self.spectral.tolerance.is_finite() && self.spectral.tolerance > 0.0) {
            return Err(GsError::Config(format!(
                "spectral.tolerance must be a positive number, got {}",
                self.spectral.tolerance
            )));
        }
        if self.spectral.max_iterations == 0 {
            return Err(GsError::Config("spectral.max_iterations must be at least 1".into()));
        }
        Ok(trials)
    }

    /// Requested EP batch size, before the memory cap.
    pub fn resolved_batch_size(&self) -> usize {
        self.batch_size.unwrap_or_else(rayon::current_num_threads)
    }

    /// The RNG for the EP stage: seeded when `seed > 0`, entropy-derived otherwise.
    pub fn make_rng(&self) -> StdRng {
        if self.seed > 0 {
            StdRng::seed_from_u64(self.seed)
        } else {
            StdRng::from_entropy()
        }
    }
}

/// Converts a requested trial count, rejecting negative values.
pub fn trial_count(ep_num: i64) -> Result<usize> {
    usize::try_from(ep_num)
        .map_err(|_| GsError::Argument(format!("number of EP iterations must be non-negative, got {ep_num}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.validate().unwrap(), 0);
    }

    #[test]
    fn negative_trials_are_argument_errors() {
        assert!(matches!(trial_count(-1), Err(GsError::Argument(_))));
        assert_eq!(trial_count(100).unwrap(), 100);
        let cfg = RunConfig { ep_num: -5, ..RunConfig::default() };
        assert!(matches!(cfg.validate(), Err(GsError::Argument(_))));
    }

    #[test]
    fn rejects_bad_numeric_settings() {
        let cfg = RunConfig { batch_size: Some(0), ..RunConfig::default() };
        assert!(matches!(cfg.validate(), Err(GsError::Config(_))));
        let mut cfg = RunConfig::default();
        cfg.spectral.tolerance = f64::NAN;
        assert!(matches!(cfg.validate(), Err(GsError::Config(_))));
        let mut cfg = RunConfig::default();
        cfg.spectral.max_iterations = 0;
        assert!(matches!(cfg.validate(), Err(GsError::Config(_))));
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let cfg = RunConfig { seed: 12345, ..RunConfig::default() };
        let (mut a, mut b) = (cfg.make_rng(), cfg.make_rng());
        for _ in 0..5 {
            assert_eq!(a.gen::<f64>(), b.gen::<f64>());
        }
    }

    #[test]
    fn loads_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "ep_num": 100, "spectral": {{ "max_iterations": 50 }} }}"#).unwrap();
        let cfg = RunConfig::load(file.path()).unwrap();
        assert_eq!(cfg.ep_num, 100);
        assert_eq!(cfg.spectral.max_iterations, 50);
        assert_eq!(cfg.spectral.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(cfg.batch_size, None);
        assert_eq!(cfg.resolved_batch_size(), rayon::current_num_threads());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "iterations": 3 }}"#).unwrap();
        assert!(matches!(RunConfig::load(file.path()), Err(GsError::Config(_))));
    }
}
