//! Asymmetric errors from likelihood profiling
//!
//! For one parameter of interest, walks the profile likelihood away from the
//! minimum in each direction until it rises by 0.5, then bisects to the
//! crossing. Inner conditional fits are warm-started from the best-fit
//! point; when the POI is the only floating parameter the profile reduces to
//! a plain evaluation.

use crate::nll::NllFunction;
use crate::optimizer::{LbfgsOptimizer, ObjectiveFunction, OptimizerConfig};
use pf_core::Result;

/// Rise in NLL defining a one-sigma asymmetric error.
const DELTA_NLL: f64 = 0.5;

/// Asymmetric errors for one parameter.
pub struct AsymmetricErrors {
    /// Negative-side error (`<= 0`).
    pub lo: f64,
    /// Positive-side error (`>= 0`).
    pub hi: f64,
    /// Stage status: 0 when both crossings were found inside the range.
    pub status: i32,
}

/// Profile the NLL around `best` for the floating parameter at `slot`.
pub fn minos_pass(
    nll: &NllFunction,
    config: &OptimizerConfig,
    best: &[f64],
    nll_min: f64,
    slot: usize,
) -> Result<AsymmetricErrors> {
    let (lo_bound, hi_bound) = nll.bounds()[slot];
    let center = best[slot];

    // Initial step: a modest fraction of the available room.
    let step_hi = ((hi_bound - center) * 0.1).max(1e-6);
    let step_lo = ((center - lo_bound) * 0.1).max(1e-6);

    let (hi, hi_ok) = scan_direction(nll, config, best, nll_min, slot, step_hi, hi_bound)?;
    let (lo, lo_ok) = scan_direction(nll, config, best, nll_min, slot, -step_lo, lo_bound)?;

    Ok(AsymmetricErrors {
        lo: lo - center,
        hi: hi - center,
        status: if hi_ok && lo_ok { 0 } else { 1 },
    })
}

/// Walk outward from the minimum until the profile rises by [`DELTA_NLL`],
/// then bisect. Returns the crossing point and whether it was bracketed
/// inside the parameter range.
fn scan_direction(
    nll: &NllFunction,
    config: &OptimizerConfig,
    best: &[f64],
    nll_min: f64,
    slot: usize,
    step: f64,
    bound: f64,
) -> Result<(f64, bool)> {
    let target = nll_min + DELTA_NLL;
    let mut inside = best[slot];
    let mut probe = clamp_towards(inside + step, bound, step);
    let mut warm = best.to_vec();

    // Expand until the target is bracketed or the range ends.
    loop {
        let value = profile(nll, config, &mut warm, slot, probe)?;
        if value >= target {
            break;
        }
        if probe == bound {
            log::warn!(
                "profile of '{}' stays below the crossing up to the range bound {}",
                nll.free_names()[slot],
                bound
            );
            return Ok((bound, false));
        }
        inside = probe;
        probe = clamp_towards(probe + 2.0 * (probe - best[slot]).abs().max(step.abs()) * step.signum(), bound, step);
    }

    // Bisect between the last point below and the first at-or-above.
    let mut below = inside;
    let mut above = probe;
    for _ in 0..40 {
        let mid = 0.5 * (below + above);
        if (above - below).abs() <= 1e-4 * step.abs().max((mid - best[slot]).abs()) {
            break;
        }
        let value = profile(nll, config, &mut warm, slot, mid)?;
        if value >= target {
            above = mid;
        } else {
            below = mid;
        }
    }
    Ok((0.5 * (below + above), true))
}

fn clamp_towards(value: f64, bound: f64, step: f64) -> f64 {
    if step > 0.0 { value.min(bound) } else { value.max(bound) }
}

/// Conditional NLL with the parameter at `slot` pinned to `value`, profiled
/// over the remaining floating parameters.
fn profile(
    nll: &NllFunction,
    config: &OptimizerConfig,
    warm: &mut Vec<f64>,
    slot: usize,
    value: f64,
) -> Result<f64> {
    warm[slot] = value;
    if nll.dim() <= 1 {
        return nll.eval(warm);
    }
    // Pinning via a degenerate bound; the clamp-based optimizer keeps the
    // slot fixed and the projected gradient ignores it.
    let mut bounds = nll.bounds().to_vec();
    bounds[slot] = (value, value);
    let result = LbfgsOptimizer::new(config.clone()).minimize(nll, warm, &bounds)?;
    *warm = result.parameters;
    warm[slot] = value;
    Ok(result.fval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pf_model::schema::StoreFile;
    use pf_model::workspace::Workspace;

    fn single_bin_workspace() -> Workspace {
        // Single counting bin: nu = mu * 100, data = 100. The profile is the
        // plain Poisson NLL in mu with mu_hat = 1.
        let json = r#"{
            "workspaces": [{
                "name": "combWS",
                "parameters": [
                    {"name": "obs_sr", "value": 0.0, "min": 0.0, "max": 1.0, "constant": true},
                    {"name": "mu", "value": 1.0, "min": 0.0, "max": 5.0}
                ],
                "pdfs": [
                    {"type": "template_sum", "name": "chan_sr", "observable": "obs_sr",
                     "coefficients": ["mu"], "templates": [[100.0]]}
                ],
                "model_configs": [
                    {"name": "ModelConfig", "pdf": "chan_sr",
                     "observables": ["obs_sr"], "pois": ["mu"],
                     "nuisances": [], "globals": []}
                ],
                "datasets": [
                    {"name": "combData", "columns": {"obs_sr": [100.0]}}
                ]
            }]
        }"#;
        let store: StoreFile = serde_json::from_str(json).unwrap();
        Workspace::from_store(&store, "combWS").unwrap()
    }

    #[test]
    fn test_minos_errors_match_poisson_widths() {
        let ws = single_bin_workspace();
        let options = crate::nll::NllOptions { offset: false, opt_const: 0, num_cpu: 1 };
        let nll = NllFunction::new(&ws, "ModelConfig", "combData", &options).unwrap();
        let nll_min = nll.eval(&[1.0]).unwrap();

        let config = OptimizerConfig::default();
        let errors = minos_pass(&nll, &config, &[1.0], nll_min, 0).unwrap();

        assert_eq!(errors.status, 0);
        // For n = 100 the Poisson interval is close to +-sqrt(n)/n = 0.1,
        // slightly asymmetric.
        assert_relative_eq!(errors.hi, 0.1, epsilon = 0.01);
        assert_relative_eq!(errors.lo, -0.1, epsilon = 0.01);
        assert!(errors.hi > -errors.lo - 0.01, "upper error should be the larger side");
    }

    #[test]
    fn test_minos_reports_truncation_at_range_bound() {
        let json = r#"{
            "workspaces": [{
                "name": "combWS",
                "parameters": [
                    {"name": "obs_sr", "value": 0.0, "min": 0.0, "max": 1.0, "constant": true},
                    {"name": "mu", "value": 1.0, "min": 0.99, "max": 1.01}
                ],
                "pdfs": [
                    {"type": "template_sum", "name": "chan_sr", "observable": "obs_sr",
                     "coefficients": ["mu"], "templates": [[100.0]]}
                ],
                "model_configs": [
                    {"name": "ModelConfig", "pdf": "chan_sr",
                     "observables": ["obs_sr"], "pois": ["mu"],
                     "nuisances": [], "globals": []}
                ],
                "datasets": [
                    {"name": "combData", "columns": {"obs_sr": [100.0]}}
                ]
            }]
        }"#;
        let store: StoreFile = serde_json::from_str(json).unwrap();
        let ws = Workspace::from_store(&store, "combWS").unwrap();
        let options = crate::nll::NllOptions { offset: false, opt_const: 0, num_cpu: 1 };
        let nll = NllFunction::new(&ws, "ModelConfig", "combData", &options).unwrap();
        let nll_min = nll.eval(&[1.0]).unwrap();

        let errors = minos_pass(&nll, &OptimizerConfig::default(), &[1.0], nll_min, 0).unwrap();
        // The 0.5 crossing lies outside [0.99, 1.01]: truncated, nonzero status.
        assert_eq!(errors.status, 1);
        assert!(errors.hi <= 0.01 + 1e-12);
    }
}
