//! Fit orchestration
//!
//! Drives the minimization sequence against a prepared workspace: binned
//! evaluation hints, NLL construction, an optional simplex seeding pass, the
//! primary minimization, and the optional covariance and asymmetric-error
//! refinements. Stage statuses are aggregated with a bitwise AND in stage
//! order, matching the established behavior of this protocol.

use crate::errors::covariance_pass;
use crate::minos::minos_pass;
use crate::nll::{NllFunction, NllOptions};
use crate::optimizer::{LbfgsOptimizer, OptimizerConfig, SimplexOptimizer};
use pf_core::{Error, Result};
use pf_model::workspace::Workspace;

/// Recognized minimization options. Immutable once the fit begins.
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// Primary algorithm name.
    pub algorithm: String,
    /// External convergence tolerance; passed to the minimizer as a ratio of
    /// [`FitTool::TOLERANCE_UNIT`].
    pub tolerance: f64,
    /// Minimizer strategy level (effort scaling).
    pub strategy: i32,
    /// Constant-term optimization level.
    pub opt_const: i32,
    /// Print verbosity.
    pub print_level: i32,
    /// Worker-parallelism count for likelihood evaluation.
    pub num_cpu: usize,
    /// NLL offsetting flag.
    pub nll_offset: bool,
    /// Seed central values with a simplex pass before the primary fit.
    pub use_simplex: bool,
    /// Run the covariance (second-derivative) error pass.
    pub use_hesse: bool,
    /// Run the asymmetric-error profiling pass over the fit POIs.
    pub use_minos: bool,
    /// Legacy morphing-cache compatibility flag, forwarded to the minimizer.
    pub fix_star_cache: bool,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            algorithm: "lbfgs".to_string(),
            tolerance: 1e-3,
            strategy: 0,
            opt_const: 0,
            print_level: 2,
            num_cpu: 1,
            nll_offset: true,
            use_simplex: false,
            use_hesse: true,
            use_minos: true,
            fix_star_cache: false,
        }
    }
}

/// Orchestrates the minimization sequence for one model/dataset pair.
pub struct FitTool {
    config: FitConfig,
}

impl FitTool {
    /// Internal tolerance unit; the configured tolerance is expressed as a
    /// multiple of this before reaching the minimizer.
    pub const TOLERANCE_UNIT: f64 = 1e-3;

    /// Create a fit tool with the given configuration.
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    /// Fit configuration.
    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    fn optimizer_config(&self) -> OptimizerConfig {
        let ratio = self.config.tolerance / Self::TOLERANCE_UNIT;
        let mut cfg = OptimizerConfig::for_strategy(self.config.strategy, ratio * 1e-6);
        cfg.legacy_cache_fix = self.config.fix_star_cache;
        cfg
    }

    /// Minimize the NLL of (density, dataset) and refine errors as
    /// configured. Returns the aggregated status code (0 = success); the
    /// fitted values and errors are left on the workspace parameters.
    pub fn profile_to_data(
        &self,
        ws: &mut Workspace,
        mc_name: &str,
        data_name: &str,
    ) -> Result<i32> {
        if self.config.algorithm != "lbfgs" {
            return Err(Error::Validation(format!(
                "unknown minimization algorithm '{}'",
                self.config.algorithm
            )));
        }

        // Binned-template densities evaluate faster down the binned path;
        // a pure performance hint.
        for pdf in ws.pdfs_mut() {
            if pdf.is_template_sum() {
                log::info!("set binned likelihood for: {}", pdf.name());
                pdf.set_binned_hint(true);
            }
        }

        let nll_options = NllOptions {
            offset: self.config.nll_offset,
            opt_const: self.config.opt_const,
            num_cpu: self.config.num_cpu,
        };
        let nll = NllFunction::new(ws, mc_name, data_name, &nll_options)?;
        let opt_config = self.optimizer_config();

        if nll.dim() == 0 {
            log::warn!("no floating parameters; nothing to minimize");
            return Ok(0);
        }

        let mut start = nll.init().to_vec();
        if self.config.use_simplex {
            match SimplexOptimizer::new(opt_config.clone()).minimize(&nll, &start, nll.bounds()) {
                Ok(seed) => {
                    log::info!("simplex seeding pass: {}", seed);
                    start = seed.parameters;
                }
                Err(e) => log::warn!("simplex seeding pass failed: {}", e),
            }
        }

        let result =
            LbfgsOptimizer::new(opt_config.clone()).minimize(&nll, &start, nll.bounds())?;
        if self.config.print_level > 0 {
            log::info!("primary minimization: {}", result);
        }
        nll.write_back(ws, &result.parameters);
        let mut status = result.status();

        if self.config.use_hesse {
            log::info!("Starting error refinement (covariance pass)...");
            let cov = covariance_pass(&nll, &result.parameters)?;
            for (name, &error) in nll.free_names().iter().zip(&cov.errors) {
                if let Some(p) = ws.var_mut(name) {
                    p.set_error(error);
                }
            }
            status &= cov.status;
        }

        if self.config.use_minos {
            log::info!("Starting asymmetric-error pass...");
            let pois: Vec<String> = ws
                .model_config(mc_name)?
                .pois()
                .into_iter()
                .flatten()
                .cloned()
                .collect();
            let mut minos_status = 0;
            for name in &pois {
                let Some(slot) = nll.free_slot(name) else {
                    // Constant POIs are not floated and therefore not profiled.
                    continue;
                };
                let asym =
                    minos_pass(&nll, &opt_config, &result.parameters, result.fval, slot)?;
                if let Some(p) = ws.var_mut(name) {
                    p.set_asym_errors(asym.lo, asym.hi);
                }
                minos_status |= asym.status;
            }
            status &= minos_status;
        }

        Ok(status)
    }
}

/// Aggregate stage statuses: the primary status ANDed with each enabled
/// later stage, in order.
pub fn aggregate_status(primary: i32, later: &[i32]) -> i32 {
    later.iter().fold(primary, |acc, &stage| acc & stage)
}
