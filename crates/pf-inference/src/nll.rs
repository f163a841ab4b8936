//! Negative log-likelihood construction
//!
//! Extracts an immutable evaluation table from (workspace, model config,
//! dataset) once, so the objective owns everything it needs and the
//! workspace stays free for post-fit write-back. Nuisance constraints are
//! included as Gaussian terms conditioned on the current global-observable
//! values; offsetting subtracts the first evaluated value.

use crate::optimizer::ObjectiveFunction;
use pf_core::{Error, Result};
use pf_model::workspace::{Mean, PdfKind, Workspace};
use rayon::prelude::*;
use statrs::function::gamma::ln_gamma;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// NLL construction options.
#[derive(Debug, Clone)]
pub struct NllOptions {
    /// Subtract the first evaluated value (numerical-stability aid; does not
    /// move the minimum).
    pub offset: bool,
    /// Constant-term optimization level: 1 caches the observed-count
    /// constants, 2 additionally folds fully-constant channels and
    /// constraint terms into a single precomputed value.
    pub opt_const: i32,
    /// Worker count; channel terms are summed in parallel when > 1.
    pub num_cpu: usize,
}

impl Default for NllOptions {
    fn default() -> Self {
        Self { offset: true, opt_const: 0, num_cpu: 1 }
    }
}

/// Coefficient of one template: a parameter or a product of parameters.
enum Coef {
    Param(usize),
    Product(Vec<usize>),
}

impl Coef {
    fn value(&self, table: &[f64]) -> f64 {
        match self {
            Coef::Param(i) => table[*i],
            Coef::Product(ids) => ids.iter().map(|&i| table[i]).product(),
        }
    }

    fn param_indices(&self) -> &[usize] {
        match self {
            Coef::Param(i) => std::slice::from_ref(i),
            Coef::Product(ids) => ids,
        }
    }
}

/// One binned channel: observed counts and coefficient-weighted templates.
struct Channel {
    name: String,
    observed: Vec<f64>,
    coefs: Vec<Coef>,
    templates: Vec<Vec<f64>>,
    /// Sum of ln(n_i!), cached when constant-term optimization is on.
    ln_factorial: Option<f64>,
}

impl Channel {
    fn observed_ln_factorial(&self) -> f64 {
        self.observed.iter().map(|&n| ln_gamma(n + 1.0)).sum()
    }

    fn nll(&self, table: &[f64]) -> f64 {
        let mut nll = 0.0;
        for (bin, &n) in self.observed.iter().enumerate() {
            let mut nu = 0.0;
            for (coef, template) in self.coefs.iter().zip(&self.templates) {
                nu += coef.value(table) * template[bin];
            }
            // Guard against non-positive expected yields from extreme
            // coefficient values during line searches.
            let nu = nu.max(1e-10);
            nll += nu - n * nu.ln();
        }
        nll + self.ln_factorial.unwrap_or_else(|| self.observed_ln_factorial())
    }
}

enum MeanRef {
    Param(usize),
    Literal(f64),
}

/// Gaussian constraint term on one parameter.
struct Constraint {
    x: usize,
    mean: MeanRef,
    sigma: f64,
}

impl Constraint {
    fn nll(&self, table: &[f64]) -> f64 {
        let mean = match self.mean {
            MeanRef::Param(i) => table[i],
            MeanRef::Literal(v) => v,
        };
        let pull = (table[self.x] - mean) / self.sigma;
        0.5 * pull * pull + (self.sigma * (2.0 * std::f64::consts::PI).sqrt()).ln()
    }
}

/// The negative log-likelihood of a model/dataset pair, over the floating
/// parameters of the density.
pub struct NllFunction {
    base: Vec<f64>,
    free: Vec<usize>,
    free_names: Vec<String>,
    bounds: Vec<(f64, f64)>,
    init: Vec<f64>,
    channels: Vec<Channel>,
    constraints: Vec<Constraint>,
    folded: f64,
    parallel: bool,
    offset: Option<OnceLock<f64>>,
}

impl NllFunction {
    /// Build the NLL for the named model config and dataset.
    pub fn new(
        ws: &Workspace,
        mc_name: &str,
        data_name: &str,
        options: &NllOptions,
    ) -> Result<Self> {
        let mc = ws.model_config(mc_name)?;
        let pdf_name = mc
            .pdf()
            .ok_or_else(|| {
                Error::Validation(format!("model config '{}' has no density", mc_name))
            })?
            .to_string();
        let dataset = ws.dataset(data_name)?;
        let deps = ws.pdf_dependencies(&pdf_name)?;
        let observables: BTreeSet<&str> =
            mc.observables().into_iter().flatten().map(String::as_str).collect();

        let base: Vec<f64> = ws.parameters().iter().map(|p| p.value()).collect();

        let mut free = Vec::new();
        let mut free_names = Vec::new();
        let mut bounds = Vec::new();
        let mut init = Vec::new();
        for (idx, p) in ws.parameters().iter().enumerate() {
            if p.is_constant() || observables.contains(p.name()) || !deps.contains(p.name()) {
                continue;
            }
            free.push(idx);
            free_names.push(p.name().to_string());
            bounds.push((p.min(), p.max()));
            init.push(p.value());
        }
        let free_set: BTreeSet<usize> = free.iter().copied().collect();

        // Walk the density graph, collecting channels and constraint terms.
        let mut channels = Vec::new();
        let mut constraints = Vec::new();
        let mut pending = vec![pdf_name];
        let mut visited = BTreeSet::new();
        while let Some(name) = pending.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let pdf = ws.pdf(&name).ok_or_else(|| Error::not_found("pdf", &name))?;
            match pdf.kind() {
                PdfKind::Product { factors } => pending.extend(factors.iter().cloned()),
                PdfKind::TemplateSum { observable, coefficients, templates } => {
                    let observed = dataset.column(observable).ok_or_else(|| {
                        Error::Computation(format!(
                            "dataset '{}' has no column '{}'",
                            data_name, observable
                        ))
                    })?;
                    for t in templates {
                        if t.len() != observed.len() {
                            return Err(Error::Validation(format!(
                                "pdf '{}': template has {} bins, dataset column '{}' has {}",
                                name,
                                t.len(),
                                observable,
                                observed.len()
                            )));
                        }
                    }
                    let coefs = coefficients
                        .iter()
                        .map(|c| resolve_coef(ws, c))
                        .collect::<Result<Vec<_>>>()?;
                    channels.push(Channel {
                        name: name.clone(),
                        observed: observed.to_vec(),
                        coefs,
                        templates: templates.clone(),
                        ln_factorial: None,
                    });
                }
                PdfKind::Gaussian { x, mean, sigma } => {
                    let x = ws
                        .param_position(x)
                        .ok_or_else(|| Error::not_found("parameter", x.clone()))?;
                    let mean = match mean {
                        Mean::Param(m) => MeanRef::Param(
                            ws.param_position(m)
                                .ok_or_else(|| Error::not_found("parameter", m.clone()))?,
                        ),
                        Mean::Value(v) => MeanRef::Literal(*v),
                    };
                    constraints.push(Constraint { x, mean, sigma: *sigma });
                }
            }
        }

        if options.opt_const >= 1 {
            for c in &mut channels {
                c.ln_factorial = Some(c.observed_ln_factorial());
            }
        }

        // Fully-constant terms contribute a fixed value; fold them once.
        let mut folded = 0.0;
        if options.opt_const >= 2 {
            channels.retain(|c| {
                let depends_on_free = c
                    .coefs
                    .iter()
                    .flat_map(|coef| coef.param_indices())
                    .any(|i| free_set.contains(i));
                if depends_on_free {
                    true
                } else {
                    log::debug!("folding constant channel '{}'", c.name);
                    folded += c.nll(&base);
                    false
                }
            });
            constraints.retain(|c| {
                let mean_free = matches!(c.mean, MeanRef::Param(i) if free_set.contains(&i));
                if free_set.contains(&c.x) || mean_free {
                    true
                } else {
                    folded += c.nll(&base);
                    false
                }
            });
        }

        Ok(NllFunction {
            base,
            free,
            free_names,
            bounds,
            init,
            channels,
            constraints,
            folded,
            parallel: options.num_cpu > 1,
            offset: options.offset.then(OnceLock::new),
        })
    }

    /// Number of floating parameters.
    pub fn dim(&self) -> usize {
        self.free.len()
    }

    /// Bounds of the floating parameters.
    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    /// Starting values of the floating parameters.
    pub fn init(&self) -> &[f64] {
        &self.init
    }

    /// Names of the floating parameters, in slot order.
    pub fn free_names(&self) -> &[String] {
        &self.free_names
    }

    /// Slot of a floating parameter by name.
    pub fn free_slot(&self, name: &str) -> Option<usize> {
        self.free_names.iter().position(|n| n == name)
    }

    /// Write fitted values back into the workspace.
    pub fn write_back(&self, ws: &mut Workspace, values: &[f64]) {
        for (name, &value) in self.free_names.iter().zip(values) {
            if let Some(p) = ws.var_mut(name) {
                p.set_value(value);
            }
        }
    }

    fn value(&self, free_values: &[f64]) -> Result<f64> {
        if free_values.len() != self.free.len() {
            return Err(Error::Computation(format!(
                "expected {} parameter values, got {}",
                self.free.len(),
                free_values.len()
            )));
        }
        let mut table = self.base.clone();
        for (slot, &idx) in self.free.iter().enumerate() {
            table[idx] = free_values[slot];
        }
        let channel_sum: f64 = if self.parallel {
            self.channels.par_iter().map(|c| c.nll(&table)).sum()
        } else {
            self.channels.iter().map(|c| c.nll(&table)).sum()
        };
        let constraint_sum: f64 = self.constraints.iter().map(|c| c.nll(&table)).sum();
        Ok(channel_sum + constraint_sum + self.folded)
    }
}

impl ObjectiveFunction for NllFunction {
    fn eval(&self, params: &[f64]) -> Result<f64> {
        let raw = self.value(params)?;
        match &self.offset {
            Some(reference) => Ok(raw - reference.get_or_init(|| raw)),
            None => Ok(raw),
        }
    }
}

fn resolve_coef(ws: &Workspace, name: &str) -> Result<Coef> {
    if let Some(idx) = ws.param_position(name) {
        return Ok(Coef::Param(idx));
    }
    if ws.is_function(name) {
        let mut ids = Vec::new();
        flatten_function(ws, name, &mut ids, &mut BTreeSet::new())?;
        return Ok(Coef::Product(ids));
    }
    Err(Error::not_found("parameter", name))
}

fn flatten_function(
    ws: &Workspace,
    name: &str,
    ids: &mut Vec<usize>,
    stack: &mut BTreeSet<String>,
) -> Result<()> {
    if !stack.insert(name.to_string()) {
        return Err(Error::Validation(format!("function '{}' is part of a cycle", name)));
    }
    let f = ws
        .function(name)
        .ok_or_else(|| Error::not_found("function", name))?;
    for factor in f.factors() {
        match ws.param_position(factor) {
            Some(idx) => ids.push(idx),
            None => flatten_function(ws, factor, ids, stack)?,
        }
    }
    stack.remove(name);
    Ok(())
}
