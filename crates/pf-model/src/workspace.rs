//! Runtime workspace representation
//!
//! Converts the persisted store definitions into a flat parameter table with
//! name lookups, plus named model configs, datasets and snapshots. Parameter
//! partitions are kept as ordered name lists so that set membership never
//! aliases mutable parameter state.

use crate::schema::{
    DatasetDef, FunctionDef, MeanDef, ModelConfigDef, ParameterDef, PdfDef, SnapshotDef,
    SnapshotValueDef, StoreFile, WorkspaceDef,
};
use pf_core::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A named real-valued quantity with a range and a constancy flag.
#[derive(Debug, Clone)]
pub struct Parameter {
    name: String,
    value: f64,
    min: f64,
    max: f64,
    constant: bool,
    error: f64,
    asym_errors: Option<(f64, f64)>,
    attributes: BTreeSet<String>,
}

impl Parameter {
    fn from_def(def: &ParameterDef) -> Result<Self> {
        if def.min > def.max {
            return Err(Error::Validation(format!(
                "parameter '{}' has inverted range [{}, {}]",
                def.name, def.min, def.max
            )));
        }
        let mut p = Parameter {
            name: def.name.clone(),
            value: def.value,
            min: def.min,
            max: def.max,
            constant: def.constant,
            error: def.error,
            asym_errors: None,
            attributes: def.attributes.iter().cloned().collect(),
        };
        p.clamp_value();
        Ok(p)
    }

    fn to_def(&self) -> ParameterDef {
        ParameterDef {
            name: self.name.clone(),
            value: self.value,
            min: self.min,
            max: self.max,
            constant: self.constant,
            error: self.error,
            attributes: self.attributes.iter().cloned().collect(),
        }
    }

    fn clamp_value(&mut self) {
        let clamped = self.value.clamp(self.min, self.max);
        if clamped != self.value {
            tracing::warn!(
                "value {} of '{}' outside range [{}, {}], clamping",
                self.value,
                self.name,
                self.min,
                self.max
            );
            self.value = clamped;
        }
    }

    /// Parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Range lower bound.
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Range upper bound.
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Constancy flag.
    pub fn is_constant(&self) -> bool {
        self.constant
    }

    /// Symmetric error.
    pub fn error(&self) -> f64 {
        self.error
    }

    /// Asymmetric errors `(lo, hi)` with `lo <= 0`, when a profiling pass ran.
    pub fn asym_errors(&self) -> Option<(f64, f64)> {
        self.asym_errors
    }

    /// Whether the parameter carries the given attribute tag.
    pub fn has_attribute(&self, attr: &str) -> bool {
        self.attributes.contains(attr)
    }

    /// Set the value, clamping into the current range.
    pub fn set_value(&mut self, value: f64) {
        self.value = value;
        self.clamp_value();
    }

    /// Set the range; the current value is re-clamped into it.
    pub fn set_range(&mut self, min: f64, max: f64) {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        self.min = min;
        self.max = max;
        self.clamp_value();
    }

    /// Set the constancy flag.
    pub fn set_constant(&mut self, constant: bool) {
        self.constant = constant;
    }

    /// Set the symmetric error.
    pub fn set_error(&mut self, error: f64) {
        self.error = error;
    }

    /// Set asymmetric errors `(lo, hi)` with `lo <= 0`.
    pub fn set_asym_errors(&mut self, lo: f64, hi: f64) {
        self.asym_errors = Some((lo, hi));
    }
}

/// A derived quantity: the product of its input names.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    factors: Vec<String>,
}

impl Function {
    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Input names (parameters or other functions).
    pub fn factors(&self) -> &[String] {
        &self.factors
    }
}

/// Constraint center: a named parameter or a literal.
#[derive(Debug, Clone)]
pub enum Mean {
    /// Named parameter
    Param(String),
    /// Literal value
    Value(f64),
}

/// Density component kinds.
#[derive(Debug, Clone)]
pub enum PdfKind {
    /// Binned sum of templates over one observable.
    TemplateSum {
        /// Observable name (dataset column key)
        observable: String,
        /// Coefficient names, one per template
        coefficients: Vec<String>,
        /// Per-template expected counts per bin
        templates: Vec<Vec<f64>>,
    },
    /// Gaussian constraint term on a parameter.
    Gaussian {
        /// Constrained parameter name
        x: String,
        /// Constraint center
        mean: Mean,
        /// Constraint width
        sigma: f64,
    },
    /// Product of named sub-pdfs.
    Product {
        /// Factor pdf names
        factors: Vec<String>,
    },
}

/// A named density component.
#[derive(Debug, Clone)]
pub struct Pdf {
    name: String,
    kind: PdfKind,
    binned_hint: bool,
}

impl Pdf {
    /// Pdf name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pdf kind.
    pub fn kind(&self) -> &PdfKind {
        &self.kind
    }

    /// Whether this pdf is a binned sum of templates.
    pub fn is_template_sum(&self) -> bool {
        matches!(self.kind, PdfKind::TemplateSum { .. })
    }

    /// Binned-likelihood evaluation hint (performance only).
    pub fn binned_hint(&self) -> bool {
        self.binned_hint
    }

    /// Mark this pdf for binned-likelihood evaluation.
    pub fn set_binned_hint(&mut self, hint: bool) {
        self.binned_hint = hint;
    }
}

/// Model configuration: top density name plus the four partitions.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    name: String,
    pdf: Option<String>,
    observables: Option<Vec<String>>,
    pois: Option<Vec<String>>,
    nuisances: Option<Vec<String>>,
    globals: Option<Vec<String>>,
}

impl ModelConfig {
    /// Model config name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Top density name, if defined.
    pub fn pdf(&self) -> Option<&str> {
        self.pdf.as_deref()
    }

    /// Observables partition, if defined.
    pub fn observables(&self) -> Option<&[String]> {
        self.observables.as_deref()
    }

    /// Parameters-of-interest partition, if defined.
    pub fn pois(&self) -> Option<&[String]> {
        self.pois.as_deref()
    }

    /// Nuisance-parameter partition, if defined.
    pub fn nuisances(&self) -> Option<&[String]> {
        self.nuisances.as_deref()
    }

    /// Global-observable partition, if defined.
    pub fn globals(&self) -> Option<&[String]> {
        self.globals.as_deref()
    }

    /// Replace the POI partition.
    pub fn set_pois(&mut self, pois: Vec<String>) {
        self.pois = Some(pois);
    }

    /// Remove a parameter from the nuisance partition.
    pub fn remove_nuisance(&mut self, name: &str) {
        if let Some(nps) = self.nuisances.as_mut() {
            nps.retain(|n| n != name);
        }
    }
}

/// Binned observed counts per observable column.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    columns: BTreeMap<String, Vec<f64>>,
}

impl Dataset {
    /// Dataset name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Observed counts for one observable column.
    pub fn column(&self, observable: &str) -> Option<&[f64]> {
        self.columns.get(observable).map(Vec::as_slice)
    }
}

/// A runtime workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    name: String,
    params: Vec<Parameter>,
    param_index: HashMap<String, usize>,
    functions: Vec<Function>,
    function_index: HashMap<String, usize>,
    pdfs: Vec<Pdf>,
    pdf_index: HashMap<String, usize>,
    model_configs: Vec<ModelConfig>,
    datasets: Vec<Dataset>,
    snapshots: BTreeMap<String, BTreeMap<String, SnapshotValueDef>>,
}

impl Workspace {
    /// Build the runtime workspace from a store definition.
    pub fn from_def(def: &WorkspaceDef) -> Result<Self> {
        let mut params = Vec::with_capacity(def.parameters.len());
        let mut param_index = HashMap::new();
        for pd in &def.parameters {
            if param_index.insert(pd.name.clone(), params.len()).is_some() {
                return Err(Error::Validation(format!("duplicate parameter '{}'", pd.name)));
            }
            params.push(Parameter::from_def(pd)?);
        }

        let mut functions = Vec::with_capacity(def.functions.len());
        let mut function_index = HashMap::new();
        for fd in &def.functions {
            let FunctionDef::Product { name, factors } = fd;
            if param_index.contains_key(name)
                || function_index.insert(name.clone(), functions.len()).is_some()
            {
                return Err(Error::Validation(format!("duplicate object '{}'", name)));
            }
            functions.push(Function { name: name.clone(), factors: factors.clone() });
        }

        let mut pdfs = Vec::with_capacity(def.pdfs.len());
        let mut pdf_index = HashMap::new();
        for pd in &def.pdfs {
            let (name, kind) = match pd {
                PdfDef::TemplateSum { name, observable, coefficients, templates } => {
                    if coefficients.len() != templates.len() {
                        return Err(Error::Validation(format!(
                            "pdf '{}': {} coefficients but {} templates",
                            name,
                            coefficients.len(),
                            templates.len()
                        )));
                    }
                    (
                        name,
                        PdfKind::TemplateSum {
                            observable: observable.clone(),
                            coefficients: coefficients.clone(),
                            templates: templates.clone(),
                        },
                    )
                }
                PdfDef::Gaussian { name, x, mean, sigma } => {
                    let mean = match mean {
                        MeanDef::Param(p) => Mean::Param(p.clone()),
                        MeanDef::Value(v) => Mean::Value(*v),
                    };
                    (name, PdfKind::Gaussian { x: x.clone(), mean, sigma: *sigma })
                }
                PdfDef::Product { name, factors } => {
                    (name, PdfKind::Product { factors: factors.clone() })
                }
            };
            if pdf_index.insert(name.clone(), pdfs.len()).is_some() {
                return Err(Error::Validation(format!("duplicate pdf '{}'", name)));
            }
            pdfs.push(Pdf { name: name.clone(), kind, binned_hint: false });
        }

        let model_configs = def
            .model_configs
            .iter()
            .map(|mc| ModelConfig {
                name: mc.name.clone(),
                pdf: mc.pdf.clone(),
                observables: mc.observables.clone(),
                pois: mc.pois.clone(),
                nuisances: mc.nuisances.clone(),
                globals: mc.globals.clone(),
            })
            .collect();

        let datasets = def
            .datasets
            .iter()
            .map(|d| Dataset { name: d.name.clone(), columns: d.columns.clone() })
            .collect();

        let snapshots = def
            .snapshots
            .iter()
            .map(|s| (s.name.clone(), s.values.clone()))
            .collect();

        Ok(Workspace {
            name: def.name.clone(),
            params,
            param_index,
            functions,
            function_index,
            pdfs,
            pdf_index,
            model_configs,
            datasets,
            snapshots,
        })
    }

    /// Load a named workspace from a store.
    pub fn from_store(store: &StoreFile, name: &str) -> Result<Self> {
        Self::from_def(store.workspace(name)?)
    }

    /// Convert back to a store definition (snapshots included).
    pub fn to_def(&self) -> WorkspaceDef {
        WorkspaceDef {
            name: self.name.clone(),
            parameters: self.params.iter().map(Parameter::to_def).collect(),
            functions: self
                .functions
                .iter()
                .map(|f| FunctionDef::Product { name: f.name.clone(), factors: f.factors.clone() })
                .collect(),
            pdfs: self
                .pdfs
                .iter()
                .map(|p| match &p.kind {
                    PdfKind::TemplateSum { observable, coefficients, templates } => {
                        PdfDef::TemplateSum {
                            name: p.name.clone(),
                            observable: observable.clone(),
                            coefficients: coefficients.clone(),
                            templates: templates.clone(),
                        }
                    }
                    PdfKind::Gaussian { x, mean, sigma } => PdfDef::Gaussian {
                        name: p.name.clone(),
                        x: x.clone(),
                        mean: match mean {
                            Mean::Param(n) => MeanDef::Param(n.clone()),
                            Mean::Value(v) => MeanDef::Value(*v),
                        },
                        sigma: *sigma,
                    },
                    PdfKind::Product { factors } => {
                        PdfDef::Product { name: p.name.clone(), factors: factors.clone() }
                    }
                })
                .collect(),
            model_configs: self
                .model_configs
                .iter()
                .map(|mc| ModelConfigDef {
                    name: mc.name.clone(),
                    pdf: mc.pdf.clone(),
                    observables: mc.observables.clone(),
                    pois: mc.pois.clone(),
                    nuisances: mc.nuisances.clone(),
                    globals: mc.globals.clone(),
                })
                .collect(),
            datasets: self
                .datasets
                .iter()
                .map(|d| DatasetDef { name: d.name.clone(), columns: d.columns.clone() })
                .collect(),
            snapshots: self
                .snapshots
                .iter()
                .map(|(name, values)| SnapshotDef { name: name.clone(), values: values.clone() })
                .collect(),
        }
    }

    /// Workspace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All parameters, in definition order.
    pub fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    /// Look up a parameter by name.
    pub fn var(&self, name: &str) -> Option<&Parameter> {
        self.param_index.get(name).map(|&i| &self.params[i])
    }

    /// Position of a parameter in [`Workspace::parameters`] order.
    pub fn param_position(&self, name: &str) -> Option<usize> {
        self.param_index.get(name).copied()
    }

    /// Mutable parameter lookup.
    pub fn var_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        match self.param_index.get(name) {
            Some(&i) => Some(&mut self.params[i]),
            None => None,
        }
    }

    /// Whether the name refers to a derived function (composite, not a
    /// plain real-valued parameter).
    pub fn is_function(&self, name: &str) -> bool {
        self.function_index.contains_key(name)
    }

    /// Look up a function by name.
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.function_index.get(name).map(|&i| &self.functions[i])
    }

    /// All pdfs, in definition order.
    pub fn pdfs(&self) -> &[Pdf] {
        &self.pdfs
    }

    /// Mutable access to all pdfs.
    pub fn pdfs_mut(&mut self) -> &mut [Pdf] {
        &mut self.pdfs
    }

    /// Look up a pdf by name.
    pub fn pdf(&self, name: &str) -> Option<&Pdf> {
        self.pdf_index.get(name).map(|&i| &self.pdfs[i])
    }

    /// Look up a model config by name.
    pub fn model_config(&self, name: &str) -> Result<&ModelConfig> {
        self.model_configs
            .iter()
            .find(|mc| mc.name == name)
            .ok_or_else(|| Error::not_found("model config", name))
    }

    /// Mutable model config lookup.
    pub fn model_config_mut(&mut self, name: &str) -> Result<&mut ModelConfig> {
        self.model_configs
            .iter_mut()
            .find(|mc| mc.name == name)
            .ok_or_else(|| Error::not_found("model config", name))
    }

    /// Look up a dataset by name.
    pub fn dataset(&self, name: &str) -> Result<&Dataset> {
        self.datasets
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::not_found("dataset", name))
    }

    /// Capture the full parameter state under the given label, replacing any
    /// existing snapshot of that name.
    pub fn save_snapshot(&mut self, label: &str) {
        let values = self
            .params
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    SnapshotValueDef {
                        value: p.value,
                        min: p.min,
                        max: p.max,
                        constant: p.constant,
                        error: p.error,
                    },
                )
            })
            .collect();
        self.snapshots.insert(label.to_string(), values);
    }

    /// Restore parameter state from a named snapshot.
    pub fn load_snapshot(&mut self, label: &str) -> Result<()> {
        let values = self
            .snapshots
            .get(label)
            .ok_or_else(|| Error::not_found("snapshot", label))?
            .clone();
        for (name, v) in &values {
            if let Some(p) = self.var_mut(name) {
                p.min = v.min;
                p.max = v.max;
                p.value = v.value;
                p.constant = v.constant;
                p.error = v.error;
            }
        }
        Ok(())
    }

    /// Names of the real-valued parameters the named pdf depends on,
    /// transitively through product pdfs and derived functions.
    pub fn pdf_dependencies(&self, pdf_name: &str) -> Result<BTreeSet<String>> {
        let mut deps = BTreeSet::new();
        let mut visited = BTreeSet::new();
        self.collect_pdf_deps(pdf_name, &mut deps, &mut visited)?;
        Ok(deps)
    }

    fn collect_pdf_deps(
        &self,
        pdf_name: &str,
        deps: &mut BTreeSet<String>,
        visited: &mut BTreeSet<String>,
    ) -> Result<()> {
        if !visited.insert(pdf_name.to_string()) {
            return Ok(());
        }
        let pdf = self
            .pdf(pdf_name)
            .ok_or_else(|| Error::not_found("pdf", pdf_name))?;
        match &pdf.kind {
            PdfKind::TemplateSum { observable, coefficients, .. } => {
                self.collect_ref_deps(observable, deps)?;
                for c in coefficients {
                    self.collect_ref_deps(c, deps)?;
                }
            }
            PdfKind::Gaussian { x, mean, .. } => {
                self.collect_ref_deps(x, deps)?;
                if let Mean::Param(m) = mean {
                    self.collect_ref_deps(m, deps)?;
                }
            }
            PdfKind::Product { factors } => {
                for f in factors {
                    self.collect_pdf_deps(f, deps, visited)?;
                }
            }
        }
        Ok(())
    }

    /// Resolve a parameter-or-function reference down to leaf parameters.
    fn collect_ref_deps(&self, name: &str, deps: &mut BTreeSet<String>) -> Result<()> {
        let mut stack = BTreeSet::new();
        self.collect_ref_deps_inner(name, deps, &mut stack)
    }

    fn collect_ref_deps_inner(
        &self,
        name: &str,
        deps: &mut BTreeSet<String>,
        stack: &mut BTreeSet<String>,
    ) -> Result<()> {
        if self.param_index.contains_key(name) {
            deps.insert(name.to_string());
            return Ok(());
        }
        if let Some(f) = self.function(name) {
            if !stack.insert(name.to_string()) {
                return Err(Error::Validation(format!("function '{}' is part of a cycle", name)));
            }
            for factor in f.factors() {
                self.collect_ref_deps_inner(factor, deps, stack)?;
            }
            stack.remove(name);
            return Ok(());
        }
        Err(Error::not_found("parameter", name))
    }
}
