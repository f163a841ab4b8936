//! Persisted workspace store (JSON schema types)

use pf_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A workspace store file: a list of named workspaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreFile {
    /// Schema version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Workspaces in this store
    pub workspaces: Vec<WorkspaceDef>,
}

impl StoreFile {
    /// Read a store from a JSON file.
    pub fn read(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Write the store to a JSON file (pretty-printed).
    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Look up a workspace definition by name.
    pub fn workspace(&self, name: &str) -> Result<&WorkspaceDef> {
        self.workspaces
            .iter()
            .find(|w| w.name == name)
            .ok_or_else(|| Error::not_found("workspace", name))
    }
}

/// One named workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceDef {
    /// Workspace name
    pub name: String,
    /// Real-valued parameters (observables included)
    pub parameters: Vec<ParameterDef>,
    /// Derived quantities
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<FunctionDef>,
    /// Density components
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pdfs: Vec<PdfDef>,
    /// Model configurations (parameter partitions)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub model_configs: Vec<ModelConfigDef>,
    /// Datasets (binned observed counts per observable column)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasets: Vec<DatasetDef>,
    /// Saved parameter snapshots
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snapshots: Vec<SnapshotDef>,
}

/// Real-valued parameter definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name
    pub name: String,
    /// Current value
    pub value: f64,
    /// Range lower bound
    pub min: f64,
    /// Range upper bound
    pub max: f64,
    /// Constancy flag
    #[serde(default)]
    pub constant: bool,
    /// Symmetric error, if known
    #[serde(default)]
    pub error: f64,
    /// Free-form attribute tags (e.g. `allowFloat`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<String>,
}

/// Derived quantity definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FunctionDef {
    /// Product of the named inputs (parameters or other functions).
    #[serde(rename = "product")]
    Product {
        /// Function name
        name: String,
        /// Input names
        factors: Vec<String>,
    },
}

/// Density component definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PdfDef {
    /// Binned sum of templates over one observable.
    #[serde(rename = "template_sum")]
    TemplateSum {
        /// Pdf name
        name: String,
        /// Observable (a parameter name; the dataset column key)
        observable: String,
        /// Coefficient names, one per template (parameter or function)
        coefficients: Vec<String>,
        /// Per-template expected counts per bin
        templates: Vec<Vec<f64>>,
    },
    /// Gaussian constraint term on a parameter.
    #[serde(rename = "gaussian")]
    Gaussian {
        /// Pdf name
        name: String,
        /// Constrained parameter name
        x: String,
        /// Constraint center: a parameter name (typically a global
        /// observable) or a literal value
        mean: MeanDef,
        /// Constraint width
        sigma: f64,
    },
    /// Product of named sub-pdfs.
    #[serde(rename = "product")]
    Product {
        /// Pdf name
        name: String,
        /// Factor pdf names
        factors: Vec<String>,
    },
}

/// Constraint center: a named parameter or a literal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeanDef {
    /// Named parameter
    Param(String),
    /// Literal value
    Value(f64),
}

/// Model configuration: the top density and the four parameter partitions.
///
/// Absent partitions are distinct from empty ones; the model checks treat a
/// missing observables or POI partition as a structural failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfigDef {
    /// Model config name
    pub name: String,
    /// Top-level density name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf: Option<String>,
    /// Observables partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observables: Option<Vec<String>>,
    /// Parameters-of-interest partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pois: Option<Vec<String>>,
    /// Nuisance-parameter partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nuisances: Option<Vec<String>>,
    /// Global-observable partition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub globals: Option<Vec<String>>,
}

/// Dataset definition: binned counts keyed by observable name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDef {
    /// Dataset name
    pub name: String,
    /// Observed counts per observable column
    pub columns: BTreeMap<String, Vec<f64>>,
}

/// Snapshot definition: a full capture of parameter state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotDef {
    /// Snapshot name
    pub name: String,
    /// Captured state per parameter
    pub values: BTreeMap<String, SnapshotValueDef>,
}

/// Captured state of one parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotValueDef {
    /// Value at capture time
    pub value: f64,
    /// Range lower bound
    pub min: f64,
    /// Range upper bound
    pub max: f64,
    /// Constancy flag
    pub constant: bool,
    /// Symmetric error
    #[serde(default)]
    pub error: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdf_def_roundtrip() {
        let json = r#"{
            "type": "template_sum",
            "name": "chan",
            "observable": "obs",
            "coefficients": ["mu", "bkg_yield"],
            "templates": [[5.0, 10.0], [50.0, 50.0]]
        }"#;
        let pdf: PdfDef = serde_json::from_str(json).unwrap();
        match &pdf {
            PdfDef::TemplateSum { coefficients, templates, .. } => {
                assert_eq!(coefficients.len(), 2);
                assert_eq!(templates[1], vec![50.0, 50.0]);
            }
            other => panic!("unexpected pdf kind: {:?}", other),
        }
        let back = serde_json::to_string(&pdf).unwrap();
        assert!(back.contains("\"template_sum\""));
    }

    #[test]
    fn test_mean_def_accepts_name_or_literal() {
        let named: MeanDef = serde_json::from_str("\"nom_alpha\"").unwrap();
        assert!(matches!(named, MeanDef::Param(ref n) if n == "nom_alpha"));
        let literal: MeanDef = serde_json::from_str("0.5").unwrap();
        assert!(matches!(literal, MeanDef::Value(v) if v == 0.5));
    }

    #[test]
    fn test_store_lookup_not_found() {
        let store = StoreFile { version: None, workspaces: vec![] };
        let err = store.workspace("combWS").unwrap_err();
        assert!(err.to_string().contains("workspace 'combWS' not found"));
    }
}
