//! Pre-fit parameter preparation
//!
//! Applies partition defaulting, the fix-list for nuisance parameters and
//! the POI directive mini-language (`name`, `name=value`,
//! `name=value_low_high`) before the minimization runs.

use crate::workspace::{Parameter, Workspace};
use pf_core::{Error, Result};
use std::str::FromStr;

/// Parsed form of one POI directive token.
///
/// `value` without `range` fixes the parameter; `value` with `range` floats
/// it; neither floats it at its current state.
#[derive(Debug, Clone, PartialEq)]
pub struct PoiDirective {
    /// Target parameter name
    pub name: String,
    /// Central value, if given
    pub value: Option<f64>,
    /// Range `[low, high]`, if given
    pub range: Option<(f64, f64)>,
}

impl FromStr for PoiDirective {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('=');
        let name = parts.next().unwrap_or("").trim();
        if name.is_empty() {
            return Err(Error::Parse(format!("empty parameter name in directive '{}'", s)));
        }
        let spec = match parts.next() {
            None => return Ok(PoiDirective { name: name.to_string(), value: None, range: None }),
            Some(spec) => spec,
        };
        if parts.next().is_some() {
            return Err(Error::Parse(format!("more than one '=' in directive '{}'", s)));
        }

        let parse = |tok: &str| -> Result<f64> {
            tok.trim()
                .parse::<f64>()
                .map_err(|_| Error::Parse(format!("bad number '{}' in directive '{}'", tok, s)))
        };

        let tokens: Vec<&str> = spec.split('_').collect();
        match tokens.as_slice() {
            [value] => Ok(PoiDirective {
                name: name.to_string(),
                value: Some(parse(value)?),
                range: None,
            }),
            [value, low, high] => Ok(PoiDirective {
                name: name.to_string(),
                value: Some(parse(value)?),
                range: Some((parse(low)?, parse(high)?)),
            }),
            _ => Err(Error::Parse(format!(
                "directive '{}' must be 'name', 'name=value' or 'name=value_low_high'",
                s
            ))),
        }
    }
}

/// Apply a directive to its target parameter.
///
/// Fixing at a value outside the current range widens the offending bound
/// (to `2*value` above the maximum, to `-2*|value|` below the minimum) so
/// the fixed value never sits outside its allowed range.
pub fn apply_directive(param: &mut Parameter, directive: &PoiDirective) {
    match (directive.value, directive.range) {
        (Some(value), Some((low, high))) => {
            param.set_range(low, high);
            param.set_value(value);
            param.set_constant(false);
        }
        (Some(value), None) => {
            if value > param.max() {
                param.set_range(param.min(), 2.0 * value);
            }
            if value < param.min() {
                param.set_range(-2.0 * value.abs(), param.max());
            }
            param.set_value(value);
            param.set_constant(true);
        }
        (None, _) => {
            param.set_constant(false);
        }
    }
}

/// Partition defaulting before the fit: global observables held constant,
/// nuisance parameters floated, POIs frozen until explicitly requested.
pub fn apply_partition_defaults(ws: &mut Workspace, mc_name: &str) -> Result<()> {
    let mc = ws.model_config(mc_name)?.clone();
    for (names, constant) in [
        (mc.globals(), true),
        (mc.nuisances(), false),
        (mc.pois(), true),
    ] {
        for name in names.into_iter().flatten() {
            if let Some(p) = ws.var_mut(name) {
                p.set_constant(constant);
            }
        }
    }
    Ok(())
}

/// Fix every nuisance parameter matched by the comma-separated wildcard
/// patterns (`*` and `?`). Patterns that match nothing are a no-op.
pub fn fix_nuisances(ws: &mut Workspace, mc_name: &str, patterns: &str) -> Result<()> {
    let nps: Vec<String> = ws
        .model_config(mc_name)?
        .nuisances()
        .into_iter()
        .flatten()
        .cloned()
        .collect();
    for pattern in patterns.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        for np in nps.iter().filter(|np| name_matches(pattern, np)) {
            if let Some(p) = ws.var_mut(np) {
                tracing::info!("Fixing nuisance parameter {}", np);
                p.set_constant(true);
            }
        }
    }
    Ok(())
}

/// Prepare the fit-POI set.
///
/// With a directive list, each entry is parsed and applied; unknown names
/// and malformed entries are logged and skipped. Without one, the first
/// declared POI is floated and becomes the sole fit-POI. The model's POI
/// partition is then replaced with exactly the processed set.
pub fn prepare_pois(ws: &mut Workspace, mc_name: &str, spec: Option<&str>) -> Result<Vec<String>> {
    let mut fit_pois: Vec<String> = Vec::new();

    match spec {
        Some(spec) => {
            for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                let directive = match PoiDirective::from_str(token) {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::error!("skipping POI directive '{}': {}", token, e);
                        continue;
                    }
                };
                let Some(param) = ws.var_mut(&directive.name) else {
                    tracing::warn!("Variable {} not in workspace. Skipping.", directive.name);
                    continue;
                };
                apply_directive(param, &directive);
                tracing::info!(
                    "   {} = {} [{}, {}]{}",
                    directive.name,
                    param.value(),
                    param.min(),
                    param.max(),
                    if param.is_constant() { " (fixed)" } else { "" }
                );
                if !fit_pois.contains(&directive.name) {
                    fit_pois.push(directive.name);
                }
            }
        }
        None => {
            let first = ws
                .model_config(mc_name)?
                .pois()
                .and_then(|pois| pois.first())
                .cloned()
                .ok_or_else(|| {
                    Error::Validation(format!(
                        "model config '{}' has no parameters of interest",
                        mc_name
                    ))
                })?;
            tracing::info!("No POIs specified. Will only float the first POI {}", first);
            if let Some(p) = ws.var_mut(&first) {
                p.set_constant(false);
            }
            fit_pois.push(first);
        }
    }

    ws.model_config_mut(mc_name)?.set_pois(fit_pois.clone());
    Ok(fit_pois)
}

/// Wildcard name match: `*` matches any run of characters, `?` any single
/// character, everything else literally.
fn name_matches(pattern: &str, name: &str) -> bool {
    fn rec(pattern: &[u8], name: &[u8]) -> bool {
        match pattern.split_first() {
            None => name.is_empty(),
            Some((b'*', rest)) => (0..=name.len()).any(|i| rec(rest, &name[i..])),
            Some((b'?', rest)) => !name.is_empty() && rec(rest, &name[1..]),
            Some((&c, rest)) => name.first() == Some(&c) && rec(rest, &name[1..]),
        }
    }
    rec(pattern.as_bytes(), name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::StoreFile;

    fn test_workspace() -> Workspace {
        let json = r#"{
            "workspaces": [{
                "name": "combWS",
                "parameters": [
                    {"name": "obs_sr", "value": 0.0, "min": 0.0, "max": 2.0, "constant": true},
                    {"name": "mu", "value": 0.0, "min": -10.0, "max": 10.0, "constant": true},
                    {"name": "xs_ttbar", "value": 1.0, "min": 0.0, "max": 5.0, "constant": true},
                    {"name": "alpha_jes", "value": 0.0, "min": -5.0, "max": 5.0, "constant": true},
                    {"name": "alpha_lumi", "value": 0.0, "min": -5.0, "max": 5.0},
                    {"name": "nom_alpha_jes", "value": 0.0, "min": -5.0, "max": 5.0}
                ],
                "model_configs": [
                    {"name": "ModelConfig", "pdf": "model_sr",
                     "observables": ["obs_sr"], "pois": ["mu", "xs_ttbar"],
                     "nuisances": ["alpha_jes", "alpha_lumi"],
                     "globals": ["nom_alpha_jes"]}
                ]
            }]
        }"#;
        let store: StoreFile = serde_json::from_str(json).unwrap();
        Workspace::from_store(&store, "combWS").unwrap()
    }

    #[test]
    fn test_directive_name_only_floats() {
        let d: PoiDirective = "mu".parse().unwrap();
        assert_eq!(d, PoiDirective { name: "mu".to_string(), value: None, range: None });
    }

    #[test]
    fn test_directive_fix_at_value() {
        let d: PoiDirective = "mu=1.5".parse().unwrap();
        assert_eq!(d.value, Some(1.5));
        assert_eq!(d.range, None);
    }

    #[test]
    fn test_directive_value_and_range() {
        let d: PoiDirective = "mu=1.5_0_5".parse().unwrap();
        assert_eq!(d.value, Some(1.5));
        assert_eq!(d.range, Some((0.0, 5.0)));
    }

    #[test]
    fn test_directive_malformed_token_counts_fail() {
        assert!("mu=1_2".parse::<PoiDirective>().is_err());
        assert!("mu=1_2_3_4".parse::<PoiDirective>().is_err());
        assert!("mu=1=2".parse::<PoiDirective>().is_err());
        assert!("mu=abc".parse::<PoiDirective>().is_err());
        assert!("=1".parse::<PoiDirective>().is_err());
    }

    #[test]
    fn test_fix_directive_widens_max() {
        // value above max: max extended to 2*value, min untouched
        let mut ws = test_workspace();
        let p = ws.var_mut("mu").unwrap();
        apply_directive(p, &"mu=20".parse().unwrap());
        assert!(p.is_constant());
        assert_eq!(p.value(), 20.0);
        assert_eq!(p.min(), -10.0);
        assert_eq!(p.max(), 40.0);
    }

    #[test]
    fn test_fix_directive_widens_min() {
        // value below min: min extended to -2*|value|, max untouched
        let mut ws = test_workspace();
        let p = ws.var_mut("mu").unwrap();
        apply_directive(p, &"mu=-15".parse().unwrap());
        assert!(p.is_constant());
        assert_eq!(p.value(), -15.0);
        assert_eq!(p.min(), -30.0);
        assert_eq!(p.max(), 10.0);
    }

    #[test]
    fn test_fix_directive_inside_range_keeps_bounds() {
        let mut ws = test_workspace();
        let p = ws.var_mut("mu").unwrap();
        apply_directive(p, &"mu=1.5".parse().unwrap());
        assert!(p.is_constant());
        assert_eq!(p.value(), 1.5);
        assert_eq!((p.min(), p.max()), (-10.0, 10.0));
    }

    #[test]
    fn test_float_directive_overrides_prior_state() {
        // initially constant at 0 with range [-10, 10]
        let mut ws = test_workspace();
        let p = ws.var_mut("mu").unwrap();
        apply_directive(p, &"mu=1.5_0_5".parse().unwrap());
        assert!(!p.is_constant());
        assert_eq!(p.value(), 1.5);
        assert_eq!((p.min(), p.max()), (0.0, 5.0));
    }

    #[test]
    fn test_partition_defaults() {
        let mut ws = test_workspace();
        apply_partition_defaults(&mut ws, "ModelConfig").unwrap();
        assert!(ws.var("nom_alpha_jes").unwrap().is_constant());
        assert!(!ws.var("alpha_jes").unwrap().is_constant());
        assert!(!ws.var("alpha_lumi").unwrap().is_constant());
        assert!(ws.var("mu").unwrap().is_constant());
        assert!(ws.var("xs_ttbar").unwrap().is_constant());
    }

    #[test]
    fn test_fix_nuisances_wildcard() {
        let mut ws = test_workspace();
        apply_partition_defaults(&mut ws, "ModelConfig").unwrap();
        fix_nuisances(&mut ws, "ModelConfig", "alpha_*").unwrap();
        assert!(ws.var("alpha_jes").unwrap().is_constant());
        assert!(ws.var("alpha_lumi").unwrap().is_constant());
    }

    #[test]
    fn test_fix_nuisances_no_match_is_noop() {
        let mut ws = test_workspace();
        apply_partition_defaults(&mut ws, "ModelConfig").unwrap();
        fix_nuisances(&mut ws, "ModelConfig", "gamma_*").unwrap();
        assert!(!ws.var("alpha_jes").unwrap().is_constant());
        assert!(!ws.var("alpha_lumi").unwrap().is_constant());
    }

    #[test]
    fn test_prepare_pois_default_floats_first_poi_only() {
        let mut ws = test_workspace();
        apply_partition_defaults(&mut ws, "ModelConfig").unwrap();
        let fit_pois = prepare_pois(&mut ws, "ModelConfig", None).unwrap();
        assert_eq!(fit_pois, vec!["mu".to_string()]);
        assert!(!ws.var("mu").unwrap().is_constant());
        assert!(ws.var("xs_ttbar").unwrap().is_constant());
        // POI partition replaced with exactly the processed set
        let pois = ws.model_config("ModelConfig").unwrap().pois().unwrap().to_vec();
        assert_eq!(pois, vec!["mu".to_string()]);
    }

    #[test]
    fn test_prepare_pois_directives_replace_partition() {
        let mut ws = test_workspace();
        apply_partition_defaults(&mut ws, "ModelConfig").unwrap();
        let fit_pois =
            prepare_pois(&mut ws, "ModelConfig", Some("xs_ttbar=1.2_0_5,mu=0")).unwrap();
        assert_eq!(fit_pois, vec!["xs_ttbar".to_string(), "mu".to_string()]);
        let pois = ws.model_config("ModelConfig").unwrap().pois().unwrap().to_vec();
        assert_eq!(pois, fit_pois);
        assert!(!ws.var("xs_ttbar").unwrap().is_constant());
        assert!(ws.var("mu").unwrap().is_constant());
        assert_eq!(ws.var("mu").unwrap().value(), 0.0);
    }

    #[test]
    fn test_prepare_pois_unknown_name_skipped() {
        let mut ws = test_workspace();
        apply_partition_defaults(&mut ws, "ModelConfig").unwrap();
        let fit_pois = prepare_pois(&mut ws, "ModelConfig", Some("nope=1,mu")).unwrap();
        assert_eq!(fit_pois, vec!["mu".to_string()]);
    }

    #[test]
    fn test_prepare_pois_malformed_entry_skipped() {
        let mut ws = test_workspace();
        apply_partition_defaults(&mut ws, "ModelConfig").unwrap();
        let fit_pois = prepare_pois(&mut ws, "ModelConfig", Some("mu=1_2,xs_ttbar")).unwrap();
        assert_eq!(fit_pois, vec!["xs_ttbar".to_string()]);
        // the malformed entry left its target untouched
        assert!(ws.var("mu").unwrap().is_constant());
        assert_eq!(ws.var("mu").unwrap().value(), 0.0);
    }

    #[test]
    fn test_name_matches() {
        assert!(name_matches("alpha_*", "alpha_jes"));
        assert!(name_matches("*", "anything"));
        assert!(name_matches("alpha_?es", "alpha_jes"));
        assert!(!name_matches("alpha_?", "alpha_jes"));
        assert!(!name_matches("beta_*", "alpha_jes"));
        assert!(name_matches("mu", "mu"));
    }
}
