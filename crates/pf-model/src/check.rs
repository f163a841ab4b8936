//! Structural sanity checks for a partitioned model
//!
//! Mirrors the pre-fit workspace check: every partition member is verified
//! against the density's dependency closure, with graded severity. Hard
//! failures accumulate into the returned validity; density-independent
//! nuisance parameters are removed from their partition rather than failing
//! the model.

use crate::workspace::Workspace;
use pf_core::{Error, Result};
use std::collections::BTreeSet;

/// Validate the named model config against its density.
///
/// Returns `Ok(true)` iff no hard failure occurred. A missing density is
/// fatal and raises immediately regardless of `throw_on_fail`. With
/// `throw_on_fail` set, an invalid model raises with the accumulated error
/// text instead of returning `Ok(false)`.
///
/// Side effect: nuisance parameters the density does not depend on are
/// removed from the nuisance partition (with a warning), so that they are
/// not constrained later.
pub fn check_model(ws: &mut Workspace, mc_name: &str, throw_on_fail: bool) -> Result<bool> {
    let mc = ws.model_config(mc_name)?.clone();

    // A model without a density is unusable; this is the one unconditionally
    // fatal condition.
    let pdf_name = match mc.pdf() {
        Some(name) if ws.pdf(name).is_some() => name.to_string(),
        _ => {
            return Err(Error::Validation(format!(
                "model config '{}' has no density",
                mc_name
            )))
        }
    };
    let deps = ws.pdf_dependencies(&pdf_name)?;

    let mut ok = true;
    let mut lines: Vec<String> = Vec::new();
    let mut allowed_to_float: BTreeSet<String> = BTreeSet::new();

    let error = |lines: &mut Vec<String>, ok: &mut bool, msg: String| {
        tracing::error!("{}", msg);
        lines.push(format!("ERROR: {}", msg));
        *ok = false;
    };
    let warn = |lines: &mut Vec<String>, msg: String| {
        tracing::warn!("{}", msg);
        lines.push(format!("WARNING: {}", msg));
    };

    // Observables
    match mc.observables() {
        None => {
            error(&mut lines, &mut ok, "model does not define observables".to_string());
            let text = lines.join("\n");
            if throw_on_fail {
                return Err(Error::Validation(text));
            }
            return Ok(false);
        }
        Some(obs) => {
            allowed_to_float.extend(obs.iter().cloned());
        }
    }

    // Parameters of interest
    match mc.pois() {
        None => {
            error(&mut lines, &mut ok, "model does not define parameters of interest".to_string());
        }
        Some(pois) => {
            for name in pois {
                if ws.var(name).is_none() {
                    error(
                        &mut lines,
                        &mut ok,
                        format!("parameter of interest '{}' is not a real-valued parameter", name),
                    );
                    continue;
                }
                if !deps.contains(name) {
                    error(
                        &mut lines,
                        &mut ok,
                        format!("density does not depend on parameter of interest '{}'", name),
                    );
                    continue;
                }
                allowed_to_float.insert(name.clone());
            }
        }
    }

    // Nuisance parameters
    let mut removed_nps: Vec<String> = Vec::new();
    if let Some(nps) = mc.nuisances() {
        for name in nps {
            let param = match ws.var(name) {
                Some(p) => p,
                None => {
                    error(
                        &mut lines,
                        &mut ok,
                        format!("nuisance parameter '{}' is not a real-valued parameter", name),
                    );
                    continue;
                }
            };
            if param.is_constant() {
                error(&mut lines, &mut ok, format!("nuisance parameter '{}' is constant", name));
                continue;
            }
            if !deps.contains(name) {
                warn(
                    &mut lines,
                    format!("density does not depend on nuisance parameter, removing '{}'", name),
                );
                removed_nps.push(name.clone());
                continue;
            }
            allowed_to_float.insert(name.clone());
        }
    }

    // Global observables
    if let Some(gos) = mc.globals() {
        for name in gos {
            let param = match ws.var(name) {
                Some(p) => p,
                None => {
                    error(
                        &mut lines,
                        &mut ok,
                        format!("global observable '{}' is not a real-valued parameter", name),
                    );
                    continue;
                }
            };
            if !param.is_constant() {
                error(&mut lines, &mut ok, format!("global observable '{}' is not constant", name));
                continue;
            }
            if !deps.contains(name) {
                warn(&mut lines, format!("density does not depend on global observable '{}'", name));
            }
        }
    }

    // Remaining free density parameters: warn about anything that floats but
    // belongs to no partition and carries no allowFloat tag.
    let observables: BTreeSet<&str> =
        mc.observables().into_iter().flatten().map(String::as_str).collect();
    for name in &deps {
        if observables.contains(name.as_str()) || allowed_to_float.contains(name) {
            continue;
        }
        if let Some(param) = ws.var(name) {
            if param.is_constant() || param.has_attribute("allowFloat") {
                continue;
            }
            warn(
                &mut lines,
                format!(
                    "density parameter '{}' is not allowed to float \
                     (not a nuisance, POI, observable or global observable)",
                    name
                ),
            );
        }
    }

    for name in &removed_nps {
        ws.model_config_mut(mc_name)?.remove_nuisance(name);
    }

    if !ok && throw_on_fail {
        return Err(Error::Validation(lines.join("\n")));
    }
    Ok(ok)
}
