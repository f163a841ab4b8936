//! Post-fit reporting
//!
//! Pure presentation: the POI summary table, the colored status banner and
//! the persisted results record.

use pf_core::PoiEstimate;
use pf_model::workspace::Workspace;

const OK_GREEN: &str = "\x1b[92m";
const FAIL_RED: &str = "\x1b[91m";
const ENDC: &str = "\x1b[0m";

/// Print the fit summary: timing, status banner and one line per
/// non-constant POI.
pub fn print_summary(ws: &Workspace, fit_pois: &[String], status: i32, minutes: f64) {
    println!();
    println!("All fits done in {:.2} min (real)", minutes);

    let status_msg = if status != 0 {
        format!("{}STATUS FAILED{}", FAIL_RED, ENDC)
    } else {
        format!("{}STATUS OK{}", OK_GREEN, ENDC)
    };

    println!();
    println!("  Fit Summary of POIs ( {} )", status_msg);
    println!("------------------------------------------------");
    for name in fit_pois {
        let Some(param) = ws.var(name) else { continue };
        if param.is_constant() {
            continue;
        }
        match param.asym_errors() {
            Some((lo, hi)) => println!(
                "   {} = {:.4} +/- {:.4} ({:+.4}, {:+.4})",
                name,
                param.value(),
                param.error(),
                lo,
                hi
            ),
            None => println!("   {} = {:.4} +/- {:.4}", name, param.value(), param.error()),
        }
    }

    if status != 0 {
        println!("{}", FAIL_RED);
        println!("   *****************************************");
        println!("          WARNING: Fit status failed.       ");
        println!("   *****************************************{}", ENDC);
    }
    println!();
}

/// Build the persisted POI records. Errors are included only when requested.
pub fn poi_estimates(ws: &Workspace, fit_pois: &[String], with_errors: bool) -> Vec<PoiEstimate> {
    fit_pois
        .iter()
        .filter_map(|name| ws.var(name))
        .filter(|p| !p.is_constant())
        .map(|p| {
            let mut est = PoiEstimate::new(p.name(), p.value());
            if with_errors {
                est.error = Some(p.error());
                if let Some((lo, hi)) = p.asym_errors() {
                    est.error_lo = Some(lo);
                    est.error_hi = Some(hi);
                }
            }
            est
        })
        .collect()
}
