//! Internal optimization utilities for smile calibration.

/// Configuration for the 2D Nelder-Mead simplex optimizer.
pub(crate) struct NelderMeadConfig {
    /// Hard cap on iterations.
    pub max_iter: usize,
    /// Convergence threshold on simplex diameter.
    pub diameter_tol: f64,
    /// Convergence threshold on objective value spread.
    pub fvalue_tol: f64,
    /// Box the simplex is projected into: `[(x_lo, x_hi), (y_lo, y_hi)]`.
    pub bounds: [(f64, f64); 2],
}

/// Result of a 2D Nelder-Mead optimization.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NelderMeadResult {
    pub x: f64,
    pub y: f64,
    /// Objective value at the optimum.
    pub fval: f64,
    /// Iterations actually performed.
    pub iterations: usize,
    /// Whether a tolerance was met before the iteration cap.
    pub converged: bool,
}

type Point = (f64, f64);

fn project(p: Point, bounds: &[(f64, f64); 2]) -> Point {
    (
        p.0.clamp(bounds[0].0, bounds[0].1),
        p.1.clamp(bounds[1].0, bounds[1].1),
    )
}

/// Minimize `objective(x, y)` using the Nelder-Mead simplex method in 2D.
///
/// Starts from `start` with per-axis perturbations `step` forming the
/// initial simplex. Every trial point is projected into `config.bounds`.
pub(crate) fn nelder_mead_2d<F>(
    objective: F,
    start: Point,
    step: Point,
    config: &NelderMeadConfig,
) -> NelderMeadResult
where
    F: Fn(f64, f64) -> f64,
{
    let eval = |p: Point| objective(p.0, p.1);
    let b = &config.bounds;

    let mut simplex = [
        project(start, b),
        project((start.0 + step.0, start.1), b),
        project((start.0, start.1 + step.1), b),
    ];
    let mut f_vals = [eval(simplex[0]), eval(simplex[1]), eval(simplex[2])];

    let mut iterations = 0;
    let mut converged = false;
    while iterations < config.max_iter {
        let mut idx = [0usize, 1, 2];
        idx.sort_by(|&a, &b| f_vals[a].total_cmp(&f_vals[b]));
        simplex = [simplex[idx[0]], simplex[idx[1]], simplex[idx[2]]];
        f_vals = [f_vals[idx[0]], f_vals[idx[1]], f_vals[idx[2]]];

        let diameter = simplex
            .iter()
            .flat_map(|p| simplex.iter().map(move |q| (p.0 - q.0).hypot(p.1 - q.1)))
            .fold(0.0_f64, f64::max);
        if diameter < config.diameter_tol || f_vals[2] - f_vals[0] < config.fvalue_tol {
            converged = true;
            break;
        }
        iterations += 1;

        // Centroid of best two
        let c = (
            0.5 * (simplex[0].0 + simplex[1].0),
            0.5 * (simplex[0].1 + simplex[1].1),
        );
        let towards = |p: Point, t: f64| project((c.0 + t * (p.0 - c.0), c.1 + t * (p.1 - c.1)), b);

        // Reflection
        let r = towards(simplex[2], -1.0);
        let fr = eval(r);

        if fr < f_vals[1] && fr >= f_vals[0] {
            simplex[2] = r;
            f_vals[2] = fr;
        } else if fr < f_vals[0] {
            // Expansion
            let e = towards(simplex[2], -2.0);
            let fe = eval(e);
            if fe < fr {
                simplex[2] = e;
                f_vals[2] = fe;
            } else {
                simplex[2] = r;
                f_vals[2] = fr;
            }
        } else {
            // Contraction, outside or inside
            let h = if fr < f_vals[2] {
                towards(simplex[2], -0.5)
            } else {
                towards(simplex[2], 0.5)
            };
            let fh = eval(h);
            if fh < f_vals[2].min(fr) {
                simplex[2] = h;
                f_vals[2] = fh;
            } else {
                // Shrink toward best vertex
                for j in 1..3 {
                    simplex[j] = (
                        simplex[0].0 + 0.5 * (simplex[j].0 - simplex[0].0),
                        simplex[0].1 + 0.5 * (simplex[j].1 - simplex[0].1),
                    );
                    f_vals[j] = eval(simplex[j]);
                }
            }
        }
    }

    let best = (0..3)
        .min_by(|&i, &j| f_vals[i].total_cmp(&f_vals[j]))
        .unwrap_or(0);

    NelderMeadResult {
        x: simplex[best].0,
        y: simplex[best].1,
        fval: f_vals[best],
        iterations,
        converged,
    }
}
