//! Brent's method on a sign-changing bracket.

/// Outcome of a successful Brent search.
pub(crate) struct BrentRoot {
    pub root: f64,
    pub iterations: usize,
}

/// Find a root of `f` in `[lo, hi]` to absolute accuracy `xtol`.
///
/// Returns `None` when `f(lo)` and `f(hi)` share a sign or the iteration
/// cap is hit before the bracket shrinks below `xtol`.
pub(crate) fn brent<F>(f: F, lo: f64, hi: f64, xtol: f64, max_iter: usize) -> Option<BrentRoot>
where
    F: Fn(f64) -> f64,
{
    let mut a = lo;
    let mut b = hi;
    let mut fa = f(a);
    let mut fb = f(b);

    if !fa.is_finite() || !fb.is_finite() || fa * fb > 0.0 {
        return None;
    }
    if fa == 0.0 {
        return Some(BrentRoot { root: a, iterations: 0 });
    }
    if fb == 0.0 {
        return Some(BrentRoot { root: b, iterations: 0 });
    }

    let mut c = b;
    let mut fc = fb;
    let mut d = b - a;
    let mut e = d;

    for iter in 1..=max_iter {
        if fb * fc > 0.0 {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }
        let tol = 2.0 * f64::EPSILON * b.abs() + 0.5 * xtol;
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol || fb == 0.0 {
            return Some(BrentRoot { root: b, iterations: iter });
        }
        if e.abs() >= tol && fa.abs() > fb.abs() {
            // Inverse quadratic interpolation, or secant when a == c.
            let s = fb / fa;
            let (p, q) = if a == c {
                (2.0 * xm * s, 1.0 - s)
            } else {
                let q = fa / fc;
                let r = fb / fc;
                (
                    s * (2.0 * xm * q * (q - r) - (b - a) * (r - 1.0)),
                    (q - 1.0) * (r - 1.0) * (s - 1.0),
                )
            };
            let (p, q) = if p > 0.0 { (p, -q) } else { (-p, q) };
            if 2.0 * p < (3.0 * xm * q - (tol * q).abs()) && 2.0 * p < (e * q).abs() {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }
        a = b;
        fa = fb;
        b += if d.abs() > tol {
            d
        } else if xm > 0.0 {
            tol
        } else {
            -tol
        };
        fb = f(b);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_sqrt2() {
        let r = brent(|x| x * x - 2.0, 0.0, 2.0, 1e-12, 100).unwrap();
        assert!((r.root - 2.0_f64.sqrt()).abs() < 1e-10);
        assert!(r.iterations > 0);
    }

    #[test]
    fn requires_sign_change() {
        assert!(brent(|x| x * x + 1.0, -1.0, 1.0, 1e-12, 100).is_none());
    }

    #[test]
    fn iteration_cap_is_hard() {
        assert!(brent(|x| x.powi(3) - 0.3, 0.0, 1.0, 1e-15, 2).is_none());
    }
}
