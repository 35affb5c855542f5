use alloy_primitives::U256;

/// Relative bracket width at which [`revert_positive`] stops bisecting.
pub const REVERT_PRECISION: f64 = 1e-4;

/// Upper bound on halving/doubling steps while bracketing; past it f64 has under- or overflowed.
const MAX_BRACKET_STEPS: usize = 1100;

/// Returns `true` if `a` and `b` differ by at most `accuracy` relative to the larger magnitude.
///
/// Magnitudes below one unit are compared absolutely, so two dust amounts are always close.
pub fn close_values(a: f64, b: f64, accuracy: f64) -> bool {
    if a == b {
        return true;
    }
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= accuracy * scale
}

/// Solves `a*x^2 + b*x + c = 0` and returns both real roots as `(smaller, larger)`.
///
/// Uses the cancellation-free form `q = -(b + sign(b)*sqrt(d))/2`, roots `q/a` and `c/q`.
/// Returns `None` when there is no real root. A zero `a` falls back to the linear root.
pub fn solve_quadratic(a: f64, b: f64, c: f64) -> Option<(f64, f64)> {
    if a == 0.0 {
        if b == 0.0 {
            return None;
        }
        let root = -c / b;
        return Some((root, root));
    }
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 || discriminant.is_nan() {
        return None;
    }
    let q = -0.5 * (b + b.signum() * discriminant.sqrt());
    if q == 0.0 {
        // b == 0 and c == 0
        return Some((0.0, 0.0));
    }
    let r1 = q / a;
    let r2 = c / q;
    Some(if r1 <= r2 { (r1, r2) } else { (r2, r1) })
}

/// Inverts a positive, monotonically increasing function: finds `x >= 0` with `f(x) ~= target`.
///
/// Returns 0 when `target <= f(0)`, when no bracket can be found, or when `f` yields NaN.
/// `hint` seeds the bracket; a non-positive hint is replaced by 1. The bracket is halved or
/// doubled until it contains the solution, then bisected until `max/min - 1 <= 1e-4`.
pub fn revert_positive<F>(f: F, target: f64, hint: f64) -> f64
where
    F: Fn(f64) -> f64,
{
    if !(target > f(0.0)) {
        return 0.0;
    }
    let hint = if hint > 0.0 && hint.is_finite() { hint } else { 1.0 };

    let (mut min, mut max);
    if f(hint) > target {
        max = hint;
        min = hint / 2.0;
        let mut steps = 0;
        while f(min) >= target {
            max = min;
            min /= 2.0;
            steps += 1;
            if steps > MAX_BRACKET_STEPS || min == 0.0 {
                return 0.0;
            }
        }
    } else {
        min = hint;
        max = hint * 2.0;
        let mut steps = 0;
        while f(max) < target {
            min = max;
            max *= 2.0;
            steps += 1;
            if steps > MAX_BRACKET_STEPS || !max.is_finite() {
                return 0.0;
            }
        }
    }

    while max / min - 1.0 > REVERT_PRECISION {
        let x = (min + max) / 2.0;
        let y = f(x);
        if y.is_nan() {
            return 0.0;
        }
        if y < target {
            min = x;
        } else {
            max = x;
        }
    }
    (min + max) / 2.0
}

/// Converts a raw on-chain integer amount with `decimals` decimals into a float amount.
pub fn u256_to_f64(value: U256, decimals: u8) -> f64 {
    let raw = value
        .as_limbs()
        .iter()
        .rev()
        .fold(0.0, |acc, limb| acc * 18_446_744_073_709_551_616.0 + *limb as f64);
    raw / 10f64.powi(i32::from(decimals))
}

/// Logs a broken numerical invariant and trips debug builds. Returns `condition`.
pub(crate) fn check_invariant(condition: bool, message: std::fmt::Arguments<'_>) -> bool {
    if !condition {
        tracing::error!(target: "multiroute::invariant", "{message}");
        debug_assert!(condition, "{message}");
    }
    condition
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::uint;

    #[test]
    fn test_close_values() {
        assert!(close_values(1e6, 1e6 * (1.0 + 1e-7), 1e-6));
        assert!(!close_values(1e6, 1e6 * (1.0 + 1e-5), 1e-6));
        // Sub-unit amounts compare absolutely
        assert!(close_values(1e-9, 3e-9, 1e-6));
        assert!(!close_values(f64::INFINITY, 1.0, 1e-6));
        assert!(close_values(f64::INFINITY, f64::INFINITY, 1e-6));
    }

    #[test]
    fn test_solve_quadratic() {
        // (x - 2)(x + 3) = x^2 + x - 6
        let (small, large) = solve_quadratic(1.0, 1.0, -6.0).unwrap();
        assert!((small + 3.0).abs() < 1e-12);
        assert!((large - 2.0).abs() < 1e-12);

        // No real roots
        assert!(solve_quadratic(1.0, 0.0, 1.0).is_none());

        // Linear
        let (root, _) = solve_quadratic(0.0, 2.0, -4.0).unwrap();
        assert_eq!(root, 2.0);
    }

    #[test]
    fn test_solve_quadratic_small_root_precision() {
        // Roots 1e-8 and 1e8: the naive formula loses the small one entirely.
        let (small, large) = solve_quadratic(1.0, -(1e8 + 1e-8), 1.0).unwrap();
        assert!((small / 1e-8 - 1.0).abs() < 1e-9, "small root {small}");
        assert!((large / 1e8 - 1.0).abs() < 1e-12, "large root {large}");
    }

    #[test]
    fn test_revert_positive() {
        let f = |x: f64| x * x + 1.0;
        // target below f(0)
        assert_eq!(revert_positive(f, 0.5, 1.0), 0.0);
        assert_eq!(revert_positive(f, 1.0, 1.0), 0.0);

        // Hint below the root: bracket grows
        let x = revert_positive(f, 101.0, 1.0);
        assert!((x / 10.0 - 1.0).abs() < 1e-4, "x = {x}");

        // Hint above the root: bracket shrinks
        let x = revert_positive(f, 101.0, 1e6);
        assert!((x / 10.0 - 1.0).abs() < 1e-4, "x = {x}");

        // Non-positive hint is replaced by 1
        let x = revert_positive(f, 101.0, -5.0);
        assert!((x / 10.0 - 1.0).abs() < 1e-4, "x = {x}");
    }

    #[test]
    fn test_revert_positive_bounded_function() {
        // Never reaches the target: no bracket, returns 0
        let f = |x: f64| 1.0 - 1.0 / (x + 1.0);
        assert_eq!(revert_positive(f, 2.0, 1.0), 0.0);
    }

    #[test]
    fn test_u256_to_f64() {
        assert_eq!(u256_to_f64(U256::ZERO, 18), 0.0);
        assert_eq!(u256_to_f64(uint!(1500000_U256), 6), 1.5);
        let wei = uint!(1234000000000000000000_U256);
        assert!((u256_to_f64(wei, 18) - 1234.0).abs() < 1e-9);
        // Crosses the first limb boundary
        let big = U256::from(u64::MAX) + U256::from(1u64);
        assert_eq!(u256_to_f64(big, 0), 18_446_744_073_709_551_616.0);
    }
}
