use crate::math::curve::CurveState;

/// Calculates the counter amount of a swap: the output for an exact input, or the input
/// required for an exact output.
pub fn find_curve_point(curve: &CurveState, amount: f64, exact_in: bool, token0_is_input: bool) -> f64 {
    if exact_in {
        curve.output_given_input(amount, token0_is_input)
    } else {
        curve.input_given_output(amount, token0_is_input)
    }
}
