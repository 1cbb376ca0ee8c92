//! Search strategies bounding fitted parameters: exhaustive grid scan,
//! per-parameter line search plus Monte-Carlo box search, and the weakened
//! single-parameter directional walk, all executed on a shared worker-pool
//! model.

pub mod comparison;
pub mod grid;
pub mod pool;
pub mod weakened;

pub use comparison::*;
pub use grid::*;
pub use pool::*;
pub use weakened::*;

/// Fixed step magnitude derived from a parameter's order of magnitude:
/// `10^(ceil(log10(|value|)) + scaling)`.  A zero (or non-finite) value
/// contributes no magnitude term.
pub(crate) fn magnitude_step(value: f64, scaling: f64) -> f64 {
    let magnitude = if value != 0.0 && value.is_finite() {
        value.abs().log10().ceil()
    } else {
        0.0
    };
    10f64.powf(magnitude + scaling)
}
