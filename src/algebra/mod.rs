//! Grid arithmetic and reductions.
//!
//! Missing samples (non-finite values) are absent, not zero: folds skip them
//! and a point with no present contributors stays missing.

mod binary;
mod ensemble;
mod reduce;
mod time;

pub use binary::{add, atan2, binary, divide, multiply, subtract, BinaryOp};
pub use ensemble::{
    apply_function_over_members, average_over_members, ensemble_highest, ensemble_lowest,
    ensemble_percentile, ensemble_range, ensemble_standard_deviation, percentile,
};
pub use reduce::{apply_function_over_levels, apply_function_to_axis, apply_function_to_levels, GridAxis, Reduction};
pub use time::{
    apply_function_over_time, average_over_time, difference_from_base_time, max_over_time,
    min_over_time, standard_deviation_over_time, sum_from_base_time, sum_over_time,
    time_running_average, time_step_difference, time_step_func, time_step_sum,
    time_weighted_running_average, EdgeOption, StepFunc,
};
