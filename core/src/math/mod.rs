pub mod angles;
pub mod iq;
pub mod stats;

pub use angles::{diff_deg, interpolate_deg, normalize_deg, time_fraction, wrap_deg};
pub use stats::{ErrorStats, StatsHelper};
