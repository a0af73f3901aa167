pub mod time;

pub use time::{FixedTimeSource, SystemTimeSource, TimeSource};
