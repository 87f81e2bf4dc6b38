pub mod location;
pub mod update;

pub use location::{LocationReport, NewLocation};
pub use update::{LocationUpdate, NumericField};
