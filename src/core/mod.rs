//! Pure algebra shared by every other component: the cross-chain
//! [`checkpoint`] total order and the [`interval`] set algebra over synced
//! block ranges, plus [`filter`] fragment expansion. Nothing in this module
//! touches I/O; everything here is a plain function over typed records.

pub mod checkpoint;
pub mod filter;
pub mod interval;

pub use checkpoint::{Bound, Checkpoint};
pub use filter::{
    ChildAddressLocation, FactoryFragment, LogFilter, LogFilterFragment,
    ParseChildAddressLocationError, parse_child_address_location,
};
pub use interval::{Interval, interval_difference, interval_intersection_many, interval_union};
