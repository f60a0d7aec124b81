//! Statistics-collection primitives: atomic accumulators, moving-average
//! rates and sampling reservoirs.

pub mod accumulator;
pub mod clock;
pub mod ewma;
pub mod reservoir;

pub use accumulator::{CounterAccumulator, CounterStats, ValueAccumulator, ValueStats};
pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use ewma::{Ewma, MovingAverages, RateStats};
pub use reservoir::{DecayingReservoir, Percentiles, Reservoir, Snapshot, UniformReservoir};
