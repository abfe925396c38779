pub mod one_euro;
pub mod repetition;
pub mod smooth;

pub use one_euro::OneEuroFilter;
pub use repetition::{
    step, CounterEvent, Direction, Phase, RepetitionCounter, RepetitionState, RepetitionThresholds,
    SignalInput, Zone,
};
pub use smooth::{SignalStatus, SmoothedSample, SmoothedSignal, TemporalSmoother};
