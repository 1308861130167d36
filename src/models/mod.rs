// Domain models shared by the cache, archive, analytics and control components.

mod alert;
mod control;
mod sample;
mod stats;

pub use alert::{AlertKind, AlertRecord, AlertState};
pub use control::{ControlAction, ControlState};
pub use sample::{ArchivePoint, IncomingSample, Sample, SampleValue, from_millis, to_millis};
pub use stats::{DailyStats, PeakPower};
