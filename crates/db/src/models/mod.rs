mod barrier;
mod children;
mod document;
mod interrupt;
mod node_execution;
mod waiter;

pub use barrier::BarrierRow;
pub use children::ChildInstanceRow;
pub use document::{DocumentKind, StepDocumentRow};
pub use interrupt::InterruptRow;
pub use node_execution::NodeExecutionRow;
pub use waiter::{WaiterRow, WaiterState};

pub(crate) use children::{children_json, statuses_json};
pub(crate) use node_execution::parse_uuid;

use chrono::{DateTime, TimeZone, Utc};

pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

pub(crate) fn datetime_to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}
