//! Types that represent the core data model: records, amounts and monthly partitions.
mod amount;
mod partition;
mod record;

pub use amount::{Amount, AmountError, AmountFormat};
pub use partition::{partition, Partition, PartitionKey, PartitionSummary, Partitions};
pub use record::{validate, RawRow, Record, RejectedRow, Schema, Validated, ValidationPolicy};
