//! Shared primitive types used across the entire pipeline.

use chrono::{DateTime, Utc};

/// A stable, unique identifier for any generated entity.
pub type EntityId = String;

/// Every timestamp in the dataset is UTC.
pub type Timestamp = DateTime<Utc>;

/// Row position inside a bronze table.
pub type RowIndex = usize;
