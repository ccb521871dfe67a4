//! Station domain for the Huaheng logistics line: the station model, the
//! static name table, telemetry validation and the in-memory snapshot with
//! its change detection.

mod ingress;
mod models;
mod names;
mod snapshot;
mod validator;

pub use crate::ingress::parse_payload;
pub use crate::models::*;
pub use crate::names::{all_station_names, station_name};
pub use crate::snapshot::SnapshotStore;
pub use crate::validator::{RejectReason, from_stored, validate};
