//! # DDS Shared Types
//!
//! Data model shared by the DCP distribution server and the netback receiver.
//!
//! ## Design Philosophy
//!
//! - **Immutable Messages**: a [`DcpMessage`] never changes after it is archived
//! - **Cheap Filtering**: [`IndexEntry`] carries everything a filter needs, so
//!   payloads are fetched only for entries that pass
//! - **Tagged Outages**: each [`OutageKind`] variant holds only the fields that
//!   kind of gap needs
//! - **Text Criteria**: [`SearchCriteria`] round-trips through the classic
//!   line-oriented `KEYWORD: value` format
//!
//! ## Quick Start
//!
//! ```rust
//! use dds_types::{DcpAddress, SearchCriteria};
//!
//! let criteria = SearchCriteria::parse(
//!     "LRGS_SINCE: now - 1 hour\nDCP_ADDRESS: CE1234A6\n",
//! ).unwrap();
//! assert!(criteria.addresses.contains(&"CE1234A6".parse::<DcpAddress>().unwrap()));
//! ```

pub mod address;
pub mod criteria;
pub mod error;
pub mod message;
pub mod netlist;
pub mod outage;
pub mod time;

pub use address::DcpAddress;
pub use criteria::{ChannelToken, DapsStatusMode, SearchCriteria, SequenceRange};
pub use error::{Result, TypesError};
pub use message::{BaudRate, DcpMessage, FailureCode, IndexEntry, MessageFlags, SourceType};
pub use netlist::{NetworkList, NetworkListEntry};
pub use outage::{Outage, OutageId, OutageKind, OutageStatus};
pub use time::TimeSpec;
