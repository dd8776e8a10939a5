//! Unique identifiers for engine entities.
//!
//! Strongly-typed UUID identifiers using [`domain-key`](https://crates.io/crates/domain-key)
//! `Uuid<D>` wrappers. Each identifier type is parameterized by a unique domain marker,
//! providing compile-time type safety that prevents mixing different ID types.
//!
//! All ID types are `Copy` (16 bytes, stack-allocated) and support:
//! - `v4()` for random UUID generation
//! - `parse(&str)` for string parsing
//! - Full serde support (serializes as UUID string)
//! - `Display`, `FromStr`, `Eq`, `Ord`, `Hash`

use domain_key::define_uuid;

pub use domain_key::UuidParseError;

define_uuid!(ConnectorIdDomain => ConnectorId);
define_uuid!(NodeIdDomain => NodeId);
define_uuid!(WorkflowIdDomain => WorkflowId);
define_uuid!(JobIdDomain => JobId);
