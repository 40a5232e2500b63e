//! Payload shapes of each backend and the mappers to and from the domain model.
//!
//! Mappers never perform I/O. Malformed input surfaces as `Validation`.

pub mod ipa;
pub mod workspace;
