//! Export of sampled chains. Everything here is optional glue behind Cargo features.

#[cfg(feature = "csv")]
pub mod csv;
