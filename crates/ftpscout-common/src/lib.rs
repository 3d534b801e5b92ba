//! ftpscout common library
//!
//! Infrastructure shared by the indexer library and the `ftpscout` binary.
//! Currently this is the logging configuration and initialization; domain
//! code lives in `ftpscout-indexer`.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LogLevel, LogOutput};
