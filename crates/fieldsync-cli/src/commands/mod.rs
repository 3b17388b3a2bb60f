pub mod common;
pub mod completions;
pub mod pair;
pub mod request;
pub mod serve;
pub mod status;
pub mod sync;
pub mod telemetry;
pub mod upload;
