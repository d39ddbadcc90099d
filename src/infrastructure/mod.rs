pub mod bluetooth;
pub mod logging;
pub mod safety;
pub mod telemetry;
