pub mod env;
pub mod helix;
pub mod ratelimit;
pub mod telemetry;
pub mod tmi;
