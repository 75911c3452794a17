//! Scenario tests: real shell scripts run as pipeline stages in a temp directory
//!
//! Requires a POSIX `sh` on PATH.


mod fail_fast;
mod gating;
mod reset;
mod success_chain;
