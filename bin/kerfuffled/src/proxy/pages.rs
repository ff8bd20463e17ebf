//! Canned HTML responses the reverse proxy writes when a host has no route,
//! or is on hold. Embedded at compile time, replacing the original's
//! `go:embed` of pre-compiled HTML.

pub const INDEX: &str = include_str!("../../assets/index.html");
pub const MAINTENANCE: &str = include_str!("../../assets/maintenance.html");
