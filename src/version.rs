// Build-time version from Cargo.toml

/// Package version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name (from Cargo.toml).
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Lease holder / log tag for this process, e.g. `gpustats/0.3.0 pid 4711`.
pub fn agent_id() -> String {
    format!("{}/{} pid {}", NAME, VERSION, std::process::id())
}
