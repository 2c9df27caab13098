//! Version information for hostkeep

/// Get the current version string
pub fn get_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Version plus build metadata when the build sets it
///
/// `HOSTKEEP_GIT_HASH` and `HOSTKEEP_BUILD_DATE` are read at compile time.
pub fn get_version_long() -> String {
    let git_hash = option_env!("HOSTKEEP_GIT_HASH").unwrap_or("unknown");
    let build_date = option_env!("HOSTKEEP_BUILD_DATE").unwrap_or("unknown");
    format!("{} (git: {git_hash}, built: {build_date})", get_version())
}
