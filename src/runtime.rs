use serde::Serialize;

use crate::gate::GateStatus;

#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub commit: &'static str,
    pub build_time: &'static str,
    pub cache: &'static str,
}

pub fn build_info(status: GateStatus) -> BuildInfo {
    BuildInfo {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_REV").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown"),
        cache: status.as_str(),
    }
}
