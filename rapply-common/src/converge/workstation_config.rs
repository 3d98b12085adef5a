//! Runtime configuration file uploaded alongside the policy archive.

use crate::config::ApplyConfig;
use std::fmt::Write as _;

pub const WORKSTATION_CONFIG_NAME: &str = "workstation.rb";
pub const REPORT_HANDLER_NAME: &str = "reporter.rb";

/// Report handler copied verbatim next to the generated config.
pub const REPORT_HANDLER_SOURCE: &str = include_str!("../../resources/reporter.rb");

/// Render the agent config for a run rooted at `cache_path`.
///
/// Optional lines appear only when the matching setting is present.
pub fn render_workstation_config(cache_path: &str, config: &ApplyConfig) -> String {
    let mut out = String::new();
    out.push_str("local_mode true\n");
    out.push_str("color false\n");
    let _ = writeln!(out, "cache_path \"{cache_path}\"");
    let _ = writeln!(out, "chef_repo_path \"{cache_path}\"");
    out.push_str("require_relative \"reporter\"\n");
    out.push_str("reporter = RemoteApply::Reporter.new\n");
    out.push_str("report_handlers << reporter\n");
    out.push_str("exception_handlers << reporter\n");

    if let Some(license) = &config.agent.license {
        let _ = writeln!(out, "chef_license \"{license}\"");
    }

    // Remote output stays on stdout; only the level is forwarded.
    if let Some(level) = &config.log.target_level {
        let _ = writeln!(out, "log_level :{level}");
    }

    if let Some((url, token)) = config.data_collector.endpoint() {
        let _ = writeln!(out, "data_collector.server_url \"{url}\"");
        let _ = writeln!(out, "data_collector.token \"{token}\"");
        out.push_str("data_collector.mode :solo\n");
        out.push_str("data_collector.organization \"Chef Workstation\"\n");
    }
    out
}
