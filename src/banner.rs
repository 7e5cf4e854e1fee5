//! Startup banner and session summary display.

use std::path::Path;

use crate::consts::{AUTHOR, HOMEPAGE, REPO, format_number};
use crate::models::UserStats;

/// Session configuration for display in the startup banner.
pub struct BannerInfo<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub key_status: &'a str,
    pub database: &'a Path,
    pub user: i64,
}

/// Print the startup banner with session info.
pub fn print_banner(info: &BannerInfo) {
    println!(
        r#"
   ╔═══════════════════════════════════════╗
   ║         P R O M P T R E L A Y         ║
   ║   prompts in, completions out, async  ║
   ╚═══════════════════════════════════════╝

   version   {}
   by        {}
   home      {}
   repo      {}
   provider  {} ({})
   api key   {}
   database  {}
   user      {}
"#,
        env!("CARGO_PKG_VERSION"),
        AUTHOR,
        HOMEPAGE,
        REPO,
        info.provider,
        info.model,
        info.key_status,
        info.database.display(),
        info.user,
    );
}

/// Print the session summary (usage totals + farewell).
pub fn print_session_summary(stats: UserStats) {
    if stats.total_tasks > 0 {
        println!(
            "session: {:>6} tasks, {:>6} succeeded, {:>8} tokens",
            format_number(stats.total_tasks),
            format_number(stats.successful_tasks),
            format_number(stats.total_tokens),
        );
    }
    println!("goodbye.");
}
