use super::load_config;
use crate::scheduler::next_runs;
use chrono::{Local, Utc};
use clap::Args;
use std::path::Path;

#[derive(Args)]
pub struct ScheduleArgs {
    /// Number of upcoming runs to show
    #[arg(short = 'n', long, default_value = "5")]
    pub count: usize,
}

pub async fn run(args: ScheduleArgs, config: &Path) -> anyhow::Result<()> {
    let settings = load_config(config)?;
    let job = &settings.http.backup_job;
    if !job.enabled {
        println!("Backup job is disabled");
        return Ok(());
    }

    println!("Backup job: {}", job.cron);
    for at in next_runs(&job.cron, Utc::now(), args.count)? {
        println!("  {}", at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S %Z"));
    }
    Ok(())
}
