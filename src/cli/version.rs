use crate::app::VersionInfo;
use clap::Args;

#[derive(Args)]
pub struct VersionArgs {}

pub fn run(_args: VersionArgs) -> anyhow::Result<()> {
    let version = VersionInfo::current();
    println!("backupman {}", version.version);
    println!("  commit: {}", version.commit_sha);
    println!("  built:  {}", version.build_date);
    Ok(())
}
