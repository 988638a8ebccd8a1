use anyhow::{bail, Result};

use super::Context;

pub async fn run(ctx: &Context, connector_id: i64) -> Result<()> {
    let connector = ctx.connector(connector_id).await?;
    if connector.kind != "github" {
        bail!("garbage collection only applies to github connectors");
    }

    let orchestrator = ctx.github_orchestrator()?;
    let target = ctx.sync_target(&connector);
    let report = orchestrator.collect_garbage(&target).await?;

    println!(
        "Removed {} stale item(s), {} check(s) failed",
        report.removed, report.failed
    );
    Ok(())
}
