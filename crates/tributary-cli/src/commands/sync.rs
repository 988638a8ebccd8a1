use anyhow::{bail, Result};
use tributary_core::progress;

use super::Context;

pub async fn run(ctx: &Context, connector_id: i64, code_only: bool) -> Result<()> {
    let connector = ctx.connector(connector_id).await?;
    if connector.kind != "github" {
        bail!(
            "connector {connector_id} is a {} connector, use `tributary crawl`",
            connector.kind
        );
    }

    let orchestrator = ctx.github_orchestrator()?;
    let mut target = ctx.sync_target(&connector);
    target.code_only = code_only;

    let mode = if code_only { "code-only" } else { "full" };
    progress::emit_stage(
        "github",
        "syncing",
        &format!("Syncing {} ({mode})", target.installation_id),
    );
    let report = orchestrator.run_full_sync(&target).await?;

    progress::emit_sync_result(connector_id, &report);

    println!(
        "Synced {} repositories ({} items), {} failed",
        report.repos_synced, report.items_synced, report.repos_failed
    );
    for error in &report.errors {
        eprintln!("  error: {error}");
    }
    if !report.succeeded() {
        bail!("{} repositories failed to sync", report.repos_failed);
    }
    Ok(())
}
