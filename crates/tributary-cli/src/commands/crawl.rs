use std::sync::Arc;

use anyhow::{bail, Result};
use tributary_core::{progress, CrawlScheduler, HttpTransport};

use super::Context;

pub async fn run(ctx: &Context, connector_id: i64) -> Result<()> {
    let connector = ctx.connector(connector_id).await?;
    if connector.kind != "webcrawler" {
        bail!(
            "connector {connector_id} is a {} connector, use `tributary sync`",
            connector.kind
        );
    }

    let config = ctx.config.crawl_config();
    let transport = HttpTransport::new(config.request_timeout)?;
    let scheduler = CrawlScheduler::new(
        ctx.store.clone(),
        Arc::new(ctx.store.clone()),
        Arc::new(transport),
        config,
    );

    progress::emit_stage(
        "webcrawler",
        "crawling",
        &format!("Crawling {}", connector.connection_id),
    );
    let report = scheduler.crawl_connector(connector_id).await?;

    progress::emit_crawl_result(connector_id, &report);

    println!(
        "Crawled {} pages: {} indexed, {} skipped, {} fetch errors",
        report.pages_visited, report.pages_indexed, report.pages_skipped, report.fetch_errors
    );
    Ok(())
}
