use anyhow::Result;
use serde_json::json;

use super::Context;

pub async fn run(ctx: &Context, connector_id: i64, as_json: bool) -> Result<()> {
    let connector = ctx.connector(connector_id).await?;
    let (started, succeeded) = ctx.store.sync_status(connector_id).await?;
    let items = ctx.store.list_synced_items(connector_id).await?.len();
    let pages = ctx.store.crawl_page_count(connector_id).await?;

    if as_json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "connector_id": connector.id,
                "kind": connector.kind,
                "connection_id": connector.connection_id,
                "data_source": connector.data_source,
                "last_sync_started_at": started.map(|t| t.to_rfc3339()),
                "last_sync_succeeded_at": succeeded.map(|t| t.to_rfc3339()),
                "synced_items": items,
                "crawled_pages": pages,
            }))?
        );
        return Ok(());
    }

    println!("Connector {} ({})", connector.id, connector.kind);
    println!("  connection:  {}", connector.connection_id);
    println!("  data source: {}", connector.data_source);
    match started {
        Some(t) => println!("  last sync started:   {}", t.to_rfc3339()),
        None => println!("  last sync started:   never"),
    }
    match succeeded {
        Some(t) => println!("  last sync succeeded: {}", t.to_rfc3339()),
        None => println!("  last sync succeeded: never"),
    }
    if connector.kind == "webcrawler" {
        println!("  crawled pages: {pages}");
    } else {
        println!("  synced items:  {items}");
    }
    Ok(())
}
