use anyhow::Result;

use super::Context;

pub async fn run(ctx: &Context, connector_id: i64) -> Result<()> {
    let connector = ctx.connector(connector_id).await?;
    ctx.store.delete_connector_data(connector_id).await?;
    println!(
        "Removed connector {} ({}) and its mirrored data",
        connector.id, connector.kind
    );
    Ok(())
}
