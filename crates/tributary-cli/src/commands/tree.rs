use anyhow::Result;

use super::Context;

pub async fn run(ctx: &Context, connector_id: i64, folder: Option<&str>) -> Result<()> {
    let nodes = ctx.store.list_crawl_children(connector_id, folder).await?;
    if nodes.is_empty() {
        println!("(empty)");
        return Ok(());
    }

    for node in nodes {
        let marker = if node.is_folder {
            "dir "
        } else if node.expandable {
            "dir+page"
        } else {
            "page"
        };
        match &node.source_url {
            Some(url) => println!("{marker:<8} {:<40} {url}", node.title),
            None => println!("{marker:<8} {}", node.title),
        }
        println!("{:>8} id: {}", "", node.internal_id);
    }
    Ok(())
}
