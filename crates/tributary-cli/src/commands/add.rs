use anyhow::Result;

use super::Context;

pub async fn run(ctx: &Context, installation: &str, data_source: &str) -> Result<()> {
    let id = ctx
        .store
        .create_connector("github", installation, data_source)
        .await?;
    println!("Created github connector {id} for {installation} -> {data_source}");
    println!("Run a first sync with: tributary sync {id}");
    Ok(())
}

pub async fn run_site(ctx: &Context, url: &str, data_source: &str) -> Result<()> {
    let id = ctx.store.create_crawl_connector(url, data_source).await?;
    println!("Created webcrawler connector {id} for {url} -> {data_source}");
    println!("Run a first crawl with: tributary crawl {id}");
    Ok(())
}
