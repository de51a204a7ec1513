//! `streamkeeper files`

use anyhow::Result;
use comfy_table::Cell;
use streamkeeper_protocol::FileQuery;
use streamkeeper_sentinel::EngineMode;

use super::context::Context;
use super::output::{format_size, format_timestamp, print_json, print_table};

pub async fn run(ctx: &Context, query: &FileQuery) -> Result<()> {
    let engine = ctx.start_engine(EngineMode::Embedded).await?;
    let page = engine.list_files(query).await;
    engine.shutdown().await;
    let page = page?;

    if ctx.json {
        return print_json(&page);
    }
    if page.items.is_empty() {
        println!("No files.");
        return Ok(());
    }

    let rows = page
        .items
        .iter()
        .map(|f| {
            vec![
                Cell::new(&f.name),
                Cell::new(format_size(f.size)),
                Cell::new(format_timestamp(Some(f.mtime))),
                Cell::new(&f.path),
            ]
        })
        .collect();
    print_table(&["NAME", "SIZE", "MODIFIED", "PATH"], rows);

    let pages = page.total.div_ceil(page.page_size.max(1));
    println!("Page {} of {} ({} files)", page.page, pages.max(1), page.total);
    Ok(())
}
