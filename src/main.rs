// Command-line snapshot capture: fetch a URL and write one
// self-contained HTML file.

use std::rc::Rc;

use anyhow::{Context, Result, bail};

use snapdoc::{CaptureOptions, HttpFetcher, capture_page};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        bail!("usage: snapdoc <url> [output-file]");
    };
    let output = args.next();

    let mut options = CaptureOptions::for_url(&url);
    options.display_stats = true;

    let fetcher = Rc::new(HttpFetcher::new());
    let page = capture_page(options, Default::default(), None, fetcher, None).await?;

    let path = output.unwrap_or_else(|| page.filename.clone());
    std::fs::write(&path, &page.content)
        .with_context(|| format!("failed to write snapshot to {path}"))?;
    log::info!("saved {} ({} bytes) to {path}", page.title, page.content.len());
    if let Some(stats) = &page.stats {
        log::info!("stats: {}", serde_json::to_string(stats)?);
    }
    Ok(())
}
