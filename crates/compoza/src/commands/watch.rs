//! Periodic update checks
//!
//! Cached results are shown immediately and refreshed in the background,
//! so each round reflects whatever the previous refresh found.

use anyhow::Result;
use std::time::Duration;
use tracing::warn;

use super::check::print_summary;
use crate::cli::WatchArgs;
use crate::context::AppContext;
use crate::output;

pub async fn run(args: WatchArgs) -> Result<()> {
    let ctx = AppContext::load()?;
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }

        let images = match ctx.images_to_check(&args.images).await {
            Ok(images) => images,
            Err(e) => {
                warn!("Skipping this round: {:#}", e);
                continue;
            }
        };

        output::header(&format!(
            "Image updates at {}",
            chrono::Local::now().format("%H:%M:%S")
        ));
        let results = ctx.checker.check_image_updates(images).await;
        output::update_table(&results);
        print_summary(&results);
    }
}
