//! Image update check command

use anyhow::Result;
use compoza_image::{ImageUpdateInfo, VersionStatus};
use std::time::Duration;

use crate::cli::CheckArgs;
use crate::context::AppContext;
use crate::output;

pub async fn run(args: CheckArgs) -> Result<()> {
    let ctx = AppContext::load()?;
    let images = ctx.images_to_check(&args.images).await?;
    if images.is_empty() {
        output::info("No running containers to check");
        return Ok(());
    }

    let mut results = ctx.checker.check_image_updates(images).await;
    if let Some(secs) = args.wait_versions {
        wait_for_versions(&ctx, &mut results, Duration::from_secs(secs)).await;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    output::update_table(&results);
    print_summary(&results);
    Ok(())
}

/// Patch pending results with versions resolved in the background
async fn wait_for_versions(ctx: &AppContext, results: &mut [ImageUpdateInfo], timeout: Duration) {
    let pending: Vec<String> = results
        .iter()
        .filter(|r| r.update.version_status == VersionStatus::Pending)
        .map(|r| r.update.image.clone())
        .collect();
    if pending.is_empty() {
        return;
    }

    for entry in ctx.checker.wait_for_versions(&pending, timeout).await {
        if let Some(result) = results.iter_mut().find(|r| r.update.image == entry.image) {
            result.update = entry;
        }
    }
}

pub fn print_summary(results: &[ImageUpdateInfo]) {
    let updates = results.iter().filter(|r| r.update.update_available).count();
    let rate_limited = results.iter().filter(|r| r.update.rate_limited).count();

    if updates == 0 {
        output::success("All images are up to date");
    } else {
        output::info(&format!("{} image(s) have updates available", updates));
    }
    if rate_limited > 0 {
        output::warning(&format!(
            "{} image(s) hit a registry rate limit; they will be re-checked later",
            rate_limited
        ));
    }
}
