//! `strata inspect` command - display image metadata as JSON.

use clap::Args;
use strata_core::StrataConfig;

#[derive(Args)]
pub struct InspectArgs {
    /// Image name to inspect
    pub image: String,
}

pub async fn execute(
    args: InspectArgs,
    config: &StrataConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_image_store(config)?;
    let image = store.get_by_name(&args.image).await?;

    println!("{}", serde_json::to_string_pretty(&image)?);
    Ok(())
}
