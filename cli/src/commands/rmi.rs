//! `strata rmi` command - remove one or more images.

use clap::Args;
use strata_core::StrataConfig;

#[derive(Args)]
pub struct RmiArgs {
    /// Image names to remove
    #[arg(required = true)]
    pub images: Vec<String>,

    /// Ignore images that do not exist
    #[arg(short, long)]
    pub force: bool,
}

pub async fn execute(args: RmiArgs, config: &StrataConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_image_store(config)?;

    let mut errors: Vec<String> = Vec::new();

    for name in &args.images {
        match store.remove(name).await {
            Ok(()) => {
                println!("Removed: {name}");
            }
            Err(e) if args.force && e.is_not_found() => continue,
            Err(e) => errors.push(format!("{name}: {e}")),
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        let msg = errors.join("\n");
        Err(format!("Failed to remove image(s):\n{msg}").into())
    }
}
