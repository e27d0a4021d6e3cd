//! `strata images` command.

use clap::Args;
use strata_core::StrataConfig;
use strata_runtime::{LayerStore, StoredImage};

use crate::output;

#[derive(Args)]
pub struct ImagesArgs {
    /// Only show image names (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    args: ImagesArgs,
    config: &StrataConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_image_store(config)?;
    let images = store.list().await;

    if args.quiet {
        for image in &images {
            println!("{}", image.image.name);
        }
        return Ok(());
    }

    let layers = LayerStore::new(config)?;
    let mut table = output::new_table(&["NAME", "IMAGE ID", "LAYERS", "SIZE", "CREATED"]);
    for stored in &images {
        let row = ImageRow::from_stored(stored, &layers);
        table.add_row(&[&row.name, &row.id, &row.layers, &row.size, &row.created]);
    }

    println!("{table}");
    Ok(())
}

/// Pre-computed display fields for a single image row.
struct ImageRow {
    name: String,
    id: String,
    layers: String,
    size: String,
    created: String,
}

impl ImageRow {
    fn from_stored(stored: &StoredImage, layers: &LayerStore) -> Self {
        let image = &stored.image;
        let id = image
            .id
            .as_ref()
            .map(|id| output::short_id(id.as_str()))
            .unwrap_or_else(|| "<none>".to_string());

        // Base layers of slim images live under their own image
        let size: u64 = image
            .spec
            .layers
            .iter()
            .filter_map(|l| l.id.as_ref())
            .filter_map(|id| layers.stat(id).ok())
            .map(|d| d.size)
            .sum();
        let count = image.spec.layers.iter().filter(|l| l.id.is_some()).count();

        Self {
            name: image.name.clone(),
            id,
            layers: count.to_string(),
            size: output::format_bytes(size),
            created: output::format_ago(&stored.saved_at),
        }
    }
}
