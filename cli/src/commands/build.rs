//! `strata build` command - build an image from a Kubefile.
//!
//! Parses the Kubefile, resolves the base image, executes the directives
//! and stores the result in the local image store.

use std::path::PathBuf;

use clap::Args;
use strata_core::{BuildMode, BuildOptions, SaveOptions, StrataConfig};
use strata_runtime::{driver_for, BuildImage, Kubefile, LocalImageService};

#[derive(Args)]
pub struct BuildArgs {
    /// Build context directory (contains the Kubefile and copy sources)
    #[arg(default_value = ".")]
    pub path: String,

    /// Name for the image (e.g., "my-cluster:v1")
    #[arg(short = 't', long = "tag")]
    pub tag: String,

    /// Path to the Kubefile (default: <PATH>/Kubefile)
    #[arg(short = 'f', long = "file")]
    pub file: Option<String>,

    /// Build mode: cloud runs every directive, lite skips CMD
    #[arg(long, default_value = "cloud")]
    pub mode: BuildMode,

    /// Execute every directive instead of reusing cached layers
    #[arg(long)]
    pub no_cache: bool,

    /// Store only the new layers; the base is resolved through FROM
    #[arg(long)]
    pub without_base: bool,

    /// Only print the image id
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(
    args: BuildArgs,
    config: &StrataConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let context_dir = PathBuf::from(&args.path)
        .canonicalize()
        .map_err(|e| format!("Invalid build context path '{}': {}", args.path, e))?;

    if !context_dir.is_dir() {
        return Err(format!(
            "Build context '{}' is not a directory",
            context_dir.display()
        )
        .into());
    }

    let kubefile_path = resolve_kubefile(&context_dir, args.file.as_deref());
    if !kubefile_path.exists() {
        return Err(format!("Kubefile not found at {}", kubefile_path.display()).into());
    }

    let raw = Kubefile::from_file(&kubefile_path)?.into_image(&args.tag);

    let images = super::open_image_store(config)?;
    let service = LocalImageService::new(images.clone());
    let driver = driver_for(config.mount_driver)?;

    let options = BuildOptions {
        context_dir,
        mode: args.mode,
        use_cache: !args.no_cache,
    };
    let save = SaveOptions {
        without_base: args.without_base,
    };

    let builder = BuildImage::new(config, raw, driver, images, &service).await?;
    let image = builder.build(&options, &args.tag, save).await?;
    let id = image
        .id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_default();

    if args.quiet {
        println!("{id}");
    } else {
        println!("Successfully built {id}");
        println!("Successfully tagged {}", image.name);
    }

    Ok(())
}

/// Kubefile location: `file` relative to the context, or `<context>/Kubefile`.
fn resolve_kubefile(context_dir: &std::path::Path, file: Option<&str>) -> PathBuf {
    match file {
        Some(f) => {
            let p = PathBuf::from(f);
            if p.is_absolute() {
                p
            } else {
                context_dir.join(p)
            }
        }
        None => context_dir.join("Kubefile"),
    }
}
