use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::Table;
use ferry_bundle::{Bundle, RelocationMap};
use ferry_common::ui::{quoted_path, short_digest};
use ferry_oci::{parse_reference, PulledBundle};

use crate::{console, opts::*};

/// Commands for moving bundles between registries.
#[derive(Subcommand, Debug)]
pub enum BundleCommands {
    /// Pull a bundle from a registry.
    Pull(Pull),
    /// Push a bundle to a registry, relocating its images next to it.
    Push(Push),
    /// Copy a bundle and its images from one registry to another.
    Copy(CopyCommand),
    /// Show the images of a bundle in a registry and where they live.
    Inspect(Inspect),
}

impl BundleCommands {
    pub async fn run(self, options: &GlobalOptions) -> Result<()> {
        match self {
            BundleCommands::Pull(cmd) => cmd.run(options).await,
            BundleCommands::Push(cmd) => cmd.run(options).await,
            BundleCommands::Copy(cmd) => cmd.run(options).await,
            BundleCommands::Inspect(cmd) => cmd.run(options).await,
        }
    }
}

#[derive(Parser, Debug)]
pub struct Pull {
    /// Allow plain HTTP and invalid certificates for the bundle's registry
    #[clap(
        name = INSECURE_OPT,
        short = 'k',
        long = "insecure",
        takes_value = false,
    )]
    pub insecure: bool,

    /// Write the bundle to this file instead of standard output
    #[clap(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Write the relocation map, if the bundle has one, to this file
    #[clap(name = RELOCATION_MAP_OPT, long = "relocation-map")]
    pub relocation_map: Option<PathBuf>,

    /// Reference of the bundle
    #[clap()]
    pub reference: String,
}

impl Pull {
    pub async fn run(self, options: &GlobalOptions) -> Result<()> {
        let reference = parse_reference(&self.reference)?;
        let PulledBundle {
            bundle,
            relocation_map,
            digest,
        } = options
            .registry()
            .pull_bundle(&reference, self.insecure)
            .await?;

        let json = bundle.to_json()?;
        match &self.output {
            Some(path) => {
                write_file(path, &json).await?;
                console::step("Pulled", format_args!("{reference} to {}", quoted_path(path)));
            }
            None => println!("{}", String::from_utf8_lossy(&json)),
        }
        if let Some(digest) = &digest {
            console::info("Digest", format_args!("{digest}"));
        }

        match (relocation_map, &self.relocation_map) {
            (Some(map), Some(path)) => write_file(path, &map.to_json()?).await?,
            (Some(map), None) => console::info(
                "Relocated",
                format_args!(
                    "{} image(s); pass --relocation-map to save their locations",
                    map.len()
                ),
            ),
            (None, _) => (),
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct Push {
    /// Path to the bundle document
    #[clap(
        name = BUNDLE_FILE_OPT,
        short = 'f',
        long = "file",
        default_value = DEFAULT_BUNDLE_FILE,
    )]
    pub bundle: PathBuf,

    /// Relocation map of the bundle. Updated in place after the push.
    #[clap(name = RELOCATION_MAP_OPT, long = "relocation-map")]
    pub relocation_map: Option<PathBuf>,

    /// Allow plain HTTP and invalid certificates for the destination registry
    #[clap(
        name = INSECURE_OPT,
        short = 'k',
        long = "insecure",
        takes_value = false,
    )]
    pub insecure: bool,

    /// Where to push the bundle
    #[clap()]
    pub reference: String,
}

impl Push {
    pub async fn run(self, options: &GlobalOptions) -> Result<()> {
        let reference = parse_reference(&self.reference)?;
        let bundle = read_bundle(&self.bundle).await?;
        let relocation_map = match &self.relocation_map {
            Some(path) => read_relocation_map(path).await?,
            None => None,
        };

        let pushed = options
            .registry()
            .push_bundle(bundle, &reference, relocation_map, self.insecure)
            .await?;

        if let (Some(path), Some(map)) = (&self.relocation_map, &pushed.relocation_map) {
            write_file(path, &map.to_json()?).await?;
        }
        if !pushed.copied.is_empty() {
            console::step(
                "Relocated",
                format_args!("{} image(s) to {}", pushed.copied.len(), reference.domain()),
            );
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
pub struct CopyCommand {
    /// Reference of the bundle to copy
    #[clap(long = "source")]
    pub source: String,

    /// Where to copy the bundle to
    #[clap(long = "destination")]
    pub destination: String,

    /// Allow plain HTTP and invalid certificates for both registries
    #[clap(
        name = INSECURE_OPT,
        short = 'k',
        long = "insecure",
        takes_value = false,
    )]
    pub insecure: bool,
}

impl CopyCommand {
    pub async fn run(self, options: &GlobalOptions) -> Result<()> {
        let source = parse_reference(&self.source)?;
        let destination = parse_reference(&self.destination)?;

        let copied = options
            .registry()
            .copy_bundle(&source, &destination, self.insecure)
            .await?;

        console::step(
            "Copied",
            format_args!(
                "{source} to {destination}@{} ({} image(s) relocated)",
                copied.digest,
                copied.copied.len()
            ),
        );
        Ok(())
    }
}

/// How `inspect` prints a bundle.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser, Debug)]
pub struct Inspect {
    /// Allow plain HTTP and invalid certificates for the bundle's registry
    #[clap(
        name = INSECURE_OPT,
        short = 'k',
        long = "insecure",
        takes_value = false,
    )]
    pub insecure: bool,

    /// Output format
    #[clap(long = "output", value_enum, default_value = "table")]
    pub output: OutputFormat,

    /// Reference of the bundle
    #[clap()]
    pub reference: String,
}

impl Inspect {
    pub async fn run(self, options: &GlobalOptions) -> Result<()> {
        let reference = parse_reference(&self.reference)?;
        let pulled = options
            .registry()
            .pull_bundle(&reference, self.insecure)
            .await?;

        match self.output {
            OutputFormat::Json => {
                let json = serde_json::json!({
                    "bundle": pulled.bundle,
                    "relocationMap": pulled.relocation_map,
                    "digest": pulled.digest,
                });
                println!("{}", serde_json::to_string_pretty(&json)?);
            }
            OutputFormat::Table => {
                println!("{} {}", pulled.bundle.name, pulled.bundle.version);
                println!("{}", image_table(&pulled.bundle, pulled.relocation_map.as_ref()));
            }
        }
        Ok(())
    }
}

fn image_table(bundle: &Bundle, relocation_map: Option<&RelocationMap>) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Slot", "Image", "Digest", "Location"]);
    table.load_preset(comfy_table::presets::ASCII_BORDERS_ONLY_CONDENSED);

    for (slot, image) in bundle.image_slots() {
        let location = relocation_map
            .and_then(|map| map.get(&image.image))
            .unwrap_or("");
        table.add_row(vec![
            slot.to_string(),
            image.image.clone(),
            image.digest().map(short_digest).unwrap_or("").to_owned(),
            location.to_owned(),
        ]);
    }
    table
}

async fn read_bundle(path: &Path) -> Result<Bundle> {
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read bundle file {}", quoted_path(path)))?;
    Bundle::from_json(&contents)
        .with_context(|| format!("cannot parse bundle file {}", quoted_path(path)))
}

/// A missing map file means the bundle has not been relocated yet.
async fn read_relocation_map(path: &Path) -> Result<Option<RelocationMap>> {
    if !tokio::fs::try_exists(path).await? {
        tracing::debug!("No relocation map at {}", quoted_path(path));
        return Ok(None);
    }
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read relocation map {}", quoted_path(path)))?;
    let map = RelocationMap::from_json(&contents)
        .with_context(|| format!("cannot parse relocation map {}", quoted_path(path)))?;
    Ok(map.into_option())
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("cannot write {}", quoted_path(path)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_bundle::bundle::{BaseImage, InvocationImage};

    fn bundle() -> Bundle {
        let mut base = BaseImage::new("example.com/installer:1.0");
        base.content_digest = Some(
            "sha256:0a867093096e0ef01ef749b12b6e7a90e4952eda107f89a676eeedce63a8361f".into(),
        );
        Bundle {
            name: "app".into(),
            version: "1.0.0".into(),
            invocation_images: vec![InvocationImage { base }],
            ..Default::default()
        }
    }

    #[test]
    fn table_shows_relocated_locations() {
        let mut map = RelocationMap::new();
        map.insert("example.com/installer:1.0", "y.example.com/installer@sha256:0a86");

        let table = image_table(&bundle(), Some(&map)).to_string();

        assert!(table.contains("invocationImages[0]"), "{table}");
        assert!(table.contains("y.example.com/installer@sha256:0a86"), "{table}");
        assert!(table.contains(short_digest(
            "sha256:0a867093096e0ef01ef749b12b6e7a90e4952eda107f89a676eeedce63a8361f"
        )));
    }

    #[tokio::test]
    async fn missing_relocation_map_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let map = read_relocation_map(&dir.path().join("map.json"))
            .await
            .unwrap();
        assert_eq!(None, map);
    }

    #[tokio::test]
    async fn unreadable_bundle_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let err = read_bundle(&path).await.unwrap_err();
        assert!(err.to_string().contains("bundle.json"), "{err}");
    }

    #[test]
    fn global_options_parse_from_env_and_flags() {
        let app = crate::FerryApp::try_parse_from([
            "ferry",
            "bundle",
            "copy",
            "--source",
            "a.example.com/app:1",
            "--destination",
            "b.example.com/app:1",
            "--max-concurrent-copies",
            "8",
        ])
        .unwrap();
        assert_eq!(8, app.options.max_concurrent_copies);
        assert!(!app.options.verbose);
    }
}
