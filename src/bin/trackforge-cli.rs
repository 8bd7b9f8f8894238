// Command-line front end for the FLAC tag editor and the MP3 transcoder.

use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use trackforge::flac::FlacMetadataStore;
use trackforge::logging;
use trackforge::opts::{Bitrate, Quality, TranscodeOpts};
use trackforge::pipeline::TranscodePipeline;
use trackforge::tags::{CoverArt, TagField, TrackTags};
use trackforge::{TranscodeEvent, TranscodeJob};

#[derive(Parser, Debug)]
#[command(name = "trackforge")]
#[command(about = "Edit FLAC tags and convert audio to MP3", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that a file starts with the FLAC marker.
    Validate { file: PathBuf },

    /// Read or edit FLAC tags.
    Tags {
        #[command(subcommand)]
        action: TagsCommand,
    },

    /// Convert any supported audio file to a constant-bitrate MP3.
    Convert {
        input: PathBuf,
        output: PathBuf,

        /// 128, 192, 256 or 320.
        #[arg(short, long, value_enum, default_value_t = Bitrate::Kbps192)]
        bitrate: Bitrate,

        #[arg(short, long, value_enum, default_value_t = Quality::Good)]
        quality: Quality,

        /// Container hint when the input extension is missing or misleading.
        #[arg(long)]
        format: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum TagsCommand {
    /// Print the tags of a FLAC file.
    Show {
        file: PathBuf,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Set one text field, keeping every other tag.
    Set {
        file: PathBuf,

        /// Field name (TITLE, ARTIST, ALBUM, ALBUMARTIST, DATE, GENRE, TRACKNUMBER, COMMENT).
        #[arg(short, long)]
        field: String,

        #[arg(short, long)]
        value: String,
    },

    /// Replace, remove or export the front cover.
    Art {
        file: PathBuf,

        /// Image to embed (stored as PNG).
        #[arg(long, conflicts_with_all = ["remove", "export"])]
        set: Option<PathBuf>,

        #[arg(long, conflicts_with = "export")]
        remove: bool,

        /// Write the embedded cover to this path.
        #[arg(long)]
        export: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    logging::init();
    let args = Args::parse();

    match args.command {
        Command::Validate { file } => validate(&file),
        Command::Tags { action } => match action {
            TagsCommand::Show { file, json } => show_tags(&file, json),
            TagsCommand::Set { file, field, value } => set_field(&file, &field, &value),
            TagsCommand::Art {
                file,
                set,
                remove,
                export,
            } => album_art(&file, set.as_deref(), remove, export.as_deref()),
        },
        Command::Convert {
            input,
            output,
            bitrate,
            quality,
            format,
        } => {
            let opts = TranscodeOpts {
                bitrate,
                quality,
                hint_extension: format,
            };
            convert(TranscodeJob::with_opts(input, output, opts))
        }
    }
}

fn validate(file: &Path) -> Result<()> {
    FlacMetadataStore::new()
        .try_validate(file)
        .with_context(|| format!("{} is not a FLAC file", file.display()))?;
    println!("✅ {}", file.display());
    Ok(())
}

fn show_tags(file: &Path, json: bool) -> Result<()> {
    let tags = FlacMetadataStore::new()
        .try_read_tags(file)
        .with_context(|| format!("failed to read tags: {}", file.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tags)?);
        return Ok(());
    }

    print_tags(&tags);
    Ok(())
}

fn print_tags(tags: &TrackTags) {
    for field in TagField::ALL {
        println!("{:<12} {}", field.vorbis_key(), tags.get(field));
    }
    println!("{:<12} {} Hz", "RATE", tags.sample_rate);
    println!("{:<12} {}", "CHANNELS", tags.channels);
    println!("{:<12} {}", "BITS", tags.bits_per_sample);
    if let Some(secs) = tags.duration_seconds() {
        println!("{:<12} {secs:.2} s", "DURATION");
    }
    match &tags.album_art {
        Some(art) => println!("{:<12} {}x{}", "COVER", art.width(), art.height()),
        None => println!("{:<12} none", "COVER"),
    }
}

fn set_field(file: &Path, field: &str, value: &str) -> Result<()> {
    FlacMetadataStore::new()
        .try_update_field(file, field, value)
        .with_context(|| format!("failed to update {field}: {}", file.display()))?;
    Ok(())
}

fn album_art(file: &Path, set: Option<&Path>, remove: bool, export: Option<&Path>) -> Result<()> {
    let store = FlacMetadataStore::new();

    if let Some(image_path) = set {
        let image = image::open(image_path)
            .with_context(|| format!("failed to load image: {}", image_path.display()))?;
        store
            .try_update_album_art(file, CoverArt::new(image))
            .with_context(|| format!("failed to embed cover: {}", file.display()))?;
        return Ok(());
    }

    if remove {
        store
            .try_remove_album_art(file)
            .with_context(|| format!("failed to remove cover: {}", file.display()))?;
        return Ok(());
    }

    let Some(dest) = export else {
        bail!("nothing to do: pass --set, --remove or --export");
    };
    let art = store
        .try_read_tags(file)
        .with_context(|| format!("failed to read tags: {}", file.display()))?
        .album_art
        .ok_or_else(|| anyhow!("{} has no embedded cover", file.display()))?;
    art.image()
        .save(dest)
        .with_context(|| format!("failed to write image: {}", dest.display()))?;
    println!("✅ saved: {}", dest.display());
    Ok(())
}

fn convert(job: TranscodeJob) -> Result<()> {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos:>3}% {msg}")
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );
    pb.set_message(job.output.display().to_string());

    let (tx, rx) = mpsc::channel();
    let handle = TranscodePipeline::new().spawn(job, tx);

    for event in rx {
        match event {
            TranscodeEvent::Started => pb.set_position(0),
            TranscodeEvent::Progress(pct) => pb.set_position(u64::from(pct)),
            TranscodeEvent::Finished { success, message } => {
                if success {
                    pb.finish_with_message(message);
                } else {
                    pb.abandon_with_message(message);
                }
            }
        }
    }

    let outcome = handle
        .join()
        .map_err(|_| anyhow!("conversion thread panicked"))?;
    if !outcome.success {
        bail!(trackforge::Error::msg(outcome.message));
    }
    Ok(())
}
