use std::{
    fs::{self, File},
    io::BufReader,
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use isomux::{
    channel::Channel,
    io,
    walk::{self, Walk},
    BoxId, FourCC, Mp4Info, Tree,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "isomux")]
#[command(author, version, about = "Inspect, redact and remux ISO base media files")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the box tree of a file
    Dump {
        file: PathBuf,
    },

    /// Count boxes of a type, or all boxes, up to the media data
    Count {
        file: PathBuf,

        /// Four character code, e.g. "trak"
        box_type: Option<FourCC>,
    },

    /// Overwrite top-level boxes of a type with free space
    Free {
        file: PathBuf,

        box_type: FourCC,
    },

    /// Extract one track into a new file
    Extract {
        input: PathBuf,

        output: PathBuf,

        /// Track id, the first sound track if not given
        #[arg(long)]
        track: Option<u32>,

        #[command(flatten)]
        tags: TagArgs,
    },

    /// Flatten fragmented files into one file with a track per input
    Remux {
        output: PathBuf,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        tags: TagArgs,
    },

    /// Print the iTunes tags of a file
    Tags {
        file: PathBuf,
    },
}

#[derive(Args)]
struct TagArgs {
    #[arg(long)]
    title: Option<String>,

    #[arg(long)]
    author: Option<String>,

    #[arg(long)]
    album: Option<String>,

    /// JPEG or PNG cover image
    #[arg(long)]
    cover: Option<PathBuf>,
}

impl TagArgs {
    fn into_info(self) -> Result<Mp4Info> {
        let cover = self
            .cover
            .map(|path| {
                fs::read(&path).with_context(|| format!("reading cover {}", path.display()))
            })
            .transpose()?;
        Ok(Mp4Info::audio(self.title, self.author, self.album, cover))
    }
}

fn dump(file: PathBuf) -> Result<()> {
    let mut input = Channel::new(BufReader::new(File::open(&file)?));
    let mut tree = Tree::new();
    let mut listener = |_: &Tree, _: BoxId| Walk::Continue;
    walk::read(
        &mut input,
        None,
        None,
        &mut tree,
        &mut io::buffer(),
        &mut listener,
    )?;

    fn print(tree: &Tree, id: BoxId, depth: usize) {
        let header = tree.header(id);
        match header.total_len() {
            Some(len) => println!("{:indent$}{} {len}", "", header.box_type, indent = depth * 2),
            None => println!("{:indent$}{} (to end)", "", header.box_type, indent = depth * 2),
        }
        for &child in tree.children(id) {
            print(tree, child, depth + 1);
        }
    }
    for &root in tree.roots() {
        print(&tree, root, 0);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("isomux=debug")
        } else {
            EnvFilter::new("isomux=info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let mut progress = |total: u64| debug!(total, "progress");
    match cli.command {
        Commands::Dump { file } => dump(file)?,
        Commands::Count { file, box_type } => {
            let count = isomux::count_file(&file, box_type.unwrap_or(FourCC::ANY))?;
            println!("{count}");
        }
        Commands::Free { file, box_type } => {
            let count = isomux::free_file(&file, box_type)?;
            info!(count, %box_type, "freed boxes");
        }
        Commands::Extract {
            input,
            output,
            track,
            tags,
        } => {
            let info = tags.into_info()?;
            match track {
                Some(track) => {
                    isomux::extract_track_file(&input, &output, track, &info, &mut progress)?
                }
                None => isomux::extract_audio_file(&input, &output, &info, &mut progress)?,
            }
        }
        Commands::Remux {
            output,
            inputs,
            tags,
        } => {
            let info = tags.into_info()?;
            isomux::remux_fragments_file(&inputs, &output, &info, &mut progress)?;
        }
        Commands::Tags { file } => {
            let tags = isomux::read_tags_file(&file)?;
            let fields = [
                ("title", tags.title),
                ("artist", tags.artist),
                ("album", tags.album),
                ("comment", tags.comment),
                ("year", tags.year),
                ("genre", tags.genre),
                ("duration", tags.duration.map(|duration| format!("{duration}s"))),
            ];
            for (name, value) in fields {
                if let Some(value) = value {
                    println!("{name}: {value}");
                }
            }
            if let Some(cover) = tags.cover {
                println!("cover: {:?}, {} bytes", cover.format, cover.data.len());
            }
        }
    }
    Ok(())
}
