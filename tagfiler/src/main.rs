mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use output::{
    CatOutput, ContentInfo, FilesOutput, GetOutput, InitOutput, MetaOutput, OutputWriter,
    ResetOutput, StoreOutput,
};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tagfiler_core::{Filer, Reader, TagSet};
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Tagfiler - A content-addressed file store with tag queries
#[derive(Parser)]
#[command(name = "tagfiler")]
#[command(about = "Store files under key=value tags and query them back", long_about = None)]
#[command(version)]
struct Cli {
    /// Store root directory (defaults to TAGFILER_ROOT env var or ./tagfiler-store)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Output JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a store (stores are also created on first use)
    Init,

    /// Store a file under a set of tags
    Store {
        /// File to store, or - to read stdin
        path: PathBuf,

        /// Tag as key=value (repeatable)
        #[arg(short, long = "tag", value_parser = parse_tag_arg)]
        tags: Vec<(String, String)>,

        /// Logical name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// List content files matching the tags
    Files {
        /// Tag as key=value (repeatable)
        #[arg(short, long = "tag", value_parser = parse_tag_arg)]
        tags: Vec<(String, String)>,
    },

    /// List metadata records matching the tags
    Meta {
        /// Tag as key=value (repeatable)
        #[arg(short, long = "tag", value_parser = parse_tag_arg)]
        tags: Vec<(String, String)>,
    },

    /// List content files with their metadata
    Get {
        /// Tag as key=value (repeatable)
        #[arg(short, long = "tag", value_parser = parse_tag_arg)]
        tags: Vec<(String, String)>,
    },

    /// Output the content of every item matching the tags
    Cat {
        /// Tag as key=value (repeatable)
        #[arg(short, long = "tag", value_parser = parse_tag_arg)]
        tags: Vec<(String, String)>,

        /// Transform applied to each item's text
        #[arg(long, value_enum)]
        transform: Option<Transform>,
    },

    /// Delete all content and the index
    Reset {
        /// Confirm deletion
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transform {
    Upper,
    Lower,
    Trim,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Init => "init",
            Commands::Store { .. } => "store",
            Commands::Files { .. } => "files",
            Commands::Meta { .. } => "meta",
            Commands::Get { .. } => "get",
            Commands::Cat { .. } => "cat",
            Commands::Reset { .. } => "reset",
        }
    }
}

impl Transform {
    fn reader(self) -> Reader {
        match self {
            Transform::Upper => Reader::text("upper", |s| s.to_uppercase()),
            Transform::Lower => Reader::text("lower", |s| s.to_lowercase()),
            Transform::Trim => Reader::text("trim", |s| s.trim().to_string()),
        }
    }
}

fn parse_tag_arg(s: &str) -> std::result::Result<(String, String), String> {
    tagfiler_core::parse_tag(s).ok_or_else(|| format!("expected key=value, got '{}'", s))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let output = OutputWriter::new(cli.json);

    // Determine store root: CLI arg > TAGFILER_ROOT env var > ./tagfiler-store default
    let root = cli
        .root
        .or_else(|| std::env::var("TAGFILER_ROOT").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./tagfiler-store"));
    debug!("Running '{}' against {}", cli.command.name(), root.display());

    let result = match cli.command {
        Commands::Init => cmd_init(&root, &output),
        Commands::Store { path, tags, name } => cmd_store(&root, &path, tags, name, &output),
        Commands::Files { tags } => cmd_files(&root, tags, &output),
        Commands::Meta { tags } => cmd_meta(&root, tags, &output),
        Commands::Get { tags } => cmd_get(&root, tags, &output),
        Commands::Cat { tags, transform } => cmd_cat(&root, tags, transform, &output),
        Commands::Reset { yes } => cmd_reset(&root, yes, &output),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = result_code(&e);
            output.write_error(&e, code);
            ExitCode::from(code)
        }
    }
}

/// 2 for errors worth retrying (lock contention), 1 otherwise.
fn result_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<tagfiler_core::Error>() {
        Some(e) if e.is_retryable() => 2,
        _ => 1,
    }
}

fn open(root: &Path) -> Result<Filer> {
    debug!("Opening store at {}", root.display());
    Filer::open(root).with_context(|| format!("Failed to open store at {}", root.display()))
}

fn cmd_init(root: &Path, output: &OutputWriter) -> Result<()> {
    let filer = open(root)?;
    let algorithm = filer.config().algorithm.as_str();

    let data = InitOutput {
        success: true,
        result_code: 0,
        root: root.display().to_string(),
        algorithm: algorithm.to_string(),
    };

    output.write(&data, || {
        format!(
            "Initialized tagfiler store at {}\nAlgorithm: {}\n",
            root.display(),
            algorithm
        )
    })
}

fn cmd_store(
    root: &Path,
    path: &Path,
    tags: Vec<(String, String)>,
    name: Option<String>,
    output: &OutputWriter,
) -> Result<()> {
    let filer = open(root)?;
    let tags: TagSet = tags.into_iter().collect();

    let (fingerprint, name) = if path == Path::new("-") {
        if atty::is(atty::Stream::Stdin) {
            anyhow::bail!("Refusing to read content from an interactive terminal");
        }
        let mut content = Vec::new();
        io::stdin()
            .read_to_end(&mut content)
            .context("Failed to read stdin")?;
        debug!("Read {} bytes from stdin", content.len());

        let name = name.unwrap_or_else(|| "stdin".to_string());
        let fingerprint = filer
            .store_content(&name, &content, &tags)
            .context("Failed to store stdin")?;
        (fingerprint, name)
    } else {
        let item = filer
            .store_file(path, name.as_deref(), &tags)
            .with_context(|| format!("Failed to store {}", path.display()))?;
        (item.fingerprint, item.meta.name)
    };

    let data = StoreOutput {
        success: true,
        result_code: 0,
        fingerprint,
        name,
        tags,
    };

    output.write(&data, || format!("{} {}\n", data.fingerprint, data.name))
}

fn cmd_files(root: &Path, tags: Vec<(String, String)>, output: &OutputWriter) -> Result<()> {
    let filer = open(root)?;
    let query: TagSet = tags.into_iter().collect();

    let files: Vec<String> = filer
        .content_files(&query)
        .context("Failed to query index")?
        .iter()
        .map(|p| p.display().to_string())
        .collect();

    let data = FilesOutput {
        success: true,
        result_code: 0,
        files,
    };

    output.write(&data, || {
        data.files.iter().map(|f| format!("{}\n", f)).collect()
    })
}

fn cmd_meta(root: &Path, tags: Vec<(String, String)>, output: &OutputWriter) -> Result<()> {
    let filer = open(root)?;
    let query: TagSet = tags.into_iter().collect();

    let meta = filer.meta(&query).context("Failed to read metadata")?;

    let data = MetaOutput {
        success: true,
        result_code: 0,
        meta,
    };

    output.write(&data, || {
        data.meta
            .iter()
            .map(|m| format!("{} {}\n", m.name, format_tags(&m.tag)))
            .collect()
    })
}

fn cmd_get(root: &Path, tags: Vec<(String, String)>, output: &OutputWriter) -> Result<()> {
    let filer = open(root)?;
    let query: TagSet = tags.into_iter().collect();

    let items = filer.get(&query).context("Failed to read items")?;

    let data = GetOutput {
        success: true,
        result_code: 0,
        items,
    };

    output.write(&data, || {
        data.items
            .iter()
            .map(|item| {
                format!(
                    "{} {} {}\n",
                    item.file.display(),
                    item.meta.name,
                    format_tags(&item.meta.tag)
                )
            })
            .collect()
    })
}

fn cmd_cat(
    root: &Path,
    tags: Vec<(String, String)>,
    transform: Option<Transform>,
    output: &OutputWriter,
) -> Result<()> {
    let filer = open(root)?;
    let query: TagSet = tags.into_iter().collect();
    let reader = transform.map(Transform::reader);

    let fingerprints = filer.fingerprints(&query).context("Failed to query index")?;
    debug!("Reading {} items", fingerprints.len());

    let mut contents = Vec::with_capacity(fingerprints.len());
    for fingerprint in fingerprints {
        let content = filer
            .content_of(&fingerprint, reader.as_ref())
            .with_context(|| format!("Failed to read content of {}", fingerprint))?;
        contents.push(ContentInfo {
            fingerprint,
            content: String::from_utf8_lossy(&content).into_owned(),
        });

        if !output.is_json() {
            output.write_raw(&content)?;
        }
    }

    if !output.is_json() {
        return Ok(());
    }

    let data = CatOutput {
        success: true,
        result_code: 0,
        contents,
    };

    output.write(&data, String::new)
}

fn cmd_reset(root: &Path, yes: bool, output: &OutputWriter) -> Result<()> {
    if !yes {
        anyhow::bail!("Reset deletes everything in {}; pass --yes to confirm", root.display());
    }

    let filer = open(root)?;
    filer
        .reset()
        .with_context(|| format!("Failed to reset store at {}", root.display()))?;

    let data = ResetOutput {
        success: true,
        result_code: 0,
        root: root.display().to_string(),
    };

    output.write(&data, || format!("Reset store at {}\n", root.display()))
}

fn format_tags(tags: &TagSet) -> String {
    tags.iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}
