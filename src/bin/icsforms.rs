// icsforms - command-line access to the form codecs

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use icsforms::codec::{self, DesLayout};
use icsforms::schema::SchemaCatalog;
use icsforms::version::Version;
use icsforms::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Layout {
    Lines,
    Piped,
}

impl From<Layout> for DesLayout {
    fn from(layout: Layout) -> Self {
        match layout {
            Layout::Lines => DesLayout::Lines,
            Layout::Piped => DesLayout::Piped,
        }
    }
}

/// Versioned incident-command forms over low-bandwidth radio.
#[derive(Parser)]
#[command(name = "icsforms", version, about = "Encode, decode and diff ICS form versions")]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured ICS-DES layout
    #[arg(long, global = true, value_enum)]
    layout: Option<Layout>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the form types of the standard catalog and their field codes
    Forms {
        /// Show the fields of one form type only
        form_type: Option<String>,
    },

    /// Encode a canonical JSON version as ICS-DES
    Encode {
        /// Canonical JSON document
        version: PathBuf,
    },

    /// Decode ICS-DES text ("-" for stdin) and print the fields as JSON
    Decode {
        input: PathBuf,
    },

    /// Encode the delta between two canonical versions of one form
    Diff {
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        target: PathBuf,
        /// Intermediate versions linking target back to base
        #[arg(long)]
        via: Vec<PathBuf>,
    },

    /// Apply a delta ("-" for stdin) to a canonical base version
    Apply {
        #[arg(long)]
        base: PathBuf,
        delta: PathBuf,
    },
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("reading stdin")?;
        return Ok(buf);
    }
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn read_text(path: &Path) -> Result<String> {
    String::from_utf8(read_input(path)?).with_context(|| format!("{} is not UTF-8", path.display()))
}

fn read_version(path: &Path, catalog: &SchemaCatalog) -> Result<Arc<Version>> {
    let bytes = read_input(path)?;
    let version = codec::canonical::decode(&bytes, catalog)
        .with_context(|| format!("decoding {}", path.display()))?;
    Ok(Arc::new(version))
}

fn list_forms(catalog: &SchemaCatalog, only: Option<&str>) -> Result<()> {
    if let Some(form_type) = only {
        if !catalog.contains(form_type) {
            bail!("unknown form type '{}'", form_type);
        }
    }
    for form_type in catalog.form_types() {
        if only.map_or(false, |only| only != form_type) {
            continue;
        }
        let schema = catalog.lookup(form_type)?;
        println!("{} ({}) {}", schema.form_type(), schema.type_code(), schema.title());
        for field in schema.fields() {
            let indent = if field.group.is_some() { "    " } else { "  " };
            let required = if field.required { " *" } else { "" };
            println!(
                "{}{:<4}{} {}{}",
                indent,
                field.short_code,
                field.field_id,
                field.semantic_type.kind(),
                required
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let mut options = config.des_options();
    if let Some(layout) = cli.layout {
        options.layout = layout.into();
    }
    let catalog = SchemaCatalog::standard()?;

    match cli.command {
        Commands::Forms { form_type } => list_forms(&catalog, form_type.as_deref())?,
        Commands::Encode { version } => {
            let version = read_version(&version, &catalog)?;
            println!("{}", codec::des::encode(&version, &catalog, &options)?);
        }
        Commands::Decode { input } => {
            let text = read_text(&input)?;
            let form = codec::des::decode(&text, &catalog)?;
            println!("{}", serde_json::to_string_pretty(&form)?);
        }
        Commands::Diff { base, target, via } => {
            let base = read_version(&base, &catalog)?;
            let target = read_version(&target, &catalog)?;
            let mut lineage = vec![base.clone(), target.clone()];
            for path in &via {
                lineage.push(read_version(path, &catalog)?);
            }
            let text = codec::delta::encode(&base, &target, lineage.as_slice(), &catalog, &options)
                .context("encoding delta")?;
            println!("{}", text);
        }
        Commands::Apply { base, delta } => {
            let base = read_version(&base, &catalog)?;
            let delta = codec::delta::decode(&read_text(&delta)?, &catalog)?;
            let fields = codec::delta::apply(&delta, &base)?;
            let out = serde_json::json!({
                "form_type": delta.form_type,
                "version_id": delta.version_id,
                "parent_version_id": base.version_id(),
                "fields": fields,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}
