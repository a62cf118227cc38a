use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vitapkg::config::Settings;
use vitapkg::rif::{self, RifMode, RIF_SIZE};
use vitapkg::{HttpRangeFetcher, JsonFileStore, PkgReader, UrlIdentityCache};

#[derive(Parser)]
#[command(name = "vitapkg", version, about = "PKG metadata reader and zRIF license codec")]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Content id cache file, overrides the settings file
    #[arg(long, global = true)]
    cache: Option<PathBuf>,
    /// Range request timeout in seconds, overrides the settings file
    #[arg(long, global = true)]
    timeout: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read header, SFO and digest of remote packages
    Pkg {
        #[arg(required = true, num_args = 1..)]
        urls: Vec<String>,
        /// One JSON object per line instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the content id of remote packages
    ContentId {
        #[arg(required = true, num_args = 1..)]
        urls: Vec<String>,
    },
    /// Expand a zRIF token into a 512-byte RIF
    ZrifDecode {
        token: String,
        /// Write the RIF here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compress a 512-byte RIF file into a zRIF token
    ZrifEncode {
        input: PathBuf,
    },
    /// Storage file name of a license for an account id
    RifName {
        /// Account id, hexadecimal
        #[arg(value_parser = parse_aid)]
        aid: u64,
        /// License valid for any account
        #[arg(long)]
        fixed: bool,
    },
    /// Recover the account id from a license file name
    RifAid {
        name: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::load_or_default(cli.config.as_deref())?;
    if let Some(cache) = cli.cache {
        settings.cache_path = cache;
    }
    if let Some(timeout) = cli.timeout {
        settings.timeout_secs = timeout;
    }
    settings.validate()?;

    match cli.command {

        // ── Pkg ──────────────────────────────────────────────────────────────
        Commands::Pkg { urls, json } => {
            with_reader(&settings, |reader| {
                let mut failed = 0usize;
                if !json {
                    println!("{:<36} {:>12} {:<4} {:>5} {:>5} {:>8}  SHA-1",
                             "Content id", "Size", "Cat", "App", "Sys", "Created");
                }
                for url in &urls {
                    match reader.read(url) {
                        Ok(record) if json => println!("{}", serde_json::to_string(&record)?),
                        Ok(record) => println!(
                            "{:<36} {:>12} {:<4} {:>5} {:>5} {:>8}  {}",
                            record.content_id,
                            record.size,
                            record.category.as_deref().unwrap_or("-"),
                            opt(record.app_version),
                            opt(record.system_version),
                            opt(record.creation_date),
                            record.sha1_hex(),
                        ),
                        Err(e) => {
                            eprintln!("{url}: {e}");
                            failed += 1;
                        }
                    }
                }
                finish(failed, urls.len())
            })?;
        }

        // ── ContentId ────────────────────────────────────────────────────────
        Commands::ContentId { urls } => {
            with_reader(&settings, |reader| {
                let mut failed = 0usize;
                for url in &urls {
                    match reader.content_id(url) {
                        Ok(id) => println!("{id}  {url}"),
                        Err(e) => {
                            eprintln!("{url}: {e}");
                            failed += 1;
                        }
                    }
                }
                finish(failed, urls.len())
            })?;
        }

        // ── zRIF ─────────────────────────────────────────────────────────────
        Commands::ZrifDecode { token, output } => {
            let record = rif::decode_zrif(token.trim())?;
            let content_id = rif::content_id_from_rif(&record)?;
            println!("Content id  {content_id}");
            if let Some(path) = output {
                std::fs::write(&path, &record)?;
                println!("Wrote       {}", path.display());
            }
        }

        Commands::ZrifEncode { input } => {
            let record = std::fs::read(&input)?;
            if record.len() != RIF_SIZE {
                return Err(format!("{}: expected {RIF_SIZE} bytes, found {}", input.display(), record.len()).into());
            }
            println!("{}", rif::encode_zrif(&record)?);
        }

        // ── RIF names ────────────────────────────────────────────────────────
        Commands::RifName { aid, fixed } => {
            let mode = if fixed { RifMode::Fixed } else { RifMode::Bounded };
            println!("{}", rif::rif_name(mode.into(), aid));
        }

        Commands::RifAid { name } => {
            let file_name = Path::new(&name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.clone());
            let (mode, aid) = rif::account_id_from_rif_name(&file_name)?;
            println!("Mode        {mode:?}");
            println!("Account id  {aid:016x}");
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// Run `f` with a reader over the persistent cache, then flush the cache if
/// anything was added, whether or not `f` succeeded.
fn with_reader<F>(settings: &Settings, f: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(&mut PkgReader<'_, HttpRangeFetcher>) -> Result<(), Box<dyn std::error::Error>>,
{
    let mut store = JsonFileStore::new(&settings.cache_path);
    let mut cache = UrlIdentityCache::load(&store);
    tracing::debug!(entries = cache.len(), "loaded PKG cache");

    let fetcher = HttpRangeFetcher::with_timeout(settings.timeout());
    let result = {
        let mut reader = PkgReader::with_config(fetcher, &mut cache, settings.reader_config());
        f(&mut reader)
    };

    if cache.is_dirty() {
        cache.flush(&mut store)?;
    }
    result
}

fn finish(failed: usize, total: usize) -> Result<(), Box<dyn std::error::Error>> {
    if failed > 0 {
        return Err(format!("{failed} of {total} packages failed").into());
    }
    Ok(())
}

fn opt(value: Option<u32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

fn parse_aid(s: &str) -> Result<u64, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(digits, 16).map_err(|e| format!("invalid account id '{s}': {e}"))
}
