//! ipxdb: CLI for building, querying, editing and exporting xdb files.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use clap::{Parser, Subcommand};
use ipxdb::{export_xdb, Editor, ExportOptions, Maker, SearchMode, Searcher};

#[derive(Parser)]
#[command(name = "ipxdb")]
#[command(version = "0.1.0")]
#[command(about = "Offline IPv4 region database tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an xdb file from a text range file
    Gen {
        /// Input text range file (start|end|region per line)
        #[arg(short, long)]
        src: PathBuf,

        /// Output xdb file
        #[arg(short, long)]
        dst: PathBuf,
    },

    /// Look up the region for an IP
    Search {
        /// Dotted-quad IPv4 address
        ip: String,

        /// xdb file to query
        #[arg(short, long)]
        db: PathBuf,

        /// Loader mode: file, vector or memory
        #[arg(short, long, default_value = "vector")]
        mode: String,
    },

    /// Export an xdb back to a text range file
    Export {
        /// xdb file to export
        #[arg(short, long)]
        db: PathBuf,

        /// Output text range file
        #[arg(short, long)]
        output: PathBuf,

        /// Sweep stride in addresses
        #[arg(long, default_value_t = 256)]
        stride: u32,
    },

    /// List ranges from a text range file
    List {
        /// Text range file
        #[arg(short, long)]
        src: PathBuf,

        /// First range to show
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Number of ranges to show
        #[arg(long, default_value_t = 10)]
        size: usize,
    },

    /// Overwrite a range in a text range file and save it
    Put {
        /// Text range file to edit
        #[arg(short, long)]
        src: PathBuf,

        /// Range literal: start|end|region
        segment: String,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Gen { src, dst } => gen(&src, &dst),
        Commands::Search { ip, db, mode } => search(&ip, &db, &mode),
        Commands::Export { db, output, stride } => export(&db, &output, stride),
        Commands::List { src, offset, size } => list(&src, offset, size),
        Commands::Put { src, segment } => put(&src, &segment),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn gen(src: &PathBuf, dst: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();

    let mut maker = Maker::new(src, dst)?;
    maker.init()?;
    maker.start()?;
    maker.finish()?;

    println!(
        "Built {:?} from {} segments in {:?}",
        dst,
        maker.segments_count(),
        started.elapsed()
    );
    Ok(())
}

fn search(ip: &str, db: &PathBuf, mode: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mode: SearchMode = mode.parse()?;
    let searcher = Searcher::open(db, mode)?;

    let started = Instant::now();
    let (region, io_count) = searcher.search_ip(ip)?;
    let elapsed = started.elapsed();

    if region.is_empty() {
        println!("{}: no region ({} reads, {:?})", ip, io_count, elapsed);
    } else {
        println!("{}: {} ({} reads, {:?})", ip, region, io_count, elapsed);
    }
    Ok(())
}

fn export(db: &PathBuf, output: &PathBuf, stride: u32) -> Result<(), Box<dyn std::error::Error>> {
    let started = Instant::now();
    let options = ExportOptions {
        stride,
        ..ExportOptions::default()
    };

    let cancel = AtomicBool::new(false);
    let runs = export_xdb(db, output, options, |_, _, _| {}, &cancel)?;

    println!("Exported {} runs to {:?} in {:?}", runs, output, started.elapsed());
    Ok(())
}

fn list(src: &PathBuf, offset: usize, size: usize) -> Result<(), Box<dyn std::error::Error>> {
    let editor = Editor::open(src)?;

    let shown = editor.slice(offset, size)?;
    for seg in shown {
        println!("{}", seg);
    }
    println!("# {} of {} segments", shown.len(), editor.len()?);
    Ok(())
}

fn put(src: &PathBuf, segment: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut editor = Editor::open(src)?;

    let (replaced, produced) = editor.put(segment)?;
    editor.save()?;

    println!(
        "Replaced {} segments with {}, {} total",
        replaced,
        produced,
        editor.len()?
    );
    Ok(())
}
