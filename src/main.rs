use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use busmatrix::consistent_genes::{EmptyIntersectionPolicy, Genename, EC};
use busmatrix::count::{build_with_stats, CountMode, CountParams};
use busmatrix::inspect::inspect;
use busmatrix::io::{BusFolder, BusTextReader, DEFAULT_BUSTEXT};
use busmatrix::whitelist::Whitelist;
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: MyCommand,
}

#[derive(Subcommand)]
enum MyCommand {
    Count(CountArgs),
    ResolveEc(ResolveArgs),
    Inspect(InspectArgs),
}

/// countmatrix from a sorted busfile in text format
#[derive(Args)]
struct CountArgs {
    /// output folder (gene.mtx, gene.genes.txt, gene.barcodes.txt)
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// input busfolder (matrix.ec, transcripts.txt and the text busfile)
    #[arg(long = "ifolder")]
    inbus: PathBuf,

    /// name of the text busfile inside the busfolder
    #[arg(long = "bustext", default_value = DEFAULT_BUSTEXT)]
    bustext: String,

    /// Transcript-to-gene file
    #[arg(long = "t2g")]
    t2g: PathBuf,

    /// Cell Barcode Whitelist
    #[arg(long = "whitelist")]
    whitelist: PathBuf,

    /// skip malformed lines and unknown ECs instead of failing
    #[arg(long = "lenient")]
    lenient: bool,

    /// drop molecules whose ECs have no gene in common (default: split across the union)
    #[arg(long = "drop-empty")]
    drop_empty: bool,

    /// count reads instead of UMIs
    #[arg(long = "reads")]
    reads: bool,

    /// expected number of cells (preallocation only)
    #[arg(long = "est-cells", default_value_t = 10_000)]
    est_cells: usize,

    /// expected number of genes (preallocation only)
    #[arg(long = "est-genes", default_value_t = 30_000)]
    est_genes: usize,
}

/// resolve an EC into gene names
#[derive(Args)]
struct ResolveArgs {
    /// input busfolder
    #[arg(long = "ifolder")]
    inbus: PathBuf,

    /// Transcript-to-gene file
    #[arg(long = "t2g")]
    t2g: PathBuf,

    /// Equivalence class to query genes for
    #[arg(long = "ec")]
    ec: u32,
}

/// Inspect a sorted text busfile for stats
#[derive(Args)]
struct InspectArgs {
    /// input busfile (text)
    #[arg(short = 'i', long = "input")]
    inbus: PathBuf,
}

fn run_count(args: CountArgs) -> Result<()> {
    let bfolder = BusFolder::new(&args.inbus).with_bustext(&args.bustext);
    let busfile = bfolder.get_busfile();
    // opened first: a missing busfile should fail before the (slow) mapper is built
    let reader = BusTextReader::new(&busfile)?;

    let whitelist = Whitelist::from_file(&args.whitelist).context("loading whitelist")?;
    info!("{} whitelisted barcodes", whitelist.len());
    let mapper = bfolder.make_mapper(&args.t2g).context("building EC->gene mapping")?;

    let params = CountParams {
        estimated_cells: args.est_cells,
        estimated_genes: args.est_genes,
        policy: if args.drop_empty { EmptyIntersectionPolicy::Drop } else { EmptyIntersectionPolicy::Union },
        mode: if args.reads { CountMode::Reads } else { CountMode::Umi },
        lenient: args.lenient,
    };

    info!("Doing count");
    let (countmatrix, _stats) = build_with_stats(reader, &mapper, &whitelist, &params)
        .with_context(|| format!("counting {}", busfile.display()))?;

    fs::create_dir_all(&args.output).with_context(|| format!("creating {}", args.output.display()))?;
    countmatrix.write(&args.output)?;
    info!("wrote {}", args.output.display());
    Ok(())
}

fn run_resolve(args: ResolveArgs) -> Result<()> {
    let bfolder = BusFolder::new(&args.inbus);
    let mapper = bfolder.make_mapper(&args.t2g)?;
    let mut genenames: Vec<Genename> = mapper
        .get_genenames(EC(args.ec))
        .with_context(|| format!("EC {} not in {}", args.ec, bfolder.get_ecmatrix_file().display()))?
        .into_iter()
        .collect();
    genenames.sort();
    let names: Vec<&str> = genenames.iter().map(|g| g.0.as_str()).collect();
    println!("EC {} -> {:?}", args.ec, names);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let result = match cli.command {
        MyCommand::Count(args) => run_count(args),
        MyCommand::ResolveEc(args) => run_resolve(args),
        MyCommand::Inspect(args) => inspect(&args.inbus).map(|summary| println!("{summary}")).map_err(Into::into),
    };
    if let Err(err) = result {
        error!("{:#}", err);
        std::process::exit(1);
    }
}
