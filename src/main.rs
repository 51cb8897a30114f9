//! ctx: colored de Bruijn graph toolkit.
//!
//! Usage: ctx <COMMAND> [OPTIONS]

use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::process;

use ctxtools::commands::{
    BuildCommand, CleanCommand, ContigsCommand, HealthcheckCommand, InferEdgesCommand,
    JoinCommand, PjoinCommand, PviewCommand, SupernodesCommand, ThreadCommand, ViewCommand,
};
use ctxtools::error::Result;
use ctxtools::kmer::validate_kmer_size;
use ctxtools::util::parse_size;

#[derive(Parser)]
#[command(name = "ctx")]
#[command(version)]
#[command(about = "ctx: colored de Bruijn graph toolkit for genome assembly", long_about = None)]
struct Cli {
    /// Number of worker threads (default: number of CPUs)
    #[arg(long, short = 't', global = true)]
    threads: Option<usize>,

    /// Memory budget for the k-mer hash, e.g. 1G
    #[arg(long, short = 'm', global = true)]
    memory: Option<String>,

    /// Hash table entries, e.g. 4M
    #[arg(long, short = 'n', global = true)]
    nkmers: Option<String>,

    /// Suppress status output on stderr
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a graph file from sequence reads (FASTA/FASTQ/plain)
    Build {
        /// Kmer size (3..=63)
        #[arg(short = 'k', long)]
        kmer: u32,

        /// Sample name recorded in the graph header
        #[arg(long)]
        sample: String,

        /// Output graph file
        #[arg(short, long)]
        out: PathBuf,

        /// Input sequence files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Print a graph file's header and optionally its records
    View {
        /// Also list every kmer record
        #[arg(long)]
        kmers: bool,

        input: PathBuf,
    },

    /// Load and structurally verify a graph file
    Healthcheck { input: PathBuf },

    /// Clean errors from a graph (tips, low-coverage supernodes)
    Clean {
        /// Clip tips shorter than <L> nodes (default 2k when cleaning)
        #[arg(long)]
        tips: Option<usize>,

        /// Remove low-coverage supernodes
        #[arg(long)]
        supernodes: bool,

        /// Cleaning threshold: remove supernodes with mean coverage < T
        #[arg(long)]
        threshold: Option<u32>,

        /// Derive the threshold from sequencing depth:
        /// depth * (R - k + 1) / R
        #[arg(long)]
        kdepth: Option<f64>,

        /// Dump the supernode coverage distribution to a CSV file
        #[arg(long)]
        covgs: Option<PathBuf>,

        /// Write the supernode length distribution before cleaning
        #[arg(long)]
        len_before: Option<PathBuf>,

        /// Write the supernode length distribution after cleaning
        #[arg(long)]
        len_after: Option<PathBuf>,

        /// Output graph file
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Input graph files (joined first if several)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Merge graph files, assigning colors to successive ranges
    Join {
        /// Output graph file
        #[arg(short, long)]
        out: PathBuf,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },

    /// Print every supernode as FASTA
    Supernodes { input: PathBuf },

    /// Assemble path-guided contigs
    Contigs {
        /// Path file from `ctx thread`
        #[arg(short = 'p', long)]
        paths: Option<PathBuf>,

        /// Color to assemble
        #[arg(short = 'c', long, default_value = "0")]
        color: usize,

        input: PathBuf,
    },

    /// Infer edges between adjacent kmers that share a color
    Inferedges {
        /// Output graph file
        #[arg(short, long)]
        out: PathBuf,

        input: PathBuf,
    },

    /// Thread reads through a graph, recording junction choices
    Thread {
        /// Input sequence files
        #[arg(long = "seq", required = true)]
        seq: Vec<PathBuf>,

        /// Output path file
        #[arg(short, long)]
        out: PathBuf,

        /// Existing path file to extend
        #[arg(short = 'p', long)]
        paths: Option<PathBuf>,

        /// Color to thread into
        #[arg(short = 'c', long, default_value = "0")]
        color: usize,

        /// Memory for the path arena, e.g. 64M
        #[arg(long)]
        paths_mem: Option<String>,

        input: PathBuf,
    },

    /// Print the paths attached to each kmer
    Pview {
        /// Path file
        #[arg(short = 'p', long)]
        paths: PathBuf,

        input: PathBuf,
    },

    /// Merge path files, assigning colors to successive ranges
    Pjoin {
        /// Output path file
        #[arg(short, long)]
        out: PathBuf,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    if cli.quiet {
        ctxtools::config::set_quiet(true);
    }
    let threads = cli.threads.unwrap_or_else(num_cpus);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .expect("failed to initialize thread pool");

    if let Err(e) = run(cli, threads) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn run(cli: Cli, threads: usize) -> Result<()> {
    let memory = cli.memory.as_deref().map(parse_size).transpose()?;
    let nkmers = cli.nkmers.as_deref().map(parse_size).transpose()?;

    match cli.command {
        Commands::Build {
            kmer,
            sample,
            out,
            inputs,
        } => {
            let kmer = validate_kmer_size(kmer)?;
            let table_kmers = match (nkmers, memory) {
                (Some(n), _) => n,
                (None, Some(mem)) => mem / 28,
                (None, None) => 4 << 20,
            };
            let cmd = BuildCommand {
                kmer_size: kmer,
                sample,
                seq_paths: inputs,
                nkmers: table_kmers,
                threads,
            };
            cmd.validate()?;
            cmd.run(&out)
        }

        Commands::View { kmers, input } => {
            let cmd = ViewCommand { input, kmers };
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            cmd.run(&mut handle)
        }

        Commands::Healthcheck { input } => HealthcheckCommand {
            input,
            memory,
            nkmers,
        }
        .run(),

        Commands::Clean {
            tips,
            supernodes,
            threshold,
            kdepth,
            covgs,
            len_before,
            len_after,
            out,
            inputs,
        } => CleanCommand {
            inputs,
            out,
            tips,
            supernodes,
            threshold,
            kdepth,
            covgs_out: covgs,
            len_before,
            len_after,
            memory,
            nkmers,
        }
        .run(),

        Commands::Join { out, inputs } => JoinCommand {
            inputs,
            out,
            memory,
            nkmers,
        }
        .run(),

        Commands::Supernodes { input } => {
            let cmd = SupernodesCommand {
                input,
                memory,
                nkmers,
            };
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            cmd.run(&mut handle)
        }

        Commands::Contigs {
            paths,
            color,
            input,
        } => {
            let cmd = ContigsCommand {
                input,
                paths,
                color,
                memory,
                nkmers,
            };
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            cmd.run(&mut handle)
        }

        Commands::Inferedges { out, input } => InferEdgesCommand {
            input,
            out,
            memory,
            nkmers,
        }
        .run(),

        Commands::Thread {
            seq,
            out,
            paths,
            color,
            paths_mem,
            input,
        } => ThreadCommand {
            graph_file: input,
            seq_paths: seq,
            out,
            existing: paths,
            color,
            threads,
            paths_mem,
            memory,
            nkmers,
        }
        .run(),

        Commands::Pview { paths, input } => {
            let cmd = PviewCommand {
                input,
                paths,
                memory,
                nkmers,
            };
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            cmd.run(&mut handle)
        }

        Commands::Pjoin { out, inputs } => PjoinCommand { inputs, out }.run(),
    }
}
