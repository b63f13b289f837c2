use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::*;
use clap::Parser;
use clap_verbosity_flag::Verbosity;
use colored::Colorize;
use log::*;

use collinea::display::{first_appearance_order, upgma_order};
use collinea::errors::FileError;
use collinea::pipeline::{Phase, Pipeline, Settings};
use collinea::records::{read_records_file, write_records_file};
use collinea::segments::{read_links_file, Segmentation};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Segment boundaries of every query
    #[clap(short, long)]
    segments: String,

    /// Segment links, as `qA:sA qB:sB forward reverse` lines
    #[clap(short, long)]
    links: Vec<String>,

    /// Block records to use as additional evidence
    #[clap(short, long)]
    records: Vec<String>,

    /// Queries whose rearrangements weigh more when ordering
    #[clap(long = "reference")]
    references: Vec<String>,

    /// The phases to run, in order
    #[clap(short, long, value_delimiter = ',', default_value = Phase::DEFAULT_SEQUENCE)]
    phases: Vec<Phase>,

    /// Where to write the final block records
    #[clap(short, long, default_value = "blocks.tsv")]
    out: String,

    /// Where to write the display order of the queries
    #[clap(long)]
    order_out: Option<String>,

    /// Order queries by similarity rather than by first appearance
    #[clap(long)]
    upgma: bool,

    #[clap(long, default_value_t = 1.)]
    min_link_support: f64,

    #[clap(long, default_value_t = 1.)]
    min_merge_support: f64,

    #[clap(long, default_value_t = 0.8)]
    min_length_ratio: f64,

    /// Only ever concatenate chains
    #[clap(long)]
    no_insert: bool,

    /// Number of threads to use; 0 for all
    #[clap(short, long, default_value_t = 0)]
    threads: usize,

    #[clap(flatten)]
    verbose: Verbosity,
}

fn write_order(filename: &str, pipeline: &Pipeline, upgma: bool) -> Result<()> {
    let chains = pipeline.chains().unwrap_or_default();
    let registry = pipeline.segmentation().registry();
    let order = if upgma {
        upgma_order(chains, registry.len())
    } else {
        first_appearance_order(chains, registry.len())
    };

    let mut out = BufWriter::new(
        File::create(filename).map_err(|source| FileError::WhileCreating { source, filename: filename.into() })?,
    );
    for q in order {
        writeln!(out, "{}", registry.name(q))?;
    }
    Ok(out.flush()?)
}

fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::new().filter_level(args.verbose.log_level_filter()).init();
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()
        .context("while setting up the thread pool")?;

    let settings = Settings {
        references: args.references.clone(),
        min_link_support: args.min_link_support,
        min_merge_support: args.min_merge_support,
        min_length_ratio: args.min_length_ratio,
        insert_mode: !args.no_insert,
    };
    let segmentation = Segmentation::from_file(&args.segments)?;
    info!("{} queries loaded from {}", segmentation.registry().len(), args.segments.bright_yellow());
    let mut pipeline = Pipeline::new(segmentation, settings);

    for phase in args.phases.iter() {
        info!("Running {}", phase.to_string().bold());
        let r = match phase {
            Phase::Link => {
                for f in args.links.iter() {
                    let links = read_links_file(f, pipeline.segmentation())?;
                    info!("{} links read from {}", links.len(), f.bright_yellow());
                    pipeline.add_links(&links);
                }
                for f in args.records.iter() {
                    let records = read_records_file(f, pipeline.segmentation())?;
                    info!("{} records read from {}", records.len(), f.bright_yellow());
                    pipeline.add_records(&records);
                }
                std::result::Result::Ok(())
            }
            Phase::Build => pipeline.build().map(|_| ()),
            Phase::Merge => pipeline.merge().map(|_| ()),
            Phase::Proximity => pipeline.proximity().map(|_| ()),
            Phase::Order => pipeline.order(false).map(|_| ()),
            Phase::StrictOrder => pipeline.order(true).map(|_| ()),
            Phase::Write => match pipeline.records() {
                std::result::Result::Ok(records) => {
                    write_records_file(&args.out, &records, pipeline.segmentation().registry())?;
                    info!("{} blocks written to {}", records.len(), args.out.bright_yellow());
                    if let Some(order_out) = args.order_out.as_ref() {
                        write_order(order_out, &pipeline, args.upgma)?;
                    }
                    std::result::Result::Ok(())
                }
                Err(e) => Err(e),
            },
        };
        if let Err(e) = r {
            error!("{}", e);
        }
    }

    Ok(())
}
