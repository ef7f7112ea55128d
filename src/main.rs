mod allele;
mod caller;
mod candidate;
mod chrom_list;
mod cli;
mod driver;
mod errors;
mod genome_region;
mod genotype;
mod globals;
mod haplotype;
mod haplotype_gen;
mod int_range;
mod likelihood;
mod logger;
mod os_utils;
mod phaser;
mod prob_utils;
mod read;
mod read_manager;
mod read_pipeline;
mod reference;
mod run_stats;
#[cfg(test)]
mod scenario_tests;
mod variant;
mod vcf_output;

use hhmmss::Hhmmss;
use log::{error, info};

use crate::errors::MorayResult;
use crate::globals::{PROGRAM_NAME, PROGRAM_VERSION};

fn run(settings: &cli::Settings) -> MorayResult<()> {
    info!("Starting {PROGRAM_NAME} {PROGRAM_VERSION}");
    info!(
        "cmdline: {}",
        std::env::args().collect::<Vec<_>>().join(" ")
    );
    if settings.threads == 0 {
        info!("Running with one worker thread per logical cpu");
    } else {
        info!("Running on {} threads", settings.threads);
    }

    let start = std::time::Instant::now();

    driver::run_calling(settings)?;

    info!(
        "{PROGRAM_NAME} completed. Total Runtime: {}",
        start.elapsed().hhmmssxxx()
    );
    Ok(())
}

fn main() {
    let settings = cli::parse_settings();

    os_utils::attempt_max_open_file_limit();
    logger::setup_logger(None, settings.debug).unwrap();

    // Validation happens after logger setup so warnings have somewhere to go; usage failures
    // exit before any processing starts
    let settings = match cli::validate_and_fix_settings(settings) {
        Ok(x) => x,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(err.exit_code());
        }
    };

    if let Err(err) = run(&settings) {
        error!("{err}");
        std::process::exit(err.exit_code());
    }
}
