use clap::Parser;
use nhgis_extract::NhgisError;
use nhgis_extract::cli::{args::Args, commands};
use std::process;

fn main() {
    let args = Args::parse();

    // If no subcommand was provided, show help and available commands
    if args.command.is_none() {
        show_help_and_commands();
        process::exit(0);
    }

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        tokio::select! {
            result = commands::run(args) => result,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    eprintln!("Failed to listen for CTRL+C: {}", e);
                }
                eprintln!("\nReceived CTRL+C, shutting down...");
                Err(NhgisError::processing_interrupted("Interrupted by user").into())
            }
        }
    });

    match result {
        Ok(_stats) => {
            // Unresolved variables have already been reported by the command
            process::exit(0);
        }
        Err(error) => {
            eprintln!("Error: {:#}", error);
            process::exit(1);
        }
    }
}

/// Show help information and available commands when no subcommand is provided
fn show_help_and_commands() {
    println!("NHGIS Extract - aggregate census data with labelled variables");
    println!("=============================================================");
    println!();
    println!("Request NHGIS extracts through the IPUMS API and derive numeric");
    println!("variables by source table code, labelled from the extract codebook.");
    println!();
    println!("USAGE:");
    println!("    nhgis-extract <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    fetch       Submit an extract, wait, download and derive variables");
    println!("    derive      Derive variables from a downloaded extract");
    println!("    codebook    Show the table crosswalk of a codebook");
    println!("    help        Show this help message or help for specific commands");
    println!();
    println!("EXAMPLES:");
    println!("    # Median age and population for every state, 2023 ACS 5-year:");
    println!("    nhgis-extract fetch --dataset 2019_2023_ACS5a --geog state \\");
    println!("                        --tables B01002,B03002 --year 2023 \\");
    println!("                        --var medage=B01002:E001 --var pop=B03002:E001");
    println!();
    println!("    # Derive from an extract unpacked earlier:");
    println!("    nhgis-extract derive --dir ~/nhgis/downloads --var hisp=B03002:E012");
    println!();
    println!("    # Inspect a codebook:");
    println!("    nhgis-extract codebook nhgis0001_ds262_20225_state_codebook.txt --detailed");
    println!();
    println!("The API key is read from --api-key or the IPUMS_API_KEY environment variable.");
    println!("For detailed help on any command, use:");
    println!("    nhgis-extract <COMMAND> --help");
}
