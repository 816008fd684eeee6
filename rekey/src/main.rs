use clap::CommandFactory;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use log::LevelFilter;
use rekey::{fix, pipeline};
use std::{env, io, process};

/// Logging is controlled with RUST_LOG; see docs for the env_logger crate.
/// If RUST_LOG is not set, the log level defaults to Info.
/// Set RUST_LOG=rekey::module::path=level to see messages for a given module.
#[derive(Parser)]
#[command(version, about, long_about = None, verbatim_doc_comment)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove the key change from a MusicXML score and optionally overlay
    /// lyrics. Without a start measure, over-sharped key signatures are
    /// detected and replaced automatically.
    Fix(fix::FixOptions),
    /// Run the whole chain on a scanned PDF: rasterize, recognize each page,
    /// combine the pages, fix the key change, and render a new PDF.
    Pipeline(pipeline::PipelineOptions),
    /// Generate shell completion
    Completion {
        /// shell
        shell: Shell,
    },
}

fn run() -> anyhow::Result<()> {
    // Usage errors exit 1, not clap's default 2; help and version are not
    // errors.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };
    let mut log_builder = env_logger::builder();
    if env::var("RUST_LOG").is_err() {
        log_builder.filter_level(LevelFilter::Info);
    }
    log_builder.init();

    match cli.command {
        Commands::Completion { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            clap_complete::generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
        Commands::Fix(options) => fix::run(options),
        Commands::Pipeline(options) => pipeline::run(options),
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}
