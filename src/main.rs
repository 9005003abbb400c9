use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sparser::{
    Simulator, Variant,
    config::{ParameterBlock, ParseArrayBlock, Scenario, parse_hex_bytes, parse_u16},
    error::HexError,
    loader::{Format, load_bytecode},
    variant::MIN_PC,
};

#[derive(Parser, Debug)]
#[command(name = "sparser")]
#[command(about = "Disassembler and simulator for soft-parser byte-code", long_about = None)]
struct Cli {
    /// Target hardware generation (default dpaa2, or the scenario's).
    #[arg(long, global = true, value_enum)]
    variant: Option<Variant>,

    /// Log decoded instructions to stderr; repeat for every effect.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the instructions of a byte-code file.
    Disasm(CodeArgs),
    /// Execute a byte-code file against a frame.
    Sim(SimArgs),
}

#[derive(Args, Debug)]
struct CodeArgs {
    /// Byte-code file.
    file: PathBuf,

    /// Load address of the first instruction (default 0x20).
    #[arg(long, value_parser = parse_u16)]
    pc: Option<u16>,

    #[arg(long, value_enum, default_value_t = Format::Auto)]
    format: Format,

    /// ELF symbol or section holding the byte-code.
    #[arg(long)]
    symbol: Option<String>,
}

#[derive(Args, Debug)]
struct SimArgs {
    #[command(flatten)]
    code: CodeArgs,

    /// JSON scenario supplying the run's inputs.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Frame bytes as hex.
    #[arg(long, value_parser = hex_bytes)]
    frame: Option<HexBytes>,

    #[arg(long, value_parser = parse_u16)]
    header_base: Option<u16>,

    /// Cycle limit; 0 disables it.
    #[arg(long, value_parser = parse_u16)]
    limit: Option<u16>,

    /// Parameter array bytes as hex.
    #[arg(long, value_parser = hex_bytes)]
    params: Option<HexBytes>,

    #[arg(long, default_value_t = 0)]
    params_offset: usize,

    /// Next-header field of the parse array.
    #[arg(long, value_parser = parse_u16)]
    next_header: Option<u16>,

    /// Frame attribute flag to set before the run.
    #[arg(long = "faf", value_name = "BIT")]
    faf: Vec<u8>,

    /// Print the inputs before running.
    #[arg(long, action = ArgAction::SetTrue)]
    show_inputs: bool,
}

/// Hex bytes given on the command line.
#[derive(Debug, Clone)]
struct HexBytes(Vec<u8>);

fn hex_bytes(text: &str) -> Result<HexBytes, HexError> {
    parse_hex_bytes(text).map(HexBytes)
}

fn main() {
    match run() {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("Error: {err:#}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the run ended without an error status.
fn run() -> Result<bool> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Disasm(args) => {
            let bytecode = load(&args)?;
            let mut sim = Simulator::new(cli.variant.unwrap_or_default());
            let report = sim.disassemble(args.pc.unwrap_or(MIN_PC), &bytecode)?;
            println!("{report}");
            Ok(report.is_success())
        }
        Command::Sim(args) => {
            let bytecode = load(&args.code)?;
            let scenario = args.scenario()?;
            let variant = cli.variant.or(scenario.variant).unwrap_or_default();
            let start_pc = args.code.pc.or(scenario.start_pc).unwrap_or(MIN_PC);

            let mut sim = Simulator::new(variant);
            sim.init();
            scenario
                .apply(&mut sim)
                .context("applying simulation inputs")?;
            if args.show_inputs {
                println!("{}", sim.dump_inputs());
            }
            let report = sim.run(start_pc, &bytecode)?;
            println!("{report}");
            Ok(report.is_success())
        }
    }
}

fn load(args: &CodeArgs) -> Result<Vec<u8>> {
    load_bytecode(&args.file, args.format, args.symbol.as_deref())
}

impl SimArgs {
    /// The scenario file, if any, with command-line values laid over it.
    fn scenario(&self) -> Result<Scenario> {
        let mut scenario = match &self.scenario {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                Scenario::from_json(&text)
                    .with_context(|| format!("parsing scenario {}", path.display()))?
            }
            None => Scenario::default(),
        };

        if let Some(HexBytes(frame)) = &self.frame {
            scenario.frame = Some(frame.clone());
        }
        if self.header_base.is_some() {
            scenario.header_base = self.header_base;
        }
        if self.limit.is_some() {
            scenario.cycle_limit = self.limit;
        }
        if let Some(HexBytes(bytes)) = &self.params {
            scenario.parameters = Some(ParameterBlock {
                offset: self.params_offset,
                bytes: bytes.clone(),
            });
        }
        if self.next_header.is_some() || !self.faf.is_empty() {
            let block = scenario.parse_array.get_or_insert_with(ParseArrayBlock::default);
            if self.next_header.is_some() {
                block.next_header = self.next_header;
            }
            block.faf.extend(&self.faf);
        }
        Ok(scenario)
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}
