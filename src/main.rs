use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tracing::{error, info, Level};

use apple1_emulator::pia::CARRIAGE_RETURN;
use apple1_emulator::{EmulatorResult, Input, Machine, MachineConfig};

#[derive(Parser, Debug)]
#[command(name = "apple1_emulator")]
#[command(about = "Headless Apple-1 emulator", long_about = None)]
struct Args {
    /// ROM image to use instead of the built-in Woz monitor
    #[arg(long, value_name = "PATH")]
    rom: Option<PathBuf>,

    /// JSON machine config
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// RAM size in bytes, decimal or 0x-prefixed hex
    #[arg(long, value_parser = parse_size)]
    ram_size: Option<usize>,

    /// Text to type at the keyboard
    #[arg(long = "type", value_name = "TEXT")]
    type_text: Option<String>,

    /// File whose contents are typed at the keyboard
    #[arg(long, value_name = "PATH")]
    type_file: Option<PathBuf>,

    /// Number of instructions to execute
    #[arg(long, default_value_t = 1_000_000)]
    steps: u64,

    /// Load snapshot before execution
    #[arg(long, value_name = "PATH")]
    load: Option<PathBuf>,

    /// Save snapshot after execution
    #[arg(long, value_name = "PATH")]
    save: Option<PathBuf>,

    /// More log output on stderr, repeat for more
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_size(text: &str) -> Result<usize, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|err| format!("invalid size {text:?}: {err}"))
}

fn build_config(args: &Args) -> EmulatorResult<MachineConfig> {
    let mut config = match &args.config {
        Some(path) => MachineConfig::from_json(&fs::read_to_string(path)?)?,
        None => MachineConfig::default(),
    };
    if let Some(size) = args.ram_size {
        config.ram_size = size;
    }
    if let Some(path) = &args.rom {
        config.rom_image = Some(fs::read(path)?);
        info!("loaded ROM from {}", path.display());
    }
    if let Some(text) = &args.type_text {
        config.auto_type.push_str(text);
    }
    if let Some(path) = &args.type_file {
        config.auto_type.push_str(&fs::read_to_string(path)?);
    }
    Ok(config)
}

fn run(args: &Args) -> EmulatorResult<()> {
    let config = build_config(args)?;
    let mut machine = Machine::new(&config)?;

    if let Some(path) = &args.load {
        machine = machine.load_snapshot(&fs::read(path)?)?;
        machine.queue_auto_type(&config.auto_type)?;
        info!("loaded snapshot from {}", path.display());
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let input = Input::default();
    for _ in 0..args.steps {
        machine.update_input(&input);
        machine.step()?;
        if let Some(byte) = machine.take_display_byte() {
            if byte == CARRIAGE_RETURN {
                out.write_all(b"\n")?;
            } else {
                out.write_all(&[byte])?;
            }
        }
    }
    out.write_all(b"\n")?;
    out.flush()?;

    info!(
        "ran {} instructions, {} cycles",
        machine.cpu().steps,
        machine.cpu().cycles
    );

    if let Some(path) = &args.save {
        fs::write(path, machine.make_snapshot()?)?;
        info!("saved snapshot to {}", path.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
