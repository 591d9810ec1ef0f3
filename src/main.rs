use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use von::config::{EngineConfig, TraceFormat};
use von::package::{self, DeviceSpec, Manifest, default_devices};
use von::vm::bytecode::{disassemble, format_listing};
use von::vm::trace::{JsonTracer, TextTracer};
use von::vm::{ByteMemory, Engine};

// Wrapper type for clap ValueEnum support
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TraceFormatArg {
    Off,
    Human,
    Json,
}

impl From<TraceFormatArg> for TraceFormat {
    fn from(arg: TraceFormatArg) -> Self {
        match arg {
            TraceFormatArg::Off => TraceFormat::Off,
            TraceFormatArg::Human => TraceFormat::Human,
            TraceFormatArg::Json => TraceFormat::Json,
        }
    }
}

#[derive(Parser)]
#[command(name = "von")]
#[command(about = "A minimal stack-based bytecode virtual machine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new von project
    Init {
        /// Project name (defaults to directory name)
        name: Option<String>,
    },
    /// Run a program image
    Run {
        /// The image to run (defaults to von.toml's image if in a project)
        image: Option<PathBuf>,

        /// Byte offset to start executing at
        #[arg(long)]
        entry: Option<u64>,

        /// Maximum operand stack depth (unlimited if unset)
        #[arg(long)]
        max_stack: Option<usize>,

        /// Trace every instruction to stderr
        #[arg(long, value_enum)]
        trace: Option<TraceFormatArg>,

        /// Execution timeout in seconds (0 = no timeout)
        #[arg(long, default_value = "0")]
        timeout: u64,

        /// Print the value on top of the stack after HALT
        #[arg(long)]
        print_result: bool,
    },
    /// Disassemble a program image
    Dis {
        /// The image to disassemble
        image: PathBuf,
    },
}

/// Everything `run` needs, merged from von.toml and the command line.
struct RunPlan {
    image: PathBuf,
    base_dir: PathBuf,
    entry: u64,
    config: EngineConfig,
    trace: TraceFormat,
    devices: Vec<(u16, DeviceSpec)>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Init { name } => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if let Err(e) = package::init_project(&cwd, name.as_deref()) {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Commands::Run {
            image,
            entry,
            max_stack,
            trace,
            timeout,
            print_result,
        } => {
            let plan = match plan_run(image, entry, max_stack, trace) {
                Ok(plan) => plan,
                Err(e) => {
                    eprintln!("error: {}", e);
                    eprintln!("usage: von run <image> or run from a von project directory");
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = run_image(&plan, timeout, print_result) {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Commands::Dis { image } => {
            let code = match std::fs::read(&image) {
                Ok(code) => code,
                Err(e) => {
                    eprintln!("error: failed to read {}: {}", image.display(), e);
                    return ExitCode::FAILURE;
                }
            };
            match disassemble(&code) {
                Ok(listing) => print!("{}", format_listing(&listing)),
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}

fn plan_run(
    image: Option<PathBuf>,
    entry: Option<u64>,
    max_stack: Option<usize>,
    trace: Option<TraceFormatArg>,
) -> Result<RunPlan, String> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    // A manifest is optional when an image is given explicitly, but one that
    // exists must load.
    let manifest = match Manifest::load(&cwd) {
        Ok(manifest) => Some(manifest),
        Err(e) if e.is_missing() && image.is_some() => None,
        Err(e) if image.is_none() => return Err(format!("no image specified and {}", e)),
        Err(e) => return Err(e.to_string()),
    };

    let mut plan = match &manifest {
        Some(m) => RunPlan {
            image: cwd.join(&m.program.image),
            base_dir: cwd.clone(),
            entry: m.program.entry,
            config: m.engine_config(),
            trace: m.runtime.trace,
            devices: m
                .ports()
                .map_err(|e| e.to_string())?
                .into_iter()
                .map(|(port, spec)| (port, spec.clone()))
                .collect(),
        },
        None => RunPlan {
            image: PathBuf::new(),
            base_dir: cwd.clone(),
            entry: 0,
            config: EngineConfig::default(),
            trace: TraceFormat::Off,
            devices: default_ports(),
        },
    };

    if let Some(image) = image {
        plan.image = image;
    }
    if let Some(entry) = entry {
        plan.entry = entry;
    }
    if max_stack.is_some() {
        plan.config.max_stack_depth = max_stack;
    }
    if let Some(trace) = trace {
        plan.trace = trace.into();
    }
    Ok(plan)
}

fn default_ports() -> Vec<(u16, DeviceSpec)> {
    default_devices()
        .into_iter()
        .filter_map(|(key, spec)| key.parse().ok().map(|port| (port, spec)))
        .collect()
}

fn run_image(plan: &RunPlan, timeout: u64, print_result: bool) -> Result<(), String> {
    let memory = load_image(&plan.image)?;
    let mut engine = Engine::with_config(memory, plan.config.clone());

    for (port, spec) in &plan.devices {
        let device = spec.open(&plan.base_dir).map_err(|e| e.to_string())?;
        engine.register_device(*port, device);
    }

    match plan.trace {
        TraceFormat::Off => {}
        TraceFormat::Human => engine.set_tracer(Box::new(TextTracer::stderr())),
        TraceFormat::Json => engine.set_tracer(Box::new(JsonTracer::new(std::io::stderr()))),
    }

    if timeout > 0 {
        let token = engine.cancel_token();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(timeout));
            token.cancel();
        });
    }

    engine.run(plan.entry).map_err(|fault| match fault.kind {
        von::FaultKind::Cancelled if timeout > 0 => {
            format!("execution timed out after {} seconds", timeout)
        }
        _ => fault.to_string(),
    })?;

    if print_result {
        match engine.peek(0) {
            Ok(value) => println!("{}", value),
            Err(e) => return Err(e.to_string()),
        }
    }
    Ok(())
}

fn load_image(path: &Path) -> Result<ByteMemory, String> {
    ByteMemory::load(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))
}
