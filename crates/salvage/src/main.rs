use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Args, Parser, Subcommand};
use salvage_core::core::{CorefilePreference, LoadOptions};
use salvage_core::source::{repeat_command, source_info, source_list, SourceInfoOptions, SourceListOptions};
use salvage_core::{SalvageResult, Target};
use salvage_utils::{debug, info, init_logging, init_logging_for_session};

/// Post-mortem inspection of Mach-O core files and source-level lookups.
#[derive(Parser, Debug)]
#[command(name = "salvage")]
#[command(version)]
#[command(about = "Post-mortem Mach-O core inspection and source listing", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Load a core file and inspect it
    Core
    {
        /// Path to the Mach-O core file
        core: PathBuf,
        /// Prefer the kernel over dyld when the core maps both
        #[arg(long, default_value_t = false)]
        kernel: bool,
        #[command(subcommand)]
        action: Option<CoreAction>,
    },
    /// Run one source command against the given images
    Source
    {
        #[command(flatten)]
        target: TargetArgs,
        #[command(subcommand)]
        command: SourceCommand,
    },
    /// Read source commands from stdin; an empty line repeats `source list`
    Session
    {
        #[command(flatten)]
        target: TargetArgs,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum CoreAction
{
    /// Show architecture, images and dynamic loader (default)
    Info,
    /// List threads and their pc, sp and fp
    Threads,
    /// List mapped memory regions
    Regions,
    /// Read memory
    Read
    {
        /// Address to read from (hex with 0x prefix, or decimal)
        #[arg(value_parser = parse_address)]
        address: u64,
        /// Number of bytes to read
        #[arg(short, long, default_value_t = 16)]
        length: usize,
    },
}

#[derive(Args, Debug, Clone)]
struct TargetArgs
{
    /// Image to load, optionally placed at a load address: PATH[@ADDR]
    #[arg(long = "image", value_parser = parse_image)]
    images: Vec<ImageSpec>,
    /// Core file whose process supplies threads and registers
    #[arg(long)]
    core: Option<PathBuf>,
    /// Prefer the kernel over dyld when the core maps both
    #[arg(long, default_value_t = false)]
    kernel: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ImageSpec
{
    path: PathBuf,
    load_address: Option<u64>,
}

#[derive(Subcommand, Debug, Clone)]
enum SourceCommand
{
    /// Dump line-table entries for a function, address, file or the selected frame
    Info(InfoArgs),
    /// Display source around a function, address or file line, or continue the last listing
    List(ListArgs),
}

#[derive(Args, Debug, Clone)]
struct InfoArgs
{
    /// Maximum number of entries to display
    #[arg(short, long)]
    count: Option<u32>,
    /// Only look in this module (repeatable)
    #[arg(short, long)]
    shlib: Vec<String>,
    /// Source file to dump
    #[arg(short, long)]
    file: Option<String>,
    /// First line to dump, with --file
    #[arg(short, long)]
    line: Option<u32>,
    /// Last line to dump, with --file
    #[arg(short, long)]
    end_line: Option<u32>,
    /// Function or symbol name
    #[arg(short, long)]
    name: Option<String>,
    /// Address to look up
    #[arg(short, long, value_parser = parse_address)]
    address: Option<u64>,
}

#[derive(Args, Debug, Clone)]
struct ListArgs
{
    /// Number of source lines to display
    #[arg(short, long)]
    count: Option<u32>,
    /// Only look in this module (repeatable)
    #[arg(short, long)]
    shlib: Vec<String>,
    /// Prefix lines with their number of line-table entries
    #[arg(short = 'b', long)]
    show_breakpoints: bool,
    /// Continue the last listing backwards
    #[arg(short, long)]
    reverse: bool,
    /// Source file to display
    #[arg(short, long)]
    file: Option<String>,
    /// Line to start at
    #[arg(short, long)]
    line: Option<u32>,
    /// Function or symbol name
    #[arg(short, long)]
    name: Option<String>,
    /// Address to display source for
    #[arg(short, long, value_parser = parse_address)]
    address: Option<u64>,
}

impl From<InfoArgs> for SourceInfoOptions
{
    fn from(args: InfoArgs) -> Self
    {
        Self {
            count: args.count,
            shlibs: args.shlib,
            file: args.file,
            start_line: args.line,
            end_line: args.end_line,
            name: args.name,
            address: args.address,
        }
    }
}

impl From<ListArgs> for SourceListOptions
{
    fn from(args: ListArgs) -> Self
    {
        Self {
            count: args.count,
            shlibs: args.shlib,
            show_breakpoints: args.show_breakpoints,
            reverse: args.reverse,
            file: args.file,
            line: args.line,
            name: args.name,
            address: args.address,
        }
    }
}

/// One line typed into `salvage session`.
#[derive(Parser, Debug)]
#[command(name = "", no_binary_name = true, disable_version_flag = true)]
struct SessionLine
{
    #[command(subcommand)]
    command: SessionCommand,
}

#[derive(Subcommand, Debug)]
enum SessionCommand
{
    /// Source lookups
    Source
    {
        #[command(subcommand)]
        command: SourceCommand,
    },
    /// Leave the session
    #[command(alias = "exit")]
    Quit,
}

fn parse_address(s: &str) -> Result<u64, String>
{
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("invalid address: '{s}'"))
}

fn parse_image(s: &str) -> Result<ImageSpec, String>
{
    match s.rsplit_once('@') {
        Some((path, addr)) if !path.is_empty() => Ok(ImageSpec {
            path: PathBuf::from(path),
            load_address: Some(parse_address(addr)?),
        }),
        _ => Ok(ImageSpec {
            path: PathBuf::from(s),
            load_address: None,
        }),
    }
}

fn load_options(kernel: bool) -> LoadOptions
{
    LoadOptions {
        preference: if kernel {
            CorefilePreference::Kernel
        } else {
            CorefilePreference::UserProcess
        },
        ..LoadOptions::default()
    }
}

fn build_target(args: &TargetArgs) -> SalvageResult<Target>
{
    let mut target = Target::new();
    if let Some(core) = &args.core {
        target.load_core(core, &load_options(args.kernel))?;
    }
    for image in &args.images {
        let module = target.load_image(&image.path, image.load_address)?;
        debug!(image = module.name(), "image ready");
    }
    Ok(target)
}

/// `0x0000000100003f50: 55 48 89 e5 ...`, 16 bytes per row.
fn hex_dump(addr: u64, bytes: &[u8]) -> String
{
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|byte| format!("{byte:02x}")).collect();
        out.push_str(&format!("0x{:016x}: {}\n", addr.wrapping_add(row as u64 * 16), hex.join(" ")));
    }
    out
}

fn main()
{
    let cli = Cli::parse();

    let result = match cli.command {
        // stdout carries listings; log to a file.
        Commands::Session { target } => match init_logging_for_session(None) {
            Ok((path, _guard)) => {
                eprintln!("Logging to {}", path.display());
                run_session(&target)
            }
            Err(e) => {
                eprintln!("Failed to initialize logging: {}", e);
                process::exit(1);
            }
        },
        command => match init_logging() {
            Ok(_guard) => run_command(command),
            Err(e) => {
                eprintln!("Failed to initialize logging: {}", e);
                process::exit(1);
            }
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run_command(command: Commands) -> Result<(), Box<dyn Error>>
{
    match command {
        Commands::Core { core, kernel, action } => {
            info!("Loading core file {}", core.display());
            run_core(&core, kernel, action.unwrap_or(CoreAction::Info))?;
        }
        Commands::Source { target, command } => {
            let mut target = build_target(&target)?;
            run_source(&mut target, command)?;
        }
        Commands::Session { target } => run_session(&target)?,
    }
    Ok(())
}

fn run_core(path: &Path, kernel: bool, action: CoreAction) -> SalvageResult<()>
{
    let mut target = Target::new();
    let process = target.load_core(path, &load_options(kernel))?;

    match action {
        CoreAction::Info => {
            let images = process.image_addresses();
            println!("Core: {}", path.display());
            println!("  Plug-in: {}", process.plugin_name());
            println!("  Architecture: {}", process.architecture());
            println!("  Segments: {}", process.file_ranges().len());
            println!("  Threads: {}", process.threads().len());
            match images.dyld {
                Some(addr) => println!("  dyld: 0x{addr:016x}"),
                None => println!("  dyld: not found"),
            }
            match images.kernel {
                Some(addr) => println!("  Kernel: 0x{addr:016x}"),
                None => println!("  Kernel: not found"),
            }
            println!(
                "  Dynamic loader: {}",
                process.dynamic_loader_kind().plugin_name().unwrap_or("none")
            );
        }
        CoreAction::Threads => {
            for thread in process.threads() {
                match thread.registers() {
                    Ok(regs) => println!(
                        "thread #{}: pc = {}, sp = {}, fp = {}",
                        thread.id(),
                        regs.pc,
                        regs.sp,
                        regs.fp
                    ),
                    Err(e) => println!("thread #{}: {}", thread.id(), e),
                }
            }
        }
        CoreAction::Regions => {
            for region in process.memory_regions() {
                println!("{region}");
            }
        }
        CoreAction::Read { address, length } => {
            let mut buf = vec![0u8; length];
            let read = process.read_memory(address, &mut buf)?;
            print!("{}", hex_dump(address, &buf[..read]));
            if read < length {
                eprintln!("warning: only {read} of {length} bytes are mapped");
            }
        }
    }
    Ok(())
}

fn run_source(target: &mut Target, command: SourceCommand) -> SalvageResult<()>
{
    let output = match command {
        SourceCommand::Info(args) => source_info(target, &args.into())?,
        SourceCommand::List(args) => source_list(target, &args.into())?,
    };
    for warning in &output.warnings {
        eprintln!("warning: {warning}");
    }
    print!("{}", output.output);
    Ok(())
}

fn run_session(args: &TargetArgs) -> Result<(), Box<dyn Error>>
{
    let mut target = build_target(args)?;

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut last_list: Option<Vec<String>> = None;
    loop {
        print!("(salvage) ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        let mut words: Vec<String> = line.split_whitespace().map(str::to_owned).collect();
        if words.is_empty() {
            let Some(args) = &last_list else {
                continue;
            };
            words = repeat_command(args).split_whitespace().map(str::to_owned).collect();
        }

        let parsed = match SessionLine::try_parse_from(&words) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprint!("{e}");
                continue;
            }
        };
        match parsed.command {
            SessionCommand::Quit => break,
            SessionCommand::Source { command } => {
                last_list = matches!(command, SourceCommand::List(_)).then(|| words.get(2..).unwrap_or_default().to_vec());
                if let Err(e) = run_source(&mut target, command) {
                    eprintln!("error: {e}");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_address()
    {
        assert_eq!(parse_address("0x1000"), Ok(0x1000));
        assert_eq!(parse_address("4096"), Ok(4096));
        assert!(parse_address("0xzz").is_err());
    }

    #[test]
    fn test_parse_image()
    {
        assert_eq!(
            parse_image("/bin/demo@0x100000000"),
            Ok(ImageSpec {
                path: PathBuf::from("/bin/demo"),
                load_address: Some(0x1_0000_0000),
            })
        );
        assert_eq!(parse_image("/bin/demo").unwrap().load_address, None);
        assert!(parse_image("/bin/demo@nope").is_err());
    }

    #[test]
    fn test_hex_dump()
    {
        let bytes: Vec<u8> = (0..18).collect();
        assert_eq!(
            hex_dump(0x1000, &bytes),
            "0x0000000000001000: 00 01 02 03 04 05 06 07 08 09 0a 0b 0c 0d 0e 0f\n\
             0x0000000000001010: 10 11\n"
        );
    }

    #[test]
    fn test_session_line_parsing()
    {
        let parsed = SessionLine::try_parse_from(["source", "list", "-n", "main", "-c", "20"]).unwrap();
        let SessionCommand::Source {
            command: SourceCommand::List(args),
        } = parsed.command
        else {
            panic!("expected source list");
        };
        let options = SourceListOptions::from(args);
        assert_eq!(options.name.as_deref(), Some("main"));
        assert_eq!(options.count, Some(20));

        let parsed = SessionLine::try_parse_from(["source", "info", "-f", "main.c", "-l", "3", "-e", "9"]).unwrap();
        let SessionCommand::Source {
            command: SourceCommand::Info(args),
        } = parsed.command
        else {
            panic!("expected source info");
        };
        let options = SourceInfoOptions::from(args);
        assert_eq!((options.start_line, options.end_line), (Some(3), Some(9)));

        assert!(matches!(
            SessionLine::try_parse_from(["exit"]).unwrap().command,
            SessionCommand::Quit
        ));
    }

    #[test]
    fn test_repeated_reverse_listing_parses()
    {
        let words: Vec<&str> = repeat_command(&["-r"]).split_whitespace().collect();
        let parsed = SessionLine::try_parse_from(words).unwrap();
        assert!(matches!(
            parsed.command,
            SessionCommand::Source {
                command: SourceCommand::List(ListArgs { reverse: true, .. })
            }
        ));
    }
}
