use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use clap::{Parser, ValueEnum};
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use rayon::prelude::*;
use regex::Regex;

use coroner::assignment;
use coroner::block::FilePresenceProvider;
use coroner::coverage::simple_coverage;
use coroner::defect::{block_precondition, DefectAnalyzer};
use coroner::model::{ModelRegistry, MAIN_ARCH_ENV};
use coroner::parse::parse_source;

#[derive(Parser)]
#[command(name = "coroner")]
#[command(version, about = "Find dead and undead conditional-compilation blocks")]
#[command(long_about = "
coroner parses the preprocessor structure of the given source files and
proves, against the loaded configuration models, which conditional blocks
can never be compiled (dead) or never be removed (undead). One report file
is written per defect, named
<source>.<block>.<kind>.<globally|locally>.<dead|undead>.
")]
struct Cli {
    /// Source files to analyze (for blockpc: file:line; for symbolpc: symbols)
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Model file to load, or a directory of .model/.cnf files
    #[arg(short = 'm', long = "model")]
    models: Vec<PathBuf>,

    /// Main architecture; defaults to $CORONER_MAIN_ARCH, then the first
    /// loaded model
    #[arg(short = 'M', long)]
    main_arch: Option<String>,

    /// Analysis job
    #[arg(short = 'j', long, value_enum, default_value_t = Job::Dead)]
    job: Job,

    /// File with symbols to force on (one per line)
    #[arg(short = 'W', long)]
    whitelist: Option<PathBuf>,

    /// File with symbols to force off (one per line)
    #[arg(short = 'B', long)]
    blacklist: Option<PathBuf>,

    /// Do not write reports for no_kconfig defects
    #[arg(short = 'i', long)]
    skip_no_kconfig: bool,

    /// Write a minimized unsatisfiable core next to each dead report
    #[arg(short = 'u', long)]
    mus: bool,

    /// DIMACS minimizer invoked for --mus
    #[arg(long, default_value = "picomus", value_name = "TOOL")]
    mus_tool: String,

    /// Worker threads for the file scan (0 = one per core)
    #[arg(short = 't', long, default_value_t = 0)]
    threads: usize,

    /// Embed the file name in block names, making formulas from
    /// different files combinable
    #[arg(long)]
    verbose_blocks: bool,

    /// Increase logging (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Job {
    /// Dead/undead defect scan (the default)
    Dead,
    /// Compute a covering set of configurations per file
    Coverage,
    /// Print the precondition of the block at file:line
    Blockpc,
    /// List every block of each file with its source range
    Blockrange,
    /// Print the model slice for the given symbols
    Symbolpc,
}

fn arch_of_path(path: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?:^|/)arch/([^/]+)/").unwrap());
    re.captures(path).map(|caps| caps[1].to_string()).unwrap_or_default()
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => simplelog::LevelFilter::Warn,
        1 => simplelog::LevelFilter::Info,
        2 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let mut registry = ModelRegistry::new();
    for path in &cli.models {
        if path.is_dir() {
            let loaded = registry.load_dir(path)?;
            if loaded == 0 {
                log::warn!("no model files found in {}", path.display());
            }
        } else {
            registry.load_file(path)?;
        }
    }

    let main_arch = cli
        .main_arch
        .clone()
        .or_else(|| std::env::var(MAIN_ARCH_ENV).ok());
    if let Some(arch) = main_arch {
        registry
            .set_main(&arch)
            .wrap_err_with(|| format!("selecting main architecture {arch}"))?;
    }
    if let Some(arch) = registry.main_arch() {
        log::info!("using {arch} as primary model");
    }

    if let Some(model) = registry.main_model() {
        if let Some(path) = &cli.whitelist {
            for symbol in read_symbol_list(path)? {
                model.add_to_whitelist(&symbol);
            }
        }
        if let Some(path) = &cli.blacklist {
            for symbol in read_symbol_list(path)? {
                model.add_to_blacklist(&symbol);
            }
        }
    } else if cli.whitelist.is_some() || cli.blacklist.is_some() {
        return Err(eyre!("whitelists and blacklists need a loaded model"));
    }

    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new().num_threads(cli.threads).build_global()?;
    }

    match cli.job {
        Job::Dead => run_dead(&cli, &registry),
        Job::Coverage => run_coverage(&cli, &registry),
        Job::Blockpc => run_blockpc(&cli, &registry),
        Job::Blockrange => run_blockrange(&cli),
        Job::Symbolpc => run_symbolpc(&cli, &registry),
    }
}

fn read_symbol_list(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading symbol list {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

fn load_file(path: &str, verbose_blocks: bool) -> Result<(coroner::block::CppFile, String)> {
    let source =
        std::fs::read_to_string(path).wrap_err_with(|| format!("reading source file {path}"))?;
    let arch = arch_of_path(path);
    Ok((parse_source(&source, path, arch, verbose_blocks), source))
}

/// The defect scan: shard over files, one worker and one solver per file.
fn run_dead(cli: &Cli, registry: &ModelRegistry) -> Result<()> {
    let defect_count = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    cli.inputs.par_iter().for_each(|path| {
        let (file, _source) = match load_file(path, cli.verbose_blocks) {
            Ok(loaded) => loaded,
            Err(e) => {
                log::error!("{e:#}");
                failed.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        let analyzer = DefectAnalyzer::new(registry)
            .skip_no_kconfig(cli.skip_no_kconfig)
            .with_mus_tool(cli.mus.then(|| cli.mus_tool.clone()));
        for defect in analyzer.analyze_file(&file) {
            if analyzer.write_report(&file, &defect).is_some() {
                defect_count.fetch_add(1, Ordering::Relaxed);
            }
        }
    });
    let failed = failed.load(Ordering::Relaxed);
    if failed == cli.inputs.len() {
        return Err(eyre!("no input file could be processed"));
    }
    println!("I: found {} defect(s)", defect_count.load(Ordering::Relaxed));
    Ok(())
}

fn run_coverage(cli: &Cli, registry: &ModelRegistry) -> Result<()> {
    let provider = FilePresenceProvider;
    for path in &cli.inputs {
        let (mut file, source) = load_file(path, cli.verbose_blocks)?;
        file.decision_coverage();
        let result = simple_coverage(&file, registry.main_model(), &provider)?;
        for name in &result.unreachable {
            log::info!("{path}: block {name} is not selectable in any configuration");
        }
        let mut stdout = std::io::stdout().lock();
        assignment::pretty_print_assignments(
            &mut stdout,
            &result.assignments,
            registry.main_model(),
            &result.missing,
        )?;
        for (number, solution) in result.assignments.iter().enumerate() {
            assignment::format_combined(
                solution,
                &file,
                &source,
                registry.main_model(),
                &result.missing,
                number,
            )?;
        }
    }
    Ok(())
}

/// `file:line` or `file:line:column`; the column is accepted and ignored.
fn parse_position(input: &str) -> Option<(String, u32)> {
    let (rest, last) = input.rsplit_once(':')?;
    let last_number = last.parse::<u32>().ok()?;
    if let Some((path, middle)) = rest.rsplit_once(':') {
        if let Ok(line) = middle.parse::<u32>() {
            return Some((path.to_string(), line));
        }
    }
    Some((rest.to_string(), last_number))
}

fn run_blockpc(cli: &Cli, registry: &ModelRegistry) -> Result<()> {
    let provider = FilePresenceProvider;
    for input in &cli.inputs {
        let (path, line) = parse_position(input)
            .ok_or_else(|| eyre!("position must be file:line[:column]"))?;
        let (file, _source) = load_file(&path, cli.verbose_blocks)?;
        let block = file.block_at_position(line);
        println!(
            "I: block {} [{}:{}] at {}:{}",
            file.block(block).name(),
            file.block(block).start().line,
            file.block(block).end().line,
            path,
            line,
        );
        println!(
            "{}",
            block_precondition(&file, block, registry.main_model(), &provider)
        );
    }
    Ok(())
}

fn run_blockrange(cli: &Cli) -> Result<()> {
    for path in &cli.inputs {
        let (file, _source) = load_file(path, cli.verbose_blocks)?;
        for (_, block) in file.blocks() {
            if block.is_dummy() {
                continue;
            }
            println!("{}:{}:{}:{}", path, block.name(), block.start().line, block.end().line);
        }
    }
    Ok(())
}

fn run_symbolpc(cli: &Cli, registry: &ModelRegistry) -> Result<()> {
    let model = registry
        .main_model()
        .ok_or_else(|| eyre!("symbolpc needs a loaded model"))?;
    for symbol in &cli.inputs {
        let mut missing = BTreeSet::new();
        let mut slice = String::new();
        model.do_intersect(symbol, None, &mut missing, &mut slice, None);
        println!("I: {symbol}");
        if !slice.is_empty() {
            println!("{slice}");
        }
        for item in &missing {
            println!("# {item} is missing");
        }
    }
    Ok(())
}
