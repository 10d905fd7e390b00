//! Terraform job runner CLI

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use tfbox::{
    ConfigFormat, JobController, JobEvent, JobKind, JobRequest, OutputKind, Principal,
    RunnerConfig, SecurityScanner, VarValue,
};

#[derive(Parser)]
#[command(name = "tfbox")]
#[command(version, about = "Run Terraform plans and applies in an isolated sandbox", long_about = None)]
#[command(after_help = "EXAMPLES:
    tfbox plan main.tf
    tfbox plan main.tf --var instance_type=t3.micro --var count=2
    tfbox apply infra.tf.json --format json
    tfbox scan main.tf
")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run `terraform plan` against a configuration file
    Plan(JobArgs),

    /// Run `terraform apply -auto-approve` against a configuration file
    Apply(JobArgs),

    /// Report credential-like content in a configuration file
    Scan {
        /// Configuration file
        file: PathBuf,
    },
}

#[derive(clap::Args)]
struct JobArgs {
    /// Configuration file
    file: PathBuf,

    /// Variable assignment (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    vars: Vec<String>,

    /// Configuration syntax; inferred from the file name when omitted
    #[arg(short, long, value_name = "FORMAT")]
    format: Option<ConfigFormat>,

    /// Sandbox image
    #[arg(short, long, value_name = "IMAGE")]
    image: Option<String>,

    /// Timeout of the plan/apply step in seconds
    #[arg(short, long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Workspace root directory
    #[arg(short, long, value_name = "PATH")]
    root: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logger(cli.verbose);

    let result = match cli.command {
        Commands::Plan(args) => run_job(JobKind::Plan, args),
        Commands::Apply(args) => run_job(JobKind::Apply, args),
        Commands::Scan { file } => scan_file(&file),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run_job(kind: JobKind, args: JobArgs) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config_text = std::fs::read_to_string(&args.file)?;
    let mut request =
        JobRequest::new(config_text).format(args.format.unwrap_or_else(|| infer_format(&args.file)));
    for assignment in &args.vars {
        let (key, value) = parse_var(assignment)?;
        request = request.variable(key, value);
    }

    let mut config = RunnerConfig::from_env()?;
    if let Some(image) = args.image {
        config.image = image;
    }
    if let Some(secs) = args.timeout {
        config.execution_timeout = Duration::from_secs(secs);
    }
    if let Some(root) = args.root {
        config.workspace_root = root;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let controller = JobController::new(config)?;
        let user = std::env::var("USER").unwrap_or_else(|_| "local".to_string());
        let mut handle = controller.submit(kind, request, &Principal::user(user))?;

        for warning in &handle.security_warnings {
            eprintln!("{} {}", style("warning:").yellow().bold(), warning);
        }

        let mut exit = ExitCode::FAILURE;
        while let Some(event) = handle.next_event().await {
            exit = render(&event)?;
        }
        Ok::<_, Box<dyn std::error::Error>>(exit)
    })
}

fn render(event: &JobEvent) -> std::io::Result<ExitCode> {
    match event {
        JobEvent::Start { message, .. } => {
            eprintln!("{}", style(message).cyan().bold());
            Ok(ExitCode::FAILURE)
        }
        JobEvent::Output {
            message,
            kind: OutputKind::Stdout,
        } => {
            let mut out = std::io::stdout().lock();
            out.write_all(message.as_bytes())?;
            out.flush()?;
            Ok(ExitCode::FAILURE)
        }
        JobEvent::Output {
            message,
            kind: OutputKind::Stderr,
        } => {
            eprint!("{}", message);
            Ok(ExitCode::FAILURE)
        }
        JobEvent::Complete {
            exit_code, message, ..
        } => {
            if *exit_code == 0 {
                eprintln!("{}", style(message).green().bold());
            } else {
                eprintln!("{} (exit code {})", style(message).red().bold(), exit_code);
            }
            Ok(ExitCode::from(u8::try_from(*exit_code).unwrap_or(1)))
        }
        JobEvent::Error { message, .. } => {
            eprintln!("{} {}", style("Job failed:").red().bold(), message);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn scan_file(file: &Path) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config_text = std::fs::read_to_string(file)?;
    let warnings = SecurityScanner::new().scan(&config_text);

    if warnings.is_empty() {
        println!("{} no credential-like content found", style("✓").green());
    } else {
        for warning in &warnings {
            println!("{} {}", style("!").yellow().bold(), warning);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn infer_format(file: &Path) -> ConfigFormat {
    match file.extension().and_then(|e| e.to_str()) {
        Some("json") => ConfigFormat::Json,
        _ => ConfigFormat::Hcl,
    }
}

/// `key=value`; the value is read as a JSON scalar when it parses as one
fn parse_var(assignment: &str) -> Result<(String, VarValue), String> {
    let (key, raw) = assignment
        .split_once('=')
        .ok_or_else(|| format!("Invalid variable {:?}, expected KEY=VALUE", assignment))?;
    let value = serde_json::from_str::<VarValue>(raw)
        .unwrap_or_else(|_| VarValue::String(raw.to_string()));
    Ok((key.trim().to_string(), value))
}

mod logging {
    use console::style;
    use env_logger::{Builder, Env};
    use log::{Level, LevelFilter};
    use std::io::Write;

    /// Initialize logger based on verbose flag
    pub fn init_logger(verbose: bool) {
        let env = Env::default().filter_or("RUST_LOG", if verbose { "debug" } else { "warn" });

        Builder::from_env(env)
            .format(|buf, record| {
                let level = match record.level() {
                    Level::Error => format!("{}", style("ERROR").red().bold()),
                    Level::Warn => format!("{}", style("WARN ").yellow().bold()),
                    Level::Info => format!("{}", style("INFO ").green()),
                    Level::Debug => format!("{}", style("DEBUG").cyan()),
                    Level::Trace => format!("{}", style("TRACE").dim()),
                };
                writeln!(buf, "{} {}", level, record.args())
            })
            .filter_level(if verbose {
                LevelFilter::Debug
            } else {
                LevelFilter::Warn
            })
            .init();
    }
}
