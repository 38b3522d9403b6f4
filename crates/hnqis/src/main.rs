use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use hnqis_core::api::{DhisClient, DhisClientConfig, system_version};
use hnqis_core::attribute_setter::{AttributeSetterOptions, ObjectType, run_attribute_setter};
use hnqis_core::config::{DishLocator, resolve_credentials};
use hnqis_core::csv_input::load_csv;
use hnqis_core::error::ErrorKind;
use hnqis_core::event_scores::run_scan_mismatches;
use hnqis_core::health_areas::{IndicatorUpdateOptions, run_indicator_update};
use hnqis_core::program_orgunits::{AssignMode, ProgramOrgunitOptions, run_program_orgunits};
use hnqis_core::progress::{ConsoleLog, RunLog};
use hnqis_core::user_message::run_user_message;
use hnqis_core::usergroup_export::export_usergroup_usernames;
use tracing_subscriber::EnvFilter;

const LOG_FILENAME: &str = "hnqis-cli.log";

#[derive(Debug, Parser)]
#[command(
    name = "hnqis",
    version,
    about = "Bulk metadata updates for DHIS2 / HNQIS servers"
)]
struct Cli {
    #[arg(
        short = 's',
        long,
        global = true,
        value_name = "URL",
        help = "Server URL without /api/ e.g. -s play.dhis2.org/demo"
    )]
    server: Option<String>,
    #[arg(short = 'u', long, global = true, help = "DHIS2 username")]
    username: Option<String>,
    #[arg(short = 'p', long, global = true, help = "DHIS2 password")]
    password: Option<String>,
    #[arg(short = 'd', long, global = true, help = "Write debug output to the log file")]
    debug: bool,
    #[arg(long, global = true, value_name = "PATH", help = "Explicit dish.json location")]
    dish: Option<PathBuf>,
    #[arg(long, global = true, value_name = "N", help = "Pin the web API version, e.g. 30")]
    api_version: Option<u32>,
    #[arg(long, global = true, help = "Skip the pause before changes are sent")]
    no_pause: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Post attribute values sourced from a key,value CSV file")]
    AttributeSetter(AttributeSetterArgs),
    #[command(about = "Assign org units to programs sourced from a CSV file")]
    ProgramOrgunit(ProgramOrgunitArgs),
    #[command(about = "Post user messages sourced from a username,message CSV file")]
    UserMessage(UserMessageArgs),
    #[command(about = "Export usernames of a user group as a user-message CSV")]
    UsergroupUsernames(UsergroupArgs),
    #[command(about = "Rebuild health area indicator numerators from program indicators")]
    IndicatorUpdate,
    #[command(about = "Scan events whose overall score mismatches the root composite score")]
    ScanMismatches(ScanArgs),
    #[command(about = "Print the server's minor version")]
    ServerVersion,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ObjectTypeArg {
    #[value(name = "organisationUnits")]
    OrganisationUnits,
    #[value(name = "users")]
    Users,
}

impl From<ObjectTypeArg> for ObjectType {
    fn from(value: ObjectTypeArg) -> Self {
        match value {
            ObjectTypeArg::OrganisationUnits => Self::OrganisationUnits,
            ObjectTypeArg::Users => Self::Users,
        }
    }
}

#[derive(Debug, Args)]
struct AttributeSetterArgs {
    #[arg(short = 'c', long = "csv", value_name = "PATH", help = "CSV file with attribute values")]
    source_csv: PathBuf,
    #[arg(short = 't', long = "type", help = "Object type to set attribute values on")]
    object_type: ObjectTypeArg,
    #[arg(short = 'a', long = "attribute", value_name = "UID", help = "Attribute UID")]
    attribute_uid: String,
}

#[derive(Debug, Args)]
struct ProgramOrgunitArgs {
    #[arg(short = 'c', long = "csv", value_name = "PATH", help = "CSV file path")]
    source_csv: PathBuf,
    #[arg(short = 'a', long = "append", help = "Append org units to the existing ones")]
    append: bool,
}

#[derive(Debug, Args)]
struct UserMessageArgs {
    #[arg(short = 'c', long = "csv", value_name = "PATH", help = "CSV file with messages")]
    source_csv: PathBuf,
}

#[derive(Debug, Args)]
struct UsergroupArgs {
    #[arg(short = 'g', long = "usergroup", value_name = "UID", help = "User group UID")]
    usergroup: String,
}

#[derive(Debug, Args)]
struct ScanArgs {
    #[arg(
        short = 'x',
        long = "fix",
        help = "Overwrite _Overall Score with the 0CS-100 score and reset _Order Forward to 9999"
    )]
    fix: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    if let Err(error) = init_logging(cli.debug) {
        eprintln!("warning: file logging disabled: {error:#}");
    }
    tracing::info!(
        "===== hnqis v{} - {} =====",
        env!("CARGO_PKG_VERSION"),
        command_name(&cli.command)
    );

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let kind = ErrorKind::of(&error);
            tracing::error!("{error:#}");
            eprintln!("++++++ ERROR ++++++\n{error:#}");
            ExitCode::from(kind.exit_code())
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let locator = DishLocator::from_process(cli.dish.clone());
    let credentials = resolve_credentials(
        cli.server.as_deref(),
        cli.username.as_deref(),
        cli.password.as_deref(),
        &locator,
    )?;
    let mut api = DhisClient::new(DhisClientConfig::from_credentials(
        &credentials,
        cli.api_version,
    )?)?;
    let mut log = ConsoleLog::new(!cli.no_pause);
    let cwd = std::env::current_dir().context("failed to read current directory")?;
    log.info(&format!("[{}] - {}", api.base_url(), command_name(&cli.command)));

    match cli.command {
        Commands::AttributeSetter(args) => {
            let rows = load_csv(&args.source_csv)?;
            run_attribute_setter(
                &mut api,
                &mut log,
                &rows,
                &AttributeSetterOptions {
                    object_type: args.object_type.into(),
                    attribute_uid: args.attribute_uid,
                },
            )?;
        }
        Commands::ProgramOrgunit(args) => {
            let rows = load_csv(&args.source_csv)?;
            run_program_orgunits(
                &mut api,
                &mut log,
                &rows,
                &ProgramOrgunitOptions {
                    mode: if args.append {
                        AssignMode::Append
                    } else {
                        AssignMode::Replace
                    },
                    backup_dir: cwd,
                },
            )?;
        }
        Commands::UserMessage(args) => {
            let rows = load_csv(&args.source_csv)?;
            let report = run_user_message(&mut api, &mut log, &rows)?;
            if !report.not_found.is_empty() {
                log.warn(&format!(
                    "{} username(s) not found: {}",
                    report.not_found.len(),
                    report.not_found.join(", ")
                ));
            }
        }
        Commands::UsergroupUsernames(args) => {
            export_usergroup_usernames(&mut api, &mut log, &args.usergroup, &cwd)?;
        }
        Commands::IndicatorUpdate => {
            run_indicator_update(&mut api, &mut log, &IndicatorUpdateOptions { backup_dir: cwd })?;
        }
        Commands::ScanMismatches(args) => {
            run_scan_mismatches(&mut api, &mut log, args.fix)?;
        }
        Commands::ServerVersion => {
            let version = system_version(&mut api)?;
            log.info(&format!("server version: 2.{version}"));
        }
    }
    Ok(())
}

/// One subscriber for the whole process, writing to `hnqis-cli.log`.
fn init_logging(debug: bool) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(LOG_FILENAME)
        .with_context(|| format!("failed to open {LOG_FILENAME}"))?;
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("HNQIS_LOG").unwrap_or_else(|_| {
        EnvFilter::new(format!("{default_level},reqwest=warn,hyper=warn,hyper_util=warn"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|error| anyhow::anyhow!("{error}"))?;
    Ok(())
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::AttributeSetter(_) => "attribute-setter",
        Commands::ProgramOrgunit(_) => "program-orgunit",
        Commands::UserMessage(_) => "user-message",
        Commands::UsergroupUsernames(_) => "usergroup-usernames",
        Commands::IndicatorUpdate => "indicator-update",
        Commands::ScanMismatches(_) => "scan-mismatches",
        Commands::ServerVersion => "server-version",
    }
}
