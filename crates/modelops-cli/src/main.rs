//! ModelOps CLI - Command line interface for the ModelOps platform.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use modelops_client::{
    AsyncModelRun, ClientConfig, ConfigOverrides, DeployableKind, ExecutionHandle, ExecutionKind,
    ModelDeployment, ModelOpsClient, PreprocessingDeployment, PreprocessingRun,
    ResourceLifecycleController, SearchFilter, Session, TrainingRun,
};
use modelops_core::{
    ExecutionId, GroupName, LogQuery, LogRoutine, LogType, ResourceId, ResourceKind,
};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// ModelOps CLI - Deployment, execution and training management tool
#[derive(Parser)]
#[command(name = "modelops")]
#[command(about = "CLI for the ModelOps platform", long_about = None)]
struct Cli {
    /// Server URL (falls back to MODELOPS_URL)
    #[arg(long)]
    url: Option<String>,

    /// User token (falls back to MODELOPS_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Seconds between two status checks
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Give up waiting after this many seconds
    #[arg(long)]
    max_wait: Option<u64>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the server is up and the token is accepted
    Health,

    /// Manage groups
    #[command(subcommand)]
    Groups(GroupCommands),

    /// Show the status of a deployment
    Status(DeploymentArgs),

    /// Wait until a deployment settles
    Wait(DeploymentArgs),

    /// Show the full description of a deployment
    Describe(DeploymentArgs),

    /// Show the logs of a deployment
    Logs {
        #[command(flatten)]
        target: DeploymentArgs,

        /// First day (dd-mm-YYYY)
        #[arg(long, value_parser = LogQuery::parse_date)]
        start: Option<NaiveDate>,

        /// Last day (dd-mm-YYYY)
        #[arg(long, value_parser = LogQuery::parse_date)]
        end: Option<NaiveDate>,

        /// Run or Host
        #[arg(long)]
        routine: Option<LogRoutine>,

        /// Ok, Error, Debug or Warning
        #[arg(long = "type")]
        log_type: Option<LogType>,
    },

    /// Search models or preprocessing steps
    Search {
        /// model or preprocessing
        kind: ResourceKind,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        state: Option<String>,

        #[arg(long)]
        group: Option<String>,

        /// Only deployments that can take requests
        #[arg(long)]
        only_deployed: bool,
    },

    /// Inspect async runs and training runs
    #[command(subcommand)]
    Execution(ExecutionCommands),

    /// Inspect training experiments
    #[command(subcommand)]
    Training(TrainingCommands),
}

#[derive(Subcommand)]
enum GroupCommands {
    /// List groups
    List,

    /// Create a group
    Create {
        name: String,

        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// Issue a new group token
    #[command(name = "refresh-token")]
    RefreshToken {
        name: String,

        /// Expire the current token even if still valid
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Args)]
struct DeploymentArgs {
    /// model or preprocessing
    kind: ResourceKind,

    /// Deployment id
    id: String,

    /// Group (defaults to the default group)
    #[arg(short, long)]
    group: Option<String>,
}

#[derive(clap::Args)]
struct ExecutionArgs {
    /// model, preprocessing or training
    kind: ResourceKind,

    /// Deployment or experiment id
    id: String,

    /// Execution id
    execution: ExecutionId,

    #[arg(short, long)]
    group: Option<String>,
}

#[derive(Subcommand)]
enum ExecutionCommands {
    /// Show the status of a run
    Status(ExecutionArgs),

    /// Wait until a run finishes
    Wait(ExecutionArgs),

    /// Download the result of a finished run
    Download {
        #[command(flatten)]
        target: ExecutionArgs,

        /// Destination directory
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,
    },
}

#[derive(Subcommand)]
enum TrainingCommands {
    /// Show an experiment and its runs
    Show {
        id: String,

        #[arg(short, long)]
        group: Option<String>,
    },

    /// Show the most recent run of an experiment
    Latest {
        id: String,

        #[arg(short, long)]
        group: Option<String>,
    },
}

#[derive(Clone, Copy)]
enum DeploymentAction {
    Status,
    Wait,
    Describe,
}

#[derive(Clone, Copy)]
enum ExecutionAction {
    Status,
    Wait,
}

#[tokio::main]
async fn main() -> CliResult {
    let cli = Cli::parse();

    // Initialize tracing
    let default_level = if cli.verbose { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ClientConfig::resolve(ConfigOverrides {
        base_url: cli.url,
        token: cli.token,
        poll_interval: cli.poll_interval.map(Duration::from_secs),
        max_wait: cli.max_wait.map(Duration::from_secs),
        ..Default::default()
    })?;
    let client = ModelOpsClient::new(config);

    match cli.command {
        Commands::Health => {
            let version = client.server_health().await?;
            println!("Server is up (version {version})");
        }
        Commands::Groups(command) => groups(&client, command).await?,
        Commands::Status(args) => deployment(&client, args, DeploymentAction::Status).await?,
        Commands::Wait(args) => deployment(&client, args, DeploymentAction::Wait).await?,
        Commands::Describe(args) => deployment(&client, args, DeploymentAction::Describe).await?,
        Commands::Logs {
            target,
            start,
            end,
            routine,
            log_type,
        } => {
            let query = LogQuery {
                start,
                end,
                routine,
                log_type,
            };
            let entries = client
                .logs(target.kind, &target.id, target.group.as_deref(), &query)
                .await?;
            println!("Logs ({}):", entries.len());
            for entry in entries {
                println!(
                    "{:<26}  {:<8}  {:<5}  {}",
                    entry.registered_at.as_deref().unwrap_or("-"),
                    entry.output_type.as_deref().unwrap_or("-"),
                    entry.routine.as_deref().unwrap_or("-"),
                    entry.output_data.as_deref().unwrap_or_default()
                );
            }
        }
        Commands::Search {
            kind,
            name,
            state,
            group,
            only_deployed,
        } => {
            let filter = SearchFilter {
                name,
                state,
                group,
                only_deployed,
            };
            let hits = client.search(kind, &filter).await?;
            println!("Results ({}):", hits.len());
            println!("{:<66}  {:<10}  {:<16}  {}", "ID", "STATUS", "GROUP", "NAME");
            println!("{}", "-".repeat(110));
            for hit in hits {
                println!(
                    "{:<66}  {:<10}  {:<16}  {}",
                    hit.id,
                    hit.status.as_deref().unwrap_or("-"),
                    hit.group.as_deref().unwrap_or("-"),
                    hit.name.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Execution(command) => execution(&client, command).await?,
        Commands::Training(command) => training(&client, command).await?,
    }

    Ok(())
}

async fn groups(client: &ModelOpsClient, command: GroupCommands) -> CliResult {
    match command {
        GroupCommands::List => {
            let groups = client.list_groups().await?;
            println!("Groups ({}):", groups.len());
            for group in groups {
                println!(
                    "  {:<24}  {}",
                    group.name,
                    group.description.as_deref().unwrap_or_default()
                );
            }
        }
        GroupCommands::Create { name, description } => {
            if client.create_group(&name, &description).await? {
                println!("Group '{name}' created");
            } else {
                println!("Group '{name}' already exists");
            }
        }
        GroupCommands::RefreshToken { name, force } => {
            let message = client.refresh_group_token(&name, force).await?;
            println!("{message}");
        }
    }
    Ok(())
}

async fn deployment(
    client: &ModelOpsClient,
    args: DeploymentArgs,
    action: DeploymentAction,
) -> CliResult {
    let session = client.session().clone();
    let id = ResourceId::new(args.id);
    let group = group_or_default(args.group.as_deref());
    match args.kind {
        ResourceKind::Model => run_deployment::<ModelDeployment>(session, id, group, action).await,
        ResourceKind::Preprocessing => {
            run_deployment::<PreprocessingDeployment>(session, id, group, action).await
        }
        other => Err(format!("{other} is not a deployment, use model or preprocessing").into()),
    }
}

async fn run_deployment<K: DeployableKind>(
    session: Session,
    id: ResourceId,
    group: GroupName,
    action: DeploymentAction,
) -> CliResult {
    let poller = session.config().build_poller();
    let mut controller = ResourceLifecycleController::<K>::detached(session, id, group);

    match action {
        DeploymentAction::Status => {
            controller.refresh_status().await?;
        }
        DeploymentAction::Wait => {
            controller.wait_ready_with(&poller).await?;
        }
        DeploymentAction::Describe => {
            let description = controller.describe().await?;
            println!("{}", serde_json::to_string_pretty(description)?);
            return Ok(());
        }
    }

    println!("{}/{}: {}", controller.group(), controller.id(), controller.status());
    if let Some(message) = controller.last_message() {
        println!("  {message}");
    }
    Ok(())
}

async fn execution(client: &ModelOpsClient, command: ExecutionCommands) -> CliResult {
    let (args, action, dest) = match command {
        ExecutionCommands::Status(args) => (args, Some(ExecutionAction::Status), None),
        ExecutionCommands::Wait(args) => (args, Some(ExecutionAction::Wait), None),
        ExecutionCommands::Download { target, dest } => (target, None, Some(dest)),
    };
    let session = client.session().clone();
    let id = ResourceId::new(args.id);
    let group = group_or_default(args.group.as_deref());

    match args.kind {
        ResourceKind::Model => {
            run_execution::<AsyncModelRun>(session, id, group, args.execution, action, dest).await
        }
        ResourceKind::Preprocessing => {
            run_execution::<PreprocessingRun>(session, id, group, args.execution, action, dest)
                .await
        }
        ResourceKind::Training => {
            run_execution::<TrainingRun>(session, id, group, args.execution, action, dest).await
        }
        ResourceKind::Monitoring => Err("monitoring has no executions".into()),
    }
}

async fn run_execution<K: ExecutionKind>(
    session: Session,
    id: ResourceId,
    group: GroupName,
    execution_id: ExecutionId,
    action: Option<ExecutionAction>,
    dest: Option<PathBuf>,
) -> CliResult {
    let poller = session.config().poller();
    let mut handle = ExecutionHandle::<K>::new(session, id, group, execution_id);

    match (action, dest) {
        (Some(ExecutionAction::Status), _) => {
            handle.get_status().await?;
        }
        (Some(ExecutionAction::Wait), _) => {
            handle.wait_complete(&poller).await?;
        }
        (None, dest) => {
            let dest = dest.unwrap_or_else(|| PathBuf::from("."));
            match handle.download_result(&dest).await? {
                Some(path) => println!("Result saved to {}", path.display()),
                None => println!("Result not available yet"),
            }
        }
    }

    println!("{handle}");
    if let Some(message) = handle.last_message() {
        println!("  {message}");
    }
    Ok(())
}

async fn training(client: &ModelOpsClient, command: TrainingCommands) -> CliResult {
    match command {
        TrainingCommands::Show { id, group } => {
            let handle = client.get_training(&id, group.as_deref()).await?;
            let experiment = handle.experiment();
            println!("{handle}");
            println!("  Model type: {}", experiment.model_type);
            println!("  Runs:       {}", experiment.executions.len());
            for run in &experiment.executions {
                println!("    - {run}");
            }
        }
        TrainingCommands::Latest { id, group } => {
            let mut handle = client.get_training(&id, group.as_deref()).await?;
            let run = handle.get_training_execution(None).await?;
            println!("{run}");
            if let Some(details) = run.details() {
                if let Some(name) = &details.run_name {
                    println!("  Run name: {name}");
                }
                if let Some(data) = &details.run_data {
                    println!("  Run data: {}", serde_json::to_string_pretty(data)?);
                }
            }
        }
    }
    Ok(())
}

fn group_or_default(group: Option<&str>) -> GroupName {
    group.map(GroupName::new).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_logs_filters() {
        let cli = Cli::try_parse_from([
            "modelops", "logs", "model", "m1", "-g", "fraud", "--start", "01-02-2024", "--type",
            "Error",
        ])
        .unwrap();

        let Commands::Logs {
            target,
            start,
            end,
            log_type,
            ..
        } = cli.command
        else {
            panic!("expected logs command");
        };
        assert_eq!(target.kind, ResourceKind::Model);
        assert_eq!(target.group.as_deref(), Some("fraud"));
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert!(end.is_none());
        assert_eq!(log_type, Some(LogType::Error));
    }

    #[test]
    fn test_bad_date_rejected() {
        assert!(Cli::try_parse_from(["modelops", "logs", "model", "m1", "--start", "2024-02-01"])
            .is_err());
    }

    #[test]
    fn test_parse_execution_download() {
        let cli = Cli::try_parse_from([
            "modelops",
            "--max-wait",
            "60",
            "execution",
            "download",
            "preprocessing",
            "p1",
            "3",
            "--dest",
            "out",
        ])
        .unwrap();

        assert_eq!(cli.max_wait, Some(60));
        let Commands::Execution(ExecutionCommands::Download { target, dest }) = cli.command else {
            panic!("expected execution download");
        };
        assert_eq!(target.kind, ResourceKind::Preprocessing);
        assert_eq!(target.execution.get(), 3);
        assert_eq!(dest, PathBuf::from("out"));
    }
}
