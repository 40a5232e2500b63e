//! identity-console - operator CLI for the identity engine.
//!
//! Each command is submitted through the [`AsyncInvoker`] and the main thread
//! pumps continuations until it completes, the same way a desktop event loop
//! drives the engine.

use clap::{Parser, Subcommand, ValueEnum};
use directory_core::error::AppError;
use directory_core::observability::init_tracing;
use identity_engine::clients::{calendar_id_from_share_url, UserFilter};
use identity_engine::config::ConsoleConfig;
use identity_engine::context::OpContext;
use identity_engine::invoker::{AsyncInvoker, TaskError};
use identity_engine::models::{Directory, MemberRole};
use identity_engine::startup::Console;
use secrecy::Secret;
use serde::Serialize;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::process::ExitCode;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Identity console - manage and reconcile cloud and on-prem directories
#[derive(Parser)]
#[command(name = "identity-console")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory used by single-directory commands
    #[arg(long, value_enum, default_value_t = Target::Cloud, global = true)]
    directory: Target,

    /// Worker threads for backend calls
    #[arg(long, default_value_t = 2, global = true)]
    workers: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Target {
    Cloud,
    Onprem,
}

impl From<Target> for Directory {
    fn from(target: Target) -> Self {
        match target {
            Target::Cloud => Directory::Cloud,
            Target::Onprem => Directory::OnPrem,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List users
    ListUsers {
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        org_path: Option<String>,
        /// Leave suspended accounts out
        #[arg(long)]
        active_only: bool,
        /// Backend search expression, passed through verbatim
        #[arg(long)]
        query: Option<String>,
    },

    /// List groups
    ListGroups {
        #[arg(long)]
        domain: Option<String>,
    },

    /// List the members of a group
    GroupMembers { group: String },

    /// Add several members to a group, reporting one outcome per member
    AddMembers {
        group: String,
        #[arg(required = true)]
        members: Vec<String>,
        #[arg(long, default_value = "member")]
        role: String,
    },

    /// Compare users between the two directories
    CompareUsers {
        #[arg(long)]
        domain: Option<String>,
    },

    /// Compare groups between the two directories
    CompareGroups {
        #[arg(long)]
        domain: Option<String>,
    },

    /// Create cloud users that are missing on-prem
    ImportUsers {
        #[arg(long)]
        domain: Option<String>,
        /// On-prem group every imported user joins; repeatable
        #[arg(long = "group")]
        groups: Vec<String>,
    },

    /// Create cloud groups that are missing on-prem
    ImportGroups {
        #[arg(long)]
        domain: Option<String>,
    },

    /// Copy a cloud group's members into the on-prem group of the same name
    ImportGroupMembers { group: String },

    /// Create on-prem users of a domain that are missing in the cloud
    ExportUsers {
        domain: String,
        #[arg(long, env = "IOE_INITIAL_PASSWORD", hide_env_values = true)]
        initial_password: String,
    },

    /// Print the calendar id carried by a share or embed URL
    CalendarId { url: String },

    /// End the on-prem session
    Logout,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ConsoleConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    let invoker = AsyncInvoker::new(cli.workers)?;
    {
        let _runtime = invoker.handle().enter();
        init_tracing(
            &config.common.service_name,
            &config.common.log_level,
            config.common.otlp_endpoint.as_deref(),
        )?;
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting identity-console");

    let console = Arc::new(Console::build(config)?);
    let directory = Directory::from(cli.directory);
    let command = cli.command;

    let outcome: Rc<RefCell<Option<Result<Value, TaskError>>>> = Rc::default();
    let on_success = outcome.clone();
    let on_error = outcome.clone();
    let task = invoker.submit_async(
        move |cancel| async move {
            let ctx = OpContext::with_cancellation(cancel);
            execute(&console, directory, command, &ctx).await
        },
        move |value| *on_success.borrow_mut() = Some(Ok(value)),
        move |e| *on_error.borrow_mut() = Some(Err(e)),
    );

    let interrupt = task.clone();
    invoker.handle().spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            interrupt.cancel();
        }
    });

    while invoker.pending() > 0 {
        invoker.wait_next(Duration::from_millis(250));
    }

    let result = outcome.borrow_mut().take();
    match result {
        Some(Ok(value)) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Some(Err(e)) => {
            if let TaskError::Failed(app) = &e {
                tracing::error!(kind = %app.kind(), detail = %app.detail(), "Command failed");
            }
            Err(e.into())
        }
        None => Err(anyhow::anyhow!("command finished without a result")),
    }
}

fn to_value<T: Serialize>(value: T) -> Result<Value, AppError> {
    Ok(serde_json::to_value(value)?)
}

async fn execute(
    console: &Console,
    directory: Directory,
    command: Commands,
    ctx: &OpContext,
) -> Result<Value, AppError> {
    let service = console.service();
    match command {
        Commands::ListUsers {
            domain,
            org_path,
            active_only,
            query,
        } => {
            let filter = UserFilter {
                domain: domain.or_else(|| console.config().cloud.domain.clone()),
                org_path,
                include_suspended: !active_only,
                query,
            };
            to_value(service.list_users(ctx, directory, &filter).await?)
        }
        Commands::ListGroups { domain } => {
            to_value(service.list_groups(ctx, directory, domain.as_deref()).await?)
        }
        Commands::GroupMembers { group } => {
            to_value(service.list_group_members(ctx, directory, &group).await?)
        }
        Commands::AddMembers {
            group,
            members,
            role,
        } => {
            let role: MemberRole = role.parse()?;
            to_value(
                service
                    .add_members_bulk(ctx, directory, &group, &members, role)
                    .await?,
            )
        }
        Commands::CompareUsers { domain } => to_value(
            console
                .reconciler()?
                .compare_users(ctx, domain.as_deref())
                .await?,
        ),
        Commands::CompareGroups { domain } => to_value(
            console
                .reconciler()?
                .compare_groups(ctx, domain.as_deref())
                .await?,
        ),
        Commands::ImportUsers { domain, groups } => to_value(
            console
                .reconciler()?
                .import_users_to_onprem(ctx, domain.as_deref(), &groups)
                .await?,
        ),
        Commands::ImportGroups { domain } => to_value(
            console
                .reconciler()?
                .import_groups_to_onprem(ctx, domain.as_deref())
                .await?,
        ),
        Commands::ImportGroupMembers { group } => to_value(
            console
                .reconciler()?
                .import_group_members(ctx, &group)
                .await?,
        ),
        Commands::ExportUsers {
            domain,
            initial_password,
        } => {
            let password = Secret::new(initial_password);
            to_value(
                console
                    .reconciler()?
                    .export_users_to_cloud(ctx, &domain, &password)
                    .await?,
            )
        }
        Commands::CalendarId { url } => match calendar_id_from_share_url(&url) {
            Some(id) => Ok(json!({ "calendar_id": id })),
            None => Err(AppError::Validation(anyhow::anyhow!(
                "no calendar id found in '{}'",
                url
            ))),
        },
        Commands::Logout => {
            console.auth().logout().await;
            Ok(json!({ "logged_out": true }))
        }
    }
}
