use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use idsync_config::load as load_config;
use idsync_runtime::{shutdown_signal, telemetry, BackendServices};
use idsync_users::{
    Actor, CreateUserRequest, Disposition, ProfileChanges, ReactivateRequest, RemoteSync,
    ServiceError, SortOrder, SyncOutcome, SyncResult, User, UserFilter, UserSortField,
};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "idsync")]
#[command(about = "Keep local users and identity-provider accounts in sync (sync-admin by default)")]
struct Cli {
    /// Principal recorded in the audit columns
    #[arg(long, global = true, default_value = "cli")]
    actor: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Link the configured default admin to the identity provider (default)
    SyncAdmin,
    /// Create a user and its remote identity
    CreateUser {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Soft-delete a user and block its remote identity
    Deactivate { user_id: Uuid },
    /// Restore a soft-deleted user
    Reactivate {
        user_id: Uuid,
        /// Used only if the remote identity has to be recreated
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Update the profile of the user linked to a remote identity
    UpdateProfile {
        remote_ref: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Replace the roles of a user
    SetRoles {
        user_id: Uuid,
        #[arg(long = "role", required = true)]
        roles: Vec<Uuid>,
    },
    /// Search users
    Users {
        #[arg(long)]
        search: Option<String>,
        /// Only deleted (true) or only live (false) users
        #[arg(long)]
        deleted: Option<bool>,
        #[arg(long = "role")]
        roles: Vec<Uuid>,
        #[arg(long, value_enum, default_value_t = SortArg::Email)]
        sort: SortArg,
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        size: Option<u32>,
    },
    /// List active roles
    Roles,
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Email,
    Username,
    Created,
    Status,
}

impl From<SortArg> for UserSortField {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::Email => UserSortField::Email,
            SortArg::Username => UserSortField::Username,
            SortArg::Created => UserSortField::CreatedAt,
            SortArg::Status => UserSortField::Status,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    telemetry::init_tracing().context("failed to initialise tracing")?;
    let config = load_config().context("failed to load configuration")?;
    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;
    let actor = Actor::new(cli.actor);

    match cli.command.unwrap_or(Commands::SyncAdmin) {
        Commands::SyncAdmin => {
            tokio::select! {
                result = services.sync_default_admin(&config.admin) => report_sync(result?),
                _ = shutdown_signal() => {
                    error!("default admin sync interrupted");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::CreateUser {
            username,
            email,
            password,
            display_name,
        } => {
            let request = CreateUserRequest {
                username,
                email,
                password,
                display_name,
            };
            report(services.sync.create_user(&actor, request).await)
        }
        Commands::Deactivate { user_id } => {
            report(services.sync.deactivate(&actor, user_id).await)
        }
        Commands::Reactivate {
            user_id,
            password,
            display_name,
        } => {
            let request = ReactivateRequest {
                password,
                display_name,
            };
            report(services.sync.reactivate(&actor, user_id, request).await)
        }
        Commands::UpdateProfile {
            remote_ref,
            display_name,
            password,
        } => {
            let changes = ProfileChanges {
                display_name,
                password,
            };
            report(
                services
                    .sync
                    .update_profile(&actor, &remote_ref, changes)
                    .await,
            )
        }
        Commands::SetRoles { user_id, roles } => {
            match services.admin.update_user_roles(&actor, user_id, &roles).await {
                Ok(user) => {
                    print_user(&user);
                    println!("disposition: {}", label(Disposition::Applied));
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => Ok(report_error(&err)),
            }
        }
        Commands::Users {
            search,
            deleted,
            roles,
            sort,
            desc,
            page,
            size,
        } => {
            let filter = UserFilter {
                search,
                deleted,
                role_ids: roles,
                sort_by: sort.into(),
                order: if desc { SortOrder::Desc } else { SortOrder::Asc },
                page,
                size,
                ..UserFilter::default()
            };
            let page = services
                .admin
                .search_users(&filter)
                .await
                .context("failed to search users")?;

            println!(
                "{:<36}  {:<30}  {:<30}  {:<8}  {}",
                "ID", "USERNAME", "EMAIL", "STATUS", "REMOTE"
            );
            for user in &page.items {
                println!(
                    "{:<36}  {:<30}  {:<30}  {:<8}  {}",
                    user.id,
                    user.username,
                    user.email.as_deref().unwrap_or("-"),
                    status(user),
                    user.remote_ref.as_deref().unwrap_or("-")
                );
            }
            println!(
                "page {} of {} ({} users)",
                page.page + 1,
                page.total_pages().max(1),
                page.total
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Roles => {
            let roles = services
                .roles
                .list_active_roles()
                .await
                .context("failed to list roles")?;
            for role in roles {
                println!(
                    "{:<36}  {:<20}  {}",
                    role.id,
                    role.code,
                    role.description.as_deref().unwrap_or("")
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn report_sync(result: SyncResult) -> anyhow::Result<ExitCode> {
    match &result {
        SyncResult::Synced(identity) => {
            info!(remote_ref = %identity.user_id, "default admin linked");
            println!("linked default admin to {}", identity.user_id);
        }
        SyncResult::NoOp(reason) => println!("nothing to do: {reason:?}"),
    }
    println!("disposition: {}", label(result.disposition()));
    Ok(ExitCode::SUCCESS)
}

fn report(result: Result<SyncOutcome, ServiceError>) -> anyhow::Result<ExitCode> {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => return Ok(report_error(&err)),
    };

    print_user(&outcome.user);
    println!("{}", outcome.message);
    if let RemoteSync::Diverged { reason } = &outcome.remote {
        println!("remote: {reason}");
    }

    let disposition = outcome.disposition();
    println!("disposition: {}", label(disposition));
    Ok(exit_code(disposition))
}

fn report_error(err: &ServiceError) -> ExitCode {
    let disposition = err.disposition();
    eprintln!("error: {err}");
    println!("disposition: {}", label(disposition));
    exit_code(disposition)
}

fn print_user(user: &User) {
    let roles: Vec<&str> = user.roles.iter().map(|role| role.code.as_str()).collect();
    println!("user:     {} ({})", user.id, user.username);
    println!("email:    {}", user.email.as_deref().unwrap_or("-"));
    println!("status:   {}", status(user));
    println!("remote:   {}", user.remote_ref.as_deref().unwrap_or("-"));
    println!("roles:    {}", roles.join(", "));
}

fn status(user: &User) -> &'static str {
    match (user.deleted, user.activated) {
        (true, _) => "deleted",
        (false, true) => "active",
        (false, false) => "inactive",
    }
}

fn label(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Applied => "applied",
        Disposition::Diverged => "diverged (local change kept, retry recommended)",
        Disposition::Rejected => "rejected",
    }
}

fn exit_code(disposition: Disposition) -> ExitCode {
    match disposition {
        Disposition::Applied => ExitCode::SUCCESS,
        Disposition::Rejected => ExitCode::from(1),
        Disposition::Diverged => ExitCode::from(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_admin_is_the_default_command() {
        let cli = Cli::try_parse_from(["idsync"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.actor, "cli");
    }

    #[test]
    fn set_roles_collects_repeated_role_flags() {
        let user = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let cli = Cli::try_parse_from([
            "idsync".to_string(),
            "--actor".to_string(),
            "ops".to_string(),
            "set-roles".to_string(),
            user.to_string(),
            "--role".to_string(),
            a.to_string(),
            "--role".to_string(),
            b.to_string(),
        ])
        .unwrap();

        assert_eq!(cli.actor, "ops");
        match cli.command {
            Some(Commands::SetRoles { user_id, roles }) => {
                assert_eq!(user_id, user);
                assert_eq!(roles, vec![a, b]);
            }
            _ => panic!("expected set-roles"),
        }
    }

    #[test]
    fn diverged_outcomes_exit_with_distinct_code() {
        assert_eq!(exit_code(Disposition::Applied), ExitCode::SUCCESS);
        assert_eq!(exit_code(Disposition::Diverged), ExitCode::from(2));
    }
}
