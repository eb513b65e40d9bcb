use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use taskflow::config::{Config, FilterMode, DEFAULT_AUTH_URL, DEFAULT_TASK_URL, DEFAULT_TOKEN_DB};
use taskflow::db::SqliteTokenStore;
use taskflow::models::{FilterState, LoginRequest, Priority, RegisterForm, Status, Task, TaskDraft, TaskId};
use taskflow::navigation::View;
use taskflow::{profile, session, tasks, TaskflowApp};

#[derive(Parser)]
#[command(author, version, about = "Personal task manager client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Base URL of the auth service
    #[arg(long, env = "TASKFLOW_AUTH_URL", default_value = DEFAULT_AUTH_URL)]
    auth_url: String,

    /// Base URL of the task collection
    #[arg(long, env = "TASKFLOW_TASK_URL", default_value = DEFAULT_TASK_URL)]
    task_url: String,

    /// SQLite file holding the session token
    #[arg(long, env = "TASKFLOW_TOKEN_DB", default_value = DEFAULT_TOKEN_DB)]
    token_db: PathBuf,

    /// Where status/priority filters are applied: "server" or "client"
    #[arg(long, env = "TASKFLOW_FILTER_MODE", default_value = "server")]
    filter_mode: FilterMode,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the session token
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "TASKFLOW_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account (logs in afterwards)
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long, env = "TASKFLOW_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        confirm_password: String,
    },
    /// Forget the stored session
    Logout,
    /// Show who the stored token belongs to
    Whoami,
    /// List tasks
    List {
        #[arg(long)]
        status: Option<Status>,
        #[arg(long)]
        priority: Option<Priority>,
    },
    /// List overdue tasks
    Overdue,
    /// Create a task
    Add {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long, default_value = "MEDIUM")]
        priority: Priority,
        #[arg(long, default_value = "TODO")]
        status: Status,
        /// RFC 3339 timestamp, e.g. 2025-06-01T17:00:00Z
        #[arg(long, value_parser = parse_due)]
        due: Option<OffsetDateTime>,
    },
    /// Replace fields of an existing task
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long)]
        priority: Option<Priority>,
        #[arg(long)]
        status: Option<Status>,
        #[arg(long, value_parser = parse_due)]
        due: Option<OffsetDateTime>,
    },
    /// Delete a task
    Delete { id: String },
    /// Show the account profile
    Profile,
    /// Change the account email
    UpdateEmail { email: String },
    /// Change the account password
    ChangePassword {
        #[arg(long)]
        old: String,
        #[arg(long)]
        new: String,
        #[arg(long)]
        confirm: String,
    },
}

fn parse_due(value: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| e.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("taskflow=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::new(cli.auth_url, cli.task_url)
        .with_token_db(cli.token_db)
        .with_filter_mode(cli.filter_mode);
    debug!(?config, "Loaded configuration");

    let app = match SqliteTokenStore::open(&config.token_db)
        .and_then(|store| TaskflowApp::new(&config, Arc::new(store)))
    {
        Ok(app) => app,
        Err(err) => {
            error!(error = %err, "Failed to start");
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    match run(&app, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(app: &TaskflowApp, command: Command) -> Result<(), String> {
    match command {
        Command::Login { username, password } => {
            app.enter(View::Login);
            let session = app
                .session
                .login(&LoginRequest { username, password })
                .await
                .map_err(|e| e.user_message(session::LOGIN_FAILED))?;
            app.enter(View::Dashboard);
            println!("Logged in as {}", session.username().unwrap_or("unknown user"));
        }
        Command::Register {
            username,
            email,
            password,
            confirm_password,
        } => {
            app.enter(View::Register);
            let form = RegisterForm {
                username,
                email,
                password,
                confirm_password,
            };
            let session = app
                .session
                .register(&form)
                .await
                .map_err(|e| e.user_message(session::REGISTRATION_FAILED))?;
            app.enter(View::Dashboard);
            println!("Registered and logged in as {}", session.username().unwrap_or(&form.username));
        }
        Command::Logout => {
            app.session.logout();
            app.enter(View::Login);
            println!("Logged out");
        }
        Command::Whoami => {
            let session = app.session.session();
            if !session.is_authenticated() {
                return Err("Not logged in".into());
            }
            println!("{}", session.username().unwrap_or("unknown user"));
            if let Some(exp) = session.claims.expires_at {
                let expired = if session.claims.is_expired(OffsetDateTime::now_utc()) {
                    " (expired)"
                } else {
                    ""
                };
                println!("token expires at {}{expired}", format_time(exp));
            }
        }
        Command::List { status, priority } => {
            require(app, View::Dashboard)?;
            let tasks = app
                .tasks
                .list(FilterState { status, priority })
                .await
                .map_err(|e| e.user_message(tasks::LOAD_FAILED))?;
            print_tasks(&tasks);
        }
        Command::Overdue => {
            require(app, View::Dashboard)?;
            app.tasks
                .list(FilterState::default())
                .await
                .map_err(|e| e.user_message(tasks::LOAD_FAILED))?;
            print_tasks(&app.tasks.overdue());
        }
        Command::Add {
            title,
            description,
            priority,
            status,
            due,
        } => {
            require(app, View::Dashboard)?;
            let draft = TaskDraft {
                title,
                description,
                priority,
                status,
                due_date: due,
            };
            let task = app
                .tasks
                .create(&draft)
                .await
                .map_err(|e| e.user_message(tasks::SAVE_FAILED))?;
            println!("Created task {}", task.id);
        }
        Command::Update {
            id,
            title,
            description,
            priority,
            status,
            due,
        } => {
            require(app, View::Dashboard)?;
            let id = TaskId::new(id);
            let current = app
                .tasks
                .get(&id)
                .await
                .map_err(|e| e.user_message(tasks::SAVE_FAILED))?;

            let mut draft = TaskDraft::from(&current);
            if let Some(title) = title {
                draft.title = title;
            }
            if description.is_some() {
                draft.description = description;
            }
            if let Some(priority) = priority {
                draft.priority = priority;
            }
            if let Some(status) = status {
                draft.status = status;
            }
            if due.is_some() {
                draft.due_date = due;
            }

            let task = app
                .tasks
                .update(&id, &draft)
                .await
                .map_err(|e| e.user_message(tasks::SAVE_FAILED))?;
            println!("Updated task {}", task.id);
        }
        Command::Delete { id } => {
            require(app, View::Dashboard)?;
            app.tasks
                .remove(&TaskId::new(id))
                .await
                .map_err(|e| e.user_message(tasks::DELETE_FAILED))?;
            println!("Deleted");
        }
        Command::Profile => {
            require(app, View::Profile)?;
            let profile = app
                .profile
                .fetch()
                .await
                .map_err(|e| e.user_message(profile::LOAD_FAILED))?;
            println!("username: {}", profile.username);
            println!("email:    {}", profile.email);
        }
        Command::UpdateEmail { email } => {
            require(app, View::Profile)?;
            app.profile
                .update_email(&email)
                .await
                .map_err(|e| e.user_message(profile::EMAIL_FAILED))?;
            println!("Email updated successfully");
        }
        Command::ChangePassword { old, new, confirm } => {
            require(app, View::Profile)?;
            app.profile
                .change_password(&old, &new, &confirm)
                .await
                .map_err(|e| e.user_message(profile::PASSWORD_FAILED))?;
            println!("Password changed successfully");
        }
    }
    Ok(())
}

fn require(app: &TaskflowApp, view: View) -> Result<(), String> {
    if app.enter(view) == view {
        Ok(())
    } else {
        Err("Not logged in. Run `taskflow login` first.".into())
    }
}

fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks found.");
        return;
    }
    let now = OffsetDateTime::now_utc();
    for task in tasks {
        let due = task.due_date.map(format_time).unwrap_or_else(|| "no due date".into());
        let overdue = if task.is_overdue(now) { "  OVERDUE" } else { "" };
        println!(
            "{:>6}  {:<11} {:<6}  {}  ({due}){overdue}",
            task.id, task.status, task.priority, task.title
        );
    }
}

fn format_time(dt: OffsetDateTime) -> String {
    dt.format(&Rfc3339).unwrap_or_else(|_| dt.to_string())
}
