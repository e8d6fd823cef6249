//! masterctl - CLI client for masterd
//!
//! Thin administrative client over masterd's HTTP control plane (Section 6).
//! Contains no scanning or merge logic of its own.

mod client;
mod render;

use clap::{Parser, Subcommand};
use client::{Client, ClientError, CreateProjectRequest, CreateWorkflowRequest, UpdateWorkflowRequest};
use std::fs;
use std::path::PathBuf;

/// CLI client for the masterd scan orchestration daemon.
#[derive(Parser)]
#[command(name = "masterctl")]
#[command(about = "Control plane for masterd scan orchestrator")]
#[command(version)]
struct Cli {
    /// Daemon address (default: http://127.0.0.1:7800)
    #[arg(long, global = true, env = "MASTERD_ADDR")]
    addr: Option<String>,

    /// Auth token for daemon API
    #[arg(long, global = true, env = "MASTERD_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new project
    ProjectCreate {
        /// Project name
        name: String,

        /// Project owner
        #[arg(long)]
        owner: String,
    },

    /// List projects
    ProjectList,

    /// Show detailed information about a project
    ProjectInspect {
        /// Project ID
        project_id: String,
    },

    /// Create a new workflow from a steps JSON file
    WorkflowCreate {
        /// Project ID the workflow belongs to
        #[arg(long)]
        project: String,

        /// Workflow name
        name: String,

        /// Path to a JSON file holding the `steps` document (Section 3.5)
        #[arg(long)]
        steps: PathBuf,

        /// Trigger type: manual, scheduled, or event
        #[arg(long)]
        trigger_type: Option<String>,

        /// Cron-style schedule, required when trigger_type is "scheduled"
        #[arg(long)]
        schedule: Option<String>,
    },

    /// List workflows for a project
    WorkflowList {
        /// Project ID
        #[arg(long)]
        project: String,
    },

    /// Show detailed information about a workflow and its stages
    WorkflowInspect {
        /// Workflow ID
        workflow_id: String,
    },

    /// Update a workflow's name, trigger type, or schedule
    WorkflowUpdate {
        /// Workflow ID
        workflow_id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        trigger_type: Option<String>,

        #[arg(long)]
        schedule: Option<String>,
    },

    /// Delete a workflow
    WorkflowDelete {
        /// Workflow ID
        workflow_id: String,
    },

    /// Arm a draft/inactive workflow so it may be executed
    WorkflowEnable {
        /// Workflow ID
        workflow_id: String,
    },

    /// Disarm a workflow so it may not be executed
    WorkflowDisable {
        /// Workflow ID
        workflow_id: String,
    },

    /// Execute a workflow, enqueuing its first stage's tasks
    WorkflowExecute {
        /// Workflow ID
        workflow_id: String,
    },

    /// Stop an active workflow, cancelling outstanding tasks
    WorkflowStop {
        /// Workflow ID
        workflow_id: String,
    },

    /// Pause an active workflow
    WorkflowPause {
        /// Workflow ID
        workflow_id: String,
    },

    /// Resume a paused workflow
    WorkflowResume {
        /// Workflow ID
        workflow_id: String,
    },

    /// Retry a failed workflow by re-queuing its current stage
    WorkflowRetry {
        /// Workflow ID
        workflow_id: String,
    },

    /// Replay dead-lettered ETL results back onto the Result Queue
    DlqReplay,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let addr = cli
        .addr
        .unwrap_or_else(|| "http://127.0.0.1:7800".to_string());
    let client = Client::new(&addr, cli.token.as_deref());

    if let Err(e) = client.wait_for_ready().await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }

    let result = match cli.command {
        Command::ProjectCreate { name, owner } => project_create(&client, name, owner).await,
        Command::ProjectList => project_list(&client).await,
        Command::ProjectInspect { project_id } => project_inspect(&client, &project_id).await,
        Command::WorkflowCreate {
            project,
            name,
            steps,
            trigger_type,
            schedule,
        } => workflow_create(&client, project, name, steps, trigger_type, schedule).await,
        Command::WorkflowList { project } => workflow_list(&client, &project).await,
        Command::WorkflowInspect { workflow_id } => workflow_inspect(&client, &workflow_id).await,
        Command::WorkflowUpdate {
            workflow_id,
            name,
            trigger_type,
            schedule,
        } => workflow_update(&client, &workflow_id, name, trigger_type, schedule).await,
        Command::WorkflowDelete { workflow_id } => workflow_delete(&client, &workflow_id).await,
        Command::WorkflowEnable { workflow_id } => workflow_action(&client, &workflow_id, Action::Enable).await,
        Command::WorkflowDisable { workflow_id } => workflow_action(&client, &workflow_id, Action::Disable).await,
        Command::WorkflowExecute { workflow_id } => workflow_action(&client, &workflow_id, Action::Execute).await,
        Command::WorkflowStop { workflow_id } => workflow_action(&client, &workflow_id, Action::Stop).await,
        Command::WorkflowPause { workflow_id } => workflow_action(&client, &workflow_id, Action::Pause).await,
        Command::WorkflowResume { workflow_id } => workflow_action(&client, &workflow_id, Action::Resume).await,
        Command::WorkflowRetry { workflow_id } => workflow_action(&client, &workflow_id, Action::Retry).await,
        Command::DlqReplay => dlq_replay(&client).await,
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

async fn project_create(client: &Client, name: String, owner: String) -> Result<(), ClientError> {
    let project = client
        .create_project(CreateProjectRequest { name, owner })
        .await?;
    render::print_project_created(&project);
    Ok(())
}

async fn project_list(client: &Client) -> Result<(), ClientError> {
    let projects = client.list_projects().await?;
    render::print_project_list(&projects);
    Ok(())
}

async fn project_inspect(client: &Client, project_id: &str) -> Result<(), ClientError> {
    let project = client.get_project(project_id).await?;
    render::print_project_created(&project);
    Ok(())
}

async fn workflow_create(
    client: &Client,
    project: String,
    name: String,
    steps_path: PathBuf,
    trigger_type: Option<String>,
    schedule: Option<String>,
) -> Result<(), ClientError> {
    let raw = fs::read_to_string(&steps_path).map_err(|e| {
        ClientError::InvalidResponse(format!("failed to read {}: {e}", steps_path.display()))
    })?;
    let steps: serde_json::Value = serde_json::from_str(&raw).map_err(|e| {
        ClientError::InvalidResponse(format!("{} is not valid JSON: {e}", steps_path.display()))
    })?;

    let detail = client
        .create_workflow(CreateWorkflowRequest {
            project_id: project,
            name,
            trigger_type,
            steps,
            schedule,
        })
        .await?;
    render::print_workflow_created(&detail.workflow, &detail.stages);
    Ok(())
}

async fn workflow_list(client: &Client, project: &str) -> Result<(), ClientError> {
    let workflows = client.list_workflows(project).await?;
    render::print_workflow_list(&workflows);
    Ok(())
}

async fn workflow_inspect(client: &Client, workflow_id: &str) -> Result<(), ClientError> {
    let detail = client.get_workflow(workflow_id).await?;
    render::print_workflow_details(&detail.workflow, &detail.stages);
    Ok(())
}

async fn workflow_update(
    client: &Client,
    workflow_id: &str,
    name: Option<String>,
    trigger_type: Option<String>,
    schedule: Option<String>,
) -> Result<(), ClientError> {
    let workflow = client
        .update_workflow(
            workflow_id,
            UpdateWorkflowRequest {
                name,
                trigger_type,
                schedule,
            },
        )
        .await?;
    render::print_workflow_created(&workflow, &[]);
    Ok(())
}

async fn workflow_delete(client: &Client, workflow_id: &str) -> Result<(), ClientError> {
    client.delete_workflow(workflow_id).await?;
    println!("Deleted workflow: {workflow_id}");
    Ok(())
}

enum Action {
    Enable,
    Disable,
    Execute,
    Stop,
    Pause,
    Resume,
    Retry,
}

async fn workflow_action(client: &Client, workflow_id: &str, action: Action) -> Result<(), ClientError> {
    let past = match action {
        Action::Enable => {
            client.enable_workflow(workflow_id).await?;
            "enabled"
        }
        Action::Disable => {
            client.disable_workflow(workflow_id).await?;
            "disabled"
        }
        Action::Execute => {
            client.execute_workflow(workflow_id).await?;
            "executed"
        }
        Action::Stop => {
            client.stop_workflow(workflow_id).await?;
            "stopped"
        }
        Action::Pause => {
            client.pause_workflow(workflow_id).await?;
            "paused"
        }
        Action::Resume => {
            client.resume_workflow(workflow_id).await?;
            "resumed"
        }
        Action::Retry => {
            client.retry_workflow(workflow_id).await?;
            "retried"
        }
    };
    println!("Workflow {workflow_id} {past}");
    Ok(())
}

async fn dlq_replay(client: &Client) -> Result<(), ClientError> {
    let replayed = client.replay_dlq().await?;
    render::print_dlq_replay(replayed);
    Ok(())
}
