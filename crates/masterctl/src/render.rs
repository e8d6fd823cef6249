//! Output rendering for masterctl CLI.
//!
//! Formats project, workflow and stage information for terminal display.

use scan_core::{Project, ProjectStatus, Stage, StageStatus, Workflow, WorkflowStatus};

/// Print confirmation after creating a project.
pub fn print_project_created(project: &Project) {
    println!("Created project: {}", project.id);
    println!("  Name:   {}", project.name);
    println!("  Owner:  {}", project.owner);
    println!("  Status: {}", format_project_status(project.status));
}

/// Print a list of projects in tabular format.
pub fn print_project_list(projects: &[Project]) {
    if projects.is_empty() {
        println!("No projects found.");
        return;
    }

    println!("{:<36}  {:<20}  {:<10}  {:<16}", "ID", "NAME", "STATUS", "OWNER");
    println!("{}", "-".repeat(86));

    for project in projects {
        println!(
            "{:<36}  {:<20}  {:<10}  {:<16}",
            project.id,
            truncate(&project.name, 20),
            format_project_status(project.status),
            truncate(&project.owner, 16),
        );
    }

    println!();
    println!("{} project(s)", projects.len());
}

/// Print confirmation after creating a workflow.
pub fn print_workflow_created(workflow: &Workflow, stages: &[Stage]) {
    println!("Created workflow: {}", workflow.id);
    println!("  Name:    {}", workflow.name);
    println!("  Project: {}", workflow.project_id);
    println!("  Trigger: {}", workflow.trigger_type.as_str());
    println!("  Status:  {}", format_workflow_status(workflow.status));
    println!("  Stages:  {}", stages.len());
}

/// Print a list of workflows in tabular format.
pub fn print_workflow_list(workflows: &[Workflow]) {
    if workflows.is_empty() {
        println!("No workflows found.");
        return;
    }

    println!(
        "{:<36}  {:<20}  {:<10}  {:<20}",
        "ID", "NAME", "STATUS", "CREATED"
    );
    println!("{}", "-".repeat(90));

    for workflow in workflows {
        println!(
            "{:<36}  {:<20}  {:<10}  {:<20}",
            workflow.id,
            truncate(&workflow.name, 20),
            format_workflow_status(workflow.status),
            format_time(&workflow.created_at),
        );
    }

    println!();
    println!("{} workflow(s)", workflows.len());
}

/// Print detailed information about a workflow and its stages.
pub fn print_workflow_details(workflow: &Workflow, stages: &[Stage]) {
    println!("Workflow: {}", workflow.id);
    println!();
    println!("  Name:     {}", workflow.name);
    println!("  Project:  {}", workflow.project_id);
    println!("  Status:   {}", format_workflow_status(workflow.status));
    println!("  Trigger:  {}", workflow.trigger_type.as_str());
    if let Some(ref schedule) = workflow.schedule {
        println!("  Schedule: {}", schedule);
    }
    println!("  Created:  {}", format_time(&workflow.created_at));
    println!("  Updated:  {}", format_time(&workflow.updated_at));

    if !stages.is_empty() {
        println!();
        println!("  Stages:");
        println!(
            "    {:<4}  {:<20}  {:<14}  {:<10}  {:<7}",
            "ORD", "NAME", "KIND", "STATUS", "MAXATT"
        );
        println!("    {}", "-".repeat(64));

        for stage in stages {
            println!(
                "    {:<4}  {:<20}  {:<14}  {:<10}  {:<7}",
                stage.order,
                truncate(&stage.name, 20),
                format!("{:?}", stage.kind),
                format_stage_status(stage.status),
                stage.max_attempts,
            );
        }
    }
}

/// Print the result of a DLQ replay invocation.
pub fn print_dlq_replay(replayed_count: usize) {
    println!("Replayed {replayed_count} dead letter(s)");
}

fn format_project_status(status: ProjectStatus) -> &'static str {
    match status {
        ProjectStatus::Draft => "DRAFT",
        ProjectStatus::Active => "ACTIVE",
        ProjectStatus::Archived => "ARCHIVED",
    }
}

fn format_workflow_status(status: WorkflowStatus) -> &'static str {
    match status {
        WorkflowStatus::Draft => "DRAFT",
        WorkflowStatus::Active => "ACTIVE",
        WorkflowStatus::Inactive => "INACTIVE",
        WorkflowStatus::Archived => "ARCHIVED",
    }
}

fn format_stage_status(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Pending => "PENDING",
        StageStatus::Running => "RUNNING",
        StageStatus::Succeeded => "SUCCEEDED",
        StageStatus::Failed => "FAILED",
        StageStatus::Cancelled => "CANCELLED",
    }
}

fn format_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        format!("{}...", &s[..max_len - 3])
    }
}
