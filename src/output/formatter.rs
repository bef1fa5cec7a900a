use colored::Colorize;

use crate::executor::engine::ApplySummary;
use crate::planner::diff::InstanceDiff;
use crate::state::models::{InstanceState, ResourceState};

/// Print a success message.
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg.green());
}

/// Print an error message.
pub fn print_error(msg: &str) {
    println!("{} {}", "✗".red().bold(), msg.red());
}

/// Final line of an apply.
pub fn print_apply_summary(summary: &ApplySummary) {
    println!();
    if summary.is_success() {
        print_success(&summary.to_string());
    } else {
        print_error(&summary.to_string());
    }
}

pub fn print_resource_list(resources: &[(String, ResourceState)]) {
    if resources.is_empty() {
        println!("{}", "No resources in state.".dimmed());
        return;
    }

    println!();
    println!("{}", "Resources".bold().cyan());
    println!("{}", "─".repeat(80));
    println!(
        "  {:<35} {:<20} {:<12} {}",
        "ID".bold(),
        "TYPE".bold(),
        "STATUS".bold(),
        "PROVIDER".bold()
    );
    println!("{}", "─".repeat(80));

    for (id, resource) in resources {
        println!(
            "  {:<35} {:<20} {:<12} {}",
            id,
            resource.resource_type,
            status(resource),
            resource.provider.dimmed()
        );
    }

    println!();
    println!("  {} resource(s) total.", resources.len());
    println!();
}

/// Print one resource record: the primary instance, then anything deposed.
pub fn print_resource_detail(id: &str, resource: &ResourceState) {
    println!();
    println!("{} {}", "Resource:".bold().cyan(), id.bold());
    println!("{}", "─".repeat(60));
    println!("  {:<18} {}", "Type:".bold(), resource.resource_type);
    println!("  {:<18} {}", "Provider:".bold(), resource.provider);
    println!("  {:<18} {}", "Status:".bold(), status(resource));
    if !resource.dependencies.is_empty() {
        println!(
            "  {:<18} {}",
            "Depends on:".bold(),
            resource.dependencies.join(", ")
        );
    }

    if let Some(primary) = &resource.primary {
        print_instance("Primary", primary);
    }
    for (i, deposed) in resource.deposed.iter().enumerate() {
        print_instance(&format!("Deposed #{}", i), deposed);
    }

    println!("{}", "─".repeat(60));
    println!();
}

fn print_instance(label: &str, instance: &InstanceState) {
    println!();
    let tainted = if instance.tainted {
        format!(" {}", "(tainted)".yellow())
    } else {
        String::new()
    };
    println!("  {} [id={}]{}:", label.bold(), instance.id, tainted);
    for (key, value) in &instance.attributes {
        println!("    {:<20} = {}", key, format_value_short(value));
    }
}

/// Print the diffs waiting to be applied.
pub fn print_pending_diffs(diffs: &[(String, InstanceDiff)]) {
    if diffs.is_empty() {
        println!("{}", "No pending changes.".dimmed());
        return;
    }
    for (id, diff) in diffs {
        let (symbol, action) = if diff.destroy && diff.attributes.is_empty() {
            ("-".red(), "destroy")
        } else if diff.requires_new() {
            ("-/+".yellow(), "replace")
        } else {
            ("~".yellow(), "update")
        };
        println!("  {} {} {}", symbol, id.bold(), format!("({})", action).dimmed());
        for (key, attr) in &diff.attributes {
            let new = if attr.new_computed {
                "(known after apply)".dimmed().to_string()
            } else if attr.new_removed {
                "(removed)".dimmed().to_string()
            } else {
                format_value_short(&attr.new)
            };
            let forces = if attr.requires_new {
                format!(" {}", "# forces replacement".red())
            } else {
                String::new()
            };
            println!(
                "      {:<20} {} => {}{}",
                key,
                format_value_short(&attr.old),
                new,
                forces
            );
        }
    }
}

fn status(resource: &ResourceState) -> String {
    match &resource.primary {
        Some(p) if p.tainted => "tainted".yellow().to_string(),
        Some(_) => "created".green().to_string(),
        None => "deposed".dimmed().to_string(),
    }
}

fn format_value_short(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => format!("\"{}\"", s),
        serde_json::Value::Null => "null".dimmed().to_string(),
        other => {
            let s = other.to_string();
            if s.chars().count() > 60 {
                format!("{}...", s.chars().take(57).collect::<String>())
            } else {
                s
            }
        }
    }
}
