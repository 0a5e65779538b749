//! Construction-log formatter
//!
//! Walks the sealed DAG in resolution order and renders the tree attached
//! to every resolution error: contracts, statuses, instance counts and
//! rejection comments.

use crate::resolution::builder::{ContainerService, ServiceDependency, ServiceStatus};

/// Render the construction log rooted at `service`
pub fn format_construction_log(service: &ContainerService) -> String {
    let mut out = String::new();
    write_service(&mut out, service, 0);
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_service(out: &mut String, service: &ContainerService, depth: usize) {
    indent(out, depth);
    out.push_str(service.type_name());
    let contracts = service.declared_contracts();
    if !contracts.is_empty() {
        out.push('[');
        for (index, contract) in contracts.iter().enumerate() {
            if index > 0 {
                out.push_str("->");
            }
            out.push_str(contract.as_str());
        }
        out.push(']');
    }
    if service.status().is_bad() {
        out.push('!');
    }
    let instances = service.all_values().len();
    if instances > 1 {
        out.push_str(&format!(" ({} instances)", instances));
    }
    if let Some(comment) = service.comment() {
        out.push_str(" - ");
        out.push_str(comment);
    }
    if let Some(message) = service.error_message() {
        out.push_str(" - ");
        out.push_str(message);
    }
    if service.status() == ServiceStatus::NotResolved && service.comment().is_none() {
        out.push_str(" - has no implementations");
    }
    out.push('\n');

    for dependency in service.dependencies() {
        write_dependency(out, dependency, depth + 1);
    }
}

fn write_dependency(out: &mut String, dependency: &ServiceDependency, depth: usize) {
    if let Some(child) = &dependency.service {
        write_service(out, child, depth);
        return;
    }
    indent(out, depth);
    out.push_str(&dependency.name);
    if let Some(comment) = &dependency.comment {
        out.push_str(" - ");
        out.push_str(comment);
    }
    if let Some(message) = &dependency.error_message {
        out.push_str(" <- ");
        out.push_str(message);
    }
    out.push('\n');
}
