//! Identifier resolution command

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use topology_lib::constructor::{ApplicationRef, ContainerIdentity};

use crate::output::{print_json, OutputFormat};

/// What a container or application identifier resolves to
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct IdentityView {
    pub namespace: String,
    /// `None` if the instance must already be known
    pub application: Option<String>,
    pub instance: Option<String>,
    pub container: Option<String>,
}

pub fn resolve_container(id: &str, node: &str) -> Result<IdentityView> {
    let resolved = ContainerIdentity::parse(id)
        .with_context(|| format!("Invalid container identifier '{}'", id))?
        .resolve(node);
    Ok(IdentityView {
        namespace: resolved.namespace,
        application: resolved.application.map(|a| a.to_string()),
        instance: Some(resolved.instance_name),
        container: Some(resolved.container_name),
    })
}

pub fn resolve_application(id: &str) -> Result<IdentityView> {
    let app = ApplicationRef::parse(id)
        .with_context(|| format!("Invalid application identifier '{}'", id))?;
    Ok(IdentityView {
        namespace: app.namespace,
        application: Some(app.name),
        instance: None,
        container: None,
    })
}

/// Print the identity an identifier maps to
pub fn resolve_id(id: &str, node: &str, application: bool, format: OutputFormat) -> Result<()> {
    let view = if application {
        resolve_application(id)?
    } else {
        resolve_container(id, node)?
    };

    match format {
        OutputFormat::Json => print_json(&view)?,
        OutputFormat::Table => {
            println!("{}", "Resolved Identity".bold());
            println!("{}", "=".repeat(50));
            println!("Namespace:              {}", view.namespace.cyan());
            println!(
                "Application:            {}",
                view.application
                    .as_deref()
                    .map(|a| a.normal())
                    .unwrap_or_else(|| "discovered from orchestrator".dimmed())
            );
            if let Some(instance) = &view.instance {
                println!("Instance:               {}", instance);
            }
            if let Some(container) = &view.container {
                println!("Container:              {}", container);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_container() {
        let view = resolve_container("/k8s-cronjob/batch/cleanup/worker", "node-1").unwrap();
        assert_eq!(view.application.as_deref(), Some("batch:CronJob:cleanup"));
        assert_eq!(view.instance.as_deref(), Some("cleanup@node-1"));

        let pod = resolve_container("/k8s/shop/api-5c6b/app", "node-1").unwrap();
        assert_eq!(pod.application, None);
        assert_eq!(pod.instance.as_deref(), Some("api-5c6b"));
    }

    #[test]
    fn test_resolve_application() {
        let view = resolve_application("/k8s/shop/api").unwrap();
        assert_eq!(view.namespace, "shop");
        assert_eq!(view.application.as_deref(), Some("api"));
        assert!(resolve_application("/nomad/x/y").is_err());
    }
}
