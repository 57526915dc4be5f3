//! Implementation of the subcommands
//!
//! Every command renders its output into a string so the entry point only
//! decides where it goes and which exit code to use.

use anyhow::{anyhow, bail, Context, Result};
use shvtree_core::{check, packed_size, AccessLevel, Check, Document, Tree};
use shvtree_device::{dummy_device, CallRequest};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::config::Config;

/// Load the document at `path`, standard input (YAML) for `None` or `-`
pub fn load_document(path: Option<&Path>) -> Result<Document> {
    match path {
        Some(path) if path != Path::new("-") => Document::from_file(path)
            .with_context(|| format!("Invalid input {}", path.display())),
        _ => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("Failed to read standard input")?;
            Document::from_yaml(&content).context("Invalid input")
        }
    }
}

pub fn load_tree(path: Option<&Path>) -> Result<Tree> {
    let document = load_document(path)?;
    let tree = Tree::from_document(&document).context("Invalid tree")?;
    info!(types = tree.registry().len(), nodes = tree.nodes().count(), "Tree loaded");
    Ok(tree)
}

/// Checks named in `-d` arguments, each possibly a comma separated list
pub fn parse_checks(args: &[String]) -> Result<Vec<Check>> {
    args.iter()
        .flat_map(|arg| arg.split(','))
        .filter(|name| !name.is_empty())
        .map(|name| name.parse::<Check>().map_err(|err| anyhow!(err)))
        .collect()
}

pub fn list_checks() -> String {
    Check::ALL.iter().map(|check| format!("{}\n", check)).collect()
}

/// Report of the style checks of one tree, `None` when it has no issues
pub fn check_tree(name: &str, tree: &Tree, disabled: &[Check]) -> Option<String> {
    let issues = check(tree.registry(), disabled);
    if issues.is_empty() {
        return None;
    }
    let mut out = format!("Issues for '{}':\n", name);
    for issue in issues {
        let _ = writeln!(out, "{}", issue);
    }
    Some(out)
}

/// Packed size of every custom type, `None` for unbounded ones
pub fn sizes(tree: &Tree) -> Vec<(String, Option<usize>)> {
    tree.registry()
        .custom()
        .map(|(name, _)| (name.to_string(), packed_size(tree.registry(), name)))
        .collect()
}

pub fn render_sizes(sizes: &[(String, Option<usize>)], json: bool) -> Result<String> {
    if json {
        let map: BTreeMap<&str, serde_json::Value> = sizes
            .iter()
            .map(|(name, size)| (name.as_str(), serde_json::json!(size)))
            .collect();
        return Ok(serde_json::to_string(&map)?);
    }
    let width = sizes.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for (name, size) in sizes {
        let size = size.map_or_else(|| "unbounded".to_string(), |size| size.to_string());
        let _ = writeln!(out, "{:>width$} {}", name, size, width = width);
    }
    Ok(out)
}

pub fn render_ls(tree: &Tree, path: &str) -> Result<String> {
    Ok(tree.ls(path)?.into_iter().map(|name| name + "\n").collect())
}

pub fn render_dir(tree: &Tree, path: &str, json: bool) -> Result<String> {
    let methods = tree.dir(path)?;
    if json {
        return Ok(serde_json::to_string_pretty(&methods)?);
    }
    Ok(methods.iter().map(|method| format!("{}\n", method)).collect())
}

/// Call `method` on a dummy device built from `tree`
pub async fn call(
    tree: Tree,
    config: &Config,
    path: &str,
    method: &str,
    param: Option<&str>,
    access: Option<&str>,
) -> Result<String> {
    let param = match param {
        Some(param) => serde_json::from_str::<serde_json::Value>(param)
            .context("Parameter is not valid JSON")?
            .into(),
        None => shvtree_core::Value::Null,
    };
    let access = match access {
        Some(access) => access.parse::<AccessLevel>()?,
        None => config.call.access,
    };
    let device = dummy_device(tree, config.dummy.seed)?;
    let mut request = CallRequest::new(path, method)
        .with_param(param)
        .with_access(access);
    request.user_id = config.call.user_id.clone();
    debug!(path = %path, method = %method, access = %access, "Calling");
    match device.call(request).await {
        Ok(result) => Ok(serde_json::to_string(&result)?),
        Err(err) => bail!("{}:{} failed: {}", path, method, err),
    }
}
