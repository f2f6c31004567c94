//! Schema repository adapters.
//!
//! [`GitSchemaSource`] keeps a local working copy of a remote repository up to
//! date through the `git` command line and reads schema files from it.
//! [`DirectorySchemaSource`] reads a plain directory and never syncs.
use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::process::Command;
use url::Url;
use walkdir::{DirEntry, WalkDir};

use crate::{
    config::models::RepositoryConfig,
    core::schema_index::{RawSchema, RawSchemaSet},
    ports::schema_source::{SchemaSource, SourceError},
};

/// Read every `.json` file under `root` (case-insensitive extension), skipping
/// `.git`. Keys are root-relative and `/`-separated; text is kept verbatim.
pub fn read_schema_tree(root: &Path) -> Result<RawSchemaSet, SourceError> {
    let mut set = RawSchemaSet::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| !is_git_dir(entry));

    for entry in walker {
        let entry = entry.map_err(|e| SourceError::Walk(e.to_string()))?;
        if !entry.file_type().is_file() || !has_json_extension(entry.path()) {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| SourceError::Walk(e.to_string()))?;
        let relative_path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let text = std::fs::read_to_string(entry.path()).map_err(|source| SourceError::Read {
            path: entry.path().display().to_string(),
            source,
        })?;
        set.insert(RawSchema {
            relative_path,
            text,
        });
    }

    tracing::debug!(root = %root.display(), files = set.len(), "Read schema files");
    Ok(set)
}

fn is_git_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name() == ".git"
}

fn has_json_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

async fn load_tree(root: PathBuf) -> Result<RawSchemaSet, SourceError> {
    tokio::task::spawn_blocking(move || read_schema_tree(&root))
        .await
        .map_err(|e| SourceError::Aborted(e.to_string()))?
}

/// Schemas from a directory on disk. `sync` is a no-op.
pub struct DirectorySchemaSource {
    root: PathBuf,
}

impl DirectorySchemaSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SchemaSource for DirectorySchemaSource {
    async fn sync(&self) -> Result<(), SourceError> {
        Ok(())
    }

    async fn load(&self) -> Result<RawSchemaSet, SourceError> {
        load_tree(self.root.clone()).await
    }
}

/// Schemas from a git working copy, pulled (or cloned) on every `sync`.
pub struct GitSchemaSource {
    local_path: PathBuf,
    remote_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    branch: Option<String>,
    sync_enabled: bool,
}

impl GitSchemaSource {
    pub fn new(config: &RepositoryConfig) -> Self {
        Self {
            local_path: PathBuf::from(&config.local_path),
            remote_url: config.remote_url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            branch: config.branch.clone(),
            sync_enabled: config.sync,
        }
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    fn remote(&self) -> Result<String, SourceError> {
        let remote = self
            .remote_url
            .as_deref()
            .ok_or_else(|| SourceError::InvalidUrl {
                url: String::new(),
                reason: "no remote_url configured".to_string(),
            })?;
        authenticated_url(remote, self.username.as_deref(), self.password.as_deref())
    }

    async fn pull(&self) -> Result<(), SourceError> {
        let mut args = vec!["pull".to_string(), "--ff-only".to_string()];
        // Pull through the configured URL so rotated credentials take effect.
        if self.remote_url.is_some() {
            args.push(self.remote()?);
            if let Some(branch) = &self.branch {
                args.push(branch.clone());
            }
        }
        run_git("pull", Some(&self.local_path), &args).await
    }

    async fn clone_repository(&self) -> Result<(), SourceError> {
        if let Some(parent) = self.local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SourceError::Read {
                    path: parent.display().to_string(),
                    source,
                })?;
        }

        let mut args = vec!["clone".to_string()];
        if let Some(branch) = &self.branch {
            args.push("--branch".to_string());
            args.push(branch.clone());
        }
        args.push(self.remote()?);
        args.push(self.local_path.display().to_string());
        run_git("clone", None, &args).await
    }
}

#[async_trait]
impl SchemaSource for GitSchemaSource {
    async fn sync(&self) -> Result<(), SourceError> {
        if !self.sync_enabled {
            tracing::debug!(path = %self.local_path.display(), "Repository sync disabled");
            return Ok(());
        }

        if self.local_path.join(".git").exists() {
            tracing::info!(path = %self.local_path.display(), "Pulling schema repository");
            self.pull().await
        } else {
            tracing::info!(path = %self.local_path.display(), "Cloning schema repository");
            self.clone_repository().await
        }
    }

    async fn load(&self) -> Result<RawSchemaSet, SourceError> {
        load_tree(self.local_path.clone()).await
    }
}

/// Embed credentials into an http(s) remote. Other remotes (ssh, scp-like, file)
/// are returned unchanged.
pub fn authenticated_url(
    remote: &str,
    username: Option<&str>,
    password: Option<&str>,
) -> Result<String, SourceError> {
    let Ok(mut url) = Url::parse(remote) else {
        return Ok(remote.to_string());
    };
    if !matches!(url.scheme(), "http" | "https") || username.is_none() {
        return Ok(remote.to_string());
    }

    let invalid = |reason: &str| SourceError::InvalidUrl {
        url: redact(remote),
        reason: reason.to_string(),
    };
    if let Some(username) = username {
        url.set_username(username)
            .map_err(|_| invalid("cannot set username"))?;
    }
    url.set_password(password)
        .map_err(|_| invalid("cannot set password"))?;
    Ok(url.to_string())
}

/// Strip any userinfo so remotes can be logged.
fn redact(remote: &str) -> String {
    match Url::parse(remote) {
        Ok(mut url) if !url.username().is_empty() || url.password().is_some() => {
            let _ = url.set_username("");
            let _ = url.set_password(None);
            url.to_string()
        }
        _ => remote.to_string(),
    }
}

async fn run_git(
    operation: &'static str,
    working_dir: Option<&Path>,
    args: &[String],
) -> Result<(), SourceError> {
    let mut command = Command::new("git");
    if let Some(dir) = working_dir {
        command.arg("-C").arg(dir);
    }
    command
        .args(args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        // A dropped sync must not leave git running on the working copy
        .kill_on_drop(true);

    let output = command.output().await.map_err(SourceError::Spawn)?;
    if output.status.success() {
        tracing::debug!(operation, "git finished");
        Ok(())
    } else {
        let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        for arg in args {
            let redacted = redact(arg);
            if redacted != *arg {
                stderr = stderr.replace(arg.as_str(), &redacted);
            }
        }
        Err(SourceError::Git {
            operation,
            status: output.status.to_string(),
            stderr,
        })
    }
}
