//! Single Job Execution
//!
//! Runs the action of one job:
//! - Output directory creation
//! - Command placeholder substitution for shell actions
//! - Shell invocation in strict mode, or the Rust callable
//! - Output verification and cleanup after failures

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::process::Command;

use log::{debug, error, warn};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::BuildConfig;
use crate::error::{BuildError, Result};
use crate::workflow::builder::resolve_in;
use crate::workflow::dag::Job;
use crate::workflow::rule::{Action, JobContext};

/// `{name}`, `{name.attr}` or `{name[index]}`.
static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(\w+)(?:\.(\w+)|\[(\d+)\])?\}").unwrap());

/// Executes a single job and checks that it produced its outputs.
///
/// Any failure is reported as `ActionFailure` naming the rule and the job's
/// target. With `delete_failed_outputs` set, whatever outputs the job left
/// behind are removed.
pub fn execute_job(job: &Job, config: &BuildConfig) -> Result<()> {
    let outcome = ensure_output_directories(&job.outputs, &config.working_dir)
        .and_then(|_| run_action(job, config))
        .and_then(|_| verify_outputs(job, &config.working_dir));

    outcome.map_err(|message| {
        if config.delete_failed_outputs {
            remove_outputs(&job.outputs, &config.working_dir);
        }
        BuildError::ActionFailure {
            rule: job.rule.clone(),
            target: job.target().to_string(),
            message,
        }
    })
}

fn run_action(job: &Job, config: &BuildConfig) -> std::result::Result<(), String> {
    match &job.action {
        Action::Noop => Ok(()),
        Action::Shell(template) => {
            let command_text = render_command(template, job)?;
            run_shell(job, &command_text, config)
        }
        Action::Run { func, .. } => {
            let ctx = JobContext {
                rule: &job.rule,
                wildcards: &job.wildcards,
                inputs: &job.inputs,
                outputs: &job.outputs,
                threads: job.threads.clamp(1, config.cores.max(1)),
                working_dir: &config.working_dir,
            };
            match panic::catch_unwind(AssertUnwindSafe(|| func(&ctx))) {
                Ok(result) => result,
                Err(payload) => Err(format!("action panicked: {}", panic_message(payload.as_ref()))),
            }
        }
    }
}

/// Substitutes job placeholders in a shell template.
///
/// Supported: `{input}`, `{output}` (space-joined), `{input[i]}`,
/// `{output[i]}`, `{wildcards.name}`, `{threads}` and `{rule}`. Anything
/// else in braces is left untouched.
pub fn render_command(template: &str, job: &Job) -> std::result::Result<String, String> {
    let mut failure: Option<String> = None;

    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let whole = caps[0].to_string();
        let name = &caps[1];
        let attr = caps.get(2).map(|m| m.as_str());
        let index = caps.get(3).map(|m| m.as_str());

        let value = match (name, attr, index) {
            ("input", None, None) => Ok(job.inputs.join(" ")),
            ("output", None, None) => Ok(job.outputs.join(" ")),
            ("input", None, Some(i)) => indexed(&job.inputs, i, "input"),
            ("output", None, Some(i)) => indexed(&job.outputs, i, "output"),
            ("wildcards", Some(key), None) => job
                .wildcards
                .get(key)
                .map(str::to_string)
                .ok_or_else(|| format!("unknown wildcard '{}' in command", key)),
            ("threads", None, None) => Ok(job.threads.to_string()),
            ("rule", None, None) => Ok(job.rule.clone()),
            _ => Ok(whole.clone()),
        };

        value.unwrap_or_else(|e| {
            failure.get_or_insert(e);
            whole
        })
    });

    match failure {
        Some(e) => Err(e),
        None => Ok(rendered.into_owned()),
    }
}

fn indexed(files: &[String], index: &str, kind: &str) -> std::result::Result<String, String> {
    index
        .parse::<usize>()
        .ok()
        .and_then(|i| files.get(i))
        .cloned()
        .ok_or_else(|| {
            format!(
                "{}[{}] is out of range ({} {} files)",
                kind,
                index,
                files.len(),
                kind
            )
        })
}

/// Runs a command with the configured shell in strict mode.
fn run_shell(job: &Job, command_text: &str, config: &BuildConfig) -> std::result::Result<(), String> {
    debug!("{}: {}", job.label(), command_text);

    let output = Command::new(&config.shell)
        .arg("-c")
        .arg(format!("set -euo pipefail; {}", command_text))
        .current_dir(&config.working_dir)
        .output()
        .map_err(|e| format!("could not start '{}': {}", config.shell, e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        debug!("{} output:\n{}", job.label(), stdout);
    }

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    error!(
        "{} failed with exit code: {:?}",
        job.label(),
        output.status.code()
    );
    if !stderr.trim().is_empty() {
        error!("stderr:\n{}", stderr);
    }

    let detail = stderr.lines().last().unwrap_or("").trim();
    match output.status.code() {
        Some(code) if detail.is_empty() => Err(format!("command exited with code {}", code)),
        Some(code) => Err(format!("command exited with code {}: {}", code, detail)),
        None => Err("command terminated by signal".to_string()),
    }
}

/// Creates parent directories for output files.
fn ensure_output_directories(outputs: &[String], working_dir: &Path) -> std::result::Result<(), String> {
    for output in outputs {
        let path = resolve_in(working_dir, output);
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .map_err(|e| format!("could not create {}: {}", parent.display(), e))?;
                debug!("Created directory: {}", parent.display());
            }
        }
    }
    Ok(())
}

fn verify_outputs(job: &Job, working_dir: &Path) -> std::result::Result<(), String> {
    let missing: Vec<&str> = job
        .outputs
        .iter()
        .filter(|output| !resolve_in(working_dir, output).exists())
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(format!("missing output files after execution: {}", missing.join(", ")))
    }
}

fn remove_outputs(outputs: &[String], working_dir: &Path) {
    for output in outputs {
        let path = resolve_in(working_dir, output);
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else if path.exists() {
            fs::remove_file(&path)
        } else {
            continue;
        };
        match removed {
            Ok(()) => debug!("Removed output of failed job: {}", path.display()),
            Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
