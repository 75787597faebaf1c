use drover_core::{Error, Result, TaskRequest};
use serde_json::Value;

use crate::intent::{keys, IntentKind, TaskContext, TaskIntent};

/// Shared preamble: the remote agent's per-step messages are what feeds
/// the live message log, so every template insists on them.
const PROGRESS_HEADER: &str = r#"PROGRESS TRACKING REQUIREMENT:
Use your "send message to user" action after COMPLETING each step below so
the caller can track progress in real time. Do not batch steps - send one
message per completed step."#;

/// Render a deterministic instruction for `intent` from `context`.
///
/// Identical inputs yield byte-identical instructions: templates are fixed
/// per intent kind, contain no clock reads or randomness, and the context
/// record enumerates in a stable order. Fails with `InvalidRequest` when a
/// required field is missing; nothing here touches the network.
pub fn build(intent: &TaskIntent, context: &TaskContext) -> Result<TaskRequest> {
    if intent.target.trim().is_empty() {
        return Err(Error::InvalidRequest(
            "intent target must not be empty".to_string(),
        ));
    }
    let instruction = match intent.kind {
        IntentKind::Remove => render_remove(intent, context)?,
        IntentKind::Restore => render_restore(intent, context)?,
        IntentKind::MakePermanent => render_make_permanent(intent, context)?,
        IntentKind::Replace => render_replace(intent, context)?,
    };
    TaskRequest::new(instruction, Some(payload(intent, context)))
}

/// Structured echo of what was asked, carried on the request for callers
/// and logging. Not sent to the remote service.
fn payload(intent: &TaskIntent, context: &TaskContext) -> Value {
    serde_json::json!({
        "intent": intent.kind.as_str(),
        "target": intent.target,
        "params": context.clone().into_value(),
    })
}

/// Lowercase the name and replace every whitespace character with a dash.
/// Matches the branch naming the dashboard has always produced, including
/// doubled dashes for doubled spaces.
pub fn slug(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() { '-' } else { c })
        .collect()
}

fn require_str<'a>(ctx: &'a TaskContext, kind: IntentKind, key: &str) -> Result<&'a str> {
    match ctx.get(key) {
        None => Err(Error::InvalidRequest(format!(
            "{kind} requires context field \"{key}\""
        ))),
        Some(v) => v.as_str().ok_or_else(|| {
            Error::InvalidRequest(format!("context field \"{key}\" must be a string for {kind}"))
        }),
    }
}

fn require_u64(ctx: &TaskContext, kind: IntentKind, key: &str) -> Result<u64> {
    match ctx.get(key) {
        None => Err(Error::InvalidRequest(format!(
            "{kind} requires context field \"{key}\""
        ))),
        Some(v) => v.as_u64().ok_or_else(|| {
            Error::InvalidRequest(format!("context field \"{key}\" must be a number for {kind}"))
        }),
    }
}

fn render_remove(intent: &TaskIntent, ctx: &TaskContext) -> Result<String> {
    let file = require_str(ctx, intent.kind, keys::FILE)?;
    let line_start = require_u64(ctx, intent.kind, keys::LINE_START)?;
    let line_end = require_u64(ctx, intent.kind, keys::LINE_END)?;
    let target = intent.target.as_str();
    let slugged = slug(target);
    let branch = format!("remove-{slugged}");

    let mut out = format!(
        "Remove the \"{target}\" feature flag from the codebase.\n\n{PROGRESS_HEADER}\n\nContext:\n- Target: {target}\n- Location: {file} (lines {line_start}-{line_end})\n"
    );
    if let Some(description) = ctx.str_field(keys::DESCRIPTION) {
        out.push_str(&format!("- Description: {description}\n"));
    }
    if let Some(references) = ctx.u64_field(keys::REFERENCES) {
        out.push_str(&format!(
            "- References: {references} other places in the codebase use this flag\n"
        ));
    }
    out.push_str(&format!(
        r#"
Task steps (send a message after EACH):

1. Locate the feature flag
   - Find the flag in {file} (lines {line_start}-{line_end})
   - Send message: "Step 1 complete: Found feature flag at [file:line]"

2. Create a backup
   - Back up the flag code to backups/removed-{slugged}-<timestamp>.json,
     using the current UTC time for <timestamp>
   - Send message: "Step 2 complete: Backup created at [path]"

3. Remove the feature flag
   - Remove the flag code from {file}
   - Send message: "Step 3 complete: Removed lines {line_start}-{line_end}"

4. Run tests
   - Run the test suite to verify nothing breaks
   - Send message: "Step 4 complete: Tests [passed/failed]. [X] tests run."

5. Create branch
   - Create git branch: {branch}
   - Send message: "Step 5 complete: Created branch [branch-name]"

6. Commit changes
   - Commit with message: "Remove {target} feature flag"
   - Send message: "Step 6 complete: Committed changes with SHA [commit-sha]"

7. Create pull request
   - Create a PR titled "Remove {target} feature flag" and note in the
     description that the change was automated
   - Send message: "Step 7 complete: Created PR #[number] at [url]"

8. Finalize
   - Send message: "Step 8 complete: All steps complete."

STRUCTURED OUTPUT (fill this in your final response):
{{
  "pr_number": [PR number],
  "backup_file_path": "[full path to backup]",
  "branch_name": "{branch}",
  "commit_sha": "[git commit hash]"
}}"#
    ));
    Ok(out)
}

fn render_restore(intent: &TaskIntent, ctx: &TaskContext) -> Result<String> {
    let file = require_str(ctx, intent.kind, keys::FILE)?;
    let line_start = require_u64(ctx, intent.kind, keys::LINE_START)?;
    let pr_number = require_u64(ctx, intent.kind, keys::PR_NUMBER)?;
    let target = intent.target.as_str();
    let slugged = slug(target);
    let branch = format!("recover-{slugged}");

    let backup_step = match ctx.str_field(keys::BACKUP_PATH) {
        Some(path) => format!("Load the backup file at {path}"),
        None => "Find and load the backup file for this feature".to_string(),
    };

    let mut out = format!(
        "Restore the \"{target}\" feature flag that was removed in PR #{pr_number}.\n\n{PROGRESS_HEADER}\n\nContext:\n- Target: {target}\n- Original location: {file} (line {line_start})\n- Removal PR: #{pr_number}\n"
    );
    if let Some(path) = ctx.str_field(keys::BACKUP_PATH) {
        out.push_str(&format!("- Backup file: {path}\n"));
    }
    out.push_str(&format!(
        r#"
Task steps (send a message after EACH):

1. Load backup
   - {backup_step}
   - Send message: "Step 1 complete: Found backup at [path]"

2. Analyze the removal PR
   - Review PR #{pr_number} to understand what was removed
   - Send message: "Step 2 complete: Analyzed PR #{pr_number}. Removed [X] lines from [file]"

3. Restore the flag code
   - Restore the feature flag code to {file} at line {line_start}
   - Send message: "Step 3 complete: Restored code to {file}:{line_start}"

4. Run tests
   - Run the test suite to verify functionality
   - Send message: "Step 4 complete: Tests [passed/failed]. [X] tests run."

5. Create branch
   - Create git branch: {branch}
   - Send message: "Step 5 complete: Created branch [branch-name]"

6. Commit changes
   - Commit with message: "Restore {target} feature flag"
   - Send message: "Step 6 complete: Committed changes with SHA [commit-sha]"

7. Create pull request
   - Create a PR titled "Restore {target} feature flag" and note that it
     reverts PR #{pr_number}
   - Send message: "Step 7 complete: Created PR #[number] at [url]"

8. Finalize
   - Send message: "Step 8 complete: All steps complete."

STRUCTURED OUTPUT (fill this in your final response):
{{
  "pr_number": [PR number],
  "branch_name": "{branch}",
  "commit_sha": "[git commit hash]",
  "reverts_pr": {pr_number}
}}"#
    ));
    Ok(out)
}

fn render_make_permanent(intent: &TaskIntent, ctx: &TaskContext) -> Result<String> {
    let file = require_str(ctx, intent.kind, keys::FILE)?;
    let line_start = require_u64(ctx, intent.kind, keys::LINE_START)?;
    let line_end = require_u64(ctx, intent.kind, keys::LINE_END)?;
    let target = intent.target.as_str();
    let slugged = slug(target);
    let branch = format!("enable-{slugged}");

    let mut out = format!(
        "Permanently enable the \"{target}\" feature flag: remove the toggle and keep only the ON behavior.\n\n{PROGRESS_HEADER}\n\nContext:\n- Target: {target}\n- Location: {file} (lines {line_start}-{line_end})\n"
    );
    if let Some(description) = ctx.str_field(keys::DESCRIPTION) {
        out.push_str(&format!("- Description: {description}\n"));
    }
    if let Some(category) = ctx.str_field(keys::CATEGORY) {
        out.push_str(&format!("- Category: {category}\n"));
    }
    out.push_str(&format!(
        r#"
Task steps (send a message after EACH):

1. Analyze the feature
   - Read {file} and locate the flag definition at lines {line_start}-{line_end}
   - Map every reference to this flag throughout the codebase
   - Send message: "Step 1 complete: Mapped [X] references"

2. Create a backup
   - Back up the flag definition to backups/enabled-{slugged}-<timestamp>.json,
     using the current UTC time for <timestamp>
   - Send message: "Step 2 complete: Backup created at [path]"

3. Make the behavior permanent
   - Integrate the enabled behavior into the code path that always runs
   - Delete the toggle definition (lines {line_start}-{line_end} of {file})
     and any conditional checks on it
   - Send message: "Step 3 complete: Behavior integrated, toggle removed"

4. Update tests
   - Remove tests that verify the toggle itself; keep tests that verify the
     behavior, which is now always on
   - Send message: "Step 4 complete: Tests [passed/failed]. [X] tests run."

5. Create branch and commit
   - Create git branch: {branch}
   - Commit with message: "Enable {target} permanently"
   - Send message: "Step 5 complete: Committed on branch [branch-name]"

6. Create pull request
   - Create a PR titled "Enable {target} permanently"
   - Send message: "Step 6 complete: Created PR #[number] at [url]"

7. Finalize
   - Send message: "Step 7 complete: All steps complete."

STRUCTURED OUTPUT (fill this in your final response):
{{
  "pr_number": [PR number],
  "backup_file_path": "[full path to backup]",
  "branch_name": "{branch}",
  "commit_sha": "[git commit hash]"
}}"#
    ));
    Ok(out)
}

fn render_replace(intent: &TaskIntent, ctx: &TaskContext) -> Result<String> {
    let file = require_str(ctx, intent.kind, keys::FILE)?;
    let replacement = require_str(ctx, intent.kind, keys::REPLACEMENT)?;
    let target = intent.target.as_str();
    let slugged = slug(target);
    let branch = format!("replace-{slugged}");

    let locate_step = match (ctx.u64_field(keys::LINE_START), ctx.u64_field(keys::LINE_END)) {
        (Some(start), Some(end)) => format!(
            "Locate the flag definition in {file} (lines {start}-{end}) and every place that reads it"
        ),
        _ => format!("Locate the flag definition in {file} and every place that reads it"),
    };

    let mut out = format!(
        "Replace the \"{target}\" feature flag with \"{replacement}\".\n\n{PROGRESS_HEADER}\n\nContext:\n- Target: {target}\n- Location: {file}\n- Replacement: {replacement}\n"
    );
    out.push_str(&format!(
        r#"
Task steps (send a message after EACH):

1. Locate the feature flag
   - {locate_step}
   - Send message: "Step 1 complete: Found [X] usages"

2. Create a backup
   - Back up the flag code to backups/replaced-{slugged}-<timestamp>.json,
     using the current UTC time for <timestamp>
   - Send message: "Step 2 complete: Backup created at [path]"

3. Substitute the replacement
   - Replace each usage of the flag with "{replacement}" and delete the flag
     definition from {file}
   - Send message: "Step 3 complete: Replaced [X] usages"

4. Run tests
   - Run the test suite to verify nothing breaks
   - Send message: "Step 4 complete: Tests [passed/failed]. [X] tests run."

5. Create branch and commit
   - Create git branch: {branch}
   - Commit with message: "Replace {target} feature flag"
   - Send message: "Step 5 complete: Committed on branch [branch-name]"

6. Create pull request
   - Create a PR titled "Replace {target} feature flag"
   - Send message: "Step 6 complete: Created PR #[number] at [url]"

7. Finalize
   - Send message: "Step 7 complete: All steps complete."

STRUCTURED OUTPUT (fill this in your final response):
{{
  "pr_number": [PR number],
  "branch_name": "{branch}",
  "commit_sha": "[git commit hash]",
  "replaced_with": "{replacement}"
}}"#
    ));
    Ok(out)
}
