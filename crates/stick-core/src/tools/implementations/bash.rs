//! Bash tool - run a shell command with a timeout and an output cap

use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};

use crate::constants::tools::{SHELL_KILL_GRACE, SHELL_MAX_OUTPUT, SHELL_TIMEOUT};
use crate::tools::registry::{
    parse_params, DangerLevel, ParameterType, Tool, ToolCategory, ToolContext, ToolDefinition,
    ToolError, ToolOutput, ToolParameter,
};

/// Substrings (lowercase) that block a command outright
const BLOCKED_PATTERNS: &[&str] = &[
    "rm -rf /",
    "rm -fr /",
    "mkfs",
    "dd if=/dev/zero",
    "dd if=/dev/random",
    ":(){:|:&};:",
    ":(){ :|:& };:",
    "chmod -r 777 /",
    "chown -r",
    "> /dev/sda",
];

const BLOCKED_MESSAGE: &str = "Command blocked: potentially dangerous operation detected";
const READ_CHUNK: usize = 8192;
/// Slack for draining the pipes once the process group is gone
const READER_JOIN_GRACE: Duration = Duration::from_millis(200);

static DEFINITION: Lazy<ToolDefinition> = Lazy::new(|| ToolDefinition {
    name: "bash".to_string(),
    description: "Execute a shell command and return its stdout and stderr".to_string(),
    category: ToolCategory::System,
    parameters: vec![
        ToolParameter::required("command", ParameterType::String, "Shell command to run"),
        ToolParameter::optional(
            "args",
            ParameterType::Array,
            "Extra arguments appended to the command, shell-quoted",
        ),
    ],
    requires_permission: true,
    danger_level: DangerLevel::High,
});

pub struct BashTool;

#[derive(Deserialize)]
struct Params {
    command: String,
    #[serde(default)]
    args: Vec<Value>,
}

/// Whether `command` matches the denylist (case-insensitive)
pub fn is_blocked_command(command: &str) -> bool {
    let lower = command.to_lowercase();
    let squashed: String = lower.chars().filter(|c| !c.is_whitespace()).collect();
    BLOCKED_PATTERNS.iter().any(|pattern| {
        lower.contains(pattern)
            || (pattern.starts_with(":(") && squashed.contains(&pattern.replace(' ', "")))
    })
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn full_command(params: &Params) -> String {
    let mut command = params.command.clone();
    for arg in &params.args {
        let text = match arg {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        command.push(' ');
        command.push_str(&shell_quote(&text));
    }
    command
}

fn build_shell_command(command: &str, ctx: &ToolContext) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd.current_dir(ctx.working_dir());
    cmd.envs(&ctx.environment);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    cmd
}

/// Shared byte budget across stdout and stderr
struct OutputBudget {
    used: AtomicUsize,
    limit: usize,
    exceeded: Notify,
}

async fn collect_pipe<R>(pipe: Option<R>, budget: Arc<OutputBudget>) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let Some(mut pipe) = pipe else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let used = budget.used.fetch_add(n, Ordering::SeqCst) + n;
                if used > budget.limit {
                    budget.exceeded.notify_one();
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
        }
    }
    out
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    if pid == 0 || pid > i32::MAX as u32 {
        return;
    }
    // SAFETY: negative pid addresses the process group created with
    // process_group(0); kill has no memory-safety preconditions.
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

/// TERM the whole process group, then KILL whatever is left after a grace
/// period.
async fn terminate_process_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        signal_group(pid, libc::SIGTERM);
        if timeout(SHELL_KILL_GRACE, child.wait()).await.is_ok() {
            signal_group(pid, libc::SIGKILL);
            return;
        }
        signal_group(pid, libc::SIGKILL);
    }

    let _ = child.kill().await;
    let _ = child.wait().await;
}

/// Wait for a pipe reader until `deadline`. A reader still blocked then
/// (some process outside the group holds the pipe) is aborted.
async fn join_reader_until(
    mut handle: JoinHandle<Vec<u8>>,
    deadline: Instant,
) -> Option<Vec<u8>> {
    match timeout_at(deadline, &mut handle).await {
        Ok(joined) => Some(joined.unwrap_or_default()),
        Err(_) => {
            handle.abort();
            let _ = handle.await;
            None
        }
    }
}

enum Finish {
    Exited(std::process::ExitStatus),
    TimedOut,
    OutputExceeded,
}

async fn run_command(
    command: &str,
    ctx: &ToolContext,
    limit: usize,
    time_limit: Duration,
) -> Result<ToolOutput, ToolError> {
    let deadline = Instant::now() + time_limit;
    let mut child = build_shell_command(command, ctx)
        .spawn()
        .map_err(|e| ToolError::failed(format!("Failed to spawn command: {}", e)))?;
    #[cfg(unix)]
    let pid = child.id();

    let budget = Arc::new(OutputBudget {
        used: AtomicUsize::new(0),
        limit,
        exceeded: Notify::new(),
    });
    let stdout = tokio::spawn(collect_pipe(child.stdout.take(), Arc::clone(&budget)));
    let stderr = tokio::spawn(collect_pipe(child.stderr.take(), Arc::clone(&budget)));

    let finish = tokio::select! {
        status = child.wait() => Finish::Exited(status?),
        _ = sleep_until(deadline) => Finish::TimedOut,
        _ = budget.exceeded.notified() => Finish::OutputExceeded,
    };

    let readers_deadline = match finish {
        Finish::Exited(_) => {
            // Background jobs the command left behind still hold the pipes
            #[cfg(unix)]
            if let Some(pid) = pid {
                signal_group(pid, libc::SIGKILL);
            }
            deadline.max(Instant::now() + READER_JOIN_GRACE)
        }
        _ => {
            terminate_process_tree(&mut child).await;
            Instant::now() + READER_JOIN_GRACE
        }
    };

    let stdout = join_reader_until(stdout, readers_deadline).await;
    let stderr = join_reader_until(stderr, readers_deadline).await;
    let (stdout, stderr) = match (stdout, stderr) {
        (Some(out), Some(err)) => (
            String::from_utf8_lossy(&out).into_owned(),
            String::from_utf8_lossy(&err).into_owned(),
        ),
        _ if matches!(finish, Finish::OutputExceeded) => (String::new(), String::new()),
        _ => {
            tracing::warn!(command = %command, "Shell output pipes outlived the timeout");
            return Err(ToolError::Timeout(time_limit.as_millis()));
        }
    };

    let status = match finish {
        Finish::TimedOut => return Err(ToolError::Timeout(time_limit.as_millis())),
        Finish::OutputExceeded => {
            return Err(ToolError::OutputTooLarge(
                "Output size exceeds maximum allowed".to_string(),
            ))
        }
        Finish::Exited(status) => status,
    };

    // Exit may race the budget check when the last read tips it over
    if budget.used.load(Ordering::SeqCst) > limit {
        return Err(ToolError::OutputTooLarge(
            "Output size exceeds maximum allowed".to_string(),
        ));
    }

    let exit_code = exit_code(&status);
    let output = json!({
        "stdout": stdout.trim(),
        "stderr": stderr.trim(),
    });
    let metadata = json!({
        "command": command,
        "exitCode": exit_code,
    });

    if status.success() {
        Ok(ToolOutput::new(output).with_metadata(metadata))
    } else {
        Err(ToolError::Failed {
            message: format!("Command exited with code {}", exit_code),
            output: Some(output),
            metadata: Some(metadata),
        })
    }
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

#[async_trait]
impl Tool for BashTool {
    fn definition(&self) -> &ToolDefinition {
        &DEFINITION
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let params: Params = parse_params(params)?;
        let command = full_command(&params);

        if is_blocked_command(&command) {
            tracing::warn!(command = %command, "Blocked dangerous shell command");
            return Err(ToolError::PermissionDenied(BLOCKED_MESSAGE.to_string()));
        }

        let limit = ctx.max_output_or(SHELL_MAX_OUTPUT);
        let time_limit = ctx.timeout_or(SHELL_TIMEOUT);
        tracing::debug!(command = %command, timeout_ms = time_limit.as_millis() as u64, "Running shell command");
        run_command(&command, ctx, limit, time_limit).await
    }
}
