use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout};
use tokio::sync::Mutex;
use tracing::debug;

use super::types::{AgentEvent, AgentHandle, MaterializedTask, Usage};
use super::{classify_error, AdapterError, Harness};

struct ProcessState {
    child: Child,
    stdout: Option<ChildStdout>,
    stderr: Arc<Mutex<String>>,
}

/// Adapter for the `claude` CLI, launched with `--print --output-format
/// stream-json --verbose` and framed as newline-delimited JSON.
pub struct ClaudeCodeAdapter {
    claude_binary_path: String,
    processes: Arc<Mutex<HashMap<u32, ProcessState>>>,
}

impl std::fmt::Debug for ClaudeCodeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaudeCodeAdapter")
            .field("claude_binary_path", &self.claude_binary_path)
            .finish()
    }
}

impl Default for ClaudeCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ClaudeCodeAdapter {
    pub fn new() -> Self {
        Self::with_binary("claude")
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self {
            claude_binary_path: path.into(),
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn build_args(task: &MaterializedTask) -> Vec<String> {
        let mut args = vec![
            "--print".to_owned(),
            "--output-format".to_owned(),
            "stream-json".to_owned(),
            "--verbose".to_owned(),
        ];

        if task.bypass_permissions {
            args.push("--dangerously-skip-permissions".to_owned());
        }

        if let Some(model) = &task.model_alias {
            if model != "sonnet" {
                args.push("--model".to_owned());
                args.push(model.clone());
            }
        }

        if let Some(session_id) = &task.resume_session_id {
            args.push("--resume".to_owned());
            args.push(session_id.clone());
        }

        if let Some(tools) = &task.allowed_tools {
            args.push("--allowedTools".to_owned());
            args.extend(tools.iter().cloned());
        }

        if let Some(prompt) = &task.append_system_prompt {
            args.push("--append-system-prompt".to_owned());
            args.push(prompt.clone());
        }

        // Quotes in the final positional prompt are escaped by doubling.
        args.push(task.prompt.replace('"', "\"\""));

        args
    }
}

#[async_trait]
impl Harness for ClaudeCodeAdapter {
    fn name(&self) -> &str {
        "claude-code"
    }

    async fn spawn(&self, task: &MaterializedTask) -> Result<AgentHandle, AdapterError> {
        let args = Self::build_args(task);

        let mut cmd = tokio::process::Command::new(&self.claude_binary_path);
        cmd.args(&args)
            .current_dir(&task.working_dir)
            .env_remove("ANTHROPIC_API_KEY")
            .env_remove("CI")
            .envs(&task.env_vars)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| classify_error("", Some(&e)))?;
        let pid = child.id().unwrap_or(0);

        let stdout = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        if let Some(mut stderr) = stderr_pipe {
            let buf = stderr_buf.clone();
            tokio::spawn(async move {
                let mut captured = String::new();
                if stderr.read_to_string(&mut captured).await.is_ok() {
                    *buf.lock().await = captured;
                }
            });
        }

        self.processes.lock().await.insert(
            pid,
            ProcessState {
                child,
                stdout,
                stderr: stderr_buf,
            },
        );

        Ok(AgentHandle {
            pid,
            stdin: None,
            task_id: task.task_id,
        })
    }

    fn events(&self, handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = Result<AgentEvent, AdapterError>> + Send>> {
        let processes = self.processes.clone();
        let pid = handle.pid;

        Box::pin(stream! {
            let taken = {
                let mut guard = processes.lock().await;
                guard.get_mut(&pid).and_then(|state| state.stdout.take())
            };

            let Some(stdout) = taken else {
                yield Err(AdapterError::Unknown("stdout already consumed or process unknown".to_owned()));
                return;
            };

            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        for event in parse_stream_json_line(&line) {
                            yield Ok(event);
                        }
                    }
                    Ok(None) => break,
                    Err(_) => break,
                }
            }

            let outcome = {
                let mut guard = processes.lock().await;
                if let Some(mut state) = guard.remove(&pid) {
                    let status = state.child.wait().await;
                    let stderr = state.stderr.lock().await.clone();
                    Some((status, stderr))
                } else {
                    None
                }
            };

            if let Some((status, stderr)) = outcome {
                let exited_ok = status.map(|s| s.success()).unwrap_or(false);
                if !exited_ok && !stderr.is_empty() {
                    yield Err(classify_error(&stderr, None));
                }
            }
        })
    }

    async fn kill(&self, handle: &AgentHandle) -> Result<(), AdapterError> {
        let mut guard = self.processes.lock().await;
        let Some(state) = guard.get_mut(&handle.pid) else {
            // Idempotent: killing an already-reaped process is a no-op.
            return Ok(());
        };

        #[cfg(unix)]
        {
            unsafe {
                libc::kill(handle.pid as i32, libc::SIGTERM);
            }
        }

        let wait = tokio::time::timeout(std::time::Duration::from_secs(5), state.child.wait()).await;
        if wait.is_err() {
            let _ = state.child.kill().await;
        }
        guard.remove(&handle.pid);
        Ok(())
    }

    async fn is_running(&self, handle: &AgentHandle) -> bool {
        let mut guard = self.processes.lock().await;
        let Some(state) = guard.get_mut(&handle.pid) else {
            return false;
        };
        match state.child.try_wait() {
            Ok(Some(_)) => {
                guard.remove(&handle.pid);
                false
            }
            Ok(None) => true,
            Err(_) => false,
        }
    }
}

fn extract_usage(value: &Value) -> Usage {
    let usage_obj = value.get("usage");
    let input_tokens = usage_obj
        .and_then(|u| u.get("input_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let output_tokens = usage_obj
        .and_then(|u| u.get("output_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let cache_read_tokens = usage_obj
        .and_then(|u| u.get("cache_read_input_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let cache_creation_tokens = usage_obj
        .and_then(|u| u.get("cache_creation_input_tokens"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let cost_usd = value.get("total_cost_usd").and_then(|v| v.as_f64()).unwrap_or(0.0);

    Usage {
        input_tokens,
        output_tokens,
        cache_read_tokens,
        cache_creation_tokens,
        total_tokens: input_tokens + output_tokens,
        cost_usd,
    }
}

/// Map one line of the agent's stream-JSON stdout to zero or more events,
/// per the fixed taxonomy: tool_use blocks on `assistant` messages,
/// `tool_progress`, and `result` (success or error_during_execution).
/// Everything else -- including `system` messages and malformed JSON -- is
/// dropped silently.
fn parse_stream_json_line(line: &str) -> Vec<AgentEvent> {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Vec::new();
    };
    let Some(type_) = value.get("type").and_then(|t| t.as_str()) else {
        return Vec::new();
    };

    match type_ {
        "assistant" => {
            let Some(blocks) = value.pointer("/message/content").and_then(|c| c.as_array()) else {
                return Vec::new();
            };
            blocks
                .iter()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("tool_use"))
                .map(|b| {
                    let tool_use_id = b.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
                    let tool_name = b.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
                    let input = b.get("input").cloned().unwrap_or(Value::Null);
                    if tool_name == "AskUserQuestion" {
                        AgentEvent::Question {
                            tool_use_id,
                            question: input,
                        }
                    } else {
                        AgentEvent::ToolCall {
                            tool_use_id,
                            tool_name,
                            input,
                            is_progress: false,
                        }
                    }
                })
                .collect()
        }
        "tool_progress" => {
            let tool_use_id = value.get("tool_use_id").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
            let tool_name = value.get("tool_name").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
            vec![AgentEvent::ToolCall {
                tool_use_id,
                tool_name,
                input: Value::Null,
                is_progress: true,
            }]
        }
        "result" => {
            let subtype = value.get("subtype").and_then(|v| v.as_str()).unwrap_or_default();
            match subtype {
                "success" => {
                    let session_id = value.get("session_id").and_then(|v| v.as_str()).map(str::to_owned);
                    let result = value.get("result").and_then(|v| v.as_str()).unwrap_or_default().to_owned();
                    let num_turns = value.get("num_turns").and_then(|v| v.as_u64());
                    let duration_ms = value.get("duration_ms").and_then(|v| v.as_u64());
                    vec![AgentEvent::Completion {
                        success: true,
                        session_id,
                        result,
                        usage: extract_usage(&value),
                        num_turns,
                        duration_ms,
                    }]
                }
                "error_during_execution" => {
                    let errors = value
                        .get("errors")
                        .and_then(|v| v.as_array())
                        .map(|arr| arr.iter().filter_map(|e| e.as_str().map(str::to_owned)).collect::<Vec<_>>())
                        .or_else(|| value.get("error").and_then(|v| v.as_str()).map(|s| vec![s.to_owned()]))
                        .unwrap_or_else(|| vec!["Unknown error".to_owned()]);
                    vec![AgentEvent::Error {
                        errors,
                        usage: extract_usage(&value),
                    }]
                }
                _ => {
                    debug!(subtype, "dropping unrecognized result subtype");
                    Vec::new()
                }
            }
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn base_task(prompt: &str, working_dir: std::path::PathBuf) -> MaterializedTask {
        MaterializedTask {
            task_id: uuid::Uuid::new_v4(),
            project_id: uuid::Uuid::new_v4(),
            title: "test task".to_owned(),
            prompt: prompt.to_owned(),
            working_dir,
            env_vars: HashMap::new(),
            model_alias: None,
            resume_session_id: None,
            allowed_tools: None,
            append_system_prompt: None,
            bypass_permissions: false,
        }
    }

    #[test]
    fn parse_assistant_tool_use_emits_tool_call() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"Bash","input":{"command":"ls"}}]}}"#;
        let events = parse_stream_json_line(line);
        assert_eq!(events.len(), 1);
        match &events[0] {
            AgentEvent::ToolCall { tool_name, is_progress, .. } => {
                assert_eq!(tool_name, "Bash");
                assert!(!is_progress);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_assistant_ask_user_question_emits_question() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t1","name":"AskUserQuestion","input":{"q":"continue?"}}]}}"#;
        let events = parse_stream_json_line(line);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AgentEvent::Question { .. }));
    }

    #[test]
    fn parse_assistant_text_only_is_dropped() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}]}}"#;
        assert!(parse_stream_json_line(line).is_empty());
    }

    #[test]
    fn parse_tool_progress_sets_is_progress() {
        let line = r#"{"type":"tool_progress","tool_use_id":"t1","tool_name":"Bash"}"#;
        let events = parse_stream_json_line(line);
        match &events[0] {
            AgentEvent::ToolCall { is_progress, .. } => assert!(is_progress),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_result_success_extracts_usage_and_session() {
        let line = r#"{"type":"result","subtype":"success","session_id":"sess-xyz789","result":"Hello","usage":{"input_tokens":1000,"output_tokens":500},"total_cost_usd":0.05}"#;
        let events = parse_stream_json_line(line);
        assert_eq!(events.len(), 1);
        match &events[0] {
            AgentEvent::Completion { success, session_id, result, usage, .. } => {
                assert!(*success);
                assert_eq!(session_id.as_deref(), Some("sess-xyz789"));
                assert_eq!(result, "Hello");
                assert_eq!(usage.input_tokens, 1000);
                assert_eq!(usage.output_tokens, 500);
                assert_eq!(usage.total_tokens, 1500);
                assert_eq!(usage.cost_usd, 0.05);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_result_error_with_errors_array() {
        let line = r#"{"type":"result","subtype":"error_during_execution","errors":["boom","bang"],"usage":{}}"#;
        let events = parse_stream_json_line(line);
        match &events[0] {
            AgentEvent::Error { errors, .. } => assert_eq!(errors, &vec!["boom".to_owned(), "bang".to_owned()]),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_result_error_with_neither_errors_nor_error_defaults_unknown() {
        let line = r#"{"type":"result","subtype":"error_during_execution","usage":{}}"#;
        let events = parse_stream_json_line(line);
        match &events[0] {
            AgentEvent::Error { errors, .. } => assert_eq!(errors, &vec!["Unknown error".to_owned()]),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn parse_system_message_is_dropped() {
        let line = r#"{"type":"system","subtype":"init"}"#;
        assert!(parse_stream_json_line(line).is_empty());
    }

    #[test]
    fn parse_malformed_json_is_dropped_silently() {
        assert!(parse_stream_json_line("not json at all").is_empty());
    }

    #[test]
    fn build_args_includes_constant_flags() {
        let task = base_task("hello", "/tmp".into());
        let args = ClaudeCodeAdapter::build_args(&task);
        assert_eq!(&args[0..4], &["--print", "--output-format", "stream-json", "--verbose"]);
        assert_eq!(args.last().unwrap(), "hello");
    }

    #[test]
    fn build_args_omits_model_flag_for_default_sonnet() {
        let mut task = base_task("hi", "/tmp".into());
        task.model_alias = Some("sonnet".to_owned());
        let args = ClaudeCodeAdapter::build_args(&task);
        assert!(!args.contains(&"--model".to_owned()));
    }

    #[test]
    fn build_args_includes_model_flag_for_non_default() {
        let mut task = base_task("hi", "/tmp".into());
        task.model_alias = Some("opus".to_owned());
        let args = ClaudeCodeAdapter::build_args(&task);
        let idx = args.iter().position(|a| a == "--model").unwrap();
        assert_eq!(args[idx + 1], "opus");
    }

    #[test]
    fn build_args_escapes_quotes_by_doubling() {
        let task = base_task(r#"say "hi""#, "/tmp".into());
        let args = ClaudeCodeAdapter::build_args(&task);
        assert_eq!(args.last().unwrap(), r#"say ""hi"""#);
    }

    #[test]
    fn build_args_includes_resume_and_allowed_tools() {
        let mut task = base_task("hi", "/tmp".into());
        task.resume_session_id = Some("sess-1".to_owned());
        task.allowed_tools = Some(vec!["Bash".to_owned(), "Read".to_owned()]);
        let args = ClaudeCodeAdapter::build_args(&task);
        assert!(args.windows(2).any(|w| w == ["--resume", "sess-1"]));
        let tools_idx = args.iter().position(|a| a == "--allowedTools").unwrap();
        assert_eq!(args[tools_idx + 1], "Bash");
        assert_eq!(args[tools_idx + 2], "Read");
    }

    fn write_fake_binary(dir: &std::path::Path, script: &str) -> std::path::PathBuf {
        let path = dir.join("fake-claude.sh");
        fs::write(&path, script).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn spawn_and_collect_full_event_stream() {
        let dir = tempdir().unwrap();
        let script = format!(
            "#!/bin/sh\necho '{{\"type\":\"result\",\"subtype\":\"success\",\"session_id\":\"sess-1\",\"result\":\"done\",\"usage\":{{\"input_tokens\":1,\"output_tokens\":2}},\"total_cost_usd\":0.01}}'\n"
        );
        let bin = write_fake_binary(dir.path(), &script);

        let adapter = ClaudeCodeAdapter::with_binary(bin.to_string_lossy().to_string());
        let task = base_task("hi", dir.path().to_path_buf());
        let handle = adapter.spawn(&task).await.unwrap();

        use futures::StreamExt;
        let mut stream = adapter.events(&handle);
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event.unwrap());
        }

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AgentEvent::Completion { success: true, .. }));
    }

    #[tokio::test]
    async fn spawn_nonexistent_binary_classifies_as_not_found() {
        let dir = tempdir().unwrap();
        let adapter = ClaudeCodeAdapter::with_binary("/nonexistent/path/to/claude");
        let task = base_task("hi", dir.path().to_path_buf());
        let err = adapter.spawn(&task).await.unwrap_err();
        assert!(matches!(err, AdapterError::CliNotFound(_)));
    }

    #[tokio::test]
    async fn kill_is_idempotent_on_already_reaped_process() {
        let dir = tempdir().unwrap();
        let bin = write_fake_binary(dir.path(), "#!/bin/sh\nexit 0\n");
        let adapter = ClaudeCodeAdapter::with_binary(bin.to_string_lossy().to_string());
        let task = base_task("hi", dir.path().to_path_buf());
        let handle = adapter.spawn(&task).await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        adapter.kill(&handle).await.unwrap();
        adapter.kill(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn send_is_not_supported() {
        let dir = tempdir().unwrap();
        let bin = write_fake_binary(dir.path(), "#!/bin/sh\nexit 0\n");
        let adapter = ClaudeCodeAdapter::with_binary(bin.to_string_lossy().to_string());
        let task = base_task("hi", dir.path().to_path_buf());
        let handle = adapter.spawn(&task).await.unwrap();
        let err = adapter.send(&handle, "hello").await.unwrap_err();
        assert_eq!(err, AdapterError::NotSupported);
    }

    #[tokio::test]
    async fn working_directory_is_propagated() {
        let dir = tempdir().unwrap();
        let bin = write_fake_binary(
            dir.path(),
            "#!/bin/sh\necho '{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"'\"$(pwd)\"'\"}'\n",
        );
        let adapter = ClaudeCodeAdapter::with_binary(bin.to_string_lossy().to_string());
        let task = base_task("hi", dir.path().to_path_buf());
        let handle = adapter.spawn(&task).await.unwrap();

        use futures::StreamExt;
        let mut stream = adapter.events(&handle);
        let event = stream.next().await.unwrap().unwrap();
        match event {
            AgentEvent::Completion { result, .. } => {
                let canon = fs::canonicalize(dir.path()).unwrap();
                assert_eq!(std::path::Path::new(&result), canon.as_path());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
