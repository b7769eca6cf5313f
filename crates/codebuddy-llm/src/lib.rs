use anyhow::{Result, anyhow};
use codebuddy_core::LlmConfig;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;

pub const USER_REQUEST_MARKER: &str = "USER REQUEST:";

pub const HELP_RESPONSE: &str = "I'm your coding assistant! I can help with files, git, code execution, and analysis. What would you like me to do?";

/// Single request/response text exchange with a model.
pub trait LlmClient {
    fn generate(&self, prompt: &str) -> Result<String>;

    fn is_available(&self) -> bool;

    fn name(&self) -> &str;

    /// Degradation notices accumulated since the last call.
    fn drain_notices(&self) -> Vec<String> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    cfg: LlmConfig,
    client: Client,
}

impl GeminiClient {
    pub fn new(cfg: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds.max(1)))
            .build()?;
        Ok(Self { cfg, client })
    }

    fn request_url(&self) -> String {
        format!(
            "{}/{}:generateContent",
            self.cfg.endpoint.trim_end_matches('/'),
            self.cfg.model
        )
    }

    fn build_payload(&self, prompt: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }],
            }],
            "generationConfig": {
                "temperature": self.cfg.temperature,
                "maxOutputTokens": self.cfg.max_output_tokens,
            },
        })
    }

    fn resolve_api_key(&self) -> Option<String> {
        std::env::var(&self.cfg.api_key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| {
                self.cfg
                    .api_key
                    .as_ref()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })
    }
}

impl LlmClient for GeminiClient {
    fn generate(&self, prompt: &str) -> Result<String> {
        if self.cfg.offline {
            return Err(anyhow!("offline mode is enabled"));
        }
        let api_key = self.resolve_api_key().ok_or_else(|| {
            anyhow!(
                "no API key: set {} or configure llm.api_key in settings",
                self.cfg.api_key_env
            )
        })?;
        let response = self
            .client
            .post(self.request_url())
            .header("x-goog-api-key", api_key)
            .json(&self.build_payload(prompt))
            .send()
            .map_err(|e| format_transport_error(&e))?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(format_api_error(status, &body, &self.cfg.api_key_env));
        }
        parse_generate_payload(&body)
    }

    fn is_available(&self) -> bool {
        !self.cfg.offline && self.resolve_api_key().is_some()
    }

    fn name(&self) -> &str {
        &self.cfg.model
    }
}

fn format_api_error(status: StatusCode, body: &str, key_env: &str) -> anyhow::Error {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(ToString::to_string))
        })
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => anyhow!(
            "Invalid or missing API key (HTTP {}). Set {key_env} or configure llm.api_key in settings.",
            status.as_u16()
        ),
        StatusCode::TOO_MANY_REQUESTS => {
            anyhow!("Rate limited (HTTP 429). Try again shortly. Detail: {detail}")
        }
        _ => anyhow!("model API error (HTTP {}): {detail}", status.as_u16()),
    }
}

fn format_transport_error(err: &reqwest::Error) -> anyhow::Error {
    let inner = err
        .source()
        .map(|e| e.to_string())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if err.is_timeout() {
        anyhow!("Request timed out. Increase llm.timeout_seconds if this persists.")
    } else if inner.contains("dns") || inner.contains("resolve") || inner.contains("no such host") {
        anyhow!("DNS resolution failed for the model endpoint. Check your network settings.")
    } else if err.is_connect() {
        anyhow!("Connection refused by the model endpoint.")
    } else {
        anyhow!("Network error: {err}")
    }
}

/// Concatenates the text parts of the first candidate.
fn parse_generate_payload(body: &str) -> Result<String> {
    let value: Value = serde_json::from_str(body)?;
    let parts = value
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("unexpected payload: missing candidates[0].content.parts"))?;
    let text = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect::<String>();
    let text = text.trim();
    if text.is_empty() {
        return Err(anyhow!("model returned an empty response"));
    }
    Ok(text.to_string())
}

static PY_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z_][A-Za-z0-9_./\\-]*\.py)\b").expect("valid python file regex")
});
static ANY_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z_][A-Za-z0-9_./\\-]*\.[A-Za-z]+)\b").expect("valid file regex")
});
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(the (?:file|one) (?:we|i|you) just (?:created|made|wrote|edited)|the (?:last|latest|new) file|(?:this|that) (?:file|one)|it|this|that)\b",
    )
    .expect("valid reference regex")
});
static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["']([^"']+)["']"#).expect("valid quoted regex"));

/// Canned responder used when no model is reachable. Recognizes common
/// requests on the `USER REQUEST:` line and answers in tool-call syntax.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedClient;

impl RuleBasedClient {
    pub fn new() -> Self {
        Self
    }

    pub fn respond(&self, prompt: &str) -> String {
        let request = user_request(prompt);
        let lower = request.to_ascii_lowercase();
        let has = |word: &str| lower.contains(word);
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .filter(|t| !t.is_empty())
            .collect();
        let said = |verbs: &[&str]| tokens.iter().any(|t| verbs.contains(t));
        let words: Vec<&str> = request.split_whitespace().collect();

        if said(&["create", "make"]) && (has("folder") || has("directory")) {
            let name = word_after(&words, &["folder", "directory"]).unwrap_or("new_folder");
            return format!("create_folder(folderpath='{name}')");
        }
        if said(&["write"]) || (said(&["create"]) && (has("file") || has(".py") || has(".txt"))) {
            let filename = ANY_FILE
                .captures(&request)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| "new_file.py".to_string());
            let content = if has("hello") {
                "print(\"Hello, World!\")".to_string()
            } else {
                format!("# {filename}\nprint(\"File created successfully!\")")
            };
            return format!("write_file(filepath=\"{filename}\", content=\"\"\"{content}\"\"\")");
        }
        let analysis = if said(&["lint", "linter", "linting"]) {
            Some("python_lint")
        } else if said(&["complexity", "complex"]) {
            Some("analyze_complexity")
        } else if said(&["security", "vulnerabilities", "vulnerability"]) {
            Some("security_scan")
        } else {
            None
        };
        if let Some(tool) = analysis {
            return match PY_FILE.captures(&request).map(|c| c[1].to_string()).or_else(|| reference(&request)) {
                Some(path) => format!("{tool}(filepath='{path}')"),
                None => format!("{tool}()"),
            };
        }
        if said(&["read", "show", "open"]) {
            return match target(&request) {
                Some(path) => format!("read_file(filepath='{path}')"),
                None => "read_file()".to_string(),
            };
        }
        if said(&["list"]) && !said(&["branch", "branches"]) {
            return "list_files(directory='.')".to_string();
        }
        if said(&["delete", "remove"]) {
            if said(&["branch"]) {
                return git_branch_call(&request, "delete");
            }
            if has("folder") || has("directory") {
                return match word_after(&words, &["folder", "directory"]) {
                    Some(name) => format!("delete_folder(folderpath='{name}')"),
                    None => "delete_folder()".to_string(),
                };
            }
            return match target(&request) {
                Some(path) => format!("delete_file(filepath='{path}')"),
                None => "delete_file()".to_string(),
            };
        }
        if said(&["check"]) && (has("syntax") || has("error")) {
            return match PY_FILE.captures(&request).map(|c| c[1].to_string()).or_else(|| reference(&request)) {
                Some(path) => format!("check_syntax(filepath='{path}')"),
                None => "check_syntax()".to_string(),
            };
        }
        if said(&["git"]) {
            return git_call(&request);
        }
        if said(&["run", "execute"]) {
            if said(&["python", "python3"]) || has(".py") {
                return match PY_FILE.captures(&request).map(|c| c[1].to_string()).or_else(|| reference(&request)) {
                    Some(path) => format!("run_python(filepath='{path}')"),
                    None => "run_python()".to_string(),
                };
            }
            let command = words
                .iter()
                .skip_while(|w| !matches!(w.to_ascii_lowercase().as_str(), "run" | "execute"))
                .skip(1)
                .copied()
                .collect::<Vec<_>>()
                .join(" ");
            let command = if command.is_empty() { "ls".to_string() } else { command };
            return format!("run_command(command=\"{}\")", command.replace('"', "\\\""));
        }
        HELP_RESPONSE.to_string()
    }
}

impl LlmClient for RuleBasedClient {
    fn generate(&self, prompt: &str) -> Result<String> {
        Ok(self.respond(prompt))
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "rule-based"
    }
}

/// The request line of a prompt, or the whole prompt when the marker is absent.
fn user_request(prompt: &str) -> String {
    let lower = prompt.to_ascii_lowercase();
    let marker = USER_REQUEST_MARKER.to_ascii_lowercase();
    let Some(start) = lower.rfind(&marker).map(|idx| idx + marker.len()) else {
        return prompt.trim().to_string();
    };
    let rest = &prompt[start..];
    let line = rest.lines().next().unwrap_or_default();
    line.trim().trim_matches('"').trim().to_string()
}

fn word_after<'a>(words: &[&'a str], keys: &[&str]) -> Option<&'a str> {
    words
        .iter()
        .position(|w| keys.contains(&w.to_ascii_lowercase().as_str()))
        .and_then(|idx| words.get(idx + 1))
        .map(|w| w.trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == ','))
        .filter(|w| !w.is_empty() && !matches!(w.to_ascii_lowercase().as_str(), "called" | "named"))
        .or_else(|| {
            let idx = words
                .iter()
                .position(|w| matches!(w.to_ascii_lowercase().as_str(), "called" | "named"))?;
            words.get(idx + 1).copied()
        })
}

fn reference(request: &str) -> Option<String> {
    REFERENCE.captures(request).map(|c| c[1].to_string())
}

fn target(request: &str) -> Option<String> {
    ANY_FILE
        .captures(request)
        .map(|c| c[1].to_string())
        .or_else(|| reference(request))
}

fn git_call(request: &str) -> String {
    let lower = request.to_ascii_lowercase();
    let after = |word: &str| -> Vec<String> {
        let words: Vec<&str> = request.split_whitespace().collect();
        words
            .iter()
            .position(|w| w.eq_ignore_ascii_case(word))
            .map(|idx| words[idx + 1..].iter().map(|w| w.to_string()).collect())
            .unwrap_or_default()
    };

    if lower.contains("status") {
        "git_status()".to_string()
    } else if lower.contains("diff") {
        if lower.contains("staged") || lower.contains("cached") {
            return "git_diff(staged=true)".to_string();
        }
        match ANY_FILE.captures(request) {
            Some(c) => format!("git_diff(filepath='{}')", &c[1]),
            None => "git_diff()".to_string(),
        }
    } else if lower.contains("commit") {
        let message = QUOTED
            .captures(request)
            .map(|c| c[1].to_string())
            .unwrap_or_else(|| after("commit").join(" "));
        let message = message.trim().trim_matches(['"', '\'']).to_string();
        if message.is_empty() {
            "git_commit()".to_string()
        } else {
            format!("git_commit(message=\"{}\")", message.replace('"', "\\\""))
        }
    } else if lower.contains("add") || lower.contains("stage") {
        match ANY_FILE.captures(request) {
            Some(c) => format!("git_add(files='{}')", &c[1]),
            None => "git_add(files='.')".to_string(),
        }
    } else if lower.contains("push") || lower.contains("pull") {
        let verb = if lower.contains("push") { "push" } else { "pull" };
        let rest = after(verb);
        match rest.as_slice() {
            [] => format!("git_{verb}()"),
            [remote] => format!("git_{verb}(remote='{remote}')"),
            [remote, branch, ..] => format!("git_{verb}(remote='{remote}', branch='{branch}')"),
        }
    } else if lower.contains("log") {
        match after("log").first().and_then(|n| n.parse::<u32>().ok()) {
            Some(count) => format!("git_log(count={count})"),
            None => "git_log()".to_string(),
        }
    } else if lower.contains("branch") || lower.contains("checkout") || lower.contains("switch") {
        let action = if lower.contains("create") || lower.contains("new") {
            "create"
        } else if lower.contains("switch") || lower.contains("checkout") {
            "switch"
        } else if lower.contains("delete") {
            "delete"
        } else {
            "list"
        };
        git_branch_call(request, action)
    } else {
        "git_status()".to_string()
    }
}

fn git_branch_call(request: &str, action: &str) -> String {
    if action == "list" {
        return "git_branch(action='list')".to_string();
    }
    let words: Vec<&str> = request.split_whitespace().collect();
    let verbs: &[&str] = match action {
        "create" => &["create", "new"],
        "switch" => &["switch", "checkout", "to"],
        _ => &["delete", "remove"],
    };
    let is_filler = |w: &str| {
        matches!(
            w.to_ascii_lowercase().as_str(),
            "branch" | "a" | "the" | "to" | "git" | "new"
        )
    };
    let name = word_after(&words, &["branch"])
        .filter(|w| !is_filler(w))
        .or_else(|| {
            words
                .iter()
                .enumerate()
                .filter(|(_, w)| verbs.contains(&w.to_ascii_lowercase().as_str()))
                .filter_map(|(idx, _)| words.get(idx + 1).copied())
                .filter(|w| !is_filler(w))
                .last()
        });
    match name {
        Some(name) => format!("git_branch(action='{action}', name='{name}')"),
        None => format!("git_branch(action='{action}')"),
    }
}

/// Primary model with sticky degradation to the canned responder. Once the
/// primary is unavailable, fails, or answers with nothing, every later call
/// in the session is served by the fallback.
pub struct FallbackClient {
    primary: Box<dyn LlmClient + Send + Sync>,
    fallback: RuleBasedClient,
    degraded: AtomicBool,
    notices: Mutex<Vec<String>>,
}

impl FallbackClient {
    pub fn new(primary: Box<dyn LlmClient + Send + Sync>) -> Self {
        let degraded = !primary.is_available();
        Self {
            primary,
            fallback: RuleBasedClient::new(),
            degraded: AtomicBool::new(degraded),
            notices: Mutex::new(Vec::new()),
        }
    }

    /// Gemini when configured, otherwise the canned responder alone.
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        Ok(Self::new(Box::new(GeminiClient::new(cfg.clone())?)))
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn degrade(&self, reason: String) {
        self.degraded.store(true, Ordering::SeqCst);
        if let Ok(mut notices) = self.notices.lock() {
            notices.push(format!("{reason}; using rule-based responses for this session"));
        }
    }
}

impl LlmClient for FallbackClient {
    fn generate(&self, prompt: &str) -> Result<String> {
        if self.is_degraded() {
            return self.fallback.generate(prompt);
        }
        match self.primary.generate(prompt) {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(_) => {
                self.degrade(format!("{} returned an empty response", self.primary.name()));
                self.fallback.generate(prompt)
            }
            Err(err) => {
                self.degrade(format!("{} failed: {err}", self.primary.name()));
                self.fallback.generate(prompt)
            }
        }
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        if self.is_degraded() {
            self.fallback.name()
        } else {
            self.primary.name()
        }
    }

    fn drain_notices(&self) -> Vec<String> {
        self.notices
            .lock()
            .map(|mut notices| std::mem::take(&mut *notices))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn prompt(request: &str) -> String {
        format!("You are a coding assistant.\nRECENT FILES: none\n{USER_REQUEST_MARKER} {request}\n")
    }

    #[test]
    fn parses_candidate_text_parts() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"read_file("},{"text":"filepath='a.py')"}]}}]}"#;
        assert_eq!(
            parse_generate_payload(body).expect("parse"),
            "read_file(filepath='a.py')"
        );
        assert!(parse_generate_payload(r#"{"candidates":[]}"#).is_err());
        assert!(
            parse_generate_payload(r#"{"candidates":[{"content":{"parts":[{"text":"  "}]}}]}"#)
                .is_err()
        );
    }

    #[test]
    fn payload_carries_generation_config() {
        let client = GeminiClient::new(LlmConfig::default()).expect("client");
        let payload = client.build_payload("hello");
        assert_eq!(payload["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(payload["generationConfig"]["maxOutputTokens"], 2048);
        assert!(client.request_url().ends_with("/gemini-1.5-flash:generateContent"));
    }

    #[test]
    fn resolve_api_key_uses_config_fallback() {
        let cfg = LlmConfig {
            api_key_env: "CODEBUDDY_TEST_KEY_FALLBACK".to_string(),
            api_key: Some("local-key".to_string()),
            ..LlmConfig::default()
        };
        let client = GeminiClient::new(cfg).expect("client");
        // SAFETY: test-only process-level env mutation.
        unsafe {
            std::env::remove_var("CODEBUDDY_TEST_KEY_FALLBACK");
        }
        assert_eq!(client.resolve_api_key().as_deref(), Some("local-key"));
        assert!(client.is_available());
    }

    #[test]
    fn offline_or_keyless_client_is_unavailable() {
        let keyless = GeminiClient::new(LlmConfig {
            api_key_env: "CODEBUDDY_TEST_KEY_ABSENT".to_string(),
            ..LlmConfig::default()
        })
        .expect("client");
        assert!(!keyless.is_available());
        assert!(keyless.generate("hi").is_err());

        let offline = GeminiClient::new(LlmConfig {
            api_key: Some("k".to_string()),
            offline: true,
            ..LlmConfig::default()
        })
        .expect("client");
        assert!(!offline.is_available());
    }

    #[test]
    fn generate_posts_to_endpoint_and_reads_text() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let request = read_http_request(&mut stream);
            let body = r#"{"candidates":[{"content":{"parts":[{"text":"git_status()"}]}}]}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
            request
        });

        let client = GeminiClient::new(LlmConfig {
            endpoint: format!("http://{addr}/v1beta/models"),
            api_key: Some("test-key".to_string()),
            api_key_env: "CODEBUDDY_TEST_KEY_MOCK".to_string(),
            ..LlmConfig::default()
        })
        .expect("client");
        let text = client.generate("show status").expect("generate");
        assert_eq!(text, "git_status()");
        let request = server.join().expect("join");
        assert!(request.starts_with("POST /v1beta/models/gemini-1.5-flash:generateContent"));
        assert!(request.to_ascii_lowercase().contains("x-goog-api-key: test-key"));
    }

    fn read_http_request(stream: &mut std::net::TcpStream) -> String {
        let mut buffer = Vec::new();
        let mut chunk = [0_u8; 4096];
        let mut expected = None;
        loop {
            let read = stream.read(&mut chunk).expect("read request");
            if read == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&buffer).to_string();
            if expected.is_none()
                && let Some(header_end) = text.find("\r\n\r\n")
            {
                let length = text[..header_end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                expected = Some(header_end + 4 + length);
            }
            if expected.is_some_and(|total| buffer.len() >= total) {
                break;
            }
        }
        String::from_utf8_lossy(&buffer).to_string()
    }

    #[test]
    fn api_errors_are_descriptive() {
        let err = format_api_error(StatusCode::UNAUTHORIZED, "{}", "GEMINI_API_KEY");
        assert!(err.to_string().contains("GEMINI_API_KEY"));
        let err = format_api_error(
            StatusCode::BAD_REQUEST,
            r#"{"error":{"message":"bad model"}}"#,
            "GEMINI_API_KEY",
        );
        assert_eq!(err.to_string(), "model API error (HTTP 400): bad model");
    }

    #[test]
    fn rule_based_maps_common_requests() {
        let client = RuleBasedClient::new();
        let cases = [
            ("create a folder called utils", "create_folder(folderpath='utils')"),
            ("read app.py", "read_file(filepath='app.py')"),
            ("list the files here", "list_files(directory='.')"),
            ("delete it", "delete_file(filepath='it')"),
            ("remove notes.txt", "delete_file(filepath='notes.txt')"),
            ("check syntax of calc.py", "check_syntax(filepath='calc.py')"),
            ("run tool.py with python", "run_python(filepath='tool.py')"),
            ("run ls -la", "run_command(command=\"ls -la\")"),
            ("git status please", "git_status()"),
            ("git log 3", "git_log(count=3)"),
            ("git push origin feature", "git_push(remote='origin', branch='feature')"),
            ("create a new git branch feat-x", "git_branch(action='create', name='feat-x')"),
            ("lint calc.py", "python_lint(filepath='calc.py')"),
            ("analyze the complexity of app/core.py", "analyze_complexity(filepath='app/core.py')"),
            ("scan it for security issues", "security_scan(filepath='it')"),
            ("lint", "python_lint()"),
        ];
        for (request, expected) in cases {
            assert_eq!(client.respond(&prompt(request)), expected, "{request}");
        }
    }

    #[test]
    fn rule_based_verbs_match_whole_words() {
        let client = RuleBasedClient::new();
        assert_eq!(
            client.respond(&prompt("delete README.md")),
            "delete_file(filepath='README.md')"
        );
        assert_eq!(
            client.respond(&prompt("remove the spreadsheet.csv")),
            "delete_file(filepath='spreadsheet.csv')"
        );
        assert_eq!(
            client.respond(&prompt("show the playlist.txt")),
            "read_file(filepath='playlist.txt')"
        );
        assert_eq!(client.respond(&prompt("is the rerun finished?")), HELP_RESPONSE);
    }

    #[test]
    fn rule_based_write_and_commit_quote_values() {
        let client = RuleBasedClient::new();
        let write = client.respond(&prompt("write a hello world script to hello.py"));
        assert!(write.starts_with("write_file(filepath=\"hello.py\", content=\"\"\"print("));
        let commit = client.respond(&prompt("git commit \"add parser\""));
        assert_eq!(commit, "git_commit(message=\"add parser\")");
    }

    #[test]
    fn rule_based_defaults_to_help_text() {
        let client = RuleBasedClient::new();
        assert_eq!(client.respond(&prompt("what is the meaning of this?")), HELP_RESPONSE);
        assert_eq!(client.respond("hello there"), HELP_RESPONSE);
    }

    #[test]
    fn request_line_is_taken_from_last_marker() {
        let text = format!("{USER_REQUEST_MARKER} old\nmore\n{USER_REQUEST_MARKER} \"read a.py\"\nRESPOND:");
        assert_eq!(user_request(&text), "read a.py");
    }

    struct FlakyClient {
        calls: Arc<AtomicUsize>,
        reply: Result<String, String>,
    }

    impl LlmClient for FlakyClient {
        fn generate(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().map_err(|e| anyhow!(e))
        }

        fn is_available(&self) -> bool {
            true
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[test]
    fn fallback_is_sticky_after_primary_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = FallbackClient::new(Box::new(FlakyClient {
            calls: Arc::clone(&calls),
            reply: Err("quota exceeded".to_string()),
        }));
        assert!(!client.is_degraded());
        assert_eq!(client.generate(&prompt("git status")).expect("gen"), "git_status()");
        assert!(client.is_degraded());
        assert_eq!(client.name(), "rule-based");
        client.generate(&prompt("git status")).expect("gen");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let notices = client.drain_notices();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("quota exceeded"));
        assert!(client.drain_notices().is_empty());
    }

    #[test]
    fn fallback_passes_through_and_degrades_on_empty_text() {
        let calls = Arc::new(AtomicUsize::new(0));
        let healthy = FallbackClient::new(Box::new(FlakyClient {
            calls: Arc::clone(&calls),
            reply: Ok("read_file(filepath='x.py')".to_string()),
        }));
        assert_eq!(healthy.generate("anything").expect("gen"), "read_file(filepath='x.py')");
        assert!(!healthy.is_degraded());

        let empty = FallbackClient::new(Box::new(FlakyClient {
            calls,
            reply: Ok("   ".to_string()),
        }));
        assert_eq!(empty.generate("hello").expect("gen"), HELP_RESPONSE);
        assert!(empty.is_degraded());
    }

    #[test]
    fn unavailable_primary_starts_degraded() {
        let client = FallbackClient::from_config(&LlmConfig {
            offline: true,
            ..LlmConfig::default()
        })
        .expect("client");
        assert!(client.is_degraded());
        assert_eq!(client.generate(&prompt("list files")).expect("gen"), "list_files(directory='.')");
    }
}
