use anyhow::Result;
use chrono::Utc;
use codebuddy_core::{AuditRecord, TelemetryConfig, runtime_dir};
use reqwest::blocking::Client;
use serde_json::json;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct Observer {
    log_path: PathBuf,
    audit_path: Option<PathBuf>,
    telemetry: Option<TelemetrySink>,
    verbose: bool,
}

struct TelemetrySink {
    endpoint: String,
    client: Client,
}

impl Observer {
    pub fn new(workspace: &Path, telemetry_cfg: &TelemetryConfig) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        let telemetry = telemetry_sink(telemetry_cfg)?;
        Ok(Self {
            log_path: dir.join("observe.log"),
            audit_path: Some(dir.join("audit.jsonl")),
            telemetry,
            verbose: false,
        })
    }

    /// Turns off the JSON Lines audit trail; the plain log is kept.
    pub fn without_audit(mut self) -> Self {
        self.audit_path = None;
        self
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn audit_path(&self) -> Option<&Path> {
        self.audit_path.as_deref()
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Always lands in the log file; echoed to stderr with a `[codebuddy]`
    /// prefix when verbose mode is on.
    pub fn verbose_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[codebuddy] {msg}");
        }
        let _ = self.append_log_line(&format!("{} DEBUG {msg}", Utc::now().to_rfc3339()));
    }

    pub fn warn_log(&self, msg: &str) {
        eprintln!("[codebuddy WARN] {msg}");
        let _ = self.append_log_line(&format!("{} WARN {msg}", Utc::now().to_rfc3339()));
    }

    /// Appends one audit line and a summary log line. The record is written
    /// as given; callers redact secrets first.
    pub fn record_turn(&self, record: &AuditRecord) -> Result<()> {
        let tool = record.tool_name.as_deref().unwrap_or("-");
        let tier = record.tier.map(|t| t.label()).unwrap_or("-");
        self.append_log_line(&format!(
            "{} TURN {} tool={tool} tier={tier} approved={} success={}",
            Utc::now().to_rfc3339(),
            record.turn_id,
            flag(record.approved),
            flag(record.success),
        ))?;
        if let Some(path) = &self.audit_path {
            append_line(path, &serde_json::to_string(record)?)?;
        }
        self.emit_telemetry(
            "turn.recorded",
            json!({
                "turn_id": record.turn_id,
                "tool_name": record.tool_name,
                "tier": record.tier,
                "approved": record.approved,
                "success": record.success,
            }),
        )
    }

    fn append_log_line(&self, line: &str) -> Result<()> {
        append_line(&self.log_path, line)
    }

    fn emit_telemetry(&self, name: &str, payload: serde_json::Value) -> Result<()> {
        let Some(sink) = &self.telemetry else {
            return Ok(());
        };

        let body = json!({
            "name": name,
            "at": Utc::now().to_rfc3339(),
            "payload": payload,
        });

        // Fire-and-forget: the POST may take up to the 3 s client timeout.
        let client = sink.client.clone();
        let endpoint = sink.endpoint.clone();
        let log_path = self.log_path.clone();
        std::thread::spawn(move || {
            if let Err(err) = client.post(&endpoint).json(&body).send() {
                let line = format!("{} TELEMETRY_ERROR error={err}", Utc::now().to_rfc3339());
                let _ = append_line(&log_path, &line);
            }
        });
        Ok(())
    }
}

fn flag(value: Option<bool>) -> &'static str {
    match value {
        Some(true) => "yes",
        Some(false) => "no",
        None => "-",
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{line}")?;
    Ok(())
}

fn telemetry_sink(cfg: &TelemetryConfig) -> Result<Option<TelemetrySink>> {
    if !cfg.enabled {
        return Ok(None);
    }
    let Some(endpoint) = cfg.endpoint.clone() else {
        return Ok(None);
    };
    let client = Client::builder().timeout(Duration::from_secs(3)).build()?;
    Ok(Some(TelemetrySink { endpoint, client }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebuddy_core::{ConversationTurn, Invocation, RiskAssessment, RiskTier};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use uuid::Uuid;

    fn workspace() -> PathBuf {
        let workspace =
            std::env::temp_dir().join(format!("codebuddy-observe-test-{}", Uuid::now_v7()));
        fs::create_dir_all(&workspace).expect("create workspace");
        workspace
    }

    fn sample_record() -> AuditRecord {
        let mut turn = ConversationTurn::new("show me main.py");
        let mut args = codebuddy_core::Arguments::new();
        args.insert("filepath".to_string(), json!("main.py"));
        turn.invocation = Some(Invocation::new("read_file", args));
        turn.assessment = Some(RiskAssessment::new(
            RiskTier::Safe,
            vec!["read-only operation".to_string()],
        ));
        turn.audit_record()
    }

    #[test]
    fn record_turn_appends_json_lines() {
        let workspace = workspace();
        let observer = Observer::new(&workspace, &TelemetryConfig::default()).expect("observer");
        observer.record_turn(&sample_record()).expect("record");
        observer.record_turn(&sample_record()).expect("record");

        let audit = fs::read_to_string(runtime_dir(&workspace).join("audit.jsonl")).expect("audit");
        let lines: Vec<&str> = audit.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AuditRecord = serde_json::from_str(lines[0]).expect("parse audit line");
        assert_eq!(parsed.tool_name.as_deref(), Some("read_file"));
        assert_eq!(parsed.tier, Some(RiskTier::Safe));

        let log = fs::read_to_string(observer.log_path()).expect("log");
        assert!(log.contains("TURN"));
        assert!(log.contains("tool=read_file tier=SAFE"));
    }

    #[test]
    fn audit_can_be_disabled_and_warnings_are_logged() {
        let workspace = workspace();
        let observer = Observer::new(&workspace, &TelemetryConfig::default())
            .expect("observer")
            .without_audit();
        observer.record_turn(&sample_record()).expect("record");
        observer.warn_log("model unavailable");
        assert!(observer.audit_path().is_none());
        assert!(!runtime_dir(&workspace).join("audit.jsonl").exists());
        let log = fs::read_to_string(observer.log_path()).expect("log");
        assert!(log.contains("WARN model unavailable"));
    }

    #[test]
    fn verbose_flag_toggles() {
        let workspace = workspace();
        let mut observer = Observer::new(&workspace, &TelemetryConfig::default()).expect("observer");
        assert!(!observer.is_verbose());
        observer.set_verbose(true);
        assert!(observer.is_verbose());
        observer.verbose_log("extracted 1 candidate");
        let log = fs::read_to_string(observer.log_path()).expect("log");
        assert!(log.contains("DEBUG extracted 1 candidate"));
    }

    #[test]
    fn telemetry_posts_when_enabled() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut buf = vec![0_u8; 8192];
            let n = stream.read(&mut buf).expect("read request");
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let _ = stream.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK");
            request
        });

        let workspace = workspace();
        let observer = Observer::new(
            &workspace,
            &TelemetryConfig {
                enabled: true,
                endpoint: Some(format!("http://{addr}/collect")),
            },
        )
        .expect("observer");
        observer.record_turn(&sample_record()).expect("record");
        let request = server.join().expect("join server");
        assert!(request.contains("POST /collect"));
    }

    #[test]
    fn telemetry_disabled_does_not_require_endpoint() {
        let workspace = workspace();
        let observer = Observer::new(
            &workspace,
            &TelemetryConfig {
                enabled: true,
                endpoint: None,
            },
        )
        .expect("observer");
        observer.record_turn(&sample_record()).expect("record");
    }
}
