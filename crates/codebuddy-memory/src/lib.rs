use anyhow::Result;
use chrono::{DateTime, Utc};
use codebuddy_core::{ConversationTurn, TouchKind, runtime_dir};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Hard cap on the recent-files list.
pub const MAX_RECENT_FILES: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Markdown => "md",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentFile {
    pub path: String,
    pub kind: TouchKind,
    pub touched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub turns: usize,
    pub tool_turns: usize,
    pub successful_turns: usize,
    pub distinct_files: usize,
}

/// Session-scoped log of turns plus the bounded recent-files list used for
/// reference resolution. Most recent entries are last in both.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: Vec<ConversationTurn>,
    recent: VecDeque<RecentFile>,
    capacity: usize,
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::with_capacity(MAX_RECENT_FILES)
    }

    /// `capacity` is clamped to `1..=MAX_RECENT_FILES`.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_RECENT_FILES);
        Self {
            turns: Vec::new(),
            recent: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Re-touching a path moves it to the end and updates its kind.
    pub fn note_touched(&mut self, path: &str, kind: TouchKind) {
        let path = normalize_path(path);
        if path.is_empty() {
            return;
        }
        self.recent.retain(|entry| entry.path != path);
        self.recent.push_back(RecentFile {
            path,
            kind,
            touched_at: Utc::now(),
        });
        while self.recent.len() > self.capacity {
            self.recent.pop_front();
        }
    }

    /// The last `limit` distinct paths, most recent last.
    pub fn recent_files(&self, limit: usize) -> Vec<String> {
        let skip = self.recent.len().saturating_sub(limit);
        self.recent
            .iter()
            .skip(skip)
            .map(|entry| entry.path.clone())
            .collect()
    }

    pub fn recent_entries(&self) -> impl DoubleEndedIterator<Item = &RecentFile> {
        self.recent.iter()
    }

    /// Most recent entry, optionally restricted to one kind of touch.
    pub fn most_recent(&self, kind: Option<TouchKind>) -> Option<&RecentFile> {
        self.recent
            .iter()
            .rev()
            .find(|entry| kind.is_none_or(|k| entry.kind == k))
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn last_turn(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.recent.is_empty()
    }

    /// One-line summaries of the last `n` turns, oldest first.
    pub fn recent_actions(&self, n: usize) -> Vec<String> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).map(summarize_turn).collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.recent.clear();
    }

    pub fn stats(&self) -> MemoryStats {
        let mut files = BTreeSet::new();
        for turn in &self.turns {
            if let Some(outcome) = &turn.outcome {
                files.extend(outcome.touched_paths.iter().cloned());
            }
        }
        files.extend(self.recent.iter().map(|entry| entry.path.clone()));
        MemoryStats {
            turns: self.turns.len(),
            tool_turns: self.turns.iter().filter(|t| t.invocation.is_some()).count(),
            successful_turns: self.turns.iter().filter(|t| t.succeeded()).count(),
            distinct_files: files.len(),
        }
    }

    pub fn render_transcript(&self, format: &ExportFormat) -> Result<String> {
        Ok(match format {
            ExportFormat::Json => {
                let records = self
                    .turns
                    .iter()
                    .map(ConversationTurn::audit_record)
                    .collect::<Vec<_>>();
                serde_json::to_string_pretty(&records)?
            }
            ExportFormat::Markdown => {
                let mut md = String::from("# CodeBuddy Session Transcript\n\n");
                for turn in &self.turns {
                    md.push_str(&format!(
                        "## {}\n\n**You:** {}\n\n",
                        turn.timestamp.to_rfc3339(),
                        turn.user_input.trim()
                    ));
                    if let Some(invocation) = &turn.invocation {
                        md.push_str(&format!("**Tool:** `{}`\n\n", invocation.render()));
                    }
                    if let Some(assessment) = &turn.assessment {
                        md.push_str(&format!("**Risk:** {}\n\n", assessment.tier));
                    }
                    md.push_str(&format!("**CodeBuddy:** {}\n\n", turn.response.trim()));
                }
                md
            }
        })
    }

    /// Writes the transcript under `.codebuddy/exports/` unless `output`
    /// names a destination. Returns the written path.
    pub fn export_transcript(
        &self,
        workspace: &Path,
        format: ExportFormat,
        output: Option<&Path>,
    ) -> Result<PathBuf> {
        let out_path = output.map(Path::to_path_buf).unwrap_or_else(|| {
            runtime_dir(workspace)
                .join("exports")
                .join(format!("{}.{}", Uuid::now_v7(), format.as_str()))
        });
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&out_path, self.render_transcript(&format)?)?;
        Ok(out_path)
    }
}

fn normalize_path(path: &str) -> String {
    let mut trimmed = path.trim();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }
    trimmed.to_string()
}

fn summarize_turn(turn: &ConversationTurn) -> String {
    let time = turn.timestamp.format("%H:%M:%S");
    let Some(invocation) = &turn.invocation else {
        return format!("[{time}] chat: {}", truncate_line(&turn.user_input, 80));
    };
    let status = match &turn.outcome {
        Some(outcome) if outcome.success => "ok".to_string(),
        Some(outcome) => format!("failed: {}", truncate_line(&outcome.message, 60)),
        None => "not run".to_string(),
    };
    format!("[{time}] {} -> {status}", invocation.render())
}

fn truncate_line(input: &str, max_chars: usize) -> String {
    let mut out = input.trim().replace('\n', " ");
    if out.chars().count() <= max_chars {
        return out;
    }
    out = out.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebuddy_core::{Arguments, Invocation, ToolOutcome};
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn tool_turn(input: &str, tool: &str, path: &str, success: bool) -> ConversationTurn {
        let mut args = Arguments::new();
        args.insert("filepath".to_string(), json!(path));
        let mut outcome = if success {
            ToolOutcome::ok(format!("{tool} done"))
        } else {
            ToolOutcome::failure("permission denied")
        };
        if success {
            outcome.touched_paths.insert(path.to_string());
        }
        let mut turn = ConversationTurn::new(input);
        turn.invocation = Some(Invocation::new(tool, args));
        turn.outcome = Some(outcome);
        turn
    }

    proptest! {
        #[test]
        fn recent_files_is_bounded_and_unique(
            paths in prop::collection::vec("[a-e]{1,2}\\.txt", 0..60),
            limit in 0usize..20,
        ) {
            let mut memory = ConversationMemory::new();
            for path in &paths {
                memory.note_touched(path, TouchKind::Written);
            }
            let recent = memory.recent_files(limit);
            prop_assert!(recent.len() <= MAX_RECENT_FILES);
            prop_assert!(recent.len() <= limit);
            let unique: HashSet<_> = recent.iter().collect();
            prop_assert_eq!(unique.len(), recent.len());
            if let (Some(last), Some(expected)) = (recent.last(), paths.last()) {
                prop_assert_eq!(last, expected);
            }
        }
    }

    #[test]
    fn retouching_moves_path_to_end_and_updates_kind() {
        let mut memory = ConversationMemory::new();
        memory.note_touched("a.py", TouchKind::Written);
        memory.note_touched("b.py", TouchKind::Written);
        memory.note_touched("./a.py", TouchKind::Deleted);
        assert_eq!(memory.recent_files(10), vec!["b.py", "a.py"]);
        assert_eq!(
            memory.most_recent(None).map(|e| e.kind),
            Some(TouchKind::Deleted)
        );
        assert_eq!(
            memory
                .most_recent(Some(TouchKind::Written))
                .map(|e| e.path.as_str()),
            Some("b.py")
        );
    }

    #[test]
    fn oldest_entries_fall_off_at_capacity() {
        let mut memory = ConversationMemory::with_capacity(3);
        for name in ["a", "b", "c", "d"] {
            memory.note_touched(name, TouchKind::Written);
        }
        assert_eq!(memory.recent_files(10), vec!["b", "c", "d"]);
        assert_eq!(memory.recent_files(2), vec!["c", "d"]);
        assert_eq!(ConversationMemory::with_capacity(50).capacity, MAX_RECENT_FILES);
    }

    #[test]
    fn stats_and_clear() {
        let mut memory = ConversationMemory::new();
        memory.record(ConversationTurn::new("hello"));
        memory.record(tool_turn("make a.py", "write_file", "a.py", true));
        memory.record(tool_turn("delete b.py", "delete_file", "b.py", false));
        memory.note_touched("a.py", TouchKind::Written);

        let stats = memory.stats();
        assert_eq!(stats.turns, 3);
        assert_eq!(stats.tool_turns, 2);
        assert_eq!(stats.successful_turns, 1);
        assert_eq!(stats.distinct_files, 1);
        assert_eq!(
            memory.last_turn().map(|t| t.user_input.as_str()),
            Some("delete b.py")
        );

        memory.clear();
        assert!(memory.is_empty());
        assert!(memory.recent_files(10).is_empty());
        assert_eq!(memory.stats().turns, 0);
    }

    #[test]
    fn recent_actions_summarize_latest_turns() {
        let mut memory = ConversationMemory::new();
        memory.record(ConversationTurn::new("what is this repo?"));
        memory.record(tool_turn("make a.py", "write_file", "a.py", true));
        memory.record(tool_turn("delete b.py", "delete_file", "b.py", false));

        let actions = memory.recent_actions(2);
        assert_eq!(actions.len(), 2);
        assert!(actions[0].ends_with("write_file(filepath='a.py') -> ok"));
        assert!(actions[1].ends_with("-> failed: permission denied"));
        assert!(memory.recent_actions(10)[0].contains("chat: what is this repo?"));
    }

    #[test]
    fn export_transcript_writes_json_and_markdown() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let mut memory = ConversationMemory::new();
        let mut turn = tool_turn("make a.py", "write_file", "a.py", true);
        turn.response = "Created a.py".to_string();
        memory.record(turn);

        let json_path = memory
            .export_transcript(workspace.path(), ExportFormat::Json, None)
            .expect("json export");
        assert!(json_path.starts_with(runtime_dir(workspace.path()).join("exports")));
        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&json_path).expect("read")).expect("parse");
        assert_eq!(parsed[0]["tool_name"], "write_file");

        let md_path = workspace.path().join("out/transcript.md");
        memory
            .export_transcript(workspace.path(), ExportFormat::Markdown, Some(&md_path))
            .expect("md export");
        let md = fs::read_to_string(md_path).expect("read md");
        assert!(md.contains("**You:** make a.py"));
        assert!(md.contains("**Tool:** `write_file(filepath='a.py')`"));
        assert!(md.contains("**CodeBuddy:** Created a.py"));
    }

    #[test]
    fn export_format_parse() {
        assert!(matches!(ExportFormat::parse("MD"), Some(ExportFormat::Markdown)));
        assert!(matches!(ExportFormat::parse(" json "), Some(ExportFormat::Json)));
        assert!(ExportFormat::parse("yaml").is_none());
    }
}
