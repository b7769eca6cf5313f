use codebuddy_core::{Invocation, PipelineError, TouchKind};
use codebuddy_memory::ConversationMemory;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static ANAPHORA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)^(?:
            it | this | that | same | this\ one | that\ one | the\ same\ one
          | (?:this|that|the\ same)\ (?:file|script|folder|directory)
          | the\ (?:last|latest|previous|most\ recent|new|newest)(?:\ (?:file|one|script|folder|directory))?
          | the\ (?:file|one|script|folder|directory)
              (?:\ (?:that\ )?(?:we|i|you)(?:\ just|\ have\ just|\ have)?)?
              \ (?:just\ )?(?:created|made|wrote|written|edited|modified|updated|touched|used|opened|read)
        )$",
    )
    .expect("valid anaphora regex")
});

static CREATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:created|made|wrote|written|edited|modified|updated|new|newest)\b")
        .expect("valid creation regex")
});

/// Arguments that name files or folders. Other strings, such as file
/// content or commit messages, are taken literally.
pub const PATH_ARGUMENTS: &[&str] = &["filepath", "folderpath", "directory", "files"];

/// What a matched phrase may stand for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// Most recently touched path of any kind.
    AnyRecent,
    /// Most recently written path ("the file we just created").
    Written,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub argument: String,
    pub phrase: String,
    pub path: String,
}

/// Classifies a whole argument value. Surrounding quotes, trailing
/// punctuation, case and repeated spaces are ignored.
pub fn reference_kind(value: &str) -> Option<ReferenceKind> {
    let cleaned = value
        .trim()
        .trim_matches(['"', '\'', '`'])
        .trim_end_matches(['.', '!', '?', ','])
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase();
    if !ANAPHORA.is_match(&cleaned) {
        return None;
    }
    if CREATION.is_match(&cleaned) {
        Some(ReferenceKind::Written)
    } else {
        Some(ReferenceKind::AnyRecent)
    }
}

/// Rewrites every path argument that is wholly an anaphoric phrase into a
/// concrete recent path. Nothing is changed when any phrase fails to resolve.
pub fn resolve_references(
    invocation: &mut Invocation,
    memory: &ConversationMemory,
) -> Result<Vec<Substitution>, PipelineError> {
    let mut substitutions = Vec::new();
    for (argument, value) in &invocation.arguments {
        if !PATH_ARGUMENTS.contains(&argument.as_str()) {
            continue;
        }
        let Value::String(phrase) = value else {
            continue;
        };
        let Some(kind) = reference_kind(phrase) else {
            continue;
        };
        let entry = match kind {
            ReferenceKind::AnyRecent => memory.most_recent(None),
            ReferenceKind::Written => memory.most_recent(Some(TouchKind::Written)),
        };
        let Some(entry) = entry else {
            let detail = match kind {
                ReferenceKind::AnyRecent => "no file has been touched in this session",
                ReferenceKind::Written => "no file has been created or edited in this session",
            };
            return Err(PipelineError::AmbiguousReference {
                argument: argument.clone(),
                phrase: phrase.clone(),
                detail: detail.to_string(),
            });
        };
        substitutions.push(Substitution {
            argument: argument.clone(),
            phrase: phrase.clone(),
            path: entry.path.clone(),
        });
    }
    for sub in &substitutions {
        invocation
            .arguments
            .insert(sub.argument.clone(), Value::String(sub.path.clone()));
    }
    Ok(substitutions)
}
