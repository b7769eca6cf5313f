use codebuddy_llm::USER_REQUEST_MARKER;
use codebuddy_memory::ConversationMemory;
use codebuddy_tools::ToolDescriptor;

const INSTRUCTIONS: &str = "\
INSTRUCTIONS:
1. If the user wants a coding task done, answer with exactly one tool call in this form: tool_name(param=\"value\", other=\"value\")
2. Use triple quotes for multi-line content: write_file(filepath=\"a.py\", content=\"\"\"...\"\"\")
3. To refer to a file from the recent files list, use its path.
4. If the user is asking a question or chatting, answer in plain text without any tool call.
5. If the request is unclear, ask a short clarifying question.";

const EXAMPLES: &str = "\
EXAMPLES:
- \"show me main.py\" -> read_file(filepath=\"main.py\")
- \"create hello.py\" -> write_file(filepath=\"hello.py\", content=\"\"\"print(\"Hello, World!\")\"\"\")
- \"list files\" -> list_files(directory=\".\")
- \"hello\" -> a short conversational reply";

/// Builds the single-turn prompt: tool signatures, recent actions and
/// files, then the request on its own `USER REQUEST:` line.
pub fn build_prompt(
    request: &str,
    tools: &[ToolDescriptor],
    memory: &ConversationMemory,
    history: usize,
    recent_files: usize,
) -> String {
    let mut out = String::from(
        "You are CodeBuddy, a coding assistant working inside the user's project directory.\n\n",
    );

    out.push_str("AVAILABLE TOOLS:\n");
    for tool in tools {
        out.push_str(&format!("- {}: {}\n", tool.signature, tool.description));
    }

    let actions = memory.recent_actions(history);
    if !actions.is_empty() {
        out.push_str("\nRECENT ACTIONS:\n");
        for action in actions {
            out.push_str(&format!("- {action}\n"));
        }
    }

    let files = memory.recent_files(recent_files);
    if !files.is_empty() {
        out.push_str(&format!("\nRECENT FILES (most recent last): {}\n", files.join(", ")));
    }

    out.push('\n');
    out.push_str(INSTRUCTIONS);
    out.push_str("\n\n");
    out.push_str(EXAMPLES);
    out.push_str("\n\n");
    let single_line = request.split_whitespace().collect::<Vec<_>>().join(" ");
    out.push_str(&format!("{USER_REQUEST_MARKER} \"{single_line}\"\n\n"));
    out.push_str("Respond with either one tool call or a plain conversational answer:");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebuddy_core::{ParamType, ToolSchema, TouchKind};

    fn tools() -> Vec<ToolDescriptor> {
        let schema = ToolSchema::new().required("filepath", ParamType::String, "file");
        vec![ToolDescriptor {
            name: "read_file".to_string(),
            description: "Show a file".to_string(),
            signature: schema.signature("read_file"),
            schema,
        }]
    }

    #[test]
    fn prompt_lists_tools_files_and_request_line() {
        let mut memory = ConversationMemory::new();
        memory.note_touched("a.py", TouchKind::Written);
        memory.note_touched("b.py", TouchKind::Written);

        let prompt = build_prompt("show\nme  it", &tools(), &memory, 5, 1);
        assert!(prompt.contains("- read_file(filepath): Show a file"));
        assert!(prompt.contains("RECENT FILES (most recent last): b.py\n"));
        assert!(prompt.contains("USER REQUEST: \"show me it\"\n"));
        assert!(!prompt.contains("RECENT ACTIONS"));
    }

    #[test]
    fn rule_based_client_reads_request_back() {
        let prompt = build_prompt("list files", &tools(), &ConversationMemory::new(), 5, 10);
        let reply = codebuddy_llm::RuleBasedClient::new().respond(&prompt);
        assert_eq!(reply, "list_files(directory='.')");
    }
}
