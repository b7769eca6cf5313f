use anyhow::Result;
use codebuddy_agent::{TurnKind, TurnReport};
use codebuddy_core::AppConfig;
use serde::Serialize;
use serde_json::json;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub(crate) fn redact_config_for_display(cfg: &AppConfig) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(cfg)?;
    if let Some(llm) = value.get_mut("llm").and_then(|entry| entry.as_object_mut())
        && llm.get("api_key").is_some_and(|key| !key.is_null())
    {
        llm.insert("api_key".to_string(), json!("***REDACTED***"));
    }
    Ok(value)
}

pub(crate) fn render_report(report: &TurnReport) -> String {
    let tool_line = report.turn.invocation.as_ref().map(|invocation| {
        let tier = report
            .turn
            .assessment
            .as_ref()
            .map(|a| format!(" [{}]", a.tier))
            .unwrap_or_default();
        format!("> {}{tier}\n", invocation.render())
    });
    let body = match report.kind {
        TurnKind::Conversation => report.response.clone(),
        TurnKind::Clarification => format!("? {}", report.response),
        TurnKind::Cancelled => format!("cancelled: {}", report.response),
        TurnKind::Executed if report.turn.succeeded() => report.response.clone(),
        TurnKind::Executed => format!("error: {}", report.response),
    };
    match (report.kind, tool_line) {
        (TurnKind::Cancelled | TurnKind::Executed, Some(line)) => format!("{line}{body}"),
        _ => body,
    }
}
