use super::{flag, opt_str, str_arg};
use crate::ToolContext;
use anyhow::{Result, anyhow, bail};
use codebuddy_core::Arguments;
use ignore::WalkBuilder;
use std::fs;
use std::path::Path;

const READ_MAX_BYTES: u64 = 1_000_000;
const READ_PREVIEW_LINES: usize = 100;
const LIST_MAX_ENTRIES: usize = 500;

pub(super) fn read_file(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let path = str_arg(args, "filepath")?;
    let full = ctx.resolve(path);
    if !full.is_file() {
        bail!("file not found: {path}");
    }
    let size = fs::metadata(&full)?.len();
    if size > READ_MAX_BYTES {
        bail!("{path} is too large to show ({size} bytes, limit {READ_MAX_BYTES})");
    }
    let bytes = fs::read(&full)?;
    if is_binary(&bytes) {
        return Ok(format!("{path} is a binary file ({size} bytes)"));
    }
    let content = String::from_utf8_lossy(&bytes);
    let total = content.lines().count();
    let mut out = format!("{path} ({total} lines, {size} bytes)\n");
    for (idx, line) in content.lines().take(READ_PREVIEW_LINES).enumerate() {
        out.push_str(&format!("{:>4} | {line}\n", idx + 1));
    }
    if total > READ_PREVIEW_LINES {
        out.push_str(&format!("... ({} more lines)\n", total - READ_PREVIEW_LINES));
    }
    Ok(out.trim_end().to_string())
}

pub(super) fn write_file(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let path = str_arg(args, "filepath")?;
    let content = args
        .get("content")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("content missing"))?;
    let full = ctx.resolve(path);
    if full.is_dir() {
        bail!("{path} is a directory");
    }
    let existed = full.exists();
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&full, content)?;
    let verb = if existed { "Updated" } else { "Created" };
    Ok(format!("{verb} {path} ({} bytes)", content.len()))
}

pub(super) fn delete_file(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let path = str_arg(args, "filepath")?;
    let full = ctx.resolve(path);
    if full.is_dir() {
        bail!("{path} is a directory; use delete_folder");
    }
    if !full.exists() {
        bail!("file not found: {path}");
    }
    fs::remove_file(&full)?;
    Ok(format!("Deleted {path}"))
}

pub(super) fn list_files(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let dir = opt_str(args, "directory").unwrap_or(".");
    let root = ctx.resolve(dir);
    if !root.is_dir() {
        bail!("directory not found: {dir}");
    }
    let mut builder = WalkBuilder::new(&root);
    builder
        .hidden(false)
        .follow_links(false)
        .require_git(false)
        .filter_entry(|entry| !is_runtime_noise(entry.path()));
    if !flag(args, "recursive") {
        builder.max_depth(Some(1));
    }

    let mut entries = Vec::new();
    for entry in builder.build().flatten() {
        let Ok(rel) = entry.path().strip_prefix(&root) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let mut name = rel.to_string_lossy().replace('\\', "/");
        if entry.file_type().is_some_and(|t| t.is_dir()) {
            name.push('/');
        }
        entries.push(name);
    }
    entries.sort();

    if entries.is_empty() {
        return Ok(format!("{dir} is empty"));
    }
    let total = entries.len();
    let mut out = format!("{dir} ({total} entries)\n");
    for name in entries.iter().take(LIST_MAX_ENTRIES) {
        out.push_str(&format!("  {name}\n"));
    }
    if total > LIST_MAX_ENTRIES {
        out.push_str(&format!("  ... ({} more)\n", total - LIST_MAX_ENTRIES));
    }
    Ok(out.trim_end().to_string())
}

pub(super) fn create_folder(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let path = str_arg(args, "folderpath")?;
    let full = ctx.resolve(path);
    if full.is_dir() {
        return Ok(format!("Folder {path} already exists"));
    }
    if full.exists() {
        bail!("{path} exists and is not a directory");
    }
    fs::create_dir_all(&full)?;
    Ok(format!("Created folder {path}"))
}

pub(super) fn delete_folder(ctx: &ToolContext, args: &Arguments) -> Result<String> {
    let path = str_arg(args, "folderpath")?;
    let full = ctx.resolve(path);
    if !full.is_dir() {
        bail!("folder not found: {path}");
    }
    if full == ctx.workspace || fs::canonicalize(&full).ok() == fs::canonicalize(&ctx.workspace).ok() {
        bail!("refusing to delete the workspace root");
    }
    fs::remove_dir_all(&full)?;
    Ok(format!("Deleted folder {path}"))
}

fn is_runtime_noise(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name == ".git" || name == ".codebuddy")
}

fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|b| *b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebuddy_core::AgentConfig;
    use serde_json::json;

    fn ctx() -> (tempfile::TempDir, ToolContext) {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = ToolContext::new(dir.path(), &AgentConfig::default());
        (dir, ctx)
    }

    fn args(value: serde_json::Value) -> Arguments {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn read_file_numbers_lines_and_truncates_preview() {
        let (dir, ctx) = ctx();
        let body = (1..=120).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        fs::write(dir.path().join("long.txt"), body).expect("seed");

        let out = read_file(&ctx, &args(json!({"filepath": "long.txt"}))).expect("read");
        assert!(out.starts_with("long.txt (120 lines"));
        assert!(out.contains("   1 | line 1\n"));
        assert!(out.contains(" 100 | line 100"));
        assert!(!out.contains("line 101"));
        assert!(out.ends_with("... (20 more lines)"));
    }

    #[test]
    fn read_file_rejects_missing_and_reports_binary() {
        let (dir, ctx) = ctx();
        let err = read_file(&ctx, &args(json!({"filepath": "nope.txt"}))).expect_err("missing");
        assert_eq!(err.to_string(), "file not found: nope.txt");

        fs::write(dir.path().join("blob.bin"), [0u8, 1, 2, 3]).expect("seed");
        let out = read_file(&ctx, &args(json!({"filepath": "blob.bin"}))).expect("read");
        assert_eq!(out, "blob.bin is a binary file (4 bytes)");
    }

    #[test]
    fn write_then_delete_file() {
        let (dir, ctx) = ctx();
        let created = write_file(&ctx, &args(json!({"filepath": "pkg/a.py", "content": "x = 1\n"})))
            .expect("write");
        assert_eq!(created, "Created pkg/a.py (6 bytes)");
        let updated = write_file(&ctx, &args(json!({"filepath": "pkg/a.py", "content": "x = 2\n"})))
            .expect("write");
        assert!(updated.starts_with("Updated"));
        assert_eq!(
            fs::read_to_string(dir.path().join("pkg/a.py")).expect("read"),
            "x = 2\n"
        );

        delete_file(&ctx, &args(json!({"filepath": "pkg/a.py"}))).expect("delete");
        assert!(!dir.path().join("pkg/a.py").exists());
        assert!(delete_file(&ctx, &args(json!({"filepath": "pkg"}))).is_err());
    }

    #[test]
    fn list_files_marks_dirs_and_skips_runtime_dirs() {
        let (dir, ctx) = ctx();
        fs::create_dir_all(dir.path().join("src/nested")).expect("src");
        fs::create_dir_all(dir.path().join(".codebuddy")).expect("runtime");
        fs::write(dir.path().join("src/nested/deep.rs"), "").expect("deep");
        fs::write(dir.path().join("README.md"), "hi").expect("readme");

        let flat = list_files(&ctx, &args(json!({"directory": "."}))).expect("list");
        assert!(flat.contains("  README.md"));
        assert!(flat.contains("  src/"));
        assert!(!flat.contains("deep.rs"));
        assert!(!flat.contains(".codebuddy"));

        let deep = list_files(&ctx, &args(json!({"directory": "src", "recursive": true}))).expect("list");
        assert!(deep.contains("  nested/deep.rs"));
    }

    #[test]
    fn folder_lifecycle_and_root_guard() {
        let (dir, ctx) = ctx();
        assert_eq!(
            create_folder(&ctx, &args(json!({"folderpath": "a/b"}))).expect("create"),
            "Created folder a/b"
        );
        assert!(dir.path().join("a/b").is_dir());
        assert!(
            create_folder(&ctx, &args(json!({"folderpath": "a/b"})))
                .expect("again")
                .contains("already exists")
        );
        delete_folder(&ctx, &args(json!({"folderpath": "a"}))).expect("delete");
        assert!(!dir.path().join("a").exists());

        let err = delete_folder(&ctx, &args(json!({"folderpath": "."}))).expect_err("root");
        assert!(err.to_string().contains("workspace root"));
    }
}
