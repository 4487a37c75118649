//! Dry-run scripts: one filesystem operation per line.
//!
//! ```text
//! # comment
//! mkdir /sales/invoices
//! touch /sales/invoices/id
//! write /sales/invoices/id COLUMN int NOT NULL\n
//! write /sales/report @report.sql
//! mv /dbo/get_orders /dbo/list_orders
//! truncate /dbo/orders/qty 0
//! ls /sales
//! cat /dbo/get_orders
//! rm /dbo/orders/qty
//! flush
//! stats
//! ```
//!
//! Inline `write` text takes the rest of the line with `\n` and `\t`
//! unescaped; `@file` reads the text from a file relative to the script.

use std::path::Path;

use anyhow::{anyhow, bail, Context};
use serde_json::{json, Value};
use sqlfs_runtime::FsSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Mkdir(String),
    Touch(String),
    Write { path: String, text: String },
    Remove(String),
    Rename { from: String, to: String },
    Truncate { path: String, length: u64 },
    List(String),
    Cat(String),
    Flush,
    Stats,
}

/// A parsed operation and the script line it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub line: usize,
    pub op: Op,
}

/// Parses a script.
///
/// # Arguments
/// * `source` - Script text
/// * `base` - Directory `@file` references are resolved against
pub fn parse(source: &str, base: &Path) -> anyhow::Result<Vec<Step>> {
    let mut steps = Vec::new();
    for (index, raw) in source.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let op = parse_line(trimmed, base).with_context(|| format!("line {}: {}", line, trimmed))?;
        steps.push(Step { line, op });
    }
    Ok(steps)
}

fn parse_line(line: &str, base: &Path) -> anyhow::Result<Op> {
    let (verb, rest) = split_word(line);
    let op = match verb {
        "mkdir" => Op::Mkdir(single(rest)?),
        "touch" => Op::Touch(single(rest)?),
        "rm" => Op::Remove(single(rest)?),
        "ls" => Op::List(if rest.is_empty() { "/".to_string() } else { single(rest)? }),
        "cat" => Op::Cat(single(rest)?),
        "mv" => {
            let (from, to) = split_word(rest);
            Op::Rename {
                from: from.to_string(),
                to: single(to)?,
            }
        }
        "truncate" => {
            let (path, length) = split_word(rest);
            let length = length
                .trim()
                .parse()
                .map_err(|_| anyhow!("invalid length '{}'", length.trim()))?;
            Op::Truncate {
                path: path.to_string(),
                length,
            }
        }
        "write" => {
            let (path, text) = split_word(rest);
            if path.is_empty() {
                bail!("write needs a path");
            }
            let text = match text.strip_prefix('@') {
                Some(file) => {
                    let file = base.join(file.trim());
                    std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?
                }
                None => unescape(text),
            };
            Op::Write {
                path: path.to_string(),
                text,
            }
        }
        "flush" => Op::Flush,
        "stats" => Op::Stats,
        other => bail!("unknown operation '{}'", other),
    };
    Ok(op)
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(at) => (&s[..at], s[at..].trim_start()),
        None => (s, ""),
    }
}

fn single(rest: &str) -> anyhow::Result<String> {
    let (word, extra) = split_word(rest);
    if word.is_empty() {
        bail!("missing path");
    }
    if !extra.is_empty() {
        bail!("unexpected '{}'", extra);
    }
    Ok(word.to_string())
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Runs every step and collects one JSON record per step.
///
/// A failing operation is recorded with its error and the script goes on,
/// the way a mounted filesystem would keep serving after a rejected call.
pub fn run(fs: &FsSession, steps: &[Step]) -> Vec<Value> {
    steps
        .iter()
        .map(|step| match apply(fs, &step.op) {
            Ok(Value::Null) => json!({ "line": step.line, "ok": true }),
            Ok(value) => json!({ "line": step.line, "ok": true, "result": value }),
            Err(e) => {
                tracing::warn!("line {}: {}", step.line, e);
                json!({ "line": step.line, "ok": false, "error": e.to_string() })
            }
        })
        .collect()
}

fn apply(fs: &FsSession, op: &Op) -> anyhow::Result<Value> {
    let value = match op {
        Op::Mkdir(path) => {
            fs.create_dir(path)?;
            Value::Null
        }
        Op::Touch(path) => {
            fs.create_node(path)?;
            Value::Null
        }
        Op::Write { path, text } => {
            fs.write(path, text)?;
            json!({ "pending": fs.pending_commands() })
        }
        Op::Remove(path) => {
            fs.remove(path)?;
            Value::Null
        }
        Op::Rename { from, to } => {
            fs.rename(from, to)?;
            Value::Null
        }
        Op::Truncate { path, length } => {
            fs.truncate(path, *length)?;
            Value::Null
        }
        Op::List(path) => {
            let names: Vec<String> = fs.list(path)?.into_iter().map(|o| o.name).collect();
            json!(names)
        }
        Op::Cat(path) => json!(fs.read(path)?),
        Op::Flush => serde_json::to_value(fs.flush_now()?)?,
        Op::Stats => serde_json::to_value(fs.stats())?,
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlfs_core::{FsConfig, MemoryServer};

    #[test]
    fn parses_every_operation() {
        let script = "\
# setup
mkdir /sales/invoices
touch /sales/invoices/id
write /sales/invoices/id COLUMN int NOT NULL\\n
mv /dbo/a /dbo/b
truncate /dbo/t/c 4
ls
flush
";
        let steps = parse(script, Path::new(".")).unwrap();
        let ops: Vec<Op> = steps.iter().map(|s| s.op.clone()).collect();
        assert_eq!(
            ops,
            vec![
                Op::Mkdir("/sales/invoices".into()),
                Op::Touch("/sales/invoices/id".into()),
                Op::Write {
                    path: "/sales/invoices/id".into(),
                    text: "COLUMN int NOT NULL\n".into(),
                },
                Op::Rename {
                    from: "/dbo/a".into(),
                    to: "/dbo/b".into(),
                },
                Op::Truncate {
                    path: "/dbo/t/c".into(),
                    length: 4,
                },
                Op::List("/".into()),
                Op::Flush,
            ]
        );
        assert_eq!(steps[0].line, 2);
    }

    #[test]
    fn write_reads_text_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.sql"), "CREATE PROCEDURE report AS SELECT 1\n").unwrap();

        let steps = parse("write /dbo/report @report.sql", dir.path()).unwrap();
        assert_eq!(
            steps[0].op,
            Op::Write {
                path: "/dbo/report".into(),
                text: "CREATE PROCEDURE report AS SELECT 1\n".into(),
            }
        );
    }

    #[test]
    fn bad_lines_name_their_position() {
        let err = parse("ls /\nfrobnicate /x", Path::new(".")).unwrap_err();
        assert!(format!("{:#}", err).contains("line 2"));
        assert!(parse("mv /a", Path::new(".")).is_err());
        assert!(parse("truncate /a/b/c x", Path::new(".")).is_err());
    }

    #[test]
    fn failed_steps_are_recorded_and_the_run_continues() {
        let server = MemoryServer::from_toml("[[schemas]]\nname = \"dbo\"\n").unwrap();
        let mut config = FsConfig::default();
        config.dbname = Some("plan".to_string());
        config.deploy_time = 3600;
        let fs = FsSession::with_memory(config, &server).unwrap();

        let steps = parse("mkdir /dbo\nmkdir /sales\nflush", Path::new(".")).unwrap();
        let records = run(&fs, &steps);
        assert_eq!(records[0]["ok"], json!(false));
        assert_eq!(records[1]["ok"], json!(true));
        assert_eq!(records[2]["result"]["statements"], json!(["CREATE SCHEMA [sales]"]));
    }
}
