//! Statement classification for written file texts.
//!
//! A [`Classifier`] decides what a text buffer defines (column, constraint,
//! index, foreign key or stored module) and where its clauses start, so the
//! DDL generator can splice the object's own name and scope around the body.

use std::ops::Range;

use crate::object::ObjectKind;

/// Spans inside a stored module definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpans {
    /// Leading `CREATE`, `ALTER` or `CREATE OR ALTER`
    pub keyword: Range<usize>,
    /// Object name after the module keyword
    pub name: Range<usize>,
    /// Triggers only: the table name after `ON`
    pub target: Option<Range<usize>>,
}

/// Result of classifying one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ObjectKind,
    /// Clause remainder that follows the fragment's header
    pub body: Range<usize>,
    pub module: Option<ModuleSpans>,
    /// Column declares `IDENTITY`
    pub identity: bool,
    /// `WITH NOCHECK`
    pub disabled: bool,
    pub not_for_replication: bool,
    /// `UNIQUE` index
    pub unique: bool,
}

impl Classification {
    fn new(kind: ObjectKind, body: Range<usize>) -> Self {
        Self {
            kind,
            body,
            module: None,
            identity: false,
            disabled: false,
            not_for_replication: false,
            unique: false,
        }
    }

    /// Body text with surrounding whitespace removed.
    pub fn body_text<'a>(&self, text: &'a str) -> &'a str {
        text[self.body.clone()].trim()
    }
}

/// Decides the kind and clause layout of a written text.
pub trait Classifier: Send + Sync {
    /// # Returns
    /// The classification, or a human readable reason the text was rejected.
    fn classify(&self, text: &str) -> Result<Classification, String>;
}

/// Keyword-driven classifier for the file formats the catalog emits.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordClassifier;

impl Classifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Result<Classification, String> {
        let mut scanner = Scanner::new(text);
        scanner.skip_trivia();
        if scanner.at_end() {
            return Err("empty definition".into());
        }

        if scanner.eat_keyword("COLUMN") {
            let body = scanner.rest();
            let mut result = Classification::new(ObjectKind::Column, body.clone());
            result.identity = contains_word(&text[body.clone()], "IDENTITY");
            result.not_for_replication = contains_phrase(&text[body], &["NOT", "FOR", "REPLICATION"]);
            return Ok(result);
        }

        let mut disabled = None;
        if scanner.eat_keyword("WITH") {
            if scanner.eat_keyword("CHECK") {
                disabled = Some(false);
            } else if scanner.eat_keyword("NOCHECK") {
                disabled = Some(true);
            } else {
                return Err("expected CHECK or NOCHECK after WITH".into());
            }
        }

        if scanner.eat_keyword("CONSTRAINT") {
            return classify_constraint(&mut scanner, disabled.unwrap_or(false));
        }
        if disabled.is_some() {
            return Err("expected CONSTRAINT after check option".into());
        }

        let checkpoint = scanner.pos;
        let unique = scanner.eat_keyword("UNIQUE");
        let _ = scanner.eat_keyword("CLUSTERED") || scanner.eat_keyword("NONCLUSTERED");
        if scanner.eat_keyword("INDEX") {
            if !scanner.peek_keyword("ON") && scanner.qualified_name().is_none() {
                return Err("expected index name or ON".into());
            }
            if !scanner.eat_keyword("ON") {
                return Err("expected ON after INDEX".into());
            }
            if scanner.qualified_name().is_none() {
                return Err("expected table after ON".into());
            }
            let mut result = Classification::new(ObjectKind::Index, scanner.rest());
            result.unique = unique;
            return Ok(result);
        }
        scanner.pos = checkpoint;

        classify_module(&mut scanner)
    }
}

fn classify_constraint(scanner: &mut Scanner<'_>, disabled: bool) -> Result<Classification, String> {
    const HEADS: [&str; 5] = ["CHECK", "DEFAULT", "PRIMARY", "UNIQUE", "FOREIGN"];
    // Optional constraint name; the file name wins anyway.
    if !HEADS.iter().any(|kw| scanner.peek_keyword(kw)) && scanner.qualified_name().is_none() {
        return Err("expected constraint type".into());
    }

    if scanner.eat_keyword("CHECK") {
        let not_for_replication = scanner.eat_sequence(&["NOT", "FOR", "REPLICATION"]);
        let mut result = Classification::new(ObjectKind::CheckConstraint, scanner.rest());
        result.disabled = disabled;
        result.not_for_replication = not_for_replication;
        return Ok(result);
    }
    if scanner.eat_keyword("DEFAULT") {
        return Ok(Classification::new(ObjectKind::DefaultConstraint, scanner.rest()));
    }
    if scanner.eat_sequence(&["PRIMARY", "KEY"]) {
        return Ok(Classification::new(ObjectKind::PrimaryKey, scanner.rest()));
    }
    if scanner.eat_keyword("UNIQUE") {
        let mut result = Classification::new(ObjectKind::Unique, scanner.rest());
        result.unique = true;
        return Ok(result);
    }
    if scanner.eat_sequence(&["FOREIGN", "KEY"]) {
        let body = scanner.rest();
        let mut result = Classification::new(ObjectKind::ForeignKey, body.clone());
        result.disabled = disabled;
        result.not_for_replication =
            contains_phrase(&scanner.text[body], &["NOT", "FOR", "REPLICATION"]);
        return Ok(result);
    }
    Err("unknown constraint type".into())
}

fn classify_module(scanner: &mut Scanner<'_>) -> Result<Classification, String> {
    let start = scanner.pos;
    if !(scanner.eat_keyword("CREATE") || scanner.eat_keyword("ALTER")) {
        return Err("unrecognized definition".into());
    }
    let _ = scanner.eat_sequence(&["OR", "ALTER"]);
    let keyword = start..scanner.last_end;

    let kind = if scanner.eat_keyword("PROCEDURE") || scanner.eat_keyword("PROC") {
        ObjectKind::Procedure
    } else if scanner.eat_keyword("FUNCTION") {
        ObjectKind::Function
    } else if scanner.eat_keyword("TRIGGER") {
        ObjectKind::Trigger
    } else {
        return Err("only procedures, functions and triggers can be written".into());
    };

    let name = scanner
        .qualified_name()
        .ok_or_else(|| "expected module name".to_string())?;

    let target = if kind == ObjectKind::Trigger {
        if !scanner.eat_keyword("ON") {
            return Err("expected ON after trigger name".into());
        }
        Some(
            scanner
                .qualified_name()
                .ok_or_else(|| "expected trigger table".to_string())?,
        )
    } else {
        None
    };

    let body = scanner.last_end..scanner.text.len();
    let mut result = Classification::new(kind, body);
    result.module = Some(ModuleSpans {
        keyword,
        name,
        target,
    });
    Ok(result)
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !is_word_char(c)).filter(|w| !w.is_empty())
}

fn contains_word(text: &str, word: &str) -> bool {
    words(text).any(|w| w.eq_ignore_ascii_case(word))
}

fn contains_phrase(text: &str, phrase: &[&str]) -> bool {
    let all: Vec<&str> = words(text).collect();
    all.windows(phrase.len()).any(|window| {
        window
            .iter()
            .zip(phrase)
            .all(|(w, p)| w.eq_ignore_ascii_case(p))
    })
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '#' | '@' | '$')
}

/// Cursor over T-SQL text that skips whitespace and comments.
pub(crate) struct Scanner<'a> {
    pub(crate) text: &'a str,
    pub(crate) pos: usize,
    /// End of the last consumed token
    pub(crate) last_end: usize,
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            last_end: 0,
        }
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn remaining(&self) -> &'a str {
        &self.text[self.pos..]
    }

    pub(crate) fn skip_trivia(&mut self) {
        loop {
            let rest = self.remaining();
            let trimmed = rest.trim_start();
            self.pos += rest.len() - trimmed.len();
            if trimmed.starts_with("--") {
                self.pos += trimmed.find('\n').unwrap_or(trimmed.len());
            } else if trimmed.starts_with("/*") {
                self.pos += trimmed.find("*/").map_or(trimmed.len(), |i| i + 2);
            } else {
                break;
            }
        }
    }

    fn word_at_cursor(&mut self) -> Option<Range<usize>> {
        self.skip_trivia();
        let len: usize = self
            .remaining()
            .chars()
            .take_while(|&c| is_word_char(c))
            .map(char::len_utf8)
            .sum();
        (len > 0).then(|| self.pos..self.pos + len)
    }

    pub(crate) fn peek_keyword(&mut self, keyword: &str) -> bool {
        self.word_at_cursor()
            .is_some_and(|range| self.text[range].eq_ignore_ascii_case(keyword))
    }

    pub(crate) fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.word_at_cursor() {
            Some(range) if self.text[range.clone()].eq_ignore_ascii_case(keyword) => {
                self.pos = range.end;
                self.last_end = range.end;
                true
            }
            _ => false,
        }
    }

    /// Consumes all keywords or none.
    pub(crate) fn eat_sequence(&mut self, keywords: &[&str]) -> bool {
        let (pos, last_end) = (self.pos, self.last_end);
        if keywords.iter().all(|kw| self.eat_keyword(kw)) {
            return true;
        }
        self.pos = pos;
        self.last_end = last_end;
        false
    }

    /// One identifier part: `[bracketed]`, `"quoted"` or a bare word.
    fn identifier(&mut self) -> Option<Range<usize>> {
        let rest = self.remaining();
        let start = self.pos;
        let len = if let Some(inner) = rest.strip_prefix('[') {
            let mut idx = 0;
            let bytes = inner.as_bytes();
            loop {
                match bytes.get(idx) {
                    None => return None,
                    Some(b']') if bytes.get(idx + 1) == Some(&b']') => idx += 2,
                    Some(b']') => break idx + 2,
                    Some(_) => idx += 1,
                }
            }
        } else if let Some(inner) = rest.strip_prefix('"') {
            inner.find('"')? + 2
        } else {
            rest.chars()
                .take_while(|&c| is_word_char(c))
                .map(char::len_utf8)
                .sum()
        };
        if len == 0 {
            return None;
        }
        self.pos = start + len;
        self.last_end = self.pos;
        Some(start..self.pos)
    }

    /// Dotted multi-part name, returned as one span.
    pub(crate) fn qualified_name(&mut self) -> Option<Range<usize>> {
        self.skip_trivia();
        let start = self.pos;
        let mut end = self.identifier()?.end;
        while self.remaining().starts_with('.') {
            self.pos += 1;
            match self.identifier() {
                Some(part) => end = part.end,
                None => {
                    self.pos = end;
                    break;
                }
            }
        }
        self.last_end = end;
        Some(start..end)
    }

    pub(crate) fn rest(&self) -> Range<usize> {
        self.last_end..self.text.len()
    }

    /// Text after the last consumed token, trimmed.
    pub(crate) fn rest_text(&self) -> &'a str {
        self.text[self.last_end..].trim()
    }

    /// Qualified name split into unquoted parts.
    pub(crate) fn name(&mut self) -> Option<Vec<String>> {
        self.qualified_name().map(|span| name_parts(&self.text[span]))
    }

    /// `'literal'` with doubled quotes unescaped.
    pub(crate) fn string_literal(&mut self) -> Option<String> {
        self.skip_trivia();
        let inner = self.remaining().strip_prefix('\'')?;
        let mut value = String::new();
        let mut chars = inner.char_indices().peekable();
        while let Some((idx, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    chars.next();
                    value.push('\'');
                    continue;
                }
                self.pos += idx + 2;
                self.last_end = self.pos;
                return Some(value);
            }
            value.push(c);
        }
        None
    }

    /// Consumes `c` if it is the next non-trivia character.
    pub(crate) fn eat_char(&mut self, c: char) -> bool {
        self.skip_trivia();
        if self.remaining().starts_with(c) {
            self.pos += c.len_utf8();
            self.last_end = self.pos;
            true
        } else {
            false
        }
    }
}

/// Splits `[a].b."c"` into unquoted parts.
pub(crate) fn name_parts(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = raw.trim().chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '[' => {
                while let Some(inner) = chars.next() {
                    if inner == ']' {
                        if chars.peek() == Some(&']') {
                            chars.next();
                            current.push(']');
                            continue;
                        }
                        break;
                    }
                    current.push(inner);
                }
            }
            '"' => {
                for inner in chars.by_ref() {
                    if inner == '"' {
                        break;
                    }
                    current.push(inner);
                }
            }
            '.' => parts.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    parts.push(current);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Classification {
        KeywordClassifier.classify(text).unwrap()
    }

    #[test]
    fn column_with_identity() {
        let text = "COLUMN int IDENTITY (1, 1) NOT NULL\n";
        let result = classify(text);
        assert_eq!(result.kind, ObjectKind::Column);
        assert!(result.identity);
        assert_eq!(result.body_text(text), "int IDENTITY (1, 1) NOT NULL");
    }

    #[test]
    fn check_constraint_flags() {
        let text = "WITH NOCHECK CONSTRAINT CHECK NOT FOR REPLICATION ([qty] > 0)";
        let result = classify(text);
        assert_eq!(result.kind, ObjectKind::CheckConstraint);
        assert!(result.disabled);
        assert!(result.not_for_replication);
        assert_eq!(result.body_text(text), "([qty] > 0)");
    }

    #[test]
    fn default_constraint_body_keeps_for_clause() {
        let text = "CONSTRAINT DEFAULT ((0)) FOR [qty]\n";
        let result = classify(text);
        assert_eq!(result.kind, ObjectKind::DefaultConstraint);
        assert_eq!(result.body_text(text), "((0)) FOR [qty]");
    }

    #[test]
    fn named_keys_and_foreign_keys() {
        let text = "CONSTRAINT [PK_orders] PRIMARY KEY CLUSTERED ( [id] ASC )";
        let result = classify(text);
        assert_eq!(result.kind, ObjectKind::PrimaryKey);
        assert_eq!(result.body_text(text), "CLUSTERED ( [id] ASC )");

        let text = "WITH CHECK CONSTRAINT FOREIGN KEY ([customer_id]) REFERENCES [dbo].[customers] ([id])";
        let result = classify(text);
        assert_eq!(result.kind, ObjectKind::ForeignKey);
        assert!(!result.disabled);
        assert!(result.body_text(text).starts_with("([customer_id]) REFERENCES"));

        let result = classify("CONSTRAINT UNIQUE NONCLUSTERED ( [code] )");
        assert_eq!(result.kind, ObjectKind::Unique);
        assert!(result.unique);
    }

    #[test]
    fn index_body_starts_after_target() {
        let text = "UNIQUE NONCLUSTERED INDEX ON [dbo].[orders] ( [placed_at] ASC ) WITH ( PAD_INDEX = OFF )";
        let result = classify(text);
        assert_eq!(result.kind, ObjectKind::Index);
        assert!(result.unique);
        assert_eq!(
            result.body_text(text),
            "( [placed_at] ASC ) WITH ( PAD_INDEX = OFF )"
        );
    }

    #[test]
    fn module_spans_skip_comments() {
        let text = "-- header\n/* block */ create proc dbo.[get orders] @id int AS SELECT 1";
        let result = classify(text);
        assert_eq!(result.kind, ObjectKind::Procedure);
        let spans = result.module.unwrap();
        assert_eq!(&text[spans.keyword], "create");
        assert_eq!(&text[spans.name], "dbo.[get orders]");
        assert!(spans.target.is_none());
    }

    #[test]
    fn trigger_target_and_or_alter() {
        let text = "CREATE OR ALTER TRIGGER [audit] ON [dbo].[orders] AFTER INSERT AS BEGIN SELECT 1 END";
        let result = classify(text);
        assert_eq!(result.kind, ObjectKind::Trigger);
        let spans = result.module.clone().unwrap();
        assert_eq!(&text[spans.keyword], "CREATE OR ALTER");
        assert_eq!(&text[spans.name], "[audit]");
        assert_eq!(&text[spans.target.unwrap()], "[dbo].[orders]");
        assert_eq!(result.body_text(text), "AFTER INSERT AS BEGIN SELECT 1 END");
    }

    #[test]
    fn name_parts_unquote() {
        assert_eq!(name_parts("[dbo].[a]]b]"), vec!["dbo", "a]b"]);
        assert_eq!(name_parts("dbo.\"x y\""), vec!["dbo", "x y"]);
        assert_eq!(name_parts("plain"), vec!["plain"]);
    }

    #[test]
    fn string_literals_unescape() {
        let mut scanner = Scanner::new(" 'it''s', 'x'");
        assert_eq!(scanner.string_literal().as_deref(), Some("it's"));
        assert!(scanner.eat_char(','));
        assert_eq!(scanner.string_literal().as_deref(), Some("x"));
        assert!(scanner.at_end());
    }

    #[test]
    fn rejects_unknown_text() {
        assert!(KeywordClassifier.classify("   \n").is_err());
        assert!(KeywordClassifier.classify("SELECT * FROM orders").is_err());
        assert!(KeywordClassifier.classify("CREATE TABLE x (a int)").is_err());
        assert!(KeywordClassifier.classify("WITH CHECK INDEX ON x").is_err());
    }
}
