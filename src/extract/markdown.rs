//! Markdown structure scanning
//!
//! Splits a document body into heading-delimited sections of prose lines.
//! Fenced and indented code blocks are dropped; inline code spans are kept
//! both in the prose and separately, since they are where file paths live.

use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};

/// Text between one heading and the next
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Section {
    /// Heading level, 0 for text before the first heading
    pub level: u8,
    pub heading: String,
    /// Prose lines, heading text first
    pub lines: Vec<String>,
    pub code_spans: Vec<String>,
}

impl Section {
    fn new(level: u8, heading: String) -> Self {
        let lines = if heading.is_empty() {
            Vec::new()
        } else {
            vec![heading.clone()]
        };
        Self {
            level,
            heading,
            lines,
            code_spans: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ScannedDocument {
    /// Text of the first level-1 heading
    pub title: Option<String>,
    pub sections: Vec<Section>,
}

impl ScannedDocument {
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.sections
            .iter()
            .flat_map(|s| s.lines.iter().map(String::as_str))
    }

    pub fn code_spans(&self) -> impl Iterator<Item = &str> {
        self.sections
            .iter()
            .flat_map(|s| s.code_spans.iter().map(String::as_str))
    }
}

struct Scanner {
    sections: Vec<Section>,
    current: Section,
    line: String,
    heading: Option<(u8, String)>,
    in_code_block: bool,
    title: Option<String>,
}

impl Scanner {
    fn new() -> Self {
        Self {
            sections: Vec::new(),
            current: Section::default(),
            line: String::new(),
            heading: None,
            in_code_block: false,
            title: None,
        }
    }

    fn flush_line(&mut self) {
        let line = self.line.trim();
        if !line.is_empty() {
            self.current.lines.push(line.to_string());
        }
        self.line.clear();
    }

    fn push_text(&mut self, text: &str) {
        match &mut self.heading {
            Some((_, heading)) => heading.push_str(text),
            None => self.line.push_str(text),
        }
    }

    fn start_section(&mut self, level: u8, heading: String) {
        if level == 1 && self.title.is_none() && !heading.is_empty() {
            self.title = Some(heading.clone());
        }
        let finished = std::mem::replace(&mut self.current, Section::new(level, heading));
        if finished.level > 0 || !finished.lines.is_empty() || !finished.code_spans.is_empty() {
            self.sections.push(finished);
        }
    }

    fn finish(mut self) -> ScannedDocument {
        self.flush_line();
        self.start_section(0, String::new());
        ScannedDocument {
            title: self.title,
            sections: self.sections,
        }
    }
}

/// Scan a markdown body (frontmatter already removed)
pub(crate) fn scan_markdown(body: &str) -> ScannedDocument {
    let options = Options::ENABLE_TABLES | Options::ENABLE_TASKLISTS | Options::ENABLE_STRIKETHROUGH;
    let mut scanner = Scanner::new();

    for event in Parser::new_ext(body, options) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                scanner.flush_line();
                scanner.heading = Some((level as u8, String::new()));
            }
            Event::End(TagEnd::Heading(_)) => {
                if let Some((level, text)) = scanner.heading.take() {
                    scanner.start_section(level, text.trim().to_string());
                }
            }
            Event::Start(Tag::CodeBlock(_)) => {
                scanner.flush_line();
                scanner.in_code_block = true;
            }
            Event::End(TagEnd::CodeBlock) => {
                scanner.in_code_block = false;
            }
            Event::Text(_) if scanner.in_code_block => {}
            Event::Text(text) => scanner.push_text(&text),
            Event::Code(code) => {
                scanner.current.code_spans.push(code.to_string());
                scanner.push_text(&code);
            }
            Event::SoftBreak
            | Event::HardBreak
            | Event::Start(Tag::Item)
            | Event::End(TagEnd::Item)
            | Event::End(TagEnd::Paragraph)
            | Event::End(TagEnd::TableCell) => {
                if scanner.heading.is_none() {
                    scanner.flush_line();
                } else {
                    scanner.push_text(" ");
                }
            }
            _ => {}
        }
    }

    scanner.finish()
}
