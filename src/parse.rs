//! Rendering for posted response text.
//!
//! Rendering runs five passes, in this order, each a single left-to-right
//! scan over the previous pass's output:
//!
//! 1. escape: `\` followed by a markup marker becomes an inert token
//! 2. fences: lines between two ```` ``` ```` lines become code blocks
//! 3. links: `>>123` cross references and `http(s)://` URLs
//! 4. decoration: `***bold***` and `~~~strike~~~`
//! 5. unescape: inert tokens become their literal text again
//!
//! Each pass hands the next a list of typed spans rather than a string, so a
//! later pass can never mistake an earlier pass's output for markup. None of
//! the passes can fail; broken markup is shown as the text it was written as.
//!
//! A URL runs until whitespace, a quote, an angle bracket or the first escaped
//! marker. So `https://a.com/\\x` links `https://a.com/` and leaves `\x` as
//! text.

use horrorshow::html;
use horrorshow::prelude::*;

use serde::Serialize;

use crate::models::ThreadId;

const FENCE: &str = "```";

/// A rendered piece of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Node {
    /// Plain text. May contain newlines.
    Text(String),
    Bold(String),
    Strike(String),
    /// The lines of a fenced block, verbatim.
    Code(String),
    /// A `>>n` reference to response `n` of the same thread.
    Anchor { target: String, number: String },
    /// An external URL.
    Link(String),
}

/// Render a response's raw text into nodes.
///
/// `thread_id` is used to build the fragment that cross references point at.
pub fn render_content(thread_id: ThreadId, raw: &str) -> Vec<Node> {
    let segs = escape(raw);
    let blocks = scan_fences(split_lines(segs));

    let mut out = NodeList::default();

    for block in blocks {
        match block {
            Block::Code(code) => out.push(Node::Code(code)),
            Block::Line { segs, newline } => {
                for item in scan_links(segs) {
                    match item {
                        Linked::Plain(segs) => {
                            for inline in scan_decorations(segs) {
                                out.push(unescape(inline));
                            }
                        }
                        Linked::Anchor(number) => {
                            out.push(anchor(thread_id, number))
                        }
                        Linked::Link(url) => out.push(Node::Link(url)),
                    }
                }
                if newline {
                    out.push(Node::Text("\n".into()));
                }
            }
        }
    }

    out.0
}

/// Output list that merges adjacent text and drops empty text.
#[derive(Default)]
struct NodeList(Vec<Node>);

impl NodeList {
    fn push(&mut self, node: Node) {
        if let Node::Text(text) = node {
            if text.is_empty() {
                return;
            }
            if let Some(Node::Text(last)) = self.0.last_mut() {
                last.push_str(&text);
                return;
            }
            self.0.push(Node::Text(text));
        } else {
            self.0.push(node);
        }
    }
}

fn anchor(thread_id: ThreadId, number: String) -> Node {
    Node::Anchor {
        target: format!("{}-{}", thread_id, number),
        number,
    }
}

// Pass 1: escape.

/// A marker the poster escaped with a backslash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    Backslash,
    Fence,
    Bold,
    Strike,
    CrossRef,
    Https,
    Http,
}

impl Escape {
    /// Tried in order after a backslash; none is a prefix of another.
    const ALL: [Escape; 7] = [
        Escape::Backslash,
        Escape::Fence,
        Escape::Bold,
        Escape::Strike,
        Escape::CrossRef,
        Escape::Https,
        Escape::Http,
    ];

    /// The text the marker stands for once unescaped.
    fn literal(self) -> &'static str {
        match self {
            Escape::Backslash => "\\",
            Escape::Fence => FENCE,
            Escape::Bold => "***",
            Escape::Strike => "~~~",
            Escape::CrossRef => ">>",
            Escape::Https => "https://",
            Escape::Http => "http://",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Seg {
    Text(String),
    Escaped(Escape),
}

fn push_text(segs: &mut Vec<Seg>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Seg::Text(last)) = segs.last_mut() {
        last.push_str(text);
    } else {
        segs.push(Seg::Text(text.to_string()));
    }
}

fn escape(raw: &str) -> Vec<Seg> {
    let mut segs = Vec::new();
    let mut rest = raw;

    while let Some(pos) = rest.find('\\') {
        push_text(&mut segs, &rest[..pos]);

        let after = &rest[pos + 1..];
        match Escape::ALL.iter().find(|e| after.starts_with(e.literal())) {
            Some(&esc) => {
                segs.push(Seg::Escaped(esc));
                rest = &after[esc.literal().len()..];
            }
            None => {
                push_text(&mut segs, "\\");
                rest = after;
            }
        }
    }
    push_text(&mut segs, rest);

    segs
}

/// The text a run of segments was written as, backslashes included.
fn raw_text(segs: &[Seg]) -> String {
    let mut out = String::new();
    for seg in segs {
        match seg {
            Seg::Text(text) => out.push_str(text),
            Seg::Escaped(esc) => {
                out.push('\\');
                out.push_str(esc.literal());
            }
        }
    }
    out
}

// Pass 2: code fences.

enum Block {
    Line { segs: Vec<Seg>, newline: bool },
    Code(String),
}

/// Split segments into lines. There is always at least one line.
fn split_lines(segs: Vec<Seg>) -> Vec<Vec<Seg>> {
    let mut lines = Vec::new();
    let mut line = Vec::new();

    for seg in segs {
        match seg {
            Seg::Text(text) => {
                let mut parts = text.split('\n');
                if let Some(first) = parts.next() {
                    push_text(&mut line, first);
                }
                for part in parts {
                    lines.push(std::mem::take(&mut line));
                    push_text(&mut line, part);
                }
            }
            escaped => line.push(escaped),
        }
    }
    lines.push(line);

    lines
}

fn is_fence(line: &[Seg]) -> bool {
    match line {
        [Seg::Text(text)] => text.trim() == FENCE,
        _ => false,
    }
}

fn scan_fences(lines: Vec<Vec<Seg>>) -> Vec<Block> {
    let last = lines.len().saturating_sub(1);
    let mut blocks = Vec::new();
    let mut in_fence = false;
    let mut code: Vec<String> = Vec::new();

    for (i, line) in lines.into_iter().enumerate() {
        if is_fence(&line) {
            if in_fence {
                blocks.push(Block::Code(code.join("\n")));
                code.clear();
            }
            in_fence = !in_fence;
        } else if in_fence {
            code.push(raw_text(&line));
        } else {
            blocks.push(Block::Line {
                segs: line,
                newline: i != last,
            });
        }
    }

    // An unclosed fence still shows everything after it.
    if in_fence {
        blocks.push(Block::Code(code.join("\n")));
    }

    blocks
}

// Pass 3: cross references and links.

enum Linked {
    Plain(Vec<Seg>),
    Anchor(String),
    Link(String),
}

fn ends_url(c: char) -> bool {
    c.is_whitespace() || matches!(c, '<' | '>' | '"' | '\'')
}

/// Length in bytes of a link or cross reference starting at `s`, if any.
fn match_link(s: &str) -> Option<(usize, bool)> {
    if let Some(rest) = s.strip_prefix(">>") {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 {
            return Some((2 + digits, true));
        }
        return None;
    }

    let scheme = if s.starts_with("https://") {
        "https://".len()
    } else if s.starts_with("http://") {
        "http://".len()
    } else {
        return None;
    };

    let body: usize = s[scheme..]
        .chars()
        .take_while(|c| !ends_url(*c))
        .map(char::len_utf8)
        .sum();

    if body > 0 {
        Some((scheme + body, false))
    } else {
        None
    }
}

fn scan_links(segs: Vec<Seg>) -> Vec<Linked> {
    let mut out = Vec::new();
    let mut plain: Vec<Seg> = Vec::new();

    for seg in segs {
        let text = match seg {
            Seg::Text(text) => text,
            escaped => {
                plain.push(escaped);
                continue;
            }
        };

        let mut start = 0;
        let mut pos = 0;
        while let Some(c) = text[pos..].chars().next() {
            if c == '>' || c == 'h' {
                if let Some((len, is_anchor)) = match_link(&text[pos..]) {
                    push_text(&mut plain, &text[start..pos]);
                    if !plain.is_empty() {
                        out.push(Linked::Plain(std::mem::take(&mut plain)));
                    }

                    let matched = &text[pos..pos + len];
                    if is_anchor {
                        out.push(Linked::Anchor(matched[2..].to_string()));
                    } else {
                        out.push(Linked::Link(matched.to_string()));
                    }

                    pos += len;
                    start = pos;
                    continue;
                }
            }
            pos += c.len_utf8();
        }
        push_text(&mut plain, &text[start..]);
    }

    if !plain.is_empty() {
        out.push(Linked::Plain(plain));
    }

    out
}

// Pass 4: bold and strikethrough.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Char(char),
    Escaped(Escape),
}

enum Inline {
    Plain(Vec<Unit>),
    Bold(Vec<Unit>),
    Strike(Vec<Unit>),
}

fn units(segs: Vec<Seg>) -> Vec<Unit> {
    let mut out = Vec::new();
    for seg in segs {
        match seg {
            Seg::Text(text) => out.extend(text.chars().map(Unit::Char)),
            Seg::Escaped(esc) => out.push(Unit::Escaped(esc)),
        }
    }
    out
}

fn is_delim(units: &[Unit], at: usize, c: char) -> bool {
    units.len() >= at + 3 && units[at..at + 3].iter().all(|u| *u == Unit::Char(c))
}

fn find_delim(units: &[Unit], from: usize, c: char) -> Option<usize> {
    (from..units.len()).find(|&i| is_delim(units, i, c))
}

fn scan_decorations(segs: Vec<Seg>) -> Vec<Inline> {
    let units = units(segs);
    let mut out = Vec::new();

    // Once a delimiter has no closing partner, no later one will either.
    let mut no_bold_close = false;
    let mut no_strike_close = false;

    let mut start = 0;
    let mut i = 0;
    while i < units.len() {
        let kind = if !no_bold_close && is_delim(&units, i, '*') {
            Some('*')
        } else if !no_strike_close && is_delim(&units, i, '~') {
            Some('~')
        } else {
            None
        };

        if let Some(c) = kind {
            match find_delim(&units, i + 3, c) {
                Some(close) => {
                    if start < i {
                        out.push(Inline::Plain(units[start..i].to_vec()));
                    }
                    let inner = units[i + 3..close].to_vec();
                    out.push(if c == '*' {
                        Inline::Bold(inner)
                    } else {
                        Inline::Strike(inner)
                    });
                    i = close + 3;
                    start = i;
                    continue;
                }
                None if c == '*' => no_bold_close = true,
                None => no_strike_close = true,
            }
        }

        i += 1;
    }

    if start < units.len() {
        out.push(Inline::Plain(units[start..].to_vec()));
    }

    out
}

// Pass 5: unescape.

fn literal_text(units: &[Unit]) -> String {
    let mut out = String::with_capacity(units.len());
    for unit in units {
        match unit {
            Unit::Char(c) => out.push(*c),
            Unit::Escaped(esc) => out.push_str(esc.literal()),
        }
    }
    out
}

fn unescape(inline: Inline) -> Node {
    match inline {
        Inline::Plain(units) => Node::Text(literal_text(&units)),
        Inline::Bold(units) => Node::Bold(literal_text(&units)),
        Inline::Strike(units) => Node::Strike(literal_text(&units)),
    }
}

/// A rendered response body which can be turned into HTML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResponseBody(Vec<Node>);

impl ResponseBody {
    /// Parse a response of the given thread.
    pub fn parse(thread_id: ThreadId, raw: &str) -> ResponseBody {
        ResponseBody(render_content(thread_id, raw))
    }

    pub fn nodes(&self) -> &[Node] {
        &self.0
    }

    pub fn into_nodes(self) -> Vec<Node> {
        self.0
    }

    pub fn into_html(self) -> String {
        format!("{}", html! { : &self })
    }
}

impl Render for ResponseBody {
    fn render(&self, tmpl: &mut TemplateBuffer) {
        tmpl << html! {
            @ for node in &self.0 {
                : node
            }
        }
    }
}

impl RenderMut for ResponseBody {
    fn render_mut(&mut self, tmpl: &mut TemplateBuffer) {
        Render::render(self, tmpl)
    }
}

impl RenderOnce for ResponseBody {
    fn render_once(self, tmpl: &mut TemplateBuffer) {
        Render::render(&self, tmpl)
    }
}

impl Render for Node {
    fn render(&self, tmpl: &mut TemplateBuffer) {
        match self {
            Node::Text(text) => {
                tmpl << html! {
                    @ for (i, line) in text.split('\n').enumerate() {
                        @ if i > 0 {
                            br;
                        }
                        : line
                    }
                }
            }
            Node::Bold(text) => tmpl << html! { strong { : text } },
            Node::Strike(text) => tmpl << html! { s { : text } },
            Node::Code(text) => {
                tmpl << html! {
                    pre {
                        code { : text }
                    }
                }
            }
            Node::Anchor { target, number } => {
                tmpl << html! {
                    a(class = "anchor", href = (format!("#{}", target))) {
                        : format!(">>{}", number)
                    }
                }
            }
            Node::Link(url) => {
                tmpl << html! {
                    a(href = url, target = "_blank", rel = "noopener noreferrer") {
                        : url
                    }
                }
            }
        };
    }
}

impl RenderMut for Node {
    fn render_mut(&mut self, tmpl: &mut TemplateBuffer) {
        Render::render(self, tmpl)
    }
}

impl RenderOnce for Node {
    fn render_once(self, tmpl: &mut TemplateBuffer) {
        Render::render(&self, tmpl)
    }
}
