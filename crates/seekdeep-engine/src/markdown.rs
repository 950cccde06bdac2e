//! HTML to markdown conversion for fetched pages.
//!
//! Deliberately "good enough" and deterministic, not a full readability
//! engine: strip page chrome, pick the most article-like conversion root,
//! then serialize the DOM to markdown with ATX headings and fenced code
//! blocks.

use html_scraper::{ElementRef, Html, Node, Selector};

/// Preferred conversion roots, most specific first; `body` is the fallback.
const ROOT_SELECTORS: &str = "main, article, [role=\"main\"], .content, #content";

/// Elements that never contribute readable content.
const STRIPPED_TAGS: [&str; 9] = [
    "script", "style", "noscript", "iframe", "svg", "nav", "header", "footer", "aside",
];

/// Landmark roles that mark page chrome rather than content.
const STRIPPED_ROLES: [&str; 4] = ["navigation", "banner", "contentinfo", "complementary"];

/// Structural UI words in class/id attributes. Generic on purpose: no
/// site-specific heuristics, only words that mean chrome everywhere.
const CHROME_CLASS_WORDS: [&str; 14] = [
    "menu",
    "sidebar",
    "side-bar",
    "advert",
    "banner",
    "cookie",
    "consent",
    "modal",
    "popup",
    "overlay",
    "promo",
    "newsletter",
    "subscribe",
    "breadcrumb",
];

/// Convert an HTML document to `(title, markdown)`.
pub fn html_to_markdown(html: &str) -> (Option<String>, String) {
    let doc = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| doc.select(&sel).next())
        .map(|el| collapse_spaces(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let mut blocks = Vec::new();
    if let Some(root) = pick_root(&doc) {
        render_children(root, &mut blocks);
    }
    (title, blocks.join("\n\n"))
}

fn pick_root(doc: &Html) -> Option<ElementRef<'_>> {
    if let Ok(sel) = Selector::parse(ROOT_SELECTORS) {
        if let Some(el) = doc.select(&sel).next() {
            return Some(el);
        }
    }
    let body = Selector::parse("body").ok()?;
    doc.select(&body).next()
}

fn class_or_id_lc(el: &ElementRef) -> String {
    let mut out = String::new();
    if let Some(c) = el.value().attr("class") {
        out.push_str(c);
        out.push(' ');
    }
    if let Some(i) = el.value().attr("id") {
        out.push_str(i);
    }
    out.to_ascii_lowercase()
}

fn is_stripped(el: &ElementRef) -> bool {
    let name = el.value().name();
    if STRIPPED_TAGS.contains(&name) {
        return true;
    }
    if let Some(role) = el.value().attr("role") {
        if STRIPPED_ROLES.contains(&role.trim().to_ascii_lowercase().as_str()) {
            return true;
        }
    }
    if el
        .value()
        .attr("aria-hidden")
        .is_some_and(|v| v.trim() == "true")
    {
        return true;
    }
    let s = class_or_id_lc(el);
    if s.is_empty() {
        return false;
    }
    if CHROME_CLASS_WORDS.iter().any(|w| s.contains(w)) {
        return true;
    }
    // "ad"/"ads" need token matching: plain contains() would hit
    // "download", "shadow", "readme".
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|tok| tok == "ad" || tok == "ads")
}

fn is_block(name: &str) -> bool {
    matches!(
        name,
        "h1" | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "p"
            | "ul"
            | "ol"
            | "pre"
            | "blockquote"
            | "hr"
            | "table"
            | "div"
            | "section"
            | "article"
            | "main"
            | "figure"
            | "figcaption"
            | "details"
            | "summary"
            | "dl"
            | "dt"
            | "dd"
    )
}

fn render_children(el: ElementRef, blocks: &mut Vec<String>) {
    let mut pending = String::new();
    for child in el.children() {
        match child.value() {
            Node::Text(t) => push_text(&mut pending, t),
            Node::Element(_) => {
                let Some(e) = ElementRef::wrap(child) else {
                    continue;
                };
                if is_stripped(&e) {
                    continue;
                }
                if is_block(e.value().name()) {
                    flush_paragraph(&mut pending, blocks);
                    render_block(e, blocks);
                } else {
                    render_inline_element(e, &mut pending);
                }
            }
            _ => {}
        }
    }
    flush_paragraph(&mut pending, blocks);
}

fn render_block(el: ElementRef, blocks: &mut Vec<String>) {
    let name = el.value().name();
    match name {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = name[1..].parse::<usize>().unwrap_or(1);
            let text = normalize_inline(&inline_text(el));
            if !text.is_empty() {
                blocks.push(format!("{} {}", "#".repeat(level), text));
            }
        }
        "p" | "figcaption" | "summary" | "dt" | "dd" => {
            let text = normalize_inline(&inline_text(el));
            if !text.is_empty() {
                blocks.push(text);
            }
        }
        "ul" | "ol" => {
            let mut lines = Vec::new();
            collect_list_lines(el, name == "ol", 0, &mut lines);
            if !lines.is_empty() {
                blocks.push(lines.join("\n"));
            }
        }
        "pre" => {
            let code: String = el.text().collect();
            let code = code.trim_matches('\n');
            if !code.trim().is_empty() {
                blocks.push(format!("```\n{code}\n```"));
            }
        }
        "blockquote" => {
            let mut inner = Vec::new();
            render_children(el, &mut inner);
            if !inner.is_empty() {
                let quoted = inner
                    .join("\n\n")
                    .lines()
                    .map(|l| format!("> {l}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                blocks.push(quoted);
            }
        }
        "hr" => blocks.push("---".to_string()),
        "table" => render_table(el, blocks),
        // Generic containers: recurse.
        _ => render_children(el, blocks),
    }
}

fn render_table(el: ElementRef, blocks: &mut Vec<String>) {
    let Ok(row_sel) = Selector::parse("tr") else {
        return;
    };
    let Ok(cell_sel) = Selector::parse("th, td") else {
        return;
    };
    let mut lines = Vec::new();
    for row in el.select(&row_sel) {
        let cells: Vec<String> = row
            .select(&cell_sel)
            .map(|c| normalize_inline(&inline_text(c)).replace('\n', " "))
            .collect();
        if cells.iter().any(|c| !c.is_empty()) {
            lines.push(format!("| {} |", cells.join(" | ")));
        }
    }
    if !lines.is_empty() {
        blocks.push(lines.join("\n"));
    }
}

fn collect_list_lines(el: ElementRef, ordered: bool, depth: usize, lines: &mut Vec<String>) {
    let mut index = 1usize;
    for child in el.children() {
        let Some(li) = ElementRef::wrap(child) else {
            continue;
        };
        if li.value().name() != "li" || is_stripped(&li) {
            continue;
        }
        let mut text = String::new();
        let mut nested: Vec<(ElementRef, bool)> = Vec::new();
        for n in li.children() {
            if let Some(e) = ElementRef::wrap(n) {
                match e.value().name() {
                    "ul" => {
                        nested.push((e, false));
                        continue;
                    }
                    "ol" => {
                        nested.push((e, true));
                        continue;
                    }
                    _ => {}
                }
            }
            render_inline_node(n, &mut text);
        }
        let text = normalize_inline(&text).replace('\n', " ");
        let marker = if ordered {
            format!("{index}. ")
        } else {
            "- ".to_string()
        };
        lines.push(format!("{}{}{}", "  ".repeat(depth), marker, text));
        index += 1;
        for (nested_el, nested_ordered) in nested {
            collect_list_lines(nested_el, nested_ordered, depth + 1, lines);
        }
    }
}

fn inline_text(el: ElementRef) -> String {
    let mut out = String::new();
    for child in el.children() {
        render_inline_node(child, &mut out);
    }
    out
}

fn render_inline_node(node: ego_tree::NodeRef<'_, Node>, out: &mut String) {
    match node.value() {
        Node::Text(t) => push_text(out, t),
        Node::Element(_) => {
            if let Some(e) = ElementRef::wrap(node) {
                if !is_stripped(&e) {
                    render_inline_element(e, out);
                }
            }
        }
        _ => {}
    }
}

fn render_inline_element(el: ElementRef, out: &mut String) {
    match el.value().name() {
        "br" => out.push('\n'),
        "a" => {
            let inner = normalize_inline(&inline_text(el));
            let href = el.value().attr("href").unwrap_or("").trim();
            if inner.is_empty() {
                return;
            }
            if href.starts_with("http://") || href.starts_with("https://") {
                out.push_str(&format!("[{inner}]({href})"));
            } else {
                out.push_str(&inner);
            }
        }
        "strong" | "b" => wrap_inline(el, out, "**"),
        "em" | "i" => wrap_inline(el, out, "*"),
        "code" => {
            let inner = normalize_inline(&inline_text(el));
            if !inner.is_empty() {
                out.push('`');
                out.push_str(&inner);
                out.push('`');
            }
        }
        "img" => {
            if let Some(alt) = el.value().attr("alt") {
                let alt = alt.trim();
                if !alt.is_empty() {
                    out.push_str(alt);
                }
            }
        }
        _ => {
            for child in el.children() {
                render_inline_node(child, out);
            }
        }
    }
}

fn wrap_inline(el: ElementRef, out: &mut String, marker: &str) {
    let inner = normalize_inline(&inline_text(el));
    if inner.is_empty() {
        return;
    }
    out.push_str(marker);
    out.push_str(&inner);
    out.push_str(marker);
}

/// Append a text node, collapsing whitespace runs to single spaces.
fn push_text(out: &mut String, text: &str) {
    let mut last_space = out.ends_with(' ') || out.ends_with('\n') || out.is_empty();
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
}

fn collapse_spaces(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Per-line space collapse that preserves the newlines `<br>` produced.
fn normalize_inline(s: &str) -> String {
    s.lines()
        .map(collapse_spaces)
        .collect::<Vec<_>>()
        .join("\n")
        .trim_matches('\n')
        .to_string()
}

fn flush_paragraph(pending: &mut String, blocks: &mut Vec<String>) {
    let text = normalize_inline(pending);
    pending.clear();
    if !text.is_empty() {
        blocks.push(text);
    }
}
