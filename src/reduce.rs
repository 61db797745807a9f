use std::{
    collections::HashSet,
    sync::OnceLock,
};

use anyhow::Result;
use ego_tree::{NodeId, NodeRef};
use regex::Regex;
use scraper::{node::Node, ElementRef, Html, Selector};
use url::Url;

/// Output of reducing one fetched page.
#[derive(Debug, Clone)]
pub struct Reduced {
    /// Cleaned Markdown, guaranteed to start with an ATX title heading.
    pub markdown: String,
    /// Absolute outbound URLs harvested from the main-content subtree,
    /// fragment-stripped and deduplicated. Admission is the caller's job.
    pub links: Vec<Url>,
    pub title: String,
}

/// Elements that never carry page content: chrome, scripts, and form
/// controls. Matches are removed wholesale before conversion.
const BOILERPLATE_SELECTORS: &[&str] = &[
    "nav",
    "header",
    "footer",
    "aside",
    ".sidebar",
    ".navigation",
    ".nav",
    ".menu",
    ".header",
    ".footer",
    ".breadcrumb",
    ".breadcrumbs",
    ".toc",
    ".table-of-contents",
    ".advertisement",
    ".ads",
    ".ad",
    ".social-share",
    ".social-links",
    ".share-buttons",
    ".cookie-banner",
    ".cookie-notice",
    ".popup",
    ".modal",
    "#sidebar",
    "#nav",
    "#navigation",
    "#header",
    "#footer",
    "[role=\"navigation\"]",
    "[role=\"banner\"]",
    "[role=\"contentinfo\"]",
    "[aria-label=\"breadcrumb\"]",
    "script",
    "style",
    "noscript",
    "iframe",
    "form",
    "button",
    "input",
    "select",
    "textarea",
];

/// Main-content candidates, in priority order. The first match wins;
/// `<body>` is the fallback.
const MAIN_CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role=\"main\"]",
    ".main-content",
    ".content",
    ".post-content",
    ".article-content",
    ".entry-content",
    "#main",
    "#content",
    "#main-content",
    ".markdown-body",
    ".documentation",
    ".docs-content",
];

/// Reduce raw HTML fetched from `page_url` to cleaned Markdown plus the
/// outbound links of its main content.
pub fn reduce(html: &str, page_url: &Url) -> Result<Reduced> {
    let mut doc = Html::parse_document(html);

    let title = extract_title(&doc);
    let links = harvest_links(&doc, page_url);

    prune(&mut doc);

    let markdown = match locate_main(&doc) {
        Some(main) => {
            let raw = Renderer { base: page_url }.render(main);
            let cleaned = post_clean(&raw);
            if cleaned.trim_start().starts_with('#') {
                cleaned
            } else if cleaned.is_empty() {
                format!("# {title}")
            } else {
                format!("# {title}\n\n{cleaned}")
            }
        }
        None => format!("# {title}\n\n*No content extracted*"),
    };

    Ok(Reduced {
        markdown,
        links,
        title,
    })
}

fn selector_set(sources: &'static [&'static str], cell: &'static OnceLock<Vec<Selector>>) -> &'static [Selector] {
    cell.get_or_init(|| {
        sources
            .iter()
            .map(|s| Selector::parse(s).expect("static selector"))
            .collect()
    })
}

fn boilerplate_selectors() -> &'static [Selector] {
    static SELS: OnceLock<Vec<Selector>> = OnceLock::new();
    selector_set(BOILERPLATE_SELECTORS, &SELS)
}

fn main_content_selectors() -> &'static [Selector] {
    static SELS: OnceLock<Vec<Selector>> = OnceLock::new();
    selector_set(MAIN_CONTENT_SELECTORS, &SELS)
}

fn single_selector(src: &'static str, cell: &'static OnceLock<Selector>) -> &'static Selector {
    cell.get_or_init(|| Selector::parse(src).expect("static selector"))
}

fn h1_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    single_selector("h1", &SEL)
}

fn title_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    single_selector("title", &SEL)
}

fn body_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    single_selector("body", &SEL)
}

fn anchor_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    single_selector("a[href]", &SEL)
}

fn code_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    single_selector("code", &SEL)
}

fn tr_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    single_selector("tr", &SEL)
}

fn th_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    single_selector("th", &SEL)
}

fn td_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    single_selector("td", &SEL)
}

/// First `<h1>` text, else `<title>`, else `Untitled`. Read before pruning
/// so a heading inside stripped chrome still names the page.
fn extract_title(doc: &Html) -> String {
    if let Some(h1) = doc.select(h1_selector()).next() {
        return collapse_ws(&h1.text().collect::<String>()).trim().to_string();
    }
    if let Some(t) = doc.select(title_selector()).next() {
        return collapse_ws(&t.text().collect::<String>()).trim().to_string();
    }
    "Untitled".to_string()
}

/// Collect `<a href>` targets under the main content of the unpruned parse,
/// resolved against the page URL.
fn harvest_links(doc: &Html, base: &Url) -> Vec<Url> {
    let Some(scope) = locate_main(doc) else {
        return Vec::new();
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for a in scope.select(anchor_selector()) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
            || href.starts_with('#')
        {
            continue;
        }
        let Ok(mut abs) = base.join(href) else {
            continue;
        };
        abs.set_fragment(None);
        if seen.insert(abs.as_str().to_string()) {
            out.push(abs);
        }
    }

    out
}

fn locate_main(doc: &Html) -> Option<ElementRef<'_>> {
    for sel in main_content_selectors() {
        if let Some(el) = doc.select(sel).next() {
            return Some(el);
        }
    }
    doc.select(body_selector()).next()
}

/// Remove comments, boilerplate matches, and elements left empty by the
/// earlier removals (void elements and anything containing an image stay).
fn prune(doc: &mut Html) {
    let comment_ids: Vec<NodeId> = doc
        .tree
        .root()
        .descendants()
        .filter(|n| matches!(n.value(), Node::Comment(_)))
        .map(|n| n.id())
        .collect();
    detach_all(doc, comment_ids);

    let mut boilerplate_ids = Vec::new();
    for sel in boilerplate_selectors() {
        boilerplate_ids.extend(doc.select(sel).map(|el| el.id()));
    }
    detach_all(doc, boilerplate_ids);

    let mut empty_ids = Vec::new();
    collect_empties(doc.tree.root(), &mut empty_ids);
    detach_all(doc, empty_ids);
}

fn detach_all(doc: &mut Html, ids: Vec<NodeId>) {
    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

/// Post-order sweep marking elements with no text and no image descendant
/// for removal. Returns whether `node` contributes visible content.
fn collect_empties(node: NodeRef<'_, Node>, doomed: &mut Vec<NodeId>) -> bool {
    match node.value() {
        Node::Text(t) => !t.trim().is_empty(),
        Node::Element(el) => {
            let name = el.name();
            if name == "img" {
                return true;
            }
            let mut has_content = false;
            for child in node.children() {
                if collect_empties(child, doomed) {
                    has_content = true;
                }
            }
            if name == "br" || name == "hr" {
                return false;
            }
            if !has_content {
                doomed.push(node.id());
            }
            has_content
        }
        Node::Document | Node::Fragment => {
            let mut has_content = false;
            for child in node.children() {
                if collect_empties(child, doomed) {
                    has_content = true;
                }
            }
            has_content
        }
        _ => false,
    }
}

const BLOCK_ELEMENTS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "ul", "ol", "li", "pre", "blockquote", "table",
    "hr", "div", "section", "article", "main", "figure", "figcaption", "details", "summary",
    "dl", "dt", "dd", "body", "html",
];

fn is_block(name: &str) -> bool {
    BLOCK_ELEMENTS.contains(&name)
}

struct Renderer<'a> {
    base: &'a Url,
}

impl Renderer<'_> {
    fn render(&self, root: ElementRef<'_>) -> String {
        let mut out = String::new();
        self.render_block(root, &mut out);
        out
    }

    /// Render one block-level element. Containers recurse, flushing any
    /// loose inline content as paragraphs.
    fn render_block(&self, el: ElementRef<'_>, out: &mut String) {
        let name = el.value().name();
        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<usize>().unwrap_or(1);
                let text = collapse_ws(&self.render_inline_children(el));
                let text = text.trim();
                if !text.is_empty() {
                    out.push_str(&"#".repeat(level));
                    out.push(' ');
                    out.push_str(text);
                    out.push_str("\n\n");
                }
            }
            "p" => {
                // Text nodes are already whitespace-collapsed; keep `<br>`
                // newlines intact inside paragraph flow.
                let text = self.render_inline_children(el);
                let text = text.trim();
                if !text.is_empty() {
                    out.push_str(text);
                    out.push_str("\n\n");
                }
            }
            "ul" => {
                self.render_list(el, out, 0, false);
                out.push('\n');
            }
            "ol" => {
                self.render_list(el, out, 0, true);
                out.push('\n');
            }
            "pre" => self.render_code_block(el, out),
            "blockquote" => {
                let mut inner = String::new();
                self.render_children(el, &mut inner);
                for line in inner.trim_end().lines() {
                    if line.is_empty() {
                        out.push_str(">\n");
                    } else {
                        out.push_str("> ");
                        out.push_str(line);
                        out.push('\n');
                    }
                }
                out.push('\n');
            }
            "table" => {
                out.push_str(&self.render_table(el));
            }
            "hr" => out.push_str("---\n\n"),
            _ => self.render_children(el, out),
        }
    }

    /// Walk a container's children: block children render as blocks, runs
    /// of inline content collapse into paragraphs.
    fn render_children(&self, el: ElementRef<'_>, out: &mut String) {
        let mut inline_buf = String::new();
        for child in el.children() {
            match ElementRef::wrap(child) {
                Some(ce) if is_block(ce.value().name()) => {
                    flush_paragraph(&mut inline_buf, out);
                    self.render_block(ce, out);
                }
                _ => inline_buf.push_str(&self.render_inline_node(child)),
            }
        }
        flush_paragraph(&mut inline_buf, out);
    }

    fn render_inline_children(&self, el: ElementRef<'_>) -> String {
        el.children()
            .map(|c| self.render_inline_node(c))
            .collect()
    }

    fn render_inline_node(&self, node: NodeRef<'_, Node>) -> String {
        match node.value() {
            Node::Text(t) => collapse_ws(&t),
            Node::Element(_) => {
                let el = ElementRef::wrap(node).expect("element node");
                match el.value().name() {
                    "a" => self.render_link(el),
                    "strong" | "b" => wrap_emphasis(&self.render_inline_children(el), "**"),
                    "em" | "i" => wrap_emphasis(&self.render_inline_children(el), "*"),
                    "code" => {
                        let code: String = el.text().collect();
                        if code.trim().is_empty() {
                            String::new()
                        } else {
                            format!("`{}`", code.trim())
                        }
                    }
                    "img" => self.render_image(el),
                    "br" => "\n".to_string(),
                    _ => self.render_inline_children(el),
                }
            }
            _ => String::new(),
        }
    }

    /// Links resolve relative hrefs against the page URL; `mailto:`,
    /// `tel:`, `#`, and `data:` pass through. A link with no text collapses
    /// to nothing, one with no href to its text.
    fn render_link(&self, el: ElementRef<'_>) -> String {
        let text = collapse_ws(&self.render_inline_children(el)).trim().to_string();
        let href = self.resolve_ref(el.value().attr("href").unwrap_or("").trim());
        if text.is_empty() || href.is_empty() {
            return text;
        }
        match el.value().attr("title").map(str::trim) {
            Some(title) if !title.is_empty() => format!("[{text}]({href} \"{title}\")"),
            _ => format!("[{text}]({href})"),
        }
    }

    fn render_image(&self, el: ElementRef<'_>) -> String {
        let src = self.resolve_ref(el.value().attr("src").unwrap_or("").trim());
        if src.is_empty() {
            return String::new();
        }
        let alt = el.value().attr("alt").unwrap_or("").trim();
        match el.value().attr("title").map(str::trim) {
            Some(title) if !title.is_empty() => format!("![{alt}]({src} \"{title}\")"),
            _ => format!("![{alt}]({src})"),
        }
    }

    fn resolve_ref(&self, value: &str) -> String {
        if value.is_empty() {
            return String::new();
        }
        for passthrough in ["http://", "https://", "mailto:", "tel:", "#", "data:"] {
            if value.starts_with(passthrough) {
                return value.to_string();
            }
        }
        match self.base.join(value) {
            Ok(u) => u.to_string(),
            Err(_) => value.to_string(),
        }
    }

    fn render_list(&self, el: ElementRef<'_>, out: &mut String, indent: usize, ordered: bool) {
        let mut index = 1usize;
        for li in el.children().filter_map(ElementRef::wrap) {
            if li.value().name() != "li" {
                continue;
            }
            let mut text = String::new();
            let mut nested = String::new();
            for child in li.children() {
                match ElementRef::wrap(child) {
                    Some(ce) if ce.value().name() == "ul" => {
                        self.render_list(ce, &mut nested, indent + 2, false)
                    }
                    Some(ce) if ce.value().name() == "ol" => {
                        self.render_list(ce, &mut nested, indent + 2, true)
                    }
                    Some(ce) if is_block(ce.value().name()) => {
                        text.push(' ');
                        text.push_str(&self.render_inline_children(ce));
                        text.push(' ');
                    }
                    _ => text.push_str(&self.render_inline_node(child)),
                }
            }
            let line = collapse_ws(&text);
            let line = line.trim();
            if !line.is_empty() || !nested.is_empty() {
                out.push_str(&" ".repeat(indent));
                if ordered {
                    out.push_str(&format!("{index}. "));
                } else {
                    out.push_str("- ");
                }
                out.push_str(line);
                out.push('\n');
                out.push_str(&nested);
                index += 1;
            }
        }
    }

    /// Fenced code block; the language comes from the first `language-*`
    /// class on the element or its `<code>` child.
    fn render_code_block(&self, el: ElementRef<'_>, out: &mut String) {
        let lang = code_language(el).unwrap_or_default();
        let code: String = el.text().collect();
        out.push_str("```");
        out.push_str(&lang);
        out.push('\n');
        out.push_str(code.trim_matches('\n'));
        out.push_str("\n```\n\n");
    }

    fn render_table(&self, el: ElementRef<'_>) -> String {
        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut has_header = false;

        for tr in el.select(tr_selector()) {
            let ths: Vec<String> = tr
                .select(th_selector())
                .map(|cell| collapse_ws(&cell.text().collect::<String>()).trim().to_string())
                .collect();
            if !ths.is_empty() {
                has_header = true;
                rows.push(ths);
                continue;
            }
            let tds: Vec<String> = tr
                .select(td_selector())
                .map(|cell| collapse_ws(&cell.text().collect::<String>()).trim().to_string())
                .collect();
            if !tds.is_empty() {
                rows.push(tds);
            }
        }

        if rows.is_empty() {
            return String::new();
        }
        let cols = rows.iter().map(Vec::len).max().unwrap_or(0);
        for row in &mut rows {
            row.resize(cols, String::new());
        }

        let mut md = String::new();
        md.push_str(&format!("| {} |\n", rows[0].join(" | ")));
        md.push_str(&format!("| {} |\n", vec!["---"; cols].join(" | ")));
        let data_start = if has_header { 1 } else { 0 };
        for row in &rows[data_start..] {
            md.push_str(&format!("| {} |\n", row.join(" | ")));
        }
        md.push('\n');
        md
    }
}

fn code_language(el: ElementRef<'_>) -> Option<String> {
    for class in el.value().classes() {
        if let Some(lang) = class.strip_prefix("language-") {
            return Some(lang.to_string());
        }
    }
    for code in el.select(code_selector()) {
        for class in code.value().classes() {
            if let Some(lang) = class.strip_prefix("language-") {
                return Some(lang.to_string());
            }
        }
    }
    None
}

fn flush_paragraph(buf: &mut String, out: &mut String) {
    let text = buf.trim();
    if !text.is_empty() {
        out.push_str(text);
        out.push_str("\n\n");
    }
    buf.clear();
}

fn wrap_emphasis(inner: &str, marker: &str) -> String {
    let inner = collapse_ws(inner);
    let inner = inner.trim();
    if inner.is_empty() {
        String::new()
    } else {
        format!("{marker}{inner}{marker}")
    }
}

/// HTML whitespace normalization: any run of whitespace, newlines included,
/// becomes one space. Newlines from `<br>` survive because they are inserted
/// into the stream after each text node has been collapsed.
fn collapse_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_ws = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !last_ws {
                out.push(' ');
            }
            last_ws = true;
        } else {
            out.push(ch);
            last_ws = false;
        }
    }
    out
}

fn empty_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]*)\]\(\s*\)").unwrap())
}

fn bare_bullet_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*-\s*$").unwrap())
}

fn space_run_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"  +").unwrap())
}

/// Final Markdown cleanup: per-line trailing whitespace removed, blank-line
/// runs collapsed to one, empty-href links demoted to text, contentless
/// bullets dropped, space runs in prose collapsed. Fenced code blocks pass
/// through untouched.
pub fn post_clean(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut in_code = false;
    let mut prev_blank = false;

    for raw_line in markdown.lines() {
        let line = raw_line.trim_end();
        let trimmed = line.trim_start();

        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_code = !in_code;
            out.push_str(line);
            out.push('\n');
            prev_blank = false;
            continue;
        }

        if in_code {
            out.push_str(line);
            out.push('\n');
            prev_blank = false;
            continue;
        }

        let cleaned = empty_link_regex().replace_all(line, "$1");
        if bare_bullet_regex().is_match(&cleaned) {
            continue;
        }

        let indent_len = cleaned.len() - cleaned.trim_start().len();
        let (indent, rest) = cleaned.split_at(indent_len);
        let collapsed = space_run_regex().replace_all(rest, " ");
        let rebuilt = format!("{indent}{collapsed}");
        let rebuilt = rebuilt.trim_end();

        if rebuilt.is_empty() {
            if !prev_blank {
                out.push('\n');
                prev_blank = true;
            }
            continue;
        }

        prev_blank = false;
        out.push_str(rebuilt);
        out.push('\n');
    }

    out.trim().to_string()
}
