use pretty_assertions::assert_eq;
use url::Url;
use wcb::reduce::{post_clean, reduce};

fn page(html: &str, url: &str) -> wcb::reduce::Reduced {
    reduce(html, &Url::parse(url).unwrap()).unwrap()
}

#[test]
fn strips_boilerplate_and_keeps_main_content() {
    let html = "<html><body><nav>X</nav><main><h1>T</h1>\
                <p>hello <a href=\"/y\">y</a></p></main><footer>F</footer></body></html>";
    let out = page(html, "http://site/p");

    assert!(out.markdown.starts_with("# T"));
    assert!(!out.markdown.contains('X'));
    assert!(!out.markdown.contains('F'));
    assert!(out.markdown.contains("[y](http://site/y)"));
    assert_eq!(out.title, "T");
    assert_eq!(
        out.links.iter().map(Url::as_str).collect::<Vec<_>>(),
        vec!["http://site/y"]
    );
}

#[test]
fn title_falls_back_to_title_tag_then_untitled() {
    let html = "<html><head><title>From Title</title></head>\
                <body><main><p>text</p></main></body></html>";
    let out = page(html, "http://site/");
    assert_eq!(out.title, "From Title");
    assert!(out.markdown.starts_with("# From Title"));

    let out = page("<html><body><main><p>text</p></main></body></html>", "http://site/");
    assert_eq!(out.title, "Untitled");
    assert!(out.markdown.starts_with("# Untitled"));
}

#[test]
fn removes_comments_and_classed_chrome() {
    let html = r#"<html><body>
        <!-- tracking comment -->
        <div class="sidebar"><a href="/nav1">nav</a></div>
        <div class="cookie-banner">Accept cookies</div>
        <main><h1>Doc</h1><p>body text</p></main>
    </body></html>"#;
    let out = page(html, "http://site/");

    assert!(!out.markdown.contains("tracking comment"));
    assert!(!out.markdown.contains("nav"));
    assert!(!out.markdown.contains("Accept cookies"));
    assert!(out.markdown.contains("body text"));
}

#[test]
fn main_content_priority_prefers_main_over_body() {
    let html = r#"<html><body>
        <div>outside</div>
        <article><h1>Inside</h1><p>article text</p></article>
    </body></html>"#;
    let out = page(html, "http://site/");
    assert!(out.markdown.contains("article text"));
    assert!(!out.markdown.contains("outside"));
}

#[test]
fn falls_back_to_body_and_then_placeholder() {
    let html = "<html><body><h1>Plain</h1><p>directly in body</p></body></html>";
    let out = page(html, "http://site/");
    assert!(out.markdown.contains("# Plain"));
    assert!(out.markdown.contains("directly in body"));

    let out = page("<html><body><div><span></span></div></body></html>", "http://site/");
    assert!(out.markdown.contains("*No content extracted*"));
}

#[test]
fn code_blocks_carry_language_class() {
    let html = r#"<html><body><main>
        <h1>Code</h1>
        <pre><code class="language-python">print("hi")</code></pre>
    </main></body></html>"#;
    let out = page(html, "http://site/");
    assert!(out.markdown.contains("```python"));
    assert!(out.markdown.contains("print(\"hi\")"));
}

#[test]
fn unordered_lists_use_dash_bullets() {
    let html = r#"<html><body><main>
        <h1>L</h1>
        <ul><li>one</li><li>two</li></ul>
        <ol><li>first</li><li>second</li></ol>
    </main></body></html>"#;
    let out = page(html, "http://site/");
    assert!(out.markdown.contains("- one"));
    assert!(out.markdown.contains("- two"));
    assert!(out.markdown.contains("1. first"));
    assert!(out.markdown.contains("2. second"));
}

#[test]
fn links_resolve_rewrite_and_passthrough() {
    let html = r##"<html><body><main>
        <p><a href="relative/path">rel</a></p>
        <p><a href="https://other.example.com/abs">abs</a></p>
        <p><a href="mailto:a@b.c">mail</a></p>
        <p><a href="#frag">frag</a></p>
        <p><a href="/x"></a></p>
        <p><a>bare text</a></p>
    </main></body></html>"##;
    let out = page(html, "http://site/docs/page");

    assert!(out.markdown.contains("[rel](http://site/docs/relative/path)"));
    assert!(out.markdown.contains("[abs](https://other.example.com/abs)"));
    assert!(out.markdown.contains("[mail](mailto:a@b.c)"));
    assert!(out.markdown.contains("[frag](#frag)"));
    // No text and no href collapse away rather than emitting empty links.
    assert!(!out.markdown.contains("[](http://site/x)"));
    assert!(out.markdown.contains("bare text"));
    assert!(!out.markdown.contains("[bare text]"));
}

#[test]
fn harvests_links_without_anchors_mailto_or_javascript() {
    let html = r#"<html><body><main>
        <a href="/a">a</a>
        <a href="/a#section">a again</a>
        <a href="mailto:x@y.z">mail</a>
        <a href="tel:+123">tel</a>
        <a href="javascript:void(0)">js</a>
        <a href="https://other.example.com/b">b</a>
    </main></body></html>"#;
    let out = page(html, "http://site/");

    let links: Vec<&str> = out.links.iter().map(Url::as_str).collect();
    assert_eq!(links, vec!["http://site/a", "https://other.example.com/b"]);
}

#[test]
fn images_resolve_relative_src() {
    let html = r#"<html><body><main>
        <h1>Pics</h1>
        <p><img src="/img/logo.svg" alt="Logo"> and <img src="data:image/png;base64,AA" alt="inline"></p>
    </main></body></html>"#;
    let out = page(html, "http://site/docs/");
    assert!(out.markdown.contains("![Logo](http://site/img/logo.svg)"));
    assert!(out.markdown.contains("![inline](data:image/png;base64,AA)"));
}

#[test]
fn tables_become_markdown_tables() {
    let html = r#"<html><body><main>
        <h1>Data</h1>
        <table>
            <thead><tr><th>Name</th><th>Value</th></tr></thead>
            <tbody><tr><td>foo</td><td>bar</td></tr></tbody>
        </table>
    </main></body></html>"#;
    let out = page(html, "http://site/");
    assert!(out.markdown.contains("| Name | Value |"));
    assert!(out.markdown.contains("| --- | --- |"));
    assert!(out.markdown.contains("| foo | bar |"));
}

#[test]
fn blockquotes_and_rules_render() {
    let html = r#"<html><body><main>
        <h1>Q</h1>
        <blockquote><p>quoted line</p></blockquote>
        <hr>
        <p>after</p>
    </main></body></html>"#;
    let out = page(html, "http://site/");
    assert!(out.markdown.contains("> quoted line"));
    assert!(out.markdown.contains("---"));
    assert!(out.markdown.contains("after"));
}

#[test]
fn post_clean_collapses_blank_runs_and_spaces() {
    let input = "# T\n\n\n\nline  with   spaces\n- \ntrailing ws  \n";
    let out = post_clean(input);
    assert_eq!(out, "# T\n\nline with spaces\ntrailing ws");
}

#[test]
fn post_clean_demotes_empty_links_to_text() {
    assert_eq!(post_clean("see [the guide]()"), "see the guide");
}

#[test]
fn post_clean_leaves_code_fences_alone() {
    let input = "```text\ntwo  spaces   kept\n\n\n\n```\nprose  collapsed\n";
    let out = post_clean(input);
    assert!(out.contains("two  spaces   kept"));
    assert!(out.contains("prose collapsed"));
}

#[test]
fn inline_formatting_renders() {
    let html = r#"<html><body><main>
        <h1>F</h1>
        <p>Some <strong>bold</strong>, <em>italic</em>, and <code>inline()</code> text.</p>
    </main></body></html>"#;
    let out = page(html, "http://site/");
    assert!(out.markdown.contains("**bold**"));
    assert!(out.markdown.contains("*italic*"));
    assert!(out.markdown.contains("`inline()`"));
}
