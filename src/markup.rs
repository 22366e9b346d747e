//! Helpers for pulling text out of parsed HTML.
//!
//! Documents are `scraper`/`ego_tree` arenas, so nodes are addressed by
//! [`NodeId`]. Nothing here mutates a tree: removing "cruft" means collecting
//! the ids of the unwanted subtrees into an [`Excluded`] set and having the
//! renderer skip them.

use std::collections::HashSet;

use ego_tree::{NodeId, NodeRef};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};

/// Subtrees to leave out when rendering.
pub type Excluded = HashSet<NodeId>;

/// Elements that do not start a new line when rendered.
const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "acronym", "b", "basefont", "bdo", "big", "cite", "code", "dfn", "em", "font",
    "i", "img", "input", "kbd", "label", "q", "s", "samp", "select", "small", "span", "strike",
    "strong", "sub", "sup", "textarea", "tt", "u", "var", "applet", "button", "del", "iframe",
    "ins", "map", "object", "script",
];

static MULTISPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]+$").unwrap());
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// Value of an attribute, or `""` if it is absent.
pub fn get_attr<'a>(el: ElementRef<'a>, name: &str) -> &'a str {
    el.value().attr(name).unwrap_or("")
}

/// Concatenated text of every text node under `node`. Comments are ignored.
pub fn text_content(node: NodeRef<'_, Node>) -> String {
    let mut out = String::new();
    for descendant in node.descendants() {
        if let Node::Text(text) = descendant.value() {
            out.push_str(text);
        }
    }
    out
}

/// Reduce every whitespace run to a single space and trim both ends.
///
/// ```ignore
/// assert_eq!(compress_space("  a\n\tb "), "a b");
/// ```
pub fn compress_space(s: &str) -> String {
    MULTISPACE.replace_all(s, " ").trim().to_string()
}

/// Ids of all comment nodes under `node`.
pub fn comments(node: NodeRef<'_, Node>) -> Excluded {
    node.descendants()
        .filter(|n| n.value().is_comment())
        .map(|n| n.id())
        .collect()
}

/// Add every element under `scope` matching `selector` to `excluded`.
pub fn exclude_matches(scope: ElementRef<'_>, selector: &Selector, excluded: &mut Excluded) {
    excluded.extend(scope.select(selector).map(|el| el.id()));
}

/// Render `node` as plain text.
///
/// Block-level elements start and end a line, inline elements do not, `<br>`
/// forces a break, comments and anything in `excluded` are dropped. Runs of two
/// or more blank lines collapse to exactly one.
pub fn render_text(node: NodeRef<'_, Node>, excluded: &Excluded) -> String {
    let mut out = String::new();
    render_into(node, excluded, &mut out);
    normalize_text(&out)
}

/// Render an HTML fragment (e.g. a feed body) as plain text.
pub fn render_fragment(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    render_text(fragment.tree.root(), &Excluded::new())
}

/// Tidy rendered text: blank out whitespace-only lines, collapse runs of blank
/// lines to one, drop leading and trailing line breaks.
pub fn normalize_text(s: &str) -> String {
    let s = s.replace("\r\n", "\n").replace('\r', "\n");
    let s = BLANK_LINE.replace_all(&s, "");
    let s = BLANK_RUN.replace_all(&s, "\n\n");
    s.trim_matches('\n').to_string()
}

fn render_into(node: NodeRef<'_, Node>, excluded: &Excluded, out: &mut String) {
    if excluded.contains(&node.id()) {
        return;
    }
    match node.value() {
        Node::Text(text) => out.push_str(text),
        Node::Element(el) => {
            let tag = el.name();
            if tag == "br" {
                out.push('\n');
                return;
            }
            let block = !INLINE_TAGS.contains(&tag);
            if block {
                out.push('\n');
            }
            for child in node.children() {
                render_into(child, excluded, out);
            }
            if block {
                out.push('\n');
            }
        }
        Node::Document | Node::Fragment => {
            for child in node.children() {
                render_into(child, excluded, out);
            }
        }
        _ => {}
    }
}

/// Short CSS-ish description of a node for debug logs, e.g. `<div#main.body>`.
pub fn describe_node(node: NodeRef<'_, Node>) -> String {
    match node.value() {
        Node::Element(el) => {
            let mut desc = el.name().to_string();
            if let Some(id) = el.id() {
                desc.push('#');
                desc.push_str(id);
            }
            for class in el.classes() {
                desc.push('.');
                desc.push_str(class);
            }
            format!("<{desc}>")
        }
        Node::Text(text) => format!("{{text}} {:?}", &**text),
        Node::Document => "{document}".to_string(),
        Node::Fragment => "{fragment}".to_string(),
        Node::Comment(_) => "{comment}".to_string(),
        Node::Doctype(_) => "{doctype}".to_string(),
        Node::ProcessingInstruction(_) => "{pi}".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first<'a>(doc: &'a Html, css: &str) -> ElementRef<'a> {
        let sel = Selector::parse(css).unwrap();
        doc.select(&sel).next().unwrap()
    }

    #[test]
    fn test_compress_space() {
        assert_eq!(compress_space("  a\n\tb "), "a b");
        assert_eq!(compress_space(""), "");
        assert_eq!(compress_space("one"), "one");
    }

    #[test]
    fn test_render_plain_string_is_identity() {
        assert_eq!(render_fragment("hello world"), "hello world");
        assert_eq!(render_fragment("line one\nline two"), "line one\nline two");
        assert_eq!(normalize_text("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_render_paragraphs_break_lines() {
        let out = render_fragment("<p>a</p><p>b</p>");
        assert!(out.starts_with('a'));
        assert!(out.ends_with('b'));
        assert!(out.contains("a\n"));
        assert!(!out.contains("ab"));
    }

    #[test]
    fn test_inline_elements_stay_on_line() {
        assert_eq!(
            render_fragment("<p>Hello <b>bold</b> and <a href=\"#\">link</a>.</p>"),
            "Hello bold and link."
        );
        assert_eq!(render_fragment("one<br>two"), "one\ntwo");
    }

    #[test]
    fn test_blank_line_runs_collapse_to_one() {
        assert_eq!(normalize_text("a\n\n\n\nb"), "a\n\nb");
        assert_eq!(normalize_text("a\n  \n\t\n \nb"), "a\n\nb");
        let out = render_fragment("<div><div><p>a</p></div></div><div><div><p>b</p></div></div>");
        assert_eq!(out, "a\n\nb");
    }

    #[test]
    fn test_comments_are_dropped() {
        let out = render_fragment("<p>keep<!-- secret --> this</p>");
        assert_eq!(out, "keep this");

        let doc = Html::parse_fragment("<div><!-- a --><p>x</p><!-- b --></div>");
        assert_eq!(comments(doc.tree.root()).len(), 2);
    }

    #[test]
    fn test_excluded_subtrees_are_not_rendered() {
        let doc = Html::parse_document(
            r#"<div id="body"><p>Real news.</p><div class="share">Tweet this</div><p>More.</p></div>"#,
        );
        let body = first(&doc, "#body");
        let mut excluded = Excluded::new();
        exclude_matches(body, &Selector::parse(".share").unwrap(), &mut excluded);
        assert_eq!(excluded.len(), 1);

        let out = render_text(*body, &excluded);
        assert!(out.contains("Real news."));
        assert!(out.contains("More."));
        assert!(!out.contains("Tweet"));

        // The tree itself is untouched.
        assert!(text_content(*body).contains("Tweet this"));
    }

    #[test]
    fn test_get_attr_and_describe() {
        let doc = Html::parse_document(r#"<a id="x" class="big red" href="/pr/1">go</a>"#);
        let a = first(&doc, "a");
        assert_eq!(get_attr(a, "href"), "/pr/1");
        assert_eq!(get_attr(a, "title"), "");
        assert_eq!(describe_node(*a), "<a#x.big.red>");
    }
}
