//! Markdown to HTML rendering for assistant replies.
//!
//! Uses comrak for CommonMark parsing. Raw HTML in model output is not passed
//! through.

use comrak::{Options, markdown_to_html};

/// Render markdown to HTML.
///
/// Tables, strikethrough and bare-URL autolinks are enabled on top of
/// CommonMark.
#[must_use]
pub fn render_markdown(content: &str) -> String {
    let mut options = Options::default();
    options.extension.table = true;
    options.extension.strikethrough = true;
    options.extension.autolink = true;

    markdown_to_html(content, &options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headings_and_bullets() {
        let html = render_markdown("# Title\n\n## Sub\n\n* one\n* two\n");

        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<h2>Sub</h2>"));
        assert!(html.contains("<ul>"));
        assert!(html.contains("<li>one</li>"));
        assert!(html.contains("<li>two</li>"));
    }

    #[test]
    fn test_plain_text_becomes_paragraph() {
        assert_eq!(render_markdown("Hello there"), "<p>Hello there</p>\n");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(render_markdown(""), "");
    }

    #[test]
    fn test_tables_enabled() {
        let html = render_markdown("| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(html.contains("<table>"));
        assert!(html.contains("<td>1</td>"));
    }

    #[test]
    fn test_raw_html_is_not_passed_through() {
        let html = render_markdown("<script>alert(1)</script>\n\nok");
        assert!(!html.contains("<script>"));
        assert!(html.contains("<p>ok</p>"));
    }

    #[test]
    fn test_code_is_escaped() {
        let html = render_markdown("`a < b`");
        assert!(html.contains("<code>a &lt; b</code>"));
    }
}
