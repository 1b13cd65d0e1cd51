//! Safe rendering of assistant markdown.

use serde::Serialize;

/// HTML produced by [`render_safe`]; raw HTML from the input never survives
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SafeHtml(String);

impl SafeHtml {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The allow-list: GFM constructs, raw HTML escaped, unsafe link protocols dropped
fn render_options() -> markdown::Options {
    markdown::Options {
        parse: markdown::ParseOptions::gfm(),
        compile: markdown::CompileOptions {
            allow_dangerous_html: false,
            allow_dangerous_protocol: false,
            ..markdown::CompileOptions::gfm()
        },
    }
}

/// Render assistant text (bold, italics, code, lists, links) to HTML
pub fn render_safe(text: &str) -> SafeHtml {
    markdown::to_html_with_options(text, &render_options())
        .map(SafeHtml)
        .unwrap_or_else(|_| commonmark(text))
}

/// Plain CommonMark rendering; also escapes raw HTML and unsafe protocols
fn commonmark(text: &str) -> SafeHtml {
    SafeHtml(markdown::to_html(text))
}
