use pulldown_cmark::{html, Event, Options, Parser};

/// Render model output (markdown) to HTML for the conversation pane.
///
/// Raw HTML in the source is emitted as escaped text, so a reply can never
/// inject markup into the page.
pub fn render_markdown(markdown: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(markdown, options).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        other => other,
    });

    let mut html_output = String::new();
    html::push_html(&mut html_output, parser);
    html_output
}
