// src/inject.rs

/// Id of the injected `<script>` element; its presence means a page was already processed.
pub const INJECT_MARKER: &[u8] = b"__livesite_injected__";

/// Client script: SSE-driven reload plus the `?inspect=1` selector picker.
pub const RELOAD_SNIPPET: &str = include_str!("../static/livereload.html");

/// Inserts the reload snippet before the last `</body>` (any case), or
/// appends it when the document has none. Already-injected documents are
/// returned unchanged.
pub fn inject_reload_script(html: Vec<u8>) -> Vec<u8> {
    if contains(&html, INJECT_MARKER) {
        return html;
    }

    let snippet = RELOAD_SNIPPET.as_bytes();
    let mut out = Vec::with_capacity(html.len() + snippet.len());
    match rfind_ignore_ascii_case(&html, b"</body>") {
        Some(idx) => {
            out.extend_from_slice(&html[..idx]);
            out.extend_from_slice(snippet);
            out.extend_from_slice(&html[idx..]);
        }
        None => {
            out.extend_from_slice(&html);
            out.extend_from_slice(snippet);
        }
    }
    out
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn rfind_ignore_ascii_case(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|w| w.eq_ignore_ascii_case(needle))
}
