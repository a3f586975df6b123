//! Fixed markup injected into every optimized page.

/// Origins the browser should open connections to early.
pub const PRECONNECT_ORIGINS: &[(&str, bool)] = &[
    ("https://fonts.googleapis.com", false),
    ("https://fonts.gstatic.com", true),
    ("https://image.tmdb.org", false),
];

/// Origins that only get a DNS lookup ahead of time.
pub const DNS_PREFETCH_ORIGINS: &[&str] = &[
    "https://www.googletagmanager.com",
    "https://cdn.jsdelivr.net",
];

/// Marks a page that already carries the font preload link.
pub const FONT_PRELOAD_SENTINEL: &str = "reelhouse:font-preload";

pub const DEFAULT_CHARSET: &str = "utf-8";
pub const DEFAULT_VIEWPORT: &str = "width=device-width, initial-scale=1";

/// `id` of the inline critical stylesheet, also used to avoid injecting it twice.
pub const CRITICAL_CSS_ID: &str = "critical-css";

/// Above-the-fold styles for the layout shell, poster grid and player.
pub const CRITICAL_CSS: &str = concat!(
    "*,*::before,*::after{box-sizing:border-box}",
    "html{-webkit-text-size-adjust:100%;line-height:1.5}",
    "body{margin:0;background:#0b0b0f;color:#e5e7eb;",
    "font-family:Inter,system-ui,-apple-system,'Segoe UI',Roboto,sans-serif}",
    "img,video{max-width:100%;height:auto;display:block}",
    "a{color:inherit;text-decoration:none}",
    ".site-header{position:sticky;top:0;z-index:40;display:flex;align-items:center;",
    "justify-content:space-between;height:64px;padding:0 1rem;background:rgba(11,11,15,.92)}",
    ".container{width:100%;max-width:1280px;margin:0 auto;padding:0 1rem}",
    ".poster-grid{display:grid;grid-template-columns:repeat(auto-fill,minmax(150px,1fr));gap:1rem}",
    ".poster{aspect-ratio:2/3;border-radius:.5rem;background:#1f2937;overflow:hidden}",
    ".player{position:relative;aspect-ratio:16/9;background:#000}",
    "[loading=lazy]{content-visibility:auto}",
);

/// Start of a Google Fonts stylesheet URL.
pub const GOOGLE_FONTS_CSS: &str = "fonts.googleapis.com/css";

pub(crate) fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\n' | '\r' | '\t' => escaped.push(' '),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// For values read back from the document, which are already entity-encoded.
pub(crate) fn requote_attribute(raw: &str) -> String {
    raw.replace('"', "&quot;")
}
