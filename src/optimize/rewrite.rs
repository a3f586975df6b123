use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
    rc::Rc,
};

use lol_html::{
    EndTagHandler, RewriteStrSettings, doc_comments, doc_text, element,
    errors::RewritingError,
    html_content::{ContentType, EndTag},
    rewrite_str,
};

use super::hints::{CRITICAL_CSS_ID, FONT_PRELOAD_SENTINEL, GOOGLE_FONTS_CSS};

/// What a page already carries before any injection.
#[derive(Debug, Default, Clone)]
pub(crate) struct DocumentFacts {
    pub has_head: bool,
    pub has_charset: bool,
    pub has_viewport: bool,
    pub has_critical_css: bool,
    pub font_preloaded: bool,
    pub font_stylesheet: Option<String>,
    /// `"{rel} {href}"` for every `<link>` in the document.
    pub links: HashSet<String>,
}

impl DocumentFacts {
    pub fn has_link(&self, rel: &str, href: &str) -> bool {
        self.links.contains(&link_key(rel, href))
    }
}

fn link_key(rel: &str, href: &str) -> String {
    format!("{} {}", rel.trim().to_ascii_lowercase(), href.trim())
}

/// Markup to place at the start and the end of `<head>`.
#[derive(Debug, Default, Clone)]
pub(crate) struct RewritePlan {
    pub head_start: String,
    pub head_end: String,
}

pub(crate) fn scan(html: &str) -> Result<DocumentFacts, RewritingError> {
    let facts = Rc::new(RefCell::new(DocumentFacts::default()));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("head", {
                    let facts = Rc::clone(&facts);
                    move |_| {
                        facts.borrow_mut().has_head = true;
                        Ok(())
                    }
                }),
                element!("meta", {
                    let facts = Rc::clone(&facts);
                    move |el| {
                        let mut facts = facts.borrow_mut();
                        if el.has_attribute("charset") {
                            facts.has_charset = true;
                        }
                        if el
                            .get_attribute("name")
                            .is_some_and(|name| name.trim().eq_ignore_ascii_case("viewport"))
                        {
                            facts.has_viewport = true;
                        }
                        Ok(())
                    }
                }),
                element!("style", {
                    let facts = Rc::clone(&facts);
                    move |el| {
                        if el.get_attribute("id").as_deref() == Some(CRITICAL_CSS_ID) {
                            facts.borrow_mut().has_critical_css = true;
                        }
                        Ok(())
                    }
                }),
                element!("link[href]", {
                    let facts = Rc::clone(&facts);
                    move |el| {
                        let Some(href) = el.get_attribute("href") else {
                            return Ok(());
                        };
                        let rel = el.get_attribute("rel").unwrap_or_default();
                        let mut facts = facts.borrow_mut();
                        if facts.font_stylesheet.is_none()
                            && is_google_fonts_stylesheet(&href)
                            && !rel.eq_ignore_ascii_case("preload")
                        {
                            facts.font_stylesheet = Some(with_display_swap(&href));
                        }
                        facts.links.insert(link_key(&rel, &href));
                        Ok(())
                    }
                }),
            ],
            document_content_handlers: vec![doc_comments!({
                let facts = Rc::clone(&facts);
                move |comment| {
                    if comment.text().trim() == FONT_PRELOAD_SENTINEL {
                        facts.borrow_mut().font_preloaded = true;
                    }
                    Ok(())
                }
            })],
            ..RewriteStrSettings::default()
        },
    )?;

    let facts = facts.borrow().clone();
    Ok(facts)
}

pub(crate) fn rewrite(html: &str, plan: &RewritePlan) -> Result<String, RewritingError> {
    // Open pre/textarea/script/style elements; text inside them is left alone.
    let raw_depth = Rc::new(Cell::new(0usize));
    let trailing_space = Rc::new(Cell::new(false));
    let head_seen = Rc::new(Cell::new(false));

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("pre, textarea, script, style", {
                    let raw_depth = Rc::clone(&raw_depth);
                    move |el| {
                        let Some(handlers) = el.end_tag_handlers() else {
                            return Ok(());
                        };
                        raw_depth.set(raw_depth.get() + 1);
                        let raw_depth = Rc::clone(&raw_depth);
                        let close: EndTagHandler<'static> =
                            Box::new(move |_end: &mut EndTag<'_>| {
                                raw_depth.set(raw_depth.get().saturating_sub(1));
                                Ok(())
                            });
                        handlers.push(close);
                        Ok(())
                    }
                }),
                element!("head", {
                    let head_seen = Rc::clone(&head_seen);
                    let head_start = plan.head_start.clone();
                    let head_end = plan.head_end.clone();
                    move |el| {
                        if head_seen.replace(true) {
                            return Ok(());
                        }
                        if !head_start.is_empty() {
                            el.prepend(&head_start, ContentType::Html);
                        }
                        if head_end.is_empty() {
                            return Ok(());
                        }
                        // An omitted `</head>` gets no end markup.
                        if let Some(handlers) = el.end_tag_handlers() {
                            let head_end = head_end.clone();
                            let inject: EndTagHandler<'static> =
                                Box::new(move |end: &mut EndTag<'_>| {
                                    end.before(&head_end, ContentType::Html);
                                    Ok(())
                                });
                            handlers.push(inject);
                        }
                        Ok(())
                    }
                }),
                element!("img", |el| {
                    if el.has_attribute("loading") || el.has_attribute("data-src") {
                        return Ok(());
                    }
                    el.set_attribute("loading", "lazy")?;
                    if !el.has_attribute("decoding") {
                        el.set_attribute("decoding", "async")?;
                    }
                    if let Some(src) = el.get_attribute("src")
                        && let Some(webp) = webp_variant(&src)
                    {
                        el.set_attribute("data-webp", &webp)?;
                    }
                    Ok(())
                }),
                element!("link[href]", |el| {
                    if let Some(href) = el.get_attribute("href")
                        && is_google_fonts_stylesheet(&href)
                    {
                        let swapped = with_display_swap(&href);
                        if swapped != href {
                            el.set_attribute("href", &swapped)?;
                        }
                    }
                    Ok(())
                }),
            ],
            document_content_handlers: vec![
                doc_comments!(|comment| {
                    if !keeps_comment(&comment.text()) {
                        comment.remove();
                    }
                    Ok(())
                }),
                doc_text!({
                    let raw_depth = Rc::clone(&raw_depth);
                    let trailing_space = Rc::clone(&trailing_space);
                    move |chunk| {
                        if raw_depth.get() == 0 {
                            let (collapsed, ends_in_space) =
                                collapse_whitespace(chunk.as_str(), trailing_space.get());
                            if collapsed != chunk.as_str() {
                                chunk.replace(&collapsed, ContentType::Html);
                            }
                            trailing_space.set(ends_in_space);
                        }
                        if chunk.last_in_text_node() {
                            trailing_space.set(false);
                        }
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
}

fn keeps_comment(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.starts_with("[if") || trimmed.starts_with("<![endif]") || trimmed == FONT_PRELOAD_SENTINEL
}

/// Collapses runs of HTML whitespace to one space. `after_space` carries the
/// state of the previous chunk of the same text node.
fn collapse_whitespace(text: &str, after_space: bool) -> (String, bool) {
    let mut out = String::with_capacity(text.len());
    let mut in_space = after_space;
    for ch in text.chars() {
        if matches!(ch, ' ' | '\t' | '\n' | '\r' | '\x0C') {
            if !in_space {
                out.push(' ');
                in_space = true;
            }
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    (out, in_space)
}

pub(crate) fn is_google_fonts_stylesheet(href: &str) -> bool {
    href.contains(GOOGLE_FONTS_CSS)
}

pub(crate) fn with_display_swap(href: &str) -> String {
    if href.contains("display=") {
        return href.to_string();
    }
    let separator = if href.contains('?') { '&' } else { '?' };
    format!("{href}{separator}display=swap")
}

/// `photo.JPG` → `photo.webp`. Query strings and fragments disqualify the
/// source.
pub(crate) fn webp_variant(src: &str) -> Option<String> {
    let lower = src.to_ascii_lowercase();
    let stem_len = [".jpeg", ".jpg", ".png"]
        .iter()
        .find(|ext| lower.ends_with(*ext))
        .map(|ext| src.len() - ext.len())?;
    Some(format!("{}.webp", &src[..stem_len]))
}
