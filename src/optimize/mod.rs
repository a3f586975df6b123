//! HTML page optimization.
//!
//! Pages go through two `lol_html` passes. The first pass only observes the
//! document (existing meta tags, font stylesheets, the preload sentinel); the
//! second pass applies every rewrite in one stream, using what the first pass
//! found to avoid injecting markup the page already has.

pub mod hints;
pub mod manifest;
mod rewrite;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::config::OptimizeSettings;

use self::{
    hints::{
        CRITICAL_CSS, CRITICAL_CSS_ID, DEFAULT_CHARSET, DEFAULT_VIEWPORT, DNS_PREFETCH_ORIGINS,
        FONT_PRELOAD_SENTINEL, PRECONNECT_ORIGINS, escape_attribute, requote_attribute,
    },
    manifest::{Preload, load_preloads},
    rewrite::{DocumentFacts, RewritePlan},
};

pub use self::manifest::{ManifestError, PreloadKind};

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("html rewrite failed: {0}")]
    Rewrite(#[from] lol_html::errors::RewritingError),
}

#[derive(Debug, Clone)]
pub struct HtmlOptimizer {
    manifest_path: PathBuf,
    asset_base: String,
    critical_css: String,
}

impl HtmlOptimizer {
    pub fn new(
        manifest_path: impl Into<PathBuf>,
        asset_base: impl Into<String>,
        critical_css: impl Into<String>,
    ) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            asset_base: asset_base.into(),
            critical_css: critical_css.into(),
        }
    }

    /// Builds the optimizer, reading the critical stylesheet override when configured.
    pub async fn from_settings(settings: &OptimizeSettings) -> Self {
        let critical_css = match settings.critical_css_path.as_deref() {
            Some(path) => read_critical_css(path).await,
            None => CRITICAL_CSS.to_string(),
        };
        Self::new(
            settings.manifest_path.clone(),
            settings.asset_base.clone(),
            critical_css,
        )
    }

    pub fn critical_css(&self) -> &str {
        &self.critical_css
    }

    /// Preload candidates from the build manifest. Read failures are logged
    /// and yield an empty list.
    pub async fn preloads(&self) -> Vec<Preload> {
        match load_preloads(&self.manifest_path, &self.asset_base).await {
            Ok(preloads) => preloads,
            Err(err) => {
                warn!(
                    target = "reelhouse::optimize",
                    path = %self.manifest_path.display(),
                    error = %err,
                    "skipping manifest preloads"
                );
                Vec::new()
            }
        }
    }

    pub fn optimize(&self, html: &str, preloads: &[Preload]) -> Result<String, OptimizeError> {
        let facts = rewrite::scan(html)?;
        let plan = self.plan(&facts, preloads);
        Ok(rewrite::rewrite(html, &plan)?)
    }

    fn plan(&self, facts: &DocumentFacts, preloads: &[Preload]) -> RewritePlan {
        if !facts.has_head {
            return RewritePlan::default();
        }

        let mut head_start = String::new();
        if !facts.has_charset {
            head_start.push_str(&format!("<meta charset=\"{DEFAULT_CHARSET}\">"));
        }
        if !facts.has_viewport {
            head_start.push_str(&format!(
                "<meta name=\"viewport\" content=\"{DEFAULT_VIEWPORT}\">"
            ));
        }

        for (origin, crossorigin) in PRECONNECT_ORIGINS {
            if facts.has_link("preconnect", origin) {
                continue;
            }
            let crossorigin = if *crossorigin { " crossorigin" } else { "" };
            head_start.push_str(&format!(
                "<link rel=\"preconnect\" href=\"{origin}\"{crossorigin}>"
            ));
        }
        for origin in DNS_PREFETCH_ORIGINS {
            if !facts.has_link("dns-prefetch", origin) {
                head_start.push_str(&format!("<link rel=\"dns-prefetch\" href=\"{origin}\">"));
            }
        }

        for preload in preloads {
            if facts.has_link("preload", &preload.href) {
                continue;
            }
            head_start.push_str(&format!(
                "<link rel=\"preload\" href=\"{}\" as=\"{}\">",
                escape_attribute(&preload.href),
                preload.kind.as_str()
            ));
        }

        if let Some(font) = facts.font_stylesheet.as_deref()
            && !facts.font_preloaded
        {
            head_start.push_str(&format!(
                "<link rel=\"preload\" as=\"style\" href=\"{}\"><!-- {FONT_PRELOAD_SENTINEL} -->",
                requote_attribute(font)
            ));
        }

        let head_end = if facts.has_critical_css {
            String::new()
        } else {
            format!(
                "<style id=\"{CRITICAL_CSS_ID}\">{}</style>",
                self.critical_css
            )
        };

        RewritePlan {
            head_start,
            head_end,
        }
    }
}

async fn read_critical_css(path: &Path) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(css) => css,
        Err(err) => {
            warn!(
                target = "reelhouse::optimize",
                path = %path.display(),
                error = %err,
                "falling back to built-in critical css"
            );
            CRITICAL_CSS.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn optimizer() -> HtmlOptimizer {
        HtmlOptimizer::new("/nonexistent/manifest.json", "/build/", "body{margin:0}")
    }

    const PAGE: &str = "<!DOCTYPE html><html><head><title>Home</title>\
        <link rel=\"stylesheet\" href=\"https://fonts.googleapis.com/css2?family=Inter\">\
        </head><body><img src=\"/poster.png\"></body></html>";

    #[test]
    fn full_page_gets_every_injection() {
        let preloads = vec![Preload {
            href: "/build/assets/app.css".into(),
            kind: PreloadKind::Style,
        }];
        let out = optimizer().optimize(PAGE, &preloads).expect("optimize");

        assert!(out.starts_with("<!DOCTYPE html><html><head><meta charset=\"utf-8\">"));
        assert!(out.contains(
            "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">"
        ));
        assert!(out.contains("<link rel=\"preconnect\" href=\"https://fonts.gstatic.com\" crossorigin>"));
        assert!(out.contains("<link rel=\"dns-prefetch\" href=\"https://cdn.jsdelivr.net\">"));
        assert!(out.contains("<link rel=\"preload\" href=\"/build/assets/app.css\" as=\"style\">"));
        assert!(out.contains(
            "<link rel=\"preload\" as=\"style\" href=\"https://fonts.googleapis.com/css2?family=Inter&display=swap\">\
             <!-- reelhouse:font-preload -->"
        ));
        assert!(out.contains(
            "href=\"https://fonts.googleapis.com/css2?family=Inter&display=swap\">\
             <style id=\"critical-css\">body{margin:0}</style></head>"
        ));
        assert!(out.contains(
            "<img src=\"/poster.png\" loading=\"lazy\" decoding=\"async\" data-webp=\"/poster.webp\">"
        ));
    }

    #[test]
    fn second_pass_adds_nothing() {
        let optimizer = optimizer();
        let preloads = vec![Preload {
            href: "/build/assets/app.js".into(),
            kind: PreloadKind::Script,
        }];
        let once = optimizer.optimize(PAGE, &preloads).expect("first pass");
        let twice = optimizer.optimize(&once, &preloads).expect("second pass");
        assert_eq!(once, twice);
    }

    #[test]
    fn existing_meta_tags_are_kept() {
        let html = "<html><head><meta charset=\"iso-8859-1\">\
                    <meta name=\"viewport\" content=\"width=1024\"></head></html>";
        let out = optimizer().optimize(html, &[]).expect("optimize");
        assert!(!out.contains("utf-8"));
        assert!(!out.contains("initial-scale"));
    }

    #[test]
    fn fragment_without_head_is_only_cleaned() {
        let out = optimizer()
            .optimize("<div>\n  <!-- x --><img src=\"a.gif\">\n</div>", &[])
            .expect("optimize");
        assert_eq!(
            out,
            "<div> <img src=\"a.gif\" loading=\"lazy\" decoding=\"async\"> </div>"
        );
    }

    #[tokio::test]
    async fn unreadable_manifest_yields_no_preloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("manifest.json");
        tokio::fs::write(&path, b"{broken").await.expect("write");
        let optimizer = HtmlOptimizer::new(path, "/build/", "");
        assert!(optimizer.preloads().await.is_empty());
    }

    #[tokio::test]
    async fn critical_css_override_falls_back_when_missing() {
        let settings = OptimizeSettings {
            manifest_path: PathBuf::from("manifest.json"),
            asset_base: "/build/".into(),
            critical_css_path: Some(PathBuf::from("/nonexistent/critical.css")),
        };
        let optimizer = HtmlOptimizer::from_settings(&settings).await;
        assert_eq!(optimizer.critical_css(), CRITICAL_CSS);
    }
}
