//! Static files written into the public directory by `reelhouse optimize`.
//!
//! Generation is best effort: a file that fails to render or write is logged
//! and skipped, and the rest are still produced. Existing files are kept
//! unless the caller forces a rewrite.

use std::{
    io,
    path::{Path, PathBuf},
};

use askama::Template;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{
    application::sitemap::{SitemapError, SitemapService, default_robots_txt},
    infra::http::{HTML_MAX_AGE, JSON_MAX_AGE},
};

const TARGET: &str = "reelhouse::generate";

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("failed to write `{path}`: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to render `{file}`: {source}")]
    Template {
        file: &'static str,
        source: askama::Error,
    },
    #[error("failed to encode structured data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to render sitemap index: {0}")]
    Sitemap(#[from] SitemapError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedFile {
    Robots,
    CriticalCss,
    StructuredData,
    Htaccess,
    NginxConf,
    SitemapIndex,
}

impl GeneratedFile {
    pub const ALL: [GeneratedFile; 6] = [
        GeneratedFile::Robots,
        GeneratedFile::CriticalCss,
        GeneratedFile::StructuredData,
        GeneratedFile::Htaccess,
        GeneratedFile::NginxConf,
        GeneratedFile::SitemapIndex,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            GeneratedFile::Robots => "robots.txt",
            GeneratedFile::CriticalCss => "critical.css",
            GeneratedFile::StructuredData => "structured-data.json",
            GeneratedFile::Htaccess => ".htaccess",
            GeneratedFile::NginxConf => "nginx-pagespeed.conf",
            GeneratedFile::SitemapIndex => "sitemap.xml",
        }
    }
}

/// Outcome of one generation run, by file name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GenerateReport {
    pub written: Vec<&'static str>,
    pub kept: Vec<&'static str>,
    pub failed: Vec<&'static str>,
}

#[derive(Template)]
#[template(path = "generated/htaccess.txt", escape = "none")]
struct HtaccessTemplate<'a> {
    site_name: &'a str,
    html_max_age: i64,
    json_max_age: i64,
}

#[derive(Template)]
#[template(path = "generated/nginx-pagespeed.conf", escape = "none")]
struct NginxTemplate<'a> {
    site_name: &'a str,
    host: &'a str,
}

pub struct StaticFiles {
    public_dir: PathBuf,
    site_name: String,
    public_url: Url,
    critical_css: String,
}

impl StaticFiles {
    pub fn new(
        public_dir: impl Into<PathBuf>,
        site_name: impl Into<String>,
        public_url: Url,
        critical_css: impl Into<String>,
    ) -> Self {
        Self {
            public_dir: public_dir.into(),
            site_name: site_name.into(),
            public_url,
            critical_css: critical_css.into(),
        }
    }

    pub fn public_dir(&self) -> &Path {
        &self.public_dir
    }

    /// Writes every generated file. `sitemap.xml` is only produced when a
    /// sitemap service is available.
    pub async fn generate(&self, sitemap: Option<&SitemapService>, force: bool) -> GenerateReport {
        let mut report = GenerateReport::default();

        if let Err(source) = tokio::fs::create_dir_all(&self.public_dir).await {
            let err = GenerateError::Write {
                path: self.public_dir.clone(),
                source,
            };
            warn!(target = TARGET, error = %err, "public directory unavailable");
        }

        for file in GeneratedFile::ALL {
            if file == GeneratedFile::SitemapIndex && sitemap.is_none() {
                continue;
            }

            let path = self.public_dir.join(file.file_name());
            if !force && tokio::fs::try_exists(&path).await.unwrap_or(false) {
                report.kept.push(file.file_name());
                continue;
            }

            match self.write(file, &path, sitemap).await {
                Ok(()) => report.written.push(file.file_name()),
                Err(err) => {
                    warn!(target = TARGET, file = file.file_name(), error = %err, "skipping generated file");
                    report.failed.push(file.file_name());
                }
            }
        }

        info!(
            target = TARGET,
            written = report.written.len(),
            kept = report.kept.len(),
            failed = report.failed.len(),
            "generated static files"
        );
        report
    }

    async fn write(
        &self,
        file: GeneratedFile,
        path: &Path,
        sitemap: Option<&SitemapService>,
    ) -> Result<(), GenerateError> {
        let contents = self.render(file, sitemap).await?;
        tokio::fs::write(path, contents)
            .await
            .map_err(|source| GenerateError::Write {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn render(
        &self,
        file: GeneratedFile,
        sitemap: Option<&SitemapService>,
    ) -> Result<Vec<u8>, GenerateError> {
        let rendered = match file {
            GeneratedFile::Robots => default_robots_txt(&self.public_url),
            GeneratedFile::CriticalCss => self.critical_css.clone(),
            GeneratedFile::StructuredData => self.structured_data()?,
            GeneratedFile::Htaccess => HtaccessTemplate {
                site_name: &self.site_name,
                html_max_age: HTML_MAX_AGE,
                json_max_age: JSON_MAX_AGE,
            }
            .render()
            .map_err(|source| GenerateError::Template {
                file: file.file_name(),
                source,
            })?,
            GeneratedFile::NginxConf => NginxTemplate {
                site_name: &self.site_name,
                host: self.public_url.host_str().unwrap_or("localhost"),
            }
            .render()
            .map_err(|source| GenerateError::Template {
                file: file.file_name(),
                source,
            })?,
            GeneratedFile::SitemapIndex => match sitemap {
                Some(service) => return Ok(service.index_xml().await?.to_vec()),
                None => String::new(),
            },
        };
        Ok(rendered.into_bytes())
    }

    /// schema.org `WebSite` with a site search action.
    fn structured_data(&self) -> Result<String, GenerateError> {
        let base = self.public_url.as_str().trim_end_matches('/');
        let document = json!({
            "@context": "https://schema.org",
            "@type": "WebSite",
            "name": self.site_name,
            "url": format!("{base}/"),
            "potentialAction": {
                "@type": "SearchAction",
                "target": {
                    "@type": "EntryPoint",
                    "urlTemplate": format!("{base}/search?q={{search_term_string}}"),
                },
                "query-input": "required name=search_term_string",
            },
        });
        Ok(serde_json::to_string_pretty(&document)?)
    }
}

/// Deletes the files `optimize` writes, returning the names that were removed.
pub async fn clear_generated(public_dir: &Path) -> Vec<&'static str> {
    let mut removed = Vec::new();
    for file in GeneratedFile::ALL {
        let path = public_dir.join(file.file_name());
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed.push(file.file_name()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                let err = GenerateError::Write { path, source };
                warn!(target = TARGET, error = %err, "failed to delete generated file");
            }
        }
    }
    removed
}
