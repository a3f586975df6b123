use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use url::Url;

/// Command-line arguments for the Reelhouse binary.
#[derive(Debug, Parser)]
#[command(name = "reelhouse", version, about = "Reelhouse page-speed edge")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "REELHOUSE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the public and admin HTTP listeners.
    Serve(Box<ServeArgs>),
    /// Write robots.txt, critical.css, structured data and server snippets.
    #[command(name = "optimize")]
    Optimize(OptimizeArgs),
    /// Flush the running server's cache.
    #[command(name = "clear-all")]
    ClearAll(ClearAllArgs),
    /// Run the offline cache install step against a live origin.
    #[command(name = "precache")]
    Precache(PrecacheArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct PublicDirOverride {
    /// Override the public directory.
    #[arg(long = "public-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub public_dir: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub public_dir: PublicDirOverride,

    /// Override the public listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the administrative listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub server_admin_host: Option<String>,

    /// Override the public listener port.
    #[arg(long = "server-public-port", value_name = "PORT")]
    pub public_port: Option<u16>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Forward unrouted requests to this page renderer.
    #[arg(long = "upstream-url", value_name = "URL")]
    pub upstream_url: Option<String>,

    /// Override the number of entries kept by the process cache.
    #[arg(long = "cache-capacity", value_name = "COUNT")]
    pub cache_capacity: Option<u64>,

    /// Override the number of URLs per sitemap page.
    #[arg(long = "sitemap-page-size", value_name = "COUNT")]
    pub sitemap_page_size: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct OptimizeArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    #[command(flatten)]
    pub public_dir: PublicDirOverride,

    /// Overwrite generated files that already exist.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub force: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ClearAllArgs {
    #[command(flatten)]
    pub public_dir: PublicDirOverride,

    /// Also delete the files written by `optimize`.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub force: bool,
}

#[derive(Debug, Args, Clone)]
pub struct PrecacheArgs {
    /// Origin the offline caches are filled from.
    #[arg(value_name = "ORIGIN", value_hint = ValueHint::Url)]
    pub origin: Url,
}
