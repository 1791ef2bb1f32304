use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Containerised build and publish pipeline for a static blog
#[derive(Parser, Debug)]
#[command(
    name = "sitepack",
    about = "Build a static blog in containers and ship it as a web server image",
    version,
    author,
    long_about = "sitepack installs the site's dependencies and runs its static build inside \
                  containers, packages the output into a Caddy image exposing a single port, \
                  and optionally pushes that image to a container registry. It talks to the \
                  local Docker engine."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug logging")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - only log errors"
    )]
    pub quiet: bool,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Config file (defaults to sitepack.toml in the source directory)"
    )]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Install production dependencies into a build environment image",
        long_about = "Runs `bun install --frozen-lockfile --production` on the manifest and \
                      lockfile inside oven/bun:1, with the package cache on a named volume, \
                      and commits the result as a reusable environment image.\n\n\
                      Examples:\n  \
                      sitepack build-env\n  \
                      sitepack build-env --source ../blog --no-reuse"
    )]
    BuildEnv(PipelineArgs),

    #[command(
        about = "Build the static site",
        long_about = "Builds the environment, overlays the source tree and runs `bun run build`, \
                      collecting the dist directory.\n\n\
                      Examples:\n  \
                      sitepack build\n  \
                      sitepack build --export ./dist\n  \
                      sitepack build --archive site.tar.gz --format json"
    )]
    Build(BuildArgs),

    #[command(
        about = "Package the site into the web server image",
        long_about = "Builds the site and installs it with the Caddyfile into the caddy image, \
                      exposing exactly one port.\n\n\
                      Examples:\n  \
                      sitepack prod\n  \
                      sitepack prod --caddyfile deploy/Caddyfile"
    )]
    Prod(ProdArgs),

    #[command(
        about = "Package the site and push the image to the registry",
        long_about = "Runs every stage and pushes the packaged image. The registry token is read \
                      from SITEPACK_REGISTRY_TOKEN unless another source is given, and is never \
                      logged.\n\n\
                      Examples:\n  \
                      SITEPACK_REGISTRY_TOKEN=... sitepack publish\n  \
                      sitepack publish --token-file /run/secrets/ghcr --tag v2"
    )]
    Publish(PublishArgs),

    #[command(
        about = "Package the site and serve it locally",
        long_about = "Runs the packaged image with its port bound to 127.0.0.1 until Ctrl-C.\n\n\
                      Examples:\n  \
                      sitepack serve\n  \
                      sitepack serve --port 8080"
    )]
    Serve(ServeArgs),

    #[command(about = "Show the effective configuration")]
    Config(ConfigArgs),
}

/// Options shared by every pipeline command.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    #[arg(
        short = 's',
        long,
        value_name = "DIR",
        default_value = ".",
        help = "Project directory"
    )]
    pub source: PathBuf,

    #[arg(long, value_name = "FILE", help = "Package manifest, relative to the project")]
    pub manifest: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Lockfile, relative to the project")]
    pub lockfile: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(long, help = "Always run the install, even if a matching environment exists")]
    pub no_reuse: bool,

    #[arg(long, help = "Use the shared `bun` cache volume instead of one per lockfile")]
    pub fixed_cache: bool,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub common: PipelineArgs,

    #[arg(long, value_name = "DIR", help = "Write the built site to a host directory")]
    pub export: Option<PathBuf>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Write the built site as a tar (.tar.gz for gzip)"
    )]
    pub archive: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ProdArgs {
    #[command(flatten)]
    pub common: PipelineArgs,

    #[arg(long, value_name = "FILE", help = "Caddy config, relative to the project")]
    pub caddyfile: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct PublishArgs {
    #[command(flatten)]
    pub common: PipelineArgs,

    #[arg(long, value_name = "FILE", help = "Caddy config, relative to the project")]
    pub caddyfile: Option<PathBuf>,

    #[arg(
        long,
        value_name = "VAR",
        conflicts_with = "token_file",
        help = "Environment variable holding the registry token"
    )]
    pub token_env: Option<String>,

    #[arg(long, value_name = "FILE", help = "File holding the registry token")]
    pub token_file: Option<PathBuf>,

    #[arg(long, value_name = "TAG", help = "Tag to push (default: latest)")]
    pub tag: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub common: PipelineArgs,

    #[arg(long, value_name = "FILE", help = "Caddy config, relative to the project")]
    pub caddyfile: Option<PathBuf>,

    #[arg(
        short = 'p',
        long,
        value_name = "PORT",
        default_value = "1313",
        value_parser = clap::value_parser!(u16).range(1..),
        help = "Host port on 127.0.0.1"
    )]
    pub port: u16,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(
        short = 's',
        long,
        value_name = "DIR",
        default_value = ".",
        help = "Project directory"
    )]
    pub source: PathBuf,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_args_verify() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_default_build_env_args() {
        let args = CliArgs::parse_from(["sitepack", "build-env"]);
        match args.command {
            Commands::BuildEnv(common) => {
                assert_eq!(common.source, PathBuf::from("."));
                assert_eq!(common.format, OutputFormatArg::Human);
                assert!(common.manifest.is_none());
                assert!(common.lockfile.is_none());
                assert!(!common.no_reuse);
                assert!(!common.fixed_cache);
            }
            _ => panic!("Expected BuildEnv command"),
        }
    }

    #[test]
    fn test_build_with_options() {
        let args = CliArgs::parse_from([
            "sitepack",
            "build",
            "--source",
            "/tmp/blog",
            "--lockfile",
            "bun.lockb",
            "--export",
            "out",
            "--archive",
            "site.tar.gz",
            "--format",
            "json",
            "--no-reuse",
        ]);
        match args.command {
            Commands::Build(build) => {
                assert_eq!(build.common.source, PathBuf::from("/tmp/blog"));
                assert_eq!(build.common.lockfile, Some(PathBuf::from("bun.lockb")));
                assert_eq!(build.export, Some(PathBuf::from("out")));
                assert_eq!(build.archive, Some(PathBuf::from("site.tar.gz")));
                assert_eq!(build.common.format, OutputFormatArg::Json);
                assert!(build.common.no_reuse);
            }
            _ => panic!("Expected Build command"),
        }
    }

    #[test]
    fn test_publish_token_sources_conflict() {
        let result = CliArgs::try_parse_from([
            "sitepack",
            "publish",
            "--token-env",
            "GH_TOKEN",
            "--token-file",
            "/run/secrets/token",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_publish_with_tag() {
        let args = CliArgs::parse_from(["sitepack", "publish", "--tag", "v2", "--fixed-cache"]);
        match args.command {
            Commands::Publish(publish) => {
                assert_eq!(publish.tag, Some("v2".to_string()));
                assert!(publish.common.fixed_cache);
                assert!(publish.token_env.is_none());
            }
            _ => panic!("Expected Publish command"),
        }
    }

    #[test]
    fn test_serve_port() {
        let args = CliArgs::parse_from(["sitepack", "serve"]);
        match args.command {
            Commands::Serve(serve) => assert_eq!(serve.port, 1313),
            _ => panic!("Expected Serve command"),
        }

        assert!(CliArgs::try_parse_from(["sitepack", "serve", "--port", "0"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let args = CliArgs::parse_from(["sitepack", "-v", "--config", "ci.toml", "prod"]);
        assert!(args.verbose);
        assert!(!args.quiet);
        assert_eq!(args.config, Some(PathBuf::from("ci.toml")));

        let args = CliArgs::parse_from(["sitepack", "--log-level", "debug", "config"]);
        assert_eq!(args.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(CliArgs::try_parse_from(["sitepack", "-q", "-v", "config"]).is_err());
    }
}
