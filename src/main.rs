use sitepack::cli::commands::{CliArgs, Commands};
use sitepack::cli::handlers::{
    handle_build, handle_build_env, handle_config, handle_prod, handle_publish, handle_serve,
};
use sitepack::util::logging::{self, LoggingConfig};
use sitepack::VERSION;

use clap::Parser;
use tracing::{debug, Level};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("sitepack v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let config_file = args.config.as_deref();
    let exit_code = match &args.command {
        Commands::BuildEnv(common) => handle_build_env(common, config_file).await,
        Commands::Build(build_args) => handle_build(build_args, config_file).await,
        Commands::Prod(prod_args) => handle_prod(prod_args, config_file).await,
        Commands::Publish(publish_args) => handle_publish(publish_args, config_file).await,
        Commands::Serve(serve_args) => handle_serve(serve_args, config_file).await,
        Commands::Config(config_args) => handle_config(config_args, config_file),
    };

    std::process::exit(exit_code);
}

/// `--log-level` wins over `-v`/`-q`, which win over `SITEPACK_LOG_LEVEL`.
fn init_logging_from_args(args: &CliArgs) {
    let mut config = logging::config_from_env();

    if let Some(level_str) = &args.log_level {
        config.level = logging::parse_level(level_str).unwrap_or_else(|| {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        });
    } else if args.verbose {
        config = LoggingConfig {
            level: Level::DEBUG,
            include_target: true,
            ..config
        };
    } else if args.quiet {
        config.level = Level::ERROR;
    }

    logging::init_logging(config);
}
