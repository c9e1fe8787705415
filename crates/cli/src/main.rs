use deckhand_cli::cli::commands::{
    CliArgs, Commands, ConfigArgs, DeployArgs, DestroyArgs, EndpointsArgs, TargetArgs, TestArgs,
};
use deckhand_cli::cli::output::{OutputFormat, OutputFormatter};
use deckhand_cli::{pipeline_context, NAME, VERSION};
use deckhand_core::DeckhandConfig;
use deckhand_pipeline::{CancelToken, Coordinator, RunOptions, RunSummary};

use clap::Parser;
use std::env;
use std::process;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("{} v{} starting", NAME, VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Deploy(deploy_args) => handle_deploy(deploy_args, args.quiet).await,
        Commands::Destroy(destroy_args) => handle_destroy(destroy_args, args.quiet).await,
        Commands::Test(test_args) => handle_test(test_args, args.quiet).await,
        Commands::Endpoints(endpoints_args) => handle_endpoints(endpoints_args).await,
        Commands::Config(config_args) => handle_config(config_args),
    };

    process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let level = if let Some(level_str) = &args.log_level {
            parse_level(level_str)
        } else if args.verbose {
            Level::DEBUG
        } else if args.quiet {
            Level::ERROR
        } else {
            let level_str = env::var("DECKHAND_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
            parse_level(&level_str)
        };

        let mut filter = EnvFilter::from_default_env();

        if env::var("RUST_LOG").is_err() {
            for directive in [
                format!("deckhand={}", level),
                "hyper=warn".to_string(),
                "h2=warn".to_string(),
                "bollard=warn".to_string(),
            ] {
                if let Ok(directive) = directive.parse() {
                    filter = filter.add_directive(directive);
                }
            }
        }

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    });
}

fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

fn load_config() -> Option<DeckhandConfig> {
    let config = DeckhandConfig::default();
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        eprintln!("\nPlease check your DECKHAND_* environment variables.");
        return None;
    }
    Some(config)
}

/// Builds the coordinator and cancels its runs on Ctrl-C.
fn coordinator(target: &TargetArgs) -> Option<Coordinator> {
    let config = load_config()?;
    let cancel = CancelToken::new();
    let context = match pipeline_context(config, target.dry_run, cancel.clone()) {
        Ok(context) => context,
        Err(e) => {
            error!("Failed to initialize backends: {:#}", e);
            eprintln!("\nPossible solutions:");
            eprintln!("  - Ensure the Docker daemon is running and DOCKER_HOST is correct");
            eprintln!("  - Run with --dry-run to use in-memory backends");
            return None;
        }
    };

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling the pipeline");
            cancel.cancel();
        }
    });

    Some(Coordinator::new(context))
}

fn run_options(target: &TargetArgs) -> RunOptions {
    RunOptions {
        namespace: target.namespace.clone(),
        variables: target.vars.clone(),
        ..RunOptions::new(&target.manifest)
    }
}

fn report(result: anyhow::Result<RunSummary>, quiet: bool) -> i32 {
    match result {
        Ok(summary) => {
            for warning in &summary.warnings {
                warn!("{}", warning);
            }
            if !quiet {
                match OutputFormatter::new(OutputFormat::Human).format_summary(&summary) {
                    Ok(output) => print!("{}", output),
                    Err(e) => {
                        error!("Failed to format output: {}", e);
                        return 1;
                    }
                }
            }
            0
        }
        Err(e) => {
            error!("{:#}", e);
            1
        }
    }
}

async fn handle_deploy(args: &DeployArgs, quiet: bool) -> i32 {
    let Some(coordinator) = coordinator(&args.target) else {
        return 1;
    };
    info!(manifest = %args.target.manifest.display(), "Deploying");

    let options = RunOptions {
        name: args.name.clone(),
        force_build: args.build,
        services: args.services.clone(),
        skip_dependencies: args.no_deps,
        routing: args.routing,
        ..run_options(&args.target)
    };
    report(coordinator.deploy(options).await, quiet)
}

async fn handle_destroy(args: &DestroyArgs, quiet: bool) -> i32 {
    let Some(coordinator) = coordinator(&args.target) else {
        return 1;
    };
    info!(manifest = %args.target.manifest.display(), "Destroying");

    let options = RunOptions {
        name: args.name.clone(),
        destroy_dependencies: args.dependencies,
        force_destroy: args.force_destroy,
        ..run_options(&args.target)
    };
    report(coordinator.destroy(options).await, quiet)
}

async fn handle_test(args: &TestArgs, quiet: bool) -> i32 {
    let Some(coordinator) = coordinator(&args.target) else {
        return 1;
    };
    info!(manifest = %args.target.manifest.display(), "Testing");
    report(coordinator.test(run_options(&args.target)).await, quiet)
}

async fn handle_endpoints(args: &EndpointsArgs) -> i32 {
    let Some(coordinator) = coordinator(&args.target) else {
        return 1;
    };

    let options = RunOptions {
        routing: args.routing,
        ..run_options(&args.target)
    };
    let routes = match coordinator.endpoints(options).await {
        Ok(routes) => routes,
        Err(e) => {
            error!("{:#}", e);
            return 1;
        }
    };

    match OutputFormatter::new(args.format.into()).format_endpoints(&routes) {
        Ok(output) => {
            print!("{}", output);
            0
        }
        Err(e) => {
            error!("Failed to format output: {}", e);
            1
        }
    }
}

fn handle_config(args: &ConfigArgs) -> i32 {
    let Some(config) = load_config() else {
        return 1;
    };
    match OutputFormatter::new(args.format.into()).format_config(&config) {
        Ok(output) => {
            print!("{}", output);
            0
        }
        Err(e) => {
            error!("Failed to format output: {}", e);
            1
        }
    }
}
