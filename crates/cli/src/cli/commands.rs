use clap::{Args, Parser, Subcommand, ValueEnum};
use deckhand_core::RoutingBackend;
use std::path::PathBuf;

/// Manifest-driven deploy and destroy pipelines for Kubernetes
#[derive(Parser, Debug)]
#[command(
    name = "deckhand",
    about = "Manifest-driven deploy and destroy pipelines for Kubernetes",
    version,
    long_about = "deckhand reads a deckhand.yml manifest, resolves its variables, \
                  deploys its dependencies, builds its images, runs its commands \
                  and reconciles its compose stack into the cluster."
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
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Deploy a pipeline",
        long_about = "Runs variable resolution, dependencies, builds, deploy commands and \
                      reconciles the compose stack into the cluster.\n\n\
                      Examples:\n  \
                      deckhand deploy\n  \
                      deckhand deploy -f services/shop --var REGION=eu-west-1\n  \
                      deckhand deploy web worker --no-deps"
    )]
    Deploy(DeployArgs),

    #[command(
        about = "Destroy a deployed pipeline",
        long_about = "Runs the destroy commands with the variables the last deploy used \
                      and removes every cluster object the pipeline owns.\n\n\
                      Examples:\n  \
                      deckhand destroy\n  \
                      deckhand destroy --dependencies --force-destroy"
    )]
    Destroy(DestroyArgs),

    #[command(
        about = "Run the test phase",
        long_about = "Resolves variables, deploys dependencies, builds images and runs the \
                      test commands. The pipeline's own resources are not applied."
    )]
    Test(TestArgs),

    #[command(about = "List the routes a deploy would create")]
    Endpoints(EndpointsArgs),

    #[command(about = "Show the effective configuration")]
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    #[arg(
        short = 'f',
        long = "file",
        value_name = "PATH",
        default_value = ".",
        help = "Manifest file, or a directory containing deckhand.yml"
    )]
    pub manifest: PathBuf,

    #[arg(short = 'n', long, value_name = "NAMESPACE", help = "Target namespace")]
    pub namespace: Option<String>,

    #[arg(
        long = "var",
        value_name = "KEY=VALUE",
        value_parser = parse_assignment,
        help = "Set a variable (repeatable)"
    )]
    pub vars: Vec<(String, String)>,

    #[arg(long, help = "Use in-memory backends instead of Docker and the cluster")]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(value_name = "SERVICE", help = "Deploy only these compose services")]
    pub services: Vec<String>,

    #[arg(long, help = "Override the pipeline identity")]
    pub name: Option<String>,

    #[arg(long, help = "Rebuild every image even when its inputs are unchanged")]
    pub build: bool,

    #[arg(long, help = "Skip deploying manifest dependencies")]
    pub no_deps: bool,

    #[arg(long, value_parser = parse_routing, help = "Routing backend: ingress or gateway")]
    pub routing: Option<RoutingBackend>,
}

#[derive(Args, Debug, Clone)]
pub struct DestroyArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(long, help = "Override the pipeline identity")]
    pub name: Option<String>,

    #[arg(long, help = "Also destroy manifest dependencies")]
    pub dependencies: bool,

    #[arg(long, help = "Keep going when a destroy command fails")]
    pub force_destroy: bool,
}

#[derive(Args, Debug, Clone)]
pub struct TestArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

#[derive(Args, Debug, Clone)]
pub struct EndpointsArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    #[arg(long, value_parser = parse_routing, help = "Routing backend: ingress or gateway")]
    pub routing: Option<RoutingBackend>,

    #[arg(long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(long, value_enum, default_value = "human", help = "Output format")]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("Invalid variable '{}', expected KEY=VALUE", s)),
    }
}

fn parse_routing(s: &str) -> Result<RoutingBackend, String> {
    s.parse::<RoutingBackend>().map_err(|e| e.to_string())
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
    fn test_default_deploy_args() {
        let args = CliArgs::parse_from(["deckhand", "deploy"]);
        match args.command {
            Commands::Deploy(deploy) => {
                assert_eq!(deploy.target.manifest, PathBuf::from("."));
                assert!(deploy.target.namespace.is_none());
                assert!(deploy.target.vars.is_empty());
                assert!(!deploy.target.dry_run);
                assert!(deploy.services.is_empty());
                assert!(!deploy.build);
                assert!(!deploy.no_deps);
                assert!(deploy.routing.is_none());
            }
            _ => panic!("Expected Deploy command"),
        }
    }

    #[test]
    fn test_deploy_with_options() {
        let args = CliArgs::parse_from([
            "deckhand",
            "deploy",
            "web",
            "worker",
            "-f",
            "services/shop",
            "-n",
            "staging",
            "--var",
            "REGION=eu-west-1",
            "--var",
            "DSN=postgres://u:p@db/x?a=b",
            "--build",
            "--no-deps",
            "--routing",
            "httproute",
        ]);

        match args.command {
            Commands::Deploy(deploy) => {
                assert_eq!(deploy.services, vec!["web", "worker"]);
                assert_eq!(deploy.target.manifest, PathBuf::from("services/shop"));
                assert_eq!(deploy.target.namespace.as_deref(), Some("staging"));
                assert_eq!(
                    deploy.target.vars,
                    vec![
                        ("REGION".to_string(), "eu-west-1".to_string()),
                        ("DSN".to_string(), "postgres://u:p@db/x?a=b".to_string()),
                    ]
                );
                assert!(deploy.build);
                assert!(deploy.no_deps);
                assert_eq!(deploy.routing, Some(RoutingBackend::Gateway));
            }
            _ => panic!("Expected Deploy command"),
        }
    }

    #[test]
    fn test_destroy_flags() {
        let args = CliArgs::parse_from([
            "deckhand",
            "destroy",
            "--dependencies",
            "--force-destroy",
            "--name",
            "shop-pr-42",
        ]);
        match args.command {
            Commands::Destroy(destroy) => {
                assert!(destroy.dependencies);
                assert!(destroy.force_destroy);
                assert_eq!(destroy.name.as_deref(), Some("shop-pr-42"));
            }
            _ => panic!("Expected Destroy command"),
        }
    }

    #[test]
    fn test_endpoints_format() {
        let args = CliArgs::parse_from(["deckhand", "endpoints", "--format", "json"]);
        match args.command {
            Commands::Endpoints(endpoints) => {
                assert_eq!(endpoints.format, OutputFormatArg::Json);
            }
            _ => panic!("Expected Endpoints command"),
        }
    }

    #[test]
    fn test_invalid_variable_is_rejected() {
        let result = CliArgs::try_parse_from(["deckhand", "deploy", "--var", "NOVALUE"]);
        assert!(result.is_err());
        let result = CliArgs::try_parse_from(["deckhand", "deploy", "--var", "=x"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_routing_is_rejected() {
        let result = CliArgs::try_parse_from(["deckhand", "deploy", "--routing", "nginx"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_flags() {
        let args = CliArgs::parse_from(["deckhand", "-v", "config"]);
        assert!(args.verbose);
        assert!(!args.quiet);

        let args = CliArgs::parse_from(["deckhand", "--log-level", "trace", "config"]);
        assert_eq!(args.log_level.as_deref(), Some("trace"));

        assert!(CliArgs::try_parse_from(["deckhand", "-v", "-q", "config"]).is_err());
    }
}
