// src/main.rs

mod app_logic;
mod core;

use crate::app_logic::DeploymentOrchestrator;
use crate::core::config::APP_NAME;
use crate::core::{
    ClusterOperations, ConfigManagerOperations, CoreConfigManager, CoreProfileResolver,
    CoreStager, DeploySettings, LocalClusterManager, ManifestLocation, ProfileError,
    ProfileResolverOperations, RepublishPolicy, ResolvedProfile, StagingOperations, archiver,
    manifests,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Once};

#[derive(Parser)]
#[command(
    name = "fabric-deployer",
    about = "Resolve publish profiles and deploy application packages"
)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). Overrides the saved log level.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a publish profile and print the result
    Resolve {
        profile: PathBuf,
        /// Application manifest to use instead of the one beside the profile's folder
        #[arg(long)]
        manifest: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },

    /// Copy, register and instantiate the application
    Publish(DeployArgs),

    /// Delete the application and unregister its type
    Remove {
        profile: PathBuf,
        #[command(flatten)]
        cluster: ClusterArgs,
    },

    /// Remove, then publish
    Republish {
        #[command(flatten)]
        deploy: DeployArgs,
        /// Do not publish when the removal fails
        #[arg(long)]
        abort_on_remove_failure: bool,
    },

    /// Copy and register the new version, then start an application upgrade
    Upgrade(DeployArgs),

    /// Show the state of a local cluster directory
    Status {
        #[command(flatten)]
        cluster: ClusterArgs,
    },

    /// Print the image store connection string of a cluster manifest
    ImageStore { cluster_manifest: PathBuf },

    /// Zip a package folder into an archive
    Pack { package_dir: PathBuf, archive: PathBuf },

    /// Extract a package archive into a folder
    Unpack { archive: PathBuf, destination: PathBuf },

    /// Inspect or change the saved settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
}

#[derive(Args)]
struct ClusterArgs {
    /// Root folder of the local cluster (image store and state file)
    #[arg(long)]
    cluster_dir: PathBuf,
}

#[derive(Args)]
struct DeployArgs {
    profile: PathBuf,
    /// Package folder, or a .sfpkg/.zip archive
    #[arg(long)]
    package: PathBuf,
    #[command(flatten)]
    cluster: ClusterArgs,
}

#[derive(Subcommand)]
enum SettingsCommands {
    /// Print the saved settings as JSON
    Show,
    /// Change one or more saved settings
    Set {
        #[arg(long)]
        manifest_relative_path: Option<String>,
        #[arg(long)]
        copy_tool: Option<PathBuf>,
        /// Stop using the external copy tool
        #[arg(long, conflicts_with = "copy_tool")]
        no_copy_tool: bool,
        #[arg(long)]
        staging_root: Option<PathBuf>,
        #[arg(long, value_enum)]
        republish_policy: Option<PolicyArg>,
        #[arg(long)]
        log_level: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    Continue,
    Abort,
}

impl From<PolicyArg> for RepublishPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Continue => RepublishPolicy::ContinueOnRemoveFailure,
            PolicyArg::Abort => RepublishPolicy::AbortOnRemoveFailure,
        }
    }
}

static LOGGING_INIT: Once = Once::new();

fn init_logger(level: LevelFilter) {
    LOGGING_INIT.call_once(|| {
        if let Err(e) = TermLogger::init(
            level,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ) {
            eprintln!("Failed to initialize logger: {e}");
        }
    });
}

/// Sets up debug-level terminal logging once per process. Safe to call from every test.
#[allow(dead_code)]
pub(crate) fn initialize_logging() {
    init_logger(LevelFilter::Debug);
}

fn level_from(verbose: u8, settings: &DeploySettings) -> LevelFilter {
    match verbose {
        0 => settings.log_level.parse().unwrap_or(LevelFilter::Info),
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn resolve_profile(
    location: ManifestLocation,
    profile: &Path,
) -> Result<ResolvedProfile, ProfileError> {
    CoreProfileResolver::with_manifest_location(location)
        .resolve(profile)
        .inspect_err(|e| {
            if e.is_not_found() {
                log::error!("Main: A file needed to resolve {profile:?} is missing.");
            }
        })
}

fn build_orchestrator(
    settings: &DeploySettings,
    cluster_dir: &Path,
    policy: RepublishPolicy,
) -> DeploymentOrchestrator {
    let cluster: Arc<dyn ClusterOperations> =
        Arc::new(LocalClusterManager::new(cluster_dir.to_path_buf()));
    let stager: Arc<dyn StagingOperations> = Arc::new(
        CoreStager::new(settings.staging_root()).with_copy_tool(settings.copy_tool.clone()),
    );
    DeploymentOrchestrator::new(cluster, stager).with_republish_policy(policy)
}

fn print_profile_summary(profile: &ResolvedProfile) {
    println!("Profile:            {}", profile.profile_path.display());
    println!("Application:        {}", profile.application_name);
    println!(
        "Application type:   {} {}",
        profile.application_type_name, profile.application_type_version
    );
    println!("Namespace:          {}", profile.fabric_namespace);
    println!(
        "Parameter file:     {}",
        profile.application_parameter_file.display()
    );
    println!("Parameters:");
    for (name, value) in &profile.application_parameters {
        println!("  {name} = {value}");
    }
    println!("Cluster connection:");
    for (name, value) in &profile.cluster_connection_parameters {
        println!("  {name} = {value}");
    }
    match &profile.upgrade_deployment {
        Some(upgrade) => println!(
            "Upgrade deployment: mode {}, {} parameters",
            upgrade.mode().unwrap_or("unset"),
            upgrade.parameters.len()
        ),
        None => println!("Upgrade deployment: (none)"),
    }
}

fn run(
    cli: Cli,
    config_manager: &dyn ConfigManagerOperations,
    settings: DeploySettings,
) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Commands::Resolve {
            profile,
            manifest,
            json,
        } => {
            let location = match manifest {
                Some(path) => ManifestLocation::Explicit(path),
                None => settings.manifest_location(),
            };
            let resolved = resolve_profile(location, &profile)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&resolved)?);
            } else {
                print_profile_summary(&resolved);
            }
        }
        Commands::Publish(args) => {
            let profile = resolve_profile(settings.manifest_location(), &args.profile)?;
            build_orchestrator(&settings, &args.cluster.cluster_dir, settings.republish_policy)
                .publish(&profile, &args.package)?;
            println!("Published {}", profile.application_name);
        }
        Commands::Remove { profile, cluster } => {
            let profile = resolve_profile(settings.manifest_location(), &profile)?;
            build_orchestrator(&settings, &cluster.cluster_dir, settings.republish_policy)
                .remove(&profile)?;
            println!("Removed {}", profile.application_name);
        }
        Commands::Republish {
            deploy,
            abort_on_remove_failure,
        } => {
            let policy = if abort_on_remove_failure {
                RepublishPolicy::AbortOnRemoveFailure
            } else {
                settings.republish_policy
            };
            let profile = resolve_profile(settings.manifest_location(), &deploy.profile)?;
            let report = build_orchestrator(&settings, &deploy.cluster.cluster_dir, policy)
                .republish(&profile, &deploy.package)?;
            if let Some(e) = report.remove_error {
                println!("Republished {} (removal failed: {e})", profile.application_name);
            } else {
                println!("Republished {}", profile.application_name);
            }
        }
        Commands::Upgrade(args) => {
            let profile = resolve_profile(settings.manifest_location(), &args.profile)?;
            build_orchestrator(&settings, &args.cluster.cluster_dir, settings.republish_policy)
                .upgrade(&profile, &args.package)?;
            println!(
                "Started upgrade of {} to {}",
                profile.application_name, profile.application_type_version
            );
        }
        Commands::Status { cluster } => {
            let state = LocalClusterManager::new(cluster.cluster_dir).load_state()?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::ImageStore { cluster_manifest } => {
            println!(
                "{}",
                manifests::read_image_store_connection_string(&cluster_manifest)?
            );
        }
        Commands::Pack {
            package_dir,
            archive,
        } => {
            let count = archiver::create_package_archive(&package_dir, &archive)?;
            println!("Packed {count} files into {}", archive.display());
        }
        Commands::Unpack {
            archive,
            destination,
        } => {
            let count = archiver::extract_package_archive(&archive, &destination)?;
            println!("Extracted {count} files into {}", destination.display());
        }
        Commands::Settings { command } => match command {
            SettingsCommands::Show => {
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            SettingsCommands::Set {
                manifest_relative_path,
                copy_tool,
                no_copy_tool,
                staging_root,
                republish_policy,
                log_level,
            } => {
                let saved = config_manager.update_settings(APP_NAME, &mut |settings| {
                    if let Some(path) = &manifest_relative_path {
                        settings.manifest_relative_path = path.clone();
                    }
                    if no_copy_tool {
                        settings.copy_tool = None;
                    } else if copy_tool.is_some() {
                        settings.copy_tool = copy_tool.clone();
                    }
                    if staging_root.is_some() {
                        settings.staging_root = staging_root.clone();
                    }
                    if let Some(policy) = republish_policy {
                        settings.republish_policy = policy.into();
                    }
                    if let Some(level) = &log_level {
                        settings.log_level = level.clone();
                    }
                })?;
                println!("{}", serde_json::to_string_pretty(&saved)?);
            }
        },
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config_manager = CoreConfigManager::new();

    let settings_result = config_manager.load_settings(APP_NAME);
    let settings = settings_result.as_ref().cloned().unwrap_or_default();
    init_logger(level_from(cli.verbose, &settings));
    if let Err(e) = &settings_result {
        log::warn!("Main: Could not load settings, using defaults: {e}");
    }

    match run(cli, &config_manager, settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Main: {e}");
            ExitCode::FAILURE
        }
    }
}
