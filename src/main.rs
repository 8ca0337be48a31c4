// src/main.rs

use airlift::db::models::{InstallMode, InstallOptions, PackageSlot};
use airlift::lifecycle::{self, StartupContext, StartupOutcome};
use airlift::manager::PackageManager;
use airlift::reporting::ReportingManager;
use airlift::{manifest, signing};
use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::info;

const DEFAULT_DB_PATH: &str = "/var/lib/airlift/airlift.db";
const DEFAULT_DEPLOYMENTS_DIR: &str = "/var/lib/airlift/deployments";

#[derive(Parser)]
#[command(name = "airlift")]
#[command(author, version, about = "Over-the-air content package manager with staged installs and rollback", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the Airlift database
    Init {
        /// Database path
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Show current/previous packages, the staged install, and flags
    Status {
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
        #[arg(long, default_value = DEFAULT_DEPLOYMENTS_DIR)]
        deployments_dir: String,
    },
    /// Verify a downloaded package's manifest and stage it for install
    Stage {
        /// Path to the manifest file
        manifest_path: String,
        /// Downloaded package directory name (under the deployments dir)
        local_dir: String,
        /// Signed token over the manifest (base64)
        #[arg(short, long)]
        token: String,
        /// Public key (base64)
        #[arg(short, long)]
        public_key: String,
        /// Install mode: immediate, on_next_restart, on_next_resume, on_next_suspend
        #[arg(short, long, default_value = "on_next_restart")]
        mode: String,
        /// Minimum background duration in seconds (on_next_resume only)
        #[arg(long)]
        min_background_duration: Option<i64>,
        /// Confirmation timeout in seconds, stored for the host runtime
        #[arg(long)]
        rollback_timeout: Option<i64>,
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
        #[arg(long, default_value = DEFAULT_DEPLOYMENTS_DIR)]
        deployments_dir: String,
    },
    /// Apply a verified package, making it current (awaits confirmation)
    Apply {
        /// Path to the manifest file of the package to apply
        manifest_path: String,
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
        #[arg(long, default_value = DEFAULT_DEPLOYMENTS_DIR)]
        deployments_dir: String,
    },
    /// Confirm that the applied package booted successfully
    Confirm {
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
        #[arg(long, default_value = DEFAULT_DEPLOYMENTS_DIR)]
        deployments_dir: String,
    },
    /// Run the startup recovery rule (binary-change and rollback detection)
    Start {
        /// Build identifier of the running binary
        binary_build_time: String,
        /// Version of the running binary
        #[arg(short, long, default_value = "0.0.0")]
        app_version: String,
        /// Deployment key configured for this binary
        #[arg(short = 'k', long)]
        deployment_key: Option<String>,
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
        #[arg(long, default_value = DEFAULT_DEPLOYMENTS_DIR)]
        deployments_dir: String,
    },
    /// Blacklist the current package and revert to the previous version
    Revert {
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
        #[arg(long, default_value = DEFAULT_DEPLOYMENTS_DIR)]
        deployments_dir: String,
    },
    /// Remove deployment directories not referenced by any package slot
    Clean {
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
        #[arg(long, default_value = DEFAULT_DEPLOYMENTS_DIR)]
        deployments_dir: String,
    },
    /// List (or clear) the failed-update blacklist
    Failed {
        /// Clear the blacklist instead of listing it
        #[arg(long)]
        clear: bool,
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Show (or consume) the pending status report
    Report {
        /// Atomically read and clear the report
        #[arg(long)]
        clear: bool,
        #[arg(short, long, default_value = DEFAULT_DB_PATH)]
        db_path: String,
    },
    /// Generate a signing keypair
    Keygen,
    /// Sign a manifest file, printing the signed token
    Sign {
        /// Path to the manifest file
        manifest_path: String,
        /// Secret key (base64)
        #[arg(short, long)]
        secret_key: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        #[arg(value_parser = ["bash", "zsh", "fish", "powershell"])]
        shell: String,
    },
}

fn open_manager(db_path: &str, deployments_dir: &str) -> Result<PackageManager> {
    let conn = airlift::db::open(db_path)?;
    Ok(PackageManager::new(conn, deployments_dir))
}

fn parse_mode(mode: &str) -> Result<InstallMode> {
    mode.parse::<InstallMode>().map_err(anyhow::Error::msg)
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { db_path }) => {
            info!("Initializing Airlift database at: {}", db_path);
            airlift::db::init(&db_path)?;
            println!("Database initialized successfully at: {}", db_path);
            Ok(())
        }
        Some(Commands::Status {
            db_path,
            deployments_dir,
        }) => {
            let manager = open_manager(&db_path, &deployments_dir)?;
            let reporter = ReportingManager::new(manager.share_connection());

            for (slot, package) in [
                (PackageSlot::Current, manager.current_package()?),
                (PackageSlot::Previous, manager.previous_package()?),
            ] {
                match package {
                    Some(p) => println!(
                        "{:>8}: {} ({}) app {} at {}",
                        slot.as_str(),
                        p.label,
                        p.package_hash,
                        p.app_version,
                        manager.package_dir(&p.local_path).display()
                    ),
                    None => println!("{:>8}: none", slot.as_str()),
                }
            }

            match manager.get_pending_install()? {
                Some(options) => {
                    print!("  staged: {}", options.install_mode.as_str());
                    if let Some(d) = options.min_background_duration {
                        print!(" (min background {}s)", d);
                    }
                    if let Some(t) = options.rollback_timeout {
                        print!(" (rollback timeout {}s)", t);
                    }
                    println!();
                }
                None => println!("  staged: none"),
            }

            println!(
                "  binary: {}",
                manager.cached_binary_hash()?.as_deref().unwrap_or("unknown")
            );
            println!(
                "  needs confirmation: {}",
                manager.install_needs_confirmation()?
            );
            println!("  failed updates: {}", manager.failed_updates()?.len());
            if let Some(report) = reporter.get_failed_report()? {
                println!("  pending report: {}", report.to_json());
            }
            Ok(())
        }
        Some(Commands::Stage {
            manifest_path,
            local_dir,
            token,
            public_key,
            mode,
            min_background_duration,
            rollback_timeout,
            db_path,
            deployments_dir,
        }) => {
            let manager = open_manager(&db_path, &deployments_dir)?;
            let content = std::fs::read_to_string(&manifest_path)?;

            let mut options = InstallOptions::new(parse_mode(&mode)?);
            options.min_background_duration = min_background_duration;
            options.rollback_timeout = rollback_timeout;

            let metadata =
                manager.verify_and_stage(&local_dir, &content, &token, &public_key, &options)?;
            println!(
                "Staged package {} ({}) to install {}",
                metadata.label,
                metadata.package_hash,
                options.install_mode.as_str()
            );
            Ok(())
        }
        Some(Commands::Apply {
            manifest_path,
            db_path,
            deployments_dir,
        }) => {
            let manager = open_manager(&db_path, &deployments_dir)?;
            let content = std::fs::read_to_string(&manifest_path)?;
            let metadata = manifest::parse_package_manifest(&content)?;

            manager.apply(&metadata)?;
            println!(
                "Applied package {} ({}); awaiting confirmation",
                metadata.label, metadata.package_hash
            );
            Ok(())
        }
        Some(Commands::Confirm {
            db_path,
            deployments_dir,
        }) => {
            let manager = open_manager(&db_path, &deployments_dir)?;
            let reporter = ReportingManager::new(manager.share_connection());

            lifecycle::confirm_install(&manager, &reporter)?;
            println!("Install confirmed");
            Ok(())
        }
        Some(Commands::Start {
            binary_build_time,
            app_version,
            deployment_key,
            db_path,
            deployments_dir,
        }) => {
            let manager = open_manager(&db_path, &deployments_dir)?;
            let reporter = ReportingManager::new(manager.share_connection());

            let outcome = lifecycle::handle_app_start(
                &manager,
                &reporter,
                &StartupContext {
                    binary_build_time: &binary_build_time,
                    app_version: &app_version,
                    deployment_key: deployment_key.as_deref(),
                },
            )?;
            match outcome {
                StartupOutcome::FreshBinary => {
                    println!("Binary changed; package state cleared")
                }
                StartupOutcome::RolledBack => {
                    println!("Unconfirmed install detected; rolled back")
                }
                StartupOutcome::Normal => println!("Nothing to recover"),
            }
            Ok(())
        }
        Some(Commands::Revert {
            db_path,
            deployments_dir,
        }) => {
            let manager = open_manager(&db_path, &deployments_dir)?;

            let Some(current) = manager.current_package()? else {
                return Err(anyhow::anyhow!("No package is currently installed"));
            };
            manager.save_failed_update(&current.package_hash)?;
            manager.revert_to_previous_version()?;

            println!("Reverted away from {} ({})", current.label, current.package_hash);
            match manager.current_package()? {
                Some(p) => println!("Now running {} ({})", p.label, p.package_hash),
                None => println!("Now running the unmodified binary"),
            }
            Ok(())
        }
        Some(Commands::Clean {
            db_path,
            deployments_dir,
        }) => {
            let manager = open_manager(&db_path, &deployments_dir)?;
            manager.clean_deployments()?;
            println!("Removed orphaned deployments");
            Ok(())
        }
        Some(Commands::Failed { clear, db_path }) => {
            let manager = open_manager(&db_path, DEFAULT_DEPLOYMENTS_DIR)?;
            if clear {
                manager.clear_failed_updates()?;
                println!("Failed-update blacklist cleared");
            } else {
                let hashes = manager.failed_updates()?;
                if hashes.is_empty() {
                    println!("No failed updates.");
                } else {
                    println!("Failed updates:");
                    for hash in &hashes {
                        println!("  {}", hash);
                    }
                }
            }
            Ok(())
        }
        Some(Commands::Report { clear, db_path }) => {
            let manager = open_manager(&db_path, DEFAULT_DEPLOYMENTS_DIR)?;
            let reporter = ReportingManager::new(manager.share_connection());

            let report = if clear {
                reporter.get_and_clear_failed_report()?
            } else {
                reporter.get_failed_report()?
            };
            match report {
                Some(report) => println!("{}", report.to_json()),
                None => println!("No pending report."),
            }
            Ok(())
        }
        Some(Commands::Keygen) => {
            let (secret, public) = signing::generate_keypair();
            println!("secret: {}", secret);
            println!("public: {}", public);
            Ok(())
        }
        Some(Commands::Sign {
            manifest_path,
            secret_key,
        }) => {
            let content = std::fs::read(&manifest_path)?;
            let token = signing::sign_manifest(&content, &secret_key)?;
            println!("{}", token);
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            let shell = match shell.as_str() {
                "bash" => clap_complete::Shell::Bash,
                "zsh" => clap_complete::Shell::Zsh,
                "fish" => clap_complete::Shell::Fish,
                _ => clap_complete::Shell::PowerShell,
            };
            clap_complete::generate(shell, &mut cmd, "airlift", &mut std::io::stdout());
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("Airlift Package Manager v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'airlift --help' for usage information");
            Ok(())
        }
    }
}
