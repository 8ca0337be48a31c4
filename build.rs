// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn db_path_arg() -> Arg {
    Arg::new("db_path")
        .short('d')
        .long("db-path")
        .value_name("PATH")
        .default_value("/var/lib/airlift/airlift.db")
        .help("Database path")
}

fn deployments_dir_arg() -> Arg {
    Arg::new("deployments_dir")
        .long("deployments-dir")
        .value_name("DIR")
        .default_value("/var/lib/airlift/deployments")
        .help("Directory holding one subdirectory per package")
}

fn build_cli() -> Command {
    Command::new("airlift")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Airlift Contributors")
        .about("Over-the-air content package manager with staged installs and rollback")
        .subcommand_required(false)
        .subcommand(
            Command::new("init")
                .about("Initialize the Airlift database")
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("status")
                .about("Show current/previous packages, the staged install, and flags")
                .arg(db_path_arg())
                .arg(deployments_dir_arg()),
        )
        .subcommand(
            Command::new("stage")
                .about("Verify a downloaded package's manifest and stage it for install")
                .arg(Arg::new("manifest_path").required(true).help("Path to the manifest file"))
                .arg(
                    Arg::new("local_dir")
                        .required(true)
                        .help("Downloaded package directory name"),
                )
                .arg(
                    Arg::new("token")
                        .short('t')
                        .long("token")
                        .required(true)
                        .help("Signed token over the manifest (base64)"),
                )
                .arg(
                    Arg::new("public_key")
                        .short('p')
                        .long("public-key")
                        .required(true)
                        .help("Public key (base64)"),
                )
                .arg(
                    Arg::new("mode")
                        .short('m')
                        .long("mode")
                        .default_value("on_next_restart")
                        .help("Install mode"),
                )
                .arg(
                    Arg::new("min_background_duration")
                        .long("min-background-duration")
                        .help("Minimum background duration in seconds (on_next_resume only)"),
                )
                .arg(
                    Arg::new("rollback_timeout")
                        .long("rollback-timeout")
                        .help("Confirmation timeout in seconds, stored for the host runtime"),
                )
                .arg(db_path_arg())
                .arg(deployments_dir_arg()),
        )
        .subcommand(
            Command::new("apply")
                .about("Apply a verified package, making it current (awaits confirmation)")
                .arg(Arg::new("manifest_path").required(true).help("Path to the manifest file"))
                .arg(db_path_arg())
                .arg(deployments_dir_arg()),
        )
        .subcommand(
            Command::new("confirm")
                .about("Confirm that the applied package booted successfully")
                .arg(db_path_arg())
                .arg(deployments_dir_arg()),
        )
        .subcommand(
            Command::new("start")
                .about("Run the startup recovery rule (binary-change and rollback detection)")
                .arg(
                    Arg::new("binary_build_time")
                        .required(true)
                        .help("Build identifier of the running binary"),
                )
                .arg(
                    Arg::new("app_version")
                        .short('a')
                        .long("app-version")
                        .default_value("0.0.0")
                        .help("Version of the running binary"),
                )
                .arg(
                    Arg::new("deployment_key")
                        .short('k')
                        .long("deployment-key")
                        .help("Deployment key configured for this binary"),
                )
                .arg(db_path_arg())
                .arg(deployments_dir_arg()),
        )
        .subcommand(
            Command::new("revert")
                .about("Blacklist the current package and revert to the previous version")
                .arg(db_path_arg())
                .arg(deployments_dir_arg()),
        )
        .subcommand(
            Command::new("clean")
                .about("Remove deployment directories not referenced by any package slot")
                .arg(db_path_arg())
                .arg(deployments_dir_arg()),
        )
        .subcommand(
            Command::new("failed")
                .about("List (or clear) the failed-update blacklist")
                .arg(
                    Arg::new("clear")
                        .long("clear")
                        .action(clap::ArgAction::SetTrue)
                        .help("Clear the blacklist instead of listing it"),
                )
                .arg(db_path_arg()),
        )
        .subcommand(
            Command::new("report")
                .about("Show (or consume) the pending status report")
                .arg(
                    Arg::new("clear")
                        .long("clear")
                        .action(clap::ArgAction::SetTrue)
                        .help("Atomically read and clear the report"),
                )
                .arg(db_path_arg()),
        )
        .subcommand(Command::new("keygen").about("Generate a signing keypair"))
        .subcommand(
            Command::new("sign")
                .about("Sign a manifest file, printing the signed token")
                .arg(Arg::new("manifest_path").required(true).help("Path to the manifest file"))
                .arg(
                    Arg::new("secret_key")
                        .short('s')
                        .long("secret-key")
                        .required(true)
                        .help("Secret key (base64)"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("airlift.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
