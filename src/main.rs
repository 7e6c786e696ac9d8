//! Thin CLI layer: parse args, styled output, and call into fwpack-core.
//! Crash-proof: panic caught and reported; all errors return Result.

mod progress;
mod show;

use clap::builder::PossibleValuesParser;
use clap::{value_parser, Arg, ArgAction, ArgGroup, ArgMatches, Command};
use colored::Colorize;
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use fwpack_core::{
    create_package, open_package, ActiveBackupBackend, Config, FwpackError, HttpTransport,
    InstallationSetMode, Mode, ObjectSpec, Remote, Result, MODES,
};

use crate::progress::TerminalProgress;

// ---- UI helpers (no-op when stdout isn't a TTY) ----

fn use_color() -> bool {
    std::io::stdout().is_terminal() && env::var("NO_COLOR").unwrap_or_default().is_empty()
}

fn success(msg: &str) {
    if use_color() {
        println!("{}", msg.green());
    } else {
        println!("{}", msg);
    }
}

fn error(msg: &str) {
    if use_color() {
        eprintln!("{}", msg.red());
    } else {
        eprintln!("{}", msg);
    }
}

fn info(msg: &str) {
    if use_color() {
        println!("{}", msg.cyan());
    } else {
        println!("{}", msg);
    }
}

fn dim(msg: &str) {
    if use_color() {
        println!("{}", msg.dimmed());
    } else {
        println!("{}", msg);
    }
}

/// Diagnostics go to stderr, filtered by FWPACK_LOG (default: warn).
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("FWPACK_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn exit_code(err: &FwpackError) -> i32 {
    match err {
        FwpackError::Manifest { .. } => 1,
        FwpackError::Usage(_) => 2,
        FwpackError::Connection(_) => 3,
        FwpackError::NotFound(_) => 4,
        FwpackError::FileExists(_) => 5,
        FwpackError::InvalidOption { .. } | FwpackError::InvalidValue { .. } => 6,
        FwpackError::FileAccess { .. } => 7,
        FwpackError::Upload(_) => 8,
        FwpackError::Integrity { .. } => 9,
        FwpackError::UnexpectedResponse { .. } => 10,
    }
}

fn mode_names() -> PossibleValuesParser {
    PossibleValuesParser::new(MODES.map(|m| m.name()))
}

fn cli() -> Command {
    let installation_set_mode = Arg::new("mode")
        .value_parser(["single", "active-inactive"])
        .help("Installation set mode: single or active-inactive (two sets)");

    Command::new("fwpack")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Firmware update package editor: describe objects, then push to the update server")
        .after_help(
            "Examples:\n  fwpack init --product P1234 --mode active-inactive\n  fwpack add rootfs.img --mode raw -o target-device=/dev/mmcblk0p2\n  fwpack edit 0 target-device /dev/mmcblk0p3 --installation-set 1\n  fwpack push\n  fwpack status <uid>",
        )
        .subcommand_required(false)
        .subcommand(
            Command::new("init")
                .about("Create a package file in the current directory")
                .arg(
                    Arg::new("product")
                        .long("product")
                        .required(true)
                        .help("Product id the package belongs to"),
                )
                .arg(installation_set_mode.clone().long("mode").default_value("single")),
        )
        .subcommand(
            Command::new("new")
                .about("Set the package version")
                .arg(Arg::new("version").required(true)),
        )
        .subcommand(
            Command::new("show")
                .about("Show all configured objects")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the package file as JSON"),
                ),
        )
        .subcommand(
            Command::new("export")
                .about("Copy the package file to the given filename")
                .arg(Arg::new("file").required(true).value_parser(value_parser!(PathBuf))),
        )
        .subcommand(
            Command::new("active-backup-backend")
                .about("Set the active/backup bootloader backend")
                .arg(
                    Arg::new("backend")
                        .required(true)
                        .value_parser(PossibleValuesParser::new(
                            fwpack_core::ACTIVE_BACKUP_BACKENDS.map(|b| b.name()),
                        )),
                ),
        )
        .subcommand(
            Command::new("mode")
                .about("Switch installation set mode (package must have no objects)")
                .arg(installation_set_mode.required(true)),
        )
        .subcommand(
            Command::new("add")
                .about("Add an object for the given artifact to every installation set")
                .arg(Arg::new("file").required(true).value_parser(value_parser!(PathBuf)))
                .arg(
                    Arg::new("mode")
                        .short('m')
                        .long("mode")
                        .required(true)
                        .value_parser(mode_names())
                        .help("How the object is installed"),
                )
                .arg(
                    Arg::new("option")
                        .short('o')
                        .long("option")
                        .action(ArgAction::Append)
                        .value_name("KEY=VALUE")
                        .help("Install option, may be repeated"),
                ),
        )
        .subcommand(
            Command::new("edit")
                .about("Edit an object option")
                .arg(Arg::new("object-id").required(true).value_parser(value_parser!(usize)))
                .arg(Arg::new("key").required(true))
                .arg(Arg::new("value").required(true))
                .arg(
                    Arg::new("installation-set")
                        .long("installation-set")
                        .value_parser(value_parser!(usize))
                        .help("Target set; required for per-set options, refused for shared ones"),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove an object from every installation set")
                .arg(Arg::new("object-id").required(true).value_parser(value_parser!(usize))),
        )
        .subcommand(
            Command::new("push")
                .about("Hash all objects and upload the package to the server")
                .arg(
                    Arg::new("quiet")
                        .short('q')
                        .long("quiet")
                        .action(ArgAction::SetTrue)
                        .help("No progress bars"),
                ),
        )
        .subcommand(
            Command::new("pull")
                .about("Download a package from the server into an empty package file")
                .arg(Arg::new("uid").required(true))
                .arg(
                    Arg::new("full")
                        .long("full")
                        .action(ArgAction::SetTrue)
                        .help("Also download every artifact"),
                )
                .arg(
                    Arg::new("metadata")
                        .long("metadata")
                        .action(ArgAction::SetTrue)
                        .help("Only the package metadata"),
                )
                .group(ArgGroup::new("content").args(["full", "metadata"]).required(true)),
        )
        .subcommand(
            Command::new("status")
                .about("Print the server-side status of a pushed package")
                .arg(Arg::new("uid").required(true)),
        )
}

fn string_arg(m: &ArgMatches, name: &str) -> String {
    m.get_one::<String>(name).cloned().unwrap_or_default()
}

fn parse_object_options(m: &ArgMatches, spec: ObjectSpec) -> Result<ObjectSpec> {
    let mut spec = spec;
    for raw in m.get_many::<String>("option").into_iter().flatten() {
        let (key, value) = raw.split_once('=').ok_or_else(|| {
            FwpackError::usage(format!("expected KEY=VALUE, got \"{}\"", raw))
        })?;
        spec = spec.with_option(key.trim(), value);
    }
    Ok(spec)
}

fn run() -> Result<()> {
    let matches = cli().get_matches();
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let config = Config::from_process_env(&cwd);
    tracing::debug!("using {} against {}", config.package_file.display(), config.server_url);

    match matches.subcommand() {
        Some(("init", m)) => {
            let mode: InstallationSetMode = string_arg(m, "mode").parse()?;
            create_package(&config, Some(string_arg(m, "product")), mode)?;
            success(&format!(
                "Created {} ({} mode)",
                config.package_file.display(),
                mode.name()
            ));
        }
        Some(("new", m)) => {
            let version = string_arg(m, "version");
            open_package(&config, false, |package| {
                package.version = Some(version.clone());
                Ok(())
            })?;
            success(&format!("Package version set to {}", version));
        }
        Some(("show", m)) => {
            let text = open_package(&config, true, |package| {
                if m.get_flag("json") {
                    package.to_json()
                } else {
                    Ok(show::render(package))
                }
            })?;
            println!("{}", text.trim_end());
        }
        Some(("export", m)) => {
            let file = m.get_one::<PathBuf>("file").cloned().unwrap_or_default();
            open_package(&config, true, |package| package.dump(&file))?;
            success(&format!("Package exported to {}", file.display()));
        }
        Some(("active-backup-backend", m)) => {
            let backend: ActiveBackupBackend = string_arg(m, "backend").parse()?;
            open_package(&config, false, |package| {
                package.active_backup_backend = backend;
                Ok(())
            })?;
            success(&format!("Active backup backend set to {}", backend));
        }
        Some(("mode", m)) => {
            let mode: InstallationSetMode = string_arg(m, "mode").parse()?;
            open_package(&config, false, |package| package.set_mode(mode))?;
            success(&format!("Installation set mode set to {}", mode.name()));
        }
        Some(("add", m)) => {
            let file = m.get_one::<PathBuf>("file").cloned().unwrap_or_default();
            if !file.is_file() {
                return Err(FwpackError::not_found(format!("file {}", file.display())));
            }
            let mode: Mode = string_arg(m, "mode").parse()?;
            let spec = parse_object_options(m, ObjectSpec::new(&file, mode))?;
            let index = open_package(&config, false, |package| package.objects_mut().create(&spec))?;
            success(&format!("Added object {} ({})", index, file.display()));
        }
        Some(("edit", m)) => {
            let index = m.get_one::<usize>("object-id").copied().unwrap_or_default();
            let key = string_arg(m, "key");
            let value = string_arg(m, "value");
            let set = m.get_one::<usize>("installation-set").copied();
            open_package(&config, false, |package| {
                package.objects_mut().update(index, &key, &value, set)
            })?;
            success(&format!("Object {}: {} = {}", index, key, value));
        }
        Some(("remove", m)) => {
            let index = m.get_one::<usize>("object-id").copied().unwrap_or_default();
            open_package(&config, false, |package| package.objects_mut().remove(index))?;
            success(&format!("Removed object {}", index));
        }
        Some(("push", m)) => {
            let transport = HttpTransport::new(&config);
            let remote = Remote::new(&transport, &config);
            let mut progress = TerminalProgress::new(m.get_flag("quiet"));
            let uid = open_package(&config, true, |package| {
                let report = package.load(Some(&mut progress))?;
                tracing::info!("{} objects, {} files hashed", report.objects, report.hashed);
                package.push(&remote, Some(&mut progress))
            })?;
            success(&format!(
                "Package pushed ({} artifact(s) uploaded)",
                progress.uploaded_objects
            ));
            info(&format!("Package UID: {}", uid));
        }
        Some(("pull", m)) => {
            let uid = string_arg(m, "uid");
            let full = m.get_flag("full");
            let transport = HttpTransport::new(&config);
            let remote = Remote::new(&transport, &config);
            let dest = config.package_dir();
            let report = open_package(&config, false, |package| {
                package.uid = Some(uid.clone());
                package.pull(&remote, full, &dest)
            })?;
            success(&format!("Pulled package {} ({} object(s))", uid, report.objects));
            if full {
                dim(&format!(
                    "{} downloaded, {} already present",
                    report.downloaded, report.skipped
                ));
            }
        }
        Some(("status", m)) => {
            let uid = string_arg(m, "uid");
            let transport = HttpTransport::new(&config);
            let remote = Remote::new(&transport, &config);
            let status = open_package(&config, true, |package| {
                package.uid = Some(uid.clone());
                package.get_status(&remote)
            })?;
            println!("{}", status);
        }
        _ => {
            info(&format!("fwpack {}", env!("CARGO_PKG_VERSION")));
            dim(&format!(
                "Package file: {}",
                Path::new(&config.package_file).display()
            ));
            dim("\nRun `fwpack --help` for details.");
        }
    }

    Ok(())
}

fn main() {
    if !use_color() {
        colored::control::set_override(false);
    }
    init_logging();

    let code = match std::panic::catch_unwind(run) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            error(&format!("Error: {}", e));
            exit_code(&e)
        }
        Err(_) => {
            error("An unexpected error occurred. Please report this issue.");
            1
        }
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        cli().debug_assert();
    }

    #[test]
    fn test_exit_codes_are_distinct_per_kind() {
        assert_eq!(exit_code(&FwpackError::usage("x")), 2);
        assert_eq!(exit_code(&FwpackError::Connection("refused".into())), 3);
        assert_eq!(exit_code(&FwpackError::not_found("object 3")), 4);
        assert_eq!(exit_code(&FwpackError::FileExists(PathBuf::from(".fwpack"))), 5);
        assert_eq!(exit_code(&FwpackError::Upload("rejected".into())), 8);
    }

    #[test]
    fn test_parse_object_options() {
        let m = cli()
            .try_get_matches_from(["fwpack", "add", "fw.bin", "-m", "raw", "-o", "target-device=/dev/sda", "-o", "seek=2"])
            .unwrap();
        let (_, sub) = m.subcommand().unwrap();
        let spec = parse_object_options(sub, ObjectSpec::new("fw.bin", Mode::Raw)).unwrap();
        assert_eq!(spec.options.get("target-device").map(String::as_str), Some("/dev/sda"));
        assert_eq!(spec.options.get("seek").map(String::as_str), Some("2"));

        let m = cli()
            .try_get_matches_from(["fwpack", "add", "fw.bin", "-m", "raw", "-o", "seek"])
            .unwrap();
        let (_, sub) = m.subcommand().unwrap();
        assert!(matches!(
            parse_object_options(sub, ObjectSpec::new("fw.bin", Mode::Raw)),
            Err(FwpackError::Usage(_))
        ));
    }
}
