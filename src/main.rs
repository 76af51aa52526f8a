//! `verifyconf`: loads a MarFS config, optionally walks one namespace
//! (and its subspaces), and checks that its MDAL/DAL backends are
//! reachable. Exit code is 0 on a clean pass, or the count of
//! uncorrected issues found (capped at 255).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{arg, command, ArgAction};
use log::{error, info, warn};

use marfs::config::Config;
use marfs::mdal::{MetadataAbstractionLayer, PosixMdal};

fn init_logs() {
    env_logger::Builder::from_default_env().filter_level(log::LevelFilter::Info).init();
}

fn main() -> ExitCode {
    init_logs();

    let matches = command!() // requires `cargo` feature
        .arg(arg!(-c --config <PATH> "Path to the marfsconfigrc TOML file").required(false))
        .arg(arg!(-n --namespace <NSPATH> "Namespace mount path to check").default_value("/"))
        .arg(arg!(-u --user <NAME> "User identity to check permissions against").required(false))
        .arg(arg!(-m --mdal "Check MDAL (metadata backend) reachability").action(ArgAction::SetTrue))
        .arg(arg!(-d --dal "Check DAL (data backend) reachability").action(ArgAction::SetTrue))
        .arg(arg!(-r --recurse "Recurse into subspaces of the target namespace").action(ArgAction::SetTrue))
        .arg(arg!(-f --fix "Attempt to correct any issues found").action(ArgAction::SetTrue))
        .arg(arg!(-a --all "Equivalent to -m -d -r").action(ArgAction::SetTrue))
        .get_matches();

    let config_path = match matches.get_one::<String>("config") {
        Some(p) => PathBuf::from(p),
        None => match Config::default_path() {
            Ok(p) => p,
            Err(e) => {
                error!("could not resolve a config path: {e}");
                return ExitCode::FAILURE;
            }
        },
    };

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config from {}: {e}", config_path.display());
            return ExitCode::FAILURE;
        }
    };

    let all = matches.get_flag("all");
    let check_mdal = all || matches.get_flag("mdal");
    let check_dal = all || matches.get_flag("dal");
    let recurse = all || matches.get_flag("recurse");
    let fix = matches.get_flag("fix");
    let target = matches.get_one::<String>("namespace").map(String::as_str).unwrap_or("/");

    let pos = match config.traverse(target, false) {
        Ok(p) => p,
        Err(e) => {
            error!("failed to resolve namespace '{target}': {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut ns_indices = vec![pos.ns];
    if recurse {
        ns_indices.extend(subspaces_of(&config, pos.ns));
    }

    let mut issue_count: u32 = 0;
    for &idx in &ns_indices {
        let ns = &config.namespaces[idx];
        info!("checking namespace '{}'", ns.id);

        if check_mdal {
            let mdal = PosixMdal::new(&ns.md_path);
            match mdal.stat(std::path::Path::new("/")) {
                Ok(_) => info!("  MDAL OK: {}", ns.md_path),
                Err(e) => {
                    warn!("  MDAL unreachable for '{}': {e}", ns.id);
                    issue_count += 1;
                    if fix && std::fs::create_dir_all(&ns.md_path).is_ok() {
                        info!("  MDAL path created: {}", ns.md_path);
                        issue_count -= 1;
                    }
                }
            }
        }

        if check_dal {
            match config.repo_by_name(&ns.iwrite_repo) {
                Some(repo) => match repo.validate() {
                    Ok(()) => info!("  DAL config OK: repo '{}' ({:?})", repo.name, repo.dal),
                    Err(e) => {
                        warn!("  DAL config invalid for repo '{}': {e}", repo.name);
                        issue_count += 1;
                    }
                },
                None => {
                    warn!("  namespace '{}' references unknown repo '{}'", ns.id, ns.iwrite_repo);
                    issue_count += 1;
                }
            }
        }
    }

    if issue_count == 0 {
        info!("verifyconf: no issues found");
        ExitCode::SUCCESS
    } else {
        warn!("verifyconf: {issue_count} uncorrected issue(s)");
        ExitCode::from(issue_count.min(255) as u8)
    }
}

fn subspaces_of(config: &Config, root: usize) -> Vec<usize> {
    let root_path = &config.namespaces[root].mnt_path;
    config
        .namespaces
        .iter()
        .enumerate()
        .filter(|(i, ns)| *i != root && (root_path == "/" || ns.mnt_path.starts_with(root_path.as_str())))
        .map(|(i, _)| i)
        .collect()
}
