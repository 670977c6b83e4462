use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clrpatch::{AuditEvent, Module, OverlapPolicy, RuleSet};

use crate::app::Cli;

/// Where the module is read from and where the patched image goes.
#[derive(Debug, PartialEq, Eq)]
struct Plan {
    input: PathBuf,
    dest: PathBuf,
    /// Copy `dest` here before writing.
    backup: Option<PathBuf>,
}

pub fn run(cli: &Cli) -> anyhow::Result<()> {
    let target = resolve_target(
        cli.target.as_deref(),
        cli.install_dir.as_deref(),
        cli.file_name.as_deref(),
    )?;
    let rules = load_rules(cli)?;
    let plan = plan(&target, cli.output.as_deref(), cli.no_backup);
    log::debug!("{} rules, reading {}", rules.len(), plan.input.display());

    let mut module = Module::from_path(&plan.input)
        .with_context(|| format!("failed to load module: {}", plan.input.display()))?;

    let report = rules
        .apply(&mut module, &mut |event: &AuditEvent| match event {
            AuditEvent::Patched { method, .. } => println!("Patching: {method}"),
            AuditEvent::NoMatches => log::warn!("{event}"),
        })
        .context("failed to apply rules")?;

    if report.is_empty() && cli.fail_on_no_match {
        bail!("no method in {} matched any rule", plan.input.display());
    }

    save(&plan, |dest| module.write_to_path(dest))?;

    println!(
        "Successfully patched {} method(s) in {}",
        report.len(),
        plan.dest.display()
    );
    Ok(())
}

/// Resolve the module path from the positional target or the install directory.
fn resolve_target(
    target: Option<&str>,
    install_dir: Option<&Path>,
    file_name: Option<&str>,
) -> anyhow::Result<PathBuf> {
    let path = match target {
        Some(target) => PathBuf::from(target.trim().replace('"', "")),
        None => match install_dir {
            Some(dir) => dir.to_path_buf(),
            None => bail!("no target given; pass TARGET or set CLRPATCH_INSTALL_DIR"),
        },
    };

    let path = if path.is_dir() {
        let Some(name) = file_name else {
            bail!("{} is a directory; pass --file-name", path.display());
        };
        path.join(name)
    } else {
        path
    };

    if !path.is_file() {
        bail!("unable to locate {}", path.display());
    }
    Ok(path)
}

fn load_rules(cli: &Cli) -> anyhow::Result<RuleSet> {
    let mut rules = RuleSet::new().with_policy(if cli.strict {
        OverlapPolicy::Reject
    } else {
        OverlapPolicy::LastWins
    });

    if let Some(file) = &cli.rules_file {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("failed to read rules: {}", file.display()))?;
        let parsed: RuleSet = text
            .parse()
            .with_context(|| format!("invalid rule in {}", file.display()))?;
        rules.append(parsed);
    }
    for text in &cli.rules {
        rules.push(text.parse()?);
    }

    if rules.is_empty() {
        bail!("no rules given; pass --rule or --rules");
    }
    Ok(rules)
}

/// Back up the destination, then hand it to `write`.
///
/// The backup is a copy, so `dest` stays in place until `write` atomically replaces it.
fn save<F>(plan: &Plan, write: F) -> anyhow::Result<()>
where
    F: FnOnce(&Path) -> clrpatch::Result<()>,
{
    if let Some(backup) = &plan.backup {
        std::fs::copy(&plan.dest, backup).with_context(|| {
            format!(
                "could not create backup {}; try again with higher privileges",
                backup.display()
            )
        })?;
        log::info!("backup written to {}", backup.display());
    }

    write(&plan.dest).with_context(|| format!("failed to save {}", plan.dest.display()))
}

fn plan(target: &Path, output: Option<&Path>, no_backup: bool) -> Plan {
    if let Some(output) = output {
        return Plan {
            input: target.to_path_buf(),
            dest: output.to_path_buf(),
            backup: None,
        };
    }
    if no_backup {
        return Plan {
            input: target.to_path_buf(),
            dest: target.to_path_buf(),
            backup: None,
        };
    }

    let mut backup = target.as_os_str().to_owned();
    backup.push(".bak");
    let backup = PathBuf::from(backup);
    // An existing backup is the pristine original; patch from it again.
    if backup.is_file() {
        Plan {
            input: backup,
            dest: target.to_path_buf(),
            backup: None,
        }
    } else {
        Plan {
            input: target.to_path_buf(),
            dest: target.to_path_buf(),
            backup: Some(backup),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("clrpatch").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_resolve_directory_target() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("Acme.Common.dll");
        std::fs::write(&file, b"MZ").unwrap();

        let quoted = format!("\"{}\"", dir.path().display());
        let resolved = resolve_target(Some(&quoted), None, Some("Acme.Common.dll")).unwrap();
        assert_eq!(resolved, file);

        let resolved = resolve_target(None, Some(dir.path()), Some("Acme.Common.dll")).unwrap();
        assert_eq!(resolved, file);

        assert!(resolve_target(Some(&quoted), None, None).is_err());
        assert!(resolve_target(Some(&quoted), None, Some("Missing.dll")).is_err());
        assert!(resolve_target(None, None, None).is_err());
    }

    #[test]
    fn test_plan_backup() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("Acme.Common.dll");
        let backup = dir.path().join("Acme.Common.dll.bak");

        assert_eq!(
            plan(&target, None, false),
            Plan {
                input: target.clone(),
                dest: target.clone(),
                backup: Some(backup.clone()),
            }
        );

        std::fs::write(&backup, b"MZ").unwrap();
        assert_eq!(
            plan(&target, None, false),
            Plan {
                input: backup,
                dest: target.clone(),
                backup: None,
            }
        );

        let output = dir.path().join("out.dll");
        assert_eq!(plan(&target, Some(&output), false).dest, output);
        assert_eq!(plan(&target, None, true).backup, None);
    }

    #[test]
    fn test_failed_save_keeps_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("Acme.Common.dll");
        std::fs::write(&target, b"original").unwrap();
        let plan = plan(&target, None, false);

        let err = save(&plan, |_| {
            Err(clrpatch::Error::Io(std::io::Error::other("disk full")))
        })
        .unwrap_err();
        assert!(err.to_string().contains("failed to save"));
        assert_eq!(std::fs::read(&target).unwrap(), b"original");
        assert_eq!(std::fs::read(dir.path().join("Acme.Common.dll.bak")).unwrap(), b"original");
    }

    #[test]
    fn test_save_writes_after_backup() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("Acme.Common.dll");
        std::fs::write(&target, b"original").unwrap();
        let plan = plan(&target, None, false);

        save(&plan, |dest| {
            std::fs::write(dest, b"patched")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"patched");
        assert_eq!(std::fs::read(dir.path().join("Acme.Common.dll.bak")).unwrap(), b"original");
    }

    #[test]
    fn test_load_rules_from_file_and_flags() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rules.txt");
        std::fs::write(&file, "# licensing\nIsFeatureActivated(featureGuid) -> true\n").unwrap();
        let path = file.to_string_lossy().into_owned();

        let rules = load_rules(&cli(&["--rules", &path, "-r", "Refresh(force*) -> void", "--strict"])).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.policy(), OverlapPolicy::Reject);
        assert_eq!(rules.rules()[1].label(), "Refresh(force*) -> void");

        assert!(load_rules(&cli(&[])).is_err());
        assert!(load_rules(&cli(&["-r", "Broken ->"])).is_err());
    }
}
