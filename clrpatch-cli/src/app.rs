use std::path::PathBuf;

use clap::Parser;

/// clrpatch - replace .NET method bodies selected by signature
#[derive(Debug, Parser)]
#[command(name = "clrpatch", version, about, long_about = None)]
pub struct Cli {
    /// Module to patch, or a directory containing it. Surrounding quotes are ignored.
    #[arg(value_name = "TARGET")]
    pub target: Option<String>,

    /// Directory used when TARGET is omitted.
    #[arg(long, env = "CLRPATCH_INSTALL_DIR", value_name = "DIR")]
    pub install_dir: Option<PathBuf>,

    /// File to patch when the target is a directory.
    #[arg(long, value_name = "NAME")]
    pub file_name: Option<String>,

    /// Patch rule, e.g. `IsFeatureActivated(featureGuid) -> true`. Repeatable.
    #[arg(short, long = "rule", value_name = "RULE")]
    pub rules: Vec<String>,

    /// File with one rule per line; `#` starts a comment line.
    #[arg(long = "rules", value_name = "FILE")]
    pub rules_file: Option<PathBuf>,

    /// Write the patched module here instead of replacing the target.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Do not move the target to `<target>.bak` before replacing it.
    #[arg(long)]
    pub no_backup: bool,

    /// Fail when two rules match the same method instead of letting the last one win.
    #[arg(long)]
    pub strict: bool,

    /// Exit with an error when no method matched any rule.
    #[arg(long)]
    pub fail_on_no_match: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_repeated_rules() {
        let cli = Cli::try_parse_from([
            "clrpatch",
            "\"C:/Program Files/Acme\"",
            "--file-name",
            "Acme.Common.dll",
            "-r",
            "IsFeatureActivated(featureGuid) -> true",
            "--rule",
            "static GetEdition(key) -> \"Pro\"",
            "--strict",
        ])
        .unwrap();
        assert_eq!(cli.target.as_deref(), Some("\"C:/Program Files/Acme\""));
        assert_eq!(cli.rules.len(), 2);
        assert!(cli.strict);
        assert!(!cli.no_backup);
    }
}
