use std::path::PathBuf;

use clap::Parser;

use crate::detector::DetectorKind;

#[derive(Parser, Debug)]
#[command(
    name = "detectr",
    about = "Detect package managers in a project and extract dependency graphs",
    version
)]
pub struct Cli {
    /// Project path to scan
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Config file [default: ./.detectr/config.toml, fallback ~/.config/detectr/config.toml]
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory levels below the root to search (0 = root only)
    #[arg(long, value_name = "N")]
    pub depth: Option<usize>,

    /// Only run this detector (repeatable)
    #[arg(long = "include-detector", value_name = "DETECTOR")]
    pub include_detector: Vec<DetectorKind>,

    /// Never run this detector (repeatable)
    #[arg(long = "exclude-detector", value_name = "DETECTOR")]
    pub exclude_detector: Vec<DetectorKind>,

    /// Directory code location files are written to
    #[arg(long, short, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Report format
    #[arg(long, default_value = "terminal", value_name = "FORMAT")]
    pub report: ReportFormat,

    /// Timeout for each external tool, in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Directories evaluated concurrently
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Show every detector, including those that did not apply (-vv for debug logs)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only print summary line
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum ReportFormat {
    Terminal,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_repeatable_detector_flags() {
        let cli = Cli::parse_from([
            "detectr",
            "proj",
            "--exclude-detector",
            "npm-package-json",
            "--exclude-detector",
            "clang",
            "--depth",
            "2",
            "-vv",
        ]);
        assert_eq!(cli.path, PathBuf::from("proj"));
        assert_eq!(
            cli.exclude_detector,
            vec![DetectorKind::NpmPackageJson, DetectorKind::Clang]
        );
        assert_eq!(cli.depth, Some(2));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.report, ReportFormat::Terminal));
    }

    #[test]
    fn test_unknown_detector_is_rejected() {
        assert!(Cli::try_parse_from(["detectr", "--include-detector", "gradle"]).is_err());
    }
}
