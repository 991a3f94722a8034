use anyhow::Context;
use clap::{Parser, ValueEnum};
use pagegrade::pixelmatch::MatchOptions;
use pagegrade::{BrowserConfig, DimensionPolicy, GraderConfig, ScoreOptions, Session, Viewport};
use std::io::{self, Write};
use std::path::PathBuf;

/// Render HTML submissions in headless Chrome and score them against a reference image.
#[derive(Debug, Parser)]
#[command(name = "pagegrade", version, about)]
struct Cli {
    /// Base directory, prepended verbatim to each submission name
    #[arg(short = 'b', long = "base")]
    base: PathBuf,

    /// The reference image to compare the rendered page to
    #[arg(short = 'r', long = "reference")]
    reference: PathBuf,

    /// Directory whose entries are the submissions to grade
    #[arg(short = 'd', long = "directories")]
    directories: PathBuf,

    /// Chrome/Chromium executable (auto-detected by default)
    #[arg(long)]
    chrome: Option<PathBuf>,

    /// Disable Chrome's sandbox (needed when running as root in containers)
    #[arg(long)]
    no_sandbox: bool,

    /// Navigation timeout in milliseconds
    #[arg(long, default_value_t = 30000)]
    timeout_ms: u64,

    /// Viewport width
    #[arg(long, default_value_t = 1366)]
    width: u32,

    /// Viewport height
    #[arg(long, default_value_t = 768)]
    height: u32,

    /// Pixel matching threshold (0-1, smaller is more sensitive)
    #[arg(long, default_value_t = 0.1)]
    threshold: f64,

    /// Count anti-aliased pixels as mismatches
    #[arg(long)]
    include_aa: bool,

    /// What to do when a rendered page is not the size of the reference
    #[arg(long, value_enum, default_value_t = Policy::Strict)]
    dimension_policy: Policy,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Policy {
    Strict,
    Crop,
}

impl From<Policy> for DimensionPolicy {
    fn from(p: Policy) -> Self {
        match p {
            Policy::Strict => DimensionPolicy::Strict,
            Policy::Crop => DimensionPolicy::Crop,
        }
    }
}

impl Cli {
    fn configs(&self) -> (GraderConfig, BrowserConfig) {
        let viewport = Viewport {
            width: self.width,
            height: self.height,
        };
        let grader = GraderConfig {
            viewport,
            score: ScoreOptions {
                matching: MatchOptions {
                    threshold: self.threshold,
                    include_aa: self.include_aa,
                    ..Default::default()
                },
                dimension_policy: self.dimension_policy.into(),
            },
            ..GraderConfig::new(&self.base, &self.directories, &self.reference)
        };
        let browser = BrowserConfig {
            viewport,
            timeout_ms: self.timeout_ms,
            chrome_path: self.chrome.clone(),
            sandbox: !self.no_sandbox,
        };
        (grader, browser)
    }
}

/// Grade every submission with sessions built by `factory`, returning the JSON mapping.
async fn grade<S, F>(cli: &Cli, factory: F) -> anyhow::Result<String>
where
    S: Session + 'static,
    F: FnOnce(BrowserConfig) -> pagegrade::Result<S> + Send + 'static,
{
    let (grader, browser) = cli.configs();
    let results = pagegrade::batch::run_with(&grader, move || factory(browser))
        .await
        .with_context(|| format!("grading {} failed", cli.directories.display()))?;
    let json = if cli.pretty {
        serde_json::to_string_pretty(&results)?
    } else {
        serde_json::to_string(&results)?
    };
    Ok(json)
}

/// Write the outcome of a run and return the process exit code. Only a
/// successful run touches `stdout`.
fn report(outcome: anyhow::Result<String>, stdout: &mut impl Write, stderr: &mut impl Write) -> i32 {
    match outcome {
        Ok(json) => match writeln!(stdout, "{}", json) {
            Ok(()) => 0,
            Err(e) => {
                let _ = writeln!(stderr, "Failed to write results: {}", e);
                1
            }
        },
        Err(e) => {
            let _ = writeln!(stderr, "{:?}", e);
            1
        }
    }
}

/// Stderr logger printing bare messages (`Grading: <path>`, mismatch counts).
fn logger() -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(log::LevelFilter::Info)
        .format(|buf, record| writeln!(buf, "{}", record.args()));
    builder
}

fn main() {
    // Progress goes to stderr; stdout only carries the final JSON
    logger().parse_default_env().init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let outcome = runtime.block_on(grade(&cli, pagegrade::cdp::CdpSession::launch));
    // the batch has already shut the browser down, on success or failure
    drop(runtime);

    let code = report(outcome, &mut io::stdout().lock(), &mut io::stderr().lock());
    if code != 0 {
        std::process::exit(code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pagegrade::{Error, PageContext};
    use std::sync::{Arc, Mutex};

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["pagegrade"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    // a backend that never comes up
    struct Unlaunchable;

    impl Session for Unlaunchable {
        type Page = Unlaunchable;

        fn new_page(&mut self) -> pagegrade::Result<Unlaunchable> {
            unreachable!("no page is opened without a browser")
        }

        fn close(self) -> pagegrade::Result<()> {
            Ok(())
        }
    }

    impl PageContext for Unlaunchable {
        fn set_viewport(&mut self, _viewport: Viewport) -> pagegrade::Result<()> {
            Ok(())
        }

        fn goto(&mut self, _url: &str) -> pagegrade::Result<()> {
            Ok(())
        }

        fn screenshot(&mut self, _full_page: bool) -> pagegrade::Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn close(self) -> pagegrade::Result<()> {
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(data)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn requires_base_reference_and_directories() {
        assert!(Cli::try_parse_from(["pagegrade", "-b", "/srv/"]).is_err());

        let cli = Cli::try_parse_from([
            "pagegrade",
            "-b",
            "/srv/",
            "-r",
            "ref.png",
            "--directories",
            "/srv/list",
        ])
        .unwrap();
        assert_eq!(cli.base, PathBuf::from("/srv/"));
        assert_eq!(cli.reference, PathBuf::from("ref.png"));
        assert_eq!(cli.directories, PathBuf::from("/srv/list"));
    }

    #[test]
    fn defaults_match_grader_defaults() {
        let cli = Cli::try_parse_from(["pagegrade", "-b", "b", "-r", "r", "-d", "d"]).unwrap();
        let (grader, browser) = cli.configs();
        assert_eq!(grader.viewport, Viewport::default());
        assert_eq!(grader.score, ScoreOptions::default());
        assert_eq!(browser.timeout_ms, BrowserConfig::default().timeout_ms);
        assert!(browser.sandbox);
    }

    #[test]
    fn crop_policy_and_threshold_flow_into_config() {
        let cli = Cli::try_parse_from([
            "pagegrade",
            "-b",
            "b",
            "-r",
            "r",
            "-d",
            "d",
            "--dimension-policy",
            "crop",
            "--threshold",
            "0.3",
            "--no-sandbox",
        ])
        .unwrap();
        let (grader, browser) = cli.configs();
        assert_eq!(grader.score.dimension_policy, DimensionPolicy::Crop);
        assert_eq!(grader.score.matching.threshold, 0.3);
        assert!(!browser.sandbox);
    }

    #[tokio::test]
    async fn failed_run_prints_nothing_to_stdout() {
        let tmp = tempfile::tempdir().unwrap();
        let reference = tmp.path().join("reference.png");
        let png = pagegrade::raster::encode_png(&pagegrade::Raster::filled(4, 4, [255; 4])).unwrap();
        std::fs::write(&reference, png).unwrap();
        let subs = tmp.path().join("subs");
        std::fs::create_dir(&subs).unwrap();

        let cli = cli(&[
            "-b",
            &format!("{}/", subs.display()),
            "-r",
            reference.to_str().unwrap(),
            "-d",
            subs.to_str().unwrap(),
        ]);
        let outcome = grade(&cli, |_: BrowserConfig| -> pagegrade::Result<Unlaunchable> {
            Err(Error::LaunchError("chrome not found".into()))
        })
        .await;

        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        assert_eq!(report(outcome, &mut stdout, &mut stderr), 1);
        assert!(stdout.is_empty());
        let message = String::from_utf8(stderr).unwrap();
        assert!(message.contains("chrome not found"), "stderr was {:?}", message);
    }

    #[tokio::test]
    async fn successful_run_prints_only_the_mapping() {
        let tmp = tempfile::tempdir().unwrap();
        let reference = tmp.path().join("reference.png");
        let png = pagegrade::raster::encode_png(&pagegrade::Raster::filled(4, 4, [255; 4])).unwrap();
        std::fs::write(&reference, png).unwrap();
        let subs = tmp.path().join("subs");
        std::fs::create_dir(&subs).unwrap();

        // no submissions: the browser comes up and goes down again
        let cli = cli(&[
            "-b",
            &format!("{}/", subs.display()),
            "-r",
            reference.to_str().unwrap(),
            "-d",
            subs.to_str().unwrap(),
        ]);
        let outcome = grade(&cli, |_: BrowserConfig| Ok(Unlaunchable)).await;

        let (mut stdout, mut stderr) = (Vec::new(), Vec::new());
        assert_eq!(report(outcome, &mut stdout, &mut stderr), 0);
        assert_eq!(String::from_utf8(stdout).unwrap(), "{}\n");
        assert!(stderr.is_empty());
    }

    #[test]
    fn log_lines_carry_only_the_message() {
        use log::Log;

        let sink = SharedBuf::default();
        let logger = logger()
            .target(env_logger::Target::Pipe(Box::new(sink.clone())))
            .build();

        logger.log(
            &log::Record::builder()
                .args(format_args!("Grading: {}", "/srv/repos/alice"))
                .level(log::Level::Info)
                .target("pagegrade::capture")
                .build(),
        );
        logger.log(
            &log::Record::builder()
                .args(format_args!("{}", 42))
                .level(log::Level::Info)
                .target("pagegrade::score")
                .build(),
        );

        assert_eq!(sink.contents(), "Grading: /srv/repos/alice\n42\n");
    }
}
