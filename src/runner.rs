//! # Test Runner
//!
//! Sequential runner for suites that share one provisioned database, plus
//! [`run_main`], the process driver that brackets the suite with harness
//! setup and teardown:
//!
//! ```rust,ignore
//! fn main() -> ExitCode {
//!     let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
//!     runtime.block_on(async {
//!         let harness = Harness::new(config, TestcontainersProvisioner::new(), PgClient::default());
//!         run_main(harness, suite(), Arc::new(NoCleanup), TestFilter::from_env_args())
//!             .await
//!             .exit_code()
//!     })
//! }
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::container::ContainerProvisioner;
use crate::database::{ConnectionHandle, DatabaseClient};
use crate::error::HarnessError;
use crate::fixture::{panic_message, FixtureBuilder, TestContext};
use crate::harness::{Harness, TeardownOutcome};
use crate::hooks::Cleanup;
use crate::lifecycle::HarnessState;

type TestBody<H> = Box<
    dyn Fn(Arc<TestContext>, FixtureBuilder<H>) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

struct TestCase<H> {
    name: String,
    body: TestBody<H>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed(String),
    Panicked(String),
}

impl TestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }
}

#[derive(Debug, Clone)]
pub struct CaseReport {
    pub name: String,
    pub outcome: TestOutcome,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    pub cases: Vec<CaseReport>,
    pub filtered_out: usize,
}

impl SuiteReport {
    pub fn passed(&self) -> usize {
        self.cases.iter().filter(|c| c.outcome.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.cases.len() - self.passed()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome(&self, name: &str) -> Option<&TestOutcome> {
        self.cases
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.outcome)
    }
}

/// Case selection from command-line arguments, following libtest: positional
/// arguments are substring filters (exact with `--exact`), and
/// `--ignored`/`--include-ignored` opt into suites that need Docker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestFilter {
    patterns: Vec<String>,
    exact: bool,
    include_ignored: bool,
}

impl TestFilter {
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut filter = Self::default();
        for arg in args.into_iter().map(Into::into) {
            match arg.as_str() {
                "--exact" => filter.exact = true,
                "--ignored" | "--include-ignored" => filter.include_ignored = true,
                flag if flag.starts_with('-') => {}
                _ => filter.patterns.push(arg),
            }
        }
        filter
    }

    /// Arguments of the current process, skipping the binary name.
    pub fn from_env_args() -> Self {
        Self::from_args(std::env::args().skip(1))
    }

    pub fn include_ignored(&self) -> bool {
        self.include_ignored
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        self.patterns.iter().any(|pattern| {
            if self.exact {
                name == pattern
            } else {
                name.contains(pattern.as_str())
            }
        })
    }
}

pub struct TestSuite<H> {
    cases: Vec<TestCase<H>>,
}

impl<H> Default for TestSuite<H> {
    fn default() -> Self {
        Self { cases: Vec::new() }
    }
}

impl<H> TestSuite<H>
where
    H: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn case<F, Fut>(mut self, name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Arc<TestContext>, FixtureBuilder<H>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.cases.push(TestCase {
            name: name.into(),
            body: Box::new(move |ctx, fixtures| body(ctx, fixtures).boxed()),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cases.iter().map(|c| c.name.as_str())
    }

    /// Run the selected cases one after another. Each case's cleanups run
    /// after its body, whether the body passed, returned an error or panicked.
    pub async fn run(&self, fixtures: &FixtureBuilder<H>, filter: &TestFilter) -> SuiteReport {
        let mut report = SuiteReport::default();
        let selected: Vec<&TestCase<H>> =
            self.cases.iter().filter(|c| filter.matches(&c.name)).collect();
        report.filtered_out = self.cases.len() - selected.len();

        println!("\nrunning {} tests", selected.len());

        for case in selected {
            let ctx = Arc::new(TestContext::new(case.name.clone()));
            let started = Instant::now();

            let result = AssertUnwindSafe(async {
                (case.body)(Arc::clone(&ctx), fixtures.clone()).await
            })
            .catch_unwind()
            .await;
            let cleanup_errors = ctx.run_cleanups().await;

            let outcome = match result {
                Ok(Ok(())) if cleanup_errors.is_empty() => TestOutcome::Passed,
                Ok(Ok(())) => TestOutcome::Failed(
                    cleanup_errors
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; "),
                ),
                Ok(Err(e)) => TestOutcome::Failed(format!("{e:#}")),
                Err(payload) => TestOutcome::Panicked(panic_message(payload.as_ref())),
            };

            let duration = started.elapsed();
            match &outcome {
                TestOutcome::Passed => {
                    println!("test {} ... ok", case.name);
                    info!(test = %case.name, duration_ms = duration.as_millis() as u64, "test passed");
                }
                TestOutcome::Failed(reason) | TestOutcome::Panicked(reason) => {
                    println!("test {} ... FAILED", case.name);
                    warn!(test = %case.name, reason = %reason, "test failed");
                }
            }

            report.cases.push(CaseReport {
                name: case.name.clone(),
                outcome,
                duration,
            });
        }

        print_summary(&report);
        report
    }
}

fn print_summary(report: &SuiteReport) {
    let failures: Vec<&CaseReport> = report
        .cases
        .iter()
        .filter(|c| !c.outcome.is_success())
        .collect();

    if !failures.is_empty() {
        println!("\nfailures:");
        for case in &failures {
            if let TestOutcome::Failed(reason) | TestOutcome::Panicked(reason) = &case.outcome {
                println!("    {}: {}", case.name, reason);
            }
        }
    }

    println!(
        "\ntest result: {}. {} passed; {} failed; {} filtered out\n",
        if report.is_success() { "ok" } else { "FAILED" },
        report.passed(),
        report.failed(),
        report.filtered_out
    );
}

#[derive(Debug)]
pub enum RunOutcome {
    /// Setup failed; no test case ran and nothing is left to tear down.
    SetupFailed(HarnessError),
    Completed {
        report: SuiteReport,
        teardown: TeardownOutcome,
    },
}

impl RunOutcome {
    /// The suite's result decides the code; teardown problems never do.
    pub fn exit_code(&self) -> ExitCode {
        if self.is_success() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            RunOutcome::SetupFailed(_) => false,
            RunOutcome::Completed { report, .. } => report.is_success(),
        }
    }

    pub fn report(&self) -> Option<&SuiteReport> {
        match self {
            RunOutcome::SetupFailed(_) => None,
            RunOutcome::Completed { report, .. } => Some(report),
        }
    }
}

/// Set up the harness, run the suite against it and tear it down.
pub async fn run_main<P, C>(
    mut harness: Harness<P, C>,
    suite: TestSuite<C::Handle>,
    cleanup: Arc<dyn Cleanup<C::Handle>>,
    filter: TestFilter,
) -> RunOutcome
where
    P: ContainerProvisioner,
    C: DatabaseClient,
{
    let (handle, mut teardown) = match harness.setup().await {
        Ok(ready) => ready,
        Err(e) => {
            error!(
                error = %e,
                provisioning = e.is_provisioning(),
                connectivity = e.is_connectivity(),
                "harness setup failed; no tests were run"
            );
            return RunOutcome::SetupFailed(e);
        }
    };

    if let Err(e) = harness.lifecycle().transition(HarnessState::Running) {
        warn!(error = %e, "unexpected harness state before running tests");
    }

    let fixtures = FixtureBuilder::new(Arc::clone(&handle), cleanup);
    let report = suite.run(&fixtures, &filter).await;

    handle.close().await;
    let teardown = teardown.run().await;

    info!(
        passed = report.passed(),
        failed = report.failed(),
        teardown = ?teardown,
        "test run finished"
    );

    RunOutcome::Completed { report, teardown }
}
