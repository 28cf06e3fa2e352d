//! TAP (Test Anything Protocol) harness for on-device tests.
//!
//! Only built with the `tap-tests` feature. Tests live in `tap_tests`
//! modules next to the code they cover and are collected with `inventory`:
//!
//! ```ignore
//! #[cfg(feature = "tap-tests")]
//! mod tap_tests {
//!     use super::*;
//!     use sniffer_census_esp32_macros::tap_test;
//!
//!     #[tap_test]
//!     fn beacon_is_infrastructure() {
//!         assert!(matches!(classify(&BEACON), Classification::Frame(_)));
//!     }
//! }
//! ```
//!
//! The `device-tests` binary runs everything and prints TAP on the serial
//! console, so the same suite runs on the host, QEMU and real boards. Set
//! `TAP_FILTER` to run only tests whose name contains that string.

use std::io::{self, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

pub use inventory;

/// Result type for fallible test functions.
pub type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Registration hook generated by `#[tap_test]`.
pub type TestRegisterFn = fn(&mut TestRunner);

/// A collected test.
pub struct TapTestEntry {
    /// Test function name.
    pub name: &'static str,
    /// Runs the test on a runner.
    pub register: TestRegisterFn,
}

impl TapTestEntry {
    pub const fn new(name: &'static str, register: TestRegisterFn) -> Self {
        Self { name, register }
    }
}

inventory::collect!(TapTestEntry);

/// Collected tests whose name contains `filter` (all if `None`).
pub fn selected_tests(filter: Option<&str>) -> Vec<&'static TapTestEntry> {
    inventory::iter::<TapTestEntry>
        .into_iter()
        .filter(|entry| filter.map_or(true, |f| entry.name.contains(f)))
        .collect()
}

/// Run collected tests, printing TAP to stdout. Returns true if all passed.
pub fn run_all_tests(filter: Option<&str>) -> bool {
    let tests = selected_tests(filter);
    let mut runner = TestRunner::new();

    runner.print_header(tests.len());
    if let Some(f) = filter {
        runner.comment(&format!("filter: {}", f));
    }
    for entry in tests {
        (entry.register)(&mut runner);
    }
    runner.finish()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Outcome of one test, before it is printed.
enum Verdict {
    Pass,
    Fail(String),
}

/// Runs tests and writes TAP lines to a sink.
pub struct TestRunner {
    out: Box<dyn Write>,
    tests_run: usize,
    tests_passed: usize,
    tests_failed: usize,
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRunner {
    /// Runner printing to stdout.
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    /// Runner printing to `out`.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        Self {
            out,
            tests_run: 0,
            tests_passed: 0,
            tests_failed: 0,
        }
    }

    /// Run a fallible test. `Err` and panics are failures.
    pub fn run<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() -> TestResult + std::panic::UnwindSafe,
    {
        let started = Instant::now();
        let verdict = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(Ok(())) => Verdict::Pass,
            Ok(Err(e)) => Verdict::Fail(format!("Error: {}", e)),
            Err(payload) => Verdict::Fail(format!("Panic: {}", panic_message(&*payload))),
        };
        self.record(name, verdict, started);
    }

    /// Run a test that signals failure by panicking.
    pub fn run_assert<F>(&mut self, name: &str, test_fn: F)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        self.run(name, || {
            test_fn();
            Ok(())
        });
    }

    /// Run a test that must panic, optionally with a message containing
    /// `expected`.
    pub fn run_should_panic<F>(&mut self, name: &str, test_fn: F, expected: Option<&str>)
    where
        F: FnOnce() + std::panic::UnwindSafe,
    {
        let started = Instant::now();
        let verdict = match catch_unwind(AssertUnwindSafe(test_fn)) {
            Ok(()) => Verdict::Fail("Expected panic but test completed normally".into()),
            Err(payload) => {
                let msg = panic_message(&*payload);
                match expected {
                    Some(want) if !msg.contains(want) => Verdict::Fail(format!(
                        "Expected panic containing '{}', got '{}'",
                        want, msg
                    )),
                    _ => Verdict::Pass,
                }
            }
        };
        self.record(name, verdict, started);
    }

    fn record(&mut self, name: &str, verdict: Verdict, started: Instant) {
        self.tests_run += 1;
        let n = self.tests_run;
        let elapsed_ms = started.elapsed().as_millis();

        // A broken console cannot be reported anywhere else
        let _ = match verdict {
            Verdict::Pass => {
                self.tests_passed += 1;
                writeln!(self.out, "ok {} - {} # {} ms", n, name, elapsed_ms)
            }
            Verdict::Fail(why) => {
                self.tests_failed += 1;
                writeln!(self.out, "not ok {} - {}", n, name)
                    .and_then(|_| writeln!(self.out, "# {}", why))
            }
        };
        let _ = self.out.flush();
    }

    /// Print the TAP version and plan.
    pub fn print_header(&mut self, planned_tests: usize) {
        let _ = writeln!(self.out, "TAP version 14");
        let _ = writeln!(self.out, "1..{}", planned_tests);
    }

    /// Print a diagnostic line.
    pub fn comment(&mut self, msg: &str) {
        let _ = writeln!(self.out, "# {}", msg);
    }

    /// Print the summary. Returns true if nothing failed.
    pub fn finish(&mut self) -> bool {
        let passed = self.tests_failed == 0;
        let _ = writeln!(
            self.out,
            "# run: {} passed: {} failed: {}\n# Result: {}",
            self.tests_run,
            self.tests_passed,
            self.tests_failed,
            if passed { "PASS" } else { "FAIL" }
        );
        let _ = self.out.flush();
        passed
    }

    pub fn tests_run(&self) -> usize {
        self.tests_run
    }

    pub fn tests_passed(&self) -> usize {
        self.tests_passed
    }

    pub fn tests_failed(&self) -> usize {
        self.tests_failed
    }
}

mod tap_tests {
    use super::*;
    use sniffer_census_esp32_macros::tap_test;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn runner() -> (TestRunner, Captured) {
        let captured = Captured::default();
        (TestRunner::with_output(Box::new(captured.clone())), captured)
    }

    #[tap_test]
    fn runner_counts_mixed_results() {
        let (mut runner, _) = runner();
        runner.run("pass1", || Ok(()));
        runner.run("fail1", || Err("error".into()));
        runner.run_assert("pass2", || {});
        assert_eq!(runner.tests_run(), 3);
        assert_eq!(runner.tests_passed(), 2);
        assert_eq!(runner.tests_failed(), 1);
        assert!(!runner.finish());
    }

    #[tap_test]
    fn runner_reports_panic_message() {
        let (mut runner, captured) = runner();
        runner.run_assert("boom", || panic!("intentional panic"));

        let text = captured.text();
        assert!(text.starts_with("not ok 1 - boom\n"));
        assert!(text.contains("# Panic: intentional panic"));
    }

    #[tap_test]
    fn runner_checks_expected_panic() {
        let (mut runner, _) = runner();
        runner.run_should_panic("any", || panic!("x"), None);
        runner.run_should_panic("match", || panic!("channel 14"), Some("channel"));
        runner.run_should_panic("mismatch", || panic!("other"), Some("channel"));
        runner.run_should_panic("no_panic", || {}, None);
        assert_eq!(runner.tests_passed(), 2);
        assert_eq!(runner.tests_failed(), 2);
    }

    #[tap_test]
    fn header_and_summary() {
        let (mut runner, captured) = runner();
        runner.print_header(1);
        runner.run("only", || Ok(()));
        assert!(runner.finish());

        let text = captured.text();
        assert!(text.starts_with("TAP version 14\n1..1\nok 1 - only # "));
        assert!(text.ends_with("# Result: PASS\n"));
    }

    #[tap_test]
    fn filter_selects_by_name() {
        let all = selected_tests(None);
        let filtered = selected_tests(Some("filter_selects_by_name"));
        assert_eq!(filtered.len(), 1);
        assert!(all.len() > filtered.len());
        assert!(selected_tests(Some("no such test name")).is_empty());
    }
}
