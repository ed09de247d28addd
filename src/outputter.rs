use console::Style;
use flume::Receiver;

use crate::asserter::Report;

pub struct OutPutter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
}

impl Summary {
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

impl OutPutter {
    pub async fn start(rx: Receiver<Report>, n_tests: usize) -> Summary {
        let style = Style::new().bold().cyan();
        let open_text = format!("Found {n_tests} tests: Running...");
        println!("{}", style.apply_to(open_text));

        let mut i = 1;
        let mut summary = Summary::default();
        let mut failed_tests: Vec<Report> = vec![];

        while let Ok(report) = rx.recv_async().await {
            let label = format!("{} {} {}", report.name, report.method, report.url);

            if report.passed() {
                summary.passed += 1;
                println!(
                    "[{i}/{n_tests}] {}  {label} {}",
                    console::style("✔").green().bold(),
                    console::style("PASS!").green().bold(),
                );
            } else {
                summary.failed += 1;
                println!(
                    "[{i}/{n_tests}] {}  {label} {}",
                    console::style("╳").red().bold(),
                    console::style("FAILED!").red().bold(),
                );
                for failure in &report.failures {
                    println!("      {failure}");
                }
                failed_tests.push(report);
            }

            i += 1;
        }

        println!();
        if failed_tests.is_empty() {
            println!(
                "{}",
                console::style(format!("All {} tests passed! 🎉", summary.passed))
                    .bold()
                    .green()
            );
        } else {
            println!(
                "{}",
                console::style(format!(
                    "{} passed, {} failed. Summary of Failed Tests:",
                    summary.passed, summary.failed
                ))
                .bold()
                .red()
            );
            for (idx, report) in failed_tests.iter().enumerate() {
                println!("\n{}. {}", idx + 1, report.name);
                for failure in &report.failures {
                    println!("   {failure}");
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod test {
    use reqwest::Method;

    use crate::asserter::Failure;
    use crate::asserter::Report;
    use crate::outputter::OutPutter;
    use crate::outputter::Summary;

    fn report(name: &str, failures: Vec<Failure>) -> Report {
        Report {
            name: name.into(),
            method: Method::GET,
            url: "http://localhost/".into(),
            failures,
        }
    }

    #[tokio::test]
    async fn counts_passed_and_failed() {
        let (tx, rx) = flume::unbounded();

        tx.send(report("ok", vec![])).unwrap();
        tx.send(report(
            "bad",
            vec![Failure::BodyContent {
                expected: "a".into(),
                actual: "b".into(),
            }],
        ))
        .unwrap();
        tx.send(report("also ok", vec![])).unwrap();
        drop(tx);

        let summary = OutPutter::start(rx, 3).await;

        assert_eq!(
            summary,
            Summary {
                passed: 2,
                failed: 1
            }
        );
        assert!(!summary.all_passed());
    }

    #[tokio::test]
    async fn no_tests_is_a_pass() {
        let (tx, rx) = flume::unbounded::<Report>();
        drop(tx);

        let summary = OutPutter::start(rx, 0).await;
        assert!(summary.all_passed());
        assert_eq!(summary.passed, 0);
    }
}
