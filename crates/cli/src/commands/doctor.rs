use serde::Serialize;

use crate::commands;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = vec![config_check()];

    let database = match checks[0].status {
        CheckStatus::Pass => database_check(),
        _ => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Skipped,
            details: "skipped because configuration did not load".to_string(),
        },
    };
    checks.push(database);

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    DoctorReport {
        overall_status: if all_pass { CheckStatus::Pass } else { CheckStatus::Fail },
        summary: if all_pass {
            "doctor: all readiness checks passed".to_string()
        } else {
            "doctor: one or more readiness checks failed".to_string()
        },
        checks,
    }
}

fn config_check() -> DoctorCheck {
    match commands::load_config() {
        Ok(_) => DoctorCheck {
            name: "config_validation",
            status: CheckStatus::Pass,
            details: "configuration loaded and validated".to_string(),
        },
        Err(failure) => DoctorCheck {
            name: "config_validation",
            status: CheckStatus::Fail,
            details: failure.message,
        },
    }
}

fn database_check() -> DoctorCheck {
    let outcome = commands::load_config().and_then(|config| {
        let runtime = commands::runtime()?;
        runtime.block_on(async {
            let pool = commands::open_pool(&config).await?;
            pool.close().await;
            Ok(config.database.url)
        })
    });

    match outcome {
        Ok(url) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Pass,
            details: format!("connected using `{url}`"),
        },
        Err(failure) => DoctorCheck {
            name: "database_connectivity",
            status: CheckStatus::Fail,
            details: failure.message,
        },
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}
