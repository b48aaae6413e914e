use crate::config::{Config, Connection, Request};
use crate::connection::DbConnection;
use crate::reconcile::{Outcome, Phase, Reconciler};
use crate::sql::Session;
use crate::validate::yaml_files;
use ansi_term::Colour::{Green, Purple, Red, Yellow};
use anyhow::{anyhow, Result};
use ascii_table::AsciiTable;
use log::{error, info, warn};
use std::path::Path;

/// Read the config from the given path and converge every request of it.
/// In check mode every transaction is rolled back.
pub fn apply(target: &Path, check_mode: bool, conn: Option<&str>) -> Result<()> {
    if target.is_dir() {
        return Err(anyhow!(
            "{} is a directory, use --all to apply every file in it",
            target.display()
        ));
    }

    let mut config = Config::new(target)?;
    if let Some(url) = conn {
        config = config.with_connection_url(url);
    }
    info!("Applying configuration from {}", target.display());

    let mut summary = vec![
        vec![
            "#".to_string(),
            "Request".to_string(),
            "Changed".to_string(),
            "Status".to_string(),
        ],
        vec![
            "---".to_string(),
            "---".to_string(),
            "---".to_string(),
            "---".to_string(),
        ],
    ];

    let mut failed = 0;
    for (i, request) in config.requests.iter().enumerate() {
        let (changed, status) = match apply_request(&config.connection, request, check_mode) {
            Ok((outcome, phase)) => {
                report(&outcome, check_mode);
                (outcome.changed.to_string(), status_of(&outcome, phase, check_mode))
            }
            Err(e) => {
                error!("{}: {} - {:#}", Red.paint("Error"), request, e);
                failed += 1;
                ("-".to_string(), Red.paint("failed").to_string())
            }
        };
        summary.push(vec![(i + 1).to_string(), request.to_string(), changed, status]);
    }

    print_summary(summary);

    if failed > 0 {
        return Err(anyhow!(
            "{} of {} requests failed",
            failed,
            config.requests.len()
        ));
    }

    Ok(())
}

/// Apply every config file of the given directory.
pub fn apply_all(target: &Path, check_mode: bool, conn: Option<&str>) -> Result<()> {
    for config_file in yaml_files(target)? {
        apply(&config_file, check_mode, conn)?;
    }

    Ok(())
}

/// One request, one connection, one transaction.
fn apply_request(
    connection: &Connection,
    request: &Request,
    check_mode: bool,
) -> Result<(Outcome, Phase)> {
    let mut conn = DbConnection::connect_to_database(connection, request.database())?;
    info!("Connected to database: {}", conn.connection_info());

    conn.begin()?;
    let mut reconciler = Reconciler::new(&mut conn);
    let result = reconciler.reconcile(request);
    let phase = reconciler.complete(&result, check_mode)?;

    Ok((result?, phase))
}

fn report(outcome: &Outcome, check_mode: bool) {
    for query in &outcome.queries {
        if check_mode {
            info!("{}: {}", Purple.paint("Dry-run"), Purple.paint(query));
        } else {
            info!("{}: {}", Green.paint("Success"), Purple.paint(query));
        }
    }
    for warning in &outcome.warnings {
        warn!("{}: {}", Yellow.paint("Warning"), warning);
    }
}

fn status_of(outcome: &Outcome, phase: Phase, check_mode: bool) -> String {
    match phase {
        Phase::Committed => Green.paint("committed").to_string(),
        _ if check_mode && outcome.changed => Purple.paint("would change").to_string(),
        _ => "ok".to_string(),
    }
}

fn print_summary(summary: Vec<Vec<String>>) {
    let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(120).saturating_sub(5);

    let mut table = AsciiTable::default();
    table.set_max_width(term_width);

    info!("Summary:\n{}", table.format(summary));
}
