//! Status and check commands.

use console::style;

use crate::cli::helpers::{external_connector, open_repository, open_ticket_repository};
use crate::config::{Config, Settings};
use crate::repository::util::redact_url_password;
use crate::stages::command::is_available;

/// Show configuration and how many jobs and tickets are waiting for publication.
pub async fn cmd_status(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    println!("\n{}", style("printrelay status").bold());
    println!("{}", "-".repeat(40));
    match config.source_path {
        Some(ref path) => println!("{:<16} {}", "Config:", path.display()),
        None => println!("{:<16} {}", "Config:", style("defaults").dim()),
    }
    println!("{:<16} {}", "Data:", settings.data_dir.display());
    println!("{:<16} {}", "Database:", redact_url_password(&settings.database_url()));
    println!("{:<16} {}", "Broker:", redact_url_password(&settings.broker_url));
    println!("{:<16} {}", "Paper:", settings.paper);
    if settings.dry_run {
        println!("{:<16} {}", "Printing:", style("dry run").yellow());
    }

    let queues = &settings.queues;
    println!(
        "{:<16} {} -> {} -> {} -> {} -> {}",
        "Queues:", queues.source, queues.tex, queues.dvi, queues.postscript, queues.finished
    );
    println!("{:<16} {} -> {}", "Tickets:", queues.tickets, queues.tex);
    println!("{:<16} {}", "Failures:", queues.failed);

    if !settings.database_path().exists() && settings.database_url.is_none() {
        println!(
            "\n{} Database not found. Run 'printrelay init' first.",
            style("!").yellow()
        );
        return Ok(());
    }

    let pending = open_repository(settings).count_eligible().await?;
    println!("{:<16} {}", "Pending jobs:", pending);
    // databases created before tickets existed have no submission table
    match open_ticket_repository(settings).count_eligible().await {
        Ok(tickets) => println!("{:<16} {}", "Pending tickets:", tickets),
        Err(e) => println!(
            "{:<16} {} ({})",
            "Pending tickets:",
            style("unknown").yellow(),
            e
        ),
    }
    Ok(())
}

/// Report which external tools are installed and whether the broker answers.
pub async fn cmd_check(settings: &Settings) -> anyhow::Result<()> {
    println!("\n{}", style("Tool availability").bold());
    println!("{}", "-".repeat(40));

    let mut missing = 0;
    let print_program = settings
        .print_command
        .first()
        .map(String::as_str)
        .unwrap_or("");
    let tools = settings
        .tools
        .programs()
        .into_iter()
        .chain(std::iter::once(("printer", print_program)));

    for (role, program) in tools {
        if is_available(program) {
            println!("  {} {:<12} {}", style("✓").green(), role, program);
        } else if role == "printer" && settings.dry_run {
            println!("  {} {:<12} {} (dry run)", style("-").dim(), role, program);
        } else {
            println!("  {} {:<12} {} not found", style("✗").red(), role, program);
            missing += 1;
        }
    }

    println!("\n{}", style("Broker").bold());
    println!("{}", "-".repeat(40));
    if settings.uses_memory_broker() {
        println!("  {} in-process broker (printrelay run only)", style("-").dim());
    } else {
        let connector = external_connector(settings)?;
        match connector.connect().await {
            Ok(_) => println!("  {} {}", style("✓").green(), connector.describe()),
            Err(e) => {
                println!("  {} {}: {}", style("✗").red(), connector.describe(), e);
                missing += 1;
            }
        }
    }

    if missing > 0 {
        anyhow::bail!("{} check(s) failed", missing);
    }
    println!("\n{} All checks passed", style("✓").green());
    Ok(())
}
