use anyhow::{bail, Context};
use pdf_print_dispatch::{
    query_available_printers, CleanupFilesPrinter, ConcurrencyGatedPrinter, PrintRequest,
    Printer, PrinterServiceConfig,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const DELETION_WAIT: Duration = Duration::from_secs(120);
const USAGE: &str = "usage: pdf-print-dispatch [--cleanup] <file.pdf> [printer]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .init();

    let mut cleanup = false;
    let mut positional = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--cleanup" => cleanup = true,
            "-h" | "--help" => {
                println!("{}", USAGE);
                return Ok(());
            }
            _ => positional.push(arg),
        }
    }

    let file = match positional.first() {
        Some(file) => PathBuf::from(file),
        None => bail!(USAGE),
    };

    let printer_name = match positional.get(1) {
        Some(name) => name.clone(),
        None => {
            let printers = query_available_printers().await?;
            for printer in &printers {
                info!("Available printer: {}", printer.name);
            }
            match printers.into_iter().next() {
                Some(printer) => printer.name,
                None => bail!("No printers found"),
            }
        }
    };

    let config = PrinterServiceConfig::from_env().context("invalid print configuration")?;
    let printer = ConcurrencyGatedPrinter::from_config(&config)?;
    let request = PrintRequest::from_file(&printer_name, &file);

    info!("Printing {} on {}", file.display(), printer_name);

    if cleanup {
        let printer = CleanupFilesPrinter::from_config(printer, &config)?;
        printer.registry().on_cleanup_failed(|failure| {
            warn!("Could not delete {}: {}", failure.path.display(), failure.error);
        });

        let handle = printer.print_tracked(&request, None).await?;
        match handle.wait_timeout(DELETION_WAIT).await {
            Some(path) => info!("Deleted {}", path.display()),
            None => warn!("{} is still queued, leaving it in place", file.display()),
        }
    } else {
        printer.print(&request, None).await?;
    }

    info!("Print job completed");
    Ok(())
}
