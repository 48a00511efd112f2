use anyhow::Context;
use scan_sense::collector::{DEFAULT_TICK_PERIOD, DriverCollector};
use scan_sense::config::ScanConfig;
use scan_sense::sink::StreamWriter;
use scan_sense::sink::file::FileSink;
use scan_sense::sink::live::{LiveSink, LiveUpdate};
use tokio::sync::watch;
use tokio::task;
use tracing::*;
use tracing_subscriber::FmtSubscriber;

/// Application & Tokio executor entrypoint
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        // all spans/events with a level higher than TRACE (e.g, debug, info, warn, etc.)
        // will be written to stdout.
        .with_max_level(Level::INFO)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default tracing subscriber failed");

    // The scan configuration comes from an external loader; with no argument
    // we fall back to the simulated rig defaults.
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading scan config {path}"))?;
            serde_json::from_str::<ScanConfig>(&text)
                .with_context(|| format!("parsing scan config {path}"))?
        }
        None => ScanConfig::default(),
    };

    #[cfg(feature = "sim")]
    let device = scan_sense::device::sim::open(config.board_num)?;
    #[cfg(not(feature = "sim"))]
    compile_error!("no DAQ backend enabled; build with the `sim` feature");

    // Create communication channels between tasks
    let (live_sink, mut live_receiver) = LiveSink::new_with_receiver(100);
    let (cancel_sender, cancel_receiver) = watch::channel(false);

    // Delegate live-view consumption to a separate task; the presentation
    // layer here is just the log.
    let _live_view = task::spawn(async move {
        while let Some(update) = live_receiver.recv().await {
            match update {
                LiveUpdate::Records(text) => {
                    info!(rows = text.lines().count(), "live records");
                }
                LiveUpdate::Status { at, status } => {
                    info!(?status, %at, "scan status changed");
                }
            }
        }
    });

    // Ctrl-C aborts the scan with the same teardown as natural completion
    task::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling scan");
            let _ = cancel_sender.send(true);
        }
    });

    let file = FileSink::create(&config.output_path).await?;
    let writer = StreamWriter::new(file).with_live_sink(Box::new(live_sink));

    // Run the collector to a terminal state, releasing the board on the way out
    let collector = DriverCollector::new(Box::new(device), config, writer);
    let summary = collector.run(cancel_receiver, DEFAULT_TICK_PERIOD).await?;

    info!(
        status = ?summary.status,
        samples = summary.samples_written,
        started_at = %summary.started_at,
        "scan finished"
    );

    Ok(())
}
