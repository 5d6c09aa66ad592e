//! Simulate command implementation.

use seqsync_client::{
    ChaosConfig, ClientConfig, DispatchStats, GapPolicy, SeededRandom, SessionStats,
};
use seqsync_outbox::OutboxConfig;
use seqsync_testkit::LoopbackSession;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

const CLIENT_ID: &str = "simulated-page";
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Parameters of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    /// Updates to enqueue on the outbox.
    pub updates: u64,
    /// Share of live updates lost in transit, per thousand.
    pub loss_per_mille: u64,
    /// Whether simulated disconnects run after every handshake.
    pub chaos: bool,
    /// Seed for every random choice.
    pub seed: u64,
    /// Reconnect on a live gap instead of reloading.
    pub resync_gaps: bool,
    /// Outbox history bound.
    pub history_max_length: usize,
}

/// Link counters.
#[derive(Debug, Serialize)]
pub struct LinkReport {
    /// Messages handed to the client.
    pub delivered: u64,
    /// Messages lost in transit.
    pub dropped: u64,
    /// Emits refused while the link was down.
    pub refused: u64,
    /// Handshakes answered.
    pub handshakes: u64,
}

/// Simulation result.
#[derive(Debug, Serialize)]
pub struct SimulationReport {
    /// Messages numbered by the outbox.
    pub sent: u64,
    /// Sequenced updates the client rendered.
    pub applied: usize,
    /// True if the client rendered exactly `1..=sent` in order.
    pub in_order: bool,
    /// Final session state.
    pub state: String,
    /// Reload reasons, in order.
    pub reloads: Vec<String>,
    /// Session counters.
    pub session: SessionStats,
    /// Dispatch queue counters.
    pub dispatch: DispatchStats,
    /// Link counters.
    pub link: LinkReport,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: u128,
}

/// Runs the simulate command.
pub fn run(options: &SimulateOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = simulate(options)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            print_text_output(&report);
        }
    }

    if !report.in_order && report.reloads.is_empty() {
        return Err("client diverged from the outbox without reloading".into());
    }
    Ok(())
}

/// Runs one simulation on a fresh runtime.
pub fn simulate(options: &SimulateOptions) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(drive(options))
}

fn client_config(options: &SimulateOptions) -> ClientConfig {
    let mut config = ClientConfig::new(CLIENT_ID);
    if options.resync_gaps {
        config = config.with_gap_policy(GapPolicy::Resync);
    }
    if options.chaos {
        config = config.with_chaos(
            ChaosConfig::enabled()
                .with_max_disconnect_after(Duration::from_millis(40))
                .with_reconnect_steps(Duration::from_millis(5), 4),
        );
    }
    config
}

async fn drive(options: &SimulateOptions) -> Result<SimulationReport, Box<dyn std::error::Error>> {
    let started = Instant::now();
    let session = LoopbackSession::start(
        client_config(options),
        OutboxConfig::new(CLIENT_ID)
            .with_history_max_length(options.history_max_length)
            .with_loop_intervals(Duration::from_millis(20), Duration::from_millis(2)),
        Arc::new(SeededRandom::new(options.seed)),
    );
    if options.loss_per_mille > 0 {
        session.link.with_loss(
            Arc::new(SeededRandom::new(options.seed.wrapping_add(1))),
            options.loss_per_mille,
        );
    }

    session.connect().await?;
    info!(
        updates = options.updates,
        loss = options.loss_per_mille,
        chaos = options.chaos,
        "simulation started"
    );

    for n in 0..options.updates {
        if n % 4 == 0 {
            session
                .outbox
                .enqueue_update(n % 16, json!({"tag": "span", "text": format!("tick {n}")}));
        } else {
            session
                .outbox
                .enqueue_message("notify", json!({"message": format!("event {n}")}));
        }
        if n % 10 == 9 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    // A loss-free final message exposes any trailing loss as a gap.
    session.link.clear_loss();
    session
        .outbox
        .enqueue_message("notify", json!({"message": "done"}));

    let drained = tokio::time::timeout(DELIVERY_TIMEOUT, async {
        while session.outbox.has_pending() && !session.client.is_fatal() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    if drained.is_err() {
        return Err("outbox did not drain".into());
    }

    let sent = session.outbox.message_count();
    session.wait_for_sequence(sent, DELIVERY_TIMEOUT).await;
    session.client.settle().await?;

    let sequences = session.renderer.sequences();
    let in_order = sequences == (1..=sent.get()).collect::<Vec<_>>();
    let link = session.link.stats();
    let report = SimulationReport {
        sent: sent.get(),
        applied: sequences.len(),
        in_order,
        state: session.client.state().to_string(),
        reloads: session
            .host
            .reloads()
            .iter()
            .map(|reason| reason.to_string())
            .collect(),
        session: session.client.stats(),
        dispatch: session.client.dispatch_stats(),
        link: LinkReport {
            delivered: link.delivered,
            dropped: link.dropped,
            refused: link.refused,
            handshakes: link.handshakes,
        },
        elapsed_ms: started.elapsed().as_millis(),
    };
    info!(
        sent = report.sent,
        applied = report.applied,
        in_order = report.in_order,
        "simulation finished"
    );

    session.shutdown().await?;
    Ok(report)
}

fn print_text_output(report: &SimulationReport) {
    println!("Simulation Report");
    println!("=================");
    println!();
    println!("Sent:              {}", report.sent);
    println!(
        "Applied:           {} ({})",
        report.applied,
        if report.in_order { "in order" } else { "diverged" }
    );
    println!("Final state:       {}", report.state);
    println!("Elapsed:           {} ms", report.elapsed_ms);
    println!();
    println!("Session:");
    println!("  Live:            {}", report.session.live_dispatches);
    println!("  Replayed:        {}", report.session.replayed_dispatches);
    println!("  Unsequenced:     {}", report.session.unsequenced_dispatches);
    println!("  Buffered:        {}", report.session.buffered_updates);
    println!("  Absorbed:        {}", report.session.absorbed_duplicates);
    println!("  Handshakes:      {}", report.session.handshake_attempts);
    println!("  Resyncs:         {}", report.session.resyncs);
    println!();
    println!("Dispatch:");
    println!("  Executed:        {}", report.dispatch.executed);
    println!("  Failed:          {}", report.dispatch.failed);
    println!("  Skipped:         {}", report.dispatch.skipped);
    println!("  Yields:          {}", report.dispatch.yields);
    println!();
    println!("Link:");
    println!("  Delivered:       {}", report.link.delivered);
    println!("  Dropped:         {}", report.link.dropped);
    println!("  Refused:         {}", report.link.refused);

    if !report.reloads.is_empty() {
        println!();
        println!("Reloads:");
        for reason in &report.reloads {
            println!("  - {reason}");
        }
    }
}
