//! Capv command - provision the management cluster
//!
//! Runs every pipeline phase in order while a background task drains
//! progress events into the log and the status board. Unless `--no-serve`
//! is given the status server keeps answering after a successful run until
//! the process is interrupted.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use capv_common::{event_bus, EventKind, LogSink, ProcessRunner};
use capv_engine::{serve, PhaseContext, PipelineConfig, ProvisioningPipeline, StatusBoard, DEFAULT_STATUS_ADDR};

use crate::config::{load_spec, Overrides};
use crate::Result;

#[derive(Args, Debug)]
pub struct CapvArgs {
    /// Address the status server listens on
    #[arg(long, default_value = DEFAULT_STATUS_ADDR)]
    pub status_addr: SocketAddr,

    /// Do not start the status server
    #[arg(long)]
    pub no_serve: bool,
}

pub async fn run(args: CapvArgs, config: &Path, overrides: Overrides) -> Result<()> {
    let spec = load_spec(config, overrides)?;
    spec.validate()?;

    let sink = match &spec.log_file {
        Some(path) => LogSink::file(path)?,
        None => LogSink::discard(),
    };
    let (events, receiver) = event_bus();
    let ctx = PhaseContext::new(
        Arc::new(spec),
        Arc::new(ProcessRunner::new(sink.clone())),
        sink.clone(),
        events,
        PipelineConfig::in_home()?,
    );
    let cluster = ctx.spec.cluster_name.clone();
    let board = StatusBoard::new(sink.path(), ctx.dir.permanent_kubeconfig());

    let cancel = CancellationToken::new();
    let drain = {
        let board = board.clone();
        receiver.drain(cancel.clone(), move |event| {
            match event.kind {
                EventKind::Checkpoint => info!(checkpoint = true, "{}", event.message),
                EventKind::Progress => info!("{}", event.message),
            }
            board.record(&event);
        })
    };
    let server = (!args.no_serve).then(|| tokio::spawn(serve(args.status_addr, board.clone(), cancel.clone())));

    info!(
        cluster = %cluster,
        controllers = ctx.spec.control_plane_machine_count,
        workers = ctx.spec.worker_machine_count,
        "provisioning management cluster"
    );
    let started = Instant::now();
    let kubeconfig = ctx.dir.permanent_kubeconfig();
    let mut pipeline = ProvisioningPipeline::new(ctx);
    let outcome = pipeline.run().await;

    match &outcome {
        Ok(_) => {
            board.mark_complete();
            let duration = Duration::from_secs(started.elapsed().as_secs());
            info!(cluster = %cluster, mission_duration = ?duration, "Mission Complete");
            println!("Management cluster {} is ready", cluster);
            println!("  kubeconfig: {}", kubeconfig.display());
            println!("  took:       {:?}", duration);

            if server.is_some() {
                info!(addr = %args.status_addr, "status server running, press Ctrl-C to exit");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "unable to wait for Ctrl-C");
                }
            }
        }
        Err(e) => {
            board.mark_failed();
            error!(cluster = %cluster, state = ?pipeline.state(), error = %e, "provisioning failed");
        }
    }

    cancel.cancel();
    if let Err(e) = drain.await {
        warn!(error = %e, "event drain task failed");
    }
    if let Some(server) = server {
        match server.await {
            Ok(Err(e)) => warn!(error = %e, "status server error"),
            Err(e) => warn!(error = %e, "status server task failed"),
            Ok(Ok(())) => {}
        }
    }

    outcome?;
    Ok(())
}
