use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};

use super::{Request, Stepped, Stopwatch, Wiring, Worker, WorkerState};
use crate::{
    channel::{Endpoint, LogRecord, Packet, EXPERIENCE, UTILIZATION},
    error::Result,
};

/// Drives one worker through its lifecycle until every handle to it is gone.
pub(super) async fn drive<W: Worker>(
    mut worker: W,
    mut endpoint: Endpoint,
    mut requests: mpsc::Receiver<Request<W>>,
    state: watch::Sender<WorkerState>,
    wiring: Wiring,
) -> Result<()> {
    let node = endpoint.node();

    state.send_replace(WorkerState::AwaitingSync);
    if let Err(e) = worker.run(&mut endpoint).await {
        error!("worker failed to synchronize: node={node} err={e}");
        state.send_replace(WorkerState::Terminated);
        return Err(e);
    }

    state.send_replace(WorkerState::Ready);
    debug!(index = node.index; "worker ready: node={node}");

    let mut watch = Stopwatch::new();

    while let Some(Request { input, reply }) = requests.recv().await {
        watch.waited();
        state.send_replace(WorkerState::Stepping);

        let result = worker.step(&mut endpoint, input).await;
        watch.ran();

        let utilization = watch.sample();
        let sample = Packet::Log(LogRecord::Utilization(utilization));
        if let Err(e) = endpoint.send(UTILIZATION, sample, &wiring.utilization) {
            warn!("failed to publish utilization: node={node} err={e}");
        }

        let result = result.and_then(|step| {
            if let Some(experience) = &step.experience {
                endpoint.send(EXPERIENCE, experience.clone(), &wiring.experience)?;
            }

            Ok(Stepped {
                node,
                output: step.output,
                experience: step.experience,
                utilization,
            })
        });

        if let Err(e) = &result {
            warn!("step failed: node={node} err={e}");
        }

        state.send_replace(WorkerState::Ready);

        if reply.send(result).is_err() {
            debug!("step requester went away: node={node}");
        }
    }

    info!("worker shutting down: node={node}");
    state.send_replace(WorkerState::Terminated);
    Ok(())
}
