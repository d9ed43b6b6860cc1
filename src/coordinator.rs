//! Coordinator control loop: the distributed state machine driver.
//!
//! Three phases, run in sequence: Assembly (register workers, form
//! groups), Test execution (broadcast each matrix cell, wait for
//! milestones, collect and persist results), and Shutdown (broadcast
//! `FINISH`).

use crate::config::BenchmarkSettings;
use crate::messages::{
    self, GroupSetup, RegistrationRecord, UpdateRecord, WorkerState, ACK, TOPIC_CONFIG,
    TOPIC_FINISH, TOPIC_START, TOPIC_STOP_END_LOOP,
};
use crate::registry::{Group, WorkerRegistry};
use crate::results::{self, ResultsManager};
use crate::transport::control::{PubSocket, RouterSocket};
use crate::transport::{PeerId, SocketOptions};
use anyhow::Context;
use std::time::Duration;

const POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn run(settings: &BenchmarkSettings) -> anyhow::Result<()> {
    let router_addr = crate::transport::resolve_addr(&settings.network.coordinator_ip, settings.network.coordinator_router_port)?;
    let pub_addr = crate::transport::resolve_addr(&settings.network.coordinator_ip, settings.network.coordinator_pub_port)?;

    let mut router = RouterSocket::bind(router_addr)
        .await
        .context("coordinator failed to bind ROUTER socket")?;
    let pub_socket = PubSocket::bind(pub_addr, SocketOptions::default())
        .await
        .context("coordinator failed to bind PUB socket")?;

    let mut registry = WorkerRegistry::new(settings.network.data_port_start, settings.worker.sender_bind);

    let (results_path, config_path) = results::resolve_output_paths(&settings.output);
    ResultsManager::write_settings_snapshot(settings, &config_path)?;
    let mut results_manager = ResultsManager::create(&results_path)?;

    run_assembly(&mut router, &mut registry, settings.num_pairs, settings.receivers_per_sender).await?;
    tracing::info!(
        num_workers = registry.num_workers(),
        num_groups = registry.num_groups(),
        "assembly complete"
    );

    let matrix = settings.matrix();
    for test_config in &matrix {
        pub_socket
            .publish(vec![
                TOPIC_CONFIG.as_bytes().to_vec(),
                messages::to_json(test_config)?,
            ])
            .await?;

        wait_for_milestone(&mut router, &mut registry, WorkerState::ReceivedConfig, test_config.test_number).await?;
        wait_for_milestone(&mut router, &mut registry, WorkerState::ReadyToTest, test_config.test_number).await?;

        pub_socket
            .publish(vec![TOPIC_START.as_bytes().to_vec()])
            .await?;

        wait_for_milestone(&mut router, &mut registry, WorkerState::FinishedTest, test_config.test_number).await?;
        let bucket = registry.drain_results_bucket();
        tracing::info!(test_number = test_config.test_number, rows = bucket.len(), "test finished");
        results_manager.append(&bucket)?;

        pub_socket
            .publish(vec![TOPIC_STOP_END_LOOP.as_bytes().to_vec(), Vec::new()])
            .await?;
    }

    pub_socket
        .publish(vec![TOPIC_FINISH.as_bytes().to_vec(), Vec::new()])
        .await?;
    tracing::info!("broadcast FINISH, coordinator shutting down");

    Ok(())
}

/// Loop until exactly `num_pairs` groups exist and every registered
/// worker has reached `CONNECTED_TO_SYNC`. Registration replies (the
/// `GroupSetup`) are sent only once a group actually completes, which
/// may be several polls after the last-arriving member's own request.
async fn run_assembly(
    router: &mut RouterSocket,
    registry: &mut WorkerRegistry,
    num_pairs: usize,
    receivers_per_sender: usize,
) -> anyhow::Result<()> {
    while registry.num_groups() < num_pairs || !registry.all_peers_at(WorkerState::ConnectedToSync, 0) {
        let Some((peer, frame)) = router.poll_recv(POLL_TIMEOUT).await? else {
            continue;
        };
        let payload = frame.first().context("empty control frame during assembly")?;

        if registry.contains(peer) {
            apply_update(router, registry, peer, payload).await?;
            continue;
        }

        let registration: RegistrationRecord = messages::parse_strict(payload)?;
        registry.register(peer, registration.worker_id.clone(), registration.role);
        tracing::debug!(worker_id = %registration.worker_id, role = %registration.role, "worker registered");

        if let Some(group) = registry.try_form_group(receivers_per_sender) {
            reply_group_setup(router, &group).await?;
        }
    }
    Ok(())
}

async fn reply_group_setup(router: &RouterSocket, group: &Group) -> anyhow::Result<()> {
    let sender_setup = GroupSetup {
        group_id: group.group_id,
        data_port: group.data_port,
        receiver_ports: group.receiver_ports.clone(),
        index: 0,
    };
    router
        .reply(group.sender, &vec![messages::to_json(&sender_setup)?])
        .await
        .context("failed to reply GroupSetup to sender")?;

    for (index, &receiver) in group.receivers.iter().enumerate() {
        let setup = GroupSetup {
            group_id: group.group_id,
            data_port: group.data_port,
            receiver_ports: group.receiver_ports.clone(),
            index,
        };
        router
            .reply(receiver, &vec![messages::to_json(&setup)?])
            .await
            .context("failed to reply GroupSetup to receiver")?;
    }
    Ok(())
}

/// Polls and applies updates until the registry-wide milestone
/// predicate holds. Every update is ACKed, including ones that arrive
/// for states other than the one being waited on (a worker's own
/// REQ/REP cadence guarantees it never races ahead of its own ACK).
async fn wait_for_milestone(
    router: &mut RouterSocket,
    registry: &mut WorkerRegistry,
    state: WorkerState,
    test_number: usize,
) -> anyhow::Result<()> {
    while !registry.all_peers_at(state, test_number) {
        let Some((peer, frame)) = router.poll_recv(POLL_TIMEOUT).await? else {
            continue;
        };
        let payload = frame.first().context("empty control frame during test execution")?;
        apply_update(router, registry, peer, payload).await?;
    }
    Ok(())
}

async fn apply_update(
    router: &RouterSocket,
    registry: &mut WorkerRegistry,
    peer: PeerId,
    payload: &[u8],
) -> anyhow::Result<()> {
    let update: UpdateRecord = messages::parse_strict(payload)?;
    if !registry.contains(peer) {
        anyhow::bail!("update from unregistered peer {peer}");
    }
    registry.update(peer, update.state, update.test_number, update.result)?;
    router
        .reply(peer, &vec![ACK.to_vec()])
        .await
        .context("failed to ACK update")?;
    Ok(())
}

