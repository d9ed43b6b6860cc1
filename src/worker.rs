//! Worker control loop: the dual of the coordinator on each process.
//!
//! Registers, receives its group assignment, then repeatedly
//! configures a data socket, signals readiness, runs the timed
//! measurement, and reports a result — until the coordinator
//! broadcasts `FINISH`.

use crate::callbacks;
use crate::config::BenchmarkSettings;
use crate::messages::{
    self, GroupSetup, RegistrationRecord, Role, TestConfig, TestResult, UpdateRecord, WorkerState,
    ACK, END_MARKER, TOPIC_CONFIG, TOPIC_FINISH, TOPIC_START, TOPIC_STOP_END_LOOP,
};
use crate::metrics::throughput_mbps;
use crate::transport::control::{ReqSocket, SubSocket};
use crate::transport::data::{DataReceiver, DataSender, FanoutMode};
use crate::transport::SocketOptions;
use anyhow::{bail, Context};
use chrono::Utc;
use rand::RngCore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub async fn run(role: Role, worker_id: String, settings: &BenchmarkSettings) -> anyhow::Result<()> {
    let router_addr = crate::transport::resolve_addr(&settings.network.coordinator_ip, settings.network.coordinator_router_port)?;
    let pub_addr = crate::transport::resolve_addr(&settings.network.coordinator_ip, settings.network.coordinator_pub_port)?;

    let mut req = ReqSocket::connect(router_addr)
        .await
        .context("failed to connect REQ socket to coordinator")?;

    let registration = RegistrationRecord {
        worker_id: worker_id.clone(),
        role,
    };
    let reply = req
        .send_recv(&vec![messages::to_json(&registration)?])
        .await
        .context("registration round-trip failed")?;
    let group: GroupSetup = messages::parse_strict(&reply[0])?;
    tracing::info!(%worker_id, %role, group_id = group.group_id, index = group.index, "registered and assigned to group");

    let mut sub = SubSocket::connect(pub_addr)
        .await
        .context("failed to connect SUB socket to coordinator")?;
    sub.subscribe_all();
    tokio::time::sleep(Duration::from_secs_f64(settings.worker.setup_delay_s)).await;

    send_update(&mut req, &worker_id, WorkerState::ConnectedToSync, 0, None).await?;

    loop {
        let frame = sub.recv().await.context("broadcast receive failed")?;
        let topic = frame[0].as_slice();

        if topic == TOPIC_FINISH.as_bytes() {
            tracing::info!(%worker_id, "received FINISH, shutting down");
            break;
        }
        if topic != TOPIC_CONFIG.as_bytes() {
            continue;
        }

        let config: TestConfig = messages::parse_strict(&frame[1])?;
        send_update(
            &mut req,
            &worker_id,
            WorkerState::ReceivedConfig,
            config.test_number,
            None,
        )
        .await?;

        tokio::time::sleep(Duration::from_secs_f64(settings.worker.setup_delay_s)).await;
        send_update(&mut req, &worker_id, WorkerState::ReadyToTest, config.test_number, None).await?;

        let start_frame = sub.recv().await.context("expected START broadcast")?;
        if start_frame[0].as_slice() != TOPIC_START.as_bytes() {
            bail!(
                "protocol violation: expected START, got topic {:?}",
                String::from_utf8_lossy(&start_frame[0])
            );
        }

        let result = match role {
            Role::Sender => {
                run_sender(&mut sub, &group, &config, settings, &worker_id).await?
            }
            Role::Receiver => run_receiver(&group, &config, settings, &worker_id).await?,
        };

        send_update(
            &mut req,
            &worker_id,
            WorkerState::FinishedTest,
            config.test_number,
            Some(result),
        )
        .await?;
    }

    Ok(())
}

async fn send_update(
    req: &mut ReqSocket,
    worker_id: &str,
    state: WorkerState,
    test_number: usize,
    result: Option<TestResult>,
) -> anyhow::Result<()> {
    let update = UpdateRecord {
        worker_id: worker_id.to_string(),
        state,
        test_number,
        result,
    };
    let reply = req
        .send_recv(&vec![messages::to_json(&update)?])
        .await
        .context("update round-trip failed")?;
    if reply.first().map(|p| p.as_slice()) != Some(ACK) {
        bail!("coordinator did not ACK update for state {state:?}");
    }
    Ok(())
}


fn bind_addr(port: u16) -> SocketAddr {
    SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), port)
}

fn socket_options(config: &TestConfig) -> SocketOptions {
    SocketOptions {
        send_hwm: config.send_hwm,
        recv_hwm: config.recv_hwm,
        linger: Duration::ZERO,
    }
}

async fn run_sender(
    sub: &mut SubSocket,
    group: &GroupSetup,
    config: &TestConfig,
    settings: &BenchmarkSettings,
    worker_id: &str,
) -> anyhow::Result<TestResult> {
    let mode = if config.pub_mode {
        FanoutMode::Broadcast
    } else {
        FanoutMode::RoundRobin
    };

    let mut sender = if settings.worker.sender_bind {
        DataSender::bind_and_accept(
            bind_addr(group.data_port),
            group.receiver_ports.len(),
            mode,
            socket_options(config),
        )
        .await
        .context("sender failed to bind data socket")?
    } else {
        let addrs: Vec<SocketAddr> = group
            .receiver_ports
            .iter()
            .map(|&port| crate::transport::resolve_addr(&settings.network.coordinator_ip, port))
            .collect::<anyhow::Result<_>>()?;
        DataSender::connect_to(&addrs, mode, socket_options(config))
            .await
            .context("sender failed to connect data socket")?
    };

    let mut template = vec![0u8; config.size];
    rand::thread_rng().fill_bytes(&mut template);
    // Built once regardless of `zero_copy`: a zero-copy test reuses this
    // one allocation's `Arc` on every send (no per-message copy); a
    // non-zero-copy test deliberately re-copies it below to model the
    // overhead a real zero-copy flag is meant to avoid.
    let shared: Arc<[u8]> = Arc::from(template.as_slice());

    let start_time = Utc::now();
    for _ in 0..config.count {
        let payload: Arc<[u8]> = if config.zero_copy {
            shared.clone()
        } else {
            Arc::from(shared.as_ref())
        };
        sender.send(payload).await.context("data send failed")?;
    }
    let end_time = Utc::now();

    let messages_sent = config.count;
    let throughput = throughput_mbps(messages_sent, config.size, start_time, end_time);
    tracing::debug!(%worker_id, test_number = config.test_number, messages_sent, throughput, "sender finished");

    // End-drain: keep emitting END and draining the control broadcast
    // until the coordinator releases us. PUSH/PULL load-balances an
    // END to exactly one receiver and PUB/SUB may drop it entirely, so
    // a single terminator is never reliable on its own.
    let end_marker: Arc<[u8]> = Arc::from(END_MARKER);
    loop {
        let _ = sender.try_send(end_marker.clone());
        tokio::time::sleep(Duration::from_millis(1)).await;
        if let Some(frame) = sub.try_recv().context("drain-loop control poll failed")? {
            if frame[0].as_slice() == TOPIC_STOP_END_LOOP.as_bytes() {
                break;
            }
        }
    }

    Ok(TestResult {
        worker_id: worker_id.to_string(),
        role: Role::Sender,
        config: config.clone(),
        messages_sent: Some(messages_sent),
        messages_received: None,
        throughput_mbps: throughput,
        start_time,
        end_time,
    })
}

async fn run_receiver(
    group: &GroupSetup,
    config: &TestConfig,
    settings: &BenchmarkSettings,
    worker_id: &str,
) -> anyhow::Result<TestResult> {
    let mut receiver = if settings.worker.sender_bind {
        DataReceiver::connect(crate::transport::resolve_addr(&settings.network.coordinator_ip, group.data_port)?)
            .await
            .context("receiver failed to connect data socket")?
    } else {
        let port = group
            .receiver_ports
            .get(group.index)
            .copied()
            .context("group has no receiver port at this worker's index")?;
        DataReceiver::bind_and_accept_one(bind_addr(port))
            .await
            .context("receiver failed to bind data socket")?
    };

    let mut sink = callbacks::build(config.receiver_callback, &settings.callbacks)?;

    let mut messages_received = 0usize;
    let mut start_time = None;
    loop {
        let payload = receiver.recv().await.context("data receive failed")?;
        if payload == END_MARKER {
            break;
        }
        if start_time.is_none() {
            start_time = Some(Utc::now());
        }
        messages_received += 1;
        sink.on_message(&payload, messages_received, config);
    }
    sink.finalize()?;
    let end_time = Utc::now();
    let start_time = start_time.unwrap_or(end_time);

    let throughput = throughput_mbps(messages_received, config.size, start_time, end_time);
    tracing::debug!(%worker_id, test_number = config.test_number, messages_received, throughput, "receiver finished");

    Ok(TestResult {
        worker_id: worker_id.to_string(),
        role: Role::Receiver,
        config: config.clone(),
        messages_sent: None,
        messages_received: Some(messages_received),
        throughput_mbps: throughput,
        start_time,
        end_time,
    })
}
