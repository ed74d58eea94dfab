//! End-to-end runtime test: three nodes over real sockets.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use quill_core::{PeerAddress, PeerInfo, PeerRank, QuorumId, QuorumInfo};
use quill_raft::{ConsensusMetrics, MemoryLogStore, MemoryVoteStore, RaftContext, RaftRole};
use quill_runtime::{
    spawn_quorum, PeerClient, PeerServer, PeerTransport, QuorumRegistry, TimerConfig,
};

#[tokio::test(flavor = "multi_thread")]
async fn test_three_node_cluster_over_tcp() {
    let quorum = QuorumId::new(1);

    // Bind the servers on ephemeral ports first so the quorum
    // configuration carries the real addresses.
    let mut servers = Vec::new();
    let mut registries = Vec::new();
    let mut addrs = Vec::new();
    for _ in 0..3 {
        let registry = QuorumRegistry::new();
        let server = PeerServer::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&registry))
            .await
            .unwrap();
        addrs.push(PeerAddress::new(server.local_addr().unwrap().to_string()));
        servers.push(server);
        registries.push(registry);
    }

    let peers: Vec<PeerInfo> = addrs
        .iter()
        .enumerate()
        .map(|(i, addr)| PeerInfo::new(addr.clone(), PeerRank::new(i as u64 + 1)))
        .collect();
    let config = QuorumInfo::new(quorum, peers);

    let mut handles = Vec::new();
    for (i, server) in servers.into_iter().enumerate() {
        let ctx = RaftContext::new(
            config.clone(),
            addrs[i].clone(),
            MemoryVoteStore::new(),
            MemoryLogStore::new(),
            ConsensusMetrics::handle(),
        )
        .unwrap();
        let timers = TimerConfig {
            progress_timeout: Duration::from_millis(150),
            heartbeat_interval: Duration::from_millis(40),
            jitter_seed: i as u64,
        };
        let handle = spawn_quorum(&config, ctx, PeerTransport::new(), timers);
        registries[i].register(quorum, handle.clone()).await;
        handles.push(handle);
        tokio::spawn(server.run());
    }

    let client = PeerClient::new(Duration::from_secs(1));

    // A leader must emerge.
    let mut leader = None;
    for _ in 0..100 {
        for addr in &addrs {
            if let Ok(status) = client.peer_status(addr, quorum).await {
                if status.role == RaftRole::Leader {
                    leader = Some(addr.clone());
                }
            }
        }
        if leader.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let leader = leader.expect("no leader elected within the deadline");

    // A write through the leader commits on every peer.
    let leader_index = addrs.iter().position(|a| *a == leader).unwrap();
    handles[leader_index].replicate(Bytes::from("hello"));

    let mut converged = false;
    'outer: for _ in 0..100 {
        let mut caught_up = 0;
        for addr in &addrs {
            match client.peer_status(addr, quorum).await {
                Ok(status) if status.committed_index >= 1 => caught_up += 1,
                _ => {}
            }
        }
        if caught_up == addrs.len() {
            converged = true;
            break 'outer;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(converged, "write did not commit on all peers");
}
