//! Cluster control loop.
//!
//! Every interval the orchestrator refreshes its topology mirror and then:
//!
//! 1. probes every journal and records whether it answered;
//! 2. probes every node that is not FORCEDOWN, creates the topics and consumer
//!    groups it is missing, and requires all of its journals to be UP;
//! 3. applies the [`QuorumRule`] to decide UP or DOWN, replaying a rejoining
//!    node from its freshest journal before it is marked UP;
//! 4. writes changed records back with the version they were read at.
//!
//! A tick that would start while the previous one still runs is skipped and
//! reported as an overrun. Losing a version race or finding a record deleted
//! is expected with several orchestrators; any other failed write is fatal.
//!
//! FORCEDOWN members are never touched. READONLY nodes are probed and their
//! reporter lists maintained, but their status is never changed and they get
//! no structural repair.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::config::OrchestratorConfig;
use super::metrics::{ORCHESTRATOR_OVERRUNS, ORCHESTRATOR_TICKS, record_status_transition};
use super::quorum::{Observation, QuorumRule, Verdict};
use super::resync::{RepairReport, repair_structure, replay_from_journal};
use super::topology::{ClusterSnapshot, JournalRecord, NodeRecord, VersionedRecord};
use super::traits::{Connector, QueueNode};
use super::watcher::TopologyWatcher;
use crate::error::{Error, ErrorKind, Result};
use crate::store::now_millis;
use crate::types::Status;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Node,
    Journal,
}

impl MemberKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberKind::Node => "node",
            MemberKind::Journal => "journal",
        }
    }
}

/// Things worth telling an operator about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    /// A tick was skipped because the previous one was still running.
    Overrun,
    StatusChanged {
        kind: MemberKind,
        id: String,
        from: Status,
        to: Status,
    },
    Unhealthy {
        kind: MemberKind,
        id: String,
        reason: String,
    },
    Repaired {
        node_id: String,
        report: RepairReport,
    },
    Replayed {
        node_id: String,
        journal_id: String,
        count: u64,
    },
    ReplayFailed {
        node_id: String,
        reason: String,
    },
}

/// What one tick did.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub journals_checked: usize,
    pub nodes_checked: usize,
    pub events: Vec<OrchestratorEvent>,
}

impl TickReport {
    pub fn transitions(&self) -> impl Iterator<Item = (&str, Status)> {
        self.events.iter().filter_map(|event| match event {
            OrchestratorEvent::StatusChanged { id, to, .. } => Some((id.as_str(), *to)),
            _ => None,
        })
    }
}

/// Clears the running flag when a tick ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ClusterOrchestrator {
    config: OrchestratorConfig,
    rule: QuorumRule,
    watcher: Arc<TopologyWatcher>,
    connector: Arc<dyn Connector>,
    running: AtomicBool,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl ClusterOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        watcher: Arc<TopologyWatcher>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            rule: QuorumRule::new(config.quorum),
            config,
            watcher,
            connector,
            running: AtomicBool::new(false),
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.orchestrator_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    fn emit(&self, report: &mut TickReport, event: OrchestratorEvent) {
        let _ = self.events.send(event.clone());
        report.events.push(event);
    }

    /// Run one tick unless one is already running.
    ///
    /// Returns `Ok(None)` when skipped. Errors of kind `Fatal` mean the
    /// orchestrator must stop; anything else only failed this tick.
    pub async fn tick(&self) -> Result<Option<TickReport>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            ORCHESTRATOR_OVERRUNS.inc();
            warn!(orchestrator_id = %self.id(), "Previous tick still running, skipping");
            let _ = self.events.send(OrchestratorEvent::Overrun);
            return Ok(None);
        }
        let _guard = RunningGuard(&self.running);

        self.watcher.refresh().await?;
        let mut view = self.watcher.snapshot();
        let mut report = TickReport::default();

        let journal_ids: Vec<String> = view.journals.keys().cloned().collect();
        for journal_id in journal_ids {
            let Some(current) = view.journals.get(&journal_id).cloned() else {
                continue;
            };
            if let Some(updated) = self.check_journal(&journal_id, current, &mut report).await?
                && let Some(entry) = view.journals.get_mut(&journal_id)
            {
                entry.record = updated;
            }
        }

        let node_ids: Vec<String> = view.nodes.keys().cloned().collect();
        for node_id in node_ids {
            let Some(current) = view.nodes.get(&node_id).cloned() else {
                continue;
            };
            self.check_node(&node_id, current, &view, &mut report)
                .await?;
        }

        ORCHESTRATOR_TICKS.inc();
        debug!(
            orchestrator_id = %self.id(),
            journals = report.journals_checked,
            nodes = report.nodes_checked,
            events = report.events.len(),
            "Tick complete"
        );
        Ok(Some(report))
    }

    /// Probe one journal. Returns the record as written, if it was written.
    async fn check_journal(
        &self,
        journal_id: &str,
        current: VersionedRecord<JournalRecord>,
        report: &mut TickReport,
    ) -> Result<Option<JournalRecord>> {
        let record = current.record;
        if record.status == Status::ForceDown {
            return Ok(None);
        }
        report.journals_checked += 1;

        let observation = match self.connector.connect_journal(journal_id, &record).await {
            Ok(_) => Observation::Healthy,
            Err(e) => {
                self.emit(
                    report,
                    OrchestratorEvent::Unhealthy {
                        kind: MemberKind::Journal,
                        id: journal_id.to_string(),
                        reason: e.to_string(),
                    },
                );
                Observation::Unhealthy
            }
        };

        let mut next = record.clone();
        if observation == Observation::Unhealthy {
            next.errors += 1;
        }
        self.rule
            .record(&mut next.orchestrator_errors, self.id(), observation);
        match self.rule.verdict(&next.orchestrator_errors) {
            Verdict::Down => next.status = Status::Down,
            Verdict::Up if observation == Observation::Healthy && record.status != Status::Up => {
                next.status = Status::Up;
                next.start_date = now_millis();
                next.orchestrator_errors.clear();
            }
            Verdict::Up => {}
        }

        if next == record {
            return Ok(None);
        }
        let written = self.settle_write(
            MemberKind::Journal,
            journal_id,
            self.watcher
                .topology()
                .update_journal(journal_id, &next, Some(current.version))
                .await,
        )?;
        if !written {
            return Ok(None);
        }
        if next.status != record.status {
            self.status_changed(report, MemberKind::Journal, journal_id, record.status, next.status);
        }
        Ok(Some(next))
    }

    async fn check_node(
        &self,
        node_id: &str,
        current: VersionedRecord<NodeRecord>,
        view: &ClusterSnapshot,
        report: &mut TickReport,
    ) -> Result<()> {
        let record = current.record;
        if record.status == Status::ForceDown {
            return Ok(());
        }
        report.nodes_checked += 1;

        let probe = self.probe_node(node_id, &record, view, report).await;
        let observation = match &probe {
            Ok(_) => Observation::Healthy,
            Err(reason) => {
                self.emit(
                    report,
                    OrchestratorEvent::Unhealthy {
                        kind: MemberKind::Node,
                        id: node_id.to_string(),
                        reason: reason.clone(),
                    },
                );
                Observation::Unhealthy
            }
        };

        let mut next = record.clone();
        if observation == Observation::Unhealthy {
            next.errors += 1;
        }
        self.rule
            .record(&mut next.orchestrator_errors, self.id(), observation);

        if record.status != Status::ReadOnly {
            match (self.rule.verdict(&next.orchestrator_errors), probe) {
                (Verdict::Down, _) => next.status = Status::Down,
                (Verdict::Up, Ok(node)) if record.status != Status::Up => {
                    if self.replay_for_rejoin(node_id, &record, node.as_ref(), view, report).await {
                        next.status = Status::Up;
                    }
                }
                (Verdict::Up, _) => {}
            }
        }

        if next == record {
            return Ok(());
        }
        let written = self.settle_write(
            MemberKind::Node,
            node_id,
            self.watcher
                .topology()
                .update_node(node_id, &next, Some(current.version))
                .await,
        )?;
        if written && next.status != record.status {
            self.status_changed(report, MemberKind::Node, node_id, record.status, next.status);
        }
        Ok(())
    }

    /// Connect, repair and check journals. `Err` carries why the node failed.
    async fn probe_node(
        &self,
        node_id: &str,
        record: &NodeRecord,
        view: &ClusterSnapshot,
        report: &mut TickReport,
    ) -> std::result::Result<Arc<dyn QueueNode>, String> {
        let node = self
            .connector
            .connect_node(node_id, record)
            .await
            .map_err(|e| format!("unreachable: {}", e))?;

        if record.status != Status::ReadOnly {
            let repair = repair_structure(node_id, node.as_ref(), &view.topics)
                .await
                .map_err(|e| format!("structural repair failed: {}", e))?;
            if !repair.is_empty() {
                self.emit(
                    report,
                    OrchestratorEvent::Repaired {
                        node_id: node_id.to_string(),
                        report: repair,
                    },
                );
            }
        }

        for journal_id in &record.journals {
            let up = view
                .journals
                .get(journal_id)
                .is_some_and(|j| j.record.status == Status::Up);
            if !up {
                return Err(format!("journal {} is not UP", journal_id));
            }
        }
        Ok(node)
    }

    /// Replay a node that is about to become UP. Returns whether it may.
    async fn replay_for_rejoin(
        &self,
        node_id: &str,
        record: &NodeRecord,
        node: &dyn QueueNode,
        view: &ClusterSnapshot,
        report: &mut TickReport,
    ) -> bool {
        if record.journals.is_empty() {
            return true;
        }
        let result = match view.freshest_journal(&record.journals) {
            None => Err(Error::Unavailable(format!(
                "node {} has no UP journal",
                node_id
            ))),
            Some(journal_id) => self.replay(node_id, node, view, &journal_id).await,
        };
        match result {
            Ok((journal_id, count)) => {
                self.emit(
                    report,
                    OrchestratorEvent::Replayed {
                        node_id: node_id.to_string(),
                        journal_id,
                        count,
                    },
                );
                true
            }
            Err(e) => {
                error!(node_id = %node_id, error = %e, "Replay failed, node stays down");
                self.emit(
                    report,
                    OrchestratorEvent::ReplayFailed {
                        node_id: node_id.to_string(),
                        reason: e.to_string(),
                    },
                );
                false
            }
        }
    }

    async fn replay(
        &self,
        node_id: &str,
        node: &dyn QueueNode,
        view: &ClusterSnapshot,
        journal_id: &str,
    ) -> Result<(String, u64)> {
        let journal_record = view
            .journals
            .get(journal_id)
            .ok_or_else(|| Error::NoSuchJournal(journal_id.to_string()))?;
        let journal = self
            .connector
            .connect_journal(journal_id, &journal_record.record)
            .await?;
        let count = replay_from_journal(node_id, node, journal.as_ref(), view.topics.keys()).await?;
        Ok((journal_id.to_string(), count))
    }

    fn status_changed(
        &self,
        report: &mut TickReport,
        kind: MemberKind,
        id: &str,
        from: Status,
        to: Status,
    ) {
        record_status_transition(kind.as_str(), to.as_str());
        info!(kind = kind.as_str(), id = %id, from = %from, to = %to, "Status changed");
        self.emit(
            report,
            OrchestratorEvent::StatusChanged {
                kind,
                id: id.to_string(),
                from,
                to,
            },
        );
    }

    /// `Ok(true)` when written, `Ok(false)` when another writer got there first.
    fn settle_write(&self, kind: MemberKind, id: &str, result: Result<u64>) -> Result<bool> {
        match result {
            Ok(_) => Ok(true),
            Err(e) if e.is_benign_race() => {
                debug!(kind = kind.as_str(), id = %id, error = %e, "Record changed concurrently, skipping write");
                Ok(false)
            }
            Err(e) => Err(Error::Fatal(format!(
                "writing {} {} failed: {}",
                kind.as_str(),
                id,
                e
            ))),
        }
    }

    /// Tick every interval until `shutdown` fires or a tick fails fatally.
    ///
    /// Each tick runs in its own task, so a slow tick leads to skipped ticks
    /// rather than a delayed schedule.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(
            orchestrator_id = %self.id(),
            interval_ms = self.config.interval.as_millis() as u64,
            quorum = self.rule.quorum(),
            "Orchestrator started"
        );
        let mut interval = tokio::time::interval(self.config.interval);
        let (fatal_tx, mut fatal_rx) = mpsc::channel::<Error>(1);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let this = self.clone();
                    let fatal_tx = fatal_tx.clone();
                    tokio::spawn(async move {
                        match this.tick().await {
                            Ok(_) => {}
                            Err(e) if e.kind() == ErrorKind::Fatal => {
                                let _ = fatal_tx.send(e).await;
                            }
                            Err(e) => warn!(error = %e, "Orchestrator tick failed"),
                        }
                    });
                }
                Some(e) = fatal_rx.recv() => {
                    error!(orchestrator_id = %self.id(), error = %e, "Orchestrator stopping on fatal error");
                    return Err(e);
                }
                _ = shutdown.recv() => {
                    info!(orchestrator_id = %self.id(), "Orchestrator shutting down");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::connector::LocalConnector;
    use crate::cluster::coordination::MemoryCoordinationStore;
    use crate::cluster::topology::Topology;
    use crate::cluster::traits::JournalNode;
    use crate::constants::NO_TTL;
    use crate::store::{JournalStore, QueueStore, QueueStoreConfig};
    use crate::types::Fields;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Cluster {
        watcher: Arc<TopologyWatcher>,
        connector: Arc<LocalConnector>,
        node: Arc<QueueStore>,
        journal: Arc<JournalStore>,
    }

    impl Cluster {
        fn topology(&self) -> &Topology {
            self.watcher.topology()
        }

        fn orchestrator(&self, id: &str, quorum: usize) -> ClusterOrchestrator {
            let config = OrchestratorConfig {
                orchestrator_id: id.to_string(),
                quorum,
                ..OrchestratorConfig::default()
            };
            ClusterOrchestrator::new(config, self.watcher.clone(), self.connector.clone())
        }

        async fn node_status(&self) -> Status {
            self.topology().get_node("n1").await.unwrap().record.status
        }
    }

    async fn cluster() -> Cluster {
        let topology = Topology::new(Arc::new(MemoryCoordinationStore::new()), "/cq");
        topology.ensure_layout().await.unwrap();
        let connector = Arc::new(LocalConnector::new());
        let node = Arc::new(
            QueueStore::open_in_memory(QueueStoreConfig::default())
                .await
                .unwrap(),
        );
        let journal = Arc::new(JournalStore::open_in_memory().await.unwrap());
        connector.register_node("n1", node.clone());
        connector.register_journal("j1", journal.clone());
        topology
            .register_journal("j1", &JournalRecord::new("local", 0))
            .await
            .unwrap();
        topology
            .register_node("n1", &NodeRecord::new("local", 0, vec!["j1".to_string()]))
            .await
            .unwrap();
        Cluster {
            watcher: Arc::new(TopologyWatcher::new(topology)),
            connector,
            node,
            journal,
        }
    }

    fn msg(body: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert("message".to_string(), body.to_string());
        fields
    }

    #[tokio::test]
    async fn test_first_tick_brings_members_up() {
        let c = cluster().await;
        let report = c.orchestrator("o1", 1).tick().await.unwrap().unwrap();

        let transitions: Vec<(&str, Status)> = report.transitions().collect();
        assert_eq!(transitions, vec![("j1", Status::Up), ("n1", Status::Up)]);
        let journal = c.topology().get_journal("j1").await.unwrap().record;
        assert!(journal.start_date > 0);
        assert_eq!(c.node_status().await, Status::Up);
    }

    #[tokio::test]
    async fn test_down_then_rejoin_replays_and_repairs() {
        let c = cluster().await;
        let o1 = c.orchestrator("o1", 1);
        o1.tick().await.unwrap();

        c.topology().create_topic("orders", NO_TTL).await.unwrap();
        c.topology()
            .create_consumer_group("orders", "billing")
            .await
            .unwrap();
        c.connector.set_node_reachable("n1", false);
        o1.tick().await.unwrap();

        let record = c.topology().get_node("n1").await.unwrap().record;
        assert_eq!(record.status, Status::Down);
        assert_eq!(record.errors, 1);
        assert_eq!(record.orchestrator_errors, vec!["o1"]);

        for id in 1..=2 {
            c.journal
                .write("n1", "orders", id, msg(&format!("m{}", id)), NO_TTL)
                .await
                .unwrap();
        }
        c.connector.set_node_reachable("n1", true);
        let report = o1.tick().await.unwrap().unwrap();

        assert_eq!(c.node_status().await, Status::Up);
        assert!(report.events.contains(&OrchestratorEvent::Replayed {
            node_id: "n1".to_string(),
            journal_id: "j1".to_string(),
            count: 2,
        }));
        assert_eq!(c.node.get_head("orders").await.unwrap(), 2);
        assert_eq!(
            c.node.get_consumer_groups("orders").await.unwrap(),
            vec!["billing"]
        );
    }

    #[tokio::test]
    async fn test_quorum_needs_distinct_reporters() {
        let c = cluster().await;
        let o1 = c.orchestrator("o1", 2);
        let o2 = c.orchestrator("o2", 2);
        o1.tick().await.unwrap();
        assert_eq!(c.node_status().await, Status::Up);

        c.connector.set_node_reachable("n1", false);
        o1.tick().await.unwrap();
        o1.tick().await.unwrap();
        assert_eq!(c.node_status().await, Status::Up);

        o2.tick().await.unwrap();
        assert_eq!(c.node_status().await, Status::Down);

        c.connector.set_node_reachable("n1", true);
        o1.tick().await.unwrap();
        let record = c.topology().get_node("n1").await.unwrap().record;
        assert_eq!(record.status, Status::Up);
        assert_eq!(record.orchestrator_errors, vec!["o2"]);
    }

    #[tokio::test]
    async fn test_node_waits_for_its_journal() {
        let c = cluster().await;
        c.connector.set_journal_reachable("j1", false);
        let report = c.orchestrator("o1", 1).tick().await.unwrap().unwrap();

        assert_eq!(report.transitions().count(), 0);
        assert_eq!(c.node_status().await, Status::Down);
        assert!(report.events.iter().any(|e| matches!(
            e,
            OrchestratorEvent::Unhealthy { kind: MemberKind::Node, reason, .. }
                if reason.contains("j1")
        )));
    }

    #[tokio::test]
    async fn test_forcedown_and_readonly_are_left_alone() {
        let c = cluster().await;
        let o1 = c.orchestrator("o1", 1);
        c.topology()
            .set_node_status("n1", Status::ForceDown)
            .await
            .unwrap();
        c.connector.set_node_reachable("n1", false);
        let report = o1.tick().await.unwrap().unwrap();
        assert_eq!(report.nodes_checked, 0);
        let record = c.topology().get_node("n1").await.unwrap().record;
        assert_eq!(record.status, Status::ForceDown);
        assert_eq!(record.errors, 0);

        c.topology()
            .set_node_status("n1", Status::ReadOnly)
            .await
            .unwrap();
        o1.tick().await.unwrap();
        let record = c.topology().get_node("n1").await.unwrap().record;
        assert_eq!(record.status, Status::ReadOnly);
        assert_eq!(record.orchestrator_errors, vec!["o1"]);
    }

    struct SlowConnector {
        inner: Arc<LocalConnector>,
        delay: Duration,
    }

    #[async_trait]
    impl Connector for SlowConnector {
        async fn connect_node(
            &self,
            node_id: &str,
            record: &NodeRecord,
        ) -> Result<Arc<dyn QueueNode>> {
            tokio::time::sleep(self.delay).await;
            self.inner.connect_node(node_id, record).await
        }

        async fn connect_journal(
            &self,
            journal_id: &str,
            record: &JournalRecord,
        ) -> Result<Arc<dyn JournalNode>> {
            self.inner.connect_journal(journal_id, record).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let c = cluster().await;
        let connector = Arc::new(SlowConnector {
            inner: c.connector.clone(),
            delay: Duration::from_millis(300),
        });
        let config = OrchestratorConfig {
            orchestrator_id: "o1".to_string(),
            quorum: 1,
            ..OrchestratorConfig::default()
        };
        let orchestrator = Arc::new(ClusterOrchestrator::new(config, c.watcher.clone(), connector));
        let mut events = orchestrator.subscribe();

        let first = tokio::spawn({
            let orchestrator = orchestrator.clone();
            async move { orchestrator.tick().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(orchestrator.tick().await.unwrap().is_none());
        loop {
            if events.recv().await.unwrap() == OrchestratorEvent::Overrun {
                break;
            }
        }

        assert!(first.await.unwrap().unwrap().is_some());
        assert!(orchestrator.tick().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let c = cluster().await;
        let config = OrchestratorConfig {
            orchestrator_id: "o1".to_string(),
            interval: Duration::from_millis(20),
            quorum: 1,
            ..OrchestratorConfig::default()
        };
        let orchestrator = Arc::new(ClusterOrchestrator::new(
            config,
            c.watcher.clone(),
            c.connector.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(orchestrator.run(shutdown_rx));

        for _ in 0..50 {
            if c.node_status().await == Status::Up {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(c.node_status().await, Status::Up);

        shutdown_tx.send(()).unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
