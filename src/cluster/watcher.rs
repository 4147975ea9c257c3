//! Mirror of the cluster topology with change notifications.
//!
//! The watcher keeps the latest [`ClusterSnapshot`] and turns every refresh
//! into a list of [`TopologyEvent`]s by diffing against the previous one.
//! Subscribers receive those events in order; a subscriber that falls behind
//! receives a single [`TopologyEvent::Reset`] and should rebuild from
//! [`TopologyWatcher::snapshot`].
//!
//! [`TopologyWatcher::run`] long-polls the coordination store's change
//! counter, so the re-arm after each notification never leaks to callers.

use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::topology::{ClusterSnapshot, JournalRecord, NodeRecord, Topology, TopicView};
use crate::error::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    NodeAdded { id: String, record: NodeRecord },
    NodeChanged { id: String, record: NodeRecord },
    NodeRemoved { id: String },
    JournalAdded { id: String, record: JournalRecord },
    JournalChanged { id: String, record: JournalRecord },
    JournalRemoved { id: String },
    TopicAdded { name: String, view: TopicView },
    TopicChanged { name: String, view: TopicView },
    TopicRemoved { name: String },
    /// Events were dropped; rebuild from a fresh snapshot.
    Reset,
}

/// Events turning `old` into `new`. Versions alone do not count as a change.
pub fn diff(old: &ClusterSnapshot, new: &ClusterSnapshot) -> Vec<TopologyEvent> {
    let mut events = Vec::new();

    for (id, current) in &new.nodes {
        match old.nodes.get(id) {
            None => events.push(TopologyEvent::NodeAdded {
                id: id.clone(),
                record: current.record.clone(),
            }),
            Some(previous) if previous.record != current.record => {
                events.push(TopologyEvent::NodeChanged {
                    id: id.clone(),
                    record: current.record.clone(),
                })
            }
            Some(_) => {}
        }
    }
    for id in old.nodes.keys().filter(|id| !new.nodes.contains_key(*id)) {
        events.push(TopologyEvent::NodeRemoved { id: id.clone() });
    }

    for (id, current) in &new.journals {
        match old.journals.get(id) {
            None => events.push(TopologyEvent::JournalAdded {
                id: id.clone(),
                record: current.record.clone(),
            }),
            Some(previous) if previous.record != current.record => {
                events.push(TopologyEvent::JournalChanged {
                    id: id.clone(),
                    record: current.record.clone(),
                })
            }
            Some(_) => {}
        }
    }
    for id in old
        .journals
        .keys()
        .filter(|id| !new.journals.contains_key(*id))
    {
        events.push(TopologyEvent::JournalRemoved { id: id.clone() });
    }

    for (name, view) in &new.topics {
        match old.topics.get(name) {
            None => events.push(TopologyEvent::TopicAdded {
                name: name.clone(),
                view: view.clone(),
            }),
            Some(previous) if previous != view => events.push(TopologyEvent::TopicChanged {
                name: name.clone(),
                view: view.clone(),
            }),
            Some(_) => {}
        }
    }
    for name in old.topics.keys().filter(|n| !new.topics.contains_key(*n)) {
        events.push(TopologyEvent::TopicRemoved { name: name.clone() });
    }

    events
}

pub struct TopologyWatcher {
    topology: Topology,
    current: RwLock<ClusterSnapshot>,
    events: broadcast::Sender<TopologyEvent>,
}

impl TopologyWatcher {
    /// A watcher with an empty mirror; call [`refresh`](Self::refresh) to load it.
    pub fn new(topology: Topology) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            topology,
            current: RwLock::new(ClusterSnapshot::default()),
            events,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Re-read the topology, publish the differences and return them.
    pub async fn refresh(&self) -> Result<Vec<TopologyEvent>> {
        let fresh = self.topology.snapshot().await?;
        let events = {
            let mut current = self
                .current
                .write()
                .map_err(|_| Error::Fatal("topology mirror lock poisoned".to_string()))?;
            let events = diff(&current, &fresh);
            *current = fresh;
            events
        };

        for event in &events {
            debug!(event = ?event, "Topology change");
            // No subscribers is fine.
            let _ = self.events.send(event.clone());
        }
        Ok(events)
    }

    /// The mirror as of the last refresh.
    pub fn snapshot(&self) -> ClusterSnapshot {
        match self.current.read() {
            Ok(current) => current.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn subscribe(&self) -> TopologySubscription {
        TopologySubscription {
            rx: self.events.subscribe(),
        }
    }

    /// Refresh whenever the coordination store reports a change, until the
    /// task is cancelled. Polls at least every `watch_timeout`.
    pub async fn run(self: Arc<Self>, watch_timeout: Duration) {
        let mut seen = 0u64;
        loop {
            let store = self.topology.store().clone();
            match store.wait_for_change(seen, watch_timeout).await {
                Ok(counter) => {
                    if counter != seen {
                        seen = counter;
                        if let Err(e) = self.refresh().await {
                            warn!(error = %e, "Topology refresh failed");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Waiting for topology changes failed");
                    tokio::time::sleep(watch_timeout).await;
                }
            }
        }
    }
}

/// Ordered stream of topology events for one consumer.
pub struct TopologySubscription {
    rx: broadcast::Receiver<TopologyEvent>,
}

impl TopologySubscription {
    /// Wait for the next event. `None` once the watcher is gone.
    pub async fn next(&mut self) -> Option<TopologyEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Topology subscriber lagged");
                Some(TopologyEvent::Reset)
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    /// Take an already published event without waiting.
    pub fn try_next(&mut self) -> Option<TopologyEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped, "Topology subscriber lagged");
                Some(TopologyEvent::Reset)
            }
            Err(_) => None,
        }
    }
}
