use crate::core::engine::codec::{AckFrame, OutboundFrame};
use crate::core::engine::connection::Connection;
use crate::core::engine::registry::TopicRegistry;
use crate::core::errors::EngineError;
use crate::core::types::AckState;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchOp {
    Subscribe,
    Unsubscribe,
}

struct PendingBatch {
    op: BatchOp,
    topics: Vec<String>,
}

/// Builds subscribe/unsubscribe frames and tracks their acknowledgement.
///
/// Topics sharing one request are batched into a single frame; every frame
/// is stamped with a `req_id` so the matching ack flips exactly the entries
/// it covered. A subscription is not `Active` until its ack is observed.
#[derive(Default)]
pub struct SubscriptionManager {
    pending: HashMap<String, PendingBatch>,
    next_req_id: u64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_req_id(&mut self) -> String {
        self.next_req_id += 1;
        self.next_req_id.to_string()
    }

    pub async fn subscribe<C: Connection>(
        &mut self,
        conn: &mut C,
        topics: Vec<String>,
    ) -> Result<(), EngineError> {
        if topics.is_empty() {
            return Ok(());
        }

        let req_id = self.next_req_id();
        conn.send(OutboundFrame::Subscribe {
            req_id: req_id.clone(),
            topics: topics.clone(),
        })
        .await?;

        self.pending.insert(
            req_id,
            PendingBatch {
                op: BatchOp::Subscribe,
                topics,
            },
        );
        Ok(())
    }

    pub async fn unsubscribe<C: Connection>(
        &mut self,
        conn: &mut C,
        topics: Vec<String>,
    ) -> Result<(), EngineError> {
        if topics.is_empty() {
            return Ok(());
        }

        let req_id = self.next_req_id();
        conn.send(OutboundFrame::Unsubscribe {
            req_id: req_id.clone(),
            topics: topics.clone(),
        })
        .await?;

        self.pending.insert(
            req_id,
            PendingBatch {
                op: BatchOp::Unsubscribe,
                topics,
            },
        );
        Ok(())
    }

    /// Re-issue one subscribe covering every registered key. Used to flush
    /// registrations on connect and to restore them after a reconnect.
    pub async fn resubscribe_all<C: Connection>(
        &mut self,
        conn: &mut C,
        registry: &mut TopicRegistry,
    ) -> Result<(), EngineError> {
        // Acks for batches sent on the old connection will never arrive.
        self.pending.clear();
        registry.set_state_all(AckState::Pending);
        self.subscribe(conn, registry.topics()).await
    }

    /// Apply one ack frame observed by the dispatcher.
    pub(crate) fn apply_ack(&mut self, registry: &mut TopicRegistry, ack: &AckFrame) {
        match ack.op.as_str() {
            "subscribe" | "unsubscribe" => {
                let batches: Vec<PendingBatch> = match &ack.req_id {
                    Some(req_id) => self.pending.remove(req_id).into_iter().collect(),
                    // Bare ack without req_id: settle everything in flight.
                    None => self.pending.drain().map(|(_, batch)| batch).collect(),
                };

                if batches.is_empty() {
                    debug!(op = %ack.op, req_id = ?ack.req_id, "ack without pending batch");
                    return;
                }

                let success = ack.success.unwrap_or(true);
                for batch in batches {
                    if batch.op == BatchOp::Unsubscribe {
                        // Entries were unregistered when the frame was sent.
                        continue;
                    }
                    let state = if success {
                        AckState::Active
                    } else {
                        AckState::Failed
                    };
                    if !success {
                        warn!(
                            topics = ?batch.topics,
                            ret_msg = ack.ret_msg.as_deref().unwrap_or(""),
                            "subscription rejected"
                        );
                    }
                    for topic in &batch.topics {
                        registry.set_state(topic, state);
                    }
                }
            }
            "auth" => {
                // Login acks are consumed by the authenticator; a late one is
                // harmless.
                debug!(success = ?ack.success, "auth ack outside handshake");
            }
            "ping" | "pong" => {
                debug!("heartbeat ack");
            }
            other => {
                warn!(op = %other, "dropping frame with unknown op");
            }
        }
    }
}
