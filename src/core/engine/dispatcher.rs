use crate::core::engine::codec::{parse_inbound, InboundFrame};
use crate::core::engine::registry::TopicRegistry;
use crate::core::engine::subscription::SubscriptionManager;
use crate::core::types::{AckState, Flow};
use tracing::{debug, warn};

/// What one dispatched frame means for the run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Keep processing frames.
    Continue,
    /// A callback asked the run mode to halt. Not a failure.
    Stop,
}

/// Route one received frame.
///
/// Acks and heartbeats update subscription state; data frames resolve
/// against the registry and run the entry's decoder and callback. Unknown
/// topics and malformed frames are dropped, never fatal - the connection
/// must survive messages this engine does not understand yet.
pub(crate) fn dispatch(
    registry: &mut TopicRegistry,
    subs: &mut SubscriptionManager,
    raw: &str,
) -> DispatchOutcome {
    let frame = match parse_inbound(raw) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "dropping malformed frame");
            return DispatchOutcome::Continue;
        }
    };

    match frame {
        InboundFrame::Ack(ack) => {
            subs.apply_ack(registry, &ack);
            DispatchOutcome::Continue
        }
        InboundFrame::Data(data) => {
            let Some(entry) = registry.resolve(&data.topic) else {
                debug!(topic = %data.topic, "no subscription for topic");
                return DispatchOutcome::Continue;
            };

            if entry.state() != AckState::Active {
                debug!(topic = %data.topic, state = ?entry.state(), "dropping frame for unacknowledged subscription");
                return DispatchOutcome::Continue;
            }

            match entry.invoke(&data.frame) {
                Ok(Flow::Continue) => DispatchOutcome::Continue,
                Ok(Flow::Stop) => DispatchOutcome::Stop,
                Err(e) => {
                    warn!(topic = %data.topic, error = %e, "callback failed to decode payload");
                    DispatchOutcome::Continue
                }
            }
        }
        InboundFrame::Unknown(_) => {
            debug!("dropping frame without discriminator");
            DispatchOutcome::Continue
        }
    }
}
