//! Outbound interface to the external message router.
//!
//! The core never touches the wire. Every cross-process effect is an
//! [`OutboundMessage`] handed to a [`MessageRouter`], which must queue it
//! without blocking: the core calls it while holding its process lock.

use crate::types::{ChannelId, InterestId, ObjectId, ObjectType, ZoneId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Where an object lifecycle message is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    /// The state server, which fans out to every interested role
    StateServer,
    /// One client connection
    Channel(ChannelId),
}

/// Messages produced toward the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    CreateObject {
        recipient: Recipient,
        object_type: ObjectType,
        object_id: ObjectId,
        parent_id: ObjectId,
        zone_id: ZoneId,
    },
    DeleteObject {
        recipient: Recipient,
        object_id: ObjectId,
    },
    SetState {
        channel: ChannelId,
        state_code: u16,
    },
    Eject {
        channel: ChannelId,
        code: u16,
        message: String,
    },
    SetOwner {
        object_id: ObjectId,
        channel: ChannelId,
    },
    AddSessionObject {
        object_id: ObjectId,
        channel: ChannelId,
    },
    AddInterest {
        channel: ChannelId,
        interest_id: InterestId,
        parent_id: ObjectId,
        zone_id: ZoneId,
    },
    Update {
        object_id: ObjectId,
        field: String,
        args: Vec<Value>,
    },
}

impl OutboundMessage {
    /// The client connection this message is addressed to, if any.
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            OutboundMessage::CreateObject { recipient: Recipient::Channel(channel), .. }
            | OutboundMessage::DeleteObject { recipient: Recipient::Channel(channel), .. }
            | OutboundMessage::SetState { channel, .. }
            | OutboundMessage::Eject { channel, .. }
            | OutboundMessage::AddInterest { channel, .. } => Some(*channel),
            _ => None,
        }
    }
}

/// Sink for outbound messages. Implementations must not block.
pub trait MessageRouter: Send + Sync + std::fmt::Debug {
    fn send(&self, message: OutboundMessage);
}

/// Router that hands messages to in-process queues: one mailbox per attached
/// client connection plus an upstream queue for everything else.
#[derive(Debug)]
pub struct ChannelRouter {
    upstream: mpsc::UnboundedSender<OutboundMessage>,
    mailboxes: DashMap<ChannelId, mpsc::UnboundedSender<OutboundMessage>>,
}

impl ChannelRouter {
    /// Creates the router and the receiving end of its upstream queue.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (upstream, receiver) = mpsc::unbounded_channel();
        (
            Self {
                upstream,
                mailboxes: DashMap::new(),
            },
            receiver,
        )
    }

    /// Routes messages for `channel` to a dedicated mailbox.
    pub fn attach(&self, channel: ChannelId) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.mailboxes.insert(channel, sender);
        receiver
    }

    pub fn detach(&self, channel: ChannelId) {
        self.mailboxes.remove(&channel);
    }

    pub fn attached(&self) -> usize {
        self.mailboxes.len()
    }
}

impl MessageRouter for ChannelRouter {
    fn send(&self, message: OutboundMessage) {
        if let Some(channel) = message.channel() {
            if let Some(mailbox) = self.mailboxes.get(&channel) {
                if mailbox.send(message).is_err() {
                    debug!("Mailbox for {} closed, dropping message", channel);
                }
                return;
            }
        }

        if let Err(e) = self.upstream.send(message) {
            error!("Failed to queue outbound message: {:?}", e.0);
        }
    }
}
