//! Builds the forwarding graph from the configured destinations.

use super::{dedup, filter, splitter, status_channel, FilterConfig, StatusReceiver, StatusSender, CHANNEL_CAPACITY};
use crate::services::AccountLookup;
use anyhow::{Context, Result};
use feedroom_core::{Notification, StatusId, TaggedEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Name of the controlling room's chain in logs.
const CONTROL: &str = "controlroom";

/// One configured forwarding block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub room: String,
    pub filter: FilterConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelinePlan {
    /// Forward every home status to the controlling room, not only ours.
    pub show_complete_home_stream: bool,
    pub destinations: Vec<Destination>,
}

/// Open streaming subscriptions feeding the graph.
pub struct FeedSources {
    pub home: mpsc::Receiver<TaggedEvent>,
    pub tags: Vec<(String, mpsc::Receiver<TaggedEvent>)>,
}

/// Outputs of an assembled graph.
pub struct FeedGraph {
    /// Marks a status as already shown in the controlling room.
    pub mark_seen: mpsc::Sender<StatusId>,
    /// Deduplicated statuses for the controlling room.
    pub control: StatusReceiver,
    pub notifications: mpsc::Receiver<Notification>,
    /// Deduplicated statuses per destination room, in configuration order.
    pub rooms: Vec<(String, StatusReceiver)>,
}

impl PipelinePlan {
    /// Distinct destination rooms in configuration order.
    pub fn rooms(&self) -> Vec<&str> {
        let mut rooms: Vec<&str> = Vec::new();
        for destination in &self.destinations {
            if !rooms.contains(&destination.room.as_str()) {
                rooms.push(&destination.room);
            }
        }
        rooms
    }
}

/// Wire splitters, filters and suppressors together.
///
/// Each destination block gets a filter stage feeding the suppressor of its
/// room; rooms shared by several blocks share one suppressor. Filters are
/// chained through their mirror taps so a status entering the newest block
/// is offered to all of them. The home stream goes through the controlling
/// room's filter, which mirrors into that chain; tag streams enter the chain
/// directly.
pub async fn assemble(
    plan: &PipelinePlan,
    accounts: Arc<dyn AccountLookup>,
    sources: FeedSources,
) -> Result<FeedGraph> {
    let mut suppressors: HashMap<String, StatusSender> = HashMap::new();
    let mut rooms = Vec::new();
    let mut chain_head: Option<StatusSender> = None;

    for destination in &plan.destinations {
        let suppressor = match suppressors.get(&destination.room) {
            Some(input) => input.clone(),
            None => {
                let (room_tx, room_rx) = status_channel();
                let (input, _mark_seen) = dedup::attach(destination.room.clone(), room_tx, None)
                    .with_context(|| format!("failed to create suppressor for {}", destination.room))?;
                suppressors.insert(destination.room.clone(), input.clone());
                rooms.push((destination.room.clone(), room_rx));
                input
            }
        };

        let stage = filter::attach(
            destination.filter.clone(),
            Arc::clone(&accounts),
            suppressor,
            chain_head.take(),
        )
        .await?;
        info!(
            "pipeline: block {} forwards to {}",
            destination.filter.name, destination.room
        );
        chain_head = Some(stage);
    }

    let (control_tx, control) = status_channel();
    let (control_input, mark_seen) =
        dedup::attach(CONTROL, control_tx, None).context("failed to create control suppressor")?;

    let control_filter = FilterConfig {
        must_be_unmuted: true,
        must_be_written_by_us: !plan.show_complete_home_stream,
        ..FilterConfig::named(CONTROL)
    };
    let control_stage =
        filter::attach(control_filter, accounts, control_input, chain_head.clone()).await?;

    let (notification_tx, notifications) = mpsc::channel(CHANNEL_CAPACITY);
    splitter::spawn("home", sources.home, Some(control_stage), Some(notification_tx));

    for (tag, events) in sources.tags {
        splitter::spawn(format!("#{tag}"), events, chain_head.clone(), None);
    }

    Ok(FeedGraph {
        mark_seen,
        control,
        notifications,
        rooms,
    })
}
