use std::collections::BTreeMap;

use tracing::debug;

use crate::config::EventConfig;
use crate::error::{FormatError, QueryError, QueryResult};
use crate::metrics::FrameRange;
use crate::store::Timeline;

use super::event::{Event, EventType};
use super::filter::EventFilter;
use super::network::PassNetwork;

/// Frame-ordered events of one match with a per-type position index.
///
/// Built once, immutable afterwards. Every bucket holds positions into
/// `events`, so buckets are sorted by frame as well.
#[derive(Debug, Clone)]
pub struct EventIndex {
    events: Vec<Event>,
    by_type: BTreeMap<EventType, Vec<usize>>,
    frame_count: usize,
    sample_rate_hz: f64,
    config: EventConfig,
}

impl EventIndex {
    /// Validate and index `events` against a timeline.
    ///
    /// Events must reference existing frames and be non-decreasing in frame.
    pub fn build(events: Vec<Event>, timeline: &Timeline, config: EventConfig) -> Result<Self, FormatError> {
        let frame_count = timeline.len();
        let mut by_type: BTreeMap<EventType, Vec<usize>> = BTreeMap::new();
        let mut previous = 0;
        for (i, event) in events.iter().enumerate() {
            if event.frame >= frame_count {
                return Err(FormatError::EventOutOfBounds { event: i, frame: event.frame, frame_count });
            }
            if event.frame < previous {
                return Err(FormatError::EventOrdering { event: i, frame: event.frame, previous });
            }
            previous = event.frame;
            by_type.entry(event.kind).or_default().push(i);
        }
        debug!(events = events.len(), kinds = by_type.len(), "event index built");
        Ok(Self { events, by_type, frame_count, sample_rate_hz: timeline.sample_rate_hz(), config })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn get(&self, position: usize) -> Option<&Event> {
        self.events.get(position)
    }

    pub fn kinds(&self) -> impl Iterator<Item = EventType> + '_ {
        self.by_type.keys().copied()
    }

    /// First matching event strictly after `frame`.
    ///
    /// Ties on frame resolve to the event listed first.
    pub fn next_event(&self, frame: usize, filter: &EventFilter) -> Option<&Event> {
        self.candidates(filter)
            .filter_map(|bucket| {
                let from = bucket.partition_point(|&p| self.events[p].frame <= frame);
                bucket[from..].iter().copied().find(|&p| filter.matches_compound(&self.events[p]))
            })
            .min()
            .map(|p| &self.events[p])
    }

    /// Last matching event strictly before `frame`.
    pub fn previous_event(&self, frame: usize, filter: &EventFilter) -> Option<&Event> {
        self.candidates(filter)
            .filter_map(|bucket| {
                let until = bucket.partition_point(|&p| self.events[p].frame < frame);
                bucket[..until].iter().rev().copied().find(|&p| filter.matches_compound(&self.events[p]))
            })
            .max()
            .map(|p| &self.events[p])
    }

    pub fn events_at_frame(&self, frame: usize) -> &[Event] {
        let from = self.events.partition_point(|e| e.frame < frame);
        let until = self.events.partition_point(|e| e.frame <= frame);
        &self.events[from..until]
    }

    /// Events with `range.start <= frame <= range.end`.
    pub fn events_in_range(&self, range: FrameRange) -> QueryResult<&[Event]> {
        if range.is_empty() {
            return Err(QueryError::InvalidRange { start: range.start, end: range.end });
        }
        let from = self.events.partition_point(|e| e.frame < range.start);
        let until = self.events.partition_point(|e| e.frame <= range.end);
        Ok(&self.events[from..until])
    }

    pub fn events_of_type(&self, kind: EventType) -> impl Iterator<Item = &Event> + '_ {
        self.by_type.get(&kind).into_iter().flatten().map(move |&p| &self.events[p])
    }

    /// Events matching `filter`, in frame order.
    pub fn filtered<'a>(&'a self, filter: &'a EventFilter) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.iter().filter(move |e| filter.matches(e))
    }

    /// Frames from `pre_s` before to `post_s` after the event, clipped to the match.
    pub fn event_context(&self, event: &Event, pre_s: f64, post_s: f64) -> FrameRange {
        let start = event.frame.saturating_sub(self.frames_for(pre_s));
        let end = event.frame.saturating_add(self.frames_for(post_s)).min(self.last_frame());
        FrameRange::new(start.min(end), end)
    }

    pub fn default_context(&self, event: &Event) -> FrameRange {
        self.event_context(event, self.config.default_pre_s, self.config.default_post_s)
    }

    /// Phase of play leading into the event.
    pub fn buildup_context(&self, event: &Event) -> FrameRange {
        self.event_context(event, self.config.buildup_s, 0.0)
    }

    /// Phase of play right after the event.
    pub fn reaction_context(&self, event: &Event) -> FrameRange {
        self.event_context(event, 0.0, self.config.reaction_s)
    }

    /// Frames spanning two events plus padding on both sides.
    pub fn sequence_context(&self, first: &Event, last: &Event, padding_s: f64) -> QueryResult<FrameRange> {
        if last.frame < first.frame {
            return Err(QueryError::InvalidRange { start: first.frame, end: last.frame });
        }
        let pad = self.frames_for(padding_s);
        let start = first.frame.saturating_sub(pad);
        let end = last.frame.saturating_add(pad).min(self.last_frame());
        Ok(FrameRange::new(start, end))
    }

    /// Other events within `window_s` of `event`, on either side. `event` must
    /// come from this index; it is skipped by identity, so an equal duplicate
    /// is still listed.
    pub fn related_events(&self, event: &Event, window_s: Option<f64>) -> Vec<&Event> {
        let window = self.frames_for(window_s.unwrap_or(self.config.related_window_s));
        let range = FrameRange::new(event.frame.saturating_sub(window), event.frame.saturating_add(window));
        let from = self.events.partition_point(|e| e.frame < range.start);
        let until = self.events.partition_point(|e| e.frame <= range.end);
        self.events[from..until].iter().filter(|e| !std::ptr::eq(*e, event)).collect()
    }

    /// Pass network of the passes matching `filter`, e.g. one team or one
    /// stretch of play via a zone or game-state filter.
    pub fn pass_network(&self, filter: &EventFilter) -> PassNetwork {
        let network =
            PassNetwork::from_events(self.events_of_type(EventType::Pass).filter(|e| filter.matches(e)));
        debug!(passes = network.passes, players = network.nodes.len(), edges = network.edges.len(), "pass network");
        network
    }

    fn candidates<'a>(&'a self, filter: &'a EventFilter) -> Box<dyn Iterator<Item = &'a [usize]> + 'a> {
        match &filter.kinds {
            Some(kinds) => Box::new(kinds.iter().filter_map(move |k| self.by_type.get(k).map(Vec::as_slice))),
            None => Box::new(self.by_type.values().map(Vec::as_slice)),
        }
    }

    fn frames_for(&self, seconds: f64) -> usize {
        (seconds.max(0.0) * self.sample_rate_hz).round() as usize
    }

    fn last_frame(&self) -> usize {
        self.frame_count.saturating_sub(1)
    }
}
