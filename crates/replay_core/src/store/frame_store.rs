use std::collections::BTreeMap;
use std::io::BufRead;
use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, info};

use super::frame::{BallSample, EntityId, Frame, PlayerSample, Team, PLAYER_SLOTS};
use super::raw::{parse_jsonl, RawBall, RawFrame, RawPlayer};
use crate::error::{FormatError, QueryError, QueryResult};

/// Approximate resident size of one frame, used for memory budgeting.
pub const FRAME_BYTES: usize = std::mem::size_of::<Frame>();

/// Sorted sample timestamps with time <-> index lookups.
#[derive(Debug, Clone)]
pub struct Timeline {
    timestamps: Arc<[f64]>,
    sample_rate_hz: f64,
}

impl Timeline {
    pub fn new(timestamps: Vec<f64>, sample_rate_hz: f64) -> Self {
        Self { timestamps: timestamps.into(), sample_rate_hz }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    pub fn frame_interval(&self) -> f64 {
        1.0 / self.sample_rate_hz
    }

    pub fn timestamp(&self, index: usize) -> Option<f64> {
        self.timestamps.get(index).copied()
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn start(&self) -> f64 {
        self.timestamps.first().copied().unwrap_or(0.0)
    }

    pub fn end(&self) -> f64 {
        self.timestamps.last().copied().unwrap_or(0.0)
    }

    pub fn contains_time(&self, t: f64) -> bool {
        !self.is_empty() && t >= self.start() && t <= self.end()
    }

    /// Last index whose timestamp is `<= t`.
    pub fn index_at_or_before(&self, t: f64) -> Option<usize> {
        let count = self.timestamps.partition_point(|&ts| ts <= t);
        count.checked_sub(1)
    }

    /// First index whose timestamp is `>= t`.
    pub fn index_at_or_after(&self, t: f64) -> Option<usize> {
        let idx = self.timestamps.partition_point(|&ts| ts < t);
        (idx < self.timestamps.len()).then_some(idx)
    }

    /// Index of the sample closest to `t`; earlier sample wins a tie.
    pub fn nearest(&self, t: f64) -> Option<usize> {
        match (self.index_at_or_before(t), self.index_at_or_after(t)) {
            (Some(a), Some(b)) => {
                let da = t - self.timestamps[a];
                let db = self.timestamps[b] - t;
                Some(if db < da { b } else { a })
            }
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Whole number of frames covering `seconds` at this sample rate.
    pub fn frames_for(&self, seconds: f64) -> usize {
        (seconds.max(0.0) * self.sample_rate_hz).round() as usize
    }
}

/// Immutable, validated tracking data for one match.
///
/// Owns the frame array exclusively. Everything downstream refers to frames
/// by index and assumes the rectangular 22-slot layout checked here.
#[derive(Debug)]
pub struct FrameStore {
    frames: Arc<[Frame]>,
    timeline: Timeline,
    roster: BTreeMap<u32, Team>,
}

impl FrameStore {
    /// Validate raw ingestion records into a store.
    ///
    /// Missing timestamps are derived as `index / sample_rate_hz`. Any
    /// violation rejects the whole source.
    pub fn load<I>(records: I, sample_rate_hz: f64) -> Result<Self, FormatError>
    where
        I: IntoIterator<Item = RawFrame>,
    {
        if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
            return Err(FormatError::SampleRate(sample_rate_hz));
        }
        let frames = records
            .into_iter()
            .enumerate()
            .map(|(index, raw)| convert_frame(index, raw, sample_rate_hz))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_frames(frames, sample_rate_hz)
    }

    /// Parse and validate a JSON-lines source, one raw frame per line.
    pub fn load_jsonl<R: BufRead>(reader: R, sample_rate_hz: f64) -> Result<Self, FormatError> {
        let records = parse_jsonl(reader)?;
        Self::load(records, sample_rate_hz)
    }

    /// Validate already-typed frames (used when reading a persisted artifact).
    pub fn from_frames(frames: Vec<Frame>, sample_rate_hz: f64) -> Result<Self, FormatError> {
        if !(sample_rate_hz.is_finite() && sample_rate_hz > 0.0) {
            return Err(FormatError::SampleRate(sample_rate_hz));
        }
        if frames.is_empty() {
            return Err(FormatError::Empty);
        }

        let mut roster = BTreeMap::new();
        let mut previous: Option<f64> = None;
        for (index, frame) in frames.iter().enumerate() {
            validate_frame(index, frame, previous, &mut roster)?;
            previous = Some(frame.timestamp);
        }

        let timeline = Timeline::new(frames.iter().map(|f| f.timestamp).collect(), sample_rate_hz);
        info!(
            frames = frames.len(),
            players = roster.len(),
            duration_s = timeline.end() - timeline.start(),
            "frame store loaded"
        );

        Ok(Self { frames: frames.into(), timeline, roster })
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.timeline.sample_rate_hz()
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn get(&self, index: usize) -> QueryResult<&Frame> {
        self.frames
            .get(index)
            .ok_or(QueryError::OutOfRange { index, frame_count: self.frames.len() })
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn slice(&self, range: Range<usize>) -> Option<&[Frame]> {
        self.frames.get(range)
    }

    /// Frame index nearest to time `t`.
    pub fn index_at_time(&self, t: f64) -> QueryResult<usize> {
        if !self.timeline.contains_time(t) {
            return Err(QueryError::TimeOutOfRange {
                t,
                start: self.timeline.start(),
                end: self.timeline.end(),
            });
        }
        self.timeline.nearest(t).ok_or(QueryError::TimeOutOfRange {
            t,
            start: self.timeline.start(),
            end: self.timeline.end(),
        })
    }

    pub fn roster(&self) -> &BTreeMap<u32, Team> {
        &self.roster
    }

    pub fn team_of(&self, id: u32) -> Option<Team> {
        self.roster.get(&id).copied()
    }

    pub fn contains_entity(&self, entity: EntityId) -> bool {
        match entity {
            EntityId::Ball => true,
            EntityId::Player(id) => self.roster.contains_key(&id),
        }
    }

    /// Ball first, then players by id.
    pub fn entities(&self) -> Vec<EntityId> {
        std::iter::once(EntityId::Ball)
            .chain(self.roster.keys().map(|&id| EntityId::Player(id)))
            .collect()
    }

    pub fn estimated_bytes(frame_count: usize) -> usize {
        frame_count * FRAME_BYTES
    }
}

fn convert_frame(index: usize, raw: RawFrame, sample_rate_hz: f64) -> Result<Frame, FormatError> {
    let missing = |field| FormatError::MissingField { frame: index, field };

    let timestamp = raw.timestamp.unwrap_or(index as f64 / sample_rate_hz);
    let period = raw.period.ok_or_else(|| missing("period"))?;
    let ball = convert_ball(index, raw.ball.ok_or_else(|| missing("ball"))?)?;
    let raw_players = raw.players.ok_or_else(|| missing("players"))?;

    if raw_players.len() != PLAYER_SLOTS {
        return Err(FormatError::Arity { frame: index, expected: PLAYER_SLOTS, found: raw_players.len() });
    }

    let mut players = [None; PLAYER_SLOTS];
    for (slot, raw_player) in players.iter_mut().zip(raw_players) {
        *slot = raw_player.map(|p| convert_player(index, p)).transpose()?;
    }

    Ok(Frame { timestamp, period, ball, players })
}

fn convert_ball(index: usize, raw: RawBall) -> Result<BallSample, FormatError> {
    let missing = |field| FormatError::MissingField { frame: index, field };
    Ok(BallSample {
        x: raw.x.ok_or_else(|| missing("ball.x"))?,
        y: raw.y.ok_or_else(|| missing("ball.y"))?,
        z: raw.z.ok_or_else(|| missing("ball.z"))?,
    })
}

fn convert_player(index: usize, raw: RawPlayer) -> Result<PlayerSample, FormatError> {
    let missing = |field| FormatError::MissingField { frame: index, field };
    Ok(PlayerSample {
        id: raw.id.ok_or_else(|| missing("player.id"))?,
        team: raw.team.ok_or_else(|| missing("player.team"))?,
        x: raw.x.ok_or_else(|| missing("player.x"))?,
        y: raw.y.ok_or_else(|| missing("player.y"))?,
    })
}

fn validate_frame(
    index: usize,
    frame: &Frame,
    previous: Option<f64>,
    roster: &mut BTreeMap<u32, Team>,
) -> Result<(), FormatError> {
    if !frame.timestamp.is_finite() {
        return Err(FormatError::NonFinite { frame: index, field: "timestamp" });
    }
    if let Some(previous) = previous {
        if frame.timestamp <= previous {
            return Err(FormatError::Ordering { frame: index, timestamp: frame.timestamp, previous });
        }
    }
    let ball = &frame.ball;
    if !(ball.x.is_finite() && ball.y.is_finite() && ball.z.is_finite()) {
        return Err(FormatError::NonFinite { frame: index, field: "ball" });
    }

    let mut seen = [0u32; PLAYER_SLOTS];
    let mut seen_len = 0;
    for player in frame.present_players() {
        if !(player.x.is_finite() && player.y.is_finite()) {
            return Err(FormatError::NonFinite { frame: index, field: "player" });
        }
        if seen[..seen_len].contains(&player.id) {
            return Err(FormatError::DuplicatePlayer { frame: index, id: player.id });
        }
        seen[seen_len] = player.id;
        seen_len += 1;

        match roster.get(&player.id) {
            Some(team) if *team != player.team => {
                return Err(FormatError::TeamChange { frame: index, id: player.id });
            }
            Some(_) => {}
            None => {
                debug!(frame = index, id = player.id, team = %player.team, "roster entry");
                roster.insert(player.id, player.team);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_player(id: u32, team: Team, x: f32) -> Option<RawPlayer> {
        Some(RawPlayer { id: Some(id), team: Some(team), x: Some(x), y: Some(0.0) })
    }

    fn raw_frame(timestamp: Option<f64>) -> RawFrame {
        let mut players = vec![None; PLAYER_SLOTS];
        players[0] = raw_player(1, Team::Home, -10.0);
        players[11] = raw_player(12, Team::Away, 10.0);
        RawFrame {
            timestamp,
            period: Some(1),
            ball: Some(RawBall { x: Some(0.0), y: Some(0.0), z: Some(0.0) }),
            players: Some(players),
        }
    }

    #[test]
    fn test_load_derives_missing_timestamps() {
        let store = FrameStore::load((0..5).map(|_| raw_frame(None)), 10.0).unwrap();
        assert_eq!(store.frame_count(), 5);
        assert!((store.timeline().timestamp(3).unwrap() - 0.3).abs() < 1e-12);
        assert_eq!(store.entities(), vec![EntityId::Ball, EntityId::Player(1), EntityId::Player(12)]);
        assert_eq!(store.team_of(12), Some(Team::Away));
    }

    #[test]
    fn test_load_rejects_wrong_arity() {
        let mut bad = raw_frame(Some(0.1));
        if let Some(players) = bad.players.as_mut() {
            players.pop();
        }
        let err = FrameStore::load(vec![raw_frame(Some(0.0)), bad], 10.0).unwrap_err();
        assert_eq!(err, FormatError::Arity { frame: 1, expected: PLAYER_SLOTS, found: 21 });
    }

    #[test]
    fn test_load_rejects_non_increasing_timestamps() {
        let err = FrameStore::load(vec![raw_frame(Some(0.2)), raw_frame(Some(0.2))], 10.0).unwrap_err();
        assert!(matches!(err, FormatError::Ordering { frame: 1, .. }));
    }

    #[test]
    fn test_load_rejects_missing_fields() {
        let mut bad = raw_frame(Some(0.0));
        bad.ball = None;
        assert_eq!(
            FrameStore::load(vec![bad], 10.0).unwrap_err(),
            FormatError::MissingField { frame: 0, field: "ball" }
        );

        let mut bad = raw_frame(Some(0.0));
        if let Some(players) = bad.players.as_mut() {
            players[3] = Some(RawPlayer { id: Some(4), team: None, x: Some(1.0), y: Some(1.0) });
        }
        assert_eq!(
            FrameStore::load(vec![bad], 10.0).unwrap_err(),
            FormatError::MissingField { frame: 0, field: "player.team" }
        );
    }

    #[test]
    fn test_load_rejects_duplicates_and_team_changes() {
        let mut dup = raw_frame(Some(0.0));
        if let Some(players) = dup.players.as_mut() {
            players[5] = raw_player(1, Team::Home, 0.0);
        }
        assert!(matches!(
            FrameStore::load(vec![dup], 10.0).unwrap_err(),
            FormatError::DuplicatePlayer { frame: 0, id: 1 }
        ));

        let mut switched = raw_frame(Some(0.1));
        if let Some(players) = switched.players.as_mut() {
            players[0] = raw_player(1, Team::Away, 0.0);
        }
        assert!(matches!(
            FrameStore::load(vec![raw_frame(Some(0.0)), switched], 10.0).unwrap_err(),
            FormatError::TeamChange { frame: 1, id: 1 }
        ));
    }

    #[test]
    fn test_load_rejects_empty_and_bad_rate() {
        assert_eq!(FrameStore::load(Vec::new(), 10.0).unwrap_err(), FormatError::Empty);
        assert!(matches!(
            FrameStore::load(vec![raw_frame(None)], 0.0).unwrap_err(),
            FormatError::SampleRate(_)
        ));
    }

    #[test]
    fn test_timeline_lookups() {
        let timeline = Timeline::new(vec![0.0, 0.1, 0.2, 0.5], 10.0);
        assert_eq!(timeline.index_at_or_before(0.15), Some(1));
        assert_eq!(timeline.index_at_or_after(0.15), Some(2));
        assert_eq!(timeline.index_at_or_before(-1.0), None);
        assert_eq!(timeline.index_at_or_after(0.6), None);
        assert_eq!(timeline.nearest(0.4), Some(3));
        assert_eq!(timeline.nearest(0.2), Some(2));
        assert_eq!(timeline.frames_for(1.5), 15);
    }

    #[test]
    fn test_index_at_time_out_of_range() {
        let store = FrameStore::load((0..3).map(|_| raw_frame(None)), 10.0).unwrap();
        assert_eq!(store.index_at_time(0.14).unwrap(), 1);
        assert!(matches!(store.index_at_time(5.0), Err(QueryError::TimeOutOfRange { .. })));
        assert!(matches!(store.get(3), Err(QueryError::OutOfRange { index: 3, frame_count: 3 })));
    }
}
