use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::coordinates::Vec2;
use crate::error::LoadError;
use crate::store::{EntityId, Frame, FrameStore, PlayerSample, FRAME_BYTES, PLAYER_SLOTS};

/// Cooperative cancellation flag shared between the cache and a loader.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Per-frame player lookup, sorted by id.
#[derive(Debug, Clone, Copy)]
struct SlotIndex {
    ids: [u32; PLAYER_SLOTS],
    slots: [u8; PLAYER_SLOTS],
    len: u8,
}

impl SlotIndex {
    fn build(frame: &Frame) -> Self {
        let mut pairs = [(0u32, 0u8); PLAYER_SLOTS];
        let mut len = 0;
        for (slot, player) in frame.players.iter().enumerate() {
            if let Some(p) = player {
                pairs[len] = (p.id, slot as u8);
                len += 1;
            }
        }
        pairs[..len].sort_unstable_by_key(|&(id, _)| id);

        let mut index = Self { ids: [0; PLAYER_SLOTS], slots: [0; PLAYER_SLOTS], len: len as u8 };
        for (i, (id, slot)) in pairs[..len].iter().enumerate() {
            index.ids[i] = *id;
            index.slots[i] = *slot;
        }
        index
    }

    fn slot_of(&self, id: u32) -> Option<usize> {
        self.ids[..self.len as usize]
            .binary_search(&id)
            .ok()
            .map(|i| self.slots[i] as usize)
    }
}

/// A fully populated, read-only view of a contiguous frame range.
///
/// Frames are borrowed from the store; the segment only owns its lookup index.
#[derive(Debug)]
pub struct Segment {
    store: Arc<FrameStore>,
    range: Range<usize>,
    index: Vec<SlotIndex>,
}

impl Segment {
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn start(&self) -> usize {
        self.range.start
    }

    pub fn end(&self) -> usize {
        self.range.end
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.range.contains(&index)
    }

    pub fn frame(&self, index: usize) -> Option<&Frame> {
        if !self.contains(index) {
            return None;
        }
        self.store.frames().get(index)
    }

    /// Caller guarantees `index` lies in this segment.
    pub(crate) fn frame_at(&self, index: usize) -> &Frame {
        &self.store.frames()[index]
    }

    pub fn player(&self, index: usize, id: u32) -> Option<&PlayerSample> {
        let local = self.index.get(index.checked_sub(self.range.start)?)?;
        let slot = local.slot_of(id)?;
        self.frame(index)?.players[slot].as_ref()
    }

    pub fn position(&self, index: usize, entity: EntityId) -> Option<Vec2> {
        match entity {
            EntityId::Ball => self.frame(index).map(|f| f.ball.position()),
            EntityId::Player(id) => self.player(index, id).map(PlayerSample::position),
        }
    }

    /// Resident cost charged against the memory budget.
    pub fn bytes(&self) -> usize {
        self.range.len() * (FRAME_BYTES + std::mem::size_of::<SlotIndex>())
    }
}

/// Source of window segments. Implementations must honour `cancel` between
/// units of work so that an abandoned prefetch stops promptly.
pub trait SegmentLoader: Send + Sync {
    fn frame_count(&self) -> usize;

    fn load(&self, range: Range<usize>, cancel: &CancelToken) -> Result<Segment, LoadError>;
}

/// Loads segments from an in-memory [`FrameStore`], chunk by chunk.
#[derive(Debug, Clone)]
pub struct StoreLoader {
    store: Arc<FrameStore>,
    chunk_frames: usize,
}

impl StoreLoader {
    pub fn new(store: Arc<FrameStore>, chunk_frames: usize) -> Self {
        Self { store, chunk_frames: chunk_frames.max(1) }
    }

    pub fn store(&self) -> &Arc<FrameStore> {
        &self.store
    }
}

impl SegmentLoader for StoreLoader {
    fn frame_count(&self) -> usize {
        self.store.frame_count()
    }

    fn load(&self, range: Range<usize>, cancel: &CancelToken) -> Result<Segment, LoadError> {
        let frames = self.store.slice(range.clone()).ok_or(LoadError::OutOfBounds {
            start: range.start,
            end: range.end,
            frame_count: self.store.frame_count(),
        })?;

        let mut index = Vec::with_capacity(frames.len());
        for chunk in frames.chunks(self.chunk_frames) {
            if cancel.is_cancelled() {
                return Err(LoadError::Cancelled);
            }
            index.extend(chunk.iter().map(SlotIndex::build));
        }
        Ok(Segment { store: self.store.clone(), range, index })
    }
}
