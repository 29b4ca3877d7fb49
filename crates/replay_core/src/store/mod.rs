//! Frame Store: the validated ground truth every other component reads from.

pub mod artifact;
pub mod frame;
pub mod frame_store;
pub mod raw;

pub use artifact::{artifact_path, read_artifact, write_artifact, ArtifactHeader, ARTIFACT_VERSION};
pub use frame::{BallSample, EntityId, Frame, PlayerSample, Team, PLAYER_SLOTS};
pub use frame_store::{FrameStore, Timeline, FRAME_BYTES};
pub use raw::{parse_jsonl, RawBall, RawFrame, RawPlayer};
