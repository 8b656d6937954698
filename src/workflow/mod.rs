//! The headshot workflow: `Idle -> Uploading -> Analyzing -> (SelectingOutfit |
//! GeneratingFinal) -> Completed`, with `Error` reachable from every state
//! that waits on I/O. Both the bot and the local CLI drive it.

pub mod outfits;
pub mod runner;
pub mod session;
pub mod types;

pub use outfits::OUTFIT_TIP;
pub use runner::{run_outfit_selection, run_upload, PortraitBackend, ProgressSink};
pub use session::HeadshotSession;
pub use types::{FaceAnalysis, Gender, OutfitOption, StepOutcome, WorkflowState};
