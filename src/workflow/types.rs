use std::fmt;

use serde::{Deserialize, Serialize};

use crate::llm::media::EncodedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowState {
    Idle,
    Uploading,
    Analyzing,
    SelectingOutfit,
    GeneratingFinal,
    Completed,
    Error,
}

impl WorkflowState {
    /// A request to the outside world is in flight in these states.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            WorkflowState::Uploading | WorkflowState::Analyzing | WorkflowState::GeneratingFinal
        )
    }

    pub fn status_message(self) -> &'static str {
        match self {
            WorkflowState::Uploading => "Uploading your photo...",
            WorkflowState::Analyzing => "Analyzing face features and detection...",
            WorkflowState::GeneratingFinal => {
                "Crafting your professional portrait. This might take a moment..."
            }
            _ => "Processing...",
        }
    }

    pub fn detail_message(self) -> &'static str {
        match self {
            WorkflowState::GeneratingFinal => {
                "Replacing background, adjusting lighting, and applying professional attire..."
            }
            _ => "Please wait, this only takes a few seconds.",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::Idle => "idle",
            WorkflowState::Uploading => "uploading",
            WorkflowState::Analyzing => "analyzing",
            WorkflowState::SelectingOutfit => "selecting_outfit",
            WorkflowState::GeneratingFinal => "generating_final",
            WorkflowState::Completed => "completed",
            WorkflowState::Error => "error",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Gender {
    /// Anything other than an exact `male`/`female` label maps to `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "male" => Gender::Male,
            "female" => Gender::Female,
            _ => Gender::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutfitOption {
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceAnalysis {
    pub gender: Gender,
    pub is_clear: bool,
    pub reason: Option<String>,
}

impl FaceAnalysis {
    pub const UNREADABLE_REASON: &'static str = "Could not analyze the image.";

    /// What a malformed or empty analysis response degrades to.
    pub fn unreadable() -> Self {
        Self {
            gender: Gender::Unknown,
            is_clear: false,
            reason: Some(Self::UNREADABLE_REASON.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortraitRequest {
    pub image: EncodedImage,
    pub gender: Gender,
    pub instruction: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    AwaitingOutfit(&'static [OutfitOption]),
    Completed(EncodedImage),
    Failed(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("cannot {action} while {state}")]
    InvalidTransition {
        state: WorkflowState,
        action: &'static str,
    },
    #[error("unknown outfit option '{0}'")]
    UnknownOutfit(String),
    #[error("no original image is available for generation")]
    MissingOriginalImage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_states_are_the_in_flight_ones() {
        let busy: Vec<_> = [
            WorkflowState::Idle,
            WorkflowState::Uploading,
            WorkflowState::Analyzing,
            WorkflowState::SelectingOutfit,
            WorkflowState::GeneratingFinal,
            WorkflowState::Completed,
            WorkflowState::Error,
        ]
        .into_iter()
        .filter(|state| state.is_busy())
        .collect();
        assert_eq!(
            busy,
            vec![
                WorkflowState::Uploading,
                WorkflowState::Analyzing,
                WorkflowState::GeneratingFinal
            ]
        );
    }

    #[test]
    fn gender_labels_are_lenient_about_case_only() {
        assert_eq!(Gender::from_label("Male"), Gender::Male);
        assert_eq!(Gender::from_label(" female "), Gender::Female);
        assert_eq!(Gender::from_label("man"), Gender::Unknown);
        assert_eq!(Gender::from_label(""), Gender::Unknown);
    }

    #[test]
    fn gender_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Gender::Female).unwrap(), "\"female\"");
        assert_eq!(
            serde_json::to_string(&WorkflowState::SelectingOutfit).unwrap(),
            "\"SELECTING_OUTFIT\""
        );
    }
}
