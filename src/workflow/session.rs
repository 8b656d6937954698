use chrono::{DateTime, Utc};

use crate::llm::media::EncodedImage;
use crate::workflow::outfits::{female_outfit_prompt, find_outfit, FEMALE_OUTFITS, MALE_OUTFIT_PROMPT};
use crate::workflow::types::{
    FaceAnalysis, Gender, OutfitOption, PortraitRequest, WorkflowError, WorkflowState,
};

pub const UNCLEAR_FACE_MESSAGE: &str = "Face not clear enough. Please upload a clearer photo.";

/// Where the workflow goes after a face analysis has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisOutcome {
    Rejected(String),
    Generate(PortraitRequest),
    ChooseOutfit(&'static [OutfitOption]),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadshotSession {
    state: WorkflowState,
    original_image: Option<EncodedImage>,
    gender: Gender,
    error_message: Option<String>,
    final_image: Option<EncodedImage>,
    started_at: Option<DateTime<Utc>>,
}

impl Default for HeadshotSession {
    fn default() -> Self {
        Self {
            state: WorkflowState::Idle,
            original_image: None,
            gender: Gender::Unknown,
            error_message: None,
            final_image: None,
            started_at: None,
        }
    }
}

impl HeadshotSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn gender(&self) -> Gender {
        self.gender
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn final_image(&self) -> Option<&EncodedImage> {
        self.final_image.as_ref()
    }

    /// When the current upload started; identifies one pass through the
    /// workflow.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    fn expect_state(
        &self,
        allowed: &[WorkflowState],
        action: &'static str,
    ) -> Result<(), WorkflowError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(WorkflowError::InvalidTransition {
                state: self.state,
                action,
            })
        }
    }

    pub fn begin_upload(&mut self) -> Result<(), WorkflowError> {
        self.expect_state(&[WorkflowState::Idle], "start an upload")?;
        self.state = WorkflowState::Uploading;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn finish_upload(&mut self, image: EncodedImage) -> Result<(), WorkflowError> {
        self.expect_state(&[WorkflowState::Uploading], "finish an upload")?;
        self.original_image = Some(image);
        self.state = WorkflowState::Analyzing;
        Ok(())
    }

    pub fn apply_analysis(
        &mut self,
        analysis: &FaceAnalysis,
    ) -> Result<AnalysisOutcome, WorkflowError> {
        self.expect_state(&[WorkflowState::Analyzing], "apply a face analysis")?;
        let image = self
            .original_image
            .clone()
            .ok_or(WorkflowError::MissingOriginalImage)?;

        if !analysis.is_clear {
            let message = analysis
                .reason
                .as_deref()
                .map(str::trim)
                .filter(|reason| !reason.is_empty())
                .unwrap_or(UNCLEAR_FACE_MESSAGE)
                .to_string();
            self.error_message = Some(message.clone());
            self.state = WorkflowState::Error;
            return Ok(AnalysisOutcome::Rejected(message));
        }

        self.gender = analysis.gender;
        if analysis.gender == Gender::Male {
            self.state = WorkflowState::GeneratingFinal;
            return Ok(AnalysisOutcome::Generate(PortraitRequest {
                image,
                gender: Gender::Male,
                instruction: MALE_OUTFIT_PROMPT.to_string(),
            }));
        }

        self.state = WorkflowState::SelectingOutfit;
        Ok(AnalysisOutcome::ChooseOutfit(&FEMALE_OUTFITS))
    }

    pub fn select_outfit(&mut self, outfit_id: &str) -> Result<PortraitRequest, WorkflowError> {
        self.expect_state(&[WorkflowState::SelectingOutfit], "select an outfit")?;
        let outfit =
            find_outfit(outfit_id).ok_or_else(|| WorkflowError::UnknownOutfit(outfit_id.to_string()))?;
        let image = self
            .original_image
            .clone()
            .ok_or(WorkflowError::MissingOriginalImage)?;
        self.state = WorkflowState::GeneratingFinal;
        Ok(PortraitRequest {
            image,
            gender: Gender::Female,
            instruction: female_outfit_prompt(outfit),
        })
    }

    pub fn complete(&mut self, image: EncodedImage) -> Result<(), WorkflowError> {
        self.expect_state(&[WorkflowState::GeneratingFinal], "complete a portrait")?;
        self.final_image = Some(image);
        self.state = WorkflowState::Completed;
        Ok(())
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), WorkflowError> {
        self.expect_state(
            &[
                WorkflowState::Uploading,
                WorkflowState::Analyzing,
                WorkflowState::GeneratingFinal,
            ],
            "record an error",
        )?;
        self.error_message = Some(message.into());
        self.state = WorkflowState::Error;
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
