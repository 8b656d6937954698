use std::future::Future;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use crate::llm::media::EncodedImage;
use crate::workflow::session::{AnalysisOutcome, HeadshotSession};
use crate::workflow::types::{
    FaceAnalysis, Gender, PortraitRequest, StepOutcome, WorkflowError, WorkflowState,
};

pub const UPLOAD_FAILED_MESSAGE: &str =
    "Could not read your photo. Please upload a PNG or JPG image.";
pub const ANALYSIS_FAILED_MESSAGE: &str = "An error occurred during analysis. Please try again.";
pub const GENERATION_FAILED_MESSAGE: &str = "Failed to generate the portrait. Please try again.";
pub const OUTFIT_GENERATION_FAILED_MESSAGE: &str =
    "Failed to generate the portrait with the selected outfit.";

/// The two calls the workflow makes to the image model.
#[async_trait]
pub trait PortraitBackend: Send + Sync {
    async fn analyze_face(&self, image: &EncodedImage) -> Result<FaceAnalysis>;

    async fn generate_portrait(
        &self,
        image: &EncodedImage,
        gender: Gender,
        outfit_instruction: &str,
    ) -> Result<EncodedImage>;
}

#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn state_changed(&self, state: WorkflowState);
}

fn outcome_for(session: &HeadshotSession) -> StepOutcome {
    match (session.state(), session.final_image()) {
        (WorkflowState::Completed, Some(image)) => StepOutcome::Completed(image.clone()),
        _ => StepOutcome::Failed(
            session
                .error_message()
                .unwrap_or(GENERATION_FAILED_MESSAGE)
                .to_string(),
        ),
    }
}

async fn generate(
    session: &mut HeadshotSession,
    backend: &dyn PortraitBackend,
    progress: &dyn ProgressSink,
    request: PortraitRequest,
    failure_message: &str,
) -> Result<StepOutcome, WorkflowError> {
    progress.state_changed(WorkflowState::GeneratingFinal).await;
    match backend
        .generate_portrait(&request.image, request.gender, &request.instruction)
        .await
    {
        Ok(image) => {
            info!(
                gender = %request.gender,
                mime_type = image.mime_type(),
                bytes = image.approx_len_bytes(),
                "Portrait generated"
            );
            session.complete(image)?;
        }
        Err(err) => {
            warn!(gender = %request.gender, "Portrait generation failed: {err:#}");
            session.fail(failure_message)?;
        }
    }
    progress.state_changed(session.state()).await;
    Ok(outcome_for(session))
}

/// Drives the session from `Idle` through upload and analysis. On the male
/// path this continues straight through generation.
pub async fn run_upload<F>(
    session: &mut HeadshotSession,
    backend: &dyn PortraitBackend,
    progress: &dyn ProgressSink,
    upload: F,
) -> Result<StepOutcome, WorkflowError>
where
    F: Future<Output = Result<EncodedImage>> + Send,
{
    session.begin_upload()?;
    progress.state_changed(WorkflowState::Uploading).await;

    let image = match upload.await {
        Ok(image) => image,
        Err(err) => {
            warn!("Upload failed: {err:#}");
            session.fail(UPLOAD_FAILED_MESSAGE)?;
            progress.state_changed(WorkflowState::Error).await;
            return Ok(StepOutcome::Failed(UPLOAD_FAILED_MESSAGE.to_string()));
        }
    };
    info!(
        mime_type = image.mime_type(),
        bytes = image.approx_len_bytes(),
        "Upload read"
    );

    session.finish_upload(image.clone())?;
    progress.state_changed(WorkflowState::Analyzing).await;

    let analysis = match backend.analyze_face(&image).await {
        Ok(analysis) => analysis,
        Err(err) => {
            warn!("Face analysis failed: {err:#}");
            session.fail(ANALYSIS_FAILED_MESSAGE)?;
            progress.state_changed(WorkflowState::Error).await;
            return Ok(StepOutcome::Failed(ANALYSIS_FAILED_MESSAGE.to_string()));
        }
    };
    info!(
        gender = %analysis.gender,
        is_clear = analysis.is_clear,
        "Face analysis finished"
    );

    match session.apply_analysis(&analysis)? {
        AnalysisOutcome::Rejected(message) => {
            progress.state_changed(WorkflowState::Error).await;
            Ok(StepOutcome::Failed(message))
        }
        AnalysisOutcome::ChooseOutfit(options) => {
            progress.state_changed(WorkflowState::SelectingOutfit).await;
            Ok(StepOutcome::AwaitingOutfit(options))
        }
        AnalysisOutcome::Generate(request) => {
            generate(session, backend, progress, request, GENERATION_FAILED_MESSAGE).await
        }
    }
}

pub async fn run_outfit_selection(
    session: &mut HeadshotSession,
    backend: &dyn PortraitBackend,
    progress: &dyn ProgressSink,
    outfit_id: &str,
) -> Result<StepOutcome, WorkflowError> {
    let request = session.select_outfit(outfit_id)?;
    info!(outfit = outfit_id, "Outfit selected");
    generate(
        session,
        backend,
        progress,
        request,
        OUTFIT_GENERATION_FAILED_MESSAGE,
    )
    .await
}
