use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::{CONFIG, PORTRAIT_FILE_NAME};
use crate::llm::media::{validate_upload, EncodedImage};
use crate::workflow::outfits::find_outfit;
use crate::workflow::{
    run_outfit_selection, run_upload, HeadshotSession, OutfitOption, PortraitBackend,
    ProgressSink, StepOutcome, WorkflowState, OUTFIT_TIP,
};

#[derive(Debug, Clone, PartialEq)]
pub struct HeadshotArgs {
    pub file_path: PathBuf,
    pub outfit: Option<String>,
    pub output_path: PathBuf,
}

pub fn headshot_usage() -> &'static str {
    "Usage: cargo run -- headshot --file <path> [--outfit <opt1|opt2|opt3>] [--output <path>]"
}

pub fn parse_headshot_args(args: &[String]) -> Result<Option<HeadshotArgs>> {
    if args.get(1).map(|value| value.as_str()) != Some("headshot") {
        return Ok(None);
    }

    let mut file_path: Option<PathBuf> = None;
    let mut outfit: Option<String> = None;
    let mut output_path = PathBuf::from(PORTRAIT_FILE_NAME);

    let mut index = 2;
    while index < args.len() {
        match args[index].as_str() {
            "--file" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --file"))?;
                file_path = Some(PathBuf::from(value));
            }
            "--outfit" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --outfit"))?;
                if find_outfit(value).is_none() {
                    return Err(anyhow!("Invalid --outfit value: {value}"));
                }
                outfit = Some(value.clone());
            }
            "--output" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --output"))?;
                output_path = PathBuf::from(value);
            }
            "--help" | "-h" => {
                return Err(anyhow!(headshot_usage()));
            }
            other => {
                return Err(anyhow!(
                    "Unknown headshot argument: {other}\n{}",
                    headshot_usage()
                ));
            }
        }
        index += 1;
    }

    let file_path = file_path.ok_or_else(|| anyhow!("--file is required"))?;
    Ok(Some(HeadshotArgs {
        file_path,
        outfit,
        output_path,
    }))
}

struct ConsoleProgress;

#[async_trait]
impl ProgressSink for ConsoleProgress {
    async fn state_changed(&self, state: WorkflowState) {
        if state.is_busy() {
            info!(state = %state, "{}", state.status_message());
        }
    }
}

/// Accepts either the menu number or the outfit id. Re-prompts on anything
/// else and fails once input runs out.
async fn prompt_for_outfit<R>(reader: &mut R, options: &[OutfitOption]) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    println!("Choose your outfit:");
    for (position, option) in options.iter().enumerate() {
        println!("  {}. {} - {}", position + 1, option.label, option.description);
    }
    println!("Tip: {OUTFIT_TIP}");

    loop {
        println!("Enter 1-{}:", options.len());
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(anyhow!("No outfit selected"));
        }
        let choice = line.trim();
        let by_position = choice
            .parse::<usize>()
            .ok()
            .and_then(|position| position.checked_sub(1))
            .and_then(|index| options.get(index));
        let by_id = options.iter().find(|option| option.id == choice);
        if let Some(option) = by_position.or(by_id) {
            return Ok(option.id.to_string());
        }
        println!("Unknown choice: {choice}");
    }
}

/// Raw image files, or text files holding a data URI.
fn load_source_image(bytes: &[u8], max_bytes: usize) -> Result<EncodedImage> {
    let data_uri = std::str::from_utf8(bytes)
        .ok()
        .map(str::trim)
        .filter(|text| text.starts_with("data:"));
    match data_uri {
        Some(data_uri) => {
            let image = EncodedImage::from_data_uri(data_uri)?;
            Ok(validate_upload(&image.decode()?, max_bytes)?)
        }
        None => Ok(validate_upload(bytes, max_bytes)?),
    }
}

async fn write_portrait(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

async fn run_with_input<R>(
    args: &HeadshotArgs,
    backend: &dyn PortraitBackend,
    input: &mut R,
) -> Result<PathBuf>
where
    R: AsyncBufRead + Unpin,
{
    let bytes = tokio::fs::read(&args.file_path)
        .await
        .with_context(|| format!("failed to read {}", args.file_path.display()))?;
    info!(
        "Starting local headshot: file={}, output={}",
        args.file_path.display(),
        args.output_path.display()
    );

    let mut session = HeadshotSession::new();
    let progress = ConsoleProgress;
    let upload = async { load_source_image(&bytes, CONFIG.max_upload_bytes) };
    let mut outcome = run_upload(&mut session, backend, &progress, upload).await?;

    if let StepOutcome::AwaitingOutfit(options) = outcome {
        let outfit_id = match args.outfit.clone() {
            Some(outfit_id) => outfit_id,
            None => prompt_for_outfit(input, options).await?,
        };
        outcome = run_outfit_selection(&mut session, backend, &progress, &outfit_id).await?;
    } else if args.outfit.is_some() && session.state() == WorkflowState::Completed {
        warn!("--outfit is ignored when the default attire applies");
    }

    match outcome {
        StepOutcome::Completed(image) => {
            let bytes = image.decode()?;
            write_portrait(&args.output_path, &bytes).await?;
            info!(
                "Portrait written: path={}, bytes={}, gender={}",
                args.output_path.display(),
                bytes.len(),
                session.gender()
            );
            Ok(args.output_path.clone())
        }
        StepOutcome::Failed(message) => Err(anyhow!(message)),
        StepOutcome::AwaitingOutfit(_) => Err(anyhow!("Outfit selection did not complete")),
    }
}

pub async fn run_local_headshot(
    args: HeadshotArgs,
    backend: &dyn PortraitBackend,
) -> Result<PathBuf> {
    let mut stdin = BufReader::new(tokio::io::stdin());
    run_with_input(&args, backend, &mut stdin).await
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::llm::media::tests::PNG_BYTES;
    use crate::workflow::outfits::FEMALE_OUTFITS;
    use crate::workflow::{FaceAnalysis, Gender};

    struct FixedBackend {
        gender: Gender,
        instructions: Mutex<Vec<String>>,
    }

    impl FixedBackend {
        fn new(gender: Gender) -> Self {
            Self {
                gender,
                instructions: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PortraitBackend for FixedBackend {
        async fn analyze_face(&self, _image: &EncodedImage) -> Result<FaceAnalysis> {
            Ok(FaceAnalysis {
                gender: self.gender,
                is_clear: true,
                reason: None,
            })
        }

        async fn generate_portrait(
            &self,
            image: &EncodedImage,
            _gender: Gender,
            outfit_instruction: &str,
        ) -> Result<EncodedImage> {
            self.instructions
                .lock()
                .push(outfit_instruction.to_string());
            Ok(image.clone())
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|value| value.to_string()).collect()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pro_headshot_{}_{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn other_subcommands_are_not_parsed() {
        assert!(parse_headshot_args(&args(&["bot"])).unwrap().is_none());
        assert!(parse_headshot_args(&args(&["bot", "serve"])).unwrap().is_none());
    }

    #[test]
    fn parses_file_outfit_and_output() {
        let parsed = parse_headshot_args(&args(&[
            "bot", "headshot", "--file", "me.jpg", "--outfit", "opt2", "--output", "out.png",
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(parsed.file_path, PathBuf::from("me.jpg"));
        assert_eq!(parsed.outfit.as_deref(), Some("opt2"));
        assert_eq!(parsed.output_path, PathBuf::from("out.png"));
    }

    #[test]
    fn output_defaults_to_portrait_file_name() {
        let parsed = parse_headshot_args(&args(&["bot", "headshot", "--file", "me.jpg"]))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.output_path, PathBuf::from(PORTRAIT_FILE_NAME));
        assert!(parsed.outfit.is_none());
    }

    #[test]
    fn rejects_missing_file_and_unknown_outfit() {
        assert!(parse_headshot_args(&args(&["bot", "headshot"])).is_err());
        assert!(parse_headshot_args(&args(&["bot", "headshot", "--file"])).is_err());
        let err = parse_headshot_args(&args(&[
            "bot", "headshot", "--file", "a.png", "--outfit", "tuxedo",
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("tuxedo"));
        assert!(parse_headshot_args(&args(&["bot", "headshot", "--verbose"])).is_err());
    }

    #[tokio::test]
    async fn prompt_accepts_position_or_id_and_retries() {
        let mut input: &[u8] = b"9\nopt3\n";
        let chosen = prompt_for_outfit(&mut input, &FEMALE_OUTFITS).await.unwrap();
        assert_eq!(chosen, "opt3");

        let mut input: &[u8] = b"1\n";
        let chosen = prompt_for_outfit(&mut input, &FEMALE_OUTFITS).await.unwrap();
        assert_eq!(chosen, "opt1");

        let mut input: &[u8] = b"";
        assert!(prompt_for_outfit(&mut input, &FEMALE_OUTFITS).await.is_err());
    }

    #[tokio::test]
    async fn female_path_prompts_and_writes_portrait() {
        let dir = scratch_dir("female");
        let source = dir.join("selfie.png");
        std::fs::write(&source, PNG_BYTES).unwrap();
        let output = dir.join("nested").join("portrait.png");
        let backend = FixedBackend::new(Gender::Female);
        let headshot_args = HeadshotArgs {
            file_path: source,
            outfit: None,
            output_path: output.clone(),
        };

        let mut input: &[u8] = b"2\n";
        let written = run_with_input(&headshot_args, &backend, &mut input)
            .await
            .unwrap();

        assert_eq!(written, output);
        assert_eq!(std::fs::read(&output).unwrap(), PNG_BYTES);
        let instructions = backend.instructions.lock();
        assert_eq!(instructions.len(), 1);
        assert!(instructions[0].contains(FEMALE_OUTFITS[1].description));
        drop(instructions);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn male_path_never_reads_input() {
        let dir = scratch_dir("male");
        let source = dir.join("selfie.png");
        std::fs::write(&source, PNG_BYTES).unwrap();
        let backend = FixedBackend::new(Gender::Male);
        let headshot_args = HeadshotArgs {
            file_path: source,
            outfit: None,
            output_path: dir.join("portrait.png"),
        };

        let mut input: &[u8] = b"";
        run_with_input(&headshot_args, &backend, &mut input)
            .await
            .unwrap();
        assert_eq!(backend.instructions.lock().len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn source_may_be_a_data_uri_text_file() {
        let data_uri = EncodedImage::from_bytes(PNG_BYTES).unwrap();
        let text = format!("{}\n", data_uri.as_data_uri());
        let loaded = load_source_image(text.as_bytes(), 1024).unwrap();
        assert_eq!(loaded, data_uri);

        assert!(load_source_image(PNG_BYTES, 1024).is_ok());
        assert!(load_source_image(PNG_BYTES, 4).is_err());
        assert!(load_source_image(b"plain notes", 1024).is_err());
    }

    #[tokio::test]
    async fn missing_source_file_is_reported() {
        let backend = FixedBackend::new(Gender::Male);
        let headshot_args = HeadshotArgs {
            file_path: PathBuf::from("/definitely/not/here.png"),
            outfit: None,
            output_path: PathBuf::from("unused.png"),
        };
        let mut input: &[u8] = b"";
        let err = run_with_input(&headshot_args, &backend, &mut input)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
