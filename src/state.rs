use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::workflow::{HeadshotSession, PortraitBackend};

/// One workflow per user per chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub chat_id: i64,
    pub user_id: i64,
}

pub type SharedSession = Arc<AsyncMutex<HeadshotSession>>;

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn PortraitBackend>,
    sessions: Arc<Mutex<HashMap<SessionKey, SharedSession>>>,
}

impl AppState {
    pub fn new(backend: Arc<dyn PortraitBackend>) -> Self {
        AppState {
            backend,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The async lock on the returned session is held for the whole of a
    /// workflow step, so `try_lock` failing means a request is in flight.
    pub fn session(&self, key: SessionKey) -> SharedSession {
        self.sessions
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(AsyncMutex::new(HeadshotSession::new())))
            .clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use async_trait::async_trait;

    use super::*;
    use crate::llm::media::EncodedImage;
    use crate::workflow::{FaceAnalysis, Gender, WorkflowState};

    struct UnusedBackend;

    #[async_trait]
    impl PortraitBackend for UnusedBackend {
        async fn analyze_face(&self, _image: &EncodedImage) -> Result<FaceAnalysis> {
            Ok(FaceAnalysis::unreadable())
        }

        async fn generate_portrait(
            &self,
            image: &EncodedImage,
            _gender: Gender,
            _outfit_instruction: &str,
        ) -> Result<EncodedImage> {
            Ok(image.clone())
        }
    }

    #[tokio::test]
    async fn sessions_are_shared_per_key() {
        let state = AppState::new(Arc::new(UnusedBackend));
        let key = SessionKey {
            chat_id: 10,
            user_id: 20,
        };

        let first = state.session(key);
        first.lock().await.begin_upload().unwrap();
        let again = state.session(key);
        assert_eq!(again.lock().await.state(), WorkflowState::Uploading);

        let other = state.session(SessionKey {
            chat_id: 10,
            user_id: 21,
        });
        assert_eq!(other.lock().await.state(), WorkflowState::Idle);
        assert_eq!(state.session_count(), 2);
    }

    #[tokio::test]
    async fn busy_session_cannot_be_locked_twice() {
        let state = AppState::new(Arc::new(UnusedBackend));
        let key = SessionKey {
            chat_id: 1,
            user_id: 1,
        };
        let session = state.session(key);
        let _guard = session.lock().await;
        assert!(state.session(key).try_lock().is_err());
    }
}
