//! Chat session: token rotation, history mutation and re-ask rewinds.
//!
//! A [`ChatSession`] owns one conversation. Every operation needs a session
//! token and acquires one first if none is held. Operations take `&mut self`,
//! so at most one request per session can be in flight; a streaming reply
//! keeps the session borrowed until the stream is dropped.
//!
//! A failed exchange leaves the user message in the log without a reply.
//! That state is valid and can be retried with [`ChatSession::reask`].

use async_stream::stream;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::client::{ChatApi, ClientConfig, token_header};
use crate::error::{Error, Result};
use crate::framing::{self, FragmentStream};
use crate::history::HistoryStore;
use crate::models::ModelType;
use crate::tokens::TokenStore;
use crate::types::ConversationLog;

/// Create a session with the default client configuration
pub fn new_session(model: ModelType) -> Result<ChatSession> {
    ChatSession::new(model, ClientConfig::default())
}

/// One conversation with the chat backend
pub struct ChatSession {
    api: Option<ChatApi>,
    tokens: TokenStore,
    log: ConversationLog,
    history: HistoryStore,
    saved_id: Option<String>,
    autosave: bool,
}

impl ChatSession {
    pub fn new(model: ModelType, config: ClientConfig) -> Result<Self> {
        Ok(Self {
            api: Some(ChatApi::new(&config)?),
            tokens: TokenStore::new(),
            log: ConversationLog::new(model),
            history: HistoryStore::default(),
            saved_id: None,
            autosave: false,
        })
    }

    /// Use `store` for save/load/list
    pub fn with_history(mut self, store: HistoryStore) -> Self {
        self.history = store;
        self
    }

    /// Save the log after every completed exchange
    pub fn with_autosave(mut self, autosave: bool) -> Self {
        self.autosave = autosave;
        self
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn model(&self) -> ModelType {
        self.log.model
    }

    /// Switch the model used for subsequent requests
    pub fn set_model(&mut self, model: ModelType) {
        self.log.model = model;
    }

    /// Record id the next [`save`](Self::save) writes to
    pub fn saved_id(&self) -> Option<&str> {
        self.saved_id.as_deref()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn is_closed(&self) -> bool {
        self.api.is_none()
    }

    /// Send a new user message and return the full reply
    pub async fn ask(&mut self, text: &str) -> Result<String> {
        let api = self.api.as_ref().ok_or(Error::Closed)?;
        if self.tokens.is_empty() {
            self.tokens.acquire(api).await?;
        }
        self.log.append_user(text);
        self.complete().await
    }

    /// Send a new user message and stream the reply.
    ///
    /// The assistant message is recorded only once the stream has been read
    /// to the end; dropping it early records nothing and closes the
    /// connection.
    pub async fn ask_stream(&mut self, text: &str) -> Result<FragmentStream<'_>> {
        let api = self.api.as_ref().ok_or(Error::Closed)?;
        if self.tokens.is_empty() {
            self.tokens.acquire(api).await?;
        }
        self.log.append_user(text);
        self.open_stream().await
    }

    /// Rewind to user turn `turn_index` and ask for a new answer to it.
    /// Returns an empty string when there is no history.
    pub async fn reask(&mut self, turn_index: usize) -> Result<String> {
        if self.log.is_empty() {
            return Ok(String::new());
        }
        self.rewind(turn_index).await?;
        self.complete().await
    }

    /// Streaming variant of [`reask`](Self::reask)
    pub async fn reask_stream(&mut self, turn_index: usize) -> Result<FragmentStream<'_>> {
        if self.log.is_empty() {
            return Err(Error::EmptyHistory);
        }
        self.rewind(turn_index).await?;
        self.open_stream().await
    }

    /// Save a copy of the log. The first save picks a fresh id; later saves
    /// overwrite the same record.
    pub fn save(&mut self) -> Result<String> {
        let id = self.history.save(&self.log, self.saved_id.as_deref())?;
        self.saved_id = Some(id.clone());
        Ok(id)
    }

    /// Replace the log with a saved conversation. Held tokens are kept.
    pub fn load(&mut self, id: &str) -> Result<()> {
        let saved = self.history.load(id)?;
        debug!(%id, messages = saved.messages.len(), "Loaded conversation");
        self.saved_id = Some(saved.id.clone());
        self.log = saved.into();
        Ok(())
    }

    pub fn list_saved(&self) -> Result<Vec<String>> {
        self.history.list_ids()
    }

    /// Release the HTTP client. Idempotent.
    pub fn close(&mut self) {
        if self.api.take().is_some() {
            debug!("Chat session closed");
        }
        self.tokens.clear();
    }

    /// Truncate tokens and log back to `turn_index`
    async fn rewind(&mut self, turn_index: usize) -> Result<()> {
        let api = self.api.as_ref().ok_or(Error::Closed)?;
        let n = turn_index.min(self.tokens.len().saturating_sub(1));
        self.tokens.truncate(n);

        if self.tokens.is_empty() {
            self.tokens.acquire(api).await?;
            self.log.truncate_to_turns(0);
        } else {
            self.log.truncate_to_turns(n);
        }
        debug!(turn = n, messages = self.log.len(), "Rewound conversation");
        Ok(())
    }

    async fn complete(&mut self) -> Result<String> {
        let api = self.api.as_ref().ok_or(Error::Closed)?;
        let token = self.tokens.current().unwrap_or_default();
        let reply = api.complete(&self.log, token).await?;

        self.log.append_assistant(reply.text.clone());
        self.tokens.push(refreshed_token(reply.token));
        if self.autosave {
            autosave(&self.history, &self.log, &mut self.saved_id);
        }
        Ok(reply.text)
    }

    async fn open_stream(&mut self) -> Result<FragmentStream<'_>> {
        let api = self.api.as_ref().ok_or(Error::Closed)?;
        let token = self.tokens.current().unwrap_or_default();
        let response = api.chat(&self.log, token).await?;
        let refreshed = token_header(response.headers());
        let fragments = framing::decode_stream(response.bytes_stream());

        let Self {
            tokens,
            log,
            history,
            saved_id,
            autosave: autosave_enabled,
            ..
        } = self;

        Ok(Box::pin(stream! {
            let mut fragments = Box::pin(fragments);
            let mut answer = String::new();

            while let Some(fragment) = fragments.next().await {
                match fragment {
                    Ok(text) => {
                        answer.push_str(&text);
                        yield Ok(text);
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            log.append_assistant(answer);
            tokens.push(refreshed_token(refreshed));
            if *autosave_enabled {
                autosave(history, log, saved_id);
            }
        }))
    }
}

fn refreshed_token(token: Option<String>) -> String {
    token.unwrap_or_else(|| {
        warn!("Reply carried no refreshed token; the next request will send an empty one");
        String::new()
    })
}

fn autosave(history: &HistoryStore, log: &ConversationLog, saved_id: &mut Option<String>) {
    match history.save(log, saved_id.as_deref()) {
        Ok(id) => *saved_id = Some(id),
        Err(e) => warn!("Autosave failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{TOKEN_ACCEPT_HEADER, TOKEN_HEADER};
    use crate::types::{Message, Role};
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REPLY: &str = "data: {\"message\":\"Hello\"}\n\n\
                         data: {\"message\":\", \"}\n\n\
                         data: {\"message\":\"world\"}\n\n\
                         data: [DONE]\n";

    async fn mount_status(server: &MockServer, token: &str) {
        Mock::given(method("GET"))
            .and(path("/status"))
            .and(header(TOKEN_ACCEPT_HEADER, "1"))
            .respond_with(ResponseTemplate::new(200).insert_header(TOKEN_HEADER, token))
            .mount(server)
            .await;
    }

    async fn mount_chat(server: &MockServer, body: &str) {
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(TOKEN_HEADER, "next")
                    .set_body_string(body),
            )
            .mount(server)
            .await;
    }

    async fn backend() -> MockServer {
        let server = MockServer::start().await;
        mount_status(&server, "first").await;
        mount_chat(&server, REPLY).await;
        server
    }

    fn session_for(server: &MockServer) -> ChatSession {
        ChatSession::new(
            ModelType::Claude,
            ClientConfig {
                base_url: server.uri(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn assert_alternates(log: &ConversationLog) {
        for (i, message) in log.messages.iter().enumerate() {
            let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
            assert_eq!(message.role, expected, "message {i} out of order");
        }
    }

    async fn drain(mut stream: FragmentStream<'_>) -> Result<Vec<String>> {
        let mut out = Vec::new();
        while let Some(fragment) = stream.next().await {
            out.push(fragment?);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn test_ask_appends_turn_and_rotates_token() {
        let server = backend().await;
        let mut session = session_for(&server);

        let answer = session.ask("hi").await.unwrap();
        assert_eq!(answer, "Hello, world");
        assert_eq!(
            session.log().messages,
            vec![Message::user("hi"), Message::assistant("Hello, world")]
        );
        assert_eq!(session.tokens().as_slice(), &["first".to_string(), "next".to_string()]);
    }

    #[tokio::test]
    async fn test_token_count_tracks_exchanges() {
        let server = backend().await;
        let mut session = session_for(&server);

        for k in 1..=4 {
            session.ask(&format!("q{k}")).await.unwrap();
            assert_eq!(session.tokens().len(), k + 1);
        }
        assert_eq!(session.log().len(), 8);
        assert_alternates(session.log());
    }

    #[tokio::test]
    async fn test_token_acquired_only_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).insert_header(TOKEN_HEADER, "first"))
            .expect(1)
            .mount(&server)
            .await;
        mount_chat(&server, REPLY).await;

        let mut session = session_for(&server);
        session.ask("a").await.unwrap();
        session.ask("b").await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_refreshed_token_is_tolerated() {
        let server = MockServer::start().await;
        mount_status(&server, "first").await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string(REPLY))
            .mount(&server)
            .await;

        let mut session = session_for(&server);
        session.ask("hi").await.unwrap();
        assert_eq!(session.tokens().current(), Some(""));
    }

    #[tokio::test]
    async fn test_failed_ask_keeps_user_message() {
        let server = MockServer::start().await;
        mount_status(&server, "first").await;
        mount_chat(
            &server,
            "data: {\"action\":\"error\",\"status\":429,\"type\":\"ERR_CONVERSATION_LIMIT\"}\n\ndata: [DONE]\n",
        )
        .await;

        let mut session = session_for(&server);
        let err = session.ask("hi").await.unwrap_err();
        assert!(matches!(err, Error::ConversationLimit(_)));
        assert_eq!(session.log().messages, vec![Message::user("hi")]);
        assert_eq!(session.tokens().len(), 1);
    }

    #[tokio::test]
    async fn test_status_rate_limit_propagates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(429).set_body_string(r#"{"type":"ERR_RATE"}"#))
            .mount(&server)
            .await;

        let mut session = session_for(&server);
        assert!(matches!(session.ask("hi").await, Err(Error::RateLimited(_))));
        assert!(session.log().is_empty());
    }

    #[tokio::test]
    async fn test_stream_concatenation_matches_buffered() {
        let server = backend().await;
        let mut buffered = session_for(&server);
        let answer = buffered.ask("X").await.unwrap();

        let mut streaming = session_for(&server);
        let fragments = drain(streaming.ask_stream("X").await.unwrap()).await.unwrap();
        assert_eq!(fragments, vec!["Hello", ", ", "world"]);
        assert_eq!(fragments.concat(), answer);
        assert_eq!(streaming.log(), buffered.log());
        assert_eq!(streaming.tokens().len(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_stream_records_no_reply() {
        let server = backend().await;
        let mut session = session_for(&server);

        {
            let mut stream = session.ask_stream("hi").await.unwrap();
            let first = stream.next().await.unwrap().unwrap();
            assert_eq!(first, "Hello");
        }

        assert_eq!(session.log().messages, vec![Message::user("hi")]);
        assert_eq!(session.tokens().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_http_rate_limit_fails_before_stream() {
        let server = MockServer::start().await;
        mount_status(&server, "first").await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(429).set_body_string("Too Many Requests"))
            .mount(&server)
            .await;

        let mut session = session_for(&server);
        assert!(matches!(
            session.ask_stream("hi").await,
            Err(Error::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_parse_error_records_no_reply() {
        let server = MockServer::start().await;
        mount_status(&server, "first").await;
        mount_chat(&server, "data: {\"message\":\"ok\"}\n\ndata: {broken\n").await;

        let mut session = session_for(&server);
        let result = drain(session.ask_stream("hi").await.unwrap()).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(session.log().len(), 1);
    }

    #[tokio::test]
    async fn test_reask_truncates_to_turn() {
        let server = backend().await;
        let mut session = session_for(&server);
        for k in 1..=5 {
            session.ask(&format!("q{k}")).await.unwrap();
        }
        // Leave turn 5 unanswered
        session.log.messages.pop();
        assert_eq!(session.log().len(), 9);

        let answer = session.reask(2).await.unwrap();
        assert_eq!(answer, "Hello, world");
        assert_eq!(session.log().len(), 4);
        assert_eq!(session.log().messages[2], Message::user("q2"));
        assert_eq!(session.tokens().len(), 3);
        assert_alternates(session.log());
    }

    #[tokio::test]
    async fn test_reask_clamps_turn_index() {
        let server = backend().await;
        let mut session = session_for(&server);
        session.ask("q1").await.unwrap();
        session.ask("q2").await.unwrap();

        session.reask(99).await.unwrap();
        assert_eq!(session.log().len(), 4);
        assert_eq!(session.log().messages[2], Message::user("q2"));
        assert_eq!(session.tokens().len(), 3);
    }

    #[tokio::test]
    async fn test_reask_zero_reacquires_and_keeps_opening_message() {
        let server = backend().await;
        let mut session = session_for(&server);
        session.ask("q1").await.unwrap();
        session.ask("q2").await.unwrap();

        session.reask(0).await.unwrap();
        assert_eq!(
            session.log().messages,
            vec![Message::user("q1"), Message::assistant("Hello, world")]
        );
        assert_eq!(session.tokens().as_slice(), &["first".to_string(), "next".to_string()]);
    }

    #[tokio::test]
    async fn test_reask_empty_history_returns_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut session = session_for(&server);
        assert_eq!(session.reask(1).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_reask_stream_empty_history_fails_without_network() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut session = session_for(&server);
        assert!(matches!(
            session.reask_stream(1).await,
            Err(Error::EmptyHistory)
        ));
    }

    #[tokio::test]
    async fn test_reask_stream_rewinds_and_appends() {
        let server = backend().await;
        let mut session = session_for(&server);
        session.ask("q1").await.unwrap();
        session.ask("q2").await.unwrap();
        session.ask("q3").await.unwrap();

        let fragments = drain(session.reask_stream(2).await.unwrap()).await.unwrap();
        assert_eq!(fragments.concat(), "Hello, world");
        assert_eq!(session.log().len(), 4);
        assert_eq!(session.tokens().len(), 3);
        assert_alternates(session.log());
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let server = backend().await;
        let dir = TempDir::new().unwrap();
        let mut session = session_for(&server).with_history(HistoryStore::new(dir.path()));
        session.ask("hi").await.unwrap();

        let id = session.save().unwrap();
        assert_eq!(session.save().unwrap(), id);
        let snapshot = session.log().clone();

        let mut other = session_for(&server).with_history(HistoryStore::new(dir.path()));
        other.set_model(ModelType::Llama);
        other.load(&id).unwrap();
        assert_eq!(other.log(), &snapshot);
        assert_eq!(other.model(), ModelType::Claude);
        assert_eq!(other.saved_id(), Some(id.as_str()));
        assert_eq!(other.list_saved().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_load_keeps_tokens_for_reask() {
        let server = backend().await;
        let dir = TempDir::new().unwrap();
        let mut session = session_for(&server).with_history(HistoryStore::new(dir.path()));
        for k in 1..=3 {
            session.ask(&format!("q{k}")).await.unwrap();
        }
        let id = session.save().unwrap();

        session.load(&id).unwrap();
        assert_eq!(session.tokens().len(), 4);

        session.reask(3).await.unwrap();
        assert_eq!(session.log().len(), 6);
        assert_eq!(session.log().messages[4], Message::user("q3"));
        assert_eq!(session.log().messages[2], Message::user("q2"));
        assert_eq!(session.tokens().len(), 4);
        assert_alternates(session.log());
    }

    #[tokio::test]
    async fn test_stream_missing_refreshed_token_is_tolerated() {
        let server = MockServer::start().await;
        mount_status(&server, "first").await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_string(REPLY))
            .mount(&server)
            .await;

        let mut session = session_for(&server);
        let fragments = drain(session.ask_stream("hi").await.unwrap()).await.unwrap();
        assert_eq!(fragments.concat(), "Hello, world");
        assert_eq!(session.tokens().current(), Some(""));
        assert_eq!(session.tokens().len(), 2);
        assert_eq!(session.log().last(), Some(&Message::assistant("Hello, world")));

        drain(session.reask_stream(1).await.unwrap()).await.unwrap();
        assert_eq!(session.tokens().as_slice(), &["first".to_string(), String::new()]);
        assert_eq!(session.log().len(), 2);
    }

    #[tokio::test]
    async fn test_load_unknown_id() {
        let server = backend().await;
        let dir = TempDir::new().unwrap();
        let mut session = session_for(&server).with_history(HistoryStore::new(dir.path()));
        let id = uuid::Uuid::new_v4().to_string();
        assert!(matches!(session.load(&id), Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_autosave_after_each_exchange() {
        let server = backend().await;
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::new(dir.path());
        let mut session = session_for(&server)
            .with_history(store.clone())
            .with_autosave(true);

        session.ask("one").await.unwrap();
        drain(session.ask_stream("two").await.unwrap()).await.unwrap();

        let id = session.saved_id().unwrap().to_string();
        assert_eq!(store.list_ids().unwrap(), vec![id.clone()]);
        assert_eq!(store.load(&id).unwrap().messages.len(), 4);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_requests() {
        let server = backend().await;
        let mut session = session_for(&server);
        session.ask("hi").await.unwrap();

        session.close();
        session.close();
        assert!(session.is_closed());
        assert!(session.tokens().is_empty());
        assert!(matches!(session.ask("again").await, Err(Error::Closed)));
        assert!(matches!(session.ask_stream("again").await, Err(Error::Closed)));
    }
}
