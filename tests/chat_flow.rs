use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use cricket_chat::db::Database;
use cricket_chat::embedding::Embedder;
use cricket_chat::llm::{LlmError, TextGenerator};
use cricket_chat::query_gate::{DomainConfig, DomainGate};
use cricket_chat::rag::{ChatService, RagSettings};
use cricket_chat::rate_limit::{PersistentRateLimiter, RateLimitPolicy};
use cricket_chat::Error;

/// Classifier prompts get `verdict`; answer prompts get `answer` or an error.
struct ScriptedModel {
    verdict: &'static str,
    answer: Option<&'static str>,
    classifier_calls: AtomicUsize,
    answer_calls: AtomicUsize,
}

impl ScriptedModel {
    fn new(verdict: &'static str, answer: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            answer,
            classifier_calls: AtomicUsize::new(0),
            answer_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TextGenerator for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        if prompt.contains("You are a classifier") {
            self.classifier_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(self.verdict.to_string());
        }
        self.answer_calls.fetch_add(1, Ordering::SeqCst);
        match self.answer {
            Some(answer) => Ok(answer.to_string()),
            None => Err(LlmError::Api {
                status: 500,
                message: "model overloaded".to_string(),
            }),
        }
    }
}

struct CountingEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![1.0, 0.0, 0.0])
    }
}

struct Harness {
    db: Arc<Database>,
    model: Arc<ScriptedModel>,
    embedder: Arc<CountingEmbedder>,
    chat: ChatService,
    user_id: String,
}

fn harness(model: Arc<ScriptedModel>, limit: u32) -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let user = db.create_user("fan@example.com", "hash").unwrap();
    let embedder = Arc::new(CountingEmbedder {
        calls: AtomicUsize::new(0),
    });
    let policy = RateLimitPolicy {
        limit,
        window: Duration::from_secs(3600),
    };
    let chat = ChatService::new(
        Arc::new(PersistentRateLimiter::new(db.clone(), policy)),
        db.clone(),
        db.clone(),
        model.clone(),
        embedder.clone(),
        DomainGate::new(DomainConfig::cricket(), Duration::from_secs(5)),
        RagSettings::default(),
    );
    Harness {
        db,
        model,
        embedder,
        chat,
        user_id: user.id,
    }
}

#[tokio::test]
async fn test_googly_without_documents() {
    let h = harness(
        ScriptedModel::new("YES", Some("A googly is a leg spinner's delivery that turns the other way.")),
        20,
    );

    let reply = h
        .chat
        .respond(&h.user_id, "What is a googly?", None)
        .await
        .unwrap();

    assert_eq!(
        reply.response,
        "A googly is a leg spinner's delivery that turns the other way."
    );
    assert!(uuid::Uuid::parse_str(&reply.conversation_id).is_ok());
    // No keyword matches "googly", so the classifier decided.
    assert_eq!(h.model.classifier_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);

    let history = h.db.get_exchanges(&h.user_id, &reply.conversation_id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message, "What is a googly?");
    assert_eq!(history[0].context, "");
    assert_eq!(history[0].timestamp, reply.timestamp);
}

#[tokio::test]
async fn test_twenty_first_request_is_rate_limited() {
    let h = harness(ScriptedModel::new("YES", Some("Answer.")), 20);

    for _ in 0..20 {
        h.chat
            .respond(&h.user_id, "Who won the 2011 World Cup?", None)
            .await
            .unwrap();
    }
    assert_eq!(h.model.answer_calls.load(Ordering::SeqCst), 20);

    let err = h
        .chat
        .respond(&h.user_id, "Who won the 2011 World Cup?", None)
        .await
        .unwrap_err();
    match err {
        Error::RateLimited { reset_at } => assert!(reset_at > Utc::now()),
        other => panic!("expected RateLimited, got {other:?}"),
    }
    assert_eq!(h.model.answer_calls.load(Ordering::SeqCst), 20);

    let user = h.db.get_user(&h.user_id).unwrap().unwrap();
    assert_eq!(user.rate_limit_count, 20);
}

#[tokio::test]
async fn test_weather_question_without_documents_is_out_of_domain() {
    let h = harness(ScriptedModel::new("NO", Some("Sunny, 25C.")), 20);
    assert!(h.db.list_documents().unwrap().is_empty());

    let err = h
        .chat
        .respond(&h.user_id, "What's the weather today?", None)
        .await
        .unwrap_err();
    match err {
        Error::OutOfDomain(message) => {
            assert_eq!(message, DomainConfig::cricket().rejection_message)
        }
        other => panic!("expected OutOfDomain, got {other:?}"),
    }
    assert_eq!(h.model.classifier_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.model.answer_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_weather_question_with_documents_is_out_of_domain() {
    let h = harness(ScriptedModel::new("NO", Some("Sunny.")), 20);
    h.db.insert_document(
        "Cricket is played between two teams of eleven players.",
        Some(&[1.0, 0.0, 0.0][..]),
        None,
    )
    .unwrap();

    let err = h
        .chat
        .respond(&h.user_id, "What's the weather today?", None)
        .await
        .unwrap_err();
    match err {
        Error::OutOfDomain(message) => {
            assert_eq!(message, DomainConfig::cricket().rejection_message)
        }
        other => panic!("expected OutOfDomain, got {other:?}"),
    }
    assert_eq!(h.model.classifier_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.model.answer_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_in_domain_question_uses_documents() {
    let h = harness(ScriptedModel::new("NO", Some("Eleven.")), 20);
    h.db.insert_document(
        "Cricket is played between two teams of eleven players.",
        Some(&[1.0, 0.0, 0.0][..]),
        Some("rules.md"),
    )
    .unwrap();
    h.db.insert_document("Unrelated note.", Some(&[0.0, 1.0, 0.0][..]), None)
        .unwrap();

    let reply = h
        .chat
        .respond(&h.user_id, "How many players in a cricket team?", None)
        .await
        .unwrap();
    assert_eq!(reply.response, "Eleven.");
    // Keyword hit, so the classifier never ran.
    assert_eq!(h.model.classifier_calls.load(Ordering::SeqCst), 0);

    let history = h.db.get_exchanges(&h.user_id, &reply.conversation_id).unwrap();
    assert_eq!(
        history[0].context,
        "Cricket is played between two teams of eleven players."
    );
}

#[tokio::test]
async fn test_generation_failure_returns_fallback() {
    let h = harness(ScriptedModel::new("YES", None), 20);

    let reply = h
        .chat
        .respond(&h.user_id, "Who has the most Test centuries?", Some("chat-1".to_string()))
        .await
        .unwrap();
    assert_eq!(reply.response, DomainConfig::cricket().fallback_response);
    assert_eq!(reply.conversation_id, "chat-1");

    let history = h.db.get_exchanges(&h.user_id, "chat-1").unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].response, reply.response);
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let h = harness(ScriptedModel::new("YES", Some("Answer.")), 20);
    let err = h
        .chat
        .respond("no-such-user", "Who is the captain?", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(h.model.answer_calls.load(Ordering::SeqCst), 0);
}
