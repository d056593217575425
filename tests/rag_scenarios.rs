//! End-to-end pipeline scenarios against a deterministic embedder.

use std::sync::Arc;

use corpora::rag::{ContextConfig, PipelineConfig, RagMessage};
use corpora::testing::{ScriptedGenerator, StaticEmbedder};
use corpora::{
    Document, EmbeddingsIndex, Filter, OutputMode, RagOptions, RagPipeline, RagRequest,
    VectorStoreConfig,
};

fn embedder() -> Arc<StaticEmbedder> {
    Arc::new(StaticEmbedder::new(
        3,
        &[
            ("cats are mammals", [0.9, 0.1, 0.0]),
            ("dogs are mammals", [0.8, 0.2, 0.0]),
            ("rockets use fuel", [0.0, 0.1, 0.9]),
            ("pets", [1.0, 0.0, 0.0]),
            ("Cats and dogs are common pets.", [0.95, 0.05, 0.0]),
        ],
    ))
}

async fn pet_index() -> Arc<EmbeddingsIndex> {
    let index = Arc::new(
        EmbeddingsIndex::new(
            embedder(),
            VectorStoreConfig {
                dimension: 3,
                ..Default::default()
            },
        )
        .unwrap(),
    );
    index
        .index(vec![
            Document::new("cats are mammals")
                .with_id("1")
                .with_column("topic", "animals"),
            Document::new("dogs are mammals")
                .with_id("2")
                .with_column("topic", "animals"),
            Document::new("rockets use fuel")
                .with_id("3")
                .with_column("topic", "space"),
        ])
        .await
        .unwrap();
    index
}

fn pipeline(index: Arc<EmbeddingsIndex>, outputs: Vec<&str>) -> RagPipeline {
    RagPipeline::new(
        index,
        Arc::new(ScriptedGenerator::new(outputs)),
        ContextConfig::default(),
        PipelineConfig {
            retry_backoff_ms: 1,
            ..Default::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn question_to_cited_answer() {
    let index = pet_index().await;
    let pipeline = pipeline(
        Arc::clone(&index),
        vec!["Cats and dogs are common pets. ARTICLE ID: 1"],
    );

    let answer = pipeline
        .answer(
            "pets".into(),
            RagOptions {
                k: Some(2),
                output_mode: OutputMode::Full,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // The citation is inside the context window, and the context never
    // contains the unrelated passage.
    let context = answer.context.unwrap();
    let reference = answer.reference.unwrap();
    assert!(context.iter().any(|p| p.id == reference));
    assert!(context.iter().all(|p| p.id != "3"));
}

#[tokio::test]
async fn structured_request_carries_conversation_turns() {
    let index = pet_index().await;
    let generator = Arc::new(ScriptedGenerator::new(vec!["Yes. ARTICLE ID: 2"]));
    let pipeline = RagPipeline::new(
        Arc::clone(&index),
        Arc::clone(&generator) as Arc<dyn corpora::TextGenerator>,
        ContextConfig::default(),
        PipelineConfig::default(),
    )
    .unwrap();

    let request = RagRequest::Messages(vec![
        RagMessage::new("assistant", "Earlier I said cats purr."),
        RagMessage::new("user", "So are dogs also mammals?").with_query("pets"),
    ]);

    let answer = pipeline
        .answer(
            request,
            RagOptions {
                output_mode: OutputMode::Reference,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(answer.reference.as_deref(), Some("2"));

    let requests = generator.requests();
    assert_eq!(requests.len(), 1);
    let contents: Vec<&str> = requests[0]
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert!(contents.iter().any(|c| c.contains("cats purr")));
    assert!(contents.last().unwrap().contains("ARTICLE ID: 1"));
}

#[tokio::test]
async fn filtered_search_and_delete_round() {
    let index = pet_index().await;

    let space_only = Filter::eq("topic", "space");
    let results = index.search("pets", 3, Some(&space_only)).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "3");

    index.delete(&["2".to_string()]).await.unwrap();
    assert_eq!(index.count().await, 2);

    let results = index.search("pets", 2, None).await.unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["1"]);
}

#[tokio::test]
async fn snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pets.db");

    {
        let index = pet_index().await;
        index.save(&path).await.unwrap();
    }

    let restored = EmbeddingsIndex::restore(embedder(), &path).await.unwrap();
    assert_eq!(restored.count().await, 3);

    let results = restored.search("pets", 2, None).await.unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);

    let row = restored.row("3").await.unwrap();
    assert_eq!(row.text, "rockets use fuel");
    assert_eq!(row.columns["topic"], "space");
}

#[tokio::test]
async fn context_is_deterministic_for_a_fixed_index() {
    let index = pet_index().await;
    let builder = corpora::rag::ContextBuilder::new(ContextConfig::default());

    let first = builder.build(&index, "pets", 3, 1000).await.unwrap();
    let second = builder.build(&index, "pets", 3, 1000).await.unwrap();

    let render = |passages: &[corpora::rag::Passage]| {
        passages
            .iter()
            .map(|p| format!("{}\t{}\t{}", p.id, p.text, p.score))
            .collect::<Vec<_>>()
            .join("\n")
    };
    assert_eq!(render(&first), render(&second));
}

#[tokio::test]
async fn empty_index_reference_request_returns_no_reference() {
    let index = Arc::new(
        EmbeddingsIndex::new(
            embedder(),
            VectorStoreConfig {
                dimension: 3,
                ..Default::default()
            },
        )
        .unwrap(),
    );
    let pipeline = pipeline(index, vec!["unused"]);

    let answer = pipeline
        .answer(
            "pets".into(),
            RagOptions {
                output_mode: OutputMode::Reference,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert!(answer.text.contains("enough information"));
    assert!(answer.reference.is_none());
}
