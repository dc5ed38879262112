mod common;

use common::{TestResult, articles, collection, embedder, manager, memory_store};
use litvec::{
    BatchIngestor,
    Document,
    Error,
    ErrorKind,
    Metadata,
    ScoreKwargs,
    SearchPolicy,
    SearchType,
    SimilarityRetriever,
    collection::research_collection_name,
};

#[test]
fn research_scenario() -> TestResult {
    let store = memory_store()?;
    let embedder = embedder();
    let manager = manager(&store, &embedder);

    let mut metadata = Metadata::new();
    metadata.insert("owner".into(), "alice".into());
    let handle = manager.ensure(&research_collection_name("42"), metadata)?;
    assert_eq!(handle.name(), "research_42");
    assert_eq!(handle.metadata()["owner"], "alice");

    let docs = vec![
        Document::article("first", "t1", "a1"),
        Document::article("second", "t2", "a2"),
    ];
    let report =
        BatchIngestor::new(&store, &embedder).add(&handle, &docs, None)?;
    assert_eq!(report.ids.len(), 2);
    assert_ne!(report.ids[0], report.ids[1]);

    let policy = SearchPolicy::new(
        SearchType::Similarity,
        ScoreKwargs {
            k: Some(1),
            ..ScoreKwargs::default()
        },
    )?;
    let retriever =
        SimilarityRetriever::new(&store, &embedder, handle, policy)?;
    let results = retriever.search("a1")?;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, report.ids[0]);
    assert_eq!(results[0].metadata["id"], "first");
    Ok(())
}

#[test]
fn stored_document_is_its_own_best_match() -> TestResult {
    let store = memory_store()?;
    let embedder = embedder();
    let manager = manager(&store, &embedder);
    let handle = collection(&manager, "research_1")?;

    let docs = articles(10);
    let report =
        BatchIngestor::new(&store, &embedder).add(&handle, &docs, None)?;

    let retriever = SimilarityRetriever::new(
        &store,
        &embedder,
        handle,
        SearchPolicy::default(),
    )?;
    let results = retriever.search(&docs[3].content)?;

    assert_eq!(results[0].id, report.ids[3]);
    assert!(results[0].score >= 0.99, "score {}", results[0].score);
    assert_eq!(results[0].content, docs[3].content);
    Ok(())
}

#[test]
fn results_are_ordered_and_bounded() -> TestResult {
    let store = memory_store()?;
    let embedder = embedder();
    let manager = manager(&store, &embedder);
    let handle = collection(&manager, "research_2")?;
    BatchIngestor::new(&store, &embedder).add(&handle, &articles(12), None)?;

    let policy = SearchPolicy::new(
        SearchType::Similarity,
        ScoreKwargs {
            k: Some(5),
            ..ScoreKwargs::default()
        },
    )?;
    let retriever =
        SimilarityRetriever::new(&store, &embedder, handle, policy)?;
    let results = retriever.search("study findings")?;

    assert_eq!(results.len(), 5);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    Ok(())
}

#[test]
fn deleted_records_never_come_back() -> TestResult {
    let store = memory_store()?;
    let embedder = embedder();
    let manager = manager(&store, &embedder);
    let handle = collection(&manager, "research_3")?;

    let docs = articles(3);
    let report =
        BatchIngestor::new(&store, &embedder).add(&handle, &docs, None)?;
    let victim = report.ids[1].clone();

    assert_eq!(manager.delete_by_ids(&handle, &[victim.clone()])?, 1);

    let retriever = SimilarityRetriever::new(
        &store,
        &embedder,
        handle.clone(),
        SearchPolicy::new(
            SearchType::Similarity,
            ScoreKwargs {
                k: Some(10),
                ..ScoreKwargs::default()
            },
        )?,
    )?;
    let results = retriever.search(&docs[1].content)?;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.id != victim));

    let err = manager.delete_by_ids(&handle, &[victim]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[test]
fn partial_delete_removes_nothing() -> TestResult {
    let store = memory_store()?;
    let embedder = embedder();
    let manager = manager(&store, &embedder);
    let handle = collection(&manager, "research_4")?;
    let report = BatchIngestor::new(&store, &embedder)
        .add(&handle, &articles(2), None)?;

    let ids = vec![report.ids[0].clone(), "missing".to_string()];
    match manager.delete_by_ids(&handle, &ids) {
        Err(Error::NotFound { kind, name }) => {
            assert_eq!(kind, "record");
            assert_eq!(name, "missing");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
    assert_eq!(manager.count(&handle)?, 2);
    Ok(())
}

#[test]
fn batches_of_one_hundred() -> TestResult {
    let store = memory_store()?;
    let embedder = embedder();
    let manager = manager(&store, &embedder);
    let handle = collection(&manager, "research_5")?;

    let docs = articles(250);
    let ids: Vec<String> = (0..250).map(|i| format!("doc-{i:03}")).collect();

    let before = store.round_trips();
    let report = BatchIngestor::new(&store, &embedder)
        .add(&handle, &docs, Some(ids.clone()))?;
    assert_eq!(store.round_trips() - before, 3);

    assert_eq!(report.batch_sizes, vec![100, 100, 50]);
    assert!(report.is_complete());
    assert_eq!(report.stored(), 250);

    let stored = manager.documents(&handle)?;
    assert_eq!(stored.len(), 250);
    let stored_ids: Vec<String> = stored.into_iter().map(|r| r.id).collect();
    assert_eq!(stored_ids, ids);
    Ok(())
}

#[test]
fn unattainable_threshold_returns_nothing() -> TestResult {
    let store = memory_store()?;
    let embedder = embedder();
    let manager = manager(&store, &embedder);
    let handle = collection(&manager, "research_6")?;
    let docs = articles(4);
    BatchIngestor::new(&store, &embedder).add(&handle, &docs, None)?;

    let policy = SearchPolicy::new(
        SearchType::SimilarityScoreThreshold,
        ScoreKwargs {
            score_threshold: Some(1.1),
            ..ScoreKwargs::default()
        },
    )?;
    let retriever =
        SimilarityRetriever::new(&store, &embedder, handle, policy)?;
    assert!(retriever.search(&docs[0].content)?.is_empty());
    Ok(())
}

#[test]
fn update_swaps_policy_and_keeps_old_on_error() -> TestResult {
    let store = memory_store()?;
    let embedder = embedder();
    let manager = manager(&store, &embedder);
    let handle = collection(&manager, "research_7")?;
    let docs = articles(6);
    BatchIngestor::new(&store, &embedder).add(&handle, &docs, None)?;

    let mut retriever = SimilarityRetriever::new(
        &store,
        &embedder,
        handle,
        SearchPolicy::default(),
    )?;
    assert_eq!(retriever.search(&docs[0].content)?.len(), 4);

    retriever.update(
        Some(SearchType::Mmr),
        Some(ScoreKwargs {
            k: Some(2),
            fetch_k: Some(6),
            lambda_mult: Some(0.3),
            ..ScoreKwargs::default()
        }),
    )?;
    assert_eq!(retriever.policy().search_type, SearchType::Mmr);
    assert_eq!(retriever.search(&docs[0].content)?.len(), 2);

    let err = retriever
        .update(Some(SearchType::SimilarityScoreThreshold), None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(retriever.policy().search_type, SearchType::Mmr);
    assert_eq!(retriever.policy().k, 2);
    Ok(())
}

#[test]
fn update_of_search_type_alone_keeps_kwargs() -> TestResult {
    let store = memory_store()?;
    let embedder = embedder();
    let manager = manager(&store, &embedder);
    let handle = collection(&manager, "research_9")?;
    let docs = articles(8);
    BatchIngestor::new(&store, &embedder).add(&handle, &docs, None)?;

    let policy = SearchPolicy::new(
        SearchType::SimilarityScoreThreshold,
        ScoreKwargs {
            k: Some(3),
            score_threshold: Some(-1.0),
            ..ScoreKwargs::default()
        },
    )?;
    let mut retriever =
        SimilarityRetriever::new(&store, &embedder, handle, policy)?;
    assert_eq!(retriever.search(&docs[0].content)?.len(), 3);

    retriever.update(Some(SearchType::Mmr), None)?;
    assert_eq!(retriever.policy().search_type, SearchType::Mmr);
    assert_eq!(retriever.policy().k, 3);
    assert_eq!(retriever.policy().score_threshold, Some(-1.0));

    let results = retriever.search(&docs[0].content)?;
    assert_eq!(results.len(), 3);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    Ok(())
}

#[test]
fn empty_and_dropped_collections() -> TestResult {
    let store = memory_store()?;
    let embedder = embedder();
    let manager = manager(&store, &embedder);
    let handle = collection(&manager, "research_8")?;

    let retriever = SimilarityRetriever::new(
        &store,
        &embedder,
        handle.clone(),
        SearchPolicy::default(),
    )?;
    assert!(retriever.search("anything")?.is_empty());

    manager.drop_collection(&handle)?;
    let err = retriever.search("anything").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[test]
fn drop_removes_every_record() -> TestResult {
    let store = memory_store()?;
    let embedder = embedder();
    let manager = manager(&store, &embedder);
    let doomed = collection(&manager, "research_9")?;
    let kept = collection(&manager, "research_10")?;
    let ingestor = BatchIngestor::new(&store, &embedder);
    ingestor.add(&doomed, &articles(5), None)?;
    ingestor.add(&kept, &articles(3), None)?;

    assert_eq!(manager.drop_collection(&doomed)?, 5);

    let recreated = collection(&manager, "research_9")?;
    assert!(recreated.was_created());
    assert_eq!(manager.count(&recreated)?, 0);
    assert_eq!(manager.count(&kept)?, 3);
    Ok(())
}

#[test]
fn file_store_survives_reopen() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let url = format!("redb://{}", tmp.path().join("vectors.redb").display());
    let embedder = embedder();
    let schema = litvec::Schema::new("test")?;

    let ids = {
        let store = litvec::Store::open(&url, litvec::store::DEFAULT_TIMEOUT)?;
        let manager =
            litvec::CollectionManager::new(&store, schema.clone(), &embedder);
        manager.ensure_schema(false)?;
        let handle = manager.ensure("research_11", Metadata::new())?;
        BatchIngestor::new(&store, &embedder)
            .add(&handle, &articles(3), None)?
            .ids
    };

    let store = litvec::Store::open(&url, litvec::store::DEFAULT_TIMEOUT)?;
    let manager = litvec::CollectionManager::new(&store, schema, &embedder);
    let handle = manager.ensure("research_11", Metadata::new())?;
    assert!(!handle.was_created());
    assert_eq!(handle.collection().dimension, Some(1024));

    let stored = manager.get_by_ids(&handle, &ids)?;
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[2].metadata["id"], "article-2");
    Ok(())
}
