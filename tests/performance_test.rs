//! Performance tests for pagelight
//!
//! These tests verify that pagelight stays responsive on large pages:
//! - Scanning: Tens of thousands of leaves without stalling
//! - Painting: The highlight ceiling bounds marker work
//! - Chunking: Book-sized text splits quickly

mod test_helpers;

use pagelight::remote::{ChunkConfig, create_batches};
use pagelight::{DocumentTree, MatchEngine, Settings};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use test_helpers::*;

fn large_page(paragraphs: usize) -> pagelight::MemoryDocument {
    let texts: Vec<String> = (0..paragraphs)
        .map(|i| format!("Row {} of the ledger lists an invoice and a receipt for order {}.", i, i * 7))
        .collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    page(&refs)
}

// ==================== Scan Performance Tests ====================

#[tokio::test]
async fn test_literal_scan_performance() {
    let doc = large_page(20_000);
    let engine = MatchEngine::default();
    let cancel = CancellationToken::new();

    let start = Instant::now();
    let spans = engine
        .find_single_term(&doc, "invoice", false, &cancel, &mut |_| {})
        .await
        .unwrap();
    let duration = start.elapsed();

    assert_eq!(spans.len(), 20_000);

    // Should scan 20k leaves in under 2 seconds
    assert!(
        duration.as_millis() < 2000,
        "Scanning 20000 leaves took {}ms, expected < 2000ms",
        duration.as_millis()
    );

    println!("✓ Scanned 20000 leaves in {}ms", duration.as_millis());
}

#[tokio::test]
async fn test_multi_regex_scan_performance() {
    let doc = large_page(10_000);
    let engine = MatchEngine::default();
    let cancel = CancellationToken::new();
    let patterns = vec![r"order \d+".to_string(), r"\binvoice\b".to_string()];

    let start = Instant::now();
    let spans = engine
        .find_multi_regex(&doc, &patterns, false, &cancel, &mut |_| {})
        .await
        .unwrap();
    let duration = start.elapsed();

    // Regex modes stop at the default cap
    assert_eq!(spans.len(), 10_000);

    assert!(
        duration.as_millis() < 2000,
        "Multi-regex scan took {}ms, expected < 2000ms",
        duration.as_millis()
    );

    println!("✓ Multi-regex scan in {}ms", duration.as_millis());
}

// ==================== Painting Performance Tests ====================

#[tokio::test]
async fn test_highlight_ceiling_bounds_painting() {
    let mut doc = large_page(12_000);
    let before = doc.leaf_texts();
    let (remote, _) = ScriptedRemote::replying(&[]);
    let mut controller = controller(remote);

    let start = Instant::now();
    let summary = controller
        .search(&mut doc, "receipt", Settings::default())
        .await
        .unwrap();
    let duration = start.elapsed();

    assert_eq!(summary.total, 12_000);
    assert_eq!(doc.marker_count(), 10_000);

    assert!(
        duration.as_millis() < 5000,
        "Search and paint took {}ms, expected < 5000ms",
        duration.as_millis()
    );

    let start = Instant::now();
    controller.reset(&mut doc).await;
    let duration = start.elapsed();

    assert_eq!(doc.marker_count(), 0);
    assert_eq!(doc.leaf_texts(), before);
    println!("✓ Cleared 10000 markers in {}ms", duration.as_millis());
}

#[tokio::test]
async fn test_navigation_performance() {
    let mut doc = large_page(2_000);
    let (remote, _) = ScriptedRemote::replying(&[]);
    let mut controller = controller(remote);
    controller
        .search(&mut doc, "ledger", Settings::default())
        .await
        .unwrap();

    let start = Instant::now();
    for _ in 0..2_000 {
        controller.next(&mut doc);
    }
    let duration = start.elapsed();

    // Wrapped all the way around
    assert_eq!(controller.cursor().current(), Some(0));
    assert!(
        duration.as_millis() < 1000,
        "2000 navigation steps took {}ms, expected < 1000ms",
        duration.as_millis()
    );
    assert!(doc.contains(doc.root()));
}

// ==================== Chunking Performance Tests ====================

#[test]
fn test_chunking_large_text_performance() {
    let paragraph = "The committee reviewed the proposal and asked for revisions before the vote.\n\n";
    let text = paragraph.repeat(900_000 / paragraph.len());

    let start = Instant::now();
    let batches = create_batches(&text, &ChunkConfig::default());
    let duration = start.elapsed();

    assert!(batches.len() <= 8);
    assert!(
        duration.as_millis() < 200,
        "Chunking {} bytes took {}ms, expected < 200ms",
        text.len(),
        duration.as_millis()
    );

    println!(
        "✓ Split {} bytes into {} batches in {}ms",
        text.len(),
        batches.len(),
        duration.as_millis()
    );
}
