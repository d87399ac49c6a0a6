use super::*;
use mercari_watcher::cycle::CycleStage;

fn ids(runner: &QueryCycleRunner, query: &Query) -> Vec<String> {
    runner
        .store()
        .index()
        .get(query.as_str())
        .map(|bucket| bucket.keys().cloned().collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_rate_outage_shows_yen_and_missing_euro() -> anyhow::Result<()> {
    let env = TestEnv::new().without_rate();
    env.browser
        .serve("figurine", FakePage::results(&[card("m1001", "Item A", "3,500")]));
    let query = Query::new("figurine");

    let mut runner = env.runner();
    let report = runner.run_query(&query).await?;

    assert_eq!(report.notified, 1);
    let alerts = env.outbox.alerts();
    assert!(alerts[0].contains("💰 ¥3,500 / €N/A"));

    let record = runner.store().get(&query, "m1001").unwrap();
    assert_eq!(record.price_jpy, Some(3500));
    assert_eq!(record.price_eur, None);
    Ok(())
}

#[tokio::test]
async fn test_euro_price_is_converted() -> anyhow::Result<()> {
    let env = TestEnv::new();
    env.browser
        .serve("figurine", FakePage::results(&[card("m1001", "Item A", "15,000")]));
    let query = Query::new("figurine");

    let mut runner = env.runner();
    runner.run_query(&query).await?;

    assert!(env.outbox.alerts()[0].contains("💰 ¥15,000 / €91.50"));
    assert_eq!(
        runner.store().get(&query, "m1001").unwrap().price_eur,
        Some(Decimal::new(9150, 2))
    );
    Ok(())
}

#[tokio::test]
async fn test_sort_failure_sends_no_alerts_and_keeps_store() {
    let env = TestEnv::new().verbose();
    let page = FakePage::results(&[card("m1", "Item A", "1,000"), card("m2", "Item B", "2,000")]).unsortable();
    env.browser.serve("figurine", page);
    let query = Query::new("figurine");

    let mut runner = env.runner();
    let err = runner.run_query(&query).await.unwrap_err();

    assert_eq!(err.stage, CycleStage::Sorting);
    assert!(matches!(err.source, AppError::Sort(_)));
    assert!(env.outbox.alerts().is_empty());
    assert_eq!(runner.store().len(&query), 0);
    assert!(!env.store_path().exists());

    // Diagnostic capture on disk and forwarded as a photo.
    assert_eq!(count_files(&env.error_screenshot_dir()), 1);
    assert_eq!(count_files(&env.page_log_dir()), 1);
    let captions = env.outbox.photo_captions();
    assert_eq!(captions.len(), 1);
    assert!(captions[0].contains("Could not sort results by newest for 'figurine'"));
}

#[tokio::test]
async fn test_sort_failure_diagnostics_stay_local_when_not_verbose() {
    let env = TestEnv::new();
    env.browser
        .serve("figurine", FakePage::results(&[card("m1", "Item A", "1,000")]).unsortable());

    let mut runner = env.runner();
    assert!(runner.run_query(&Query::new("figurine")).await.is_err());

    assert!(env.outbox.sent().is_empty());
    assert_eq!(count_files(&env.error_screenshot_dir()), 1);
}

#[tokio::test]
async fn test_no_results_page_is_not_a_failure() -> anyhow::Result<()> {
    let env = TestEnv::new();
    env.browser.serve("絶対にない商品", FakePage::no_results());
    let query = Query::new("絶対にない商品");

    let mut runner = env.runner();
    let report = runner.run_query(&query).await?;

    assert_eq!(report.extracted, 0);
    assert_eq!(report.new_items, 0);
    assert!(env.outbox.sent().is_empty());
    assert_eq!(env.browser.screenshots(), 0);
    // The (empty) bucket is still persisted.
    assert!(env.store_path().exists());
    Ok(())
}

#[tokio::test]
async fn test_block_page_fails_at_fetching() {
    let env = TestEnv::new();
    env.browser.serve("figurine", FakePage::blocked());

    let mut runner = env.runner();
    let err = runner.run_query(&Query::new("figurine")).await.unwrap_err();

    assert_eq!(err.stage, CycleStage::Fetching);
    assert!(matches!(err.source, AppError::Blocked { .. }));
    assert_eq!(env.browser.screenshots(), 1);
}

#[tokio::test]
async fn test_captcha_fails_while_waiting_for_content() {
    let env = TestEnv::new();
    env.browser.serve("figurine", FakePage::captcha());

    let mut runner = env.runner();
    let err = runner.run_query(&Query::new("figurine")).await.unwrap_err();

    assert_eq!(err.stage, CycleStage::WaitingForContent);
    assert!(matches!(err.source, AppError::Blocked { .. }));
}

#[tokio::test]
async fn test_missing_results_grid_times_out_with_capture() {
    let env = TestEnv::new().verbose();
    env.browser.serve("figurine", FakePage::stuck());

    let mut runner = env.runner();
    let err = runner.run_query(&Query::new("figurine")).await.unwrap_err();

    assert_eq!(err.stage, CycleStage::WaitingForContent);
    assert!(matches!(err.source, AppError::ContentTimeout { .. }));
    assert_eq!(count_files(&env.error_screenshot_dir()), 1);
    assert_eq!(env.outbox.photo_captions().len(), 1);
}

#[tokio::test]
async fn test_navigation_failure_is_reported_without_capture() {
    let env = TestEnv::new().verbose();

    let mut runner = env.runner();
    let err = runner.run_query(&Query::new("unserved")).await.unwrap_err();

    assert_eq!(err.stage, CycleStage::Fetching);
    assert!(matches!(err.source, AppError::Fetch { .. }));
    assert_eq!(env.browser.screenshots(), 0);

    let sent = env.outbox.sent();
    assert_eq!(sent.len(), 1);
    assert!(matches!(&sent[0], Sent::Text(t) if t.contains("failed while loading the search page")));
}

#[tokio::test]
async fn test_failed_send_does_not_block_later_items() -> anyhow::Result<()> {
    let env = TestEnv::new();
    env.outbox.reject_containing("Item B");
    env.browser.serve(
        "figurine",
        FakePage::results(&[
            card("m1", "Item A", "1,000"),
            card("m2", "Item B", "2,000"),
            card("m3", "Item C", "3,000"),
        ]),
    );
    let query = Query::new("figurine");

    let mut runner = env.runner();
    let report = runner.run_query(&query).await?;

    assert_eq!(report.new_items, 3);
    assert_eq!(report.notified, 2);
    assert_eq!(report.failed_notifications, 1);
    let alerts = env.outbox.alerts();
    assert!(alerts[0].contains("Item A"));
    assert!(alerts[1].contains("Item C"));
    // Persisted even though its alert was lost.
    assert_eq!(ids(&runner, &query), vec!["m1", "m2", "m3"]);
    Ok(())
}

#[tokio::test]
async fn test_oldest_first_reverses_alert_order() -> anyhow::Result<()> {
    let env = TestEnv::new().oldest_first();
    env.browser.serve(
        "figurine",
        FakePage::results(&[
            card("m1", "Item A", "1,000"),
            card("m2", "Item B", "2,000"),
            card("m3", "Item C", "3,000"),
        ]),
    );

    let mut runner = env.runner();
    runner.run_query(&Query::new("figurine")).await?;

    let alerts = env.outbox.alerts();
    assert!(alerts[0].contains("Item C"));
    assert!(alerts[1].contains("Item B"));
    assert!(alerts[2].contains("Item A"));
    Ok(())
}

#[tokio::test]
async fn test_cards_without_id_are_counted_and_reported() -> anyhow::Result<()> {
    let env = TestEnv::new().verbose();
    let orphan = r#"<li data-testid="item-cell"><span data-testid="thumbnail-item-name">広告</span></li>"#;
    env.browser.serve(
        "figurine",
        FakePage::results(&[card("m1", "Item A", "1,000"), orphan.to_string()]),
    );

    let mut runner = env.runner();
    let report = runner.run_query(&Query::new("figurine")).await?;

    assert_eq!(report.extracted, 1);
    assert_eq!(report.discarded, 1);
    assert!(env
        .outbox
        .sent()
        .iter()
        .any(|s| matches!(s, Sent::Text(t) if t.contains("1 of 2 result cards had no item id"))));
    Ok(())
}

#[tokio::test]
async fn test_card_photo_follows_each_delivered_alert() -> anyhow::Result<()> {
    let env = TestEnv::new().with_item_screenshots();
    env.browser.allow_card_screenshots();
    env.browser.serve(
        "figurine",
        FakePage::results(&[card("m1", "Item A", "1,000"), card("m2", "Item B", "2,000")]),
    );

    let mut runner = env.runner();
    runner.run_query(&Query::new("figurine")).await?;

    let sent = env.outbox.sent();
    assert_eq!(sent.len(), 4);
    assert!(matches!(&sent[0], Sent::Text(t) if t.contains("Item A")));
    assert!(matches!(&sent[1], Sent::Photo { caption, bytes } if caption.is_empty() && *bytes > 0));
    assert!(matches!(&sent[2], Sent::Text(t) if t.contains("Item B")));
    assert!(matches!(&sent[3], Sent::Photo { .. }));
    Ok(())
}

#[tokio::test]
async fn test_image_url_sent_when_card_capture_fails() -> anyhow::Result<()> {
    let env = TestEnv::new().with_item_screenshots();
    env.browser
        .serve("figurine", FakePage::results(&[card("m1", "Item A", "1,000")]));

    let mut runner = env.runner();
    let report = runner.run_query(&Query::new("figurine")).await?;

    assert_eq!(report.notified, 1);
    let sent = env.outbox.sent();
    assert_eq!(sent.len(), 2);
    assert!(matches!(&sent[0], Sent::Text(t) if t.starts_with(ALERT_HEADER)));
    assert_eq!(
        sent[1],
        Sent::Text("Image URL: https://static.mercdn.net/thumb/item/webp/m1_1.jpg".to_string())
    );
    assert!(env.outbox.photo_captions().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_no_picture_for_undelivered_alert() -> anyhow::Result<()> {
    let env = TestEnv::new().with_item_screenshots();
    env.browser.allow_card_screenshots();
    env.outbox.reject_containing("Item B");
    env.browser.serve(
        "figurine",
        FakePage::results(&[
            card("m1", "Item A", "1,000"),
            card("m2", "Item B", "2,000"),
            card("m3", "Item C", "3,000"),
        ]),
    );

    let mut runner = env.runner();
    let report = runner.run_query(&Query::new("figurine")).await?;

    assert_eq!(report.failed_notifications, 1);
    let sent = env.outbox.sent();
    assert_eq!(sent.len(), 4);
    assert!(matches!(&sent[0], Sent::Text(t) if t.contains("Item A")));
    assert!(matches!(&sent[1], Sent::Photo { .. }));
    assert!(matches!(&sent[2], Sent::Text(t) if t.contains("Item C")));
    assert!(matches!(&sent[3], Sent::Photo { .. }));
    Ok(())
}

#[tokio::test]
async fn test_verbose_mode_forwards_results_snapshot() -> anyhow::Result<()> {
    let env = TestEnv::new().verbose();
    env.browser.serve(
        "figurine",
        FakePage::results(&[card("m1", "Item A", "1,000"), card("m2", "Item B", "2,000")]),
    );

    let mut runner = env.runner();
    runner.run_query(&Query::new("figurine")).await?;

    let captions = env.outbox.photo_captions();
    assert_eq!(captions, vec!["🔎 Search complete for 'figurine'. Found 2 valid items."]);
    assert_eq!(count_files(&env.dir.path().join("screenshots").join("search_results")), 1);
    assert_eq!(env.outbox.alerts().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_results_snapshot_skipped_when_not_verbose() -> anyhow::Result<()> {
    let env = TestEnv::new();
    env.browser
        .serve("figurine", FakePage::results(&[card("m1", "Item A", "1,000")]));

    let mut runner = env.runner();
    runner.run_query(&Query::new("figurine")).await?;

    assert_eq!(env.browser.screenshots(), 0);
    assert!(env.outbox.photo_captions().is_empty());
    Ok(())
}
