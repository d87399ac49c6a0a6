use super::*;

#[tokio::test]
async fn test_failing_query_does_not_stop_the_round() {
    let env = TestEnv::new();
    env.browser
        .serve("first", FakePage::results(&[card("m1", "First item", "1,000")]));
    env.browser
        .serve("third", FakePage::results(&[card("m3", "Third item", "3,000")]));

    let mut scheduler = env.scheduler(&["first", "offline", "third"], 0, 0);
    let summary = scheduler.run_round(1).await;

    assert_eq!(summary.queries, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.new_items, 2);
    assert_eq!(env.browser.visited(), vec!["first", "offline", "third"]);
    assert_eq!(env.outbox.alerts().len(), 2);

    let stats = scheduler.stats();
    assert_eq!(stats.queries_failed, 1);
    assert!(stats.last_error.as_deref().unwrap().contains("offline"));
}

#[tokio::test]
async fn test_panicking_query_is_contained() {
    let env = TestEnv::new();
    env.browser.serve("crash", FakePage::panicking());
    env.browser
        .serve("after", FakePage::results(&[card("m9", "Survivor", "900")]));

    let mut scheduler = env.scheduler(&["crash", "after"], 0, 0);
    let summary = scheduler.run_round(1).await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(scheduler.stats().panics, 1);
    assert!(scheduler
        .stats()
        .last_error
        .as_deref()
        .unwrap()
        .contains("renderer crashed on 'crash'"));
    assert_eq!(env.outbox.alerts().len(), 1);
}

#[tokio::test]
async fn test_second_round_reports_only_new_listings() {
    let env = TestEnv::new();
    env.browser.serve(
        "figurine",
        FakePage::results(&[card("m1", "Item A", "1,000"), card("m2", "Item B", "2,000")]),
    );

    let mut scheduler = env.scheduler(&["figurine"], 0, 0);
    scheduler.run(Some(2)).await;

    let stats = scheduler.stats();
    assert_eq!(stats.rounds_completed, 2);
    assert_eq!(stats.queries_succeeded, 2);
    assert_eq!(stats.new_items_found, 2);
    assert_eq!(stats.notifications_sent, 2);
    assert_eq!(env.outbox.alerts().len(), 2);
    assert_eq!(env.browser.visited().len(), 2);
}

#[tokio::test]
async fn test_rate_is_fetched_once_per_ttl_across_rounds() {
    let env = TestEnv::new();
    env.browser
        .serve("figurine", FakePage::results(&[card("m1", "Item A", "1,000")]));

    let mut scheduler = env.scheduler(&["figurine"], 0, 0);
    scheduler.run(Some(3)).await;

    assert_eq!(env.rate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_fixed_gap_between_queries() {
    let env = TestEnv::new();
    for (i, keyword) in ["first", "second", "third"].into_iter().enumerate() {
        env.browser
            .serve(keyword, FakePage::results(&[card(&format!("m{}", i + 1), keyword, "1,000")]));
    }

    let mut scheduler = env.scheduler_with_gap(&["first", "second", "third"], 0, 0, 1500);
    let started = tokio::time::Instant::now();
    let summary = scheduler.run_round(1).await;
    let elapsed = started.elapsed();

    assert_eq!(summary.succeeded, 3);
    let times = env.browser.visit_times();
    assert_eq!(times.len(), 3);
    // First query starts right away; later ones wait the fixed gap.
    assert!(times[0].duration_since(started) < Duration::from_millis(1500));
    assert!(times[1].duration_since(times[0]) >= Duration::from_millis(1500));
    assert!(times[2].duration_since(times[1]) >= Duration::from_millis(1500));
    // No gap after the last query.
    assert!(elapsed >= Duration::from_millis(3000));
    assert!(elapsed < Duration::from_millis(4500));
}

#[tokio::test]
async fn test_round_delay_stays_within_bounds() {
    let env = TestEnv::new();
    let mut scheduler = env.scheduler(&["figurine"], 300, 600).with_seed(7);

    for _ in 0..200 {
        let delay = scheduler.next_round_delay();
        assert!(delay >= Duration::from_secs(300));
        assert!(delay <= Duration::from_secs(600));
    }
}

#[tokio::test]
async fn test_fixed_interval_when_bounds_are_equal() {
    let env = TestEnv::new();
    let mut scheduler = env.scheduler(&["figurine"], 450, 450);

    assert_eq!(scheduler.next_round_delay(), Duration::from_secs(450));
}

#[tokio::test(start_paused = true)]
async fn test_run_sleeps_between_rounds() {
    let env = TestEnv::new();
    env.browser
        .serve("figurine", FakePage::results(&[card("m1", "Item A", "1,000")]));

    let mut scheduler = env.scheduler(&["figurine"], 300, 300);
    let started = tokio::time::Instant::now();
    scheduler.run(Some(2)).await;

    // One sleep between the two rounds, none after the last.
    assert!(started.elapsed() >= Duration::from_secs(300));
    assert!(started.elapsed() < Duration::from_secs(600));
}
