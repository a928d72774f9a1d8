//! ---
//! flx_section: "03-persistence-logging"
//! flx_subsection: "tests"
//! flx_type: "test"
//! flx_scope: "code"
//! flx_description: "Production history retention against a real directory."
//! flx_version: "v0.1.0"
//! flx_owner: "line-controls"
//! ---
use anyhow::Result;
use chrono::Utc;
use flexo_msg::{OrderId, ProductionRecord};
use flexo_persistence::{StateStore, HISTORY_FILE};
use tempfile::tempdir;
use uuid::Uuid;

fn record(order_no: &str) -> ProductionRecord {
    let now = Utc::now();
    ProductionRecord {
        id: Uuid::new_v4(),
        order_id: OrderId::generate(),
        order_no: order_no.to_owned(),
        box_no: "BX-1".into(),
        customer: None,
        product_name: None,
        operator: "ana".into(),
        shift: "day".into(),
        target_qty: 100,
        good_qty: 98,
        defect_qty: 2,
        prep_minutes: 4.5,
        run_minutes: 12.0,
        stop_minutes: 1.5,
        run_seconds: 720,
        stop_seconds: 90,
        stop_count: 1,
        avg_speed: 8,
        oee: 88,
        date: now.date_naive(),
        finished_at: now,
        stop_reasons: Vec::new(),
    }
}

#[test]
fn history_is_newest_first_and_capped() -> Result<()> {
    let dir = tempdir()?;
    let store = StateStore::open(dir.path(), 3)?;

    for n in 0..5 {
        store.record_production(record(&format!("SO-{n}")))?;
    }

    let history = store.load_history()?;
    let numbers: Vec<_> = history.iter().map(|r| r.order_no.as_str()).collect();
    assert_eq!(numbers, vec!["SO-4", "SO-3", "SO-2"]);
    assert!(dir.path().join(HISTORY_FILE).exists());
    Ok(())
}

#[test]
fn history_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let first = record("SO-9");
    StateStore::open(dir.path(), 1000)?.record_production(first.clone())?;

    let reopened = StateStore::open(dir.path(), 1000)?;
    assert_eq!(reopened.load_history()?, vec![first]);
    Ok(())
}
