//! Property tests for storage invariants.
//!
//! Uses proptest to verify:
//! 1. Asset upserts are idempotent
//! 2. At most one snapshot per (asset, date), holding the last values written
//! 3. Appending overlapping price points never duplicates rows
//! 4. Batches that reference unknown assets write nothing

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use cryptolab_core::domain::{Asset, DateRange, MarketSnapshot, PricePoint};
use cryptolab_core::storage::{Storage, StorageError};
use cryptolab_core::ErrorClass;

const IDS: [&str; 3] = ["bitcoin", "ethereum", "solana"];

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn seeded() -> Storage {
    let storage = Storage::in_memory().unwrap();
    let assets: Vec<Asset> = IDS
        .iter()
        .map(|id| Asset::new(*id, &id[..3], *id, base_date()))
        .collect();
    storage.upsert_assets(&assets).unwrap();
    storage
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_price() -> impl Strategy<Value = f64> {
    (0.01..100_000.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

fn arb_snapshot() -> impl Strategy<Value = MarketSnapshot> {
    (0..IDS.len(), 0..5i64, arb_price(), proptest::option::of(arb_price())).prop_map(
        |(i, day, price, cap)| {
            let mut s = MarketSnapshot::new(IDS[i], base_date() + Duration::days(day), price);
            s.market_cap = cap;
            s
        },
    )
}

fn arb_point() -> impl Strategy<Value = PricePoint> {
    (0..IDS.len(), 0..48i64, arb_price()).prop_map(|(i, hour, price)| {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour);
        PricePoint::new(IDS[i], ts, price)
    })
}

fn all_points(storage: &Storage) -> Vec<PricePoint> {
    let range = DateRange::new(base_date(), base_date() + Duration::days(2)).unwrap();
    IDS.iter()
        .flat_map(|id| storage.query_price_history(id, range).unwrap())
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn asset_upsert_is_idempotent(names in proptest::collection::vec("[A-Za-z]{1,12}", 1..4)) {
        let storage = Storage::in_memory().unwrap();
        let assets: Vec<Asset> = names
            .iter()
            .enumerate()
            .map(|(i, n)| Asset::new(format!("coin-{i}"), n.to_lowercase(), n.clone(), base_date()))
            .collect();

        storage.upsert_assets(&assets).unwrap();
        let first = storage.list_assets().unwrap();
        storage.upsert_assets(&assets).unwrap();
        let second = storage.list_assets().unwrap();

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), assets.len());
    }

    #[test]
    fn snapshots_are_unique_and_last_write_wins(
        batches in proptest::collection::vec(proptest::collection::vec(arb_snapshot(), 1..8), 1..4)
    ) {
        let storage = seeded();
        let mut expected: BTreeMap<(String, NaiveDate), MarketSnapshot> = BTreeMap::new();
        for batch in &batches {
            storage.upsert_market_snapshots(batch).unwrap();
            for s in batch {
                expected.insert((s.asset_id.clone(), s.as_of_date), s.clone());
            }
        }

        let range = DateRange::new(base_date(), base_date() + Duration::days(5)).unwrap();
        let stored = storage.snapshots_between(range).unwrap();
        prop_assert_eq!(stored.len(), expected.len());
        for s in &stored {
            let want = &expected[&(s.asset_id.clone(), s.as_of_date)];
            prop_assert_eq!(s, want);
        }
    }

    #[test]
    fn overlapping_appends_never_duplicate(
        first in proptest::collection::vec(arb_point(), 0..20),
        second in proptest::collection::vec(arb_point(), 0..20),
    ) {
        let storage = seeded();
        storage.append_price_points(&first).unwrap();
        storage.append_price_points(&second).unwrap();
        storage.append_price_points(&first).unwrap();

        let stored = all_points(&storage);
        let keys: BTreeSet<_> = first.iter().chain(&second).map(|p| (p.asset_id.clone(), p.timestamp)).collect();
        prop_assert_eq!(stored.len(), keys.len());

        let stored_keys: BTreeSet<_> = stored.iter().map(|p| (p.asset_id.clone(), p.timestamp)).collect();
        prop_assert_eq!(stored_keys, keys);
        prop_assert_eq!(storage.table_counts().unwrap().price_points, stored.len());
    }
}

#[test]
fn append_reports_only_new_rows_and_keeps_existing_values() {
    let storage = seeded();
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
    assert_eq!(
        storage
            .append_price_points(&[PricePoint::new("bitcoin", ts, 100.0)])
            .unwrap(),
        1
    );
    let again = [
        PricePoint::new("bitcoin", ts, 999.0),
        PricePoint::new("bitcoin", ts + Duration::hours(1), 101.0),
    ];
    assert_eq!(storage.append_price_points(&again).unwrap(), 1);

    let stored = storage
        .query_price_history("bitcoin", DateRange::day(base_date()))
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].price, 100.0);
}

#[test]
fn unknown_asset_rejects_the_whole_batch() {
    let storage = seeded();
    let day = base_date();
    let batch = [
        MarketSnapshot::new("bitcoin", day, 42_000.0),
        MarketSnapshot::new("dogecoin", day, 0.1),
    ];
    let err = storage.upsert_market_snapshots(&batch).unwrap_err();
    match &err {
        StorageError::UnknownAsset { ids, .. } => assert_eq!(ids, &vec!["dogecoin".to_string()]),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.class(), ErrorClass::StorageWriteFailure);
    assert_eq!(storage.table_counts().unwrap().market_snapshots, 0);

    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let points = [PricePoint::new("bitcoin", ts, 1.0), PricePoint::new("nope", ts, 1.0)];
    assert!(storage.append_price_points(&points).is_err());
    assert_eq!(storage.table_counts().unwrap().price_points, 0);
}

#[test]
fn latest_snapshots_are_newest_first() {
    let storage = seeded();
    let snaps: Vec<MarketSnapshot> = (0..4)
        .map(|d| MarketSnapshot::new("ethereum", base_date() + Duration::days(d), 3000.0 + d as f64))
        .collect();
    storage.upsert_market_snapshots(&snaps).unwrap();

    let latest = storage.latest_snapshots("ethereum", 2).unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].price, 3003.0);
    assert_eq!(latest[1].price, 3002.0);
    assert!(storage.latest_snapshots("solana", 2).unwrap().is_empty());
}
