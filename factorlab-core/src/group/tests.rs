use std::sync::Arc;

use chrono::NaiveDate;

use super::*;
use crate::data::mock::{sample_frame, MockProvider};
use crate::data::{MemoryStore, ProviderRegistry};
use crate::factors::ParamValue;

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

fn cache_with(frame: Frame) -> DataCache {
    let providers = ProviderRegistry::new().with_provider(Arc::new(MockProvider::returning("mock", frame)), 1);
    DataCache::new(Arc::new(MemoryStore::new()), Arc::new(providers))
}

fn period(p: i64) -> Params {
    let mut params = Params::new();
    params.insert("period".into(), ParamValue::Int(p));
    params
}

fn config(factors: Vec<FactorConfig>) -> DataGroupConfig {
    DataGroupConfig {
        name: "daily".into(),
        data_kind: DataKind::Daily,
        weight: 1.0,
        factors,
    }
}

#[tokio::test]
async fn failing_factor_is_omitted_others_survive() {
    let registry = FactorRegistry::with_builtin();
    let mut group = DataGroup::new(
        config(vec![
            FactorConfig::new("ma_3", "MovingAverageFactor", period(3)),
            FactorConfig::new("pe", "FinancialRatioFactor", Params::new()),
        ]),
        &registry,
    )
    .unwrap();

    let cache = cache_with(sample_frame(31));
    let prepared = group.prepare(&cache, "X", d(1), d(31), true).await.unwrap();

    assert_eq!(prepared.frame().len(), 31);
    assert!(prepared.frame().has_column("ma_3"));
    assert!(!prepared.frame().has_column("pe"));
    assert_eq!(prepared.dynamic_fields(), ["ma_3".to_string()]);
    assert_eq!(prepared.omitted_factors().len(), 1);
    assert_eq!(prepared.omitted_factors()[0].name, "pe");
    assert!(prepared.omitted_factors()[0].reason.contains("pe_ratio"));
}

#[tokio::test]
async fn feed_exposes_slot_map_after_canonical_fields() {
    let registry = FactorRegistry::with_builtin();
    let mut group = DataGroup::new(
        config(vec![
            FactorConfig::new("ma_3", "MovingAverageFactor", period(3)),
            FactorConfig::new("bb", "BollingerFactor", period(5)),
        ]),
        &registry,
    )
    .unwrap();
    let cache = cache_with(sample_frame(10));
    group.prepare(&cache, "X", d(1), d(10), true).await.unwrap();

    let feed = group.to_engine_feed().unwrap();
    assert_eq!(feed.len(), 10);
    assert_eq!(feed.symbol(), "X");
    assert_eq!(feed.slot_of("close"), Some(3));
    assert_eq!(feed.slot_of("ma_3"), Some(5));
    assert_eq!(feed.slot_of("bb_upper"), Some(6));
    assert_eq!(feed.slot_of("bb_position"), Some(10));
    // close = 100 + i; ma_3 at row 2 = 101
    assert_eq!(feed.field(2, "ma_3"), Some(101.0));
    assert!(feed.field(1, "ma_3").is_some_and(f64::is_nan));
}

#[tokio::test]
async fn extra_base_columns_become_dynamic_fields() {
    let registry = FactorRegistry::with_builtin();
    let mut group = DataGroup::new(
        config(vec![FactorConfig::new("ma_3", "MovingAverageFactor", period(3))]),
        &registry,
    )
    .unwrap();
    let mut base = sample_frame(10);
    base.push_column("amount", (0..10).map(|i| 1000.0 * (i + 1) as f64).collect())
        .unwrap();
    let cache = cache_with(base);

    let prepared = group.prepare(&cache, "X", d(1), d(10), true).await.unwrap();
    assert_eq!(prepared.dynamic_fields(), ["amount".to_string(), "ma_3".to_string()]);

    let feed = group.to_engine_feed().unwrap();
    assert_eq!(feed.slot_of("amount"), Some(5));
    assert_eq!(feed.slot_of("ma_3"), Some(6));
    assert_eq!(feed.field(2, "amount"), Some(3000.0));
    assert_eq!(feed.field(2, "ma_3"), Some(101.0));
}

#[tokio::test]
async fn unindexed_series_is_contract_violation() {
    let registry = FactorRegistry::with_builtin();
    let mut group = DataGroup::new(config(vec![]), &registry).unwrap();
    let cache = cache_with(Frame::unindexed(vec![("close".into(), vec![1.0, 2.0])]));
    let err = group.prepare(&cache, "X", d(1), d(5), false).await.unwrap_err();
    assert!(matches!(err, GroupError::ContractViolation { .. }));
}

#[tokio::test]
async fn no_data_prepares_an_empty_group() {
    let registry = FactorRegistry::with_builtin();
    let mut group = DataGroup::new(
        config(vec![FactorConfig::new("ma_3", "MovingAverageFactor", period(3))]),
        &registry,
    )
    .unwrap();
    let providers = ProviderRegistry::new().with_provider(Arc::new(MockProvider::failing("down")), 1);
    let cache = DataCache::new(Arc::new(MemoryStore::new()), Arc::new(providers));

    let prepared = group.prepare(&cache, "X", d(1), d(5), true).await.unwrap();
    assert!(prepared.is_empty());
    assert_eq!(prepared.source(), &FrameSource::NoData);
    assert!(group.to_engine_feed().unwrap().is_empty());
}

#[tokio::test]
async fn preparing_twice_is_rejected() {
    let registry = FactorRegistry::with_builtin();
    let mut group = DataGroup::new(config(vec![]), &registry).unwrap();
    let cache = cache_with(sample_frame(5));
    group.prepare(&cache, "X", d(1), d(5), true).await.unwrap();
    assert!(matches!(
        group.prepare(&cache, "X", d(1), d(5), true).await,
        Err(GroupError::ContractViolation { .. })
    ));
}

#[test]
fn feed_before_prepare_is_rejected() {
    let group = DataGroup::new(config(vec![]), &FactorRegistry::with_builtin()).unwrap();
    assert!(matches!(group.to_engine_feed(), Err(GroupError::ContractViolation { .. })));
}

#[test]
fn construction_checks_names_and_classes() {
    let registry = FactorRegistry::with_builtin();
    let dup = DataGroup::new(
        config(vec![
            FactorConfig::new("ma", "MovingAverageFactor", period(3)),
            FactorConfig::new("ma", "MovingAverageFactor", period(5)),
        ]),
        &registry,
    );
    assert!(matches!(dup, Err(GroupError::ContractViolation { .. })));

    let unknown = DataGroup::new(config(vec![FactorConfig::new("x", "NoSuchClass", Params::new())]), &registry);
    assert!(matches!(
        unknown,
        Err(GroupError::Factor {
            source: FactorError::NoSuchFactor(_),
            ..
        })
    ));

    let shadow = DataGroup::new(config(vec![FactorConfig::new("close", "MomentumFactor", Params::new())]), &registry);
    assert!(matches!(shadow, Err(GroupError::ContractViolation { .. })));
}

#[test]
fn config_reads_from_toml() {
    let cfg: DataGroupConfig = toml::from_str(
        r#"
        name = "daily_ma5_ma20"
        data_kind = "daily"

        [[factors]]
        name = "ma_5"
        class = "MovingAverageFactor"
        params = { period = 5, ma_type = "SMA" }

        [[factors]]
        name = "ma_20"
        class = "MovingAverageFactor"
        params = { period = 20 }
        "#,
    )
    .unwrap();
    assert_eq!(cfg.weight, 1.0);
    assert_eq!(cfg.factors.len(), 2);
    assert_eq!(cfg.factors[1].params["period"], ParamValue::Int(20));

    let group = DataGroup::new(cfg, &FactorRegistry::with_builtin()).unwrap();
    let names: Vec<&str> = group
        .factor_instances()
        .iter()
        .map(|i| i.instance_name.as_str())
        .collect();
    assert_eq!(names, vec!["ma_5", "ma_20"]);
}
