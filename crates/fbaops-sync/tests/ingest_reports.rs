use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fbaops_adapters::{
    AdapterError, DailyRateTable, FileReportSource, Marketplace, MarketplaceRegistry,
    ReportDocument, ReportReader, ReportSource, StaticCatalog,
};
use fbaops_core::{
    AmazonReferralFee, EntityKind, NewAsin, NewEanAsin, NewSku, OutcomeCounts, PackageDimensions,
    PriceGridFbaFee,
};
use fbaops_storage::{
    AfnInventoryRepository, AsinRepository, EanAsinRepository, MemoryStore, SkuRepository,
};
use fbaops_sync::{IngestError, PricingDefaults, Reconciler, ReportIngestor, SyncPipeline};
use flate2::write::GzEncoder;
use rust_decimal_macros::dec;

const REPORT: &str = "sku\tfnsku\tasin\tproduct-name\tcondition\tyour-price\tafn-fulfillable-quantity\n\
MUG-01\tX00MUG0001\tB000MUG001\t\"Tasse \"\"XL\"\"\"\tNew\t29,99\t5\n\
GHOST-7\tX00GHOST07\tB0GHOST007\tGhost\tNew\t9.99\t1\n\
MUG-01\tX00MUG0001\tB000MUG001\tTasse XL\tNew\t27.49\t3\n";

async fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for cc in ["DE", "FR"] {
        store
            .seed_price_grid_fba_fee(PriceGridFbaFee {
                id: 0,
                country_code: cc.into(),
                category: "standard".into(),
                sort_order: 1,
                max_length_cm: dec!(45),
                max_width_cm: dec!(34),
                max_height_cm: dec!(26),
                max_weight_kg: dec!(12),
                fee_local: dec!(3.00),
                fee_efn: Some(dec!(4.10)),
                low_price_fee_local: None,
                low_price_fee_efn: None,
                low_price_threshold: None,
            })
            .await;
        store
            .seed_referral_fee(AmazonReferralFee {
                id: 0,
                country_code: cc.into(),
                product_category: "Kitchen".into(),
                percentage: dec!(0.15),
                reduced_percentage: None,
                reduced_price_limit: None,
                minimum_fee: dec!(0.30),
                closing_fee: dec!(0.50),
            })
            .await;
    }

    store
        .create_sku(NewSku {
            sku: "MUG-01".into(),
            country_code: "DE".into(),
            currency: "EUR".into(),
            fnsku: Some("X00MUG0001".into()),
            acquisition_cost_excl: dec!(10.00),
            acquisition_cost_incl: dec!(11.90),
            total_fulfillable_quantity: 0,
            average_selling_price: None,
            pricing_rule_id: None,
            is_test: false,
        })
        .await
        .unwrap();
    let asin = store
        .create_asin(NewAsin {
            asin: "B000MUG001".into(),
            country_code: "DE".into(),
            name: Some("Tasse".into()),
            image_url: None,
            product_category: Some("Kitchen".into()),
            tax_category: None,
            preparation_notes: None,
            is_hazmat: false,
            has_battery: false,
            package: Some(PackageDimensions {
                length_cm: dec!(12),
                width_cm: dec!(10),
                height_cm: dec!(10),
                weight_kg: dec!(0.4),
            }),
        })
        .await
        .unwrap();
    store
        .create_ean_asin(NewEanAsin {
            ean: "4006381333931".into(),
            asin_id: asin.id,
            quantity: 1,
        })
        .await
        .unwrap();
    store
}

fn marketplaces() -> MarketplaceRegistry {
    MarketplaceRegistry::new(["DE", "FR"].map(|cc| Marketplace {
        country_code: cc.into(),
        marketplace_id: format!("MKT{cc}"),
        currency: "EUR".into(),
        vat_rate: if cc == "DE" { dec!(0.19) } else { dec!(0.20) },
        pan_eu_eligible: true,
    }))
    .unwrap()
}

fn pipeline(store: Arc<MemoryStore>, source: Arc<dyn ReportSource>) -> SyncPipeline {
    let reconciler = Reconciler::new(
        store,
        Arc::new(StaticCatalog::new()),
        Arc::new(DailyRateTable::new()),
        Arc::new(marketplaces()),
        PricingDefaults::default(),
    );
    SyncPipeline::new(source, ReportIngestor::new(Arc::new(reconciler), 4, Duration::from_secs(5)))
}

fn write_gzip(path: &Path, body: &str) {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    std::fs::write(path, encoder.finish().unwrap()).unwrap();
}

async fn assert_fr_state(store: &MemoryStore) {
    let fr = store.find_sku("MUG-01", "FR").await.unwrap().unwrap();
    assert_eq!(fr.fnsku.as_deref(), Some("X00MUG0001"));
    assert_eq!(fr.total_fulfillable_quantity, 3);
    assert!(fr.is_active);

    let snapshot = store.find_afn_snapshot(fr.id).await.unwrap().unwrap();
    assert_eq!(snapshot.fulfillable_quantity, 3);
    assert_eq!(snapshot.actual_price, Some(dec!(27.49)));

    let asin = store.find_asin("B000MUG001", "FR").await.unwrap().unwrap();
    assert_eq!(store.list_ean_asins(asin.id).await.unwrap().len(), 1);
    assert!(store.find_sku("GHOST-7", "FR").await.unwrap().is_none());
}

#[tokio::test]
async fn plain_report_is_reconciled_row_by_row() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("inventory.tsv"), REPORT).unwrap();
    let store = seeded_store().await;
    let pipeline = pipeline(store.clone(), Arc::new(FileReportSource::new(dir.path())));

    let summary = pipeline.run_document("inventory.tsv", "fr").await.unwrap();
    assert_eq!(summary.country_code, "FR");
    assert_eq!(summary.rows_read, 3);
    assert_eq!(summary.rows_reconciled, 2);
    assert_eq!(summary.rows_failed, 1);
    assert_eq!(summary.rows_invalid, 0);
    assert_eq!(summary.counts.get(EntityKind::Sku), OutcomeCounts { created: 1, found: 1 });
    assert_eq!(summary.counts.get(EntityKind::Asin), OutcomeCounts { created: 1, found: 1 });
    assert_eq!(
        summary.counts.get(EntityKind::AfnInventoryDailyUpdate),
        OutcomeCounts { created: 1, found: 1 }
    );
    assert_fr_state(&store).await;
}

#[tokio::test]
async fn gzip_report_yields_the_same_state() {
    let dir = tempfile::tempdir().unwrap();
    write_gzip(&dir.path().join("inventory.tsv.gz"), REPORT);
    let store = seeded_store().await;
    let pipeline = pipeline(store.clone(), Arc::new(FileReportSource::new(dir.path())));

    let summary = pipeline.run_document("inventory.tsv.gz", "FR").await.unwrap();
    assert_eq!(summary.rows_read, 3);
    assert_eq!(summary.rows_reconciled, 2);
    assert_fr_state(&store).await;
}

#[tokio::test]
async fn second_run_only_finds_records() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("inventory.tsv"), REPORT).unwrap();
    let store = seeded_store().await;
    let pipeline = pipeline(store.clone(), Arc::new(FileReportSource::new(dir.path())));

    let first = pipeline.run_document("inventory.tsv", "FR").await.unwrap();
    let second = pipeline.run_document("inventory.tsv", "FR").await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert!(first.counts.total_created() > 0);
    assert_eq!(second.counts.total_created(), 0);
    assert_eq!(second.counts.get(EntityKind::Sku).found, 2);
    assert_eq!(store.find_skus_by_code("MUG-01").await.unwrap().len(), 2);
    assert_fr_state(&store).await;
}

#[tokio::test]
async fn unknown_country_fails_before_reading() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("inventory.tsv"), REPORT).unwrap();
    let store = seeded_store().await;
    let pipeline = pipeline(store.clone(), Arc::new(FileReportSource::new(dir.path())));

    let err = pipeline.run_document("inventory.tsv", "JP").await.unwrap_err();
    assert!(matches!(err, IngestError::Source(AdapterError::UnknownMarketplace(_))));
    assert!(store.find_sku("MUG-01", "JP").await.unwrap().is_none());
}

struct ZstdSource;

#[async_trait]
impl ReportSource for ZstdSource {
    async fn report_document(&self, report_document_id: &str) -> Result<ReportDocument, AdapterError> {
        Ok(ReportDocument {
            report_document_id: report_document_id.to_string(),
            url: "https://reports.example/doc".into(),
            compression_algorithm: Some("ZSTD".into()),
        })
    }

    async fn open_document(&self, _document: &ReportDocument) -> Result<ReportReader, AdapterError> {
        panic!("an unsupported document must not be opened");
    }
}

#[tokio::test]
async fn unsupported_compression_is_rejected_up_front() {
    let store = seeded_store().await;
    let pipeline = pipeline(store.clone(), Arc::new(ZstdSource));

    let err = pipeline.run_document("doc-zstd", "FR").await.unwrap_err();
    assert!(matches!(err, IngestError::UnsupportedFormat(_)));
    assert!(store.find_sku("MUG-01", "FR").await.unwrap().is_none());
}
