//! End-to-end panel loads over an in-memory warehouse.
//!
//! The fixture mimics the FactSet layout: symbology, global prices with
//! adjustment factors, fundamentals tables (one of them outside the priority
//! list), a reference calendar and two estimate kinds.

use chrono::NaiveDate;
use polars::prelude::*;
use refpanel_core::config::{FetchPolicy, Settings};
use refpanel_core::domain::{DateWindow, Frequency, TableId};
use refpanel_core::frame;
use refpanel_core::output::{ExportFormat, PanelOutput};
use refpanel_core::panel::{PanelAssembler, PanelError, PanelRequest};
use refpanel_core::source::{FrameWarehouse, SymbologyMapper};
use refpanel_core::MetadataService;

const AAA: &str = "US0000000001";
const BBB: &str = "US0000000002";
const UNMAPPED: &str = "XS9999999999";

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn t(s: &str) -> TableId {
    s.parse().unwrap()
}

fn window() -> DateWindow {
    DateWindow::new(d(2021, 1, 1), d(2021, 12, 31)).unwrap()
}

fn warehouse() -> FrameWarehouse {
    FrameWarehouse::new("fixture")
        // ── Symbology ──
        .with_table(
            t("sym_v1.sym_isin"),
            df!(
                "isin" => &[AAA, BBB],
                "fsym_id" => &["AAA-S", "BBB-S"]
            )
            .unwrap(),
        )
        .with_table(
            t("sym_v1.sym_coverage"),
            df!(
                "fsym_security_id" => &["AAA-S", "BBB-S"],
                "fsym_regional_id" => &["AAA-R", "BBB-R"]
            )
            .unwrap(),
        )
        // ── Prices ──
        .with_table(
            t("fgp_v1.fgp_global_prices"),
            df!(
                "fsym_id" => &["AAA-R", "AAA-R", "BBB-R", "BBB-R"],
                "price_date" => &["2021-01-01", "2021-02-01", "2021-01-01", "2021-02-01"],
                "price" => &[100.0, 52.0, 20.0, 21.0],
                "currency" => &["USD", "USD", "EUR", "EUR"]
            )
            .unwrap(),
        )
        .with_table(
            t("fgp_v1.fgp_ca_adj_factors"),
            df!(
                "fsym_id" => &["AAA-R"],
                "effective_date" => &["2021-01-15"],
                "div_spl_spin_adj_factor" => &[0.5]
            )
            .unwrap(),
        )
        // ── Fundamentals ──
        .with_table(
            t("ff_v3.ff_basic_qf"),
            df!(
                "fsym_id" => &["AAA-S", "AAA-S", "BBB-S"],
                "date" => &["2021-03-31", "2021-06-30", "2021-03-31"],
                "ff_sales" => &[100.0, 110.0, 40.0]
            )
            .unwrap(),
        )
        .with_table(
            t("ff_v3.ff_extra_qf"),
            df!(
                "fsym_id" => &["AAA-S", "BBB-S"],
                "date" => &["2021-03-31", "2021-03-31"],
                "eps" => &[1.25, 0.5]
            )
            .unwrap(),
        )
        .with_table(
            t("ref_v2.ref_calendar_dates"),
            df!("ref_date" => &["2021-03-31", "2021-06-30", "2021-09-30"]).unwrap(),
        )
        // ── Estimates ──
        .with_table(
            t("fe_v4.fe_advanced_act_qf"),
            df!(
                "fsym_id" => &["AAA-S", "AAA-S", "BBB-S"],
                "fe_item" => &["EPS", "EPS", "EPS"],
                "fe_fp_end" => &["2021-03-31", "2021-06-30", "2021-03-31"],
                "currency" => &["USD", "USD", "EUR"],
                "fe_value" => &[1.2, 1.3, 0.4]
            )
            .unwrap(),
        )
        .with_table(
            t("fe_v4.fe_advanced_conh_qf"),
            df!(
                "fsym_id" => &["AAA-S", "AAA-S"],
                "fe_item" => &["EPS", "BPS"],
                "fe_fp_end" => &["2021-03-31", "2021-03-31"],
                "currency" => &["USD", "USD"],
                "fe_mean" => &[1.1, 12.0]
            )
            .unwrap(),
        )
        // ── Metadata ──
        .with_table(
            t("ref_v2.ref_metadata_fields"),
            df!(
                "field_name" => &["ff_sales", "eps"],
                "field_description" => &["Net sales", "Earnings per share"]
            )
            .unwrap(),
        )
}

fn load(
    wh: &FrameWarehouse,
    settings: &Settings,
    request: &PanelRequest,
) -> Result<PanelOutput, PanelError> {
    let mapper = SymbologyMapper::new(wh, settings.symbology.clone());
    PanelAssembler::new(wh, wh, &mapper, settings).load(request)
}

fn values(df: &DataFrame, column: &str) -> Vec<Option<f64>> {
    frame::read_floats(df, column).unwrap()
}

// ── Prices ───────────────────────────────────────────────────────────

#[test]
fn prices_are_adjusted_per_listing() {
    let wh = warehouse();
    let settings = Settings::default();
    let request = PanelRequest::new([AAA, BBB, UNMAPPED])
        .window(window())
        .prices(["price", "currency"]);
    let output = load(&wh, &settings, &request).unwrap();

    let prices = output.get("prices");
    assert_eq!(
        frame::column_names(&prices),
        vec!["date", "ISIN", "currency", "price", "price_adj"]
    );
    assert_eq!(
        frame::read_strings(&prices, "ISIN").unwrap(),
        vec![
            Some(AAA.to_string()),
            Some(AAA.to_string()),
            Some(BBB.to_string()),
            Some(BBB.to_string())
        ]
    );
    // E1: the 2021-01-15 split halves the earlier AAA price only.
    assert_eq!(
        values(&prices, "price_adj"),
        vec![Some(50.0), Some(52.0), Some(20.0), Some(21.0)]
    );
}

#[test]
fn disabled_adjustment_keeps_adj_columns() {
    let wh = warehouse();
    let settings = Settings::default();
    let request = PanelRequest::new([AAA])
        .window(window())
        .prices(["price"])
        .adjust(false);
    let prices = load(&wh, &settings, &request).unwrap().get("prices");
    assert_eq!(values(&prices, "price_adj"), values(&prices, "price"));
}

// ── Fundamentals ─────────────────────────────────────────────────────

#[test]
fn non_priority_field_without_fallback_is_null() {
    let wh = warehouse();
    let settings = Settings::default();
    let request = PanelRequest::new([AAA, BBB])
        .window(window())
        .fundamentals(["ff_sales", "eps"])
        .fallback(false);
    let output = load(&wh, &settings, &request).unwrap();

    assert_eq!(output.summary().resolution.get("eps"), Some(None));
    assert_eq!(
        output.summary().resolution.get("ff_sales"),
        Some(Some(&t("ff_v3.ff_basic_qf")))
    );

    let fundamentals = output.get("fundamentals");
    assert_eq!(
        frame::column_names(&fundamentals),
        vec!["date", "ISIN", "ff_sales", "eps"]
    );
    assert_eq!(fundamentals.height(), 3);
    assert_eq!(
        fundamentals.column("eps").unwrap().null_count(),
        fundamentals.height()
    );
}

#[test]
fn fallback_reaches_non_priority_table() {
    let wh = warehouse();
    let settings = Settings::default();
    let request = PanelRequest::new([AAA, BBB])
        .window(window())
        .fundamentals(["ff_sales", "eps"])
        .fallback(true);
    let output = load(&wh, &settings, &request).unwrap();

    assert_eq!(
        output.summary().resolution.get("eps"),
        Some(Some(&t("ff_v3.ff_extra_qf")))
    );
    let fundamentals = output.get("fundamentals");
    let dates = frame::read_dates(&fundamentals, "date").unwrap();
    let isins = frame::read_strings(&fundamentals, "ISIN").unwrap();
    let eps = values(&fundamentals, "eps");
    let at = |date: NaiveDate, isin: &str| {
        (0..fundamentals.height())
            .find(|&i| dates[i] == Some(date) && isins[i].as_deref() == Some(isin))
            .map(|i| eps[i])
    };
    assert_eq!(at(d(2021, 3, 31), AAA), Some(Some(1.25)));
    assert_eq!(at(d(2021, 3, 31), BBB), Some(Some(0.5)));
    assert_eq!(at(d(2021, 6, 30), AAA), Some(None));
}

#[test]
fn configured_priority_resolves_without_fallback() {
    let wh = warehouse();
    let settings = Settings::from_toml(
        r#"
        [fundamentals.priority]
        qf = ["ff_v3.ff_extra_qf", "ff_v3.ff_basic_qf"]
        "#,
    )
    .unwrap();
    let request = PanelRequest::new([AAA])
        .window(window())
        .fundamentals(["eps"])
        .frequency(Frequency::Qf);
    let output = load(&wh, &settings, &request).unwrap();
    assert_eq!(
        output.summary().resolution.get("eps"),
        Some(Some(&t("ff_v3.ff_extra_qf")))
    );
    assert_eq!(values(&output.get("fundamentals"), "eps"), vec![Some(1.25)]);
}

#[test]
fn missing_calendar_escalates_when_configured() {
    let mut wh = warehouse();
    wh.insert(t("ref_v2.ref_calendar_dates"), df!("unrelated" => &[1i32]).unwrap());
    let request = PanelRequest::new([AAA])
        .window(window())
        .fundamentals(["ff_sales"]);

    let degraded = load(&wh, &Settings::default(), &request).unwrap();
    assert_eq!(degraded.get("fundamentals").height(), 2);

    let settings = Settings {
        fetch_policy: FetchPolicy::Escalate,
        ..Settings::default()
    };
    let escalated = load(&wh, &settings, &request);
    assert!(matches!(escalated, Err(PanelError::Fetch { .. })));
}

// ── Estimates ────────────────────────────────────────────────────────

#[test]
fn missing_estimate_item_is_filled_per_key() {
    let wh = warehouse();
    let settings = Settings::default();
    let request = PanelRequest::new([AAA, BBB])
        .window(window())
        .estimates(["act", "conh"], ["EPS", "BPS"]);
    let output = load(&wh, &settings, &request).unwrap();

    assert_eq!(
        output.keys().collect::<Vec<_>>(),
        vec!["estimates.act", "estimates.conh", "fundamentals", "prices"]
    );
    assert_eq!(
        output.summary().synthesized_items.get("act"),
        Some(&vec!["BPS".to_string()])
    );
    assert!(!output.summary().synthesized_items.contains_key("conh"));

    let actuals = output.get("estimates.act");
    let items = frame::read_strings(&actuals, "fe_item").unwrap();
    let value = values(&actuals, "fe_value");
    let bps: Vec<usize> = (0..actuals.height())
        .filter(|&i| items[i].as_deref() == Some("BPS"))
        .collect();
    let eps = (0..actuals.height())
        .filter(|&i| items[i].as_deref() == Some("EPS"))
        .count();
    assert_eq!(bps.len(), eps);
    assert!(bps.iter().all(|&i| value[i].is_none()));
}

// ── Whole request ────────────────────────────────────────────────────

#[test]
fn empty_isin_list_matches_unmapped_shape() {
    let wh = warehouse();
    let settings = Settings::default();
    let request = |isins: Vec<String>| {
        PanelRequest::new(isins)
            .window(window())
            .prices(["price"])
            .fundamentals(["ff_sales"])
            .estimates(["conh"], ["EPS"])
    };

    let empty = load(&wh, &settings, &request(Vec::new())).unwrap();
    let unmapped = load(&wh, &settings, &request(vec![UNMAPPED.to_string()])).unwrap();

    assert_eq!(
        empty.keys().collect::<Vec<_>>(),
        vec!["estimates.conh", "fundamentals", "prices"]
    );
    assert_eq!(empty.keys().collect::<Vec<_>>(), unmapped.keys().collect::<Vec<_>>());
    for key in empty.keys() {
        let (a, b) = (empty.get(key), unmapped.get(key));
        assert_eq!(a.height(), 0, "{key}");
        assert_eq!(a.schema(), b.schema(), "{key}");
    }
    assert_eq!(
        frame::column_names(&empty.get("fundamentals")),
        vec!["date", "ISIN", "ff_sales"]
    );
}

#[test]
fn empty_fundamentals_table_does_not_abort_the_load() {
    let mut wh = warehouse();
    wh.insert(
        t("ff_v3.ff_basic_der_qf"),
        df!(
            "fsym_id" => &["ZZZ-S"],
            "date" => &["2021-06-30"],
            "ff_roe" => &[0.3]
        )
        .unwrap(),
    );
    let settings = Settings::default();
    let request = PanelRequest::new([AAA, BBB])
        .window(window())
        .fundamentals(["ff_sales", "ff_roe"]);
    let output = load(&wh, &settings, &request).unwrap();

    let fundamentals = output.get("fundamentals");
    assert_eq!(
        frame::column_names(&fundamentals),
        vec!["date", "ISIN", "ff_sales", "ff_roe"]
    );
    assert!(fundamentals.height() > 0);
    assert_eq!(fundamentals.column("ff_roe").unwrap().null_count(), fundamentals.height());
    assert_eq!(output.summary().resolution.get("ff_roe"), Some(Some(&t("ff_v3.ff_basic_der_qf"))));
}

#[test]
fn failing_fundamentals_table_degrades() {
    let mut wh = warehouse();
    // No `date` column, so the fetch fails.
    wh.insert(
        t("ff_v3.ff_basic_der_qf"),
        df!("fsym_id" => &["AAA-S"], "ff_roe" => &[0.3]).unwrap(),
    );
    let request = PanelRequest::new([AAA, BBB])
        .window(window())
        .fundamentals(["ff_sales", "ff_roe"]);

    let output = load(&wh, &Settings::default(), &request).unwrap();
    let fundamentals = output.get("fundamentals");
    assert_eq!(
        frame::column_names(&fundamentals),
        vec!["date", "ISIN", "ff_sales", "ff_roe"]
    );
    assert_eq!(fundamentals.column("ff_roe").unwrap().null_count(), fundamentals.height());

    let strict = Settings {
        fetch_policy: FetchPolicy::Escalate,
        ..Settings::default()
    };
    assert!(matches!(
        load(&wh, &strict, &request),
        Err(PanelError::Fetch { .. })
    ));
}

#[test]
fn full_request_exports_and_reshapes() {
    let wh = warehouse();
    let settings = Settings::default();
    let request = PanelRequest::new([AAA, BBB])
        .window(window())
        .prices(["price"])
        .fundamentals(["ff_sales"])
        .estimates(["conh"], ["EPS"]);
    let output = load(&wh, &settings, &request).unwrap();
    assert_eq!(output.summary().fingerprint, request.fingerprint());

    let matrix = output.to_matrix("prices", "price_adj").unwrap();
    assert_eq!(frame::column_names(&matrix), vec!["date", AAA, BBB]);
    assert_eq!(values(&matrix, AAA), vec![Some(50.0), Some(52.0)]);

    let only_bbb = output.filter(Some(&[BBB.to_string()]), None, Some(d(2021, 1, 31))).unwrap();
    assert_eq!(only_bbb.get("prices").height(), 1);

    let dir = tempfile::tempdir().unwrap();
    let manifest = output.write_to(dir.path(), ExportFormat::Parquet).unwrap();
    assert_eq!(manifest.frames.len(), 3);
    assert!(dir.path().join("manifest.json").exists());
    assert!(dir.path().join("prices.parquet").exists());

    let reloaded = FrameWarehouse::from_dir(dir.path()).unwrap();
    // `estimates.conh.parquet` parses as a table id; `prices.parquet` does not.
    assert_eq!(reloaded.len(), 1);
}

#[test]
fn metadata_lookups_share_the_warehouse() {
    let wh = warehouse();
    let settings = Settings::default();
    let meta = MetadataService::new(&wh, &wh, &settings.metadata);
    assert_eq!(
        meta.field_description("eps").unwrap().as_deref(),
        Some("Earnings per share")
    );
    let tables = meta.column_tables("EPS").unwrap();
    assert_eq!(tables, vec![t("ff_v3.ff_extra_qf")]);
}
