use chrono::{Duration, NaiveDate, NaiveDateTime};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use esolmet_ingest::analyzers::SolarPositionEngine;
use esolmet_ingest::models::{RawRecordSet, Settings, UtcOffset, VariableSpec};
use esolmet_ingest::processors::{LongFormatExporter, SchemaNormalizer};

fn ten_minute_series(days: i64) -> Vec<NaiveDateTime> {
    let start = NaiveDate::from_ymd_opt(2023, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    (0..days * 144)
        .map(|step| start + Duration::minutes(step * 10))
        .collect()
}

fn station_settings() -> Settings {
    Settings::new(
        "Temixco",
        18.8394,
        -99.2356,
        UtcOffset::from_hours(-6).unwrap(),
        vec![
            VariableSpec::new("I_glo_Avg"),
            VariableSpec::new("I_dif_Avg"),
            VariableSpec::renamed("AirTC_Avg", "Ta"),
            VariableSpec::new("RH"),
            VariableSpec::new("WS_ms_Avg"),
        ],
    )
    .unwrap()
}

// Synthetic logger table with a RECORD column, an ignored column and sparse nulls
fn create_raw_table(days: i64) -> RawRecordSet {
    let headers = ["TIMESTAMP", "RECORD", "I_glo_Avg", "I_dif_Avg", "AirTC_Avg", "RH", "WS_ms_Avg", "BattV_Min"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let rows = ten_minute_series(days)
        .iter()
        .enumerate()
        .map(|(i, ts)| {
            let glo = if i % 97 == 0 { "NAN".to_string() } else { format!("{:.1}", (i % 144) as f64 * 6.5) };
            vec![
                ts.format("%Y-%m-%d %H:%M:%S").to_string(),
                i.to_string(),
                glo,
                format!("{:.1}", (i % 144) as f64 * 1.2),
                format!("{:.2}", 15.0 + (i % 144) as f64 * 0.1),
                format!("{}", 30 + i % 50),
                if i % 53 == 0 { "-".to_string() } else { format!("{:.2}", (i % 20) as f64 * 0.3) },
                "12.6".to_string(),
            ]
        })
        .collect();

    RawRecordSet::new(headers, rows, "utf-8")
}

fn benchmark_solar_elevation(c: &mut Criterion) {
    let engine = SolarPositionEngine::new(18.8394, -99.2356, UtcOffset::from_hours(-6).unwrap());
    let mut group = c.benchmark_group("solar_elevation");

    for days in [30, 365] {
        let series = ten_minute_series(days);
        group.bench_with_input(BenchmarkId::new("days", days), &series, |b, series| {
            b.iter(|| black_box(engine.apparent_elevation(black_box(series))))
        });
    }

    group.finish();
}

fn benchmark_normalization(c: &mut Criterion) {
    let settings = station_settings();
    let mut group = c.benchmark_group("normalization");

    for days in [7, 90] {
        let raw = create_raw_table(days);
        group.bench_with_input(BenchmarkId::new("wide", days), &raw, |b, raw| {
            b.iter(|| black_box(SchemaNormalizer::new(&settings).normalize(black_box(raw)).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("long", days), &raw, |b, raw| {
            b.iter(|| black_box(LongFormatExporter::new(&settings).export(black_box(raw)).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_solar_elevation, benchmark_normalization);
criterion_main!(benches);
