use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use tabular_reconcile::cancel::CancelToken;
use tabular_reconcile::config::EngineConfig;
use tabular_reconcile::export::{ExportFile, ExportRequest, Exporter};
use tabular_reconcile::reader::{self, ParseOptions};
use tabular_reconcile::source::{MemoryByteSource, TabularSource};
use tabular_reconcile::store::MemoryTableStore;

const ROWS: usize = 50_000;

fn generate_orders(rows: usize) -> String {
    let mut text = String::from("id,ordered_at,amount,status\n");
    for i in 0..rows {
        let status = match i % 3 {
            0 => "shipped",
            1 => "pending",
            _ => "processing",
        };
        let day = (i % 28) + 1;
        text.push_str(&format!("{i},2024-01-{day:02},{}.25,{status}\n", i % 997));
    }
    text
}

fn bench_bounded_vs_streaming(c: &mut Criterion) {
    let bytes = MemoryByteSource::new().with("orders.csv", generate_orders(ROWS));
    let source = TabularSource::new("orders.csv");
    let window = ParseOptions {
        max_rows: Some(10_000),
        offset: 20_000,
        ..ParseOptions::default()
    };
    let unbounded = ParseOptions {
        max_rows: None,
        ..ParseOptions::default()
    };

    let mut group = c.benchmark_group("read");
    group.sample_size(20);

    group.bench_function("bounded_page", |b| {
        b.iter(|| {
            let (_, page) = reader::read_page(&bytes, &source, &window).expect("page");
            assert_eq!(page.rows.len(), 10_000);
        });
    });

    group.bench_function("streamed_chunks", |b| {
        b.iter(|| {
            let opened = reader::open(&bytes, &source, &unbounded).expect("open");
            let rows: usize = opened
                .into_chunks(1_000, CancelToken::new())
                .map(|chunk| chunk.expect("chunk").rows.len())
                .sum();
            assert_eq!(rows, ROWS);
        });
    });

    group.bench_function("export_to_memory", |b| {
        let config = EngineConfig::default();
        let request = ExportRequest::new("bench", "orders", vec![ExportFile::new("orders.csv")]);
        b.iter_batched(
            MemoryTableStore::new,
            |store| {
                let outcome = Exporter::new(&bytes, &store, &config)
                    .run(&request)
                    .expect("export");
                assert_eq!(outcome.rows_written, ROWS);
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_bounded_vs_streaming);
criterion_main!(benches);
